use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::info;

use crate::engine::{Configuration, Poller};
use crate::error::EngineError;
use crate::record::{MetricRecord, Sample};

pub const DATA_TYPE: &str = "INSIGHTS_METRICS_BLOB";
pub const IP_NAME: &str = "VMInsights";

/// Upload envelope for one sample.
#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct InsightsBlob<'a> {
    pub data_type: &'static str,
    #[serde(rename = "IPName")]
    pub ip_name: &'static str,
    pub data_items: &'a [MetricRecord],
}

impl<'a> InsightsBlob<'a> {
    pub fn new(data_items: &'a [MetricRecord]) -> Self {
        Self {
            data_type: DATA_TYPE,
            ip_name: IP_NAME,
            data_items,
        }
    }
}

/// Destination for wrapped samples.
pub trait Router: Send + 'static {
    fn emit(&mut self, tag: &str, time: DateTime<Utc>, record: Value) -> anyhow::Result<()>;
}

impl<T> Router for T
where
    T: FnMut(&str, DateTime<Utc>, Value) -> anyhow::Result<()> + Send + 'static,
{
    fn emit(&mut self, tag: &str, time: DateTime<Utc>, record: Value) -> anyhow::Result<()> {
        self(tag, time, record)
    }
}

/// Drives a [`Poller`] and forwards every sample to a [`Router`] under `tag`.
pub struct InsightsInput<P> {
    instance_id: String,
    tag: String,
    poller: P,
    config: Configuration,
}

impl<P: Poller> InsightsInput<P> {
    pub fn new(tag: impl Into<String>, poller: P, config: Configuration) -> Self {
        Self {
            instance_id: format!("InsightsInput({})", Utc::now().to_rfc3339()),
            tag: tag.into(),
            poller,
            config,
        }
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn is_running(&self) -> bool {
        self.poller.is_running()
    }

    pub fn start<R: Router>(&mut self, mut router: R) -> Result<(), EngineError> {
        info!(tag = %self.tag, "{self}: starting ...");
        let tag = self.tag.clone();
        self.poller.start(&self.config, move |sample: Sample| {
            let blob = serde_json::to_value(InsightsBlob::new(&sample))?;
            router.emit(&tag, Utc::now(), blob)
        })
    }

    pub async fn stop(&mut self) {
        info!(tag = %self.tag, "{self}: stopping ...");
        self.poller.stop().await;
        info!(tag = %self.tag, "{self}: ... stopped");
    }
}

impl<P> fmt::Display for InsightsInput<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.instance_id)
    }
}
