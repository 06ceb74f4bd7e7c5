#![allow(dead_code)]

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex};

use tracing::field::{Field, Visit};
use tracing::subscriber::DefaultGuard;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

use insights_agent::collectors::{
    CounterSource, CpuTimes, DiskDelta, Filesystem, MemoryInfo, NetDelta,
};
use insights_agent::engine::SharedSource;
use insights_agent::error::SampleError;
use insights_agent::record::Sample;

/// One event seen by [`LogCapture`].
#[derive(Debug, Clone)]
pub struct CapturedEvent {
    pub level: Level,
    pub message: String,
    pub fields: BTreeMap<String, String>,
}

/// Layer that records every event it sees.
#[derive(Clone, Default)]
pub struct LogCapture(Arc<Mutex<Vec<CapturedEvent>>>);

impl LogCapture {
    /// Install a capturing subscriber for the current thread.
    pub fn install() -> (Self, DefaultGuard) {
        let capture = Self::default();
        let subscriber = tracing_subscriber::registry().with(capture.clone());
        let guard = tracing::subscriber::set_default(subscriber);
        (capture, guard)
    }

    pub fn events(&self) -> Vec<CapturedEvent> {
        self.0.lock().unwrap().clone()
    }

    pub fn at_level(&self, level: Level) -> Vec<CapturedEvent> {
        self.events()
            .into_iter()
            .filter(|event| event.level == level)
            .collect()
    }

    pub fn messages(&self, level: Level) -> Vec<String> {
        self.at_level(level)
            .into_iter()
            .map(|event| event.message)
            .collect()
    }
}

#[derive(Default)]
struct FieldVisitor {
    message: String,
    fields: BTreeMap<String, String>,
}

impl Visit for FieldVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.fields.insert(field.name().to_string(), value.to_string());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        } else {
            self.fields
                .insert(field.name().to_string(), format!("{value:?}"));
        }
    }
}

impl<S: Subscriber> Layer<S> for LogCapture {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);
        self.0.lock().unwrap().push(CapturedEvent {
            level: *event.metadata().level(),
            message: visitor.message,
            fields: visitor.fields,
        });
    }
}

/// Scriptable [`CounterSource`].
///
/// Error fields hold the `Unavailable` message returned on every call.
#[derive(Debug)]
pub struct MockSource {
    /// When set, `baseline()` does not mark the source as baselined.
    pub skip_baseline: bool,
    pub baselined: bool,
    pub baseline_calls: usize,
    pub samples_started: usize,
    pub samples_ended: usize,
    pub memory: Result<MemoryInfo, String>,
    pub cpu: Result<CpuTimes, String>,
    pub cpus: Result<usize, String>,
    pub filesystems: Result<Vec<Filesystem>, String>,
    pub failing_disks: HashSet<String>,
    pub disk: DiskDelta,
    pub net: Result<Vec<NetDelta>, String>,
}

impl Default for MockSource {
    fn default() -> Self {
        Self {
            skip_baseline: false,
            baselined: false,
            baseline_calls: 0,
            samples_started: 0,
            samples_ended: 0,
            memory: Ok(MemoryInfo {
                available_kb: 42 * 1024,
                total_kb: 156 * 1024,
            }),
            cpu: Ok(CpuTimes {
                uptime_secs: 2.0,
                idle_secs: 3.0,
            }),
            cpus: Ok(2),
            filesystems: Ok(Vec::new()),
            failing_disks: HashSet::new(),
            disk: DiskDelta {
                device: String::new(),
                reads: 20,
                bytes_read: Some(20 * 512),
                writes: 10,
                bytes_written: Some(10 * 512),
                delta_time_secs: 2.0,
            },
            net: Ok(Vec::new()),
        }
    }
}

impl MockSource {
    pub fn shared(self) -> (Arc<Mutex<MockSource>>, SharedSource) {
        let mock = Arc::new(Mutex::new(self));
        let shared: SharedSource = mock.clone();
        (mock, shared)
    }

    fn require_baseline(&self) -> Result<(), SampleError> {
        if self.baselined {
            Ok(())
        } else {
            Err(SampleError::BaselineMissing)
        }
    }
}

fn scripted<T: Clone>(value: &Result<T, String>) -> Result<T, SampleError> {
    value.clone().map_err(SampleError::Unavailable)
}

impl CounterSource for MockSource {
    fn baseline(&mut self) -> Result<CpuTimes, SampleError> {
        self.baselined = !self.skip_baseline;
        self.baseline_calls += 1;
        Ok(CpuTimes::default())
    }

    fn start_sample(&mut self) {
        self.samples_started += 1;
    }

    fn end_sample(&mut self) {
        self.samples_ended += 1;
    }

    fn available_memory_kb(&mut self) -> Result<MemoryInfo, SampleError> {
        scripted(&self.memory)
    }

    fn cpu_idle_delta(&mut self) -> Result<CpuTimes, SampleError> {
        self.require_baseline()?;
        scripted(&self.cpu)
    }

    fn cpu_count(&mut self) -> Result<usize, SampleError> {
        self.require_baseline()?;
        scripted(&self.cpus)
    }

    fn filesystems(&mut self) -> Result<Vec<Filesystem>, SampleError> {
        scripted(&self.filesystems)
    }

    fn disk_stats(&mut self, device: &str) -> Result<DiskDelta, SampleError> {
        self.require_baseline()?;
        if self.failing_disks.contains(device) {
            return Err(SampleError::unavailable(format!(
                "no previous data for {device}"
            )));
        }
        Ok(DiskDelta {
            device: device.to_string(),
            ..self.disk.clone()
        })
    }

    fn net_stats(&mut self) -> Result<Vec<NetDelta>, SampleError> {
        self.require_baseline()?;
        scripted(&self.net)
    }
}

/// Callback that stores every sample it receives.
pub fn collecting_callback() -> (
    Arc<Mutex<Vec<Sample>>>,
    impl FnMut(Sample) -> anyhow::Result<()> + Send + 'static,
) {
    let samples = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&samples);
    let callback = move |sample: Sample| -> anyhow::Result<()> {
        sink.lock().unwrap().push(sample);
        Ok(())
    };
    (samples, callback)
}

pub fn filesystem(device: &str, mount_point: &str) -> Filesystem {
    Filesystem {
        device_name: device.to_string(),
        mount_point: mount_point.to_string(),
        size_bytes: 100 * 1024 * 1024,
        free_bytes: 25 * 1024 * 1024,
    }
}
