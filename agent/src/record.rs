use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

/// Origin stamped on every record and prefixed to every tag key.
pub const ORIGIN: &str = "vm.azm.ms";

/// One polling tick's output, in collection order.
pub type Sample = Vec<MetricRecord>;

/// Origin-qualified tag key, e.g. `vm.azm.ms/mountId`.
pub fn tag_key(name: &str) -> String {
    format!("{ORIGIN}/{name}")
}

/// Builder for a record's tag map.
#[derive(Debug, Clone, Default)]
pub struct Tags(Map<String, Value>);

impl Tags {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `value` under the origin-qualified `name`.
    pub fn with(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.0.insert(tag_key(name), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(&tag_key(name))
    }

    /// Wire form: a JSON object serialized to a string.
    pub fn to_json_string(&self) -> String {
        Value::Object(self.0.clone()).to_string()
    }
}

/// A single metric value in the upload schema.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct MetricRecord {
    pub origin: &'static str,
    pub collection_time: DateTime<Utc>,
    pub namespace: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub computer: Option<String>,
    pub value: f64,
    pub tags: String,
}

impl MetricRecord {
    pub fn new(
        namespace: &str,
        name: &str,
        value: f64,
        tags: &Tags,
        computer: Option<&str>,
        collection_time: DateTime<Utc>,
    ) -> Self {
        Self {
            origin: ORIGIN,
            collection_time,
            namespace: namespace.to_string(),
            name: name.to_string(),
            computer: computer.map(str::to_string),
            value,
            tags: tags.to_json_string(),
        }
    }

    /// Parsed tag map, for inspecting records after formatting.
    pub fn tags(&self) -> serde_json::Result<Map<String, Value>> {
        serde_json::from_str(&self.tags)
    }

    pub fn is(&self, namespace: &str, name: &str) -> bool {
        self.namespace == namespace && self.name == name
    }
}
