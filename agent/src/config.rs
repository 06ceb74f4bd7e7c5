use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::collectors::DataCollector;
use crate::engine::Configuration;

/// Agent configuration loaded from a TOML file or defaults.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AgentConfig {
    /// Seconds between samples.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Computer name stamped on every record. Defaults to the host name.
    #[serde(default = "default_computer")]
    pub computer: Option<String>,

    /// Prefix for every `/proc`, `/sys` and tool path, e.g. a mounted host root.
    #[serde(default = "default_root_dir")]
    pub root_dir: PathBuf,

    /// Tag samples are emitted under.
    #[serde(default = "default_tag")]
    pub tag: String,
}

fn default_poll_interval() -> u64 {
    60
}

fn default_computer() -> Option<String> {
    sysinfo::System::host_name()
}

fn default_root_dir() -> PathBuf {
    PathBuf::from("/")
}

fn default_tag() -> String {
    "insights.metrics".to_string()
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            computer: default_computer(),
            root_dir: default_root_dir(),
            tag: default_tag(),
        }
    }
}

impl AgentConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let config: AgentConfig = toml::de::from_str(&contents)
            .with_context(|| format!("parsing {}", path.display()))?;
        Ok(config)
    }

    /// Load `path` if it exists, otherwise fall back to defaults.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            Self::from_file(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Engine configuration backed by a [`DataCollector`] rooted at `root_dir`.
    pub fn engine_configuration(&self) -> Result<Configuration> {
        let mut config = Configuration::for_source(DataCollector::new(&self.root_dir));
        config.set_poll_interval(Duration::from_secs(self.poll_interval_secs))?;
        config.set_computer(self.computer.clone());
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AgentConfig::default();
        assert_eq!(config.poll_interval_secs, 60);
        assert_eq!(config.root_dir, PathBuf::from("/"));
        assert_eq!(config.tag, "insights.metrics");
    }

    #[test]
    fn test_from_file_fills_missing_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "poll_interval_secs = 5\ncomputer = \"vm-17\"\n").unwrap();

        let config = AgentConfig::from_file(&path).unwrap();
        assert_eq!(config.poll_interval_secs, 5);
        assert_eq!(config.computer.as_deref(), Some("vm-17"));
        assert_eq!(config.root_dir, PathBuf::from("/"));
        assert_eq!(config.tag, "insights.metrics");
    }

    #[test]
    fn test_from_file_rejects_bad_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "poll_interval_secs = \"soon\"\n").unwrap();
        assert!(AgentConfig::from_file(&path).is_err());
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = AgentConfig::load_or_default(dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, AgentConfig::default());
    }

    #[test]
    fn test_engine_configuration() {
        let config = AgentConfig {
            poll_interval_secs: 2,
            computer: Some("vm-17".to_string()),
            ..AgentConfig::default()
        };
        let engine = config.engine_configuration().unwrap();
        assert_eq!(engine.poll_interval(), Duration::from_secs(2));
        assert_eq!(engine.computer(), Some("vm-17"));
    }

    #[test]
    fn test_engine_configuration_rejects_zero_interval() {
        let config = AgentConfig {
            poll_interval_secs: 0,
            ..AgentConfig::default()
        };
        assert!(config.engine_configuration().is_err());
    }
}
