use std::path::PathBuf;
use std::time::Duration;

/// Errors returned by a [`CounterSource`](crate::collectors::CounterSource).
///
/// Only [`SampleError::Unavailable`] is a recoverable, category-scoped
/// condition. `Io` means the source itself could not be read and
/// `BaselineMissing` is a call-sequencing bug.
#[derive(Debug, thiserror::Error)]
pub enum SampleError {
    /// The data for one metric category could not be produced this time.
    #[error("{0}")]
    Unavailable(String),

    /// A pseudo-file could not be opened or read.
    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A sampling method was called before `baseline()`.
    #[error("baseline has not been called")]
    BaselineMissing,
}

impl SampleError {
    pub fn unavailable(msg: impl Into<String>) -> Self {
        SampleError::Unavailable(msg.into())
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, SampleError::Unavailable(_))
    }
}

/// Errors returned when starting a polling engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("already started")]
    AlreadyRunning,

    #[error("polling requires a tokio runtime: {0}")]
    NoRuntime(#[from] tokio::runtime::TryCurrentError),
}

/// Errors returned when setting engine configuration values.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("poll interval must be a whole number of seconds, at least 1 (got {0:?})")]
    InvalidPollInterval(Duration),
}
