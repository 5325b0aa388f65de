// src/error.rs
//! Error classes shared by adapters, writer, orchestrator and scheduler.
//!
//! Two families matter to callers: configuration errors fail fast before any
//! network call, everything else is an upstream/runtime failure recorded on
//! the run that hit it.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    /// Caller/source configuration problem (wrong protocol, missing key,
    /// disabled source, rejected write).
    #[error("configuration error: {0}")]
    Config(String),

    /// Transport failure after the retry budget was spent.
    #[error("http request to {url} failed: {message}")]
    Http { url: String, message: String },

    /// Upstream answered with a non-2xx status.
    #[error("http status {status} from {url}")]
    Status { url: String, status: u16 },

    /// The fetched document could not be understood at all.
    #[error("malformed {what}: {message}")]
    Malformed { what: String, message: String },

    #[error("storage error: {0}")]
    Storage(String),
}

impl IngestError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn malformed(what: impl Into<String>, message: impl ToString) -> Self {
        Self::Malformed {
            what: what.into(),
            message: message.to_string(),
        }
    }

    /// Stable class name recorded on failed runs.
    pub fn class(&self) -> &'static str {
        match self {
            IngestError::Config(_) => "ConfigurationError",
            IngestError::Http { .. } => "HttpError",
            IngestError::Status { .. } => "HttpStatusError",
            IngestError::Malformed { .. } => "MalformedFeedError",
            IngestError::Storage(_) => "StorageError",
        }
    }

    pub fn is_config(&self) -> bool {
        matches!(self, IngestError::Config(_))
    }
}

pub type IngestResult<T> = std::result::Result<T, IngestError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn class_names_are_stable() {
        assert_eq!(IngestError::config("x").class(), "ConfigurationError");
        let e = IngestError::Status {
            url: "https://x.test".into(),
            status: 503,
        };
        assert_eq!(e.class(), "HttpStatusError");
        assert_eq!(e.to_string(), "http status 503 from https://x.test");
        assert!(!e.is_config());
    }
}
