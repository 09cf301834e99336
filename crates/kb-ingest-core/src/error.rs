//! Error taxonomy for the ingestion pipeline.
//!
//! | Variant | Scope of failure |
//! |---------|------------------|
//! | [`IngestError::Configuration`] | Fatal: aborts the run before any fetch |
//! | [`IngestError::AdapterFetch`] | Aborts one source for this run |
//! | [`IngestError::MalformedUnit`] | Skips one unit or page |
//! | [`IngestError::StoreWrite`] | Skips one article write after retries |
//! | [`IngestError::Summarizer`] | Never fatal; caller falls back |

use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Fetch from {source_name} failed: {message}")]
    AdapterFetch {
        source_name: String,
        message: String,
    },

    #[error("Malformed unit {source_id}: {reason}")]
    MalformedUnit { source_id: String, reason: String },

    #[error("Store write for {article} failed: {message}")]
    StoreWrite { article: String, message: String },

    #[error("Summarizer error: {0}")]
    Summarizer(String),
}

impl IngestError {
    /// Whether this error must stop the whole run.
    pub fn is_fatal(&self) -> bool {
        matches!(self, IngestError::Configuration(_))
    }
}

pub type IngestResult<T> = std::result::Result<T, IngestError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_configuration_is_fatal() {
        assert!(IngestError::Configuration("missing token".into()).is_fatal());
        assert!(!IngestError::MalformedUnit {
            source_id: "1".into(),
            reason: "empty".into()
        }
        .is_fatal());
        assert!(!IngestError::Summarizer("timeout".into()).is_fatal());
    }

    #[test]
    fn display_names_source() {
        let err = IngestError::AdapterFetch {
            source_name: "chat".into(),
            message: "invalid_auth".into(),
        };
        assert_eq!(err.to_string(), "Fetch from chat failed: invalid_auth");
    }
}
