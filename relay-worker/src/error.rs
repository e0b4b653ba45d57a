//! Error types for the relay pipeline.
//!
//! Ingress-side errors are mapped to HTTP status codes by the web handlers.
//! Consumer-side errors are only ever logged; the relay loop never stops
//! because of a single entry.

use thiserror::Error;

use crate::queue::QueueError;

/// Errors raised while moving a webhook from ingress to the relay target.
#[derive(Debug, Error)]
pub enum RelayError {
    /// The claimed signature did not match the body.
    #[error("authentication failed")]
    Authentication,

    /// The queue service rejected or failed the submit.
    #[error("failed to enqueue webhook: {0}")]
    Enqueue(#[source] QueueError),

    /// The envelope could not be encoded for the queue.
    #[error("failed to serialize envelope: {0}")]
    Serialize(String),

    /// A queue entry body is not a valid envelope.
    #[error("failed to deserialize envelope: {0}")]
    Deserialize(#[from] serde_json::Error),

    /// The relay target could not be reached.
    #[error("failed to relay webhook: {0}")]
    RelayTransport(#[from] reqwest::Error),

    /// The relay target answered with a non-success status.
    #[error("relay target responded with status {status}: {body}")]
    RelayStatus { status: u16, body: String },

    /// The queue entry could not be deleted.
    #[error("failed to delete queue entry: {0}")]
    Delete(#[source] QueueError),
}

impl RelayError {
    /// Short machine-readable kind, used as a log field.
    pub fn kind(&self) -> &'static str {
        match self {
            RelayError::Authentication => "authentication",
            RelayError::Enqueue(_) => "enqueue",
            RelayError::Serialize(_) => "serialize",
            RelayError::Deserialize(_) => "deserialize",
            RelayError::RelayTransport(_) => "relay_transport",
            RelayError::RelayStatus { .. } => "relay_status",
            RelayError::Delete(_) => "delete",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_error_includes_body() {
        let err = RelayError::RelayStatus {
            status: 500,
            body: "bad request".to_string(),
        };
        let message = err.to_string();
        assert!(message.contains("500"));
        assert!(message.contains("bad request"));
        assert_eq!(err.kind(), "relay_status");
    }

    #[test]
    fn test_enqueue_error_keeps_source() {
        use std::error::Error as _;

        let err = RelayError::Enqueue(QueueError::Send("queue unavailable".to_string()));
        assert!(err.source().is_some());
        assert!(err.to_string().contains("queue unavailable"));
    }
}
