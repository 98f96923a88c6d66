//! Error types for the Nostr layer.

use std::time::Duration;

use thiserror::Error;

/// Errors raised by an event network client.
#[derive(Debug, Error)]
pub enum NostrError {
    /// Could not reach any relay.
    #[error("connection failed: {0}")]
    Connection(String),

    /// WebSocket error on an open connection.
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A relay answered with a message we could not interpret.
    #[error("invalid relay message: {0}")]
    InvalidMessage(String),

    /// A relay closed the subscription.
    #[error("subscription {id} closed by relay: {reason}")]
    Closed { id: String, reason: String },

    /// A point fetch did not resolve in time.
    #[error("fetch timed out after {0:?}")]
    Timeout(Duration),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_keeps_full_duration() {
        let err = NostrError::Timeout(Duration::MAX);
        assert!(matches!(err, NostrError::Timeout(d) if d == Duration::MAX));
        assert_eq!(
            NostrError::Timeout(Duration::from_millis(1500)).to_string(),
            "fetch timed out after 1.5s"
        );
    }
}
