//! Error types for Mail Alarm.

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

/// Configuration-related errors.
///
/// Surfaced at startup as degraded-mode warnings; the affected subsystem is
/// disabled rather than the process exiting.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Acknowledgment store errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Failed to open store: {0}")]
    Open(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Network-facing failures: inbox unreachable, call provider unreachable.
///
/// Always recoverable; the next scheduled cycle retries.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("IMAP error: {reason}")]
    Imap { reason: String },

    #[error("Inbox disconnected: {reason}")]
    Disconnected { reason: String },

    #[error("Authentication failed for {service}: {reason}")]
    AuthFailed { service: String, reason: String },

    #[error("Call provider {provider} failed: {reason}")]
    CallProvider { provider: String, reason: String },

    #[error("{service} is not configured")]
    NotConfigured { service: String },

    #[error("HTTP error: {0}")]
    Http(String),
}

impl TransportError {
    /// Whether the inbox connection should be re-established before the next poll.
    pub fn needs_reconnect(&self) -> bool {
        matches!(
            self,
            TransportError::Disconnected { .. }
                | TransportError::Imap { .. }
                | TransportError::AuthFailed { .. }
        )
    }
}

impl From<std::io::Error> for TransportError {
    fn from(e: std::io::Error) -> Self {
        TransportError::Disconnected {
            reason: e.to_string(),
        }
    }
}

/// Malformed operator or provider input. Rejected locally, no state change.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("Missing required fields: {0}")]
    MissingField(String),

    #[error("Stop code is empty")]
    EmptyCode,

    #[error("Stop code must be a string or number")]
    MalformedCode,

    #[error("Malformed notification payload: {0}")]
    MalformedPayload(String),
}

/// Result type alias for Mail Alarm.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dropped_connections_need_reconnect() {
        let err = TransportError::Disconnected {
            reason: "Connection ended".into(),
        };
        assert!(err.needs_reconnect());

        let io: TransportError =
            std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset").into();
        assert!(io.needs_reconnect());
    }

    #[test]
    fn provider_failures_do_not_touch_the_inbox() {
        let err = TransportError::CallProvider {
            provider: "twilio".into(),
            reason: "503".into(),
        };
        assert!(!err.needs_reconnect());
    }

    #[test]
    fn validation_messages_are_user_readable() {
        let err = ValidationError::MissingField("from, subject".into());
        assert_eq!(err.to_string(), "Missing required fields: from, subject");
    }
}
