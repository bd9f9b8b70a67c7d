//! Stop code check shared by the web page and the phone keypad.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::error::{StoreError, ValidationError};
use crate::escalation::Escalator;
use crate::store::{AckState, AlarmStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AckOutcome {
    Accepted,
    Rejected,
}

/// Where a stop code was entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckChannel {
    Web,
    Phone,
}

impl fmt::Display for AckChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AckChannel::Web => write!(f, "web"),
            AckChannel::Phone => write!(f, "phone"),
        }
    }
}

/// Compare a submitted code against the configured one. Exact match only.
pub fn attempt_ack(submitted: &str, expected: &str) -> AckOutcome {
    if submitted == expected {
        AckOutcome::Accepted
    } else {
        AckOutcome::Rejected
    }
}

/// Extract a stop code from a JSON body field.
///
/// Strings are taken verbatim and numbers by their decimal text, so `199`
/// and `"199"` are the same code.
pub fn parse_code(value: Option<&serde_json::Value>) -> Result<String, ValidationError> {
    match value {
        None | Some(serde_json::Value::Null) => Err(ValidationError::MissingField("code".into())),
        Some(serde_json::Value::String(s)) if s.is_empty() => Err(ValidationError::EmptyCode),
        Some(serde_json::Value::String(s)) => Ok(s.clone()),
        Some(serde_json::Value::Number(n)) => Ok(n.to_string()),
        Some(_) => Err(ValidationError::MalformedCode),
    }
}

pub struct AckGateway {
    store: Arc<dyn AlarmStore>,
    escalator: Arc<Escalator>,
    stop_code: String,
}

impl AckGateway {
    pub fn new(
        store: Arc<dyn AlarmStore>,
        escalator: Arc<Escalator>,
        stop_code: impl Into<String>,
    ) -> Self {
        Self {
            store,
            escalator,
            stop_code: stop_code.into(),
        }
    }

    pub fn stop_code(&self) -> &str {
        &self.stop_code
    }

    /// Check `code` and, if it matches, acknowledge and end the running episode.
    ///
    /// The flag is persisted before the episode is cancelled, so even if the
    /// cancel were lost the next tick would see the acknowledgment.
    pub async fn submit(&self, code: &str, via: AckChannel) -> Result<AckOutcome, StoreError> {
        match attempt_ack(code, &self.stop_code) {
            AckOutcome::Accepted => {
                self.store.acknowledge().await?;
                let was_active = self.escalator.stop().await;
                info!(via = %via, was_active, "Stop code accepted, notifications stopped");
                Ok(AckOutcome::Accepted)
            }
            AckOutcome::Rejected => {
                warn!(via = %via, "Invalid stop code");
                Ok(AckOutcome::Rejected)
            }
        }
    }

    /// Clear the acknowledgment so future matches escalate again.
    pub async fn resume(&self) -> Result<AckState, StoreError> {
        let state = self.store.resume().await?;
        info!("Notifications re-enabled");
        Ok(state)
    }
}
