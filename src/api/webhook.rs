//! Mailbox change notifications pushed by the mail provider.
//!
//! A subscription handshake arrives as `?validationToken=...` and must be
//! echoed back verbatim. Real notifications carry a `value` array of change
//! descriptors; only `created` ones matter.

use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, error, info};

use crate::error::ValidationError;
use crate::monitor::{Detector, Dispatch};

#[derive(Debug, Deserialize)]
struct NotificationBatch {
    #[serde(default)]
    value: Vec<ChangeNotification>,
}

/// One change descriptor.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeNotification {
    #[serde(default)]
    pub change_type: String,
    #[serde(default)]
    pub resource: String,
    pub resource_data: Option<ResourceData>,
}

/// Inline message fields, present when the subscription includes resource data.
#[derive(Debug, Clone, Deserialize)]
pub struct ResourceData {
    pub from: Option<String>,
    pub subject: Option<String>,
}

impl ChangeNotification {
    pub fn is_created(&self) -> bool {
        self.change_type.eq_ignore_ascii_case("created")
    }

    /// Sender and subject if the descriptor carries them inline.
    fn inline_message(&self) -> Option<(&str, &str)> {
        let data = self.resource_data.as_ref()?;
        let from = data.from.as_deref().filter(|f| !f.trim().is_empty())?;
        Some((from, data.subject.as_deref().unwrap_or("(No Subject)")))
    }
}

/// Parse a notification body.
pub fn parse_notifications(body: &[u8]) -> Result<Vec<ChangeNotification>, ValidationError> {
    serde_json::from_slice::<NotificationBatch>(body)
        .map(|batch| batch.value)
        .map_err(|e| ValidationError::MalformedPayload(e.to_string()))
}

/// Route `created` notifications to the detector. Returns how many were forwarded.
///
/// Descriptors with inline sender data are evaluated directly. The rest only
/// say "something arrived", so they request a single poll between them.
pub async fn forward(detector: &Arc<Detector>, notifications: &[ChangeNotification]) -> usize {
    let mut forwarded = 0;
    let mut poll_requested = false;

    for notification in notifications.iter().filter(|n| n.is_created()) {
        forwarded += 1;
        match notification.inline_message() {
            Some((from, subject)) => match detector.evaluate(from, subject).await {
                Ok(Dispatch::Escalated { sender, .. }) => {
                    info!(sender = %sender, "Escalated from push notification");
                }
                Ok(_) => {}
                Err(e) => error!(error = %e, "Failed to evaluate pushed email"),
            },
            None => {
                debug!(resource = %notification.resource, "New email notification");
                if !poll_requested {
                    detector.request_poll();
                    poll_requested = true;
                }
            }
        }
    }

    forwarded
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    use super::*;
    use crate::escalation::{EscalationConfig, Escalator};
    use crate::monitor::InboxMessage;
    use crate::store::MemoryStore;
    use crate::testing::{FakeProvider, ScriptedSource};

    fn detector_with_inbox(source: ScriptedSource, provider: Arc<FakeProvider>) -> Arc<Detector> {
        let config = EscalationConfig {
            call_interval: Duration::from_secs(30),
            to_number: "+15552223333".into(),
            from_number: "+15550001111".into(),
            gather_url: "http://localhost:3000/twilio-gather".into(),
            stop_code: "199".into(),
        };
        let escalator = Escalator::new(config, Arc::new(MemoryStore::new()), provider);
        Arc::new(
            Detector::new(vec!["boss@corp.com".into()], escalator).with_source(Box::new(source)),
        )
    }

    #[tokio::test]
    async fn descriptors_without_data_share_one_poll() {
        let (source, log) = ScriptedSource::new(5);
        let source = source.then(Ok(vec![InboxMessage::new(
            6,
            "Boss <boss@corp.com>",
            "Urgent",
        )]));
        let provider = FakeProvider::new();
        let detector = detector_with_inbox(source, provider.clone());
        detector.connect().await.unwrap();

        let body = br#"{
            "value": [
                {"changeType": "created", "resource": "Users/me/Messages/AAA"},
                {"changeType": "created", "resource": "Users/me/Messages/BBB"}
            ]
        }"#;
        let notifications = parse_notifications(body).unwrap();
        assert_eq!(forward(&detector, &notifications).await, 2);

        tokio::time::timeout(Duration::from_secs(5), async {
            while provider.call_count() == 0 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("background poll never escalated");
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }

        assert_eq!(*log.searched_after.lock().unwrap(), vec![5]);
        assert_eq!(log.connects.load(Ordering::SeqCst), 1);
        assert_eq!(provider.call_count(), 1);
        assert_eq!(detector.watermark(), 6);
    }

    #[test]
    fn parses_descriptors() {
        let body = br#"{
            "value": [
                {"changeType": "created", "resource": "Users/me/Messages/AAA"},
                {"changeType": "updated", "resource": "Users/me/Messages/BBB"},
                {
                    "changeType": "created",
                    "resource": "Users/me/Messages/CCC",
                    "resourceData": {"from": "Boss <boss@corp.com>", "subject": "Urgent"}
                }
            ]
        }"#;
        let notifications = parse_notifications(body).unwrap();
        assert_eq!(notifications.len(), 3);
        assert!(notifications[0].is_created());
        assert!(!notifications[1].is_created());
        assert!(notifications[0].inline_message().is_none());
        assert_eq!(
            notifications[2].inline_message(),
            Some(("Boss <boss@corp.com>", "Urgent"))
        );
    }

    #[test]
    fn missing_value_is_empty() {
        assert!(parse_notifications(b"{}").unwrap().is_empty());
    }

    #[test]
    fn malformed_body_is_rejected() {
        let err = parse_notifications(b"not json").unwrap_err();
        assert!(matches!(err, ValidationError::MalformedPayload(_)));
    }

    #[test]
    fn blank_inline_sender_is_not_inline() {
        let body = br#"{"value": [{"changeType": "created", "resource": "x", "resourceData": {"from": "  "}}]}"#;
        let notifications = parse_notifications(body).unwrap();
        assert!(notifications[0].inline_message().is_none());
    }
}
