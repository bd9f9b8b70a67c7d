//! The persisted alarm record: acknowledgment state plus the bounded call log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Maximum number of call-log entries kept; older entries are evicted.
pub const CALL_LOG_CAPACITY: usize = 100;

/// Acknowledgment state. `acknowledged_at` is set iff `acknowledged` is true.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AckState {
    pub acknowledged: bool,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub resumed_at: Option<DateTime<Utc>>,
}

/// One outbound call that the provider accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallLogEntry {
    pub sender_address: String,
    pub subject: String,
    pub call_id: String,
    pub called_at: DateTime<Utc>,
}

impl CallLogEntry {
    pub fn new(
        sender_address: impl Into<String>,
        subject: impl Into<String>,
        call_id: impl Into<String>,
    ) -> Self {
        Self {
            sender_address: sender_address.into(),
            subject: subject.into(),
            call_id: call_id.into(),
            called_at: Utc::now(),
        }
    }
}

/// The whole persisted record. Always read and written as one unit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlarmRecord {
    #[serde(flatten)]
    pub state: AckState,
    /// Newest first.
    #[serde(default)]
    pub call_log: Vec<CallLogEntry>,
}

impl AlarmRecord {
    /// Mark acknowledged. A record that is already acknowledged is left as is.
    pub fn acknowledge(&mut self, now: DateTime<Utc>) {
        if self.state.acknowledged {
            return;
        }
        self.state.acknowledged = true;
        self.state.acknowledged_at = Some(now);
    }

    /// Re-enable escalation.
    pub fn resume(&mut self, now: DateTime<Utc>) {
        self.state.acknowledged = false;
        self.state.acknowledged_at = None;
        self.state.resumed_at = Some(now);
    }

    /// Insert at the front, evicting the oldest entries past capacity.
    pub fn push_call(&mut self, entry: CallLogEntry) {
        self.call_log.insert(0, entry);
        self.call_log.truncate(CALL_LOG_CAPACITY);
    }

    pub fn recent_calls(&self, limit: usize) -> Vec<CallLogEntry> {
        self.call_log.iter().take(limit).cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    fn entry(n: usize) -> CallLogEntry {
        CallLogEntry::new("boss@corp.com", format!("Urgent #{n}"), format!("CA{n}"))
    }

    #[test]
    fn new_record_is_not_acknowledged() {
        let record = AlarmRecord::default();
        assert!(!record.state.acknowledged);
        assert!(record.state.acknowledged_at.is_none());
        assert!(record.call_log.is_empty());
    }

    #[test]
    fn acknowledge_is_idempotent() {
        let mut record = AlarmRecord::default();
        let first = Utc::now();
        record.acknowledge(first);
        let once = record.clone();

        record.acknowledge(first + Duration::seconds(30));
        assert_eq!(record, once);
        assert_eq!(record.state.acknowledged_at, Some(first));
    }

    #[test]
    fn resume_clears_acknowledged_at() {
        let mut record = AlarmRecord::default();
        let now = Utc::now();
        record.acknowledge(now);
        record.resume(now + Duration::seconds(5));

        assert!(!record.state.acknowledged);
        assert!(record.state.acknowledged_at.is_none());
        assert_eq!(record.state.resumed_at, Some(now + Duration::seconds(5)));
    }

    #[test]
    fn last_transition_wins() {
        let mut record = AlarmRecord::default();
        let now = Utc::now();
        let ops = [true, true, false, true, false, false, true];
        for ack in ops {
            if ack {
                record.acknowledge(now);
            } else {
                record.resume(now);
            }
            assert_eq!(record.state.acknowledged, ack);
            assert_eq!(record.state.acknowledged_at.is_some(), ack);
        }
    }

    #[test]
    fn call_log_is_newest_first_and_bounded() {
        let mut record = AlarmRecord::default();
        for n in 0..CALL_LOG_CAPACITY + 7 {
            record.push_call(entry(n));
        }

        assert_eq!(record.call_log.len(), CALL_LOG_CAPACITY);
        assert_eq!(record.call_log[0].call_id, format!("CA{}", CALL_LOG_CAPACITY + 6));
        // The seven oldest were evicted.
        assert_eq!(record.call_log.last().unwrap().call_id, "CA7");
    }

    #[test]
    fn recent_calls_respects_limit() {
        let mut record = AlarmRecord::default();
        for n in 0..5 {
            record.push_call(entry(n));
        }
        let recent = record.recent_calls(2);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].call_id, "CA4");
        assert_eq!(record.recent_calls(50).len(), 5);
    }

    #[test]
    fn record_json_layout_is_flat() {
        let mut record = AlarmRecord::default();
        record.acknowledge(Utc::now());
        record.push_call(entry(1));

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["acknowledged"], true);
        assert!(json["acknowledged_at"].is_string());
        assert!(json["resumed_at"].is_null());
        assert_eq!(json["call_log"][0]["call_id"], "CA1");
    }

    #[test]
    fn record_deserializes_without_call_log() {
        let record: AlarmRecord = serde_json::from_str(
            r#"{"acknowledged": false, "acknowledged_at": null, "resumed_at": null}"#,
        )
        .unwrap();
        assert!(record.call_log.is_empty());
    }
}
