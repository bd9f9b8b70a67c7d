//! Store trait over the persisted acknowledgment state and call log.

use async_trait::async_trait;

use crate::error::StoreError;
use crate::store::record::{AckState, CallLogEntry};

/// Backend-agnostic acknowledgment store.
///
/// Every mutator is a whole-record read-modify-write executed as one critical
/// section: concurrent callers (poll loop, HTTP handlers, call timer) never
/// observe or produce a partially written record.
#[async_trait]
pub trait AlarmStore: Send + Sync {
    /// Current acknowledgment state. A store with no record reads as not acknowledged.
    async fn ack_state(&self) -> Result<AckState, StoreError>;

    async fn is_acknowledged(&self) -> Result<bool, StoreError> {
        Ok(self.ack_state().await?.acknowledged)
    }

    /// Set acknowledged and stamp `acknowledged_at`. No-op if already acknowledged.
    async fn acknowledge(&self) -> Result<AckState, StoreError>;

    /// Clear the acknowledgment and stamp `resumed_at`.
    async fn resume(&self) -> Result<AckState, StoreError>;

    /// Record a placed call, evicting the oldest entry past capacity.
    async fn append_call(&self, entry: CallLogEntry) -> Result<(), StoreError>;

    /// Most recent calls, newest first.
    async fn recent_calls(&self, limit: usize) -> Result<Vec<CallLogEntry>, StoreError>;
}
