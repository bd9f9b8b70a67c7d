//! In-process store, used when the database cannot be opened and in tests.
//!
//! State is lost on restart.

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;

use crate::error::StoreError;
use crate::store::record::{AckState, AlarmRecord, CallLogEntry};
use crate::store::traits::AlarmStore;

#[derive(Default)]
pub struct MemoryStore {
    record: Mutex<AlarmRecord>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_record<T>(&self, f: impl FnOnce(&mut AlarmRecord) -> T) -> T {
        // Record mutators never leave partial state, so a poisoned lock is still usable.
        let mut record = self.record.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut record)
    }
}

#[async_trait]
impl AlarmStore for MemoryStore {
    async fn ack_state(&self) -> Result<AckState, StoreError> {
        Ok(self.with_record(|r| r.state.clone()))
    }

    async fn acknowledge(&self) -> Result<AckState, StoreError> {
        Ok(self.with_record(|r| {
            r.acknowledge(Utc::now());
            r.state.clone()
        }))
    }

    async fn resume(&self) -> Result<AckState, StoreError> {
        Ok(self.with_record(|r| {
            r.resume(Utc::now());
            r.state.clone()
        }))
    }

    async fn append_call(&self, entry: CallLogEntry) -> Result<(), StoreError> {
        self.with_record(|r| r.push_call(entry));
        Ok(())
    }

    async fn recent_calls(&self, limit: usize) -> Result<Vec<CallLogEntry>, StoreError> {
        Ok(self.with_record(|r| r.recent_calls(limit)))
    }
}
