//! Test doubles shared by unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::Semaphore;

use crate::error::{StoreError, TransportError};
use crate::escalation::{CallProvider, CallRequest};
use crate::monitor::{InboxMessage, MessageSource};
use crate::store::{AckState, AlarmStore, CallLogEntry, MemoryStore};

/// Pause point for a test double. Open unless `hold()` was called.
#[derive(Default)]
pub struct Gate {
    held: Mutex<Option<Arc<Semaphore>>>,
    entered: AtomicUsize,
}

impl Gate {
    /// Make every later `pass()` wait until `release()`.
    pub fn hold(&self) {
        *self.held.lock().unwrap() = Some(Arc::new(Semaphore::new(0)));
    }

    pub fn release(&self) {
        if let Some(semaphore) = self.held.lock().unwrap().take() {
            semaphore.close();
        }
    }

    /// How many callers reached the gate.
    pub fn entered(&self) -> usize {
        self.entered.load(Ordering::SeqCst)
    }

    pub async fn pass(&self) {
        self.entered.fetch_add(1, Ordering::SeqCst);
        let held = self.held.lock().unwrap().clone();
        if let Some(semaphore) = held {
            // Closing the semaphore is the release signal.
            let _ = semaphore.acquire().await;
        }
    }

    /// Yield until at least `n` callers are parked at (or past) the gate.
    pub async fn wait_entered(&self, n: usize) {
        while self.entered() < n {
            tokio::task::yield_now().await;
        }
    }
}

/// Records every call request; optionally fails them all.
#[derive(Default)]
pub struct FakeProvider {
    /// Passed at the start of every call attempt.
    pub gate: Gate,
    requests: Mutex<Vec<CallRequest>>,
    attempts: AtomicUsize,
    failing: AtomicBool,
}

impl FakeProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing() -> Arc<Self> {
        let provider = Self::default();
        provider.failing.store(true, Ordering::SeqCst);
        Arc::new(provider)
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Attempts, successful or not.
    pub fn call_count(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<CallRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl CallProvider for FakeProvider {
    fn name(&self) -> &str {
        "fake"
    }

    async fn place_call(&self, request: &CallRequest) -> Result<String, TransportError> {
        let n = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        self.gate.pass().await;
        if self.failing.load(Ordering::SeqCst) {
            return Err(TransportError::CallProvider {
                provider: "fake".into(),
                reason: "scripted failure".into(),
            });
        }
        self.requests.lock().unwrap().push(request.clone());
        Ok(format!("CA{n}"))
    }
}

/// In-memory store whose acknowledgment reads pass through a gate.
#[derive(Default)]
pub struct GatedStore {
    pub gate: Gate,
    inner: MemoryStore,
}

#[async_trait]
impl AlarmStore for GatedStore {
    async fn ack_state(&self) -> Result<AckState, StoreError> {
        self.gate.pass().await;
        self.inner.ack_state().await
    }

    async fn acknowledge(&self) -> Result<AckState, StoreError> {
        self.inner.acknowledge().await
    }

    async fn resume(&self) -> Result<AckState, StoreError> {
        self.inner.resume().await
    }

    async fn append_call(&self, entry: CallLogEntry) -> Result<(), StoreError> {
        self.inner.append_call(entry).await
    }

    async fn recent_calls(&self, limit: usize) -> Result<Vec<CallLogEntry>, StoreError> {
        self.inner.recent_calls(limit).await
    }
}

/// Shared view into a [`ScriptedSource`] after it has been boxed.
#[derive(Default)]
pub struct SourceLog {
    pub connects: AtomicUsize,
    pub reconnects: AtomicUsize,
    pub searched_after: Mutex<Vec<u64>>,
}

/// Message source that replays queued search results.
pub struct ScriptedSource {
    latest_id: u64,
    connect_error: Option<TransportError>,
    results: VecDeque<Result<Vec<InboxMessage>, TransportError>>,
    log: Arc<SourceLog>,
}

impl ScriptedSource {
    pub fn new(latest_id: u64) -> (Self, Arc<SourceLog>) {
        let log = Arc::new(SourceLog::default());
        let source = Self {
            latest_id,
            connect_error: None,
            results: VecDeque::new(),
            log: Arc::clone(&log),
        };
        (source, log)
    }

    pub fn failing_connect(mut self, error: TransportError) -> Self {
        self.connect_error = Some(error);
        self
    }

    pub fn then(mut self, result: Result<Vec<InboxMessage>, TransportError>) -> Self {
        self.results.push_back(result);
        self
    }
}

#[async_trait]
impl MessageSource for ScriptedSource {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn connect(&mut self) -> Result<u64, TransportError> {
        self.log.connects.fetch_add(1, Ordering::SeqCst);
        match self.connect_error.take() {
            Some(e) => Err(e),
            None => Ok(self.latest_id),
        }
    }

    async fn search(&mut self, after_id: u64) -> Result<Vec<InboxMessage>, TransportError> {
        self.log.searched_after.lock().unwrap().push(after_id);
        self.results.pop_front().unwrap_or_else(|| Ok(Vec::new()))
    }

    async fn reconnect(&mut self) -> Result<(), TransportError> {
        self.log.reconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
