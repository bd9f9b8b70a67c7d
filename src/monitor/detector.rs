//! Detector: watches the inbox for new messages from watched senders.
//!
//! Messages are identified by a monotonic id. The watermark starts at the
//! highest id present when the inbox first connects, so mail that was already
//! there never triggers a call. Each message above the watermark is handled
//! at most once, and polls never overlap.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::error::{StoreError, TransportError};
use crate::escalation::{Escalator, StartOutcome};
use crate::monitor::matcher::{is_target, normalize_sender};
use crate::monitor::source::MessageSource;

/// What happened to one evaluated message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// Sender is not on the allow-list.
    Ignored { sender: String },
    /// Sender matched but notifications are acknowledged.
    Suppressed { sender: String },
    /// An escalation episode was started.
    Escalated {
        sender: String,
        subject: String,
        superseded: bool,
    },
}

impl Dispatch {
    /// Short action label for operator-facing responses.
    pub fn action(&self) -> &'static str {
        match self {
            Dispatch::Ignored { .. } => "ignored",
            Dispatch::Suppressed { .. } => "skipped",
            Dispatch::Escalated { .. } => "calling",
        }
    }

    pub fn reason(&self) -> Option<&'static str> {
        match self {
            Dispatch::Ignored { .. } => Some("not_target_sender"),
            Dispatch::Suppressed { .. } => Some("notifications_stopped"),
            Dispatch::Escalated { .. } => None,
        }
    }

    pub fn sender(&self) -> &str {
        match self {
            Dispatch::Ignored { sender }
            | Dispatch::Suppressed { sender }
            | Dispatch::Escalated { sender, .. } => sender,
        }
    }
}

/// Result of one poll cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// Another poll was still running.
    Skipped,
    Completed { evaluated: usize, escalated: usize },
}

pub struct Detector {
    source: Option<Mutex<Box<dyn MessageSource>>>,
    watermark: AtomicU64,
    seeded: AtomicBool,
    allow_list: Vec<String>,
    escalator: Arc<Escalator>,
}

impl Detector {
    /// A detector without an inbox; only pushed messages are evaluated.
    pub fn new(allow_list: Vec<String>, escalator: Arc<Escalator>) -> Self {
        Self {
            source: None,
            watermark: AtomicU64::new(0),
            seeded: AtomicBool::new(false),
            allow_list,
            escalator,
        }
    }

    pub fn with_source(mut self, source: Box<dyn MessageSource>) -> Self {
        self.source = Some(Mutex::new(source));
        self
    }

    pub fn has_source(&self) -> bool {
        self.source.is_some()
    }

    /// Highest message id already handled.
    pub fn watermark(&self) -> u64 {
        self.watermark.load(Ordering::SeqCst)
    }

    pub fn allow_list(&self) -> &[String] {
        &self.allow_list
    }

    fn not_configured() -> TransportError {
        TransportError::NotConfigured {
            service: "Inbox".into(),
        }
    }

    /// Connect to the inbox and seed the watermark on first success.
    pub async fn connect(&self) -> Result<u64, TransportError> {
        let source = self.source.as_ref().ok_or_else(Self::not_configured)?;
        let mut source = source.lock().await;
        self.connect_locked(&mut source).await
    }

    async fn connect_locked(
        &self,
        source: &mut Box<dyn MessageSource>,
    ) -> Result<u64, TransportError> {
        let latest = source.connect().await?;
        if !self.seeded.swap(true, Ordering::SeqCst) {
            self.watermark.fetch_max(latest, Ordering::SeqCst);
            info!(
                source = source.name(),
                watermark = latest,
                "Watching for new emails"
            );
        }
        Ok(latest)
    }

    /// Run one poll cycle.
    ///
    /// Returns `Skipped` without touching the inbox if a previous cycle is
    /// still in flight. Transport failures trigger one reconnect attempt and
    /// are returned; the next cycle retries.
    pub async fn poll(&self) -> Result<PollOutcome, TransportError> {
        let source = self.source.as_ref().ok_or_else(Self::not_configured)?;
        let Ok(mut source) = source.try_lock() else {
            debug!("Previous poll still running, skipping");
            return Ok(PollOutcome::Skipped);
        };

        if !self.seeded.load(Ordering::SeqCst) {
            self.connect_locked(&mut source).await?;
            return Ok(PollOutcome::Completed {
                evaluated: 0,
                escalated: 0,
            });
        }

        let after = self.watermark();
        let messages = match source.search(after).await {
            Ok(messages) => messages,
            Err(e) => {
                if e.needs_reconnect()
                    && let Err(re) = source.reconnect().await
                {
                    warn!(error = %re, "Reconnect failed, will retry next cycle");
                }
                return Err(e);
            }
        };

        // The source guard is held until every message is dispatched.
        let mut evaluated = 0;
        let mut escalated = 0;
        for message in messages {
            // Advance before acting so a message is never handled twice.
            let previous = self.watermark.fetch_max(message.id, Ordering::SeqCst);
            if message.id <= previous {
                continue;
            }
            evaluated += 1;
            debug!(id = message.id, sender = %message.sender, "New email");

            match self.evaluate(&message.sender, &message.subject).await {
                Ok(Dispatch::Escalated { .. }) => escalated += 1,
                Ok(_) => {}
                Err(e) => error!(id = message.id, error = %e, "Failed to evaluate email"),
            }
        }

        drop(source);
        Ok(PollOutcome::Completed {
            evaluated,
            escalated,
        })
    }

    /// Match one message against the allow-list and escalate if it hits.
    pub async fn evaluate(&self, raw_sender: &str, subject: &str) -> Result<Dispatch, StoreError> {
        let sender = normalize_sender(raw_sender);
        if !is_target(&sender, raw_sender, &self.allow_list) {
            return Ok(Dispatch::Ignored { sender });
        }

        info!(sender = %sender, subject = %subject, "Important email detected");
        match self.escalator.start(&sender, subject).await? {
            StartOutcome::Suppressed => Ok(Dispatch::Suppressed { sender }),
            StartOutcome::Started { superseded, .. } => Ok(Dispatch::Escalated {
                sender,
                subject: subject.to_string(),
                superseded,
            }),
        }
    }

    /// Run a poll in the background, e.g. after a push notification.
    pub fn request_poll(self: &Arc<Self>) {
        if !self.has_source() {
            return;
        }
        let detector = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = detector.poll().await {
                warn!(error = %e, "Triggered poll failed");
            }
        });
    }
}

/// Spawn the polling loop. The returned flag stops it after the current cycle.
pub fn spawn_detector(
    detector: Arc<Detector>,
    interval: Duration,
) -> (JoinHandle<()>, Arc<AtomicBool>) {
    let shutdown = Arc::new(AtomicBool::new(false));
    let stop = Arc::clone(&shutdown);

    let handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            if stop.load(Ordering::SeqCst) {
                info!("Detector shutting down");
                return;
            }
            match detector.poll().await {
                Ok(PollOutcome::Completed { evaluated, escalated }) if evaluated > 0 => {
                    info!(evaluated, escalated, "Poll complete");
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "Poll failed"),
            }
        }
    });

    (handle, shutdown)
}
