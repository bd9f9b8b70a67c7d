//! The repeating-call state machine.
//!
//! At most one episode is active. An episode places one call immediately and
//! then one call per tick until it is stopped, acknowledged, or superseded by
//! a newer trigger. Every tick re-reads the acknowledgment state first, so an
//! acknowledgment that races the timer still ends the episode on the next tick.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{error, info, warn};

use crate::error::StoreError;
use crate::escalation::provider::{CallProvider, CallRequest};
use crate::escalation::twiml;
use crate::store::{AlarmStore, CallLogEntry};

/// Call settings for escalation episodes.
#[derive(Debug, Clone)]
pub struct EscalationConfig {
    /// Time between repeat calls.
    pub call_interval: Duration,
    /// Number that gets called.
    pub to_number: String,
    /// Caller id.
    pub from_number: String,
    /// Where keypad digits are posted during a call.
    pub gather_url: String,
    pub stop_code: String,
}

/// Public view of the running episode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EpisodeInfo {
    pub generation: u64,
    pub sender_address: String,
    pub subject: String,
    pub started_at: DateTime<Utc>,
}

/// Result of a `start()` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// Notifications are acknowledged; the trigger was dropped.
    Suppressed,
    Started { generation: u64, superseded: bool },
}

struct Episode {
    info: EpisodeInfo,
    timer: JoinHandle<()>,
}

enum EscalationState {
    Idle,
    Active(Episode),
}

/// Owns the single escalation episode.
pub struct Escalator {
    config: EscalationConfig,
    store: Arc<dyn AlarmStore>,
    provider: Arc<dyn CallProvider>,
    state: Mutex<EscalationState>,
    generation: AtomicU64,
}

impl Escalator {
    pub fn new(
        config: EscalationConfig,
        store: Arc<dyn AlarmStore>,
        provider: Arc<dyn CallProvider>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            store,
            provider,
            state: Mutex::new(EscalationState::Idle),
            generation: AtomicU64::new(0),
        })
    }

    /// Start an episode for `sender_address`, replacing any running one.
    ///
    /// Dropped if notifications are currently acknowledged. The acknowledgment
    /// check and the episode install happen under the state lock, so a
    /// concurrent `stop()` either sees the new episode or runs before it exists.
    /// The immediate call is skipped if the episode was stopped or replaced
    /// before it could be placed.
    pub async fn start(
        self: &Arc<Self>,
        sender_address: &str,
        subject: &str,
    ) -> Result<StartOutcome, StoreError> {
        let (info, superseded) = {
            let mut state = self.state.lock().await;

            if self.store.is_acknowledged().await? {
                info!(sender = %sender_address, "Notifications stopped - skipping call");
                return Ok(StartOutcome::Suppressed);
            }

            let superseded = match std::mem::replace(&mut *state, EscalationState::Idle) {
                EscalationState::Active(old) => {
                    old.timer.abort();
                    info!(
                        generation = old.info.generation,
                        sender = %old.info.sender_address,
                        "Superseding running call loop"
                    );
                    true
                }
                EscalationState::Idle => false,
            };

            let info = EpisodeInfo {
                generation: self.generation.fetch_add(1, Ordering::SeqCst) + 1,
                sender_address: sender_address.to_string(),
                subject: subject.to_string(),
                started_at: Utc::now(),
            };
            let timer = self.spawn_timer(info.clone());
            *state = EscalationState::Active(Episode {
                info: info.clone(),
                timer,
            });
            (info, superseded)
        };

        info!(
            generation = info.generation,
            sender = %info.sender_address,
            interval_secs = self.config.call_interval.as_secs(),
            "Starting call loop"
        );
        if self.is_current(info.generation).await {
            self.attempt_call(&info).await;
        } else {
            info!(
                generation = info.generation,
                "Call loop ended before first call"
            );
        }

        Ok(StartOutcome::Started {
            generation: info.generation,
            superseded,
        })
    }

    /// Cancel the running episode. Returns whether one was active.
    ///
    /// A call already handed to the provider is not recalled.
    pub async fn stop(&self) -> bool {
        let mut state = self.state.lock().await;
        match std::mem::replace(&mut *state, EscalationState::Idle) {
            EscalationState::Active(episode) => {
                episode.timer.abort();
                info!(generation = episode.info.generation, "Call loop cleared");
                true
            }
            EscalationState::Idle => false,
        }
    }

    pub async fn is_active(&self) -> bool {
        matches!(*self.state.lock().await, EscalationState::Active(_))
    }

    pub async fn current_episode(&self) -> Option<EpisodeInfo> {
        match &*self.state.lock().await {
            EscalationState::Active(episode) => Some(episode.info.clone()),
            EscalationState::Idle => None,
        }
    }

    /// Place one call for `episode` and log it on success.
    ///
    /// Provider failures are logged and swallowed; the episode keeps ticking.
    pub async fn attempt_call(&self, episode: &EpisodeInfo) -> Option<String> {
        let request = CallRequest {
            to: self.config.to_number.clone(),
            from: self.config.from_number.clone(),
            voice_script: twiml::call_script(
                &episode.sender_address,
                &episode.subject,
                &self.config.gather_url,
                &self.config.stop_code,
            ),
        };

        match self.provider.place_call(&request).await {
            Ok(call_id) => {
                info!(
                    call_id = %call_id,
                    generation = episode.generation,
                    "Call initiated"
                );
                let entry =
                    CallLogEntry::new(&episode.sender_address, &episode.subject, &call_id);
                if let Err(e) = self.store.append_call(entry).await {
                    error!(call_id = %call_id, error = %e, "Failed to record call");
                }
                Some(call_id)
            }
            Err(e) => {
                warn!(
                    provider = self.provider.name(),
                    generation = episode.generation,
                    error = %e,
                    "Failed to make call"
                );
                None
            }
        }
    }

    fn spawn_timer(self: &Arc<Self>, episode: EpisodeInfo) -> JoinHandle<()> {
        let escalator: Weak<Self> = Arc::downgrade(self);
        let period = self.config.call_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                let Some(escalator) = escalator.upgrade() else {
                    return;
                };
                if !escalator.on_tick(&episode).await {
                    return;
                }
            }
        })
    }

    /// Handle one timer fire. Returns whether the timer should keep running.
    async fn on_tick(self: &Arc<Self>, episode: &EpisodeInfo) -> bool {
        if !self.is_current(episode.generation).await {
            return false;
        }

        match self.store.is_acknowledged().await {
            Ok(true) => {
                self.finish(episode.generation).await;
                info!(generation = episode.generation, "Call loop stopped by user");
                return false;
            }
            Ok(false) => {}
            Err(e) => {
                warn!(error = %e, "Could not read acknowledgment state, calling anyway");
            }
        }

        // Not awaited: a slow provider must not delay later ticks.
        let escalator = Arc::clone(self);
        let episode = episode.clone();
        tokio::spawn(async move {
            escalator.attempt_call(&episode).await;
        });
        true
    }

    async fn is_current(&self, generation: u64) -> bool {
        match &*self.state.lock().await {
            EscalationState::Active(episode) => episode.info.generation == generation,
            EscalationState::Idle => false,
        }
    }

    /// Return to idle if `generation` is still the running episode.
    async fn finish(&self, generation: u64) {
        let mut state = self.state.lock().await;
        if let EscalationState::Active(episode) = &*state
            && episode.info.generation == generation
        {
            *state = EscalationState::Idle;
        }
    }
}
