//! Repeating phone calls until someone acknowledges.

pub mod escalator;
pub mod provider;
pub mod twiml;

pub use escalator::{EpisodeInfo, EscalationConfig, Escalator, StartOutcome};
pub use provider::{CallProvider, CallRequest, TwilioProvider, UnconfiguredProvider};
