//! Outbound call providers.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::debug;

use crate::config::TwilioConfig;
use crate::error::TransportError;

const TWILIO_API_BASE: &str = "https://api.twilio.com";

/// A single outbound call to place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallRequest {
    /// Number that gets called.
    pub to: String,
    /// Caller id.
    pub from: String,
    /// Voice markup executed when the call is answered.
    pub voice_script: String,
}

/// Something that can place a phone call and return its id.
///
/// A returned id means the call was requested, nothing more.
#[async_trait]
pub trait CallProvider: Send + Sync {
    /// Provider name for logs.
    fn name(&self) -> &str;

    async fn place_call(&self, request: &CallRequest) -> Result<String, TransportError>;
}

// ── Twilio ──────────────────────────────────────────────────────────

/// Twilio Programmable Voice via the REST Calls resource.
pub struct TwilioProvider {
    account_sid: String,
    auth_token: SecretString,
    base_url: String,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct TwilioCall {
    sid: String,
}

impl TwilioProvider {
    pub fn new(config: &TwilioConfig) -> Self {
        Self {
            account_sid: config.account_sid.clone(),
            auth_token: config.auth_token.clone(),
            base_url: TWILIO_API_BASE.to_string(),
            client: reqwest::Client::new(),
        }
    }

    /// Point the provider at a different API host.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn calls_url(&self) -> String {
        format!(
            "{}/2010-04-01/Accounts/{}/Calls.json",
            self.base_url, self.account_sid
        )
    }

    fn error(&self, reason: impl Into<String>) -> TransportError {
        TransportError::CallProvider {
            provider: self.name().to_string(),
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl CallProvider for TwilioProvider {
    fn name(&self) -> &str {
        "twilio"
    }

    async fn place_call(&self, request: &CallRequest) -> Result<String, TransportError> {
        let form = [
            ("To", request.to.as_str()),
            ("From", request.from.as_str()),
            ("Twiml", request.voice_script.as_str()),
        ];

        let resp = self
            .client
            .post(self.calls_url())
            .basic_auth(&self.account_sid, Some(self.auth_token.expose_secret()))
            .form(&form)
            .send()
            .await
            .map_err(|e| self.error(format!("request failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(self.error(format!("HTTP {status}: {body}")));
        }

        let call: TwilioCall = resp
            .json()
            .await
            .map_err(|e| self.error(format!("invalid response: {e}")))?;
        debug!(call_id = %call.sid, "Twilio accepted call");
        Ok(call.sid)
    }
}

// ── Unconfigured ────────────────────────────────────────────────────

/// Stand-in used when call credentials are missing; every attempt fails.
pub struct UnconfiguredProvider;

#[async_trait]
impl CallProvider for UnconfiguredProvider {
    fn name(&self) -> &str {
        "unconfigured"
    }

    async fn place_call(&self, _request: &CallRequest) -> Result<String, TransportError> {
        Err(TransportError::NotConfigured {
            service: "Call provider".into(),
        })
    }
}
