//! HTTP endpoints: stop-code page, status, phone keypad callback, notifications.

use std::sync::Arc;

use axum::{
    Form, Json, Router,
    body::Bytes,
    extract::{Query, State},
    http::{StatusCode, header},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};

use super::webhook;
use crate::error::ValidationError;
use crate::escalation::{Escalator, StartOutcome, twiml};
use crate::gateway::{AckChannel, AckGateway, AckOutcome, parse_code};
use crate::monitor::Detector;
use crate::store::{AlarmStore, CALL_LOG_CAPACITY};

const INDEX_HTML: &str = include_str!("../../static/index.html");
const DEFAULT_LOG_LIMIT: usize = 20;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn AlarmStore>,
    pub escalator: Arc<Escalator>,
    pub detector: Arc<Detector>,
    pub gateway: Arc<AckGateway>,
    /// Absolute URL of the keypad callback, embedded in voice scripts.
    pub gather_url: String,
}

/// Build the router with every alarm endpoint.
pub fn alarm_routes(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .route("/stop", post(stop))
        .route("/start", post(start))
        .route("/status", get(status))
        .route("/logs", get(logs))
        .route("/twilio-gather", post(twilio_gather))
        .route("/webhook", post(notification_webhook))
        .route("/simulate-email", post(simulate_email))
        .route("/test-call", post(test_call))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn ok_message(message: &str) -> Response {
    Json(json!({ "ok": true, "message": message })).into_response()
}

fn fail_message(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "ok": false, "message": message }))).into_response()
}

fn store_failure(e: impl std::fmt::Display) -> Response {
    error!(error = %e, "Store operation failed");
    fail_message(
        StatusCode::INTERNAL_SERVER_ERROR,
        "Could not update alarm state. Try again.",
    )
}

// ── Page + health ──────────────────────────────────────────────────────

async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": "mail-alarm"
    }))
}

// ── Acknowledgment ─────────────────────────────────────────────────────

async fn stop(State(state): State<AppState>, body: Bytes) -> Response {
    let code = match serde_json::from_slice::<serde_json::Value>(&body) {
        Ok(value) => parse_code(value.get("code")),
        Err(e) => Err(ValidationError::MalformedPayload(e.to_string())),
    };
    let code = match code {
        Ok(code) => code,
        Err(e) => {
            warn!(error = %e, "Rejected stop request");
            return fail_message(StatusCode::BAD_REQUEST, &e.to_string());
        }
    };

    match state.gateway.submit(&code, AckChannel::Web).await {
        Ok(AckOutcome::Accepted) => {
            ok_message("Notifications stopped successfully! Calls will stop.")
        }
        Ok(AckOutcome::Rejected) => fail_message(StatusCode::BAD_REQUEST, "Invalid stop code."),
        Err(e) => store_failure(e),
    }
}

async fn start(State(state): State<AppState>) -> Response {
    match state.gateway.resume().await {
        Ok(_) => ok_message(
            "Notifications enabled. You will receive calls for new important emails.",
        ),
        Err(e) => store_failure(e),
    }
}

// ── Status + logs ──────────────────────────────────────────────────────

async fn status(State(state): State<AppState>) -> Response {
    let ack = match state.store.ack_state().await {
        Ok(ack) => ack,
        Err(e) => return store_failure(e),
    };
    let episode = state.escalator.current_episode().await;

    Json(json!({
        "acknowledged": ack.acknowledged,
        "episode_active": episode.is_some(),
        "acknowledged_at": ack.acknowledged_at,
        "resumed_at": ack.resumed_at,
        "allow_list": state.detector.allow_list(),
        "episode": episode,
    }))
    .into_response()
}

#[derive(Debug, Deserialize)]
struct LogsQuery {
    limit: Option<usize>,
}

async fn logs(State(state): State<AppState>, Query(query): Query<LogsQuery>) -> Response {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_LOG_LIMIT)
        .min(CALL_LOG_CAPACITY);
    match state.store.recent_calls(limit).await {
        Ok(logs) => Json(json!({ "logs": logs })).into_response(),
        Err(e) => store_failure(e),
    }
}

// ── Phone keypad ───────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct GatherForm {
    #[serde(rename = "Digits")]
    digits: Option<String>,
}

async fn twilio_gather(State(state): State<AppState>, Form(form): Form<GatherForm>) -> Response {
    let stop_code = state.gateway.stop_code().to_string();
    info!(digits = ?form.digits, "Phone keypad input received");

    let body = match form.digits.as_deref() {
        None | Some("") => {
            twiml::retry_response(&state.gather_url, &stop_code, "No input received.")
        }
        Some(digits) => match state.gateway.submit(digits, AckChannel::Phone).await {
            Ok(AckOutcome::Accepted) => twiml::accepted_response(),
            Ok(AckOutcome::Rejected) => {
                twiml::retry_response(&state.gather_url, &stop_code, "Invalid code.")
            }
            Err(e) => {
                error!(error = %e, "Failed to record phone acknowledgment");
                twiml::retry_response(
                    &state.gather_url,
                    &stop_code,
                    "Something went wrong. Please try again.",
                )
            }
        },
    };

    ([(header::CONTENT_TYPE, "text/xml")], body).into_response()
}

// ── Push notifications ─────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct WebhookQuery {
    #[serde(rename = "validationToken")]
    validation_token: Option<String>,
}

async fn notification_webhook(
    State(state): State<AppState>,
    Query(query): Query<WebhookQuery>,
    body: Bytes,
) -> Response {
    if let Some(token) = query.validation_token {
        info!("Webhook subscription validated");
        return (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain")],
            token,
        )
            .into_response();
    }

    let notifications = match webhook::parse_notifications(&body) {
        Ok(notifications) => notifications,
        Err(e) => {
            warn!(error = %e, "Rejected webhook notification");
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "received": false, "error": e.to_string() })),
            )
                .into_response();
        }
    };

    info!(count = notifications.len(), "Webhook notification received");
    let forwarded = webhook::forward(&state.detector, &notifications).await;

    (
        StatusCode::ACCEPTED,
        Json(json!({ "received": true, "forwarded": forwarded })),
    )
        .into_response()
}

// ── Operator tools ─────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct SimulatedEmail {
    from: Option<String>,
    subject: Option<String>,
}

async fn simulate_email(State(state): State<AppState>, body: Bytes) -> Response {
    let email = serde_json::from_slice::<SimulatedEmail>(&body).ok();
    let fields = email.and_then(|e| {
        let from = e.from.filter(|f| !f.trim().is_empty())?;
        let subject = e.subject.filter(|s| !s.trim().is_empty())?;
        Some((from, subject))
    });
    let Some((from, subject)) = fields else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "Missing required fields: from, subject" })),
        )
            .into_response();
    };

    info!(from = %from, subject = %subject, "Simulating email");
    match state.detector.evaluate(&from, &subject).await {
        Ok(dispatch) => {
            let mut body = json!({
                "action": dispatch.action(),
                "sender": dispatch.sender(),
            });
            if let Some(reason) = dispatch.reason() {
                body["reason"] = json!(reason);
            } else {
                body["subject"] = json!(subject);
            }
            Json(body).into_response()
        }
        Err(e) => store_failure(e),
    }
}

async fn test_call(State(state): State<AppState>) -> Response {
    match state.escalator.start("test@example.com", "Test Call").await {
        Ok(StartOutcome::Suppressed) => Json(json!({
            "ok": false,
            "message": "Notifications are stopped. Enable them first with /start"
        }))
        .into_response(),
        Ok(StartOutcome::Started { .. }) => {
            let code = state.gateway.stop_code();
            ok_message(&format!(
                "Test call loop started. Press {code} on phone OR enter {code} on web page to stop."
            ))
        }
        Err(e) => store_failure(e),
    }
}
