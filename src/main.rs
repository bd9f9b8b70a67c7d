use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use mail_alarm::api::{AppState, alarm_routes};
use mail_alarm::config::AlarmConfig;
use mail_alarm::escalation::{
    CallProvider, EscalationConfig, Escalator, TwilioProvider, UnconfiguredProvider,
};
use mail_alarm::gateway::AckGateway;
use mail_alarm::monitor::{Detector, ImapSource, spawn_detector};
use mail_alarm::store::{AlarmStore, LibSqlStore, MemoryStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    let config = AlarmConfig::from_env();

    // ── Tracing ──────────────────────────────────────────────────────────
    let env_filter =
        || EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let (file_layer, _log_guard) = match &config.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "mail-alarm.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_filter(env_filter());
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_filter(env_filter()),
        )
        .with(file_layer)
        .init();

    print_banner(&config);

    for warning in &config.warnings {
        tracing::warn!(%warning, "Configuration incomplete");
    }

    // ── Store ────────────────────────────────────────────────────────────
    let store: Arc<dyn AlarmStore> = match LibSqlStore::new_local(&config.db_path).await {
        Ok(store) => {
            eprintln!("   Database: {}", config.db_path.display());
            Arc::new(store)
        }
        Err(e) => {
            tracing::warn!(
                path = %config.db_path.display(),
                error = %e,
                "Failed to open database, state will not survive restarts"
            );
            Arc::new(MemoryStore::new())
        }
    };

    // ── Escalation ───────────────────────────────────────────────────────
    let gather_url = format!("{}/twilio-gather", config.app_url);
    let provider: Arc<dyn CallProvider> = match &config.twilio {
        Some(twilio) => Arc::new(TwilioProvider::new(twilio)),
        None => {
            eprintln!("⚠️  Running in demo mode (no calls will be made)");
            eprintln!("   Set the TWILIO_* variables for full functionality.\n");
            Arc::new(UnconfiguredProvider)
        }
    };
    let (to_number, from_number) = config
        .twilio
        .as_ref()
        .map(|t| (t.to_number.clone(), t.from_number.clone()))
        .unwrap_or_default();

    let escalator = Escalator::new(
        EscalationConfig {
            call_interval: config.call_interval,
            to_number,
            from_number,
            gather_url: gather_url.clone(),
            stop_code: config.stop_code.clone(),
        },
        Arc::clone(&store),
        provider,
    );

    // ── Detector ─────────────────────────────────────────────────────────
    let mut detector = Detector::new(config.target_senders.clone(), Arc::clone(&escalator));
    if let Some(imap) = &config.imap {
        detector = detector.with_source(Box::new(ImapSource::new(imap.clone())));
    }
    let detector = Arc::new(detector);

    let _detector_handle = if detector.has_source() {
        match detector.connect().await {
            Ok(_) => eprintln!("✅ Email monitoring active!"),
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    "Initial inbox connection failed, will retry on next poll"
                );
            }
        }
        Some(spawn_detector(Arc::clone(&detector), config.poll_interval))
    } else {
        eprintln!("⚠️  Email monitoring not started - check IMAP credentials");
        eprintln!("   You can still test with the /simulate-email endpoint\n");
        None
    };

    // ── HTTP ─────────────────────────────────────────────────────────────
    let gateway = Arc::new(AckGateway::new(
        Arc::clone(&store),
        Arc::clone(&escalator),
        config.stop_code.clone(),
    ));
    let app = alarm_routes(AppState {
        store,
        escalator,
        detector,
        gateway,
        gather_url,
    });

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port))
        .await
        .with_context(|| format!("Failed to bind port {}", config.port))?;
    tracing::info!(port = config.port, "HTTP server started");
    eprintln!("🚀 Server running at http://localhost:{}\n", config.port);

    axum::serve(listener, app).await.context("HTTP server error")?;
    Ok(())
}

fn print_banner(config: &AlarmConfig) {
    eprintln!("🔔 Mail Alarm v{}", env!("CARGO_PKG_VERSION"));
    eprintln!(
        "   Monitoring: {}",
        if config.target_senders.is_empty() {
            "None configured".to_string()
        } else {
            config.target_senders.join(", ")
        }
    );
    eprintln!("   Stop code: {} (phone keypad OR web)", config.stop_code);
    eprintln!(
        "   Calls go to: {}",
        config
            .twilio
            .as_ref()
            .map(|t| t.to_number.as_str())
            .unwrap_or("Not configured")
    );
    eprintln!(
        "   Call every {}s, poll every {}s",
        config.call_interval.as_secs(),
        config.poll_interval.as_secs()
    );
}
