//! Configuration types, built from environment variables.

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;

const DEFAULT_IMAP_HOST: &str = "outlook.office365.com";
const DEFAULT_IMAP_PORT: u16 = 993;
const DEFAULT_HTTP_PORT: u16 = 3000;
const DEFAULT_STOP_CODE: &str = "199";
const DEFAULT_CALL_INTERVAL_SECS: u64 = 30;
const DEFAULT_POLL_INTERVAL_SECS: u64 = 30;
const DEFAULT_DB_PATH: &str = "./data/mail-alarm.db";

/// IMAP inbox credentials. Absent when `IMAP_USER` or `IMAP_PASSWORD` is unset.
#[derive(Debug, Clone)]
pub struct ImapConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: SecretString,
}

/// Twilio account and phone numbers. Absent unless all four values are set.
#[derive(Debug, Clone)]
pub struct TwilioConfig {
    pub account_sid: String,
    pub auth_token: SecretString,
    /// Number the call is placed from.
    pub from_number: String,
    /// Number that gets called.
    pub to_number: String,
}

/// Full service configuration.
#[derive(Debug, Clone)]
pub struct AlarmConfig {
    pub imap: Option<ImapConfig>,
    pub twilio: Option<TwilioConfig>,
    /// Lowercased sender allow-list.
    pub target_senders: Vec<String>,
    pub port: u16,
    pub stop_code: String,
    pub call_interval: Duration,
    pub poll_interval: Duration,
    /// Public base URL used for voice callbacks.
    pub app_url: String,
    pub db_path: PathBuf,
    /// Directory for the rolling log file, if file logging is enabled.
    pub log_dir: Option<PathBuf>,
    /// Degraded-mode findings collected while loading.
    pub warnings: Vec<ConfigError>,
}

impl AlarmConfig {
    /// Build config from process environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary variable lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let mut warnings = Vec::new();

        let imap_user = get("IMAP_USER");
        let imap_password = get("IMAP_PASSWORD");
        if imap_user.is_none() {
            warnings.push(ConfigError::MissingEnvVar("IMAP_USER".into()));
        }
        if imap_password.is_none() {
            warnings.push(ConfigError::MissingEnvVar("IMAP_PASSWORD".into()));
        }
        let imap_port = parse_or(&get, "IMAP_PORT", DEFAULT_IMAP_PORT, &mut warnings);
        let imap = match (imap_user, imap_password) {
            (Some(username), Some(password)) => Some(ImapConfig {
                host: get("IMAP_HOST").unwrap_or_else(|| DEFAULT_IMAP_HOST.to_string()),
                port: imap_port,
                username,
                password: SecretString::from(password),
            }),
            _ => None,
        };

        let twilio_fields = [
            "TWILIO_ACCOUNT_SID",
            "TWILIO_AUTH_TOKEN",
            "TWILIO_PHONE_NUMBER",
            "YOUR_PHONE_NUMBER",
        ];
        let values: Vec<Option<String>> = twilio_fields.iter().map(|k| get(*k)).collect();
        for (key, value) in twilio_fields.iter().zip(&values) {
            if value.is_none() {
                warnings.push(ConfigError::MissingEnvVar((*key).to_string()));
            }
        }
        let twilio = match values.as_slice() {
            [Some(sid), Some(token), Some(from), Some(to)] => Some(TwilioConfig {
                account_sid: sid.clone(),
                auth_token: SecretString::from(token.clone()),
                from_number: from.clone(),
                to_number: to.clone(),
            }),
            _ => None,
        };

        let target_senders = parse_target_senders(&get("TARGET_SENDERS").unwrap_or_default());
        if target_senders.is_empty() {
            warnings.push(ConfigError::InvalidValue {
                key: "TARGET_SENDERS".into(),
                message: "no email addresses to monitor".into(),
            });
        }

        let port = parse_or(&get, "PORT", DEFAULT_HTTP_PORT, &mut warnings);
        let call_interval = interval_or(
            &get,
            "CALL_INTERVAL_SECONDS",
            DEFAULT_CALL_INTERVAL_SECS,
            &mut warnings,
        );
        let poll_interval = interval_or(
            &get,
            "POLL_INTERVAL_SECONDS",
            DEFAULT_POLL_INTERVAL_SECS,
            &mut warnings,
        );

        Self {
            imap,
            twilio,
            target_senders,
            port,
            stop_code: get("STOP_CODE").unwrap_or_else(|| DEFAULT_STOP_CODE.to_string()),
            call_interval,
            poll_interval,
            app_url: get("APP_URL")
                .map(|u| u.trim_end_matches('/').to_string())
                .unwrap_or_else(|| format!("http://localhost:{port}")),
            db_path: get("MAIL_ALARM_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DB_PATH)),
            log_dir: get("MAIL_ALARM_LOG_DIR").map(PathBuf::from),
            warnings,
        }
    }
}

impl Default for AlarmConfig {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

/// Split a comma-separated allow-list, trimming and lowercasing entries.
pub fn parse_target_senders(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}

fn parse_or<G, T>(get: &G, key: &str, default: T, warnings: &mut Vec<ConfigError>) -> T
where
    G: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match get(key) {
        None => default,
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            warnings.push(ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("cannot parse {raw:?}, using default"),
            });
            default
        }),
    }
}

fn interval_or<G>(get: &G, key: &str, default_secs: u64, warnings: &mut Vec<ConfigError>) -> Duration
where
    G: Fn(&str) -> Option<String>,
{
    let secs = parse_or(get, key, default_secs, warnings);
    if secs == 0 {
        warnings.push(ConfigError::InvalidValue {
            key: key.to_string(),
            message: "interval must be at least 1 second, using default".into(),
        });
        return Duration::from_secs(default_secs);
    }
    Duration::from_secs(secs)
}
