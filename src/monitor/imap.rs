//! IMAP message source over rustls, fetching headers only.
//!
//! Socket work is blocking and always runs inside `spawn_blocking`. Headers
//! are fetched with `BODY.PEEK` so polling never marks mail as read.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpStream;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use async_trait::async_trait;
use mail_parser::MessageParser;
use regex::Regex;
use rustls::pki_types::ServerName;
use secrecy::ExposeSecret;
use tracing::{debug, info, warn};

use crate::config::ImapConfig;
use crate::error::TransportError;
use crate::monitor::source::{InboxMessage, MessageSource};

const IO_TIMEOUT: Duration = Duration::from_secs(30);

static UID_FIELD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bUID (\d+)").expect("static regex"));
static LITERAL_SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{(\d+)\}\r?\n$").expect("static regex"));

type TlsStream = rustls::StreamOwned<rustls::ClientConnection, TcpStream>;

/// One untagged server response, with any literals it carried.
#[derive(Debug, Default)]
struct UntaggedResponse {
    text: String,
    literals: Vec<Vec<u8>>,
}

/// A logged-in IMAP session with INBOX selected.
struct ImapSession {
    stream: BufReader<TlsStream>,
    tag_counter: u32,
}

impl ImapSession {
    /// Connect, authenticate, and select INBOX.
    fn open(config: &ImapConfig) -> Result<Self, TransportError> {
        let tcp = TcpStream::connect((config.host.as_str(), config.port))?;
        tcp.set_read_timeout(Some(IO_TIMEOUT))?;
        tcp.set_write_timeout(Some(IO_TIMEOUT))?;

        let mut root_store = rustls::RootCertStore::empty();
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let tls_config = Arc::new(
            rustls::ClientConfig::builder()
                .with_root_certificates(root_store)
                .with_no_client_auth(),
        );
        let server_name = ServerName::try_from(config.host.clone()).map_err(|e| {
            TransportError::Imap {
                reason: format!("invalid host name {}: {e}", config.host),
            }
        })?;
        let conn = rustls::ClientConnection::new(tls_config, server_name).map_err(|e| {
            TransportError::Imap {
                reason: format!("TLS setup failed: {e}"),
            }
        })?;

        let mut session = Self {
            stream: BufReader::new(rustls::StreamOwned::new(conn, tcp)),
            tag_counter: 0,
        };

        let greeting = session.read_line()?;
        debug!(greeting = %greeting.trim_end(), "IMAP greeting");

        let login = format!(
            "LOGIN {} {}",
            quote(&config.username),
            quote(config.password.expose_secret())
        );
        session.command(&login).map_err(|e| match e {
            TransportError::Imap { reason } => TransportError::AuthFailed {
                service: "imap".into(),
                reason,
            },
            other => other,
        })?;
        session.command("SELECT \"INBOX\"")?;

        Ok(session)
    }

    fn read_line(&mut self) -> Result<String, TransportError> {
        let mut buf = Vec::new();
        let n = self.stream.read_until(b'\n', &mut buf)?;
        if n == 0 {
            return Err(TransportError::Disconnected {
                reason: "IMAP connection closed".into(),
            });
        }
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }

    /// Send a tagged command and collect untagged responses until the tagged status.
    fn command(&mut self, cmd: &str) -> Result<Vec<UntaggedResponse>, TransportError> {
        self.tag_counter += 1;
        let tag = format!("A{}", self.tag_counter);

        let stream = self.stream.get_mut();
        stream.write_all(format!("{tag} {cmd}\r\n").as_bytes())?;
        stream.flush()?;

        let mut responses: Vec<UntaggedResponse> = Vec::new();
        loop {
            let line = self.read_line()?;

            if let Some(status) = line.strip_prefix(tag.as_str()).filter(|s| s.starts_with(' ')) {
                let status = status.trim();
                if status.starts_with("OK") {
                    return Ok(responses);
                }
                return Err(TransportError::Imap {
                    reason: format!("{} rejected: {status}", command_name(cmd)),
                });
            }

            if line.starts_with("* ") || responses.is_empty() {
                responses.push(UntaggedResponse::default());
            }
            let Some(current) = responses.last_mut() else {
                continue;
            };
            current.text.push_str(&line);

            if let Some(len) = literal_len(&line) {
                let mut literal = vec![0u8; len];
                self.stream.read_exact(&mut literal)?;
                current.literals.push(literal);
            }
        }
    }

    fn uid_search(&mut self, criteria: &str) -> Result<Vec<u64>, TransportError> {
        let responses = self.command(&format!("UID SEARCH {criteria}"))?;
        Ok(parse_search(&responses))
    }

    fn fetch_headers(&mut self, uids: &[u64]) -> Result<Vec<InboxMessage>, TransportError> {
        if uids.is_empty() {
            return Ok(Vec::new());
        }
        let set = uids
            .iter()
            .map(u64::to_string)
            .collect::<Vec<_>>()
            .join(",");
        let responses = self.command(&format!(
            "UID FETCH {set} (UID BODY.PEEK[HEADER.FIELDS (FROM SUBJECT)])"
        ))?;

        let mut messages: Vec<InboxMessage> = responses
            .iter()
            .filter_map(|resp| {
                let uid = parse_uid(&resp.text)?;
                let header = resp.literals.first()?;
                Some(parse_header_block(uid, header))
            })
            .collect();
        messages.sort_by_key(|m| m.id);
        Ok(messages)
    }

    fn logout(mut self) {
        if let Err(e) = self.command("LOGOUT") {
            debug!(error = %e, "IMAP logout failed");
        }
    }
}

// ── Source ──────────────────────────────────────────────────────────

/// IMAP-backed message source.
pub struct ImapSource {
    config: ImapConfig,
    session: Option<ImapSession>,
}

impl ImapSource {
    pub fn new(config: ImapConfig) -> Self {
        Self {
            config,
            session: None,
        }
    }

    /// Run blocking work against the session on the blocking pool.
    ///
    /// The session is kept only if the work succeeded; any failure drops it so
    /// the next `reconnect` starts clean.
    async fn with_session<T, F>(&mut self, f: F) -> Result<T, TransportError>
    where
        F: FnOnce(&mut ImapSession) -> Result<T, TransportError> + Send + 'static,
        T: Send + 'static,
    {
        let mut session = self.session.take().ok_or_else(|| TransportError::Disconnected {
            reason: "Not connected".into(),
        })?;

        let (session, result) = tokio::task::spawn_blocking(move || {
            let result = f(&mut session);
            (session, result)
        })
        .await
        .map_err(|e| TransportError::Imap {
            reason: format!("IMAP task panicked: {e}"),
        })?;

        if result.is_ok() {
            self.session = Some(session);
        }
        result
    }

    async fn open_session(&self) -> Result<ImapSession, TransportError> {
        let config = self.config.clone();
        tokio::task::spawn_blocking(move || ImapSession::open(&config))
            .await
            .map_err(|e| TransportError::Imap {
                reason: format!("IMAP connect task panicked: {e}"),
            })?
    }
}

#[async_trait]
impl MessageSource for ImapSource {
    fn name(&self) -> &str {
        "imap"
    }

    async fn connect(&mut self) -> Result<u64, TransportError> {
        info!(host = %self.config.host, "Connecting to email server");
        self.session = Some(self.open_session().await?);

        let latest = self
            .with_session(|s| s.uid_search("ALL"))
            .await?
            .into_iter()
            .max()
            .unwrap_or(0);
        info!(host = %self.config.host, latest_uid = latest, "Connected to email server");
        Ok(latest)
    }

    async fn search(&mut self, after_id: u64) -> Result<Vec<InboxMessage>, TransportError> {
        self.with_session(move |s| {
            // `n:*` always includes the newest message, even when its UID < n.
            let uids: Vec<u64> = s
                .uid_search(&format!("UID {}:*", after_id.saturating_add(1)))?
                .into_iter()
                .filter(|uid| *uid > after_id)
                .collect();
            s.fetch_headers(&uids)
        })
        .await
    }

    async fn reconnect(&mut self) -> Result<(), TransportError> {
        if let Some(old) = self.session.take() {
            tokio::task::spawn_blocking(move || old.logout()).await.ok();
        }
        warn!(host = %self.config.host, "Reconnecting to email server");
        self.session = Some(self.open_session().await?);
        Ok(())
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

/// Quote a string as an IMAP quoted-string.
fn quote(s: &str) -> String {
    format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
}

/// First word of a command, for error messages that must not echo credentials.
fn command_name(cmd: &str) -> &str {
    cmd.split_whitespace().next().unwrap_or(cmd)
}

/// Length of a trailing `{n}` literal marker on a response line.
fn literal_len(line: &str) -> Option<usize> {
    LITERAL_SUFFIX
        .captures(line)
        .and_then(|caps| caps[1].parse().ok())
}

fn parse_search(responses: &[UntaggedResponse]) -> Vec<u64> {
    responses
        .iter()
        .filter_map(|r| r.text.strip_prefix("* SEARCH"))
        .flat_map(|rest| rest.split_whitespace())
        .filter_map(|tok| tok.parse().ok())
        .collect()
}

fn parse_uid(text: &str) -> Option<u64> {
    UID_FIELD.captures(text).and_then(|caps| caps[1].parse().ok())
}

/// Parse a `From`/`Subject` header block into a message.
fn parse_header_block(uid: u64, header: &[u8]) -> InboxMessage {
    let Some(parsed) = MessageParser::default().parse(header) else {
        return InboxMessage::new(uid, "", "(No Subject)");
    };

    let sender = parsed
        .from()
        .and_then(|addr| addr.first())
        .map(|a| match (a.name(), a.address()) {
            (Some(name), Some(address)) => format!("{name} <{address}>"),
            (None, Some(address)) => address.to_string(),
            (Some(name), None) => name.to_string(),
            (None, None) => String::new(),
        })
        .unwrap_or_default();
    let subject = parsed.subject().unwrap_or("(No Subject)").to_string();

    InboxMessage::new(uid, sender, subject)
}
