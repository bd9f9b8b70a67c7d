//! Anything that can list messages newer than an id.

use async_trait::async_trait;

use crate::error::TransportError;

/// A message header as seen by the detector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboxMessage {
    /// Monotonic id within the mailbox (IMAP UID).
    pub id: u64,
    /// Raw `From` header value, e.g. `Boss <boss@corp.com>`.
    pub sender: String,
    pub subject: String,
}

impl InboxMessage {
    pub fn new(id: u64, sender: impl Into<String>, subject: impl Into<String>) -> Self {
        Self {
            id,
            sender: sender.into(),
            subject: subject.into(),
        }
    }
}

/// Inbox-like source polled by the detector.
#[async_trait]
pub trait MessageSource: Send {
    /// Source name for logs.
    fn name(&self) -> &str;

    /// Establish the connection and return the highest id currently present
    /// (0 for an empty mailbox).
    async fn connect(&mut self) -> Result<u64, TransportError>;

    /// Messages with `id > after_id`, ascending by id.
    async fn search(&mut self, after_id: u64) -> Result<Vec<InboxMessage>, TransportError>;

    /// Drop the current connection and open a fresh one.
    async fn reconnect(&mut self) -> Result<(), TransportError>;
}
