//! Inbox monitoring. Polls the mailbox and hands matches to the escalator.

pub mod detector;
pub mod imap;
pub mod matcher;
pub mod source;

pub use detector::{Detector, Dispatch, PollOutcome, spawn_detector};
pub use imap::ImapSource;
pub use source::{InboxMessage, MessageSource};
