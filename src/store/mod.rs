//! Persistence for the acknowledgment state and call log.

pub mod libsql_backend;
pub mod memory;
pub mod migrations;
pub mod record;
pub mod traits;

pub use libsql_backend::LibSqlStore;
pub use memory::MemoryStore;
pub use record::{AckState, AlarmRecord, CALL_LOG_CAPACITY, CallLogEntry};
pub use traits::AlarmStore;
