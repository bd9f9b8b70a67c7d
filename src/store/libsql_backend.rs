//! libSQL implementation of `AlarmStore`.
//!
//! The whole record lives as one JSON document in a single-row table. A
//! store-wide mutex plus an explicit transaction turns every operation into
//! one read-modify-write critical section.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use libsql::{Connection, Database as LibSqlDatabase, params};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::StoreError;
use crate::store::migrations;
use crate::store::record::{AckState, AlarmRecord, CallLogEntry};
use crate::store::traits::AlarmStore;

/// libSQL-backed acknowledgment store.
pub struct LibSqlStore {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    /// Scoped to the whole store: held for read and write as one unit.
    conn: Mutex<Connection>,
}

impl LibSqlStore {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Open(format!("Failed to create store directory: {e}")))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| StoreError::Open(format!("Failed to open libSQL database: {e}")))?;

        let store = Self::from_database(db).await?;
        info!(path = %path.display(), "Store opened");
        Ok(store)
    }

    /// Create an in-memory store (for tests and demo runs).
    pub async fn new_memory() -> Result<Self, StoreError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| StoreError::Open(format!("Failed to create in-memory database: {e}")))?;

        Self::from_database(db).await
    }

    async fn from_database(db: LibSqlDatabase) -> Result<Self, StoreError> {
        let conn = db
            .connect()
            .map_err(|e| StoreError::Open(format!("Failed to create connection: {e}")))?;
        migrations::run_migrations(&conn).await?;

        Ok(Self {
            db: Arc::new(db),
            conn: Mutex::new(conn),
        })
    }

    /// Read the record under the lock without writing.
    async fn read<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&AlarmRecord) -> T,
    {
        let conn = self.conn.lock().await;
        let record = read_record(&conn).await?;
        Ok(f(&record))
    }

    /// Full-record read-modify-write in one transaction.
    ///
    /// The record is only written back if `f` changed it. Any failure rolls
    /// back, leaving the previously committed record intact.
    async fn mutate<T, F>(&self, op: &'static str, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut AlarmRecord) -> T,
    {
        let conn = self.conn.lock().await;

        conn.execute("BEGIN IMMEDIATE", ())
            .await
            .map_err(|e| StoreError::Query(format!("{op}: begin: {e}")))?;

        let result = async {
            let mut record = read_record(&conn).await?;
            let before = record.clone();
            let out = f(&mut record);
            if record != before {
                write_record(&conn, &record).await?;
            }
            Ok::<_, StoreError>(out)
        }
        .await;

        match result {
            Ok(out) => match conn.execute("COMMIT", ()).await {
                Ok(_) => {
                    debug!(op, "Store record committed");
                    Ok(out)
                }
                Err(e) => {
                    rollback(&conn, op).await;
                    Err(StoreError::Query(format!("{op}: commit: {e}")))
                }
            },
            Err(e) => {
                rollback(&conn, op).await;
                Err(e)
            }
        }
    }
}

async fn rollback(conn: &Connection, op: &str) {
    if let Err(e) = conn.execute("ROLLBACK", ()).await {
        warn!(op, error = %e, "Store rollback failed");
    }
}

async fn read_record(conn: &Connection) -> Result<AlarmRecord, StoreError> {
    let mut rows = conn
        .query("SELECT record FROM alarm_state WHERE id = 1", ())
        .await
        .map_err(|e| StoreError::Query(format!("read_record: {e}")))?;

    match rows.next().await {
        Ok(Some(row)) => {
            let json: String = row
                .get(0)
                .map_err(|e| StoreError::Query(format!("read_record row: {e}")))?;
            serde_json::from_str(&json)
                .map_err(|e| StoreError::Serialization(format!("read_record: {e}")))
        }
        Ok(None) => Ok(AlarmRecord::default()),
        Err(e) => Err(StoreError::Query(format!("read_record: {e}"))),
    }
}

async fn write_record(conn: &Connection, record: &AlarmRecord) -> Result<(), StoreError> {
    let json = serde_json::to_string(record)
        .map_err(|e| StoreError::Serialization(format!("write_record: {e}")))?;

    conn.execute(
        "INSERT INTO alarm_state (id, record, updated_at) VALUES (1, ?1, ?2)
         ON CONFLICT(id) DO UPDATE SET record = excluded.record, updated_at = excluded.updated_at",
        params![json, Utc::now().to_rfc3339()],
    )
    .await
    .map_err(|e| StoreError::Query(format!("write_record: {e}")))?;
    Ok(())
}

#[async_trait]
impl AlarmStore for LibSqlStore {
    async fn ack_state(&self) -> Result<AckState, StoreError> {
        self.read(|record| record.state.clone()).await
    }

    async fn acknowledge(&self) -> Result<AckState, StoreError> {
        let state = self
            .mutate("acknowledge", |record| {
                record.acknowledge(Utc::now());
                record.state.clone()
            })
            .await?;
        info!(acknowledged_at = ?state.acknowledged_at, "Notifications stopped");
        Ok(state)
    }

    async fn resume(&self) -> Result<AckState, StoreError> {
        let state = self
            .mutate("resume", |record| {
                record.resume(Utc::now());
                record.state.clone()
            })
            .await?;
        info!("Notifications enabled");
        Ok(state)
    }

    async fn append_call(&self, entry: CallLogEntry) -> Result<(), StoreError> {
        self.mutate("append_call", |record| record.push_call(entry))
            .await
    }

    async fn recent_calls(&self, limit: usize) -> Result<Vec<CallLogEntry>, StoreError> {
        self.read(|record| record.recent_calls(limit)).await
    }
}
