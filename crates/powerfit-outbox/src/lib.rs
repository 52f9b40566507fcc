//! # PowerFit Outbox
//!
//! Durable local storage for the offline shell.
//!
//! - [`Outbox`]: the pending-submission queue. Contact-form submissions that could not
//!   be delivered are appended here and drained in one batch by background sync.
//! - [`PageStorage`]: the page's own key/value area (install banner flags and the
//!   inquiry archive). It lives in its own table and is never drained.
//!
//! Draining is at-most-once: records returned by [`Outbox::drain_all`] are already
//! gone from the store, so a consumer that fails halfway loses the rest.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

mod page;
mod schema;

pub use page::{Inquiry, PageStorage, APP_INSTALLED, GYM_INQUIRIES, INSTALL_DISMISSED};

// ==================== Errors ====================

/// Storage errors.
#[derive(Error, Debug)]
pub enum OutboxError {
    #[error("Storage unavailable: {0}")]
    Unavailable(#[from] rusqlite::Error),

    #[error("Storage lock poisoned")]
    LockPoisoned,

    #[error("Unsupported schema: {0}")]
    Schema(String),

    #[error("Corrupt record {id}: {reason}")]
    Corrupt { id: i64, reason: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

// ==================== Records ====================

/// A form submission waiting for delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingSubmission {
    pub fields: BTreeMap<String, String>,
    pub submitted_at: DateTime<Utc>,
}

impl PendingSubmission {
    /// Create a record stamped with the current time.
    pub fn new(fields: BTreeMap<String, String>) -> Self {
        Self {
            fields,
            submitted_at: Utc::now(),
        }
    }

    /// Build a record from `(name, value)` pairs.
    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self::new(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

fn decode_row(
    id: i64,
    fields: &str,
    submitted_at: &str,
) -> Result<PendingSubmission, OutboxError> {
    let fields = serde_json::from_str(fields).map_err(|e| OutboxError::Corrupt {
        id,
        reason: e.to_string(),
    })?;
    let submitted_at = DateTime::parse_from_rfc3339(submitted_at)
        .map_err(|e| OutboxError::Corrupt {
            id,
            reason: e.to_string(),
        })?
        .with_timezone(&Utc);
    Ok(PendingSubmission {
        fields,
        submitted_at,
    })
}

// ==================== Outbox ====================

/// Durable FIFO of pending submissions.
pub struct Outbox {
    conn: Mutex<Connection>,
}

impl Outbox {
    /// Open the outbox stored at `path`.
    pub fn open(path: &Path) -> Result<Self, OutboxError> {
        Ok(Self {
            conn: Mutex::new(schema::open_database(path)?),
        })
    }

    /// Open a non-persistent outbox.
    pub fn open_in_memory() -> Result<Self, OutboxError> {
        Ok(Self {
            conn: Mutex::new(schema::open_in_memory()?),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, OutboxError> {
        self.conn.lock().map_err(|_| OutboxError::LockPoisoned)
    }

    /// Append a record; returns its sequence number.
    pub fn append(&self, record: &PendingSubmission) -> Result<i64, OutboxError> {
        let fields = serde_json::to_string(&record.fields)?;
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO pending_submissions (fields, submitted_at) VALUES (?, ?)",
            params![fields, record.submitted_at.to_rfc3339()],
        )?;
        let id = conn.last_insert_rowid();
        debug!(id, "Queued pending submission");
        Ok(id)
    }

    /// Take every record in insertion order and clear the store.
    ///
    /// Read and delete happen in one transaction; a corrupt row aborts the drain and
    /// leaves the store untouched.
    pub fn drain_all(&self) -> Result<Vec<PendingSubmission>, OutboxError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let records = {
            let mut stmt = tx.prepare(
                "SELECT id, fields, submitted_at FROM pending_submissions ORDER BY id",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?;

            let mut records = Vec::new();
            for row in rows {
                let (id, fields, submitted_at) = row?;
                records.push(decode_row(id, &fields, &submitted_at)?);
            }
            records
        };

        tx.execute("DELETE FROM pending_submissions", [])?;
        tx.commit()?;

        if !records.is_empty() {
            info!(count = records.len(), "Drained pending submissions");
        }
        Ok(records)
    }

    /// Read every record without removing anything.
    pub fn peek_all(&self) -> Result<Vec<PendingSubmission>, OutboxError> {
        let conn = self.lock()?;
        let mut stmt =
            conn.prepare("SELECT id, fields, submitted_at FROM pending_submissions ORDER BY id")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;

        let records = rows
            .map(|row| {
                let (id, fields, submitted_at) = row?;
                decode_row(id, &fields, &submitted_at)
            })
            .collect();
        records
    }

    /// Number of queued records.
    pub fn len(&self) -> Result<usize, OutboxError> {
        let conn = self.lock()?;
        let count: i64 =
            conn.query_row("SELECT COUNT(*) FROM pending_submissions", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    pub fn is_empty(&self) -> Result<bool, OutboxError> {
        Ok(self.len()? == 0)
    }
}
