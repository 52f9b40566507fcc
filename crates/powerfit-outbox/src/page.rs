//! The page's key/value storage area.
//!
//! Values are strings, matching what the page keeps in `localStorage`. This table is
//! separate from the pending-submission queue and nothing here is ever drained.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use serde::{Deserialize, Serialize};

use crate::{schema, OutboxError};

/// Set once the visitor closes the install banner.
pub const INSTALL_DISMISSED: &str = "installDismissed";
/// Set once the visitor accepts the install prompt.
pub const APP_INSTALLED: &str = "appInstalled";
/// JSON array of archived contact-form inquiries.
pub const GYM_INQUIRIES: &str = "gymInquiries";

/// An archived contact-form inquiry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inquiry {
    #[serde(flatten)]
    pub fields: BTreeMap<String, String>,
    pub timestamp: DateTime<Utc>,
}

impl Inquiry {
    pub fn new(fields: BTreeMap<String, String>) -> Self {
        Self {
            fields,
            timestamp: Utc::now(),
        }
    }
}

/// String key/value storage for page state.
pub struct PageStorage {
    conn: Mutex<Connection>,
}

impl PageStorage {
    pub fn open(path: &Path) -> Result<Self, OutboxError> {
        Ok(Self {
            conn: Mutex::new(schema::open_database(path)?),
        })
    }

    pub fn open_in_memory() -> Result<Self, OutboxError> {
        Ok(Self {
            conn: Mutex::new(schema::open_in_memory()?),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, OutboxError> {
        self.conn.lock().map_err(|_| OutboxError::LockPoisoned)
    }

    pub fn get_item(&self, key: &str) -> Result<Option<String>, OutboxError> {
        let conn = self.lock()?;
        let value = conn
            .query_row(
                "SELECT value FROM page_storage WHERE key = ?",
                [key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    pub fn set_item(&self, key: &str, value: &str) -> Result<(), OutboxError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO page_storage (key, value) VALUES (?, ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    pub fn remove_item(&self, key: &str) -> Result<bool, OutboxError> {
        let conn = self.lock()?;
        let removed = conn.execute("DELETE FROM page_storage WHERE key = ?", [key])?;
        Ok(removed > 0)
    }

    /// A flag counts as set when it holds any non-empty string.
    fn flag(&self, key: &str) -> Result<bool, OutboxError> {
        Ok(self.get_item(key)?.is_some_and(|v| !v.is_empty()))
    }

    pub fn install_dismissed(&self) -> Result<bool, OutboxError> {
        self.flag(INSTALL_DISMISSED)
    }

    pub fn mark_install_dismissed(&self) -> Result<(), OutboxError> {
        self.set_item(INSTALL_DISMISSED, "true")
    }

    pub fn app_installed(&self) -> Result<bool, OutboxError> {
        self.flag(APP_INSTALLED)
    }

    pub fn mark_app_installed(&self) -> Result<(), OutboxError> {
        self.set_item(APP_INSTALLED, "true")
    }

    /// Whether the install banner may be shown.
    pub fn should_offer_install(&self) -> Result<bool, OutboxError> {
        Ok(!self.install_dismissed()? && !self.app_installed()?)
    }

    /// Archived inquiries, oldest first.
    pub fn inquiries(&self) -> Result<Vec<Inquiry>, OutboxError> {
        parse_inquiries(self.get_item(GYM_INQUIRIES)?)
    }

    /// Append an inquiry to the archive.
    ///
    /// The read and the rewrite share one immediate transaction, so concurrent
    /// appends from other handles or processes are never lost.
    pub fn record_inquiry(&self, inquiry: Inquiry) -> Result<usize, OutboxError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let raw: Option<String> = tx
            .query_row(
                "SELECT value FROM page_storage WHERE key = ?",
                [GYM_INQUIRIES],
                |row| row.get(0),
            )
            .optional()?;
        let mut all = parse_inquiries(raw)?;
        all.push(inquiry);

        tx.execute(
            "INSERT INTO page_storage (key, value) VALUES (?, ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![GYM_INQUIRIES, serde_json::to_string(&all)?],
        )?;
        tx.commit()?;
        Ok(all.len())
    }
}

fn parse_inquiries(raw: Option<String>) -> Result<Vec<Inquiry>, OutboxError> {
    match raw {
        Some(raw) => Ok(serde_json::from_str(&raw)?),
        None => Ok(Vec::new()),
    }
}
