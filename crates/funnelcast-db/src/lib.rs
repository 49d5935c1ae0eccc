//! SQLite persistence for Funnelcast.
//!
//! One database file shared by the bot process and the (external) admin
//! console. All timestamps are naive local time stored as
//! `YYYY-MM-DD HH:MM:SS` text; record-level writes are single statements,
//! which is the only atomicity the lifecycle needs (the console touches a
//! broadcast before scheduling, the scheduler after, never both at once).

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::NaiveDateTime;
use rusqlite::Connection;

use funnelcast_core::error::{FunnelcastError, Result};

mod broadcasts;
mod content;
mod users;

pub use broadcasts::Broadcast;
pub use content::{ContentRecord, ContentSlot};
pub use users::User;

/// Storage format for all timestamps.
pub const TS_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub(crate) fn ts_to_text(ts: NaiveDateTime) -> String {
    ts.format(TS_FORMAT).to_string()
}

pub(crate) fn ts_from_text(s: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(s, TS_FORMAT).ok()
}

/// The Funnelcast database.
pub struct BotDb {
    conn: Mutex<Connection>,
}

impl BotDb {
    /// Open or create the database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)
            .map_err(|e| FunnelcastError::Db(format!("DB open error: {e}")))?;
        Self::from_connection(conn)
    }

    /// In-memory database, used by tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| FunnelcastError::Db(format!("DB open error: {e}")))?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        // WAL lets the admin console read/write concurrently without
        // "database is locked" errors.
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA busy_timeout = 5000;
             PRAGMA foreign_keys = ON;",
        )
        .map_err(|e| FunnelcastError::Db(format!("DB pragma error: {e}")))?;

        let db = Self {
            conn: Mutex::new(conn),
        };
        db.migrate()?;
        Ok(db)
    }

    pub(crate) fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| FunnelcastError::Db(format!("DB lock poisoned: {e}")))
    }

    /// Run schema migrations.
    fn migrate(&self) -> Result<()> {
        self.conn()?
            .execute_batch(
                "
            CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER UNIQUE NOT NULL,
                username TEXT,
                joined_at TEXT NOT NULL,
                last_activity TEXT NOT NULL,
                acquisition_tag TEXT,
                stage TEXT,
                subscription_status TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_users_stage ON users(stage);

            CREATE TABLE IF NOT EXISTS broadcasts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                body_text TEXT NOT NULL DEFAULT '',
                media_kind TEXT,                       -- 'photo' | 'video' | 'document'
                media_location TEXT,                   -- URL or platform file id
                buttons TEXT NOT NULL DEFAULT '[]',    -- JSON [{text,url}]
                audience_filter TEXT NOT NULL DEFAULT 'all',
                audience_stages TEXT,                  -- comma-separated display names
                status TEXT NOT NULL DEFAULT 'draft',
                is_scheduled INTEGER NOT NULL DEFAULT 0,
                scheduled_at TEXT,
                is_recurring INTEGER NOT NULL DEFAULT 0,
                next_occurrence_at TEXT,
                created_at TEXT NOT NULL,
                sent_at TEXT,
                recipients_reached INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS recurrence_rules (
                broadcast_id INTEGER PRIMARY KEY
                    REFERENCES broadcasts(id) ON DELETE CASCADE,
                weekdays TEXT NOT NULL,                -- '1,3' (Monday = 0)
                time_of_day TEXT NOT NULL,             -- '09:00'
                next_occurrence_at TEXT,
                is_active INTEGER NOT NULL DEFAULT 1
            );

            CREATE TABLE IF NOT EXISTS content_slots (
                slot TEXT PRIMARY KEY,
                body_text TEXT NOT NULL,
                media_kind TEXT,
                media_location TEXT,
                buttons TEXT NOT NULL DEFAULT '[]',
                action_label TEXT,
                updated_at TEXT NOT NULL
            );
         ",
            )
            .map_err(|e| FunnelcastError::Db(format!("Migration: {e}")))?;
        Ok(())
    }
}
