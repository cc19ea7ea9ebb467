mod schema;
mod queries;

use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use inboxmux_types::{InboxError, Result};

/// Readers wait this long on a writer's lock before giving up.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// SQLite-backed implementation of the [`inboxmux_types::Store`] trait.
pub struct SqliteStore {
    pub(crate) conn: Mutex<rusqlite::Connection>,
}

impl SqliteStore {
    /// Open a persistent on-disk database at `path`.
    pub fn open(path: &std::path::Path) -> Result<Self> {
        let conn = rusqlite::Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init()?;
        Ok(store)
    }

    /// Open an in-memory database (primarily for tests).
    pub fn open_in_memory() -> Result<Self> {
        let conn = rusqlite::Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init()?;
        Ok(store)
    }

    /// Run all pragmas and schema DDL.
    fn init(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch(schema::SCHEMA_SQL)?;
        Ok(())
    }

    pub(crate) fn conn(&self) -> Result<MutexGuard<'_, rusqlite::Connection>> {
        self.conn.lock().map_err(|_| InboxError::Lock)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────
