//! The shared SQLite handle.

use crate::migration::run_migrations;
use crate::storage;
use botnet_types::error::{BotNetError, BotNetResult};
use rusqlite::{Connection, Transaction, TransactionBehavior};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::info;

/// Owns the database connection shared by every trust component.
///
/// Access is serialized through a mutex; multi-row mutations go through
/// [`TrustSubstrate::with_transaction`] so they are applied entirely or not
/// at all.
#[derive(Clone)]
pub struct TrustSubstrate {
    conn: Arc<Mutex<Connection>>,
}

impl TrustSubstrate {
    /// Open (or create) the database at `path` and run migrations.
    pub fn open(path: &Path) -> BotNetResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| BotNetError::Storage(format!("create {}: {e}", parent.display())))?;
            }
        }
        let conn = Connection::open(path).map_err(storage)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))
            .map_err(storage)?;
        conn.busy_timeout(std::time::Duration::from_secs(5))
            .map_err(storage)?;
        run_migrations(&conn).map_err(storage)?;
        info!(path = %path.display(), "Opened trust database");
        Ok(Self::from_connection(conn))
    }

    /// In-memory database, for tests and ephemeral nodes.
    pub fn open_in_memory() -> BotNetResult<Self> {
        let conn = Connection::open_in_memory().map_err(storage)?;
        run_migrations(&conn).map_err(storage)?;
        Ok(Self::from_connection(conn))
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    /// Run `f` with exclusive access to the connection.
    pub fn with_connection<T>(
        &self,
        f: impl FnOnce(&Connection) -> BotNetResult<T>,
    ) -> BotNetResult<T> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| BotNetError::Internal(e.to_string()))?;
        f(&conn)
    }

    /// Run `f` inside an immediate transaction. Any error rolls back.
    pub fn with_transaction<T>(
        &self,
        f: impl FnOnce(&Transaction<'_>) -> BotNetResult<T>,
    ) -> BotNetResult<T> {
        let mut conn = self
            .conn
            .lock()
            .map_err(|e| BotNetError::Internal(e.to_string()))?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(storage)?;
        let out = f(&tx)?;
        tx.commit().map_err(storage)?;
        Ok(out)
    }
}
