//! Durable SQLite-backed key-value storage.
//!
//! One table, `kv_entries`, holds every record as a JSON string. The schema
//! is guarded by the `user_version` pragma so setup runs exactly once per
//! database file.
//!
//! The default database file is placed in the platform-appropriate data
//! directory:
//! - Linux:   `~/.local/share/zendo/zendo.db`
//! - macOS:   `~/Library/Application Support/com.zendo.zendo/zendo.db`
//! - Windows: `{FOLDERID_RoamingAppData}\zendo\zendo\data\zendo.db`

use std::path::Path;

use async_trait::async_trait;
use directories::ProjectDirs;
use rusqlite::{params, Connection};
use tokio::sync::Mutex;

use crate::error::{Result, StoreError};
use crate::kv::KeyValueStore;

/// Current schema version. Bump and extend [`run_setup`] if the layout
/// changes.
const CURRENT_VERSION: u32 = 1;

const SETUP_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS kv_entries (
    key   TEXT PRIMARY KEY NOT NULL,
    value TEXT NOT NULL
);
"#;

/// SQLite-backed [`KeyValueStore`].
///
/// A single connection is shared behind an async mutex; individual reads and
/// writes are small and short-lived, so contention never amounts to more
/// than a few queued statements.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the default application database.
    pub fn open_default() -> Result<Self> {
        let project_dirs =
            ProjectDirs::from("com", "zendo", "zendo").ok_or(StoreError::NoDataDir)?;

        let data_dir = project_dirs.data_dir();
        std::fs::create_dir_all(data_dir)?;

        let db_path = data_dir.join("zendo.db");

        tracing::info!(path = %db_path.display(), "opening key-value database");

        Self::open_at(&db_path)
    }

    /// Open (or create) a database at an explicit path.
    ///
    /// Useful for tests and for embedding the store inside custom directory
    /// layouts.
    pub fn open_at(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;

        conn.pragma_update(None, "journal_mode", "WAL")?;

        run_setup(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

/// Create the schema if this database file has not seen it yet.
fn run_setup(conn: &Connection) -> Result<()> {
    let current: u32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;

    if current < 1 {
        tracing::info!("creating kv_entries table");
        conn.execute_batch(SETUP_SQL)?;
        conn.pragma_update(None, "user_version", CURRENT_VERSION)?;
    }

    Ok(())
}

#[async_trait]
impl KeyValueStore for SqliteStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare("SELECT value FROM kv_entries WHERE key = ?1")?;
        let mut rows = stmt.query(params![key])?;

        match rows.next()? {
            Some(row) => Ok(Some(row.get(0)?)),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO kv_entries (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute("DELETE FROM kv_entries WHERE key = ?1", params![key])?;
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare("SELECT key FROM kv_entries ORDER BY key")?;
        let rows = stmt.query_map([], |row| row.get(0))?;

        let mut keys = Vec::new();
        for row in rows {
            keys.push(row?);
        }
        Ok(keys)
    }
}
