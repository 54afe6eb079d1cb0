//! SQLite-backed primary storage tier.
//!
//! Holds every persisted launch key in a single `kv` table at
//! `~/.config/launchgate/launchgate.db`.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension};

use super::data_dir;
use super::tier::StorageTier;
use crate::error::{CoreError, StoreError};

/// SQLite database used as the primary tier.
///
/// `rusqlite::Connection` is not `Sync`, so access is serialized through a mutex.
pub struct SqliteTier {
    conn: Mutex<Connection>,
}

impl SqliteTier {
    /// Open the database at `~/.config/launchgate/launchgate.db`.
    ///
    /// Creates the database file and schema if they don't exist.
    ///
    /// # Errors
    /// Returns an error if the data directory is unavailable or the database
    /// cannot be opened or migrated.
    pub fn open() -> Result<Self, CoreError> {
        let path = data_dir()?.join("launchgate.db");
        Ok(Self::open_at(&path)?)
    }

    /// Open (or create) the database at an explicit path.
    pub fn open_at(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path).map_err(|source| StoreError::OpenFailed {
            path: path.to_path_buf(),
            source,
        })?;
        let tier = Self {
            conn: Mutex::new(conn),
        };
        tier.migrate()?;
        Ok(tier)
    }

    /// Open an in-memory database.
    pub fn open_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        let tier = Self {
            conn: Mutex::new(conn),
        };
        tier.migrate()?;
        Ok(tier)
    }

    fn migrate(&self) -> Result<(), StoreError> {
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS kv (
                key        TEXT PRIMARY KEY,
                value      TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );",
        )?;
        Ok(())
    }

    /// All stored pairs ordered by key.
    pub fn entries(&self) -> Result<Vec<(String, String)>, StoreError> {
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        let mut stmt = conn.prepare("SELECT key, value FROM kv ORDER BY key")?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }
}

impl StorageTier for SqliteTier {
    fn name(&self) -> &str {
        "sqlite"
    }

    fn read(&self, key: &str) -> Result<Option<String>, StoreError> {
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        let value = conn
            .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                row.get::<_, String>(0)
            })
            .optional()?;
        Ok(value)
    }

    fn write(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        conn.execute(
            "INSERT INTO kv (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, value, chrono::Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        conn.execute("DELETE FROM kv WHERE key = ?1", params![key])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn write_then_read() {
        let tier = SqliteTier::open_memory().unwrap();
        tier.write("launchgate.endpoint", "https://a.example").unwrap();
        assert_eq!(
            tier.read("launchgate.endpoint").unwrap().as_deref(),
            Some("https://a.example")
        );
    }

    #[test]
    fn write_overwrites_existing_value() {
        let tier = SqliteTier::open_memory().unwrap();
        tier.write("k", "one").unwrap();
        tier.write("k", "two").unwrap();
        assert_eq!(tier.read("k").unwrap().as_deref(), Some("two"));
        assert_eq!(tier.entries().unwrap().len(), 1);
    }

    #[test]
    fn remove_deletes_row() {
        let tier = SqliteTier::open_memory().unwrap();
        tier.write("k", "v").unwrap();
        tier.remove("k").unwrap();
        assert_eq!(tier.read("k").unwrap(), None);
    }

    #[test]
    fn values_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("launchgate.db");
        {
            let tier = SqliteTier::open_at(&path).unwrap();
            tier.write("k", "persisted").unwrap();
        }
        let tier = SqliteTier::open_at(&path).unwrap();
        assert_eq!(tier.read("k").unwrap().as_deref(), Some("persisted"));
    }
}
