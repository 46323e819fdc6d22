//! Durable key-value storage for session and selection state.
//!
//! The session token and the selected patient live under two independent
//! keys. Neither write is transactional with the other, so every consumer
//! must tolerate one being present without the other.
//!
//! Backends:
//! - [`MemoryStore`]: process-local map (tests, `backend = "memory"`)
//! - [`FileStore`]: one file per key inside a data directory
//! - [`SqliteStore`]: a single `kv` table in a SQLite file

pub mod file;
pub mod memory;
pub mod sqlite;

pub use file::FileStore;
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::config::StorageConfig;
use std::sync::Arc;

/// Key holding the raw bearer token.
pub const TOKEN_KEY: &str = "authToken";

/// Key holding the JSON snapshot of the selected patient.
pub const SELECTION_KEY: &str = "selectedPatient";

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("storage I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("storage database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("invalid storage key '{0}'")]
    InvalidKey(String),
}

/// A persistent string-keyed store that survives process restarts.
pub trait DurableStore: Send + Sync {
    /// Backend name, for logs.
    fn name(&self) -> &str;

    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Remove a key. Removing an absent key is not an error.
    fn remove(&self, key: &str) -> Result<(), StorageError>;
}

/// Factory: open the configured backend.
pub fn open_store(config: &StorageConfig) -> anyhow::Result<Arc<dyn DurableStore>> {
    match config.backend.as_str() {
        "memory" => Ok(Arc::new(MemoryStore::new())),
        "file" => Ok(Arc::new(FileStore::open(&config.resolved_data_dir())?)),
        "sqlite" => {
            let dir = config.resolved_data_dir();
            std::fs::create_dir_all(&dir)?;
            Ok(Arc::new(SqliteStore::open(&dir.join("chartdesk.db"))?))
        }
        other if other.trim().is_empty() => {
            anyhow::bail!("storage.backend cannot be empty. Supported values: file, sqlite, memory")
        }
        other => anyhow::bail!(
            "Unknown storage backend '{other}'. Supported values: file, sqlite, memory"
        ),
    }
}
