//! Partition storage trait with in-memory and SQLite implementations.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use bytes::Bytes;
use rusqlite::{params, Connection, OptionalExtension};
use sha2::{Digest, Sha256};

use crate::error::{CacheError, Result};
use crate::http::{CacheKey, Response};

/// Durable key/response storage split into named partitions.
///
/// Every write is a single atomic overwrite of one key. No other consistency
/// is offered, and none is needed: entries are snapshots of the same URL.
pub trait CacheStorage: Send + Sync + 'static {
  /// Create the partition if it does not exist yet.
  fn open_partition(&self, name: &str) -> Result<()>;

  /// Look up an entry. Missing partitions behave like empty ones.
  fn get(&self, partition: &str, key: &CacheKey) -> Result<Option<Response>>;

  /// Store or overwrite an entry, creating the partition if needed.
  fn put(&self, partition: &str, key: &CacheKey, response: &Response) -> Result<()>;

  /// Drop a partition and all of its entries. Returns whether it existed.
  fn delete_partition(&self, name: &str) -> Result<bool>;

  /// Names of every partition currently stored.
  fn partition_names(&self) -> Result<Vec<String>>;
}

fn poisoned<E: std::fmt::Display>(e: E) -> CacheError {
  CacheError::Storage(format!("Lock poisoned: {}", e))
}

/// In-process storage. Contents live as long as the value.
#[derive(Debug, Default)]
pub struct MemoryStorage {
  partitions: Mutex<BTreeMap<String, HashMap<CacheKey, Response>>>,
}

impl MemoryStorage {
  pub fn new() -> Self {
    Self::default()
  }
}

impl CacheStorage for MemoryStorage {
  fn open_partition(&self, name: &str) -> Result<()> {
    let mut partitions = self.partitions.lock().map_err(poisoned)?;
    partitions.entry(name.to_string()).or_default();
    Ok(())
  }

  fn get(&self, partition: &str, key: &CacheKey) -> Result<Option<Response>> {
    let partitions = self.partitions.lock().map_err(poisoned)?;
    Ok(
      partitions
        .get(partition)
        .and_then(|entries| entries.get(key))
        .cloned(),
    )
  }

  fn put(&self, partition: &str, key: &CacheKey, response: &Response) -> Result<()> {
    let mut partitions = self.partitions.lock().map_err(poisoned)?;
    partitions
      .entry(partition.to_string())
      .or_default()
      .insert(key.clone(), response.clone());
    Ok(())
  }

  fn delete_partition(&self, name: &str) -> Result<bool> {
    let mut partitions = self.partitions.lock().map_err(poisoned)?;
    Ok(partitions.remove(name).is_some())
  }

  fn partition_names(&self) -> Result<Vec<String>> {
    let partitions = self.partitions.lock().map_err(poisoned)?;
    Ok(partitions.keys().cloned().collect())
  }
}

/// SQLite-backed partition storage.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Open the storage at the default location.
  pub fn open() -> Result<Self> {
    Self::open_at(&Self::default_path()?)
  }

  /// Open or create a database file at `path`.
  pub fn open_at(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| CacheError::Storage(format!("Failed to create cache directory: {}", e)))?;
    }

    let conn = Connection::open(path).map_err(|e| {
      CacheError::Storage(format!(
        "Failed to open cache database at {}: {}",
        path.display(),
        e
      ))
    })?;

    Self::with_connection(conn)
  }

  /// A private database that disappears when dropped.
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| CacheError::Storage(format!("Failed to open in-memory database: {}", e)))?;
    Self::with_connection(conn)
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    let storage = Self {
      conn: Mutex::new(conn),
    };
    storage.run_migrations()?;
    Ok(storage)
  }

  /// Get the default database path.
  fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| CacheError::Storage("Could not determine data directory".to_string()))?;

    Ok(data_dir.join("shellcache").join("partitions.db"))
  }

  fn run_migrations(&self) -> Result<()> {
    let conn = self.conn.lock().map_err(poisoned)?;

    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| CacheError::Storage(format!("Failed to run cache migrations: {}", e)))?;

    Ok(())
  }
}

const CACHE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS cache_partitions (
    name TEXT PRIMARY KEY,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- One row per stored response, keyed by a hash of the normalized request
CREATE TABLE IF NOT EXISTS cache_entries (
    partition TEXT NOT NULL,
    entry_hash TEXT NOT NULL,
    request_key TEXT NOT NULL,
    status INTEGER NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    stored_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (partition, entry_hash)
);
"#;

/// SHA256 of the normalized key, for fixed-length primary keys.
fn entry_hash(key: &CacheKey) -> String {
  let mut hasher = Sha256::new();
  hasher.update(key.as_str().as_bytes());
  hex::encode(hasher.finalize())
}

impl CacheStorage for SqliteStorage {
  fn open_partition(&self, name: &str) -> Result<()> {
    let conn = self.conn.lock().map_err(poisoned)?;

    conn
      .execute(
        "INSERT OR IGNORE INTO cache_partitions (name) VALUES (?)",
        params![name],
      )
      .map_err(|e| CacheError::Storage(format!("Failed to open partition {}: {}", name, e)))?;

    Ok(())
  }

  fn get(&self, partition: &str, key: &CacheKey) -> Result<Option<Response>> {
    let conn = self.conn.lock().map_err(poisoned)?;

    let row: Option<(u16, String, Vec<u8>)> = conn
      .query_row(
        "SELECT status, headers, body FROM cache_entries
         WHERE partition = ? AND entry_hash = ?",
        params![partition, entry_hash(key)],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
      )
      .optional()
      .map_err(|e| CacheError::Storage(format!("Failed to read entry {}: {}", key, e)))?;

    match row {
      Some((status, headers, body)) => {
        let headers: Vec<(String, String)> = serde_json::from_str(&headers)
          .map_err(|e| CacheError::Storage(format!("Corrupt headers for {}: {}", key, e)))?;
        Ok(Some(Response {
          status,
          headers,
          body: Bytes::from(body),
        }))
      }
      None => Ok(None),
    }
  }

  fn put(&self, partition: &str, key: &CacheKey, response: &Response) -> Result<()> {
    let mut conn = self.conn.lock().map_err(poisoned)?;
    let headers = serde_json::to_string(&response.headers)
      .map_err(|e| CacheError::Storage(format!("Failed to serialize headers: {}", e)))?;

    let tx = conn
      .transaction()
      .map_err(|e| CacheError::Storage(format!("Failed to begin transaction: {}", e)))?;

    tx.execute(
      "INSERT OR IGNORE INTO cache_partitions (name) VALUES (?)",
      params![partition],
    )
    .map_err(|e| CacheError::Storage(format!("Failed to open partition {}: {}", partition, e)))?;

    tx.execute(
      "INSERT OR REPLACE INTO cache_entries
         (partition, entry_hash, request_key, status, headers, body, stored_at)
       VALUES (?, ?, ?, ?, ?, ?, datetime('now'))",
      params![
        partition,
        entry_hash(key),
        key.as_str(),
        response.status,
        headers,
        response.body.as_ref()
      ],
    )
    .map_err(|e| CacheError::Storage(format!("Failed to store entry {}: {}", key, e)))?;

    tx.commit()
      .map_err(|e| CacheError::Storage(format!("Failed to commit transaction: {}", e)))?;

    Ok(())
  }

  fn delete_partition(&self, name: &str) -> Result<bool> {
    let mut conn = self.conn.lock().map_err(poisoned)?;

    let tx = conn
      .transaction()
      .map_err(|e| CacheError::Storage(format!("Failed to begin transaction: {}", e)))?;

    let entries = tx
      .execute(
        "DELETE FROM cache_entries WHERE partition = ?",
        params![name],
      )
      .map_err(|e| CacheError::Storage(format!("Failed to delete entries of {}: {}", name, e)))?;

    let partitions = tx
      .execute("DELETE FROM cache_partitions WHERE name = ?", params![name])
      .map_err(|e| CacheError::Storage(format!("Failed to delete partition {}: {}", name, e)))?;

    tx.commit()
      .map_err(|e| CacheError::Storage(format!("Failed to commit transaction: {}", e)))?;

    Ok(partitions > 0 || entries > 0)
  }

  fn partition_names(&self) -> Result<Vec<String>> {
    let conn = self.conn.lock().map_err(poisoned)?;

    let mut stmt = conn
      .prepare("SELECT name FROM cache_partitions ORDER BY name")
      .map_err(|e| CacheError::Storage(format!("Failed to prepare query: {}", e)))?;

    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| CacheError::Storage(format!("Failed to list partitions: {}", e)))?
      .collect::<std::result::Result<Vec<String>, _>>()
      .map_err(|e| CacheError::Storage(format!("Failed to list partitions: {}", e)))?;

    Ok(names)
  }
}
