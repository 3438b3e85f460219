//! Tier storage trait and SQLite implementation.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use super::entry::Entry;

/// Trait for tier storage backends.
///
/// A tier is a named key-value store of [`Entry`] rows. Backends serialize
/// concurrent writes to the same key; concurrent writes to different keys are
/// last-write-wins with no further ordering.
pub trait TierStorage: Send + Sync {
  /// Create the tier if it does not exist yet.
  fn ensure_tier(&self, name: &str) -> Result<()>;

  /// Write an entry into a tier, replacing any entry at the same key.
  fn put_entry(&self, tier: &str, entry: &Entry) -> Result<()>;

  /// Look up an entry by key.
  fn get_entry(&self, tier: &str, key: &str) -> Result<Option<Entry>>;

  /// Delete an entry by key. Returns whether an entry was present.
  fn delete_entry(&self, tier: &str, key: &str) -> Result<bool>;

  /// All tier names currently present, in name order.
  fn list_tiers(&self) -> Result<Vec<String>>;

  /// Delete a tier and all of its entries. Returns whether it existed.
  fn delete_tier(&self, name: &str) -> Result<bool>;

  /// Mark a tier as fully provisioned.
  fn set_ready(&self, tier: &str, ready: bool) -> Result<()>;

  /// Whether a tier has been marked fully provisioned.
  fn is_ready(&self, tier: &str) -> Result<bool>;
}

/// SQLite-based tier storage.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Open or create the store at the default location.
  pub fn open() -> Result<Self> {
    let path = Self::default_path()?;

    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create data directory: {}", e))?;
    }

    Self::open_at(&path)
  }

  /// Open or create the store at an explicit path.
  pub fn open_at(path: &Path) -> Result<Self> {
    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open tier store at {}: {}", path.display(), e))?;

    let storage = Self {
      conn: Mutex::new(conn),
    };
    storage.run_migrations()?;

    Ok(storage)
  }

  /// Open an in-memory store. Used by tests.
  #[allow(dead_code)]
  pub fn open_in_memory() -> Result<Self> {
    let conn =
      Connection::open_in_memory().map_err(|e| eyre!("Failed to open in-memory store: {}", e))?;

    let storage = Self {
      conn: Mutex::new(conn),
    };
    storage.run_migrations()?;

    Ok(storage)
  }

  /// Get the default database path.
  fn default_path() -> Result<std::path::PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("shellkeeper").join("tiers.db"))
  }

  /// Run database migrations for tier tables.
  fn run_migrations(&self) -> Result<()> {
    let conn = self.lock()?;

    conn
      .execute_batch(TIER_SCHEMA)
      .map_err(|e| eyre!("Failed to run tier migrations: {}", e))?;

    Ok(())
  }

  fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
    self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))
  }
}

/// Schema for tier tables.
const TIER_SCHEMA: &str = r#"
-- One row per tier; ready is set only after a complete provision
CREATE TABLE IF NOT EXISTS tiers (
    name TEXT PRIMARY KEY,
    ready INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Stored responses, keyed per tier
CREATE TABLE IF NOT EXISTS entries (
    tier_name TEXT NOT NULL,
    entry_key TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    content_type TEXT,
    body BLOB NOT NULL,
    stored_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (tier_name, entry_key),
    FOREIGN KEY (tier_name) REFERENCES tiers(name) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_entries_tier ON entries(tier_name);
"#;

impl TierStorage for SqliteStorage {
  fn ensure_tier(&self, name: &str) -> Result<()> {
    let conn = self.lock()?;

    conn
      .execute(
        "INSERT OR IGNORE INTO tiers (name) VALUES (?)",
        params![name],
      )
      .map_err(|e| eyre!("Failed to create tier {}: {}", name, e))?;

    Ok(())
  }

  fn put_entry(&self, tier: &str, entry: &Entry) -> Result<()> {
    let conn = self.lock()?;

    conn
      .execute(
        "INSERT OR REPLACE INTO entries (tier_name, entry_key, url, status, content_type, body, stored_at)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
        params![
          tier,
          entry.key,
          entry.url,
          entry.status,
          entry.content_type,
          entry.body,
          format_datetime(entry.stored_at),
        ],
      )
      .map_err(|e| eyre!("Failed to store entry in tier {}: {}", tier, e))?;

    Ok(())
  }

  fn get_entry(&self, tier: &str, key: &str) -> Result<Option<Entry>> {
    let conn = self.lock()?;

    let mut stmt = conn
      .prepare(
        "SELECT url, status, content_type, body, stored_at FROM entries
         WHERE tier_name = ? AND entry_key = ?",
      )
      .map_err(|e| eyre!("Failed to prepare entry lookup: {}", e))?;

    let row: Option<(String, u16, Option<String>, Vec<u8>, String)> = stmt
      .query_row(params![tier, key], |row| {
        Ok((
          row.get(0)?,
          row.get(1)?,
          row.get(2)?,
          row.get(3)?,
          row.get(4)?,
        ))
      })
      .optional()
      .map_err(|e| eyre!("Failed to look up entry: {}", e))?;

    match row {
      Some((url, status, content_type, body, stored_at_str)) => Ok(Some(Entry {
        key: key.to_string(),
        url,
        status,
        content_type,
        body,
        stored_at: parse_datetime(&stored_at_str)?,
      })),
      None => Ok(None),
    }
  }

  fn delete_entry(&self, tier: &str, key: &str) -> Result<bool> {
    let conn = self.lock()?;

    let deleted = conn
      .execute(
        "DELETE FROM entries WHERE tier_name = ? AND entry_key = ?",
        params![tier, key],
      )
      .map_err(|e| eyre!("Failed to delete entry: {}", e))?;

    Ok(deleted > 0)
  }

  fn list_tiers(&self) -> Result<Vec<String>> {
    let conn = self.lock()?;

    let mut stmt = conn
      .prepare("SELECT name FROM tiers ORDER BY name")
      .map_err(|e| eyre!("Failed to prepare tier listing: {}", e))?;

    let names: Vec<String> = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list tiers: {}", e))?
      .filter_map(|r| r.ok())
      .collect();

    Ok(names)
  }

  fn delete_tier(&self, name: &str) -> Result<bool> {
    let conn = self.lock()?;

    // CASCADE is not guaranteed on; delete entries explicitly
    conn
      .execute("DELETE FROM entries WHERE tier_name = ?", params![name])
      .map_err(|e| eyre!("Failed to delete entries of tier {}: {}", name, e))?;

    let deleted = conn
      .execute("DELETE FROM tiers WHERE name = ?", params![name])
      .map_err(|e| eyre!("Failed to delete tier {}: {}", name, e))?;

    Ok(deleted > 0)
  }

  fn set_ready(&self, tier: &str, ready: bool) -> Result<()> {
    let conn = self.lock()?;

    conn
      .execute(
        "UPDATE tiers SET ready = ? WHERE name = ?",
        params![ready as i64, tier],
      )
      .map_err(|e| eyre!("Failed to mark tier {}: {}", tier, e))?;

    Ok(())
  }

  fn is_ready(&self, tier: &str) -> Result<bool> {
    let conn = self.lock()?;

    let ready: Option<i64> = conn
      .query_row(
        "SELECT ready FROM tiers WHERE name = ?",
        params![tier],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read tier flag: {}", e))?;

    Ok(ready.unwrap_or(0) != 0)
  }
}

/// In-memory tier storage. Backs tests and ephemeral setups.
#[derive(Default)]
#[allow(dead_code)]
pub struct MemoryStorage {
  tiers: Mutex<HashMap<String, MemoryTier>>,
}

#[derive(Default)]
struct MemoryTier {
  ready: bool,
  entries: HashMap<String, Entry>,
}

impl MemoryStorage {
  #[allow(dead_code)]
  pub fn new() -> Self {
    Self::default()
  }

  fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, MemoryTier>>> {
    self.tiers.lock().map_err(|e| eyre!("Lock poisoned: {}", e))
  }
}

impl TierStorage for MemoryStorage {
  fn ensure_tier(&self, name: &str) -> Result<()> {
    self.lock()?.entry(name.to_string()).or_default();
    Ok(())
  }

  fn put_entry(&self, tier: &str, entry: &Entry) -> Result<()> {
    self
      .lock()?
      .entry(tier.to_string())
      .or_default()
      .entries
      .insert(entry.key.clone(), entry.clone());
    Ok(())
  }

  fn get_entry(&self, tier: &str, key: &str) -> Result<Option<Entry>> {
    Ok(
      self
        .lock()?
        .get(tier)
        .and_then(|t| t.entries.get(key))
        .cloned(),
    )
  }

  fn delete_entry(&self, tier: &str, key: &str) -> Result<bool> {
    Ok(
      self
        .lock()?
        .get_mut(tier)
        .map(|t| t.entries.remove(key).is_some())
        .unwrap_or(false),
    )
  }

  fn list_tiers(&self) -> Result<Vec<String>> {
    let mut names: Vec<String> = self.lock()?.keys().cloned().collect();
    names.sort();
    Ok(names)
  }

  fn delete_tier(&self, name: &str) -> Result<bool> {
    Ok(self.lock()?.remove(name).is_some())
  }

  fn set_ready(&self, tier: &str, ready: bool) -> Result<()> {
    if let Some(t) = self.lock()?.get_mut(tier) {
      t.ready = ready;
    }
    Ok(())
  }

  fn is_ready(&self, tier: &str) -> Result<bool> {
    Ok(self.lock()?.get(tier).map(|t| t.ready).unwrap_or(false))
  }
}

/// Format a datetime the way SQLite's datetime('now') does.
fn format_datetime(dt: DateTime<Utc>) -> String {
  dt.format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Parse a datetime string from SQLite format.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  // SQLite stores as "YYYY-MM-DD HH:MM:SS"
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}
