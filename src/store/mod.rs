//! Append-only local store for bug records.

use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::bugzilla::types::BugRecord;

/// Schema for the store tables.
const STORE_SCHEMA: &str = r#"
-- Append-only record log; seq preserves insertion order.
CREATE TABLE IF NOT EXISTS bugs (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    bug_id INTEGER,
    data BLOB NOT NULL,
    stored_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE INDEX IF NOT EXISTS idx_bugs_bug_id ON bugs(bug_id);

-- Store-level metadata, e.g. the canonical remote snapshot URL.
CREATE TABLE IF NOT EXISTS store_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

const META_SNAPSHOT_URL: &str = "snapshot_url";

/// Append-only store of bug records, readable in insertion order.
///
/// Records are never updated or deleted once appended. A bug id may
/// appear more than once; deduplication is the reader's concern.
pub struct BugStore {
  conn: Mutex<Connection>,
  path: PathBuf,
}

impl BugStore {
  /// Open (or create) the store at `path`, recording the canonical
  /// remote snapshot it mirrors.
  pub fn open(path: &Path, snapshot_url: &str) -> Result<Self> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create store directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open store at {}: {}", path.display(), e))?;

    let store = Self {
      conn: Mutex::new(conn),
      path: path.to_path_buf(),
    };
    store.run_migrations()?;
    store.set_meta(META_SNAPSHOT_URL, snapshot_url)?;

    Ok(store)
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  /// The canonical remote snapshot URL recorded at open time.
  pub fn snapshot_url(&self) -> Result<Option<String>> {
    self.get_meta(META_SNAPSHOT_URL)
  }

  /// Append records in one transaction. Existing rows are never touched.
  pub fn append<I>(&self, records: I) -> Result<()>
  where
    I: IntoIterator<Item = BugRecord>,
  {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute("BEGIN TRANSACTION", [])
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    for record in records {
      let bug_id = record.id().map(|id| id as i64);
      let data =
        serde_json::to_vec(&record).map_err(|e| eyre!("Failed to serialize record: {}", e))?;

      conn
        .execute(
          "INSERT INTO bugs (bug_id, data) VALUES (?, ?)",
          params![bug_id, data],
        )
        .map_err(|e| eyre!("Failed to append record: {}", e))?;
    }

    conn
      .execute("COMMIT", [])
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(())
  }

  /// Read all records in insertion order.
  pub fn read(&self) -> Result<Vec<BugRecord>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare("SELECT data FROM bugs ORDER BY seq")
      .map_err(|e| eyre!("Failed to prepare read: {}", e))?;

    let rows = stmt
      .query_map([], |row| row.get::<_, Vec<u8>>(0))
      .map_err(|e| eyre!("Failed to read records: {}", e))?;

    let mut records = Vec::new();
    for data in rows {
      let data = data.map_err(|e| eyre!("Failed to read record row: {}", e))?;
      let record: BugRecord = serde_json::from_slice(&data)
        .map_err(|e| eyre!("Failed to deserialize record: {}", e))?;
      records.push(record);
    }

    Ok(records)
  }

  fn run_migrations(&self) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute_batch(STORE_SCHEMA)
      .map_err(|e| eyre!("Failed to run store migrations: {}", e))?;

    Ok(())
  }

  fn set_meta(&self, key: &str, value: &str) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute(
        "INSERT OR REPLACE INTO store_meta (key, value) VALUES (?, ?)",
        params![key, value],
      )
      .map_err(|e| eyre!("Failed to write store metadata: {}", e))?;

    Ok(())
  }

  fn get_meta(&self, key: &str) -> Result<Option<String>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare("SELECT value FROM store_meta WHERE key = ?")
      .map_err(|e| eyre!("Failed to prepare metadata query: {}", e))?;

    match stmt.query_row(params![key], |row| row.get(0)) {
      Ok(value) => Ok(Some(value)),
      Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
      Err(e) => Err(eyre!("Failed to read store metadata: {}", e)),
    }
  }
}
