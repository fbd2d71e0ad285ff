//! SQLite snapshot store.
//!
//! Two tables back the engine:
//!
//! ```sql
//! CREATE TABLE IF NOT EXISTS snapshots (
//!     key        TEXT PRIMARY KEY,
//!     data       BLOB NOT NULL,
//!     updated_at TEXT NOT NULL,
//!     checksum   TEXT
//! );
//! CREATE TABLE IF NOT EXISTS long_term (
//!     owner      TEXT NOT NULL,
//!     id         TEXT NOT NULL,
//!     data       BLOB NOT NULL,
//!     updated_at TEXT NOT NULL,
//!     PRIMARY KEY (owner, id)
//! );
//! ```
//!
//! `snapshots` holds full-state JSON records under caller-chosen keys (the
//! orchestrator writes `pool`, `registry` and `personas` in one
//! [`SnapshotBatch`]). A CRC-32 of the payload is stored alongside when
//! enabled and a mismatch on load is logged, not fatal. `long_term` holds
//! each character's committed summaries, written through on every upsert.

use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{Connection, OpenFlags, OptionalExtension, params};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use crate::config::PersistenceConfig;
use crate::error::{ChorusError, Result};
use crate::memory::LongTermRecord;

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS snapshots (
    key        TEXT PRIMARY KEY,
    data       BLOB NOT NULL,
    updated_at TEXT NOT NULL,
    checksum   TEXT
);
CREATE TABLE IF NOT EXISTS long_term (
    owner      TEXT NOT NULL,
    id         TEXT NOT NULL,
    data       BLOB NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (owner, id)
);";

/// CRC-32 (ISO 3309) of `data` as lowercase hex.
fn crc32_hex(data: &[u8]) -> String {
    const POLY: u32 = 0xEDB8_8320;
    let crc = data.iter().fold(0xFFFF_FFFF_u32, |mut crc, &byte| {
        crc ^= u32::from(byte);
        for _ in 0..8 {
            crc = if crc & 1 == 1 { (crc >> 1) ^ POLY } else { crc >> 1 };
        }
        crc
    });
    format!("{:08x}", !crc)
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| ChorusError::Serialization(e.to_string()))
}

/// Records written together in one transaction.
#[derive(Debug, Default)]
pub struct SnapshotBatch {
    entries: Vec<(String, Vec<u8>)>,
}

impl SnapshotBatch {
    /// An empty batch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Encode `value` under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`ChorusError::Serialization`] if encoding fails.
    pub fn put<T: Serialize>(mut self, key: impl Into<String>, value: &T) -> Result<Self> {
        self.entries.push((key.into(), encode(value)?));
        Ok(self)
    }

    /// Number of records in the batch.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// `true` if nothing was added.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Handle to an open snapshot database. Shareable across threads; every call
/// takes the connection lock for its duration.
pub struct SnapshotStore {
    conn: Mutex<Connection>,
    config: PersistenceConfig,
    db_path: PathBuf,
}

impl std::fmt::Debug for SnapshotStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotStore")
            .field("db_path", &self.db_path)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl SnapshotStore {
    /// Open (or create) the database at `path`, creating the schema if needed.
    ///
    /// # Errors
    ///
    /// Returns [`ChorusError::Database`] on SQLite failures, or
    /// [`ChorusError::Integrity`] if an existing file is corrupt.
    pub fn open<P: AsRef<Path>>(path: P, config: &PersistenceConfig) -> Result<Self> {
        let db_path = path.as_ref().to_path_buf();
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn = Connection::open_with_flags(&db_path, flags)?;

        if config.wal_mode {
            conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        }
        conn.execute_batch("PRAGMA synchronous = NORMAL; PRAGMA busy_timeout = 5000;")?;
        check_integrity(&conn)?;
        conn.execute_batch(SCHEMA)?;

        info!(path = %db_path.display(), wal = config.wal_mode, "Snapshot store opened");
        Ok(Self {
            conn: Mutex::new(conn),
            config: config.clone(),
            db_path,
        })
    }

    /// Open a throwaway in-memory database.
    ///
    /// # Errors
    ///
    /// Returns [`ChorusError::Database`] on SQLite failures.
    pub fn open_in_memory(config: &PersistenceConfig) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
            config: config.clone(),
            db_path: PathBuf::from(":memory:"),
        })
    }

    /// Open whatever `config.path` names, or an in-memory store if unset.
    ///
    /// # Errors
    ///
    /// As [`SnapshotStore::open`].
    pub fn from_config(config: &PersistenceConfig) -> Result<Self> {
        match &config.path {
            Some(path) => Self::open(path, config),
            None => Self::open_in_memory(config),
        }
    }

    // ------------------------------------------------------------------
    // Records
    // ------------------------------------------------------------------

    /// Upsert every record in `batch` inside one transaction; on error none
    /// of them are written.
    ///
    /// # Errors
    ///
    /// Returns [`ChorusError::Database`] on SQLite failures.
    pub fn save_records(&self, batch: SnapshotBatch) -> Result<()> {
        let start = Instant::now();
        let now = Utc::now().to_rfc3339();
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let mut bytes = 0;
        for (key, json) in &batch.entries {
            let checksum = self.config.checksum_enabled.then(|| crc32_hex(json));
            tx.execute(
                "INSERT INTO snapshots (key, data, updated_at, checksum)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(key) DO UPDATE SET
                    data = excluded.data,
                    updated_at = excluded.updated_at,
                    checksum = excluded.checksum",
                params![key, json, now, checksum],
            )?;
            bytes += json.len();
        }
        tx.commit()?;

        debug!(
            records = batch.len(),
            bytes,
            elapsed_us = start.elapsed().as_micros(),
            "Saved snapshot batch"
        );
        Ok(())
    }

    /// Upsert `value` as JSON under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`ChorusError::Serialization`] if encoding fails, or
    /// [`ChorusError::Database`] on SQLite failures.
    pub fn save_record<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        self.save_records(SnapshotBatch::new().put(key, value)?)
    }

    /// Load and decode the record under `key`; `None` if absent.
    ///
    /// # Errors
    ///
    /// Returns [`ChorusError::Serialization`] if decoding fails, or
    /// [`ChorusError::Database`] on SQLite failures.
    pub fn load_record<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let row: Option<(Vec<u8>, Option<String>)> = {
            let conn = self.conn.lock();
            let mut stmt =
                conn.prepare_cached("SELECT data, checksum FROM snapshots WHERE key = ?1")?;
            stmt.query_row(params![key], |row| Ok((row.get(0)?, row.get(1)?)))
                .optional()?
        };

        let Some((data, stored_checksum)) = row else {
            return Ok(None);
        };

        if self.config.checksum_enabled {
            if let Some(expected) = stored_checksum {
                let actual = crc32_hex(&data);
                if expected != actual {
                    warn!(key, %expected, %actual, "Checksum mismatch, snapshot may be corrupt");
                }
            }
        }

        serde_json::from_slice(&data)
            .map(Some)
            .map_err(|e| ChorusError::Serialization(format!("{key}: {e}")))
    }

    // ------------------------------------------------------------------
    // Long-term summaries
    // ------------------------------------------------------------------

    /// Upsert one of `owner`'s summaries, keyed by `(owner, record.id)`.
    ///
    /// # Errors
    ///
    /// Returns [`ChorusError::Serialization`] or [`ChorusError::Database`].
    pub fn save_long_term(&self, owner: &str, record: &LongTermRecord) -> Result<()> {
        let json = encode(record)?;
        self.conn.lock().execute(
            "INSERT INTO long_term (owner, id, data, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(owner, id) DO UPDATE SET
                data = excluded.data,
                updated_at = excluded.updated_at",
            params![owner, record.id, json, Utc::now().to_rfc3339()],
        )?;
        debug!(owner, id = %record.id, "Saved long-term record");
        Ok(())
    }

    /// Every summary stored for `owner`, in first-commit order.
    ///
    /// # Errors
    ///
    /// Returns [`ChorusError::Database`], or [`ChorusError::Serialization`]
    /// for an undecodable row.
    pub fn load_long_term(&self, owner: &str) -> Result<Vec<LongTermRecord>> {
        let rows = {
            let conn = self.conn.lock();
            let mut stmt = conn
                .prepare_cached("SELECT data FROM long_term WHERE owner = ?1 ORDER BY rowid")?;
            let rows = stmt
                .query_map(params![owner], |row| row.get::<_, Vec<u8>>(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows
        };
        rows.iter()
            .map(|data| {
                serde_json::from_slice(data)
                    .map_err(|e| ChorusError::Serialization(format!("long_term/{owner}: {e}")))
            })
            .collect()
    }

    /// Drop every summary stored for `owner`. Returns the number removed.
    ///
    /// # Errors
    ///
    /// Returns [`ChorusError::Database`] on SQLite failures.
    pub fn delete_long_term(&self, owner: &str) -> Result<usize> {
        let removed = self
            .conn
            .lock()
            .execute("DELETE FROM long_term WHERE owner = ?1", params![owner])?;
        Ok(removed)
    }

    // ------------------------------------------------------------------
    // Backup
    // ------------------------------------------------------------------

    /// Copy the database to `dest_path` with SQLite's online-backup API.
    ///
    /// # Errors
    ///
    /// Returns [`ChorusError::Database`] on SQLite failures.
    pub fn backup<P: AsRef<Path>>(&self, dest_path: P) -> Result<()> {
        let start = Instant::now();
        let mut dest = Connection::open(dest_path.as_ref())?;
        {
            let conn = self.conn.lock();
            let backup = rusqlite::backup::Backup::new(&conn, &mut dest)?;
            backup.run_to_completion(256, std::time::Duration::from_millis(50), None)?;
        }

        info!(
            dest = %dest_path.as_ref().display(),
            elapsed_ms = start.elapsed().as_millis(),
            "Snapshot backup completed"
        );
        Ok(())
    }

    /// Write `<db>.bak.1`, shifting older backups up and keeping at most
    /// `backup_count`. No-op for in-memory stores.
    ///
    /// # Errors
    ///
    /// Returns [`ChorusError::Database`] or [`ChorusError::Io`] on failure.
    pub fn backup_rotating(&self) -> Result<()> {
        let max = self.config.backup_count;
        if self.db_path.as_os_str() == ":memory:" || max == 0 {
            return Ok(());
        }

        for i in (1..max).rev() {
            let src = self.backup_path(i);
            if src.exists() {
                std::fs::rename(&src, self.backup_path(i + 1))?;
            }
        }
        let overflow = self.backup_path(max + 1);
        if overflow.exists() {
            std::fs::remove_file(&overflow)?;
        }

        self.backup(self.backup_path(1))
    }

    fn backup_path(&self, n: u32) -> PathBuf {
        let mut p = self.db_path.clone();
        let ext = format!(
            "{}.bak.{n}",
            p.extension()
                .map_or(String::new(), |e| e.to_string_lossy().into_owned())
        );
        p.set_extension(ext);
        p
    }

    /// Database file path, or `:memory:`.
    #[must_use]
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }
}

/// Fail unless `PRAGMA integrity_check` reports `ok`.
fn check_integrity(conn: &Connection) -> Result<()> {
    let result: String = conn.query_row("PRAGMA integrity_check", [], |row| row.get(0))?;
    if result == "ok" {
        Ok(())
    } else {
        Err(ChorusError::Integrity(result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, TimeOfDay};
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Scene {
        label: String,
        clock: Clock,
        present: Vec<String>,
    }

    fn scene() -> Scene {
        Scene {
            label: "forest clearing".to_string(),
            clock: Clock::new(3, TimeOfDay::Evening).expect("clock"),
            present: vec!["Lyra".to_string()],
        }
    }

    fn store() -> SnapshotStore {
        SnapshotStore::open_in_memory(&PersistenceConfig::default()).expect("open")
    }

    #[test]
    fn round_trip_and_overwrite() {
        let store = store();
        store.save_record("narrator/a", &scene()).expect("save");
        let mut changed = scene();
        changed.present.push("Kael".to_string());
        store.save_record("narrator/a", &changed).expect("save");

        let loaded: Scene = store.load_record("narrator/a").expect("load").expect("some");
        assert_eq!(loaded, changed);
    }

    #[test]
    fn missing_key_is_none() {
        let loaded: Option<Scene> = store().load_record("nope").expect("load");
        assert!(loaded.is_none());
    }

    #[test]
    fn failed_batch_writes_nothing() {
        let store = store();
        store.save_record("registry", &1).expect("seed");
        store
            .conn
            .lock()
            .execute_batch(
                "CREATE TRIGGER reject_registry BEFORE INSERT ON snapshots
                 WHEN NEW.key = 'registry'
                 BEGIN SELECT RAISE(ABORT, 'rejected'); END;",
            )
            .expect("trigger");

        let batch = SnapshotBatch::new()
            .put("pool", &scene())
            .and_then(|b| b.put("registry", &2))
            .expect("encode");
        assert_eq!(batch.len(), 2);
        assert!(store.save_records(batch).is_err());

        assert!(store.load_record::<Scene>("pool").expect("load").is_none());
        assert_eq!(store.load_record::<i32>("registry").expect("load"), Some(1));
    }

    #[test]
    fn long_term_rows_are_per_owner_and_upserted() {
        let store = store();
        let evening = Clock::new(3, TimeOfDay::Evening).expect("clock");
        store
            .save_long_term("Lyra", &LongTermRecord::at(&Clock::default(), "met the guest"))
            .expect("save");
        store
            .save_long_term("Lyra", &LongTermRecord::at(&evening, "first draft"))
            .expect("save");
        store
            .save_long_term("Lyra", &LongTermRecord::at(&evening, "sang by the fire"))
            .expect("overwrite");
        store
            .save_long_term("Kael", &LongTermRecord::at(&evening, "kept watch"))
            .expect("save");

        let lyra = store.load_long_term("Lyra").expect("load");
        let summaries: Vec<_> = lyra.iter().map(|r| r.summary.as_str()).collect();
        assert_eq!(summaries, ["met the guest", "sang by the fire"]);

        assert_eq!(store.delete_long_term("Lyra").expect("delete"), 2);
        assert!(store.load_long_term("Lyra").expect("load").is_empty());
        assert_eq!(store.load_long_term("Kael").expect("load").len(), 1);
    }

    #[test]
    fn checksum_mismatch_still_loads() {
        let store = store();
        store.save_record("k", &scene()).expect("save");
        store
            .conn
            .lock()
            .execute("UPDATE snapshots SET checksum = 'deadbeef' WHERE key = 'k'", [])
            .expect("corrupt");
        let loaded: Scene = store.load_record("k").expect("load").expect("some");
        assert_eq!(loaded, scene());
    }

    #[test]
    fn type_mismatch_is_serialization_error() {
        let store = store();
        store.save_record("k", &"just a string").expect("save");
        let err = store.load_record::<Scene>("k").expect_err("wrong shape");
        assert!(matches!(err, ChorusError::Serialization(_)));
    }

    #[test]
    fn file_store_backup_and_rotation() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = PersistenceConfig {
            backup_count: 2,
            ..PersistenceConfig::default()
        };
        let store = SnapshotStore::open(dir.path().join("chorus.db"), &config).expect("open");
        store.save_record("k", &scene()).expect("save");
        store
            .save_long_term("Lyra", &LongTermRecord::at(&Clock::default(), "hello"))
            .expect("save");

        for _ in 0..3 {
            store.backup_rotating().expect("backup");
        }
        assert!(dir.path().join("chorus.db.bak.1").exists());
        assert!(dir.path().join("chorus.db.bak.2").exists());
        assert!(!dir.path().join("chorus.db.bak.3").exists());

        let restored = SnapshotStore::open(dir.path().join("chorus.db.bak.1"), &config)
            .expect("open backup");
        let loaded: Scene = restored.load_record("k").expect("load").expect("some");
        assert_eq!(loaded, scene());
        assert_eq!(restored.load_long_term("Lyra").expect("load").len(), 1);
    }

    #[test]
    fn unreadable_file_is_rejected_on_open() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("chorus.db");
        std::fs::write(&path, vec![0x5a; 4096]).expect("write");
        assert!(SnapshotStore::open(&path, &PersistenceConfig::default()).is_err());
    }

    #[test]
    fn crc32_known_vector() {
        assert_eq!(crc32_hex(b"123456789"), "cbf43926");
    }
}
