// Copyright 2026 Sift Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Persistent embeddings cache: one SQLite file holding documents, metadata,
//! little-endian f32 vectors and the set of ingested source identifiers.

use std::collections::BTreeSet;
use std::fs;
use std::fs::File;
use std::fs::OpenOptions;
use std::path::Path;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::thread::sleep;
use std::time::Duration;
use std::time::Instant;

use fs2::FileExt;
use rusqlite::Connection;
use rusqlite::OpenFlags;
use rusqlite::OptionalExtension;
use rusqlite::params;
use sha2::Digest;
use sha2::Sha256;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::embed::from_bytes;
use crate::embed::to_bytes;
use crate::error::EngineError;
use crate::error::Result;
use crate::model::Metadata;

const SCHEMA_VERSION: i64 = 1;
const LOCK_TIMEOUT: Duration = Duration::from_millis(5000);

pub type CachedRow = (String, Metadata, Vec<f32>);

#[derive(Debug, Default)]
pub struct CacheBundle {
    pub rows: Vec<CachedRow>,
    pub sources: BTreeSet<String>,
}

#[derive(Debug, Clone, Copy)]
enum LockMode {
    Shared,
    Exclusive,
}

struct CacheLock {
    _file: File,
}

impl CacheLock {
    fn lock_path_for(path: &Path) -> Result<PathBuf> {
        let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        let mut hasher = Sha256::new();
        hasher.update(canonical.to_string_lossy().as_bytes());
        let hash = hex::encode(hasher.finalize());
        let dir = std::env::temp_dir().join("sift");
        fs::create_dir_all(&dir)?;
        Ok(dir.join(format!("sift-{hash}.lock")))
    }

    fn acquire(path: &Path, mode: LockMode) -> Result<Self> {
        Self::acquire_within(path, mode, LOCK_TIMEOUT)
    }

    fn acquire_within(path: &Path, mode: LockMode, timeout: Duration) -> Result<Self> {
        let lock_path = Self::lock_path_for(path)?;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)?;
        let deadline = Instant::now() + timeout;
        loop {
            // std's inherent File::try_lock_* would shadow the fs2 methods.
            let locked = match mode {
                LockMode::Shared => FileExt::try_lock_shared(&file),
                LockMode::Exclusive => FileExt::try_lock_exclusive(&file),
            };
            match locked {
                Ok(()) => return Ok(Self { _file: file }),
                Err(_) if Instant::now() >= deadline => {
                    return Err(EngineError::cache(
                        path,
                        "cache is locked; another process may be writing it",
                    ));
                }
                Err(_) => sleep(Duration::from_millis(50)),
            }
        }
    }
}

pub struct EmbeddingCache {
    path: PathBuf,
    model: String,
    dim: usize,
    stale: AtomicBool,
}

impl EmbeddingCache {
    pub fn new(path: impl Into<PathBuf>, model: &str, dim: usize) -> Self {
        Self {
            path: path.into(),
            model: model.to_string(),
            dim,
            stale: AtomicBool::new(false),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the cached corpus. An unreadable, malformed or mismatched file
    /// yields an empty bundle and is replaced on the next write.
    pub fn load(&self) -> CacheBundle {
        match self.try_load() {
            Ok(Some(bundle)) => {
                tracing::debug!(
                    path = %self.path.display(),
                    documents = bundle.rows.len(),
                    sources = bundle.sources.len(),
                    "loaded embeddings cache"
                );
                bundle
            }
            Ok(None) => CacheBundle::default(),
            Err(err) => {
                tracing::warn!(path = %self.path.display(), error = %err, "embeddings cache unusable; starting empty");
                self.mark_stale();
                CacheBundle::default()
            }
        }
    }

    /// Forces the next write to recreate the file from scratch.
    pub fn mark_stale(&self) {
        self.stale.store(true, Ordering::SeqCst);
    }

    fn try_load(&self) -> Result<Option<CacheBundle>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let _lock = CacheLock::acquire(&self.path, LockMode::Shared)?;
        let conn = self.open(OpenFlags::SQLITE_OPEN_READ_ONLY)?;
        self.check_meta(&conn)?;

        let mut rows = Vec::new();
        let mut stmt = conn
            .prepare("SELECT text, metadata, embedding FROM document ORDER BY idx ASC")
            .map_err(|err| EngineError::cache(&self.path, err))?;
        let mapped = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Option<String>>(1)?,
                    row.get::<_, Vec<u8>>(2)?,
                ))
            })
            .map_err(|err| EngineError::cache(&self.path, err))?;
        for row in mapped {
            let (text, meta_json, blob) = row.map_err(|err| EngineError::cache(&self.path, err))?;
            if blob.len() != self.dim * 4 {
                return Err(EngineError::CorpusCorrupted(format!(
                    "cached embedding has {} bytes, expected {}",
                    blob.len(),
                    self.dim * 4
                )));
            }
            let metadata = match meta_json.as_deref() {
                None | Some("") => Metadata::new(),
                Some(json) => serde_json::from_str(json).map_err(|err| {
                    EngineError::CorpusCorrupted(format!("cached metadata is not a JSON object: {err}"))
                })?,
            };
            rows.push((text, metadata, from_bytes(&blob)));
        }

        let mut sources = BTreeSet::new();
        let mut stmt = conn
            .prepare("SELECT id FROM source")
            .map_err(|err| EngineError::cache(&self.path, err))?;
        let mapped = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(|err| EngineError::cache(&self.path, err))?;
        for id in mapped {
            sources.insert(id.map_err(|err| EngineError::cache(&self.path, err))?);
        }
        Ok(Some(CacheBundle { rows, sources }))
    }

    /// Appends rows and records `sources` as ingested. Texts already present
    /// are left untouched.
    pub fn append(&self, rows: &[(&str, &Metadata, &[f32])], sources: &[&str]) -> Result<()> {
        if rows.is_empty() && sources.is_empty() {
            return Ok(());
        }
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let _lock = CacheLock::acquire(&self.path, LockMode::Exclusive)?;
        if self.stale.load(Ordering::SeqCst) {
            self.remove_file()?;
            self.stale.store(false, Ordering::SeqCst);
        }

        let mut conn = self.open_for_write()?;
        if self.has_meta(&conn)?
            && let Err(err) = self.check_meta(&conn)
        {
            tracing::warn!(path = %self.path.display(), error = %err, "replacing mismatched embeddings cache");
            drop(conn);
            self.remove_file()?;
            conn = self.open_for_write()?;
        }

        let tx = conn
            .transaction()
            .map_err(|err| EngineError::cache(&self.path, err))?;
        for (text, metadata, vector) in rows {
            let meta_json = serde_json::to_string(metadata)
                .map_err(|err| EngineError::cache(&self.path, err))?;
            tx.execute(
                "INSERT OR IGNORE INTO document (text, metadata, embedding) VALUES (?1, ?2, ?3)",
                params![text, meta_json, to_bytes(vector)],
            )
            .map_err(|err| EngineError::cache(&self.path, err))?;
        }
        let now = now_rfc3339();
        for &source in sources {
            tx.execute(
                "INSERT OR IGNORE INTO source (id, added_at) VALUES (?1, ?2)",
                params![source, now],
            )
            .map_err(|err| EngineError::cache(&self.path, err))?;
        }
        set_meta(&tx, "model", &self.model).map_err(|err| EngineError::cache(&self.path, err))?;
        set_meta(&tx, "dim", &self.dim.to_string()).map_err(|err| EngineError::cache(&self.path, err))?;
        set_meta(&tx, "schema_version", &SCHEMA_VERSION.to_string())
            .map_err(|err| EngineError::cache(&self.path, err))?;
        set_meta(&tx, "updated_at", &now).map_err(|err| EngineError::cache(&self.path, err))?;
        tx.commit().map_err(|err| EngineError::cache(&self.path, err))?;
        Ok(())
    }

    pub fn clear(&self) -> Result<()> {
        let _lock = CacheLock::acquire(&self.path, LockMode::Exclusive)?;
        self.stale.store(false, Ordering::SeqCst);
        self.remove_file()
    }

    fn remove_file(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    fn open(&self, flags: OpenFlags) -> Result<Connection> {
        let conn = Connection::open_with_flags(&self.path, flags)
            .map_err(|err| EngineError::cache(&self.path, err))?;
        conn.busy_timeout(LOCK_TIMEOUT)
            .map_err(|err| EngineError::cache(&self.path, err))?;
        Ok(conn)
    }

    fn open_for_write(&self) -> Result<Connection> {
        let conn = self.open(OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE)?;
        conn.execute_batch(
            "PRAGMA journal_mode=DELETE;
PRAGMA synchronous=NORMAL;
CREATE TABLE IF NOT EXISTS meta (
  key TEXT PRIMARY KEY,
  value TEXT
);
CREATE TABLE IF NOT EXISTS document (
  idx INTEGER PRIMARY KEY,
  text TEXT NOT NULL UNIQUE,
  metadata TEXT,
  embedding BLOB NOT NULL
);
CREATE TABLE IF NOT EXISTS source (
  id TEXT PRIMARY KEY,
  added_at TEXT
);",
        )
        .map_err(|err| EngineError::cache(&self.path, err))?;
        Ok(conn)
    }

    fn has_meta(&self, conn: &Connection) -> Result<bool> {
        Ok(get_meta(conn, "schema_version")
            .map_err(|err| EngineError::cache(&self.path, err))?
            .is_some())
    }

    fn check_meta(&self, conn: &Connection) -> Result<()> {
        let get = |key: &str| get_meta(conn, key).map_err(|err| EngineError::cache(&self.path, err));
        let version = get("schema_version")?
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(0);
        if version != SCHEMA_VERSION {
            return Err(EngineError::CorpusCorrupted(format!(
                "cache schema version {version}, expected {SCHEMA_VERSION}"
            )));
        }
        let model = get("model")?.unwrap_or_default();
        if model != self.model {
            return Err(EngineError::CorpusCorrupted(format!(
                "cache built with model '{model}', engine uses '{}'",
                self.model
            )));
        }
        let dim = get("dim")?.and_then(|v| v.parse::<usize>().ok()).unwrap_or(0);
        if dim != self.dim {
            return Err(EngineError::CorpusCorrupted(format!(
                "cache dimension {dim}, engine uses {}",
                self.dim
            )));
        }
        Ok(())
    }
}

fn get_meta(conn: &Connection, key: &str) -> rusqlite::Result<Option<String>> {
    conn.query_row("SELECT value FROM meta WHERE key = ?1", params![key], |row| row.get(0))
        .optional()
}

fn set_meta(conn: &Connection, key: &str, value: &str) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO meta (key, value) VALUES (?1, ?2)",
        params![key, value],
    )?;
    Ok(())
}

fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| OffsetDateTime::now_utc().unix_timestamp().to_string())
}
