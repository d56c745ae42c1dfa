//! Durable classification cache.
//!
//! The cache is the only state that outlives a run. Every write replaces the
//! whole document through a temp file and a rename in the same directory, so
//! an interrupted write leaves the previous file intact.

use crate::models::{CacheStats, ClassificationRecord, Status};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;
use tracing::debug;

const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cache file {path} is corrupt: {reason}")]
    Corrupt { path: PathBuf, reason: String },
    #[error("invalid record for {0}: resolved records need a category")]
    InvalidRecord(String),
    #[error("cache lock poisoned")]
    Poisoned,
}

pub trait ClassificationStore: Send + Sync {
    fn get(&self, identifier: &str) -> Result<Option<ClassificationRecord>, CacheError>;

    /// Upsert. Returns `false` when a newer record for the same identifier
    /// is already stored and the write was ignored.
    fn put(&self, record: ClassificationRecord) -> Result<bool, CacheError>;

    /// All records, ordered by identifier.
    fn all(&self) -> Result<Vec<ClassificationRecord>, CacheError>;

    fn stats(&self) -> Result<CacheStats, CacheError> {
        Ok(CacheStats::from_records(&self.all()?))
    }

    /// Turn an existing record back into `pending`. Returns `false` when the
    /// identifier is unknown.
    fn reset(&self, identifier: &str) -> Result<bool, CacheError> {
        match self.get(identifier)? {
            Some(existing) => {
                let record = ClassificationRecord::pending(identifier)
                    .with_display_name(existing.display_name);
                self.put(record)
            }
            None => Ok(false),
        }
    }
}

fn validate(record: &ClassificationRecord) -> Result<(), CacheError> {
    if record.status == Status::Resolved && record.category.is_none() {
        return Err(CacheError::InvalidRecord(record.identifier.clone()));
    }
    Ok(())
}

/// Applies last-write-wins. Returns the previous value when the map changed.
fn upsert(
    records: &mut BTreeMap<String, ClassificationRecord>,
    record: ClassificationRecord,
) -> Option<Option<ClassificationRecord>> {
    if let Some(existing) = records.get(&record.identifier) {
        if existing.updated_at > record.updated_at {
            return None;
        }
    }
    Some(records.insert(record.identifier.clone(), record))
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<BTreeMap<String, ClassificationRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, BTreeMap<String, ClassificationRecord>>, CacheError> {
        self.records.lock().map_err(|_| CacheError::Poisoned)
    }
}

impl ClassificationStore for MemoryStore {
    fn get(&self, identifier: &str) -> Result<Option<ClassificationRecord>, CacheError> {
        Ok(self.lock()?.get(identifier).cloned())
    }

    fn put(&self, record: ClassificationRecord) -> Result<bool, CacheError> {
        validate(&record)?;
        Ok(upsert(&mut *self.lock()?, record).is_some())
    }

    fn all(&self) -> Result<Vec<ClassificationRecord>, CacheError> {
        Ok(self.lock()?.values().cloned().collect())
    }
}

#[derive(Serialize, Deserialize)]
struct CacheDocument {
    version: u32,
    records: Vec<ClassificationRecord>,
}

/// JSON document on disk, mirrored in memory.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    records: Mutex<BTreeMap<String, ClassificationRecord>>,
}

impl JsonFileStore {
    /// Opens the cache at `path`. A missing file is an empty cache.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let path = path.into();
        let records = match std::fs::read(&path) {
            Ok(bytes) => {
                let doc: CacheDocument =
                    serde_json::from_slice(&bytes).map_err(|e| CacheError::Corrupt {
                        path: path.clone(),
                        reason: e.to_string(),
                    })?;
                if doc.version != FORMAT_VERSION {
                    return Err(CacheError::Corrupt {
                        path,
                        reason: format!("unsupported version {}", doc.version),
                    });
                }
                doc.records
                    .into_iter()
                    .map(|r| (r.identifier.clone(), r))
                    .collect()
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(source) => return Err(CacheError::Io { path, source }),
        };
        debug!(path = %path.display(), records = records.len(), "opened classification cache");
        Ok(Self {
            path,
            records: Mutex::new(records),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> Result<MutexGuard<'_, BTreeMap<String, ClassificationRecord>>, CacheError> {
        self.records.lock().map_err(|_| CacheError::Poisoned)
    }

    fn persist(&self, records: &BTreeMap<String, ClassificationRecord>) -> Result<(), CacheError> {
        let io_err = |source| CacheError::Io {
            path: self.path.clone(),
            source,
        };
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir).map_err(io_err)?;

        let doc = CacheDocument {
            version: FORMAT_VERSION,
            records: records.values().cloned().collect(),
        };
        let bytes = serde_json::to_vec_pretty(&doc).map_err(|e| CacheError::Corrupt {
            path: self.path.clone(),
            reason: e.to_string(),
        })?;

        let mut tmp = tempfile::NamedTempFile::new_in(&dir).map_err(io_err)?;
        tmp.write_all(&bytes).map_err(io_err)?;
        tmp.as_file().sync_all().map_err(io_err)?;
        tmp.persist(&self.path).map_err(|e| io_err(e.error))?;
        Ok(())
    }
}

impl ClassificationStore for JsonFileStore {
    fn get(&self, identifier: &str) -> Result<Option<ClassificationRecord>, CacheError> {
        Ok(self.lock()?.get(identifier).cloned())
    }

    fn put(&self, record: ClassificationRecord) -> Result<bool, CacheError> {
        validate(&record)?;
        let mut records = self.lock()?;
        let key = record.identifier.clone();
        let Some(previous) = upsert(&mut records, record) else {
            return Ok(false);
        };
        if let Err(e) = self.persist(&records) {
            // keep memory in step with the file that is still on disk
            match previous {
                Some(old) => {
                    records.insert(key, old);
                }
                None => {
                    records.remove(&key);
                }
            }
            return Err(e);
        }
        Ok(true)
    }

    fn all(&self) -> Result<Vec<ClassificationRecord>, CacheError> {
        Ok(self.lock()?.values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Category, Source};
    use chrono::Duration;

    #[test]
    fn records_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache").join("classifications.json");
        {
            let store = JsonFileStore::open(&path).unwrap();
            store
                .put(ClassificationRecord::resolved("com.a", Category::Social, Source::Ai))
                .unwrap();
            store
                .put(ClassificationRecord::failed("com.b", Source::RemoteDomestic, "not found"))
                .unwrap();
        }
        let store = JsonFileStore::open(&path).unwrap();
        let all = store.all().unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].identifier, "com.a");
        assert_eq!(all[0].category, Some(Category::Social));
        assert_eq!(all[1].status, Status::Failed);
        // no temp files left next to the cache
        let entries = std::fs::read_dir(path.parent().unwrap()).unwrap().count();
        assert_eq!(entries, 1);
    }

    #[test]
    fn older_write_never_replaces_newer() {
        let store = MemoryStore::new();
        let newer = ClassificationRecord::resolved("com.a", Category::Games, Source::Manual);
        let older = ClassificationRecord::failed("com.a", Source::Ai, "timeout")
            .with_timestamp(newer.updated_at - Duration::seconds(5));
        assert!(store.put(newer).unwrap());
        assert!(!store.put(older).unwrap());
        let got = store.get("com.a").unwrap().unwrap();
        assert_eq!(got.status, Status::Resolved);
    }

    #[test]
    fn resolved_without_category_is_rejected() {
        let store = MemoryStore::new();
        let mut bad = ClassificationRecord::pending("com.a");
        bad.status = Status::Resolved;
        assert!(matches!(store.put(bad), Err(CacheError::InvalidRecord(_))));
        assert!(store.get("com.a").unwrap().is_none());
    }

    #[test]
    fn reset_keeps_name_and_marks_pending() {
        let store = MemoryStore::new();
        store
            .put(ClassificationRecord::skipped("com.a").with_display_name(Some("A".into())))
            .unwrap();
        assert!(store.reset("com.a").unwrap());
        assert!(!store.reset("com.missing").unwrap());
        let got = store.get("com.a").unwrap().unwrap();
        assert_eq!(got.status, Status::Pending);
        assert_eq!(got.display_name.as_deref(), Some("A"));
    }

    #[test]
    fn corrupt_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("classifications.json");
        std::fs::write(&path, b"{ not json").unwrap();
        assert!(matches!(
            JsonFileStore::open(&path),
            Err(CacheError::Corrupt { .. })
        ));
    }
}
