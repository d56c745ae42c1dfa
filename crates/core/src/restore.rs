//! Restore point: byte copies of every snapshot file, taken before the first
//! layout write and kept until restored or explicitly discarded.

use crate::error::EngineError;
use crate::snapshot::BackupSnapshot;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub const RESTORE_DIR: &str = ".regroup-restore";
const MANIFEST: &str = "manifest.json";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ManifestEntry {
    /// Path relative to the layout directory.
    pub path: PathBuf,
    pub size: u64,
    pub blake3: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub created_at: DateTime<Utc>,
    pub files: Vec<ManifestEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RestoreReport {
    pub restored: Vec<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct RestorePoint {
    root: PathBuf,
    dir: PathBuf,
}

fn hash_file(path: &Path) -> Result<(u64, String), EngineError> {
    let bytes = std::fs::read(path).map_err(EngineError::io(path))?;
    Ok((bytes.len() as u64, blake3::hash(&bytes).to_hex().to_string()))
}

impl RestorePoint {
    pub fn for_snapshot(snapshot: &BackupSnapshot) -> Self {
        Self::at(&snapshot.root)
    }

    pub fn at(layout_dir: &Path) -> Self {
        Self {
            root: layout_dir.to_path_buf(),
            dir: layout_dir.join(RESTORE_DIR),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn exists(&self) -> bool {
        self.dir.join(MANIFEST).is_file()
    }

    pub fn manifest(&self) -> Result<Manifest, EngineError> {
        if !self.exists() {
            return Err(EngineError::RestorePointMissing(self.root.clone()));
        }
        let path = self.dir.join(MANIFEST);
        let bytes = std::fs::read(&path).map_err(EngineError::io(&path))?;
        serde_json::from_slice(&bytes)
            .map_err(|e| EngineError::CorruptSnapshot(format!("restore manifest: {e}")))
    }

    /// Retained copy of a snapshot file, if the restore point holds one.
    pub fn copy_of(&self, original: &Path) -> Option<PathBuf> {
        let rel = original.strip_prefix(&self.root).ok()?;
        let copy = self.dir.join(rel);
        copy.is_file().then_some(copy)
    }

    /// Creates the restore point unless one already exists. Returns `true`
    /// when a new one was written.
    pub fn ensure(&self, snapshot: &BackupSnapshot) -> Result<bool, EngineError> {
        if self.exists() {
            return Ok(false);
        }
        // Populate a sibling temp dir, then rename it into place, so a crash
        // never leaves a half-filled restore point that looks valid.
        let staging = tempfile::Builder::new()
            .prefix(".regroup-restore-")
            .tempdir_in(&self.root)
            .map_err(EngineError::io(&self.root))?;

        let mut files = Vec::new();
        for original in snapshot.files() {
            let rel = snapshot.relative(original).to_path_buf();
            let target = staging.path().join(&rel);
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent).map_err(EngineError::io(parent))?;
            }
            std::fs::copy(original, &target).map_err(EngineError::io(original))?;
            let (size, blake3) = hash_file(&target)?;
            files.push(ManifestEntry {
                path: rel,
                size,
                blake3,
            });
        }
        let manifest = Manifest {
            created_at: Utc::now(),
            files,
        };
        let manifest_path = staging.path().join(MANIFEST);
        let body = serde_json::to_vec_pretty(&manifest)
            .map_err(|e| EngineError::CorruptSnapshot(e.to_string()))?;
        std::fs::write(&manifest_path, body).map_err(EngineError::io(&manifest_path))?;

        if self.dir.exists() {
            // leftover without a manifest
            std::fs::remove_dir_all(&self.dir).map_err(EngineError::io(&self.dir))?;
        }
        let staged = staging.into_path();
        std::fs::rename(&staged, &self.dir).map_err(EngineError::io(&self.dir))?;
        info!(dir = %self.dir.display(), files = manifest.files.len(), "restore point created");
        Ok(true)
    }

    /// Puts every retained file back over the live snapshot.
    pub fn restore(&self) -> Result<RestoreReport, EngineError> {
        let manifest = self.manifest()?;
        // verify every copy before touching anything
        for entry in &manifest.files {
            let copy = self.dir.join(&entry.path);
            let (size, hash) = hash_file(&copy)?;
            if size != entry.size || hash != entry.blake3 {
                return Err(EngineError::CorruptSnapshot(format!(
                    "restore copy {} does not match its manifest",
                    entry.path.display()
                )));
            }
        }
        let mut restored = Vec::new();
        for entry in &manifest.files {
            let copy = self.dir.join(&entry.path);
            let target = self.root.join(&entry.path);
            replace_file(&copy, &target)?;
            restored.push(target);
        }
        // a leftover sqlite journal would be replayed over the restored file
        for target in &restored {
            let journal = journal_path(target);
            if journal.exists() {
                if let Err(e) = std::fs::remove_file(&journal) {
                    warn!(path = %journal.display(), error = %e, "could not remove stale journal");
                }
            }
        }
        info!(files = restored.len(), "snapshot restored");
        Ok(RestoreReport { restored })
    }

    pub fn discard(&self) -> Result<bool, EngineError> {
        if !self.dir.exists() {
            return Ok(false);
        }
        std::fs::remove_dir_all(&self.dir).map_err(EngineError::io(&self.dir))?;
        info!(dir = %self.dir.display(), "restore point discarded");
        Ok(true)
    }
}

pub(crate) fn journal_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push("-journal");
    PathBuf::from(name)
}

/// Copies `from` over `to` through a temp file in `to`'s directory.
pub(crate) fn replace_file(from: &Path, to: &Path) -> Result<(), EngineError> {
    let dir = to.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir).map_err(EngineError::io(dir))?;
    let bytes = std::fs::read(from).map_err(EngineError::io(from))?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(EngineError::io(dir))?;
    tmp.write_all(&bytes).map_err(EngineError::io(to))?;
    tmp.as_file().sync_all().map_err(EngineError::io(to))?;
    tmp.persist(to).map_err(|e| EngineError::Io {
        path: to.to_path_buf(),
        source: e.error,
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::{DATABASE, LAYOUT_XML};

    fn snapshot(dir: &Path) -> BackupSnapshot {
        let db_dir = dir.join("data/user_de/0/com.android.launcher/databases");
        std::fs::create_dir_all(&db_dir).unwrap();
        std::fs::write(db_dir.join(DATABASE), b"db-original").unwrap();
        std::fs::write(dir.join(LAYOUT_XML), b"<LAYOUT/>").unwrap();
        BackupSnapshot::locate(dir).unwrap()
    }

    #[test]
    fn restore_without_point_is_missing() {
        let dir = tempfile::tempdir().unwrap();
        let point = RestorePoint::at(dir.path());
        assert!(matches!(
            point.restore(),
            Err(EngineError::RestorePointMissing(_))
        ));
    }

    #[test]
    fn ensure_is_created_once_and_restores_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let snap = snapshot(dir.path());
        let point = RestorePoint::for_snapshot(&snap);
        assert!(point.ensure(&snap).unwrap());

        std::fs::write(&snap.database, b"db-changed").unwrap();
        std::fs::write(&snap.layout_xml, b"<LAYOUT changed=\"1\"/>").unwrap();
        // a second ensure keeps the first copy
        assert!(!point.ensure(&snap).unwrap());

        let report = point.restore().unwrap();
        assert_eq!(report.restored.len(), 2);
        assert_eq!(std::fs::read(&snap.database).unwrap(), b"db-original");
        assert_eq!(std::fs::read(&snap.layout_xml).unwrap(), b"<LAYOUT/>");
        assert_eq!(point.copy_of(&snap.database).is_some(), true);
    }

    #[test]
    fn tampered_copy_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let snap = snapshot(dir.path());
        let point = RestorePoint::for_snapshot(&snap);
        point.ensure(&snap).unwrap();
        let copy = point.copy_of(&snap.layout_xml).unwrap();
        std::fs::write(copy, b"tampered").unwrap();
        assert!(matches!(point.restore(), Err(EngineError::CorruptSnapshot(_))));
        assert!(point.discard().unwrap());
        assert!(!point.exists());
    }
}
