//! Locating the files that make up one launcher backup.

use crate::error::EngineError;
use serde::Serialize;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

pub const LAYOUT_XML: &str = "launcher_layout.xml";
pub const DRAWER_XML: &str = "launcher_draw_layout.xml";
pub const ARCHIVE: &str = "com.android.launcher.tar";
pub const DATABASE: &str = "launcher.db";
/// Directory the archive unpacks into.
pub const UNPACKED_DIR: &str = "data";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackupSnapshot {
    /// The backup's `Layout` directory.
    pub root: PathBuf,
    pub database: PathBuf,
    pub layout_xml: PathBuf,
    pub drawer_xml: Option<PathBuf>,
    pub archive: Option<PathBuf>,
}

impl BackupSnapshot {
    /// Finds the database and XML mirrors under an (already unpacked) layout
    /// directory.
    pub fn locate(root: impl Into<PathBuf>) -> Result<Self, EngineError> {
        let root = root.into();
        let layout_xml = root.join(LAYOUT_XML);
        if !layout_xml.is_file() {
            return Err(EngineError::CorruptSnapshot(format!(
                "{} not found",
                layout_xml.display()
            )));
        }
        let database = find_database(&root).ok_or_else(|| {
            EngineError::CorruptSnapshot(format!(
                "{DATABASE} not found under {}",
                root.join(UNPACKED_DIR).display()
            ))
        })?;
        let drawer_xml = Some(root.join(DRAWER_XML)).filter(|p| p.is_file());
        let archive = Some(root.join(ARCHIVE)).filter(|p| p.is_file());
        Ok(Self {
            root,
            database,
            layout_xml,
            drawer_xml,
            archive,
        })
    }

    /// XML mirrors present in this snapshot, main layout first.
    pub fn xml_files(&self) -> Vec<&Path> {
        let mut out = vec![self.layout_xml.as_path()];
        if let Some(d) = &self.drawer_xml {
            out.push(d);
        }
        out
    }

    /// Every file a layout write touches or a restore puts back.
    pub fn files(&self) -> Vec<&Path> {
        let mut out = vec![self.database.as_path()];
        out.extend(self.xml_files());
        if let Some(a) = &self.archive {
            out.push(a);
        }
        out
    }

    pub fn relative<'a>(&self, path: &'a Path) -> &'a Path {
        path.strip_prefix(&self.root).unwrap_or(path)
    }
}

fn find_database(root: &Path) -> Option<PathBuf> {
    let mut found: Vec<PathBuf> = WalkDir::new(root.join(UNPACKED_DIR))
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file() && e.file_name() == DATABASE)
        .map(|e| e.into_path())
        .collect();
    found.sort();
    found.into_iter().next()
}

/// `<backup_root>/Data/<newest>/Layout`. Backup folders are named by
/// timestamp, so the lexically greatest is the newest.
pub fn latest_layout_dir(backup_root: &Path) -> Result<PathBuf, EngineError> {
    let data = backup_root.join("Data");
    let entries = std::fs::read_dir(&data).map_err(EngineError::io(&data))?;
    let mut stamps: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .map(|e| e.path())
        .filter(|p| p.join("Layout").is_dir())
        .collect();
    stamps.sort();
    stamps
        .pop()
        .map(|p| p.join("Layout"))
        .ok_or_else(|| {
            EngineError::CorruptSnapshot(format!("no Data/<timestamp>/Layout under {}", data.display()))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn picks_newest_backup() {
        let dir = tempfile::tempdir().unwrap();
        for stamp in ["20240101_120000", "20250301_090000", "20241231_235959"] {
            std::fs::create_dir_all(dir.path().join("Data").join(stamp).join("Layout")).unwrap();
        }
        std::fs::create_dir_all(dir.path().join("Data").join("zz_no_layout")).unwrap();
        let layout = latest_layout_dir(dir.path()).unwrap();
        assert!(layout.ends_with("Data/20250301_090000/Layout"));
    }

    #[test]
    fn missing_pieces_are_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            BackupSnapshot::locate(dir.path()),
            Err(EngineError::CorruptSnapshot(_))
        ));
        std::fs::write(dir.path().join(LAYOUT_XML), "<LAYOUT/>").unwrap();
        assert!(matches!(
            BackupSnapshot::locate(dir.path()),
            Err(EngineError::CorruptSnapshot(_))
        ));
        let db_dir = dir.path().join("data/user_de/0/com.android.launcher/databases");
        std::fs::create_dir_all(&db_dir).unwrap();
        std::fs::write(db_dir.join(DATABASE), b"").unwrap();
        let snap = BackupSnapshot::locate(dir.path()).unwrap();
        assert_eq!(snap.database, db_dir.join(DATABASE));
        assert!(snap.drawer_xml.is_none());
        assert_eq!(snap.files().len(), 2);
    }
}
