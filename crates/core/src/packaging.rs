//! Launcher archive (`com.android.launcher.tar`) unpack and re-seal.

use crate::error::EngineError;
use crate::restore::RestorePoint;
use crate::snapshot::{BackupSnapshot, ARCHIVE, UNPACKED_DIR};
use std::fs::File;
use std::io::{self, Write};
use std::path::{Component, Path, PathBuf};
use tar::{Archive, Builder, EntryType, Header};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum PackagingError {
    #[error("archive {} not found", .0.display())]
    MissingArchive(PathBuf),
    #[error("archive entry {0} escapes the layout directory")]
    UnsafeEntry(String),
    #[error("reading archive {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("writing archive {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

fn read_err(path: &Path) -> impl FnOnce(io::Error) -> PackagingError + '_ {
    move |source| PackagingError::Read {
        path: path.to_path_buf(),
        source,
    }
}

fn write_err(path: &Path) -> impl FnOnce(io::Error) -> PackagingError + '_ {
    move |source| PackagingError::Write {
        path: path.to_path_buf(),
        source,
    }
}

pub trait ArchivePackaging: Send + Sync {
    /// Makes the layout directory's database and XML available on disk.
    fn unpack(&self, layout_dir: &Path) -> Result<BackupSnapshot, EngineError>;

    /// Seals the (possibly edited) snapshot back into its archive. Returns
    /// the archive path, or `None` when the snapshot never had one.
    fn repack(&self, snapshot: &BackupSnapshot) -> Result<Option<PathBuf>, EngineError>;
}

#[derive(Debug, Clone, Default)]
pub struct LauncherTar;

struct Member {
    path: PathBuf,
    kind: EntryType,
    mtime: u64,
    link: Option<PathBuf>,
}

fn safe_relative(path: &Path) -> Result<(), PackagingError> {
    let escapes = path
        .components()
        .any(|c| matches!(c, Component::ParentDir | Component::RootDir | Component::Prefix(_)));
    if escapes {
        return Err(PackagingError::UnsafeEntry(path.display().to_string()));
    }
    Ok(())
}

impl LauncherTar {
    fn extract(archive_path: &Path, layout_dir: &Path) -> Result<usize, PackagingError> {
        let file = File::open(archive_path).map_err(read_err(archive_path))?;
        let mut archive = Archive::new(file);
        let mut files = 0;
        for entry in archive.entries().map_err(read_err(archive_path))? {
            let mut entry = entry.map_err(read_err(archive_path))?;
            let rel = entry.path().map_err(read_err(archive_path))?.into_owned();
            safe_relative(&rel)?;
            let target = layout_dir.join(&rel);
            match entry.header().entry_type() {
                EntryType::Directory => {
                    std::fs::create_dir_all(&target).map_err(write_err(&target))?;
                }
                EntryType::Regular | EntryType::Continuous => {
                    if let Some(parent) = target.parent() {
                        std::fs::create_dir_all(parent).map_err(write_err(parent))?;
                    }
                    // Written with default permissions: device archives carry mode 0.
                    let mut out = File::create(&target).map_err(write_err(&target))?;
                    io::copy(&mut entry, &mut out).map_err(write_err(&target))?;
                    files += 1;
                }
                other => debug!(path = %rel.display(), kind = ?other, "skipping archive entry"),
            }
        }
        Ok(files)
    }

    fn members(path: &Path) -> Result<Vec<Member>, PackagingError> {
        let file = File::open(path).map_err(read_err(path))?;
        let mut archive = Archive::new(file);
        let mut members = Vec::new();
        for entry in archive.entries().map_err(read_err(path))? {
            let entry = entry.map_err(read_err(path))?;
            let header = entry.header();
            members.push(Member {
                path: entry.path().map_err(read_err(path))?.into_owned(),
                kind: header.entry_type(),
                mtime: header.mtime().unwrap_or(0),
                link: entry
                    .link_name()
                    .map_err(read_err(path))?
                    .map(|l| l.into_owned()),
            });
        }
        Ok(members)
    }

    fn build(root: &Path, members: &[Member], out: &File) -> Result<(), PackagingError> {
        let mut builder = Builder::new(out);
        for member in members {
            let mut header = Header::new_gnu();
            header.set_entry_type(member.kind);
            header.set_mode(0);
            header.set_uid(0);
            header.set_gid(0);
            header.set_mtime(member.mtime);

            let written = match member.kind {
                EntryType::Directory => {
                    header.set_size(0);
                    builder.append_data(&mut header, &member.path, io::empty())
                }
                EntryType::Regular | EntryType::Continuous => {
                    let local = root.join(&member.path);
                    let Ok(file) = File::open(&local) else {
                        warn!(path = %member.path.display(), "archive member missing locally, skipped");
                        continue;
                    };
                    let len = file.metadata().map_err(read_err(&local))?.len();
                    header.set_size(len);
                    builder.append_data(&mut header, &member.path, file)
                }
                _ => {
                    header.set_size(0);
                    match &member.link {
                        Some(link) => builder.append_link(&mut header, &member.path, link),
                        None => builder.append_data(&mut header, &member.path, io::empty()),
                    }
                }
            };
            written.map_err(write_err(root))?;
        }
        builder.into_inner().map_err(write_err(root))?;
        Ok(())
    }
}

impl ArchivePackaging for LauncherTar {
    fn unpack(&self, layout_dir: &Path) -> Result<BackupSnapshot, EngineError> {
        let data = layout_dir.join(UNPACKED_DIR);
        if data.is_dir() {
            debug!(dir = %data.display(), "archive already unpacked");
        } else {
            let archive = layout_dir.join(ARCHIVE);
            if !archive.is_file() {
                return Err(PackagingError::MissingArchive(archive).into());
            }
            let files = Self::extract(&archive, layout_dir)?;
            info!(archive = %archive.display(), files, "archive unpacked");
        }
        BackupSnapshot::locate(layout_dir)
    }

    fn repack(&self, snapshot: &BackupSnapshot) -> Result<Option<PathBuf>, EngineError> {
        let Some(archive) = snapshot.archive.as_deref() else {
            debug!("snapshot has no archive, nothing to repack");
            return Ok(None);
        };
        // The member list always comes from the untouched archive.
        let template = RestorePoint::for_snapshot(snapshot)
            .copy_of(archive)
            .unwrap_or_else(|| archive.to_path_buf());
        let members = Self::members(&template)?;

        let mut tmp =
            tempfile::NamedTempFile::new_in(&snapshot.root).map_err(write_err(&snapshot.root))?;
        Self::build(&snapshot.root, &members, tmp.as_file())?;
        tmp.flush().map_err(write_err(archive))?;
        tmp.as_file().sync_all().map_err(write_err(archive))?;
        tmp.persist(archive)
            .map_err(|e| PackagingError::Write {
                path: archive.to_path_buf(),
                source: e.error,
            })?;
        info!(archive = %archive.display(), members = members.len(), "archive repacked");
        Ok(Some(archive.to_path_buf()))
    }
}
