//! Moving backups between the phone and the local workspace.

use crate::restore::RESTORE_DIR;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("device unavailable: {0}")]
    DeviceUnavailable(String),
    #[error("transfer failed: {0}")]
    TransferFailed(String),
}

#[async_trait]
pub trait DeviceTransport: Send + Sync {
    /// Copies the newest backup on the device under `dest` and returns the
    /// local backup root (the directory holding `Data/`).
    async fn pull_latest_backup(&self, dest: &Path) -> Result<PathBuf, TransportError>;

    /// Pushes a patched `Data/<ts>/Layout` directory back. Returns the number
    /// of files sent.
    async fn push_backup(&self, layout_dir: &Path) -> Result<usize, TransportError>;
}

pub const DEFAULT_REMOTE_ROOTS: [&str; 2] = [
    "/storage/emulated/0/Android/data/com.coloros.backuprestore/Backup",
    "/storage/emulated/0/Android/data/com.oneplus.backuprestore/Backup",
];

#[derive(Debug, Clone)]
pub struct AdbTransport {
    adb: PathBuf,
    serial: Option<String>,
    remote_roots: Vec<String>,
    timeout: Duration,
}

impl AdbTransport {
    pub fn new(adb: impl Into<PathBuf>) -> Self {
        Self {
            adb: adb.into(),
            serial: None,
            remote_roots: DEFAULT_REMOTE_ROOTS.iter().map(|s| s.to_string()).collect(),
            timeout: Duration::from_secs(60),
        }
    }

    pub fn with_serial(mut self, serial: Option<String>) -> Self {
        self.serial = serial.filter(|s| !s.trim().is_empty());
        self
    }

    pub fn with_remote_roots(mut self, roots: Vec<String>) -> Self {
        if !roots.is_empty() {
            self.remote_roots = roots;
        }
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn run(&self, args: &[&str]) -> Result<Output, TransportError> {
        let mut command = Command::new(&self.adb);
        if let Some(serial) = &self.serial {
            command.arg("-s").arg(serial);
        }
        command.args(args);
        command.stdout(Stdio::piped());
        command.stderr(Stdio::piped());
        command.kill_on_drop(true);

        let child = command.spawn().map_err(|e| {
            TransportError::DeviceUnavailable(format!("cannot run {}: {e}", self.adb.display()))
        })?;
        match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result.map_err(|e| TransportError::TransferFailed(e.to_string())),
            Err(_) => Err(TransportError::TransferFailed(format!(
                "adb {} timed out after {:?}",
                args.first().unwrap_or(&""),
                self.timeout
            ))),
        }
    }

    async fn shell(&self, cmd: &str) -> Result<Option<String>, TransportError> {
        let output = self.run(&["shell", cmd]).await?;
        if !output.status.success() {
            return Ok(None);
        }
        Ok(Some(String::from_utf8_lossy(&output.stdout).into_owned()))
    }

    async fn ensure_device(&self) -> Result<(), TransportError> {
        let output = self.run(&["get-state"]).await?;
        let state = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if output.status.success() && state == "device" {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        Err(TransportError::DeviceUnavailable(if stderr.is_empty() {
            format!("device state '{state}'")
        } else {
            stderr
        }))
    }

    /// First remote root holding `Data/<stamp>/Layout`, newest stamp when
    /// `stamp` is `None`.
    async fn find_remote(&self, stamp: Option<&str>) -> Result<(String, String), TransportError> {
        for root in &self.remote_roots {
            let Some(listing) = self.shell(&format!("ls {root}/Data/ 2>/dev/null")).await? else {
                continue;
            };
            let candidate = match stamp {
                Some(s) => listing.lines().any(|l| l.trim() == s).then(|| s.to_string()),
                None => newest_stamp(&listing).map(str::to_string),
            };
            let Some(ts) = candidate else { continue };
            let layout = self
                .shell(&format!("ls {root}/Data/{ts}/Layout/ 2>/dev/null"))
                .await?;
            if layout.is_some_and(|l| !l.trim().is_empty()) {
                debug!(root = %root, stamp = %ts, "found device backup");
                return Ok((root.clone(), ts));
            }
        }
        Err(TransportError::TransferFailed(match stamp {
            Some(s) => format!("backup {s} not found on device"),
            None => "no backup found on device".to_string(),
        }))
    }
}

pub fn newest_stamp(listing: &str) -> Option<&str> {
    listing
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .max()
}

fn relative_remote<'a>(root: &str, remote: &'a str) -> Option<&'a str> {
    let rel = remote.strip_prefix(root)?.trim_start_matches('/');
    (!rel.is_empty() && !rel.split('/').any(|c| c == "..")).then_some(rel)
}

/// Top-level files of a layout directory that belong on the device.
pub fn pushable_files(layout_dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(layout_dir)?
        .filter_map(Result::ok)
        .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
        .filter(|e| {
            let name = e.file_name().to_string_lossy().into_owned();
            !name.starts_with(".regroup") && name != RESTORE_DIR
        })
        .map(|e| e.path())
        .collect();
    files.sort();
    Ok(files)
}

#[async_trait]
impl DeviceTransport for AdbTransport {
    async fn pull_latest_backup(&self, dest: &Path) -> Result<PathBuf, TransportError> {
        self.ensure_device().await?;
        let (root, stamp) = self.find_remote(None).await?;
        info!(root = %root, stamp = %stamp, "pulling backup");

        // Files are often only readable after this; failure is fine.
        let _ = self.shell(&format!("chmod -R a+r {root}/ 2>/dev/null")).await?;
        let listing = self
            .shell(&format!("find {root}/ -type f 2>/dev/null"))
            .await?
            .ok_or_else(|| TransportError::TransferFailed(format!("cannot list {root}")))?;

        let local_root = dest.join("Backup");
        let mut pulled = 0usize;
        let mut skipped = 0usize;
        for remote in listing.lines().map(str::trim).filter(|l| !l.is_empty()) {
            let Some(rel) = relative_remote(&root, remote) else {
                continue;
            };
            let local = local_root.join(rel);
            if let Some(parent) = local.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| TransportError::TransferFailed(format!("{}: {e}", parent.display())))?;
            }
            let local_arg = local.to_string_lossy().into_owned();
            let output = self.run(&["pull", remote, local_arg.as_str()]).await?;
            if output.status.success() {
                pulled += 1;
            } else if remote.ends_with("-journal") || remote.ends_with(".nomedia") {
                // unreadable but always empty
                std::fs::write(&local, b"")
                    .map_err(|e| TransportError::TransferFailed(format!("{}: {e}", local.display())))?;
                pulled += 1;
            } else {
                warn!(path = %remote, "could not pull file, skipped");
                skipped += 1;
            }
        }
        if pulled == 0 {
            return Err(TransportError::TransferFailed(format!(
                "nothing could be pulled from {root}"
            )));
        }
        info!(pulled, skipped, dest = %local_root.display(), "backup pulled");
        Ok(local_root)
    }

    async fn push_backup(&self, layout_dir: &Path) -> Result<usize, TransportError> {
        let stamp = layout_dir
            .parent()
            .and_then(Path::file_name)
            .map(|s| s.to_string_lossy().into_owned())
            .ok_or_else(|| {
                TransportError::TransferFailed(format!(
                    "{} is not a Data/<timestamp>/Layout directory",
                    layout_dir.display()
                ))
            })?;
        let files = pushable_files(layout_dir)
            .map_err(|e| TransportError::TransferFailed(format!("{}: {e}", layout_dir.display())))?;
        if files.is_empty() {
            return Err(TransportError::TransferFailed(format!(
                "no files to push in {}",
                layout_dir.display()
            )));
        }

        self.ensure_device().await?;
        let (root, stamp) = self.find_remote(Some(&stamp)).await?;
        let remote_dir = format!("{root}/Data/{stamp}/Layout");
        for file in &files {
            let name = file
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let local_arg = file.to_string_lossy().into_owned();
            let remote = format!("{remote_dir}/{name}");
            let output = self.run(&["push", local_arg.as_str(), remote.as_str()]).await?;
            if !output.status.success() {
                return Err(TransportError::TransferFailed(format!(
                    "push {name}: {}",
                    String::from_utf8_lossy(&output.stderr).trim()
                )));
            }
            debug!(file = %name, "pushed");
        }
        info!(files = files.len(), remote = %remote_dir, "layout pushed");
        Ok(files.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn newest_stamp_is_lexically_greatest() {
        let listing = "20240101_120000\n20250301_090000\n\n20241231_235959\n";
        assert_eq!(newest_stamp(listing), Some("20250301_090000"));
        assert_eq!(newest_stamp("\n"), None);
    }

    #[test]
    fn remote_paths_stay_under_root() {
        let root = "/sdcard/Backup";
        assert_eq!(
            relative_remote(root, "/sdcard/Backup/Data/1/Layout/a.xml"),
            Some("Data/1/Layout/a.xml")
        );
        assert_eq!(relative_remote(root, "/other/x"), None);
        assert_eq!(relative_remote(root, "/sdcard/Backup/../x"), None);
    }

    #[test]
    fn push_skips_restore_and_unpacked_data() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("launcher_layout.xml"), "<LAYOUT/>").unwrap();
        std::fs::write(dir.path().join("com.android.launcher.tar"), b"tar").unwrap();
        std::fs::create_dir_all(dir.path().join(RESTORE_DIR)).unwrap();
        std::fs::create_dir_all(dir.path().join("data/x")).unwrap();
        std::fs::write(dir.path().join(".regroup-staging-1"), b"").unwrap();
        let files = pushable_files(dir.path()).unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["com.android.launcher.tar", "launcher_layout.xml"]);
    }

    #[tokio::test]
    async fn missing_adb_is_device_unavailable() {
        let transport = AdbTransport::new("/nonexistent/adb-binary");
        let dir = tempfile::tempdir().unwrap();
        let err = transport.pull_latest_backup(dir.path()).await.unwrap_err();
        assert!(matches!(err, TransportError::DeviceUnavailable(_)));
    }
}
