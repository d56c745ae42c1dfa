use anyhow::{Context, Result};
use providers::SourceChain;
use regroup_core::classifier::{ClassificationReport, EnrichReport};
use regroup_core::config::AppConfig;
use regroup_core::models::{ApplicationRecord, CapacityPolicy, UnresolvedPolicy};
use regroup_core::packaging::LauncherTar;
use regroup_core::pipeline::{self, ImportReport, LayoutOutcome, RunSummary};
use regroup_core::resolver::{ManualReport, ManualResolver};
use regroup_core::restore::RestoreReport;
use regroup_core::snapshot::{self, BackupSnapshot};
use regroup_core::transport::DeviceTransport;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use storage::CacheStats;
use tracing::info;

/// Unpacks the newest backup and lists its apps in extraction order.
pub async fn extract(config: &AppConfig) -> Result<(BackupSnapshot, Vec<ApplicationRecord>)> {
    let snapshot = pipeline::open_snapshot(&config.workspace.backup_dir, &LauncherTar)?;
    let apps = pipeline::extract_apps(&snapshot).await?;
    Ok((snapshot, apps))
}

pub async fn classify(
    config: &AppConfig,
    ai: bool,
    cancel: Arc<AtomicBool>,
) -> Result<ClassificationReport> {
    let chain = pipeline::build_sources(config, ai)?;
    classify_with(config, &chain, cancel).await
}

pub async fn classify_with(
    config: &AppConfig,
    chain: &SourceChain,
    cancel: Arc<AtomicBool>,
) -> Result<ClassificationReport> {
    let (_, apps) = extract(config).await?;
    let store = pipeline::open_store(config)?;
    let classifier = pipeline::build_classifier(config, store, chain).with_cancel(cancel);
    pipeline::classify(&classifier, &apps).await
}

pub async fn resolve(config: &AppConfig, resolver: &mut dyn ManualResolver) -> Result<ManualReport> {
    let (_, apps) = extract(config).await?;
    let store = pipeline::open_store(config)?;
    pipeline::resolve_manually(store.as_ref(), &apps, resolver).await
}

pub async fn enrich_names(config: &AppConfig, cancel: Arc<AtomicBool>) -> Result<EnrichReport> {
    let chain = pipeline::build_sources(config, false)?;
    enrich_names_with(config, &chain, cancel).await
}

pub async fn enrich_names_with(
    config: &AppConfig,
    chain: &SourceChain,
    cancel: Arc<AtomicBool>,
) -> Result<EnrichReport> {
    let (_, apps) = extract(config).await?;
    let store = pipeline::open_store(config)?;
    let classifier = pipeline::build_classifier(config, store, chain).with_cancel(cancel);
    pipeline::enrich_names(&classifier, &apps).await
}

pub fn stats(config: &AppConfig) -> Result<CacheStats> {
    let store = pipeline::open_store(config)?;
    pipeline::stats(store.as_ref())
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ResetReport {
    pub reset: Vec<String>,
    pub unknown: Vec<String>,
}

pub fn reset(config: &AppConfig, identifiers: &[String]) -> Result<ResetReport> {
    let store = pipeline::open_store(config)?;
    let mut report = ResetReport::default();
    for id in identifiers {
        if store.reset(id).with_context(|| format!("reset {id}"))? {
            report.reset.push(id.clone());
        } else {
            report.unknown.push(id.clone());
        }
    }
    Ok(report)
}

pub fn import(config: &AppConfig, path: &Path) -> Result<ImportReport> {
    let store = pipeline::open_store(config)?;
    pipeline::import_mapping(store.as_ref(), path)
}

/// Command-line overrides for the configured capacity policy.
#[derive(Debug, Clone, Default)]
pub struct PolicyOverrides {
    pub max_apps_per_folder: Option<usize>,
    pub max_folders_per_screen: Option<usize>,
    pub start_screen: Option<i64>,
    pub unresolved: Option<UnresolvedPolicy>,
}

impl PolicyOverrides {
    pub fn apply(&self, mut policy: CapacityPolicy) -> CapacityPolicy {
        if let Some(n) = self.max_apps_per_folder {
            policy.max_apps_per_folder = n;
        }
        if let Some(n) = self.max_folders_per_screen {
            policy.max_folders_per_screen = n;
        }
        if let Some(n) = self.start_screen {
            policy.start_screen = n;
        }
        if let Some(u) = self.unresolved {
            policy.unresolved = u;
        }
        policy
    }
}

pub async fn layout(config: &AppConfig, policy: &CapacityPolicy, dry_run: bool) -> Result<LayoutOutcome> {
    let (snapshot, apps) = extract(config).await?;
    let store = pipeline::open_store(config)?;
    pipeline::generate_layout(&snapshot, &apps, store.as_ref(), policy, &LauncherTar, dry_run).await
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RestoreOutcome {
    Restored(RestoreReport),
    Discarded { existed: bool },
}

/// Works on the layout directory as found, without unpacking: the restore
/// point carries the archive too.
pub fn restore(config: &AppConfig, discard: bool) -> Result<RestoreOutcome> {
    let snapshot = located_snapshot(&config.workspace.backup_dir)?;
    if discard {
        let existed = pipeline::discard_restore_point(&snapshot)?;
        return Ok(RestoreOutcome::Discarded { existed });
    }
    Ok(RestoreOutcome::Restored(pipeline::restore(&snapshot)?))
}

fn located_snapshot(backup_dir: &Path) -> Result<BackupSnapshot> {
    let layout_dir = snapshot::latest_layout_dir(backup_dir)
        .with_context(|| format!("no backup layout under {}", backup_dir.display()))?;
    Ok(BackupSnapshot::locate(&layout_dir)?)
}

/// Pulls the device's newest backup next to the configured backup directory.
pub async fn pull(config: &AppConfig, transport: &dyn DeviceTransport) -> Result<PathBuf> {
    let backup_dir = &config.workspace.backup_dir;
    let dest = match backup_dir.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let local = transport.pull_latest_backup(&dest).await?;
    info!(local = %local.display(), "backup available locally");
    Ok(local)
}

pub async fn push(config: &AppConfig, transport: &dyn DeviceTransport) -> Result<usize> {
    let backup_dir = &config.workspace.backup_dir;
    let layout_dir = snapshot::latest_layout_dir(backup_dir)
        .with_context(|| format!("no backup layout under {}", backup_dir.display()))?;
    Ok(transport.push_backup(&layout_dir).await?)
}

pub async fn all(
    config: &AppConfig,
    chain: &SourceChain,
    resolver: &mut dyn ManualResolver,
    policy: &CapacityPolicy,
    cancel: Arc<AtomicBool>,
) -> Result<RunSummary> {
    let snapshot = pipeline::open_snapshot(&config.workspace.backup_dir, &LauncherTar)?;
    let store = pipeline::open_store(config)?;
    let classifier = pipeline::build_classifier(config, store, chain).with_cancel(cancel);
    pipeline::run_all(&snapshot, &classifier, resolver, policy, &LauncherTar).await
}
