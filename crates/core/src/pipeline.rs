use crate::classifier::{ClassificationReport, Classifier, EnrichReport};
use crate::config::AppConfig;
use crate::extractor;
use crate::models::{ApplicationRecord, CapacityPolicy, LayoutPlan};
use crate::mutator::{LayoutMutator, MutationReport};
use crate::packaging::ArchivePackaging;
use crate::planner;
use crate::resolver::{self, ManualReport, ManualResolver};
use crate::restore::{RestorePoint, RestoreReport};
use crate::snapshot::{self, BackupSnapshot};
use anyhow::Context;
use providers::app_store::{AppStoreConfig, AppStoreSource};
use providers::google_play::{GooglePlayConfig, GooglePlaySource};
use providers::openai::{OpenAiConfig, OpenAiSource};
use providers::SourceChain;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use storage::{legacy, CacheStats, ClassificationStore, JsonFileStore, Source};
use tracing::{debug, info, warn};

pub fn open_store(config: &AppConfig) -> anyhow::Result<Arc<dyn ClassificationStore>> {
    let path = &config.workspace.cache_path;
    let store = JsonFileStore::open(path)
        .with_context(|| format!("open classification cache {}", path.display()))?;
    Ok(Arc::new(store))
}

/// Automated sources in priority order. `force_ai` enables the AI source
/// even when the configuration leaves it off.
pub fn build_sources(config: &AppConfig, force_ai: bool) -> anyhow::Result<SourceChain> {
    let timeout = Duration::from_secs(config.classification.timeout_secs.max(1));
    let mut chain = SourceChain::new();

    let intl = &config.sources.international;
    if intl.enabled {
        let mut cfg = GooglePlayConfig {
            timeout,
            ..GooglePlayConfig::default()
        };
        if let Some(url) = &intl.base_url {
            cfg.base_url = url.clone();
        }
        chain = chain.with_source(Arc::new(
            GooglePlaySource::new(cfg).context("international store client")?,
        ));
    }

    let domestic = &config.sources.domestic;
    if domestic.enabled {
        let mut cfg = AppStoreConfig {
            timeout,
            ..AppStoreConfig::default()
        };
        if let Some(url) = &domestic.base_url {
            cfg.base_url = url.clone();
        }
        chain = chain.with_source(Arc::new(
            AppStoreSource::new(cfg).context("domestic store client")?,
        ));
    }

    let ai = &config.sources.ai;
    if ai.enabled || force_ai {
        let api_key = ai
            .resolved_api_key()
            .context("AI source enabled but no api key (sources.ai.api_key or OPENAI_API_KEY)")?;
        let cfg = OpenAiConfig {
            api_key,
            base_url: ai.base_url.clone(),
            chat_model: ai.model.clone(),
            timeout,
            ..OpenAiConfig::default()
        };
        chain = chain.with_source(Arc::new(OpenAiSource::new(cfg).context("AI client")?));
    }

    debug!(sources = ?chain.kinds(), "source chain built");
    Ok(chain)
}

pub fn build_classifier(
    config: &AppConfig,
    store: Arc<dyn ClassificationStore>,
    chain: &SourceChain,
) -> Classifier {
    let sources = &config.sources;
    Classifier::new(store, chain, config.classification.settings())
        .with_rate_limit(
            Source::RemoteInternational,
            Duration::from_millis(sources.international.min_interval_ms),
        )
        .with_rate_limit(
            Source::RemoteDomestic,
            Duration::from_millis(sources.domestic.min_interval_ms),
        )
        .with_rate_limit(Source::Ai, Duration::from_millis(sources.ai.min_interval_ms))
}

/// Newest `Data/<ts>/Layout` under the configured backup directory, unpacked.
pub fn open_snapshot(
    backup_dir: &Path,
    packer: &dyn ArchivePackaging,
) -> anyhow::Result<BackupSnapshot> {
    let layout_dir = snapshot::latest_layout_dir(backup_dir)
        .with_context(|| format!("no backup layout under {}", backup_dir.display()))?;
    let snapshot = packer
        .unpack(&layout_dir)
        .with_context(|| format!("unpack {}", layout_dir.display()))?;
    info!(layout = %snapshot.root.display(), "using backup snapshot");
    Ok(snapshot)
}

/// The snapshot as it was before any layout write: the restore point
/// copies when they exist.
pub fn original_view(snapshot: &BackupSnapshot) -> BackupSnapshot {
    let point = RestorePoint::for_snapshot(snapshot);
    if !point.exists() {
        return snapshot.clone();
    }
    let original = |p: &Path| point.copy_of(p).unwrap_or_else(|| p.to_path_buf());
    BackupSnapshot {
        root: snapshot.root.clone(),
        database: original(&snapshot.database),
        layout_xml: original(&snapshot.layout_xml),
        drawer_xml: snapshot.drawer_xml.as_deref().map(original),
        archive: snapshot.archive.as_deref().map(original),
    }
}

pub async fn extract_apps(snapshot: &BackupSnapshot) -> anyhow::Result<Vec<ApplicationRecord>> {
    let view = original_view(snapshot);
    extractor::extract(&view)
        .await
        .with_context(|| format!("extract applications from {}", snapshot.root.display()))
}

pub async fn classify(
    classifier: &Classifier,
    apps: &[ApplicationRecord],
) -> anyhow::Result<ClassificationReport> {
    Ok(classifier.classify_all(apps).await?)
}

pub async fn resolve_manually(
    store: &dyn ClassificationStore,
    apps: &[ApplicationRecord],
    resolver: &mut dyn ManualResolver,
) -> anyhow::Result<ManualReport> {
    resolver::resolve_pending(store, apps, resolver).await
}

pub async fn enrich_names(
    classifier: &Classifier,
    apps: &[ApplicationRecord],
) -> anyhow::Result<EnrichReport> {
    Ok(classifier.enrich_names(apps).await?)
}

pub fn stats(store: &dyn ClassificationStore) -> anyhow::Result<CacheStats> {
    Ok(store.stats()?)
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ImportReport {
    pub imported: usize,
    /// Older than what the cache already holds.
    pub ignored: usize,
    pub rejected: Vec<(String, String)>,
}

pub fn import_mapping(store: &dyn ClassificationStore, path: &Path) -> anyhow::Result<ImportReport> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("read mapping {}", path.display()))?;
    let parsed =
        legacy::parse_mapping(&raw).with_context(|| format!("parse mapping {}", path.display()))?;
    let mut report = ImportReport {
        rejected: parsed.rejected,
        ..ImportReport::default()
    };
    for record in parsed.records {
        if store.put(record)? {
            report.imported += 1;
        } else {
            report.ignored += 1;
        }
    }
    for (identifier, label) in &report.rejected {
        warn!(identifier = %identifier, label = %label, "unknown category label, not imported");
    }
    info!(imported = report.imported, rejected = report.rejected.len(), "mapping imported");
    Ok(report)
}

#[derive(Debug, Clone, Serialize)]
pub struct LayoutOutcome {
    pub plan: LayoutPlan,
    /// `None` for dry runs and empty plans.
    pub mutation: Option<MutationReport>,
    pub archive: Option<PathBuf>,
    pub summary: String,
}

pub async fn generate_layout(
    snapshot: &BackupSnapshot,
    apps: &[ApplicationRecord],
    store: &dyn ClassificationStore,
    policy: &CapacityPolicy,
    packer: &dyn ArchivePackaging,
    dry_run: bool,
) -> anyhow::Result<LayoutOutcome> {
    let records = store.all()?;
    let plan = planner::plan(apps, &records, policy)?;
    let mut summary = plan.summary();
    if dry_run || plan.is_empty() {
        if plan.is_empty() {
            warn!("nothing to place, layout left unchanged");
        }
        return Ok(LayoutOutcome {
            plan,
            mutation: None,
            archive: None,
            summary,
        });
    }

    let mutator = LayoutMutator::new(snapshot.clone());
    let mutation = mutator.apply(&plan).await.context("write layout")?;
    let archive = match packer.repack(snapshot) {
        Ok(archive) => archive,
        Err(e) => {
            warn!(error = %e, "repack failed, restoring the original backup");
            mutator
                .restore()
                .context("restore after failed repack")?;
            return Err(anyhow::Error::new(e).context("repack archive"));
        }
    };
    summary.push_str(&format!(
        "\n{} apps moved, {} rows removed, {} old folders removed, {} screens",
        mutation.apps_moved, mutation.rows_deleted, mutation.folders_removed, mutation.screen_count
    ));
    if let Some(path) = &archive {
        summary.push_str(&format!("\narchive: {}", path.display()));
    }
    Ok(LayoutOutcome {
        plan,
        mutation: Some(mutation),
        archive,
        summary,
    })
}

pub fn restore(snapshot: &BackupSnapshot) -> anyhow::Result<RestoreReport> {
    let report = LayoutMutator::new(snapshot.clone())
        .restore()
        .context("restore backup")?;
    Ok(report)
}

pub fn discard_restore_point(snapshot: &BackupSnapshot) -> anyhow::Result<bool> {
    Ok(LayoutMutator::new(snapshot.clone()).discard_restore_point()?)
}

#[derive(Debug, Serialize)]
pub struct RunSummary {
    pub classification: ClassificationReport,
    pub manual: Option<ManualReport>,
    pub names: Option<EnrichReport>,
    pub layout: Option<LayoutOutcome>,
}

/// classify → resolve → enrich names → layout. An interrupted classification
/// stops the run before anything is written to the backup.
pub async fn run_all(
    snapshot: &BackupSnapshot,
    classifier: &Classifier,
    resolver: &mut dyn ManualResolver,
    policy: &CapacityPolicy,
    packer: &dyn ArchivePackaging,
) -> anyhow::Result<RunSummary> {
    let apps = extract_apps(snapshot).await?;
    let classification = classify(classifier, &apps).await?;
    let mut run = RunSummary {
        classification,
        manual: None,
        names: None,
        layout: None,
    };
    if run.classification.interrupted {
        warn!("classification interrupted, layout not generated");
        return Ok(run);
    }
    let store = Arc::clone(classifier.store());
    run.manual = Some(resolve_manually(store.as_ref(), &apps, resolver).await?);
    run.names = Some(enrich_names(classifier, &apps).await?);
    run.layout =
        Some(generate_layout(snapshot, &apps, store.as_ref(), policy, packer, false).await?);
    Ok(run)
}
