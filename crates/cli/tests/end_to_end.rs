use async_trait::async_trait;
use cli::commands::{self, PolicyOverrides};
use providers::{CategorySource, ProviderError, SourceAnswer, SourceChain};
use regroup_core::config::AppConfig;
use regroup_core::fixtures::{desktop_apps, FixtureItem, SnapshotFixture};
use regroup_core::models::{CapacityPolicy, UnresolvedPolicy, DESKTOP_CONTAINER};
use regroup_core::resolver::{ManualDecision, ManualPrompt, ManualResolver};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use storage::{Category, OpenMode, Source, Status};

struct Store {
    kind: Source,
    answers: HashMap<&'static str, Category>,
    calls: AtomicUsize,
}

impl Store {
    fn new(kind: Source, answers: &[(&'static str, Category)]) -> Arc<Self> {
        Arc::new(Self {
            kind,
            answers: answers.iter().copied().collect(),
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CategorySource for Store {
    fn source(&self) -> Source {
        self.kind
    }

    async fn lookup(&self, identifier: &str, _: Option<&str>) -> Result<SourceAnswer, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .answers
            .get(identifier)
            .map_or_else(SourceAnswer::not_found, |c| SourceAnswer::found(*c)))
    }
}

struct Answers(HashMap<&'static str, ManualDecision>);

#[async_trait]
impl ManualResolver for Answers {
    async fn resolve(&mut self, prompt: &ManualPrompt<'_>) -> anyhow::Result<ManualDecision> {
        Ok(self.0.get(prompt.identifier).copied().unwrap_or(ManualDecision::Defer))
    }
}

fn offline_config(root: &Path) -> AppConfig {
    let mut cfg = AppConfig::default();
    cfg.workspace.backup_dir = root.to_path_buf();
    cfg.workspace.cache_path = root.join("app_categories_cache.json");
    cfg.sources.international.enabled = false;
    cfg.sources.domestic.enabled = false;
    cfg.sources.international.min_interval_ms = 0;
    cfg.sources.domestic.min_interval_ms = 0;
    cfg.classification.backoff_ms = 1;
    cfg
}

fn not_cancelled() -> Arc<AtomicBool> {
    Arc::new(AtomicBool::new(false))
}

async fn folder_titles(db: &Path) -> Vec<(i64, String, i64)> {
    let pool = storage::connect(db, OpenMode::ReadOnly).await.unwrap();
    let rows = sqlx::query_as::<_, (i64, String, i64)>(
        "SELECT _id, title, screen FROM singledesktopitems WHERE itemType = 3 ORDER BY _id",
    )
    .fetch_all(&pool)
    .await
    .unwrap();
    pool.close().await;
    rows
}

#[tokio::test]
async fn classify_resolve_and_layout_through_commands() {
    let temp = tempfile::tempdir().unwrap();
    SnapshotFixture::new()
        .items(desktop_apps(&["com.a", "com.b", "com.c", "com.d", "com.e"]))
        .with_archive()
        .build(temp.path())
        .await
        .unwrap();
    let cfg = offline_config(temp.path());

    let intl = Store::new(Source::RemoteInternational, &[("com.a", Category::Social)]);
    let domestic = Store::new(Source::RemoteDomestic, &[("com.b", Category::Shopping)]);
    let chain = SourceChain::new()
        .with_source(intl.clone())
        .with_source(domestic.clone());

    let report = commands::classify_with(&cfg, &chain, not_cancelled()).await.unwrap();
    assert_eq!(report.resolved.len(), 2);
    assert_eq!(report.unresolved, vec!["com.c", "com.d", "com.e"]);

    // the cache file is reopened by every command; only failures are asked again
    let calls = (intl.calls(), domestic.calls());
    let again = commands::classify_with(&cfg, &chain, not_cancelled()).await.unwrap();
    assert_eq!(again.attempted, 3);
    assert_eq!((intl.calls(), domestic.calls()), (calls.0 + 3, calls.1 + 3));

    let mut leaving_failures = cfg.clone();
    leaving_failures.classification.retry_failed = false;
    let calls = (intl.calls(), domestic.calls());
    let quiet = commands::classify_with(&leaving_failures, &chain, not_cancelled()).await.unwrap();
    assert_eq!(quiet.attempted, 0);
    assert_eq!((intl.calls(), domestic.calls()), calls);

    let mut answers = Answers(HashMap::from([
        ("com.c", ManualDecision::Assign(Category::Games)),
        ("com.d", ManualDecision::Assign(Category::Games)),
        ("com.e", ManualDecision::Skip),
    ]));
    let manual = commands::resolve(&cfg, &mut answers).await.unwrap();
    assert_eq!(manual.assigned.len(), 2);

    let stats = commands::stats(&cfg).unwrap();
    assert_eq!(stats.count(Status::Resolved), 4);
    assert_eq!(stats.count(Status::Skipped), 1);
    assert_eq!(stats.by_category.get(&Category::Games), Some(&2));

    let policy = PolicyOverrides {
        max_apps_per_folder: Some(2),
        ..PolicyOverrides::default()
    }
    .apply(cfg.layout.policy());
    let outcome = commands::layout(&cfg, &policy, false).await.unwrap();
    let mutation = outcome.mutation.expect("layout was written");
    assert_eq!(mutation.folders_created, 3);
    assert!(mutation.restore_point_created);
    assert!(outcome.archive.is_some());

    let layout_dir = SnapshotFixture::layout_dir(temp.path());
    let db = layout_dir.join(regroup_core::fixtures::DATABASE_PATH);
    let titles: Vec<String> = folder_titles(&db).await.into_iter().map(|f| f.1.trim().to_string()).collect();
    assert_eq!(titles, vec!["社交通讯", "购物电商", "游戏"]);
}

#[tokio::test]
async fn dry_run_leaves_backup_untouched() {
    let temp = tempfile::tempdir().unwrap();
    let snapshot = SnapshotFixture::new()
        .items(desktop_apps(&["com.a", "com.b"]))
        .build(temp.path())
        .await
        .unwrap();
    let cfg = offline_config(temp.path());
    let chain = SourceChain::new().with_source(Store::new(
        Source::RemoteInternational,
        &[("com.a", Category::Finance), ("com.b", Category::Finance)],
    ));
    commands::classify_with(&cfg, &chain, not_cancelled()).await.unwrap();
    let before = std::fs::read(&snapshot.database).unwrap();

    let outcome = commands::layout(&cfg, &cfg.layout.policy(), true).await.unwrap();
    assert!(outcome.mutation.is_none());
    assert_eq!(outcome.plan.folders.len(), 1);
    assert_eq!(outcome.plan.folders[0].applications, vec!["com.a", "com.b"]);
    assert_eq!(std::fs::read(&snapshot.database).unwrap(), before);
    assert!(!layout_has_restore_point(&snapshot.root));
}

fn layout_has_restore_point(layout_dir: &Path) -> bool {
    layout_dir.join(regroup_core::restore::RESTORE_DIR).exists()
}

#[tokio::test]
async fn imported_mapping_feeds_layout_with_default_bucket() {
    let temp = tempfile::tempdir().unwrap();
    SnapshotFixture::new()
        .items(desktop_apps(&["com.pay", "com.unknown"]))
        .item(FixtureItem::app(10, "com.kept", "Kept").at(3, 0, 0))
        .build(temp.path())
        .await
        .unwrap();
    let cfg = offline_config(temp.path());
    let mapping = temp.path().join("app_categories.json");
    std::fs::write(
        &mapping,
        "{\n  \"app_categories\": {\n    \"com.pay\": \"金融支付\", // Pay\n    \"com.odd\": \"不存在\"\n  }\n}\n",
    )
    .unwrap();

    let imported = commands::import(&cfg, &mapping).unwrap();
    assert_eq!(imported.imported, 1);
    assert_eq!(imported.rejected.len(), 1);

    let reset = commands::reset(&cfg, &["com.pay".to_string(), "com.nobody".to_string()]).unwrap();
    assert_eq!(reset.reset, vec!["com.pay"]);
    assert_eq!(reset.unknown, vec!["com.nobody"]);
    // back to resolved for the layout
    commands::import(&cfg, &mapping).unwrap();

    let policy = CapacityPolicy {
        unresolved: UnresolvedPolicy::DefaultBucket,
        ..cfg.layout.policy()
    };
    let outcome = commands::layout(&cfg, &policy, false).await.unwrap();
    let titles: Vec<&str> = outcome.plan.folders.iter().map(|f| f.title.as_str()).collect();
    assert_eq!(titles, vec!["金融支付", "其他"]);
    assert_eq!(outcome.plan.folders[1].applications, vec!["com.unknown", "com.kept"]);

    let db = SnapshotFixture::layout_dir(temp.path()).join(regroup_core::fixtures::DATABASE_PATH);
    let pool = storage::connect(&db, OpenMode::ReadOnly).await.unwrap();
    let desktop_apps: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM singledesktopitems WHERE itemType = 0 AND container = ?",
    )
    .bind(DESKTOP_CONTAINER)
    .fetch_one(&pool)
    .await
    .unwrap();
    pool.close().await;
    assert_eq!(desktop_apps, 0);
}
