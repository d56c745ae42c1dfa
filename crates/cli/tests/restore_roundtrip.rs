use cli::commands::{self, RestoreOutcome};
use regroup_core::config::AppConfig;
use regroup_core::fixtures::{desktop_apps, FixtureItem, SnapshotFixture};
use regroup_core::models::UnresolvedPolicy;
use regroup_core::snapshot::BackupSnapshot;
use std::path::{Path, PathBuf};

fn config(root: &Path) -> AppConfig {
    let mut cfg = AppConfig::default();
    cfg.workspace.backup_dir = root.to_path_buf();
    cfg.workspace.cache_path = root.join("cache.json");
    cfg.sources.international.enabled = false;
    cfg.sources.domestic.enabled = false;
    cfg.layout.unresolved = UnresolvedPolicy::DefaultBucket;
    cfg
}

fn contents(snapshot: &BackupSnapshot) -> Vec<(PathBuf, Vec<u8>)> {
    snapshot
        .files()
        .into_iter()
        .map(|p| (p.to_path_buf(), std::fs::read(p).unwrap()))
        .collect()
}

async fn backup(root: &Path) -> BackupSnapshot {
    SnapshotFixture::new()
        .items(desktop_apps(&["com.one", "com.two", "com.three"]))
        .item(FixtureItem::folder(20, "Old").at(2, 0, 0))
        .item(FixtureItem::app(21, "com.nested", "Nested").inside(20, 0))
        .with_drawer_xml()
        .with_archive()
        .build(root)
        .await
        .unwrap()
}

#[tokio::test]
async fn restore_brings_back_every_byte() {
    let temp = tempfile::tempdir().unwrap();
    let snapshot = backup(temp.path()).await;
    let original = contents(&snapshot);
    let cfg = config(temp.path());

    let outcome = commands::layout(&cfg, &cfg.layout.policy(), false).await.unwrap();
    let mutation = outcome.mutation.unwrap();
    assert_eq!(mutation.apps_moved, 4);
    assert_eq!(mutation.folders_removed, 1);
    assert_ne!(contents(&snapshot), original);

    let restored = commands::restore(&cfg, false).unwrap();
    let RestoreOutcome::Restored(report) = restored else {
        panic!("expected a restore");
    };
    assert_eq!(report.restored.len(), original.len());
    assert_eq!(contents(&snapshot), original);
}

#[tokio::test]
async fn second_layout_starts_from_the_original() {
    let temp = tempfile::tempdir().unwrap();
    let snapshot = backup(temp.path()).await;
    let cfg = config(temp.path());

    commands::layout(&cfg, &cfg.layout.policy(), false).await.unwrap();
    let once = contents(&snapshot);
    let again = commands::layout(&cfg, &cfg.layout.policy(), false).await.unwrap();
    assert!(!again.mutation.unwrap().restore_point_created);
    let twice = contents(&snapshot);

    // database rows carry a fresh `modified` stamp; the xml mirrors do not
    assert_eq!(once[1..3], twice[1..3]);
}

#[tokio::test]
async fn discarded_restore_point_cannot_be_restored() {
    let temp = tempfile::tempdir().unwrap();
    backup(temp.path()).await;
    let cfg = config(temp.path());

    let none = commands::restore(&cfg, true).unwrap();
    assert!(matches!(none, RestoreOutcome::Discarded { existed: false }));

    commands::layout(&cfg, &cfg.layout.policy(), false).await.unwrap();
    let dropped = commands::restore(&cfg, true).unwrap();
    assert!(matches!(dropped, RestoreOutcome::Discarded { existed: true }));

    let err = commands::restore(&cfg, false).unwrap_err();
    assert!(format!("{err:#}").contains("restore point"), "{err:#}");
}
