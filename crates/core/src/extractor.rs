use crate::error::EngineError;
use crate::launcher_db;
use crate::layout_xml;
use crate::models::{ApplicationRecord, Container, Placement, DESKTOP_CONTAINER, DOCK_CONTAINER};
use crate::snapshot::BackupSnapshot;
use std::collections::{BTreeSet, HashSet};
use storage::OpenMode;
use tracing::{debug, info};

/// Reads every application the launcher knows about, desktop and folder
/// contents included. The snapshot is opened read-only.
pub async fn extract(snapshot: &BackupSnapshot) -> Result<Vec<ApplicationRecord>, EngineError> {
    let xml = std::fs::read_to_string(&snapshot.layout_xml)
        .map_err(EngineError::io(&snapshot.layout_xml))?;
    let layout = layout_xml::read_layout(&xml)?;
    if !layout.has_applications {
        return Err(EngineError::CorruptSnapshot(format!(
            "{} has no APPLICATIONS section",
            snapshot.layout_xml.display()
        )));
    }

    let corrupt = |e: sqlx::Error| EngineError::CorruptSnapshot(format!("launcher database: {e}"));
    let pool = storage::connect(&snapshot.database, OpenMode::ReadOnly)
        .await
        .map_err(corrupt)?;
    let rows = async {
        let mut conn = pool.acquire().await.map_err(corrupt)?;
        let tables = launcher_db::detect_tables(&mut conn).await?;
        debug!(items = tables.items, mirror = ?tables.mirror, "launcher tables");
        launcher_db::read_items(&mut conn, tables.items)
            .await
            .map_err(corrupt)
    }
    .await;
    pool.close().await;
    let rows = rows?;

    let folders: BTreeSet<i64> = rows.iter().filter(|r| r.is_folder()).map(|r| r.id).collect();
    let mut seen = HashSet::new();
    let mut apps = Vec::new();
    for row in rows.iter().filter(|r| r.is_app()) {
        let Some(package) = row.package() else { continue };
        if !seen.insert(package.to_string()) {
            continue;
        }
        let container = match row.container {
            DESKTOP_CONTAINER => Container::Desktop,
            DOCK_CONTAINER => Container::Dock,
            id if folders.contains(&id) => Container::Folder(id),
            other => Container::Other(other),
        };
        apps.push(ApplicationRecord {
            identifier: package.to_string(),
            display_name: row
                .title
                .as_deref()
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string),
            row_id: row.id,
            placement: Some(Placement {
                container,
                screen: row.screen,
                cell_x: row.cell_x,
                cell_y: row.cell_y,
            }),
        });
    }

    if apps.is_empty() {
        return Err(EngineError::EmptySnapshot(snapshot.root.clone()));
    }
    info!(
        apps = apps.len(),
        rows = rows.len(),
        folders = folders.len(),
        "extracted applications"
    );
    Ok(apps)
}
