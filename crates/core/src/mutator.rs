//! Transactional layout write.
//!
//! Every apply starts from the restore point copy, edits a staging copy of
//! the database and XML mirrors, verifies the staged result and only then
//! renames the staged files over the live ones. Dropping the future before
//! the commit drops the staging directory, which is the rollback.

use crate::error::EngineError;
use crate::launcher_db::{self, ItemRow, LauncherTables, ITEM_TYPE_FOLDER};
use crate::layout_xml::{self, XmlApplication, XmlEdit, XmlFolder, XmlLayout, XmlPlacement};
use crate::models::{LayoutPlan, DESKTOP_CONTAINER, DOCK_CONTAINER};
use crate::restore::{RestorePoint, RestoreReport};
use crate::snapshot::BackupSnapshot;
use serde::Serialize;
use sqlx::{Connection, SqliteConnection};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use storage::OpenMode;
use tracing::{debug, info, warn};

/// Folder interiors are three icons wide.
const FOLDER_COLUMNS: i64 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowPlacement {
    pub container: i64,
    pub screen: i64,
    pub cell_x: i64,
    pub cell_y: i64,
    pub rank: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewFolder {
    pub id: i64,
    pub title: String,
    pub screen: i64,
    pub cell_x: i64,
    pub cell_y: i64,
}

/// Row-level changes a plan implies for one item table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DbEdit {
    pub placements: BTreeMap<i64, RowPlacement>,
    /// Rows moved into generated folders.
    pub moved: BTreeSet<i64>,
    pub deleted: BTreeSet<i64>,
    /// Old folders left empty, a subset of `deleted`.
    pub removed_folders: BTreeSet<i64>,
    pub new_folders: Vec<NewFolder>,
    pub shifted: usize,
    pub screen_count: i64,
}

/// Computes the edit for `rows` (in `_id` order) under `plan`.
pub fn compute_edit(rows: &[ItemRow], plan: &LayoutPlan) -> Result<DbEdit, EngineError> {
    let start = plan.policy.start_screen;
    let folder_ids: BTreeSet<i64> = rows.iter().filter(|r| r.is_folder()).map(|r| r.id).collect();
    let movable = |r: &ItemRow| {
        r.is_app() && (r.container == DESKTOP_CONTAINER || folder_ids.contains(&r.container))
    };

    let mut by_package: BTreeMap<&str, Vec<&ItemRow>> = BTreeMap::new();
    for row in rows.iter().filter(|r| movable(r)) {
        if let Some(package) = row.package() {
            by_package.entry(package).or_default().push(row);
        }
    }

    let max_id = rows.iter().map(|r| r.id).max().unwrap_or(0);
    let mut edit = DbEdit::default();

    for (k, folder) in plan.folders.iter().enumerate() {
        let folder_id = max_id + 1 + k as i64;
        edit.new_folders.push(NewFolder {
            id: folder_id,
            title: format!(" {}", folder.title),
            screen: folder.screen,
            cell_x: folder.cell_x,
            cell_y: folder.cell_y,
        });
        let mut rank = 0i64;
        for identifier in &folder.applications {
            let Some(found) = by_package.get(identifier.as_str()).filter(|f| !f.is_empty()) else {
                return Err(EngineError::WriteConflict(format!(
                    "{identifier} has no movable row in the snapshot"
                )));
            };
            // Only exact duplicates go. Cloned apps (another user_id) and
            // other activities of the package stay as icons of their own.
            let mut instances: BTreeSet<(Option<&str>, i64)> = BTreeSet::new();
            for row in found {
                if !instances.insert((row.intent.as_deref(), row.user_id)) {
                    edit.deleted.insert(row.id);
                    continue;
                }
                edit.placements.insert(
                    row.id,
                    RowPlacement {
                        container: folder_id,
                        screen: 0,
                        cell_x: rank % FOLDER_COLUMNS,
                        cell_y: rank / FOLDER_COLUMNS,
                        rank,
                    },
                );
                edit.moved.insert(row.id);
                rank += 1;
            }
        }
    }

    let gone = |edit: &DbEdit, id: i64| edit.moved.contains(&id) || edit.deleted.contains(&id);
    for folder in rows.iter().filter(|r| r.is_folder()) {
        let keeps_children = rows
            .iter()
            .any(|r| r.container == folder.id && !gone(&edit, r.id));
        if !keeps_children {
            edit.deleted.insert(folder.id);
            edit.removed_folders.insert(folder.id);
        }
    }

    // Desktop items past the start screen move behind the folder screens.
    let folder_screens = plan.screens_used();
    let kept: Vec<&ItemRow> = rows
        .iter()
        .filter(|r| r.container == DESKTOP_CONTAINER && r.screen >= start && !gone(&edit, r.id))
        .collect();
    let old_screens: BTreeSet<i64> = kept.iter().map(|r| r.screen).collect();
    let remap: BTreeMap<i64, i64> = old_screens
        .iter()
        .enumerate()
        .map(|(i, s)| (*s, start + folder_screens + i as i64))
        .collect();
    for row in kept {
        let screen = remap.get(&row.screen).copied().unwrap_or(row.screen);
        if screen != row.screen {
            edit.placements.insert(
                row.id,
                RowPlacement {
                    container: row.container,
                    screen,
                    cell_x: row.cell_x,
                    cell_y: row.cell_y,
                    rank: row.rank,
                },
            );
            edit.shifted += 1;
        }
    }

    let last_screen = rows
        .iter()
        .filter(|r| r.container == DESKTOP_CONTAINER && !gone(&edit, r.id))
        .map(|r| edit.placements.get(&r.id).map_or(r.screen, |p| p.screen))
        .chain(edit.new_folders.iter().map(|f| f.screen))
        .max();
    edit.screen_count = last_screen.map_or(1, |s| s + 1).max(1);
    Ok(edit)
}

#[derive(Debug, Clone, Serialize)]
pub struct MutationReport {
    pub restore_point_created: bool,
    pub folders_created: usize,
    pub apps_moved: usize,
    pub rows_deleted: usize,
    pub folders_removed: usize,
    pub items_shifted: usize,
    pub screen_count: i64,
    pub files_written: Vec<PathBuf>,
}

struct StagedFile {
    live: PathBuf,
    staged: PathBuf,
}

struct Staged {
    database: StagedFile,
    /// Main layout first.
    xml: Vec<StagedFile>,
}

impl Staged {
    fn files(&self) -> impl Iterator<Item = &StagedFile> {
        std::iter::once(&self.database).chain(self.xml.iter())
    }
}

fn db_err(e: sqlx::Error) -> EngineError {
    EngineError::TransactionAborted(format!("database: {e}"))
}

pub struct LayoutMutator {
    snapshot: BackupSnapshot,
    restore_point: RestorePoint,
}

impl LayoutMutator {
    pub fn new(snapshot: BackupSnapshot) -> Self {
        let restore_point = RestorePoint::for_snapshot(&snapshot);
        Self {
            snapshot,
            restore_point,
        }
    }

    pub fn snapshot(&self) -> &BackupSnapshot {
        &self.snapshot
    }

    pub fn restore_point(&self) -> &RestorePoint {
        &self.restore_point
    }

    pub fn has_restore_point(&self) -> bool {
        self.restore_point.exists()
    }

    pub fn restore(&self) -> Result<RestoreReport, EngineError> {
        self.restore_point.restore()
    }

    pub fn discard_restore_point(&self) -> Result<bool, EngineError> {
        self.restore_point.discard()
    }

    pub async fn apply(&self, plan: &LayoutPlan) -> Result<MutationReport, EngineError> {
        self.apply_at(plan, chrono::Utc::now().timestamp_millis()).await
    }

    /// Same as [`apply`](Self::apply) with a fixed `modified` timestamp.
    pub async fn apply_at(
        &self,
        plan: &LayoutPlan,
        now_ms: i64,
    ) -> Result<MutationReport, EngineError> {
        let restore_point_created = self.restore_point.ensure(&self.snapshot)?;

        let root = &self.snapshot.root;
        let staging = tempfile::Builder::new()
            .prefix(".regroup-staging-")
            .tempdir_in(root)
            .map_err(EngineError::io(root))?;
        let staged = self.stage(staging.path())?;

        let pool = storage::connect(&staged.database.staged, OpenMode::ReadWrite)
            .await
            .map_err(db_err)?;
        let outcome = async {
            let mut conn = pool.acquire().await.map_err(db_err)?;
            self.write_staged(&mut conn, &staged, plan, now_ms).await
        }
        .await;
        pool.close().await;
        let edit = outcome?;

        let files_written = self.commit(&staged)?;
        drop(staging);

        let report = MutationReport {
            restore_point_created,
            folders_created: edit.new_folders.len(),
            apps_moved: edit.moved.len(),
            rows_deleted: edit.deleted.len(),
            folders_removed: edit.removed_folders.len(),
            items_shifted: edit.shifted,
            screen_count: edit.screen_count,
            files_written,
        };
        info!(
            folders = report.folders_created,
            moved = report.apps_moved,
            deleted = report.rows_deleted,
            screens = report.screen_count,
            "layout written"
        );
        Ok(report)
    }

    /// Copies the base (restore point) version of every edited file into
    /// `dir`, keeping relative paths.
    fn stage(&self, dir: &Path) -> Result<Staged, EngineError> {
        let stage_one = |live: &Path| -> Result<StagedFile, EngineError> {
            let base = self
                .restore_point
                .copy_of(live)
                .unwrap_or_else(|| live.to_path_buf());
            let staged = dir.join(self.snapshot.relative(live));
            if let Some(parent) = staged.parent() {
                std::fs::create_dir_all(parent).map_err(EngineError::io(parent))?;
            }
            std::fs::copy(&base, &staged).map_err(EngineError::io(&base))?;
            Ok(StagedFile {
                live: live.to_path_buf(),
                staged,
            })
        };
        let database = stage_one(&self.snapshot.database)?;
        let xml = self
            .snapshot
            .xml_files()
            .into_iter()
            .map(stage_one)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Staged { database, xml })
    }

    async fn write_staged(
        &self,
        conn: &mut SqliteConnection,
        staged: &Staged,
        plan: &LayoutPlan,
        now_ms: i64,
    ) -> Result<DbEdit, EngineError> {
        let tables = launcher_db::detect_tables(conn).await?;
        let rows = launcher_db::read_items(conn, tables.items)
            .await
            .map_err(|e| EngineError::CorruptSnapshot(format!("reading items: {e}")))?;
        let edit = compute_edit(&rows, plan)?;
        debug!(
            moved = edit.moved.len(),
            deleted = edit.deleted.len(),
            shifted = edit.shifted,
            "computed database edit"
        );

        write_database(conn, &tables, rows.len(), &edit, now_ms).await?;

        let rows_by_id: BTreeMap<i64, &ItemRow> = rows.iter().map(|r| (r.id, r)).collect();
        let mut layouts = Vec::with_capacity(staged.xml.len());
        for file in &staged.xml {
            let xml = std::fs::read_to_string(&file.staged).map_err(EngineError::io(&file.staged))?;
            let existing = layout_xml::read_layout(&xml)?;
            let xml_edit = xml_edit_for(&edit, &rows_by_id, &existing);
            let rewritten = layout_xml::rewrite(&xml, &xml_edit)?;
            std::fs::write(&file.staged, &rewritten).map_err(EngineError::io(&file.staged))?;
            layouts.push(layout_xml::read_layout(&rewritten)?);
        }

        let original_folders: BTreeSet<i64> =
            rows.iter().filter(|r| r.is_folder()).map(|r| r.id).collect();
        verify(conn, &tables, &edit, &original_folders, plan.policy.start_screen, &layouts).await?;
        Ok(edit)
    }

    fn commit(&self, staged: &Staged) -> Result<Vec<PathBuf>, EngineError> {
        let mut written = Vec::new();
        for file in staged.files() {
            if let Err(e) = std::fs::rename(&file.staged, &file.live) {
                warn!(path = %file.live.display(), error = %e, "commit failed, restoring originals");
                if let Err(restore_err) = self.restore_point.restore() {
                    warn!(error = %restore_err, "restore after failed commit also failed");
                }
                return Err(EngineError::TransactionAborted(format!(
                    "replacing {}: {e}",
                    file.live.display()
                )));
            }
            written.push(file.live.clone());
        }
        Ok(written)
    }
}

fn xml_edit_for(
    edit: &DbEdit,
    rows: &BTreeMap<i64, &ItemRow>,
    existing: &XmlLayout,
) -> XmlEdit {
    let folder_screens: BTreeMap<i64, i64> = edit
        .new_folders
        .iter()
        .map(|f| (f.id, f.screen))
        .chain(
            rows.values()
                .filter(|r| r.is_folder())
                .map(|r| (r.id, edit.placements.get(&r.id).map_or(r.screen, |p| p.screen))),
        )
        .collect();

    let to_xml = |p: &RowPlacement| XmlPlacement {
        container: p.container,
        screen: p.screen,
        screen_id: match p.container {
            DESKTOP_CONTAINER => layout_xml::screen_id(p.screen),
            DOCK_CONTAINER => layout_xml::DOCK_SCREEN_ID,
            folder => layout_xml::screen_id(folder_screens.get(&folder).copied().unwrap_or(p.screen)),
        },
        cell_x: p.cell_x,
        cell_y: p.cell_y,
        rank: p.rank,
    };

    let placements: BTreeMap<i64, XmlPlacement> =
        edit.placements.iter().map(|(id, p)| (*id, to_xml(p))).collect();

    let new_applications = edit
        .moved
        .iter()
        .filter(|id| !existing.applications.contains_key(*id))
        .filter_map(|id| {
            let row = rows.get(id)?;
            let placement = placements.get(id).copied()?;
            Some(XmlApplication {
                id: *id,
                title: row
                    .title
                    .clone()
                    .or_else(|| row.package().map(str::to_string))
                    .unwrap_or_default(),
                intent: row.intent.clone().unwrap_or_default(),
                user_id: row.user_id,
                placement,
            })
        })
        .collect();

    XmlEdit {
        placements,
        removed: edit.deleted.clone(),
        new_folders: edit
            .new_folders
            .iter()
            .map(|f| XmlFolder {
                id: f.id,
                title: f.title.clone(),
                screen: f.screen,
                cell_x: f.cell_x,
                cell_y: f.cell_y,
            })
            .collect(),
        new_applications,
        screen_count: edit.screen_count,
    }
}

async fn write_database(
    conn: &mut SqliteConnection,
    tables: &LauncherTables,
    expected_rows: usize,
    edit: &DbEdit,
    now_ms: i64,
) -> Result<(), EngineError> {
    let items = tables.items;
    let mut tx = conn.begin().await.map_err(db_err)?;

    let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {items}"))
        .fetch_one(&mut *tx)
        .await
        .map_err(db_err)?;
    if count as usize != expected_rows {
        return Err(EngineError::WriteConflict(format!(
            "{items} has {count} rows, expected {expected_rows}"
        )));
    }
    if let Some(first) = edit.new_folders.first() {
        let max: Option<i64> = sqlx::query_scalar(&format!("SELECT MAX(_id) FROM {items}"))
            .fetch_one(&mut *tx)
            .await
            .map_err(db_err)?;
        if max.is_some_and(|m| m >= first.id) {
            return Err(EngineError::WriteConflict(format!(
                "generated folder id {} collides with existing rows",
                first.id
            )));
        }
    }

    let columns = launcher_db::table_columns(&mut tx, items).await.map_err(db_err)?;
    let has = |c: &str| columns.iter().any(|col| col == c);

    for (id, p) in &edit.placements {
        let values: Vec<(&str, i64)> = [
            ("container", p.container),
            ("screen", p.screen),
            ("cellX", p.cell_x),
            ("cellY", p.cell_y),
            ("rank", p.rank),
            ("modified", now_ms),
        ]
        .into_iter()
        .filter(|(c, _)| has(c))
        .collect();
        let assignments: Vec<String> = values.iter().map(|(c, _)| format!("{c} = ?")).collect();
        let sql = format!("UPDATE {items} SET {} WHERE _id = ?", assignments.join(", "));
        let mut query = sqlx::query(&sql);
        for (_, v) in &values {
            query = query.bind(*v);
        }
        query.bind(*id).execute(&mut *tx).await.map_err(db_err)?;
    }

    for id in &edit.deleted {
        sqlx::query(&format!("DELETE FROM {items} WHERE _id = ?"))
            .bind(*id)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
    }

    for folder in &edit.new_folders {
        let ints: Vec<(&str, i64)> = [
            ("_id", folder.id),
            ("itemType", ITEM_TYPE_FOLDER),
            ("container", DESKTOP_CONTAINER),
            ("screen", folder.screen),
            ("cellX", folder.cell_x),
            ("cellY", folder.cell_y),
            ("spanX", 1),
            ("spanY", 1),
            ("rank", 0),
            ("modified", now_ms),
        ]
        .into_iter()
        .filter(|(c, _)| has(c))
        .collect();
        let mut names: Vec<&str> = ints.iter().map(|(c, _)| *c).collect();
        if has("title") {
            names.push("title");
        }
        let placeholders = vec!["?"; names.len()].join(", ");
        let sql = format!("INSERT INTO {items} ({}) VALUES ({placeholders})", names.join(", "));
        let mut query = sqlx::query(&sql);
        for (_, v) in &ints {
            query = query.bind(*v);
        }
        if has("title") {
            query = query.bind(folder.title.as_str());
        }
        query.execute(&mut *tx).await.map_err(db_err)?;
    }

    let screen_columns = launcher_db::table_columns(&mut tx, tables.screens)
        .await
        .map_err(db_err)?;
    if !screen_columns.is_empty() {
        rewrite_screens(&mut tx, tables.screens, &screen_columns, edit.screen_count, now_ms).await?;
    }

    if let Some((mirror_items, mirror_screens)) = tables.mirror {
        copy_table(&mut tx, items, mirror_items).await?;
        if !screen_columns.is_empty() {
            copy_table(&mut tx, tables.screens, mirror_screens).await?;
        }
    }

    let expected = expected_rows - edit.deleted.len() + edit.new_folders.len();
    let after: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {items}"))
        .fetch_one(&mut *tx)
        .await
        .map_err(db_err)?;
    if after as usize != expected {
        return Err(EngineError::WriteConflict(format!(
            "{items} has {after} rows after the write, expected {expected}"
        )));
    }

    tx.commit().await.map_err(db_err)?;
    Ok(())
}

async fn rewrite_screens(
    conn: &mut SqliteConnection,
    table: &str,
    columns: &[String],
    count: i64,
    now_ms: i64,
) -> Result<(), EngineError> {
    sqlx::query(&format!("DELETE FROM {table}"))
        .execute(&mut *conn)
        .await
        .map_err(db_err)?;
    for i in 0..count {
        let values: Vec<(&str, i64)> = [("_id", i), ("screenRank", i), ("modified", now_ms)]
            .into_iter()
            .filter(|(c, _)| columns.iter().any(|col| col == c))
            .collect();
        let names: Vec<&str> = values.iter().map(|(c, _)| *c).collect();
        let placeholders = vec!["?"; names.len()].join(", ");
        let sql = format!("INSERT INTO {table} ({}) VALUES ({placeholders})", names.join(", "));
        let mut query = sqlx::query(&sql);
        for (_, v) in &values {
            query = query.bind(*v);
        }
        query.execute(&mut *conn).await.map_err(db_err)?;
    }
    Ok(())
}

/// Replaces `to` with the rows of `from`, over the columns both tables have.
async fn copy_table(conn: &mut SqliteConnection, from: &str, to: &str) -> Result<(), EngineError> {
    let source = launcher_db::table_columns(conn, from).await.map_err(db_err)?;
    let target = launcher_db::table_columns(conn, to).await.map_err(db_err)?;
    let common: Vec<String> = source
        .iter()
        .filter(|c| target.contains(c))
        .map(|c| format!("\"{c}\""))
        .collect();
    if common.is_empty() {
        return Ok(());
    }
    let cols = common.join(", ");
    sqlx::query(&format!("DELETE FROM {to}"))
        .execute(&mut *conn)
        .await
        .map_err(db_err)?;
    sqlx::query(&format!("INSERT INTO {to} ({cols}) SELECT {cols} FROM {from}"))
        .execute(&mut *conn)
        .await
        .map_err(db_err)?;
    Ok(())
}

async fn verify(
    conn: &mut SqliteConnection,
    tables: &LauncherTables,
    edit: &DbEdit,
    original_folders: &BTreeSet<i64>,
    start_screen: i64,
    layouts: &[XmlLayout],
) -> Result<(), EngineError> {
    let abort = |msg: String| EngineError::TransactionAborted(format!("verification: {msg}"));
    let rows = launcher_db::read_items(conn, tables.items).await.map_err(db_err)?;
    let folders: BTreeSet<i64> = rows.iter().filter(|r| r.is_folder()).map(|r| r.id).collect();

    let known: BTreeSet<i64> = original_folders
        .iter()
        .copied()
        .chain(edit.new_folders.iter().map(|f| f.id))
        .collect();
    if let Some(orphan) = rows
        .iter()
        .find(|r| known.contains(&r.container) && !folders.contains(&r.container))
    {
        return Err(abort(format!(
            "row {} points at missing folder {}",
            orphan.id, orphan.container
        )));
    }

    let mut cells = BTreeSet::new();
    for row in rows
        .iter()
        .filter(|r| r.container == DESKTOP_CONTAINER && r.screen >= start_screen)
    {
        if !cells.insert((row.screen, row.cell_x, row.cell_y)) {
            return Err(abort(format!(
                "cell ({}, {}) on screen {} is taken twice",
                row.cell_x, row.cell_y, row.screen
            )));
        }
    }

    let Some((main, mirrors)) = layouts.split_first() else {
        return Ok(());
    };
    if main.folders != folders {
        return Err(abort(format!(
            "xml folders {:?} differ from database folders {:?}",
            main.folders, folders
        )));
    }
    for layout in mirrors {
        if let Some(missing) = edit.new_folders.iter().find(|f| !layout.folders.contains(&f.id)) {
            return Err(abort(format!("folder {} missing from drawer xml", missing.id)));
        }
    }
    let containers: BTreeMap<i64, i64> = rows.iter().map(|r| (r.id, r.container)).collect();
    for id in &edit.moved {
        let db = containers.get(id);
        let xml = main.applications.get(id);
        if db.is_none() || db != xml {
            return Err(abort(format!(
                "row {id} has container {db:?} in the database and {xml:?} in xml"
            )));
        }
    }
    Ok(())
}
