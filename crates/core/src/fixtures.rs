//! Launcher backups built on disk for tests: a `Data/<ts>/Layout` tree with a
//! SQLite database and matching XML mirrors, optionally sealed in a tar.

use crate::error::EngineError;
use crate::launcher_db::{ITEM_TYPE_FOLDER, ITEM_TYPE_WIDGET};
use crate::models::DESKTOP_CONTAINER;
use crate::snapshot::{BackupSnapshot, ARCHIVE, DRAWER_XML, LAYOUT_XML, UNPACKED_DIR};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use storage::OpenMode;

pub const STAMP: &str = "20250101_120000";
pub const DATABASE_PATH: &str = "data/user_de/0/com.android.launcher/databases/launcher.db";

const ITEMS_SCHEMA: &str = "(
    _id INTEGER PRIMARY KEY,
    title TEXT,
    intent TEXT,
    container INTEGER,
    screen INTEGER,
    cellX INTEGER,
    cellY INTEGER,
    spanX INTEGER,
    spanY INTEGER,
    itemType INTEGER,
    appWidgetId INTEGER NOT NULL DEFAULT -1,
    icon BLOB,
    rank INTEGER NOT NULL DEFAULT 0,
    options INTEGER NOT NULL DEFAULT 0,
    modified INTEGER NOT NULL DEFAULT 0,
    user_id INTEGER NOT NULL DEFAULT 0,
    restored INTEGER NOT NULL DEFAULT 0
)";

const SCREENS_SCHEMA: &str = "(
    _id INTEGER PRIMARY KEY,
    screenRank INTEGER,
    modified INTEGER NOT NULL DEFAULT -1
)";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixtureItem {
    pub id: i64,
    pub title: Option<String>,
    pub package: Option<String>,
    pub item_type: i64,
    pub container: i64,
    pub screen: i64,
    pub cell_x: i64,
    pub cell_y: i64,
    pub rank: i64,
    pub icon: Vec<u8>,
}

impl FixtureItem {
    pub fn app(id: i64, package: &str, title: &str) -> Self {
        Self {
            id,
            title: Some(title.to_string()),
            package: Some(package.to_string()),
            item_type: 0,
            container: DESKTOP_CONTAINER,
            screen: 1,
            cell_x: 0,
            cell_y: 0,
            rank: 0,
            icon: format!("icon:{package}").into_bytes(),
        }
    }

    pub fn folder(id: i64, title: &str) -> Self {
        Self {
            id,
            title: Some(title.to_string()),
            package: None,
            item_type: ITEM_TYPE_FOLDER,
            container: DESKTOP_CONTAINER,
            screen: 1,
            cell_x: 0,
            cell_y: 0,
            rank: 0,
            icon: Vec::new(),
        }
    }

    pub fn widget(id: i64) -> Self {
        Self {
            id,
            title: None,
            package: None,
            item_type: ITEM_TYPE_WIDGET,
            container: DESKTOP_CONTAINER,
            screen: 0,
            cell_x: 0,
            cell_y: 0,
            rank: 0,
            icon: Vec::new(),
        }
    }

    pub fn at(mut self, screen: i64, cell_x: i64, cell_y: i64) -> Self {
        self.screen = screen;
        self.cell_x = cell_x;
        self.cell_y = cell_y;
        self
    }

    pub fn inside(mut self, container: i64, rank: i64) -> Self {
        self.container = container;
        self.screen = 0;
        self.cell_x = rank % 3;
        self.cell_y = rank / 3;
        self.rank = rank;
        self
    }

    pub fn with_icon(mut self, icon: &[u8]) -> Self {
        self.icon = icon.to_vec();
        self
    }

    fn intent(&self) -> Option<String> {
        self.package.as_ref().map(|p| {
            format!(
                "#Intent;action=android.intent.action.MAIN;category=android.intent.category.LAUNCHER;launchFlags=0x10200000;component={p}/.MainActivity;end"
            )
        })
    }
}

/// Desktop apps laid out row by row on screen 1 of a 4-column grid.
pub fn desktop_apps(packages: &[&str]) -> Vec<FixtureItem> {
    packages
        .iter()
        .enumerate()
        .map(|(i, package)| {
            let i = i as i64;
            let name = package.rsplit('.').next().unwrap_or(package).to_uppercase();
            FixtureItem::app(i + 1, package, &name).at(1, i % 4, i / 4)
        })
        .collect()
}

#[derive(Debug, Clone, Default)]
pub struct SnapshotFixture {
    items: Vec<FixtureItem>,
    drawer_xml: bool,
    draw_tables: bool,
    archive: bool,
}

impl SnapshotFixture {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn item(mut self, item: FixtureItem) -> Self {
        self.items.push(item);
        self
    }

    pub fn items(mut self, items: impl IntoIterator<Item = FixtureItem>) -> Self {
        self.items.extend(items);
        self
    }

    pub fn with_drawer_xml(mut self) -> Self {
        self.drawer_xml = true;
        self
    }

    pub fn with_draw_tables(mut self) -> Self {
        self.draw_tables = true;
        self
    }

    pub fn with_archive(mut self) -> Self {
        self.archive = true;
        self
    }

    pub fn layout_dir(backup_root: &Path) -> PathBuf {
        backup_root.join("Data").join(STAMP).join("Layout")
    }

    /// Writes the backup under `backup_root` and returns the located snapshot.
    pub async fn build(&self, backup_root: &Path) -> Result<BackupSnapshot, EngineError> {
        let layout = Self::layout_dir(backup_root);
        std::fs::create_dir_all(&layout).map_err(EngineError::io(&layout))?;
        let db_path = layout.join(DATABASE_PATH);
        self.write_database(&db_path).await?;

        let xml = self.layout_xml();
        let xml_path = layout.join(LAYOUT_XML);
        std::fs::write(&xml_path, &xml).map_err(EngineError::io(&xml_path))?;
        if self.drawer_xml {
            let drawer = layout.join(DRAWER_XML);
            std::fs::write(&drawer, &xml).map_err(EngineError::io(&drawer))?;
        }
        if self.archive {
            let archive = layout.join(ARCHIVE);
            let file = std::fs::File::create(&archive).map_err(EngineError::io(&archive))?;
            let mut builder = tar::Builder::new(file);
            builder
                .append_dir_all(UNPACKED_DIR, layout.join(UNPACKED_DIR))
                .and_then(|_| builder.finish())
                .map_err(EngineError::io(&archive))?;
        }
        BackupSnapshot::locate(layout)
    }

    async fn write_database(&self, path: &Path) -> Result<(), EngineError> {
        let err = |e: sqlx::Error| EngineError::CorruptSnapshot(format!("fixture database: {e}"));
        let pool = storage::connect(path, OpenMode::Create).await.map_err(err)?;
        let mut tables = vec![("singledesktopitems", "singledesktopscreens")];
        if self.draw_tables {
            tables.push(("singledesktopitems_draw", "singledesktopscreens_draw"));
        }
        let screens = self.items.iter().map(|i| i.screen).max().unwrap_or(0) + 1;

        for (items, screen_table) in tables {
            sqlx::query(&format!("CREATE TABLE {items} {ITEMS_SCHEMA}"))
                .execute(&pool)
                .await
                .map_err(err)?;
            sqlx::query(&format!("CREATE TABLE {screen_table} {SCREENS_SCHEMA}"))
                .execute(&pool)
                .await
                .map_err(err)?;
            for item in &self.items {
                sqlx::query(&format!(
                    "INSERT INTO {items} (_id, title, intent, container, screen, cellX, cellY, spanX, spanY, itemType, icon, rank, user_id)
                     VALUES (?, ?, ?, ?, ?, ?, ?, 1, 1, ?, ?, ?, 0)"
                ))
                .bind(item.id)
                .bind(item.title.as_deref())
                .bind(item.intent())
                .bind(item.container)
                .bind(item.screen)
                .bind(item.cell_x)
                .bind(item.cell_y)
                .bind(item.item_type)
                .bind((!item.icon.is_empty()).then(|| item.icon.clone()))
                .bind(item.rank)
                .execute(&pool)
                .await
                .map_err(err)?;
            }
            for i in 0..screens {
                sqlx::query(&format!("INSERT INTO {screen_table} (_id, screenRank) VALUES (?, ?)"))
                    .bind(i)
                    .bind(i)
                    .execute(&pool)
                    .await
                    .map_err(err)?;
            }
        }
        pool.close().await;
        Ok(())
    }

    fn layout_xml(&self) -> String {
        let screens = self.items.iter().map(|i| i.screen).max().unwrap_or(0) + 1;
        let mut out = String::from("<?xml version='1.0' encoding='utf-8' standalone='yes' ?>\n<LAYOUT>\n  <SCREENS>");
        for i in 0..screens {
            let _ = write!(
                out,
                "\n    <screen _id=\"{}\" screenId=\"{}\" screenNum=\"{i}\" screenRank=\"{i}\" />",
                i + 1,
                1000 + i
            );
        }
        out.push_str("\n  </SCREENS>\n  <APPLICATIONS>");
        for item in self.items.iter().filter(|i| i.package.is_some()) {
            let _ = write!(
                out,
                "\n    <application _id=\"{}\" title=\"{}\" packageName=\"{}\" className=\".MainActivity\" container=\"{}\" screenId=\"{}\" screen=\"{}\" cellX=\"{}\" cellY=\"{}\" rank=\"{}\" user_id=\"0\" />",
                item.id,
                item.title.as_deref().unwrap_or_default(),
                item.package.as_deref().unwrap_or_default(),
                item.container,
                1000 + item.screen,
                item.screen,
                item.cell_x,
                item.cell_y,
                item.rank,
            );
        }
        out.push_str("\n  </APPLICATIONS>\n  <FOLDERS>");
        for item in self.items.iter().filter(|i| i.item_type == ITEM_TYPE_FOLDER) {
            let _ = write!(
                out,
                "\n    <folder _id=\"{}\" title=\"{}\" container=\"{}\" screenId=\"{}\" screen=\"{}\" cellX=\"{}\" cellY=\"{}\" options=\"0\" />",
                item.id,
                item.title.as_deref().unwrap_or_default(),
                item.container,
                1000 + item.screen,
                item.screen,
                item.cell_x,
                item.cell_y,
            );
        }
        out.push_str("\n  </FOLDERS>\n  <WIDGETS>");
        for item in self.items.iter().filter(|i| i.item_type == ITEM_TYPE_WIDGET) {
            let _ = write!(
                out,
                "\n    <widget _id=\"{}\" container=\"{}\" screen=\"{}\" cellX=\"{}\" cellY=\"{}\" />",
                item.id, item.container, item.screen, item.cell_x, item.cell_y,
            );
        }
        out.push_str("\n  </WIDGETS>\n</LAYOUT>\n");
        out
    }
}
