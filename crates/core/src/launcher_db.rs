//! Launcher database layout: table discovery and typed row access.

use crate::error::EngineError;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};

pub const ITEM_TYPE_FOLDER: i64 = 3;
pub const ITEM_TYPE_WIDGET: i64 = 5;
pub const ITEM_TYPE_CARD: i64 = 100;

const MAIN_ITEMS: &str = "singledesktopitems";
const MAIN_SCREENS: &str = "singledesktopscreens";
const DRAW_ITEMS: &str = "singledesktopitems_draw";
const DRAW_SCREENS: &str = "singledesktopscreens_draw";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LauncherTables {
    pub items: &'static str,
    pub screens: &'static str,
    /// `(items, screens)` rebuilt from the primary pair after a write.
    pub mirror: Option<(&'static str, &'static str)>,
}

pub async fn detect_tables(conn: &mut SqliteConnection) -> Result<LauncherTables, EngineError> {
    let names: Vec<String> =
        sqlx::query_scalar("SELECT name FROM sqlite_master WHERE type = 'table'")
            .fetch_all(&mut *conn)
            .await
            .map_err(|e| EngineError::CorruptSnapshot(format!("not a launcher database: {e}")))?;
    let has = |t: &str| names.iter().any(|n| n == t);

    match (has(MAIN_ITEMS), has(DRAW_ITEMS)) {
        (true, true) => Ok(LauncherTables {
            items: MAIN_ITEMS,
            screens: MAIN_SCREENS,
            mirror: Some((DRAW_ITEMS, DRAW_SCREENS)).filter(|_| has(DRAW_SCREENS)),
        }),
        (false, true) => Ok(LauncherTables {
            items: DRAW_ITEMS,
            screens: DRAW_SCREENS,
            mirror: None,
        }),
        (true, false) => Ok(LauncherTables {
            items: MAIN_ITEMS,
            screens: MAIN_SCREENS,
            mirror: None,
        }),
        (false, false) => Err(EngineError::CorruptSnapshot(format!(
            "no desktop item table (found: {})",
            names.join(", ")
        ))),
    }
}

pub async fn table_columns(
    conn: &mut SqliteConnection,
    table: &str,
) -> Result<Vec<String>, sqlx::Error> {
    let rows = sqlx::query(&format!("PRAGMA table_info({table})"))
        .fetch_all(&mut *conn)
        .await?;
    rows.iter().map(|r| r.try_get::<String, _>("name")).collect()
}

/// Placement-relevant view of one launcher row. Other columns are never
/// read into memory, so they cannot be lost on write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemRow {
    pub id: i64,
    pub title: Option<String>,
    pub intent: Option<String>,
    pub item_type: i64,
    pub container: i64,
    pub screen: i64,
    pub cell_x: i64,
    pub cell_y: i64,
    pub span_x: i64,
    pub span_y: i64,
    pub rank: i64,
    pub user_id: i64,
}

impl ItemRow {
    pub fn is_folder(&self) -> bool {
        self.item_type == ITEM_TYPE_FOLDER
    }

    pub fn is_app(&self) -> bool {
        !matches!(
            self.item_type,
            ITEM_TYPE_FOLDER | ITEM_TYPE_WIDGET | ITEM_TYPE_CARD
        ) && self.package().is_some()
    }

    pub fn package(&self) -> Option<&str> {
        self.intent.as_deref().and_then(package_of)
    }

    fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        let opt = |name: &str| row.try_get::<Option<i64>, _>(name).ok().flatten();
        Ok(Self {
            id: row.try_get("_id")?,
            title: row.try_get::<Option<String>, _>("title").ok().flatten(),
            intent: row.try_get("intent")?,
            item_type: row.try_get::<Option<i64>, _>("itemType")?.unwrap_or(0),
            container: row.try_get::<Option<i64>, _>("container")?.unwrap_or(-100),
            screen: row.try_get::<Option<i64>, _>("screen")?.unwrap_or(0),
            cell_x: row.try_get::<Option<i64>, _>("cellX")?.unwrap_or(0),
            cell_y: row.try_get::<Option<i64>, _>("cellY")?.unwrap_or(0),
            span_x: opt("spanX").unwrap_or(1),
            span_y: opt("spanY").unwrap_or(1),
            rank: opt("rank").unwrap_or(0),
            user_id: opt("user_id").unwrap_or(0),
        })
    }
}

pub async fn read_items(
    conn: &mut SqliteConnection,
    table: &str,
) -> Result<Vec<ItemRow>, sqlx::Error> {
    let rows = sqlx::query(&format!("SELECT * FROM {table} ORDER BY _id"))
        .fetch_all(&mut *conn)
        .await?;
    rows.iter().map(ItemRow::from_row).collect()
}

/// `#Intent;...;component=com.a/.Main;end` → `com.a`.
pub fn package_of(intent: &str) -> Option<&str> {
    let (_, rest) = intent.split_once("component=")?;
    let component = rest.split(';').next()?;
    let package = component.split('/').next()?.trim();
    (!package.is_empty()).then_some(package)
}

/// `component=com.a/.Main` → `.Main`.
pub fn class_of(intent: &str) -> Option<&str> {
    let (_, rest) = intent.split_once("component=")?;
    let component = rest.split(';').next()?;
    component.split_once('/').map(|(_, cls)| cls)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn package_from_intent() {
        let intent = "#Intent;action=android.intent.action.MAIN;category=android.intent.category.LAUNCHER;launchFlags=0x10200000;component=com.tencent.mm/.ui.LauncherUI;end";
        assert_eq!(package_of(intent), Some("com.tencent.mm"));
        assert_eq!(class_of(intent), Some(".ui.LauncherUI"));
        assert_eq!(package_of("#Intent;action=x;end"), None);
        assert_eq!(package_of("component=/x;end"), None);
    }
}
