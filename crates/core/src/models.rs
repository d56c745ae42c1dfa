use serde::{Deserialize, Serialize};
use storage::Category;

pub const DESKTOP_CONTAINER: i64 = -100;
pub const DOCK_CONTAINER: i64 = -101;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Container {
    Desktop,
    Dock,
    Folder(i64),
    Other(i64),
}

impl Container {
    /// Only desktop and folder apps are regrouped. The dock stays as it is.
    pub fn is_movable(self) -> bool {
        matches!(self, Container::Desktop | Container::Folder(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Placement {
    pub container: Container,
    pub screen: i64,
    pub cell_x: i64,
    pub cell_y: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApplicationRecord {
    pub identifier: String,
    pub display_name: Option<String>,
    /// Launcher row carrying this app (lowest `_id` when duplicated).
    pub row_id: i64,
    pub placement: Option<Placement>,
}

impl ApplicationRecord {
    pub fn is_movable(&self) -> bool {
        self.placement
            .map(|p| p.container.is_movable())
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum UnresolvedPolicy {
    #[default]
    LeaveInPlace,
    DefaultBucket,
}

/// Rows of folder cells on one desktop screen.
pub const GRID_ROWS: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapacityPolicy {
    pub max_apps_per_folder: usize,
    pub max_folders_per_screen: usize,
    pub start_screen: i64,
    pub grid_columns: usize,
    pub unresolved: UnresolvedPolicy,
}

impl Default for CapacityPolicy {
    fn default() -> Self {
        Self {
            max_apps_per_folder: 40,
            max_folders_per_screen: 24,
            start_screen: 1,
            grid_columns: 4,
            unresolved: UnresolvedPolicy::LeaveInPlace,
        }
    }
}

pub const DEFAULT_BUCKET_TITLE: &str = "其他";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FolderPlan {
    /// `None` for the default bucket of unresolved apps.
    pub category: Option<Category>,
    pub title: String,
    /// 1-based index among folders of the same category.
    pub part: usize,
    pub applications: Vec<String>,
    pub screen: i64,
    /// Slot index on its screen, in scan order.
    pub position: usize,
    pub cell_x: i64,
    pub cell_y: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExclusionReason {
    Skipped,
    Unresolved,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Exclusion {
    pub identifier: String,
    pub reason: ExclusionReason,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LayoutPlan {
    pub folders: Vec<FolderPlan>,
    pub excluded: Vec<Exclusion>,
    pub policy: CapacityPolicy,
}

impl LayoutPlan {
    pub fn is_empty(&self) -> bool {
        self.folders.is_empty()
    }

    /// Number of screens the folders occupy, counted from the start screen.
    pub fn screens_used(&self) -> i64 {
        self.folders
            .iter()
            .map(|f| f.screen - self.policy.start_screen + 1)
            .max()
            .unwrap_or(0)
    }

    pub fn planned_identifiers(&self) -> impl Iterator<Item = &str> {
        self.folders
            .iter()
            .flat_map(|f| f.applications.iter().map(String::as_str))
    }

    pub fn summary(&self) -> String {
        let mut out = String::new();
        for folder in &self.folders {
            out.push_str(&format!(
                "screen {} ({}, {})  {}  [{} apps]\n",
                folder.screen,
                folder.cell_x,
                folder.cell_y,
                folder.title,
                folder.applications.len()
            ));
        }
        let planned: usize = self.folders.iter().map(|f| f.applications.len()).sum();
        out.push_str(&format!(
            "{} folders, {} apps, {} screens, {} left in place",
            self.folders.len(),
            planned,
            self.screens_used(),
            self.excluded.len()
        ));
        out
    }
}
