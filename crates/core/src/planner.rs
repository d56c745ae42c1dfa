//! Category folders onto a grid. Pure and deterministic: the output depends
//! only on the extraction order of `apps`, the records, and the policy.

use crate::error::EngineError;
use crate::models::{
    ApplicationRecord, CapacityPolicy, Exclusion, ExclusionReason, FolderPlan, LayoutPlan,
    UnresolvedPolicy, DEFAULT_BUCKET_TITLE, GRID_ROWS,
};
use std::collections::{BTreeMap, HashMap, HashSet};
use storage::{Category, ClassificationRecord, Status};

impl CapacityPolicy {
    pub fn validate(&self) -> Result<(), EngineError> {
        let zero = [
            ("max_apps_per_folder", self.max_apps_per_folder == 0),
            ("max_folders_per_screen", self.max_folders_per_screen == 0),
            ("grid_columns", self.grid_columns == 0),
        ];
        if let Some((name, _)) = zero.iter().find(|(_, is_zero)| *is_zero) {
            return Err(EngineError::InvalidPolicy(format!("{name} must be at least 1")));
        }
        if self.start_screen < 0 {
            return Err(EngineError::InvalidPolicy(format!(
                "start_screen {} is negative",
                self.start_screen
            )));
        }
        let rows = self.max_folders_per_screen.div_ceil(self.grid_columns);
        if rows > GRID_ROWS {
            return Err(EngineError::InvalidPolicy(format!(
                "{} folders in {} columns need {rows} rows, the screen has {GRID_ROWS}",
                self.max_folders_per_screen, self.grid_columns
            )));
        }
        Ok(())
    }
}

fn folder_title(label: &str, part: usize) -> String {
    if part == 1 {
        label.to_string()
    } else {
        format!("{label} {part}")
    }
}

pub fn plan(
    apps: &[ApplicationRecord],
    records: &[ClassificationRecord],
    policy: &CapacityPolicy,
) -> Result<LayoutPlan, EngineError> {
    policy.validate()?;
    let by_id: HashMap<&str, &ClassificationRecord> =
        records.iter().map(|r| (r.identifier.as_str(), r)).collect();

    let mut buckets: BTreeMap<Category, Vec<String>> = BTreeMap::new();
    let mut leftovers = Vec::new();
    let mut excluded = Vec::new();
    let mut seen = HashSet::new();

    for app in apps.iter().filter(|a| a.is_movable()) {
        if !seen.insert(app.identifier.as_str()) {
            continue;
        }
        let record = by_id.get(app.identifier.as_str());
        match record.map(|r| (r.status, r.category)) {
            Some((Status::Resolved, Some(category))) => {
                buckets.entry(category).or_default().push(app.identifier.clone());
            }
            Some((Status::Skipped, _)) => excluded.push(Exclusion {
                identifier: app.identifier.clone(),
                reason: ExclusionReason::Skipped,
            }),
            _ => match policy.unresolved {
                UnresolvedPolicy::DefaultBucket => leftovers.push(app.identifier.clone()),
                UnresolvedPolicy::LeaveInPlace => excluded.push(Exclusion {
                    identifier: app.identifier.clone(),
                    reason: ExclusionReason::Unresolved,
                }),
            },
        }
    }

    let mut groups: Vec<(Option<Category>, &str, Vec<String>)> = buckets
        .into_iter()
        .map(|(category, ids)| (Some(category), category.label(), ids))
        .collect();
    if !leftovers.is_empty() {
        groups.push((None, DEFAULT_BUCKET_TITLE, leftovers));
    }

    let per_screen = policy.max_folders_per_screen;
    let columns = policy.grid_columns;
    let mut folders = Vec::new();
    for (category, label, ids) in groups {
        for (i, chunk) in ids.chunks(policy.max_apps_per_folder).enumerate() {
            let slot = folders.len();
            let position = slot % per_screen;
            folders.push(FolderPlan {
                category,
                title: folder_title(label, i + 1),
                part: i + 1,
                applications: chunk.to_vec(),
                screen: policy.start_screen + (slot / per_screen) as i64,
                position,
                cell_x: (position % columns) as i64,
                cell_y: (position / columns) as i64,
            });
        }
    }

    Ok(LayoutPlan {
        folders,
        excluded,
        policy: *policy,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Container, Placement};
    use storage::Source;

    fn app(id: &str, container: Container) -> ApplicationRecord {
        ApplicationRecord {
            identifier: id.to_string(),
            display_name: None,
            row_id: 0,
            placement: Some(Placement {
                container,
                screen: 1,
                cell_x: 0,
                cell_y: 0,
            }),
        }
    }

    fn resolved(id: &str, category: Category) -> ClassificationRecord {
        ClassificationRecord::resolved(id, category, Source::Manual)
    }

    #[test]
    fn folders_follow_category_order_then_extraction_order() {
        let apps: Vec<_> = ["com.g1", "com.s1", "com.g2", "com.s2"]
            .iter()
            .map(|id| app(id, Container::Desktop))
            .collect();
        let records = vec![
            resolved("com.g1", Category::Games),
            resolved("com.s1", Category::Social),
            resolved("com.g2", Category::Games),
            resolved("com.s2", Category::Social),
        ];
        let plan = plan(&apps, &records, &CapacityPolicy::default()).unwrap();
        assert_eq!(plan.folders.len(), 2);
        assert_eq!(plan.folders[0].title, "社交通讯");
        assert_eq!(plan.folders[0].applications, vec!["com.s1", "com.s2"]);
        assert_eq!(plan.folders[1].title, "游戏");
        assert_eq!((plan.folders[1].cell_x, plan.folders[1].cell_y), (1, 0));
    }

    #[test]
    fn split_folders_cross_screens_contiguously() {
        let ids: Vec<String> = (0..7).map(|i| format!("com.app{i}")).collect();
        let apps: Vec<_> = ids.iter().map(|id| app(id, Container::Folder(9))).collect();
        let records: Vec<_> = ids.iter().map(|id| resolved(id, Category::Finance)).collect();
        let policy = CapacityPolicy {
            max_apps_per_folder: 2,
            max_folders_per_screen: 3,
            start_screen: 2,
            grid_columns: 2,
            ..CapacityPolicy::default()
        };
        let plan = plan(&apps, &records, &policy).unwrap();
        let titles: Vec<_> = plan.folders.iter().map(|f| f.title.as_str()).collect();
        assert_eq!(titles, vec!["金融支付", "金融支付 2", "金融支付 3", "金融支付 4"]);
        assert!(plan.folders.iter().all(|f| f.applications.len() <= 2));
        let slots: Vec<_> = plan
            .folders
            .iter()
            .map(|f| (f.screen, f.position, f.cell_x, f.cell_y))
            .collect();
        assert_eq!(slots, vec![(2, 0, 0, 0), (2, 1, 1, 0), (2, 2, 0, 1), (3, 0, 0, 0)]);
        assert_eq!(plan.screens_used(), 2);
    }

    #[test]
    fn unresolved_policy_and_skips() {
        let apps = vec![
            app("com.a", Container::Desktop),
            app("com.skip", Container::Desktop),
            app("com.unknown", Container::Desktop),
            app("com.dock", Container::Dock),
        ];
        let records = vec![
            resolved("com.a", Category::Browser),
            ClassificationRecord::skipped("com.skip"),
            resolved("com.dock", Category::Social),
            resolved("com.not.installed", Category::Games),
        ];

        let left = plan(&apps, &records, &CapacityPolicy::default()).unwrap();
        assert_eq!(left.folders.len(), 1);
        assert_eq!(
            left.excluded,
            vec![
                Exclusion { identifier: "com.skip".into(), reason: ExclusionReason::Skipped },
                Exclusion { identifier: "com.unknown".into(), reason: ExclusionReason::Unresolved },
            ]
        );

        let bucket = CapacityPolicy {
            unresolved: UnresolvedPolicy::DefaultBucket,
            ..CapacityPolicy::default()
        };
        let with_bucket = plan(&apps, &records, &bucket).unwrap();
        let last = with_bucket.folders.last().unwrap();
        assert_eq!(last.title, DEFAULT_BUCKET_TITLE);
        assert_eq!(last.category, None);
        assert_eq!(last.applications, vec!["com.unknown"]);
        assert!(with_bucket.planned_identifiers().all(|id| id != "com.skip" && id != "com.dock"));
    }

    #[test]
    fn identical_inputs_identical_plans() {
        let apps: Vec<_> = (0..30)
            .map(|i| app(&format!("pkg.{i}"), Container::Desktop))
            .collect();
        let records: Vec<_> = (0..30)
            .map(|i| resolved(&format!("pkg.{i}"), Category::ALL[i % Category::ALL.len()]))
            .collect();
        let policy = CapacityPolicy {
            max_apps_per_folder: 1,
            ..CapacityPolicy::default()
        };
        let first = plan(&apps, &records, &policy).unwrap();
        let mut shuffled = records.clone();
        shuffled.reverse();
        assert_eq!(first, plan(&apps, &shuffled, &policy).unwrap());
        for id in first.planned_identifiers() {
            assert_eq!(first.planned_identifiers().filter(|x| *x == id).count(), 1);
        }
    }

    #[test]
    fn zero_capacity_is_rejected() {
        let policy = CapacityPolicy {
            max_apps_per_folder: 0,
            ..CapacityPolicy::default()
        };
        assert!(matches!(
            plan(&[], &[], &policy),
            Err(EngineError::InvalidPolicy(_))
        ));
    }

    #[test]
    fn folders_past_the_last_grid_row_are_rejected() {
        let crowded = CapacityPolicy {
            max_folders_per_screen: 30,
            ..CapacityPolicy::default()
        };
        let err = plan(&[], &[], &crowded).unwrap_err();
        assert!(matches!(err, EngineError::InvalidPolicy(ref m) if m.contains("8 rows")), "{err}");

        let full = CapacityPolicy {
            max_folders_per_screen: 24,
            ..CapacityPolicy::default()
        };
        assert!(full.validate().is_ok());
        let narrow = CapacityPolicy {
            max_folders_per_screen: 7,
            grid_columns: 1,
            ..CapacityPolicy::default()
        };
        assert!(narrow.validate().is_err());
    }
}
