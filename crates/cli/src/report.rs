//! Plain-text renderings of the run reports. `--json` bypasses these.

use crate::commands::{ResetReport, RestoreOutcome};
use regroup_core::classifier::{ClassificationReport, EnrichReport};
use regroup_core::models::{ApplicationRecord, Container};
use regroup_core::pipeline::{ImportReport, LayoutOutcome, RunSummary};
use regroup_core::resolver::ManualReport;
use serde::Serialize;
use std::fmt::Write as _;
use storage::CacheStats;

pub fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub fn apps(apps: &[ApplicationRecord]) -> String {
    let mut out = String::new();
    for app in apps {
        let place = match app.placement.map(|p| p.container) {
            Some(Container::Desktop) => "desktop".to_string(),
            Some(Container::Dock) => "dock".to_string(),
            Some(Container::Folder(id)) => format!("folder {id}"),
            Some(Container::Other(id)) => format!("container {id}"),
            None => "drawer".to_string(),
        };
        let _ = writeln!(
            out,
            "{:<48} {:<24} {}",
            app.identifier,
            app.display_name.as_deref().unwrap_or("-"),
            place
        );
    }
    let _ = write!(out, "{} apps", apps.len());
    out
}

pub fn classification(report: &ClassificationReport) -> String {
    let mut out = String::new();
    for r in &report.resolved {
        let _ = writeln!(out, "  {} -> {} ({})", r.identifier, r.category, r.source);
    }
    if !report.failures.is_empty() {
        out.push_str("failures:\n");
        for f in &report.failures {
            let _ = writeln!(out, "  {} [{}] {}", f.identifier, f.source, f.reason);
        }
    }
    let _ = write!(
        out,
        "classified {} of {} pending, {} still unresolved",
        report.resolved.len(),
        report.attempted,
        report.unresolved.len()
    );
    if report.interrupted {
        out.push_str(" (interrupted, run again to resume)");
    }
    out
}

pub fn manual(report: &ManualReport) -> String {
    let mut out = format!(
        "{} assigned, {} skipped, {} deferred",
        report.assigned.len(),
        report.skipped.len(),
        report.deferred.len()
    );
    if report.quit {
        out.push_str(" (stopped early)");
    }
    out
}

pub fn names(report: &EnrichReport) -> String {
    let mut out = String::new();
    for (id, name) in &report.filled {
        let _ = writeln!(out, "  {id}: {name}");
    }
    let _ = write!(
        out,
        "{} names filled, {} still missing",
        report.filled.len(),
        report.missing.len()
    );
    out
}

pub fn stats(stats: &CacheStats) -> String {
    let mut out = format!("{} records\n", stats.total);
    for (status, n) in &stats.by_status {
        let _ = writeln!(out, "  {status:<10} {n}");
    }
    if !stats.by_category.is_empty() {
        out.push_str("resolved by category:\n");
    }
    for (category, n) in &stats.by_category {
        let _ = writeln!(out, "  {:>2}. {:<12} {n}", category.ordinal(), category.label());
    }
    out.trim_end().to_string()
}

pub fn reset(report: &ResetReport) -> String {
    let mut out = format!("{} records marked pending", report.reset.len());
    if !report.unknown.is_empty() {
        let _ = write!(out, ", not in cache: {}", report.unknown.join(", "));
    }
    out
}

pub fn import(report: &ImportReport) -> String {
    let mut out = format!(
        "{} imported, {} older than the cache",
        report.imported, report.ignored
    );
    if !report.rejected.is_empty() {
        let _ = write!(out, ", {} rejected", report.rejected.len());
    }
    out
}

pub fn layout(outcome: &LayoutOutcome, dry_run: bool) -> String {
    if dry_run {
        format!("{}\n(dry run, backup unchanged)", outcome.summary)
    } else {
        outcome.summary.clone()
    }
}

pub fn restore(outcome: &RestoreOutcome) -> String {
    match outcome {
        RestoreOutcome::Restored(report) => {
            format!("restored {} files from the restore point", report.restored.len())
        }
        RestoreOutcome::Discarded { existed: true } => "restore point discarded".to_string(),
        RestoreOutcome::Discarded { existed: false } => "no restore point to discard".to_string(),
    }
}

pub fn run(summary: &RunSummary) -> String {
    let mut out = classification(&summary.classification);
    if let Some(m) = &summary.manual {
        let _ = write!(out, "\n{}", manual(m));
    }
    if let Some(n) = &summary.names {
        let _ = write!(out, "\n{}", names(n));
    }
    if let Some(l) = &summary.layout {
        let _ = write!(out, "\n{}", layout(l, false));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use regroup_core::classifier::{Failure, Resolution};
    use storage::{Category, ClassificationRecord, Source};

    #[test]
    fn classification_lists_failures_and_interruption() {
        let report = ClassificationReport {
            attempted: 3,
            resolved: vec![Resolution {
                identifier: "com.a".into(),
                category: Category::Social,
                source: Source::RemoteInternational,
            }],
            failures: vec![Failure {
                identifier: "com.b".into(),
                source: Source::RemoteDomestic,
                reason: "rate limited".into(),
            }],
            unresolved: vec!["com.b".into(), "com.c".into()],
            interrupted: true,
        };
        let text = classification(&report);
        assert!(text.contains("com.a -> 社交通讯"));
        assert!(text.contains("com.b [remote_domestic] rate limited"));
        assert!(text.ends_with("classified 1 of 3 pending, 2 still unresolved (interrupted, run again to resume)"));
    }

    #[test]
    fn stats_follow_category_enumeration() {
        let records = vec![
            ClassificationRecord::resolved("com.g", Category::Games, Source::Manual),
            ClassificationRecord::resolved("com.s", Category::Social, Source::Manual),
            ClassificationRecord::skipped("com.x"),
        ];
        let text = stats(&CacheStats::from_records(&records));
        let social = text.find("社交通讯").unwrap();
        let games = text.find("游戏").unwrap();
        assert!(social < games);
        assert!(text.starts_with("3 records"));
    }
}
