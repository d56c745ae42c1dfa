//! Interactive resolution of whatever the automated sources left behind.

use crate::models::ApplicationRecord;
use async_trait::async_trait;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap, HashSet};
use storage::{Category, ClassificationRecord, ClassificationStore, Source};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines, Stdin};
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManualDecision {
    Assign(Category),
    Skip,
    /// Leave the record untouched and move on.
    Defer,
    /// Stop prompting. Earlier decisions stay written.
    Quit,
}

#[derive(Debug, Clone)]
pub struct ManualPrompt<'a> {
    pub identifier: &'a str,
    pub display_name: Option<&'a str>,
    pub group: &'a str,
    /// 1-based.
    pub position: usize,
    pub total: usize,
    pub hint: Option<Category>,
}

#[async_trait]
pub trait ManualResolver: Send {
    async fn resolve(&mut self, prompt: &ManualPrompt<'_>) -> anyhow::Result<ManualDecision>;
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ManualReport {
    pub assigned: Vec<(String, Category)>,
    pub skipped: Vec<String>,
    pub deferred: Vec<String>,
    pub quit: bool,
}

/// `com.tencent.mm` → `com.tencent`.
pub fn similarity_key(identifier: &str) -> &str {
    match identifier.match_indices('.').nth(1) {
        Some((i, _)) => &identifier[..i],
        None => identifier,
    }
}

/// Prompts for every app without a resolved or skipped record, grouped by
/// similarity key. Each decision is written before the next prompt.
pub async fn resolve_pending(
    store: &dyn ClassificationStore,
    apps: &[ApplicationRecord],
    resolver: &mut dyn ManualResolver,
) -> anyhow::Result<ManualReport> {
    let mut group_categories: HashMap<&str, BTreeSet<Category>> = HashMap::new();
    let mut groups: Vec<(&str, Vec<&ApplicationRecord>)> = Vec::new();
    let mut seen = HashSet::new();
    let mut names: HashMap<&str, Option<String>> = HashMap::new();

    for app in apps {
        if !seen.insert(app.identifier.as_str()) {
            continue;
        }
        let key = similarity_key(&app.identifier);
        if !groups.iter().any(|(k, _)| *k == key) {
            groups.push((key, Vec::new()));
        }
        let record = store.get(&app.identifier)?;
        match record.as_ref().map(|r| (r.status.needs_lookup(), r.category)) {
            Some((false, Some(category))) => {
                group_categories.entry(key).or_default().insert(category);
                continue;
            }
            Some((false, None)) => continue,
            _ => {}
        }
        names.insert(
            app.identifier.as_str(),
            app.display_name
                .clone()
                .or_else(|| record.and_then(|r| r.display_name)),
        );
        if let Some((_, members)) = groups.iter_mut().find(|(k, _)| *k == key) {
            members.push(app);
        }
    }

    let total: usize = groups.iter().map(|(_, m)| m.len()).sum();
    let mut report = ManualReport::default();
    let mut position = 0;
    'groups: for (key, members) in &groups {
        let key: &str = key;
        for app in members {
            position += 1;
            let name = names.get(app.identifier.as_str()).cloned().flatten();
            let hint = group_categories
                .get(key)
                .filter(|cats| cats.len() == 1)
                .and_then(|cats| cats.iter().next().copied());
            let prompt = ManualPrompt {
                identifier: &app.identifier,
                display_name: name.as_deref(),
                group: key,
                position,
                total,
                hint,
            };
            match resolver.resolve(&prompt).await? {
                ManualDecision::Assign(category) => {
                    store.put(
                        ClassificationRecord::resolved(&app.identifier, category, Source::Manual)
                            .with_display_name(name),
                    )?;
                    group_categories.entry(key).or_default().insert(category);
                    report.assigned.push((app.identifier.clone(), category));
                }
                ManualDecision::Skip => {
                    store.put(ClassificationRecord::skipped(&app.identifier).with_display_name(name))?;
                    report.skipped.push(app.identifier.clone());
                }
                ManualDecision::Defer => report.deferred.push(app.identifier.clone()),
                ManualDecision::Quit => {
                    report.quit = true;
                    break 'groups;
                }
            }
        }
    }
    info!(
        assigned = report.assigned.len(),
        skipped = report.skipped.len(),
        deferred = report.deferred.len(),
        quit = report.quit,
        "manual resolution finished"
    );
    Ok(report)
}

/// `None` means the input was not understood and the prompt should repeat.
pub fn parse_answer(input: &str, hint: Option<Category>) -> Option<ManualDecision> {
    let input = input.trim();
    match input {
        "" => Some(hint.map_or(ManualDecision::Defer, ManualDecision::Assign)),
        "s" | "S" => Some(ManualDecision::Skip),
        "q" | "Q" => Some(ManualDecision::Quit),
        _ => {
            if let Ok(n) = input.parse::<usize>() {
                return n
                    .checked_sub(1)
                    .and_then(|i| Category::ALL.get(i))
                    .map(|c| ManualDecision::Assign(*c));
            }
            input.parse::<Category>().ok().map(ManualDecision::Assign)
        }
    }
}

/// Line-oriented prompt on stdin/stdout. Waits indefinitely for input.
pub struct ConsoleResolver {
    lines: Lines<BufReader<Stdin>>,
    menu_shown: bool,
}

impl Default for ConsoleResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl ConsoleResolver {
    pub fn new() -> Self {
        Self {
            lines: BufReader::new(tokio::io::stdin()).lines(),
            menu_shown: false,
        }
    }

    fn menu() -> String {
        let mut out = String::from("categories:\n");
        for (i, category) in Category::ALL.iter().enumerate() {
            out.push_str(&format!("  {:>2}. {}\n", i + 1, category.label()));
        }
        out.push_str("  s = skip, q = quit, empty = accept hint or defer\n");
        out
    }
}

#[async_trait]
impl ManualResolver for ConsoleResolver {
    async fn resolve(&mut self, prompt: &ManualPrompt<'_>) -> anyhow::Result<ManualDecision> {
        let mut stdout = tokio::io::stdout();
        if !self.menu_shown {
            stdout.write_all(Self::menu().as_bytes()).await?;
            self.menu_shown = true;
        }
        let mut header = format!("[{}/{}] {}", prompt.position, prompt.total, prompt.identifier);
        if let Some(name) = prompt.display_name {
            header.push_str(&format!(" ({name})"));
        }
        header.push_str(&format!("  group {}", prompt.group));
        if let Some(hint) = prompt.hint {
            header.push_str(&format!("  hint: {} {}", hint.ordinal(), hint.label()));
        }
        header.push('\n');
        stdout.write_all(header.as_bytes()).await?;

        loop {
            stdout.write_all(b"> ").await?;
            stdout.flush().await?;
            let Some(line) = self.lines.next_line().await? else {
                return Ok(ManualDecision::Quit);
            };
            match parse_answer(&line, prompt.hint) {
                Some(decision) => return Ok(decision),
                None => stdout.write_all(b"unrecognized answer\n").await?,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Container, Placement};
    use std::collections::VecDeque;
    use storage::{MemoryStore, Status};

    struct Scripted {
        answers: VecDeque<ManualDecision>,
        seen: Vec<(String, String, Option<Category>)>,
    }

    #[async_trait]
    impl ManualResolver for Scripted {
        async fn resolve(&mut self, prompt: &ManualPrompt<'_>) -> anyhow::Result<ManualDecision> {
            self.seen.push((prompt.identifier.into(), prompt.group.into(), prompt.hint));
            Ok(self.answers.pop_front().unwrap_or(ManualDecision::Quit))
        }
    }

    fn app(id: &str) -> ApplicationRecord {
        ApplicationRecord {
            identifier: id.into(),
            display_name: None,
            row_id: 0,
            placement: Some(Placement { container: Container::Desktop, screen: 1, cell_x: 0, cell_y: 0 }),
        }
    }

    #[test]
    fn keys_and_answers() {
        assert_eq!(similarity_key("com.tencent.mm"), "com.tencent");
        assert_eq!(similarity_key("com.whatsapp"), "com.whatsapp");
        assert_eq!(parse_answer("14", None), Some(ManualDecision::Assign(Category::Games)));
        assert_eq!(parse_answer(" 游戏 ", None), Some(ManualDecision::Assign(Category::Games)));
        assert_eq!(parse_answer("", Some(Category::Social)), Some(ManualDecision::Assign(Category::Social)));
        assert_eq!(parse_answer("", None), Some(ManualDecision::Defer));
        assert_eq!(parse_answer("s", None), Some(ManualDecision::Skip));
        assert_eq!(parse_answer("19", None), None);
        assert_eq!(parse_answer("0", None), None);
        assert_eq!(parse_answer("what", None), None);
    }

    #[tokio::test]
    async fn groups_by_first_appearance_with_hints() {
        let store = MemoryStore::new();
        store
            .put(ClassificationRecord::resolved("com.tencent.mm", Category::Social, Source::RemoteDomestic))
            .unwrap();
        let apps = vec![
            app("com.tencent.mm"),
            app("org.x.one"),
            app("com.tencent.qq"),
            app("org.x.two"),
            app("com.e"),
        ];
        let mut resolver = Scripted {
            answers: VecDeque::from([
                ManualDecision::Assign(Category::Social),
                ManualDecision::Assign(Category::Games),
                ManualDecision::Defer,
                ManualDecision::Skip,
            ]),
            seen: Vec::new(),
        };
        let report = resolve_pending(&store, &apps, &mut resolver).await.unwrap();

        let order: Vec<_> = resolver.seen.iter().map(|s| s.0.as_str()).collect();
        assert_eq!(order, vec!["com.tencent.qq", "org.x.one", "org.x.two", "com.e"]);
        assert_eq!(resolver.seen[0].2, Some(Category::Social));
        assert_eq!(resolver.seen[1].2, None);
        // org.x.one was assigned before org.x.two was prompted
        assert_eq!(resolver.seen[2].2, Some(Category::Games));

        assert_eq!(report.assigned.len(), 2);
        assert_eq!(report.deferred, vec!["org.x.two".to_string()]);
        assert!(store.get("org.x.two").unwrap().is_none());
        let e = store.get("com.e").unwrap().unwrap();
        assert_eq!(e.status, Status::Skipped);
        assert_eq!(store.get("com.tencent.qq").unwrap().unwrap().source, Some(Source::Manual));
    }

    #[tokio::test]
    async fn quit_keeps_earlier_decisions() {
        let store = MemoryStore::new();
        let apps = vec![app("com.a"), app("com.b")];
        let mut resolver = Scripted {
            answers: VecDeque::from([ManualDecision::Assign(Category::Finance), ManualDecision::Quit]),
            seen: Vec::new(),
        };
        let report = resolve_pending(&store, &apps, &mut resolver).await.unwrap();
        assert!(report.quit);
        assert!(store.get("com.a").unwrap().unwrap().is_resolved());
        assert!(store.get("com.b").unwrap().is_none());
    }
}
