//! Multi-source classification over the cache.
//!
//! Lookups for different identifiers run concurrently; the sources for one
//! identifier are always tried in priority order. Every outcome flows
//! through a channel to a single writer, the only caller of `put`.

use crate::error::EngineError;
use crate::models::ApplicationRecord;
use crate::retry::{with_retry, RetryError, RetryPolicy};
use providers::{known_names, CategorySource, ProviderError, RateLimiter, SourceChain};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use storage::{Category, ClassificationRecord, ClassificationStore, Source, Status};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

pub const NO_CATEGORY_MATCH: &str = "no category match";

#[derive(Debug, Clone, Copy)]
pub struct ClassifierSettings {
    pub concurrency: usize,
    pub retry: RetryPolicy,
    pub call_timeout: Duration,
    /// Query `failed` records again. Off leaves them for manual resolution.
    pub retry_failed: bool,
}

impl Default for ClassifierSettings {
    fn default() -> Self {
        Self {
            concurrency: 4,
            retry: RetryPolicy::default(),
            call_timeout: Duration::from_secs(15),
            retry_failed: true,
        }
    }
}

/// Minimum spacing between calls to one source unless configured otherwise.
pub fn default_interval(source: Source) -> Duration {
    match source {
        Source::Ai => Duration::from_millis(1000),
        Source::Manual => Duration::ZERO,
        Source::RemoteInternational | Source::RemoteDomestic => Duration::from_millis(500),
    }
}

#[derive(Clone)]
struct SourceSlot {
    source: Arc<dyn CategorySource>,
    limiter: Arc<RateLimiter>,
}

impl SourceSlot {
    fn kind(&self) -> Source {
        self.source.source()
    }

    async fn call(
        &self,
        identifier: &str,
        display_name: Option<&str>,
        timeout: Duration,
    ) -> Result<providers::SourceAnswer, ProviderError> {
        self.limiter.acquire().await;
        match tokio::time::timeout(timeout, self.source.lookup(identifier, display_name)).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Timeout),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Resolution {
    pub identifier: String,
    pub category: Category,
    pub source: Source,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Failure {
    pub identifier: String,
    pub source: Source,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ClassificationReport {
    pub attempted: usize,
    pub resolved: Vec<Resolution>,
    pub failures: Vec<Failure>,
    /// Still without a category after this run, in extraction order.
    pub unresolved: Vec<String>,
    pub interrupted: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct EnrichReport {
    pub filled: Vec<(String, String)>,
    pub missing: Vec<String>,
}

#[derive(Debug)]
struct LookupOutcome {
    identifier: String,
    app_name: Option<String>,
    answer_name: Option<String>,
    resolution: Option<(Category, Source)>,
    last_source: Option<Source>,
    failures: Vec<(Source, String)>,
    interrupted: bool,
}

pub struct Classifier {
    store: Arc<dyn ClassificationStore>,
    slots: Arc<Vec<SourceSlot>>,
    settings: ClassifierSettings,
    cancel: Arc<AtomicBool>,
}

impl Classifier {
    pub fn new(
        store: Arc<dyn ClassificationStore>,
        chain: &SourceChain,
        settings: ClassifierSettings,
    ) -> Self {
        let slots = chain
            .iter()
            .map(|source| SourceSlot {
                limiter: Arc::new(RateLimiter::new(default_interval(source.source()))),
                source: Arc::clone(source),
            })
            .collect();
        Self {
            store,
            slots: Arc::new(slots),
            settings,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Replaces the limiter of every source of `kind`.
    pub fn with_rate_limit(mut self, kind: Source, interval: Duration) -> Self {
        let slots = self
            .slots
            .iter()
            .map(|slot| {
                if slot.kind() == kind {
                    SourceSlot {
                        source: Arc::clone(&slot.source),
                        limiter: Arc::new(RateLimiter::new(interval)),
                    }
                } else {
                    slot.clone()
                }
            })
            .collect();
        self.slots = Arc::new(slots);
        self
    }

    /// Shares an externally owned cancellation flag (ctrl-c).
    pub fn with_cancel(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    pub fn store(&self) -> &Arc<dyn ClassificationStore> {
        &self.store
    }

    pub fn sources(&self) -> Vec<Source> {
        self.slots.iter().map(SourceSlot::kind).collect()
    }

    /// Apps that still need an automated lookup: no record yet, a pending
    /// one or a failed one. Resolved and skipped records are never
    /// re-queried; failed ones are left alone when `retry_failed` is off.
    pub fn pending(
        &self,
        apps: &[ApplicationRecord],
    ) -> Result<Vec<ApplicationRecord>, EngineError> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for app in apps {
            if !seen.insert(app.identifier.as_str()) {
                continue;
            }
            let needs = match self.store.get(&app.identifier)? {
                None => true,
                Some(record) => match record.status {
                    Status::Pending => true,
                    Status::Failed => self.settings.retry_failed,
                    Status::Resolved | Status::Skipped => false,
                },
            };
            if needs {
                out.push(app.clone());
            }
        }
        Ok(out)
    }

    pub async fn classify_all(
        &self,
        apps: &[ApplicationRecord],
    ) -> Result<ClassificationReport, EngineError> {
        let pending = self.pending(apps)?;
        let mut report = ClassificationReport {
            attempted: pending.len(),
            ..ClassificationReport::default()
        };
        if pending.is_empty() || self.slots.is_empty() {
            report.unresolved = pending.into_iter().map(|a| a.identifier).collect();
            return Ok(report);
        }
        info!(
            pending = pending.len(),
            sources = ?self.sources(),
            concurrency = self.settings.concurrency,
            "classifying"
        );

        let order: HashMap<String, usize> = pending
            .iter()
            .enumerate()
            .map(|(i, a)| (a.identifier.clone(), i))
            .collect();
        let (tx, mut rx) = mpsc::unbounded_channel::<LookupOutcome>();
        let dispatcher = tokio::spawn(dispatch(
            pending,
            Arc::clone(&self.slots),
            self.settings,
            Arc::clone(&self.cancel),
            tx,
        ));

        let mut finished = HashSet::new();
        while let Some(outcome) = rx.recv().await {
            if let Err(e) = self.write_outcome(&outcome, &mut report) {
                dispatcher.abort();
                return Err(e);
            }
            if outcome.resolution.is_some() {
                finished.insert(outcome.identifier);
            }
        }
        if let Err(e) = dispatcher.await {
            warn!(error = %e, "classification dispatcher ended abnormally");
        }

        let rank = |id: &str| order.get(id).copied().unwrap_or(usize::MAX);
        report.resolved.sort_by_key(|r| rank(&r.identifier));
        report.failures.sort_by_key(|f| rank(&f.identifier));
        let mut unresolved: Vec<String> = order
            .keys()
            .filter(|id| !finished.contains(*id))
            .cloned()
            .collect();
        unresolved.sort_by_key(|id| rank(id));
        report.unresolved = unresolved;
        report.interrupted = self.cancel.load(Ordering::Relaxed);
        info!(
            resolved = report.resolved.len(),
            unresolved = report.unresolved.len(),
            failures = report.failures.len(),
            interrupted = report.interrupted,
            "classification finished"
        );
        Ok(report)
    }

    fn write_outcome(
        &self,
        outcome: &LookupOutcome,
        report: &mut ClassificationReport,
    ) -> Result<(), EngineError> {
        for (source, reason) in &outcome.failures {
            report.failures.push(Failure {
                identifier: outcome.identifier.clone(),
                source: *source,
                reason: reason.clone(),
            });
        }

        let existing_name = || -> Result<Option<String>, EngineError> {
            Ok(self
                .store
                .get(&outcome.identifier)?
                .and_then(|r| r.display_name))
        };
        let name = match outcome.app_name.clone().or_else(|| outcome.answer_name.clone()) {
            Some(name) => Some(name),
            None => existing_name()?,
        };

        let record = match (outcome.resolution, outcome.last_source) {
            (Some((category, source)), _) => {
                report.resolved.push(Resolution {
                    identifier: outcome.identifier.clone(),
                    category,
                    source,
                });
                ClassificationRecord::resolved(&outcome.identifier, category, source)
            }
            // interrupted mid-chain: leave the record as it was
            _ if outcome.interrupted => return Ok(()),
            (None, Some(last)) => {
                let note = outcome
                    .failures
                    .iter()
                    .rev()
                    .find(|(s, _)| *s == last)
                    .map(|(_, reason)| format!("{NO_CATEGORY_MATCH}; last error: {reason}"))
                    .unwrap_or_else(|| NO_CATEGORY_MATCH.to_string());
                ClassificationRecord::failed(&outcome.identifier, last, note)
            }
            (None, None) => return Ok(()),
        };
        debug!(identifier = %outcome.identifier, status = %record.status, "writing record");
        self.store.put(record.with_display_name(name))?;
        Ok(())
    }

    /// Backfills display names. Lookup failures are logged and skipped.
    pub async fn enrich_names(
        &self,
        apps: &[ApplicationRecord],
    ) -> Result<EnrichReport, EngineError> {
        // names: domestic store first, then international; never the AI
        let mut name_slots: Vec<&SourceSlot> = self
            .slots
            .iter()
            .filter(|s| matches!(s.kind(), Source::RemoteDomestic | Source::RemoteInternational))
            .collect();
        name_slots.sort_by_key(|s| s.kind() != Source::RemoteDomestic);

        let mut report = EnrichReport::default();
        let mut seen = HashSet::new();
        for app in apps {
            if !seen.insert(app.identifier.as_str()) {
                continue;
            }
            if self.cancel.load(Ordering::Relaxed) {
                break;
            }
            let existing = self.store.get(&app.identifier)?;
            if existing
                .as_ref()
                .and_then(|r| r.display_name.as_deref())
                .is_some_and(|n| !n.trim().is_empty())
            {
                continue;
            }

            let mut name = app
                .display_name
                .clone()
                .or_else(|| known_names::known_name(&app.identifier).map(str::to_string));
            for slot in &name_slots {
                if name.is_some() {
                    break;
                }
                match slot.call(&app.identifier, None, self.settings.call_timeout).await {
                    Ok(answer) => name = answer.display_name,
                    Err(e) => {
                        warn!(identifier = %app.identifier, source = %slot.kind(), error = %e, "name lookup failed")
                    }
                }
            }

            match name {
                Some(name) => {
                    let record = existing
                        .unwrap_or_else(|| ClassificationRecord::pending(&app.identifier))
                        .with_display_name(Some(name.clone()))
                        .with_timestamp(chrono::Utc::now());
                    self.store.put(record)?;
                    report.filled.push((app.identifier.clone(), name));
                }
                None => report.missing.push(app.identifier.clone()),
            }
        }
        info!(
            filled = report.filled.len(),
            missing = report.missing.len(),
            "names enriched"
        );
        Ok(report)
    }
}

async fn dispatch(
    pending: Vec<ApplicationRecord>,
    slots: Arc<Vec<SourceSlot>>,
    settings: ClassifierSettings,
    cancel: Arc<AtomicBool>,
    tx: mpsc::UnboundedSender<LookupOutcome>,
) {
    let semaphore = Arc::new(Semaphore::new(settings.concurrency.max(1)));
    let mut workers = JoinSet::new();

    for app in pending {
        let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
            break;
        };
        if cancel.load(Ordering::Relaxed) {
            debug!("cancelled, not starting further lookups");
            break;
        }
        let slots = Arc::clone(&slots);
        let cancel = Arc::clone(&cancel);
        let tx = tx.clone();
        workers.spawn(async move {
            let _permit = permit;
            let outcome = lookup(&slots, &settings, &cancel, app).await;
            // the receiver only goes away when the writer failed
            let _ = tx.send(outcome);
        });
    }
    drop(tx);

    while let Some(joined) = workers.join_next().await {
        if let Err(e) = joined {
            warn!(error = %e, "lookup worker panicked");
        }
    }
}

async fn lookup(
    slots: &[SourceSlot],
    settings: &ClassifierSettings,
    cancel: &AtomicBool,
    app: ApplicationRecord,
) -> LookupOutcome {
    let mut outcome = LookupOutcome {
        identifier: app.identifier,
        app_name: app.display_name,
        answer_name: None,
        resolution: None,
        last_source: None,
        failures: Vec::new(),
        interrupted: false,
    };
    let identifier = outcome.identifier.as_str();
    let hint = outcome.app_name.as_deref();
    let timeout = settings.call_timeout;

    for slot in slots {
        if cancel.load(Ordering::Relaxed) {
            outcome.interrupted = true;
            break;
        }
        let kind = slot.kind();
        let result = with_retry(&settings.retry, cancel, ProviderError::is_transient, move |_| {
            slot.call(identifier, hint, timeout)
        })
        .await;

        match result {
            Ok(answer) => {
                if outcome.answer_name.is_none() {
                    outcome.answer_name = answer.display_name;
                }
                outcome.last_source = Some(kind);
                if let Some(category) = answer.category {
                    debug!(identifier, source = %kind, category = %category, "resolved");
                    outcome.resolution = Some((category, kind));
                    break;
                }
                debug!(identifier, source = %kind, "not found");
            }
            Err(RetryError::Cancelled) => {
                outcome.interrupted = true;
                break;
            }
            Err(RetryError::Failed { error, attempts }) => {
                warn!(identifier, source = %kind, attempts, error = %error, "source failed");
                outcome.last_source = Some(kind);
                outcome
                    .failures
                    .push((kind, EngineError::from_provider(kind, &error).to_string()));
            }
        }
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Container, Placement};
    use providers::SourceAnswer;
    use std::sync::atomic::AtomicUsize;
    use storage::MemoryStore;

    struct Scripted {
        kind: Source,
        answers: HashMap<&'static str, Result<Category, ProviderError>>,
        calls: AtomicUsize,
    }

    impl Scripted {
        fn new(kind: Source) -> Self {
            Self {
                kind,
                answers: HashMap::new(),
                calls: AtomicUsize::new(0),
            }
        }

        fn answer(mut self, id: &'static str, category: Category) -> Self {
            self.answers.insert(id, Ok(category));
            self
        }

        fn fail(mut self, id: &'static str, err: ProviderError) -> Self {
            self.answers.insert(id, Err(err));
            self
        }
    }

    #[async_trait::async_trait]
    impl CategorySource for Scripted {
        fn source(&self) -> Source {
            self.kind
        }

        async fn lookup(&self, id: &str, _: Option<&str>) -> Result<SourceAnswer, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.answers.get(id) {
                Some(Ok(c)) => Ok(SourceAnswer::found(*c).with_name(Some(format!("{id} name")))),
                Some(Err(ProviderError::Timeout)) => Err(ProviderError::Timeout),
                Some(Err(e)) => Err(ProviderError::RequestFailed(e.to_string())),
                None => Ok(SourceAnswer::not_found()),
            }
        }
    }

    fn app(id: &str) -> ApplicationRecord {
        ApplicationRecord {
            identifier: id.to_string(),
            display_name: None,
            row_id: 0,
            placement: Some(Placement {
                container: Container::Desktop,
                screen: 1,
                cell_x: 0,
                cell_y: 0,
            }),
        }
    }

    fn fast() -> ClassifierSettings {
        ClassifierSettings {
            concurrency: 2,
            retry: RetryPolicy {
                max_attempts: 3,
                backoff: Duration::from_millis(10),
            },
            call_timeout: Duration::from_secs(5),
            retry_failed: true,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn first_match_wins_and_later_sources_are_not_called() {
        let store = Arc::new(MemoryStore::new());
        let intl = Arc::new(Scripted::new(Source::RemoteInternational).answer("com.a", Category::Social));
        let dom = Arc::new(
            Scripted::new(Source::RemoteDomestic)
                .answer("com.a", Category::Games)
                .answer("com.b", Category::Shopping),
        );
        let chain = SourceChain::new()
            .with_source(dom.clone())
            .with_source(intl.clone());
        let classifier = Classifier::new(store.clone(), &chain, fast());

        let report = classifier
            .classify_all(&[app("com.a"), app("com.b"), app("com.c")])
            .await
            .unwrap();

        assert_eq!(report.attempted, 3);
        assert_eq!(
            report.resolved,
            vec![
                Resolution { identifier: "com.a".into(), category: Category::Social, source: Source::RemoteInternational },
                Resolution { identifier: "com.b".into(), category: Category::Shopping, source: Source::RemoteDomestic },
            ]
        );
        assert_eq!(report.unresolved, vec!["com.c".to_string()]);
        assert_eq!(intl.calls.load(Ordering::SeqCst), 3);
        // com.a never reached the domestic source
        assert_eq!(dom.calls.load(Ordering::SeqCst), 2);

        let c = store.get("com.c").unwrap().unwrap();
        assert_eq!(c.status, Status::Failed);
        assert_eq!(c.source, Some(Source::RemoteDomestic));
        assert_eq!(c.note.as_deref(), Some(NO_CATEGORY_MATCH));
        assert_eq!(store.get("com.a").unwrap().unwrap().display_name.as_deref(), Some("com.a name"));
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_retry_then_fall_through() {
        let store = Arc::new(MemoryStore::new());
        let intl = Arc::new(Scripted::new(Source::RemoteInternational).fail("com.a", ProviderError::Timeout));
        let dom = Arc::new(Scripted::new(Source::RemoteDomestic).answer("com.a", Category::Finance));
        let chain = SourceChain::new().with_source(intl.clone()).with_source(dom.clone());
        let classifier = Classifier::new(store.clone(), &chain, fast());

        let report = classifier.classify_all(&[app("com.a")]).await.unwrap();
        assert_eq!(intl.calls.load(Ordering::SeqCst), 3);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].source, Source::RemoteInternational);
        assert_eq!(report.resolved[0].category, Category::Finance);
        assert!(store.get("com.a").unwrap().unwrap().is_resolved());
    }

    #[tokio::test(start_paused = true)]
    async fn resolved_and_skipped_are_never_queried() {
        let store = Arc::new(MemoryStore::new());
        store.put(ClassificationRecord::skipped("com.skip")).unwrap();
        store
            .put(ClassificationRecord::resolved("com.done", Category::Games, Source::Manual))
            .unwrap();
        store
            .put(ClassificationRecord::failed("com.failed", Source::RemoteDomestic, "x"))
            .unwrap();
        store.put(ClassificationRecord::pending("com.pending")).unwrap();
        let apps = [app("com.skip"), app("com.done"), app("com.failed"), app("com.pending"), app("com.new")];

        let intl = Arc::new(Scripted::new(Source::RemoteInternational));
        let chain = SourceChain::new().with_source(intl.clone());
        let classifier = Classifier::new(store.clone(), &chain, fast());
        let report = classifier.classify_all(&apps).await.unwrap();
        assert_eq!(report.attempted, 3);
        assert_eq!(intl.calls.load(Ordering::SeqCst), 3);
        assert_eq!(store.get("com.skip").unwrap().unwrap().status, Status::Skipped);
        assert_eq!(store.get("com.done").unwrap().unwrap().category, Some(Category::Games));
        assert_eq!(
            store.get("com.failed").unwrap().unwrap().note.as_deref(),
            Some(NO_CATEGORY_MATCH)
        );

        let leaving_failures = Classifier::new(
            store.clone(),
            &chain,
            ClassifierSettings {
                retry_failed: false,
                ..fast()
            },
        );
        let report = leaving_failures.classify_all(&apps).await.unwrap();
        // com.failed, com.pending and com.new all failed on the first run
        assert_eq!(report.attempted, 0);
        assert_eq!(intl.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_record_is_queried_again_by_default() {
        let store = Arc::new(MemoryStore::new());
        store
            .put(ClassificationRecord::failed("com.f", Source::RemoteInternational, NO_CATEGORY_MATCH))
            .unwrap();
        let intl = Arc::new(Scripted::new(Source::RemoteInternational).answer("com.f", Category::SystemTools));
        let chain = SourceChain::new().with_source(intl.clone());
        let classifier = Classifier::new(store.clone(), &chain, ClassifierSettings::default())
            .with_rate_limit(Source::RemoteInternational, Duration::ZERO);

        let report = classifier.classify_all(&[app("com.f")]).await.unwrap();
        assert_eq!(report.attempted, 1);
        assert_eq!(intl.calls.load(Ordering::SeqCst), 1);
        assert!(store.get("com.f").unwrap().unwrap().is_resolved());
    }

    #[tokio::test]
    async fn cancelled_run_writes_nothing() {
        let store = Arc::new(MemoryStore::new());
        let intl = Arc::new(Scripted::new(Source::RemoteInternational).answer("com.a", Category::Social));
        let chain = SourceChain::new().with_source(intl.clone());
        let classifier = Classifier::new(store.clone(), &chain, fast());
        classifier.cancel_flag().store(true, Ordering::SeqCst);

        let report = classifier.classify_all(&[app("com.a")]).await.unwrap();
        assert!(report.interrupted);
        assert_eq!(report.unresolved, vec!["com.a".to_string()]);
        assert!(store.get("com.a").unwrap().is_none());
        assert_eq!(intl.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn enrich_never_overwrites_names() {
        let store = Arc::new(MemoryStore::new());
        store
            .put(
                ClassificationRecord::resolved("com.named", Category::Games, Source::Manual)
                    .with_display_name(Some("Kept".into())),
            )
            .unwrap();
        let dom = Arc::new(Scripted::new(Source::RemoteDomestic).answer("com.x", Category::Games));
        let chain = SourceChain::new().with_source(dom.clone());
        let classifier = Classifier::new(store.clone(), &chain, fast());

        let report = classifier
            .enrich_names(&[app("com.named"), app("com.whatsapp"), app("com.x"), app("com.none")])
            .await
            .unwrap();

        assert_eq!(store.get("com.named").unwrap().unwrap().display_name.as_deref(), Some("Kept"));
        assert_eq!(store.get("com.x").unwrap().unwrap().display_name.as_deref(), Some("com.x name"));
        assert!(report.filled.iter().any(|(id, _)| id == "com.whatsapp"));
        assert_eq!(report.missing, vec!["com.none".to_string()]);
        // the known-name table answered for com.whatsapp
        assert_eq!(dom.calls.load(Ordering::SeqCst), 2);
    }
}
