//! Integration tests for the scrape pipeline.
//!
//! A scripted connector stands in for the platform; storage is a temporary
//! SQLite file per test.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use leadharvest::clients::{ConnectorError, PlatformConnector};
use leadharvest::config::{PlatformConfig, SchedulerConfig};
use leadharvest::db::{NewLead, Store};
use leadharvest::domain::{
    FetchParams, ItemKind, PlatformItem, Schedule, ScrapeInterval, ScrapeStatus, Search, SearchId,
};
use leadharvest::services::{
    AnalysisContext, AnalysisResult, Analyzer, CachingAnalyzer, DedupLedger, EventBus,
    FetchOrchestrator, JobStatus, JobTracker, KeywordAnalyzer, MetricsCollector, RateLimiter,
    RetryPolicy, ScrapeDecision, ScrapeError, ScrapeService, Scheduler, StartRejection,
};
use leadharvest::services::analysis::{CLASSIFICATION_CACHE, cache_key};
use sea_orm::ConnectionTrait;

#[derive(Clone)]
enum Script {
    Items(Vec<PlatformItem>),
    /// Transient failures for the first `n` attempts, then items.
    FlakyThen(u32, Vec<PlatformItem>),
    AlwaysTransient,
}

#[derive(Default)]
struct ScriptedConnector {
    targets: HashMap<String, Script>,
    failing_comments: HashSet<String>,
    calls: Mutex<HashMap<String, u32>>,
}

impl ScriptedConnector {
    fn with(mut self, target: &str, script: Script) -> Self {
        self.targets.insert(target.to_string(), script);
        self
    }

    fn calls(&self, target: &str) -> u32 {
        self.calls
            .lock()
            .unwrap()
            .get(target)
            .copied()
            .unwrap_or_default()
    }
}

#[async_trait::async_trait]
impl PlatformConnector for ScriptedConnector {
    fn source(&self) -> &'static str {
        "reddit"
    }

    async fn fetch_items(
        &self,
        target: &str,
        _params: &FetchParams,
    ) -> Result<Vec<PlatformItem>, ConnectorError> {
        let attempt = {
            let mut calls = self.calls.lock().unwrap();
            let n = calls.entry(target.to_string()).or_default();
            *n += 1;
            *n
        };

        match self.targets.get(target) {
            Some(Script::Items(items)) => Ok(items.clone()),
            Some(Script::FlakyThen(failures, items)) => {
                if attempt <= *failures {
                    Err(ConnectorError::Transient("503 Service Unavailable".into()))
                } else {
                    Ok(items.clone())
                }
            }
            Some(Script::AlwaysTransient) => Err(ConnectorError::Transient("timeout".into())),
            None => Err(ConnectorError::Fatal(format!("unknown target {target}"))),
        }
    }

    async fn fetch_sub_items(
        &self,
        item: &PlatformItem,
        _params: &FetchParams,
    ) -> Result<Vec<PlatformItem>, ConnectorError> {
        if self.failing_comments.contains(&item.id) {
            return Err(ConnectorError::Fatal("403 Forbidden".into()));
        }

        Ok(vec![PlatformItem {
            id: format!("c_{}", item.id),
            kind: ItemKind::Comment,
            title: None,
            body: "Following, also looking for a rust developer".to_string(),
            parent_item_id: Some(item.id.clone()),
            ..item.clone()
        }])
    }
}

fn post(target: &str, id: &str, body: &str) -> PlatformItem {
    PlatformItem {
        id: id.to_string(),
        source: "reddit".to_string(),
        kind: ItemKind::Post,
        title: Some(format!("Post {id}")),
        body: body.to_string(),
        author: "someone".to_string(),
        url: format!("https://www.reddit.com/r/{target}/comments/{id}/"),
        target: target.to_string(),
        parent_item_id: None,
        score: 1,
        created_at: None,
    }
}

fn posts(target: &str, prefix: &str, count: usize) -> Vec<PlatformItem> {
    (0..count)
        .map(|i| {
            let body = if i % 2 == 0 {
                "We are looking for a rust developer"
            } else {
                "Weekly discussion thread"
            };
            post(target, &format!("{prefix}{i}"), body)
        })
        .collect()
}

async fn temp_store() -> Store {
    let db_path = std::env::temp_dir().join(format!(
        "leadharvest-pipeline-test-{}.db",
        uuid::Uuid::new_v4()
    ));
    Store::new(&format!("sqlite:{}", db_path.display()))
        .await
        .expect("Failed to create store")
}

fn fast_policy() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
    }
}

fn orchestrator(connector: Arc<ScriptedConnector>) -> FetchOrchestrator {
    orchestrator_with_metrics(connector, Arc::new(MetricsCollector::default()))
}

fn orchestrator_with_metrics(
    connector: Arc<ScriptedConnector>,
    metrics: Arc<MetricsCollector>,
) -> FetchOrchestrator {
    FetchOrchestrator::new(
        connector,
        Arc::new(RateLimiter::new(10_000, Duration::ZERO)),
        fast_policy(),
        metrics,
    )
}

/// Counts calls and delegates to the keyword analyzer.
#[derive(Default)]
struct CountingAnalyzer {
    calls: Mutex<u32>,
}

impl CountingAnalyzer {
    fn calls(&self) -> u32 {
        *self.calls.lock().unwrap()
    }
}

#[async_trait::async_trait]
impl Analyzer for CountingAnalyzer {
    async fn analyze(
        &self,
        text: &str,
        context: &AnalysisContext,
    ) -> anyhow::Result<Option<AnalysisResult>> {
        *self.calls.lock().unwrap() += 1;
        KeywordAnalyzer.analyze(text, context).await
    }
}

struct Harness {
    store: Store,
    connector: Arc<ScriptedConnector>,
    tracker: JobTracker,
    bus: EventBus,
    scrape: Arc<ScrapeService>,
}

async fn harness(connector: ScriptedConnector, cooldown: chrono::Duration) -> Harness {
    harness_with_analyzer(connector, cooldown, Arc::new(KeywordAnalyzer)).await
}

async fn harness_with_analyzer(
    connector: ScriptedConnector,
    cooldown: chrono::Duration,
    analyzer: Arc<dyn Analyzer>,
) -> Harness {
    let store = temp_store().await;
    let connector = Arc::new(connector);
    let tracker = JobTracker::new(
        cooldown,
        chrono::Duration::hours(2),
        chrono::Duration::seconds(60),
    );
    let bus = EventBus::new(256);

    let scrape = Arc::new(ScrapeService::new(
        store.clone(),
        Arc::new(orchestrator(connector.clone())),
        analyzer,
        tracker.clone(),
        Arc::new(bus.clone()),
        &PlatformConfig::default(),
    ));

    Harness {
        store,
        connector,
        tracker,
        bus,
        scrape,
    }
}

async fn add_search(store: &Store, targets: &[&str], schedule: Schedule) -> Search {
    let mut search = Search::new(
        "rust hiring",
        targets.iter().map(ToString::to_string).collect(),
        schedule,
    );
    search.keywords = vec!["rust".to_string()];
    search.params = FetchParams {
        item_limit: 10,
        include_sub_items: false,
        ..FetchParams::default()
    };
    store.save_search(&search).await.unwrap();
    search
}

#[tokio::test]
async fn test_failing_target_does_not_discard_others() {
    let connector = Arc::new(
        ScriptedConnector::default()
            .with("a", Script::Items(posts("a", "a", 2)))
            .with("b", Script::AlwaysTransient)
            .with("c", Script::Items(posts("c", "c", 3))),
    );
    let metrics = Arc::new(MetricsCollector::default());
    let orchestrator = orchestrator_with_metrics(connector.clone(), metrics.clone());
    let targets = vec!["a".to_string(), "b".to_string(), "c".to_string()];
    let params = FetchParams {
        include_sub_items: false,
        ..FetchParams::default()
    };

    let outcome = orchestrator
        .fetch(&SearchId::new("s1"), &targets, &params)
        .await;

    let ids: Vec<&str> = outcome.items.iter().map(|i| i.id.as_str()).collect();
    assert_eq!(ids, vec!["a0", "a1", "c0", "c1", "c2"]);
    assert_eq!(outcome.failures.len(), 1);
    assert_eq!(outcome.failures[0].target, "b");
    assert!(outcome.failures[0].item_id.is_none());

    // Three attempts in total, never a fourth.
    assert_eq!(connector.calls("b"), 3);
    assert_eq!(outcome.retries, 2);

    // One run record per target, in target order.
    let runs = metrics.recent(1);
    let per_target: Vec<(&str, usize, usize)> = runs
        .iter()
        .map(|r| (r.target.as_str(), r.items_fetched, r.targets_failed))
        .collect();
    assert_eq!(per_target, vec![("a", 2, 0), ("b", 0, 1), ("c", 3, 0)]);

    let failed = &runs[1];
    assert_eq!(failed.items_failed, 1);
    assert_eq!(failed.retry_count, 2);
    assert_eq!(failed.errors.len(), 1);
    assert!(failed.errors[0].contains("timeout"));
    assert!(failed.finished_at.is_some());
    assert!(runs[0].errors.is_empty());

    let summary = metrics.summary(1);
    assert_eq!(summary.total_runs, 3);
    assert_eq!(summary.total_items_fetched, 5);
}

#[tokio::test]
async fn test_comment_failure_keeps_post_and_siblings() {
    let mut connector =
        ScriptedConnector::default().with("rust", Script::Items(posts("rust", "p", 3)));
    connector.failing_comments.insert("p1".to_string());
    let orchestrator = orchestrator(Arc::new(connector));

    let outcome = orchestrator
        .fetch(
            &SearchId::new("s1"),
            &["rust".to_string()],
            &FetchParams::default(),
        )
        .await;

    assert_eq!(outcome.items.len(), 3);
    let comment_ids: Vec<&str> = outcome.sub_items.iter().map(|i| i.id.as_str()).collect();
    assert_eq!(comment_ids, vec!["c_p0", "c_p2"]);
    assert_eq!(outcome.failures.len(), 1);
    assert_eq!(outcome.failures[0].item_id.as_deref(), Some("p1"));
    assert_eq!(outcome.target_failures(), 0);
}

#[tokio::test]
async fn test_empty_targets_use_global_listing() {
    let connector = Arc::new(
        ScriptedConnector::default().with("all", Script::Items(posts("all", "g", 1))),
    );
    let orchestrator = orchestrator(connector.clone());

    let outcome = orchestrator
        .fetch(
            &SearchId::new("s1"),
            &[],
            &FetchParams {
                include_sub_items: false,
                ..FetchParams::default()
            },
        )
        .await;

    assert_eq!(outcome.items.len(), 1);
    assert_eq!(connector.calls("all"), 1);
}

#[tokio::test]
async fn test_end_to_end_two_targets_with_retry() {
    let connector = ScriptedConnector::default()
        .with("a", Script::Items(posts("a", "a", 5)))
        .with("b", Script::FlakyThen(2, posts("b", "b", 3)));
    let h = harness(connector, chrono::Duration::zero()).await;
    let search = add_search(&h.store, &["a", "b"], Schedule::OneTime).await;
    let mut events = h.bus.subscribe();

    let first = h.scrape.scrape_now(&search.id).await.unwrap();

    assert_eq!(first.items_fetched, 8);
    assert_eq!(first.recovered_targets, 1);
    assert!(first.fetch_failures.is_empty());
    assert_eq!(first.new_items, 8);
    assert_eq!(h.connector.calls("b"), 3);
    assert_eq!(h.store.count_scraped(&search.id).await.unwrap(), 8);

    // Even-numbered posts mention rust: a0, a2, a4, b0, b2.
    assert_eq!(first.leads_created, 5);
    assert_eq!(h.store.count_leads(&search.id).await.unwrap(), 5);

    let mut names = Vec::new();
    while let Ok(event) = events.try_recv() {
        names.push(event.name());
    }
    assert_eq!(names.first(), Some(&"job.started"));
    assert_eq!(names.iter().filter(|n| **n == "lead.created").count(), 5);
    assert_eq!(names.last(), Some(&"job.completed"));

    let second = h.scrape.scrape_now(&search.id).await.unwrap();
    assert_eq!(second.items_fetched, 8);
    assert_eq!(second.new_items, 0);
    assert_eq!(second.leads_created, 0);
    assert_eq!(h.store.count_leads(&search.id).await.unwrap(), 5);

    let stored = h.store.get_search(&search.id).await.unwrap().unwrap();
    assert!(stored.last_run_at.is_some());
    assert_eq!(stored.next_run_at, None);
    assert_eq!(stored.last_status, Some(ScrapeStatus::Completed));
    assert!(!h.tracker.is_job_running(&search.id));
}

#[tokio::test]
async fn test_dedup_filter_mark_filter() {
    let store = temp_store().await;
    let search_id = add_search(&store, &["rust"], Schedule::OneTime).await.id;
    let other = add_search(&store, &["rust"], Schedule::OneTime).await.id;
    let items = posts("rust", "p", 3);

    let ledger = DedupLedger::new(store.clone());
    let mut batch = items.clone();
    batch.push(items[0].clone());

    let fresh = ledger.filter(&search_id, batch).await.unwrap();
    assert_eq!(fresh.len(), 3);

    ledger.mark(&search_id, &items[0], true).await.unwrap();
    ledger.mark(&search_id, &items[0], false).await.unwrap();
    ledger.mark(&search_id, &items[1], false).await.unwrap();

    let fresh = ledger.filter(&search_id, items.clone()).await.unwrap();
    let ids: Vec<&str> = fresh.iter().map(|i| i.id.as_str()).collect();
    assert_eq!(ids, vec!["p2"]);

    // The store is authoritative, not the in-memory cache.
    let cold = DedupLedger::new(store.clone());
    assert_eq!(cold.filter(&search_id, items.clone()).await.unwrap().len(), 1);

    // Other searches see the items as new.
    assert_eq!(cold.filter(&other, items).await.unwrap().len(), 3);
    assert_eq!(store.count_scraped(&search_id).await.unwrap(), 2);
}

#[tokio::test]
async fn test_save_lead_is_idempotent() {
    let store = temp_store().await;
    let search = add_search(&store, &["rust"], Schedule::OneTime).await;

    let lead = || NewLead {
        search_id: search.id.clone(),
        source: "reddit".to_string(),
        source_type: "post".to_string(),
        source_id: "abc".to_string(),
        parent_item_id: None,
        title: Some("Need a rust dev".to_string()),
        content: "Need a rust dev".to_string(),
        author: "someone".to_string(),
        url: "https://www.reddit.com/r/rust/comments/abc/".to_string(),
        target: "rust".to_string(),
        matched_keywords: vec!["rust".to_string()],
        detected_pattern: Some("Need a".to_string()),
        opportunity_type: Some("looking_for".to_string()),
        relevance_score: 1.0,
    };

    let first = store.save_lead(lead()).await.unwrap();
    let second = store.save_lead(lead()).await.unwrap();

    assert!(first.is_created());
    assert!(!second.is_created());
    assert_eq!(first.lead().id, second.lead().id);
    assert_eq!(second.lead().matched_keywords, vec!["rust".to_string()]);
    assert_eq!(store.count_leads(&search.id).await.unwrap(), 1);
}

#[tokio::test]
async fn test_request_scrape_rejections() {
    let connector = ScriptedConnector::default().with("a", Script::Items(posts("a", "a", 1)));
    let h = harness(connector, chrono::Duration::minutes(5)).await;
    let search = add_search(&h.store, &["a"], Schedule::OneTime).await;

    let missing = h
        .scrape
        .request_scrape(&SearchId::new("missing"))
        .await
        .unwrap_err();
    assert!(matches!(missing, ScrapeError::NotFound(_)));
    assert_eq!(missing.http_status(), 404);

    let token = h.tracker.start_job(&search.id).unwrap();
    assert_eq!(
        h.scrape.request_scrape(&search.id).await.unwrap(),
        ScrapeDecision::Rejected(StartRejection::AlreadyRunning)
    );
    assert!(h.tracker.complete_job(&search.id, token, true, None));

    h.store
        .save_search_state(&search.id, chrono::Utc::now(), None)
        .await
        .unwrap();
    let decision = h.scrape.request_scrape(&search.id).await.unwrap();
    let ScrapeDecision::Rejected(reason) = decision else {
        panic!("expected cooldown rejection, got {decision:?}");
    };
    assert_eq!(reason.cooldown_remaining_minutes(), Some(5));

    let status = h.scrape.get_status(&search.id).await.unwrap();
    assert!(!status.is_running);
    assert!(!status.can_start);
    assert_eq!(status.cooldown_remaining_minutes, Some(5));
    assert_eq!(
        status.reason.as_deref(),
        Some("Cooldown period not met. Wait 5 more minutes")
    );

    let err = h.scrape.scrape_now(&search.id).await.unwrap_err();
    assert_eq!(err.http_status(), 409);

    h.store.set_search_enabled(&search.id, false).await.unwrap();
    assert_eq!(
        h.scrape.request_scrape(&search.id).await.unwrap(),
        ScrapeDecision::Rejected(StartRejection::Disabled)
    );
}

#[tokio::test]
async fn test_request_scrape_runs_in_background() {
    let connector = ScriptedConnector::default().with("a", Script::Items(posts("a", "a", 2)));
    let h = harness(connector, chrono::Duration::minutes(5)).await;
    let search = add_search(&h.store, &["a"], Schedule::OneTime).await;
    let mut events = h.bus.subscribe();

    assert_eq!(
        h.scrape.request_scrape(&search.id).await.unwrap(),
        ScrapeDecision::Accepted
    );

    let finished = tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            match events.recv().await {
                Ok(event) if event.name() == "job.completed" => break,
                Ok(_) => {}
                Err(e) => panic!("event bus closed: {e}"),
            }
        }
    })
    .await;
    assert!(finished.is_ok());
    assert_eq!(h.store.count_scraped(&search.id).await.unwrap(), 2);
}

#[tokio::test]
async fn test_scheduler_tick_processes_due_searches() {
    let connector = ScriptedConnector::default()
        .with("a", Script::Items(posts("a", "a", 2)))
        .with("b", Script::AlwaysTransient);
    let h = harness(connector, chrono::Duration::minutes(5)).await;

    let healthy = add_search(&h.store, &["a"], Schedule::Scheduled(ScrapeInterval::OneHour)).await;
    let failing = add_search(&h.store, &["b"], Schedule::Scheduled(ScrapeInterval::OneHour)).await;
    add_search(&h.store, &["a"], Schedule::OneTime).await;

    let scheduler = Scheduler::new(h.scrape.clone(), h.store.clone(), SchedulerConfig::default());

    let summary = scheduler.run_once().await.unwrap();
    assert_eq!(summary.due, 2);
    // A failing target is a partial result, not a failed job.
    assert_eq!(summary.processed, 2);
    assert_eq!(summary.failed, 0);
    assert_eq!(summary.leads_created, 1);

    for id in [&healthy.id, &failing.id] {
        let stored = h.store.get_search(id).await.unwrap().unwrap();
        let last = stored.last_run_at.unwrap();
        assert_eq!(stored.next_run_at, Some(last + chrono::Duration::hours(1)));
    }

    let again = scheduler.run_once().await.unwrap();
    assert_eq!(again.due, 0);
}

#[tokio::test]
async fn test_scheduler_tick_isolates_failed_run() {
    let connector = ScriptedConnector::default().with("a", Script::Items(posts("a", "a", 2)));
    let h = harness(connector, chrono::Duration::minutes(5)).await;

    let broken = add_search(&h.store, &["a"], Schedule::Scheduled(ScrapeInterval::OneHour)).await;
    let healthy = add_search(&h.store, &["a"], Schedule::Scheduled(ScrapeInterval::OneHour)).await;
    let due_before = h
        .store
        .get_search(&broken.id)
        .await
        .unwrap()
        .unwrap()
        .next_run_at;

    // Recording the run fails for one search only.
    h.store
        .conn
        .execute_unprepared(&format!(
            "CREATE TRIGGER fail_record_run BEFORE UPDATE OF last_scrape_at ON searches \
             WHEN NEW.id = '{}' BEGIN SELECT RAISE(ABORT, 'storage unavailable'); END;",
            broken.id
        ))
        .await
        .unwrap();

    let mut events = h.bus.subscribe();
    let scheduler = Scheduler::new(h.scrape.clone(), h.store.clone(), SchedulerConfig::default());

    let summary = scheduler.run_once().await.unwrap();
    assert_eq!(summary.due, 2);
    assert_eq!(summary.processed, 1);
    assert_eq!(summary.failed, 1);
    // Only completed runs count toward the tick's leads.
    assert_eq!(summary.leads_created, 1);

    let stored = h.store.get_search(&broken.id).await.unwrap().unwrap();
    assert_eq!(stored.last_status, Some(ScrapeStatus::Failed));
    assert!(stored.last_error.unwrap().contains("storage unavailable"));
    assert_eq!(stored.last_run_at, None);
    assert_eq!(stored.next_run_at, due_before);

    let job = h.tracker.job_status(&broken.id).unwrap().job;
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.error.unwrap().contains("storage unavailable"));
    assert!(!h.tracker.is_job_running(&broken.id));

    let sibling = h.store.get_search(&healthy.id).await.unwrap().unwrap();
    assert_eq!(sibling.last_status, Some(ScrapeStatus::Completed));
    assert!(sibling.next_run_at.is_some_and(|next| next > chrono::Utc::now()));

    let mut failed_events = 0;
    while let Ok(event) = events.try_recv() {
        if event.name() == "job.failed" {
            assert_eq!(event.search_id(), &broken.id);
            failed_events += 1;
        }
    }
    assert_eq!(failed_events, 1);

    // The failed search stays due and is picked up again.
    let again = scheduler.run_once().await.unwrap();
    assert_eq!(again.due, 1);
    assert_eq!(again.failed, 1);
}

#[tokio::test]
async fn test_superseded_job_does_not_record_its_run() {
    let connector = ScriptedConnector::default().with("a", Script::Items(posts("a", "a", 2)));
    let h = harness(connector, chrono::Duration::zero()).await;
    let search = add_search(&h.store, &["a"], Schedule::Scheduled(ScrapeInterval::OneHour)).await;
    let due_before = h
        .store
        .get_search(&search.id)
        .await
        .unwrap()
        .unwrap()
        .next_run_at;

    let stale = h.scrape.try_start(&search).unwrap();
    // The job is given up on and a newer run starts before the first
    // worker reports back.
    assert!(h.tracker.complete_job(
        &search.id,
        stale,
        false,
        Some("Job timed out".to_string())
    ));
    let current = h.tracker.start_job(&search.id).unwrap();

    let report = h.scrape.execute_job(search.clone(), stale).await.unwrap();
    assert_eq!(report.items_fetched, 2);

    assert!(h.tracker.is_job_running(&search.id));
    let stored = h.store.get_search(&search.id).await.unwrap().unwrap();
    assert_eq!(stored.last_run_at, None);
    assert_eq!(stored.next_run_at, due_before);

    assert!(h.tracker.complete_job(&search.id, current, true, None));
}

#[tokio::test]
async fn test_analysis_cache_hit_and_miss() {
    let store = temp_store().await;
    let counting = Arc::new(CountingAnalyzer::default());
    let analyzer = CachingAnalyzer::new(counting.clone(), store.clone());
    let rust = AnalysisContext {
        keywords: vec!["rust".to_string()],
        patterns: Vec::new(),
    };

    let first = analyzer
        .analyze("We are looking for a Rust developer", &rust)
        .await
        .unwrap();
    assert!(first.is_some());
    assert_eq!(counting.calls(), 1);

    // Same text after normalization: served from the cache.
    let second = analyzer
        .analyze("  we are looking for a rust developer ", &rust)
        .await
        .unwrap();
    assert_eq!(second, first);
    assert_eq!(counting.calls(), 1);

    // "Not a lead" verdicts are cached too.
    assert!(analyzer.analyze("Weekly discussion", &rust).await.unwrap().is_none());
    assert!(analyzer.analyze("Weekly discussion", &rust).await.unwrap().is_none());
    assert_eq!(counting.calls(), 2);

    // Different keywords are a different verdict.
    let go = AnalysisContext {
        keywords: vec!["go".to_string()],
        patterns: Vec::new(),
    };
    assert!(
        analyzer
            .analyze("We are looking for a Rust developer", &go)
            .await
            .unwrap()
            .is_none()
    );
    assert_eq!(counting.calls(), 3);

    let key = cache_key(
        CLASSIFICATION_CACHE,
        "We are looking for a Rust developer",
        &rust,
    );
    let entry = store
        .get_cached_analysis(&key, "classification")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(entry.use_count, 3);
}

#[tokio::test]
async fn test_cached_analysis_shared_across_searches() {
    let connector = ScriptedConnector::default().with("a", Script::Items(posts("a", "a", 4)));
    let counting = Arc::new(CountingAnalyzer::default());
    let h = harness_with_analyzer(connector, chrono::Duration::zero(), counting.clone()).await;
    let cached = Arc::new(CachingAnalyzer::new(counting.clone(), h.store.clone()));
    let scrape = ScrapeService::new(
        h.store.clone(),
        Arc::new(orchestrator(h.connector.clone())),
        cached,
        h.tracker.clone(),
        Arc::new(h.bus.clone()),
        &PlatformConfig::default(),
    );

    let first = add_search(&h.store, &["a"], Schedule::OneTime).await;
    let second = add_search(&h.store, &["a"], Schedule::OneTime).await;

    let report = scrape.scrape_now(&first.id).await.unwrap();
    assert_eq!(report.new_items, 4);
    assert_eq!(report.leads_created, 2);
    assert_eq!(counting.calls(), 4);

    // Same items and keywords for another search: new to its ledger, but
    // every verdict comes from the cache.
    let report = scrape.scrape_now(&second.id).await.unwrap();
    assert_eq!(report.new_items, 4);
    assert_eq!(report.leads_created, 2);
    assert_eq!(counting.calls(), 4);
}

#[tokio::test]
async fn test_score_and_age_thresholds_skip_items() {
    let now = chrono::Utc::now();
    let mut items = posts("a", "a", 4);
    items[0].score = 0;
    items[2].created_at = Some(now - chrono::Duration::hours(48));
    items[1].created_at = Some(now - chrono::Duration::hours(1));

    let connector = ScriptedConnector::default().with("a", Script::Items(items));
    let h = harness(connector, chrono::Duration::zero()).await;

    let mut search = add_search(&h.store, &["a"], Schedule::OneTime).await;
    search.params.min_score = Some(1);
    search.params.max_age_hours = Some(24);
    h.store.save_search(&search).await.unwrap();

    let report = h.scrape.scrape_now(&search.id).await.unwrap();
    assert_eq!(report.items_fetched, 4);
    assert_eq!(report.items_skipped, 2);
    assert_eq!(report.new_items, 2);
    // a0 and a2 were the rust posts and both were skipped.
    assert_eq!(report.leads_created, 0);
    // Skipped items are not marked, so a looser search can still see them.
    assert_eq!(h.store.count_scraped(&search.id).await.unwrap(), 2);
}
