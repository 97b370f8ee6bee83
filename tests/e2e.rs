//! End-to-end tests for edgequake-slides.
//!
//! Scenarios run through the public API only. Most use an in-process stub
//! adapter so they are deterministic; the last ones drive the real
//! `HttpProviderAdapter` against a local wiremock server.
//!
//! Run with:
//!   cargo test --test e2e -- --nocapture

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use edgequake_slides::error::ProviderError;
use edgequake_slides::events::SlidesEvent;
use edgequake_slides::{
    batch_generate, batch_retry, batch_retry_stream, DeckFile, GenerationKind, GenerationRequest,
    GenerationResponse, HttpProviderAdapter, InMemoryPageRepository, NewUsage, Orchestrator,
    OrchestratorConfig, OrchestratorContext, OutlineContent, Page, PageRepository, PageStatus,
    ProviderAdapter, ProviderConfig, ProviderConfigStore, ProviderKind, SlidesError, TokenUsage,
    UsageLedger,
};
use futures::StreamExt;
use parking_lot::Mutex;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

// ── Test helpers ─────────────────────────────────────────────────────────────

/// Route library logs to the test harness; `RUST_LOG=debug` shows them.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

/// Answers text and image requests; image requests for the slide titled
/// `fail_section` fail with a network error.
#[derive(Default)]
struct StubAdapter {
    calls: AtomicUsize,
    fail_section: Option<String>,
}

impl StubAdapter {
    fn failing(section: &str) -> Self {
        Self {
            fail_section: Some(section.to_string()),
            ..Default::default()
        }
    }
}

#[async_trait]
impl ProviderAdapter for StubAdapter {
    async fn execute(&self, request: GenerationRequest) -> Result<GenerationResponse, ProviderError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        tokio::time::sleep(Duration::from_millis(10)).await;
        match request.kind {
            GenerationKind::Text => Ok(GenerationResponse {
                content: "## Slide\n- a point".into(),
                image_url: None,
                tokens_used: TokenUsage { input: 100, output: 50 },
            }),
            GenerationKind::Image => {
                if let Some(section) = &self.fail_section {
                    if request.prompt.contains(&format!("Current section: {section}")) {
                        return Err(ProviderError::Network {
                            provider: "stub".into(),
                            detail: "connection refused".into(),
                        });
                    }
                }
                Ok(GenerationResponse {
                    content: String::new(),
                    image_url: Some(format!("https://cdn.test/{n}.png")),
                    tokens_used: TokenUsage { input: 20, output: 0 },
                })
            }
        }
    }
}

fn outline(title: &str) -> OutlineContent {
    OutlineContent {
        title: title.to_string(),
        points: vec!["first".into(), "second".into()],
        part: None,
    }
}

fn deck(titles: &[(&str, &str)]) -> Arc<InMemoryPageRepository> {
    let pages = titles
        .iter()
        .enumerate()
        .map(|(i, (id, title))| Page::new(*id, "", i as u32, outline(title)))
        .collect();
    Arc::new(InMemoryPageRepository::from_deck(DeckFile {
        project_id: "deck".into(),
        pages,
    }))
}

fn configured_store() -> Arc<ProviderConfigStore> {
    let store = ProviderConfigStore::default();
    store
        .upsert(ProviderConfig::new("t", GenerationKind::Text, ProviderKind::OpenAi, "sk-test"))
        .unwrap();
    store
        .upsert(ProviderConfig::new("i", GenerationKind::Image, ProviderKind::Google, "g-test"))
        .unwrap();
    Arc::new(store)
}

fn orchestrator(
    pages: Arc<InMemoryPageRepository>,
    adapter: Arc<dyn ProviderAdapter>,
) -> Orchestrator {
    Orchestrator::new(
        OrchestratorContext::new(pages, configured_store(), adapter),
        OrchestratorConfig::default(),
    )
}

// ── Batch retry ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn batch_collects_failures_without_short_circuit() {
    init_tracing();
    let pages = deck(&[("p1", "Intro"), ("p2", "Outage"), ("p3", "Summary")]);
    let adapter = Arc::new(StubAdapter::failing("Outage"));
    let orch = orchestrator(pages.clone(), adapter.clone());

    let result = batch_retry(&orch, ["p1", "p2", "p3"]).await;

    let mut ok = result.succeeded.clone();
    ok.sort();
    assert_eq!(ok, vec!["p1", "p3"]);
    assert_eq!(result.failed.len(), 1);
    assert_eq!(result.failed[0].page_id, "p2");
    assert!(matches!(
        result.failed[0].error,
        SlidesError::Provider(ProviderError::Network { .. })
    ));

    for id in ["p1", "p3"] {
        let page = pages.get(id).unwrap();
        assert_eq!(page.status, PageStatus::Completed);
        assert!(page.is_done());
    }
    let failed = pages.get("p2").unwrap();
    assert_eq!(failed.status, PageStatus::Failed);
    assert!(failed.last_error.unwrap().contains("connection refused"));
    // Text for p2 was kept even though its image failed.
    assert!(failed.generated_content.is_some());
    assert!(orch.in_flight().is_empty());
}

#[tokio::test]
async fn batch_dispatches_every_page_once() {
    let ids: Vec<String> = (0..6).map(|i| format!("p{i}")).collect();
    let titles: Vec<(String, String)> = ids.iter().map(|id| (id.clone(), format!("T {id}"))).collect();
    let borrowed: Vec<(&str, &str)> = titles.iter().map(|(a, b)| (a.as_str(), b.as_str())).collect();
    let pages = deck(&borrowed);
    let adapter = Arc::new(StubAdapter::default());
    let orch = orchestrator(pages, adapter.clone());

    let dispatched = Arc::new(Mutex::new(Vec::new()));
    let sink = dispatched.clone();
    let sub = orch.subscribe(move |e: &SlidesEvent| {
        if let SlidesEvent::BatchDispatched { page_ids } = e {
            sink.lock().extend(page_ids.iter().cloned());
        }
    });

    let mut with_duplicates = ids.clone();
    with_duplicates.push("p0".into());
    let result = batch_retry(&orch, with_duplicates).await;
    sub.unsubscribe();

    assert_eq!(result.total(), 6);
    assert!(result.is_full_success());
    assert_eq!(*dispatched.lock(), ids);
    // One text and one image call per page.
    assert_eq!(adapter.calls.load(Ordering::SeqCst), 12);
}

#[tokio::test]
async fn batch_stream_yields_each_outcome() {
    let pages = deck(&[("a", "Alpha"), ("b", "Beta")]);
    let orch = orchestrator(pages, Arc::new(StubAdapter::failing("Beta")));

    let outcomes: Vec<_> = batch_retry_stream(&orch, ["a", "b"]).collect().await;
    assert_eq!(outcomes.len(), 2);
    let a = outcomes.iter().find(|o| o.page_id == "a").unwrap();
    let b = outcomes.iter().find(|o| o.page_id == "b").unwrap();
    assert!(a.result.is_ok());
    assert!(b.result.is_err());
}

// ── Single page semantics ────────────────────────────────────────────────────

#[tokio::test]
async fn completed_page_is_noop_unless_forced() {
    let pages = deck(&[("p1", "Intro")]);
    let adapter = Arc::new(StubAdapter::default());
    let orch = orchestrator(pages.clone(), adapter.clone());

    let first = orch.generate("p1", false).await.unwrap();
    assert_eq!(first.status, PageStatus::Completed);
    let calls = adapter.calls.load(Ordering::SeqCst);

    let again = orch.generate("p1", false).await.unwrap();
    assert_eq!(adapter.calls.load(Ordering::SeqCst), calls);
    assert_eq!(again.generated_image_url, first.generated_image_url);

    let forced = orch.generate("p1", true).await.unwrap();
    assert!(adapter.calls.load(Ordering::SeqCst) > calls);
    assert_ne!(forced.generated_image_url, first.generated_image_url);
    assert_eq!(forced.retry_count, 1);
}

#[tokio::test]
async fn missing_image_config_leaves_page_untouched() {
    let pages = deck(&[("p1", "Intro")]);
    let store = ProviderConfigStore::default();
    store
        .upsert(ProviderConfig::new("t", GenerationKind::Text, ProviderKind::OpenAi, "sk"))
        .unwrap();
    let adapter = Arc::new(StubAdapter::default());
    let orch = Orchestrator::new(
        OrchestratorContext::new(pages.clone(), Arc::new(store), adapter.clone()),
        OrchestratorConfig::default(),
    );

    let err = orch.generate("p1", false).await.unwrap_err();
    assert!(matches!(
        err,
        SlidesError::ConfigMissing { kind: GenerationKind::Image, .. }
    ));
    assert_eq!(pages.get("p1").unwrap().status, PageStatus::Pending);
    assert_eq!(adapter.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn deck_generation_records_usage_per_call() {
    let pages = deck(&[("p1", "Intro"), ("p2", "Body"), ("p3", "End")]);
    let orch = orchestrator(pages, Arc::new(StubAdapter::default()));

    let result = orch.generate_deck("deck", false).await;
    assert!(result.is_full_success());

    let ledger = orch.ledger();
    assert_eq!(ledger.records().len(), 6);
    assert_eq!(ledger.total_tokens_used(), 3 * (150 + 20));
    let today = ledger.get_today_stats();
    assert_eq!(today.text_tokens, 450);
    assert_eq!(today.image_tokens, 60);
    assert_eq!(today.request_count, 6);
    let sum: u64 = ledger.records().iter().map(|r| r.total_tokens).sum();
    assert_eq!(sum, ledger.total_tokens_used());
}

// ── Usage ledger ─────────────────────────────────────────────────────────────

#[test]
fn monthly_stats_exclude_records_older_than_thirty_days() {
    let now = Arc::new(Mutex::new(Utc.with_ymd_and_hms(2025, 6, 30, 12, 0, 0).unwrap()));
    let clock_now = now.clone();
    let ledger = UsageLedger::in_memory().with_clock(Arc::new(move || *clock_now.lock()));

    let old: DateTime<Utc> = *now.lock() - ChronoDuration::days(35);
    *now.lock() = old;
    ledger.add_record(NewUsage::new(GenerationKind::Text, "openai", "gpt-4o", 1000, 0).cost(1.0));
    *now.lock() = old + ChronoDuration::days(35);
    ledger.add_record(NewUsage::new(GenerationKind::Image, "google", "x", 40, 0).cost(0.5));

    let monthly = ledger.get_monthly_stats();
    assert_eq!(monthly.total_tokens, 40);
    assert_eq!(monthly.request_count, 1);
    assert!((monthly.estimated_cost - 0.5).abs() < 1e-9);
    assert_eq!(ledger.total_tokens_used(), 1040);

    assert_eq!(ledger.clear_old_records(30), 1);
    assert_eq!(ledger.total_tokens_used(), 40);
    assert!((ledger.total_cost() - 0.5).abs() < 1e-9);
}

#[test]
fn ledger_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    {
        let ledger = UsageLedger::open(dir.path()).unwrap();
        ledger.add_record(NewUsage::new(GenerationKind::Text, "openai", "gpt-4o", 10, 5));
        ledger.add_record(NewUsage::new(GenerationKind::Image, "google", "x", 7, 0));
        ledger.flush().unwrap();
    }
    let reopened = UsageLedger::open(dir.path()).unwrap();
    assert_eq!(reopened.records().len(), 2);
    assert_eq!(reopened.total_tokens_used(), 22);
    assert_eq!(reopened.get_today_stats().request_count, 2);
}

#[tokio::test]
async fn selected_pages_skip_completed_ones_unless_forced() {
    let pages = deck(&[("p1", "Intro"), ("p2", "Details")]);
    let adapter = Arc::new(StubAdapter::default());
    let orch = orchestrator(pages.clone(), adapter.clone());
    assert_ok!(orch.generate("p1", false).await);
    let settled = Arc::new(Mutex::new(Vec::new()));
    let sink = settled.clone();
    let _sub = orch.subscribe(move |e: &SlidesEvent| {
        if let SlidesEvent::BatchSettled { succeeded, failed } = e {
            sink.lock().push((*succeeded, *failed));
        }
    });

    let calls = adapter.calls.load(Ordering::SeqCst);
    let result = batch_generate(&orch, ["p1", "p2"], false).await;
    assert!(result.is_full_success());
    assert_eq!(result.succeeded.len(), 2);
    // Only p2 needed text and an image.
    assert_eq!(adapter.calls.load(Ordering::SeqCst), calls + 2);
    assert_eq!(pages.get("p1").unwrap().retry_count, 0);

    let result = batch_generate(&orch, ["p1"], true).await;
    assert_eq!(result.succeeded, vec!["p1"]);
    assert_eq!(pages.get("p1").unwrap().retry_count, 1);
    assert_eq!(*settled.lock(), vec![(2, 0), (1, 0)]);
}

#[tokio::test]
async fn image_history_survives_the_deck_file() {
    let pages = deck(&[("p1", "Intro")]);
    let orch = orchestrator(pages.clone(), Arc::new(StubAdapter::default()));
    assert_ok!(orch.generate("p1", false).await);
    assert_ok!(orch.edit_image("p1", "use a darker background").await);
    assert_ok!(orch.set_current_image_version("p1", 1));

    let json = serde_json::to_string(&pages.to_deck("deck")).unwrap();
    let reloaded: DeckFile = serde_json::from_str(&json).unwrap();
    let page = &reloaded.pages[0];
    assert_eq!(page.image_versions.len(), 2);
    assert_eq!(page.current_image_version, Some(1));
    assert_eq!(page.generated_image_url, Some(page.image_versions[0].image_url.clone()));
    assert_eq!(
        page.image_versions[1].instruction.as_deref(),
        Some("use a darker background")
    );
}

// ── Provider config store ────────────────────────────────────────────────────

#[test]
fn invalid_import_keeps_previous_configuration() {
    let dir = tempfile::tempdir().unwrap();
    let store = ProviderConfigStore::open(dir.path()).unwrap();
    store
        .upsert(ProviderConfig::new("t", GenerationKind::Text, ProviderKind::Anthropic, "ak"))
        .unwrap();
    let before = store.snapshot();

    let err = assert_err!(store.import_json("{ not json"));
    assert!(matches!(err, SlidesError::ConfigParse(_)));
    let dangling = json!({ "textApis": [], "defaultTextApi": "ghost" }).to_string();
    assert_err!(store.import_json(&dangling));
    assert_eq!(store.snapshot(), before);

    let exported = store.export_json().unwrap();
    let reopened = ProviderConfigStore::open(dir.path()).unwrap();
    assert_eq!(reopened.snapshot(), before);
    let fresh = ProviderConfigStore::default();
    assert_ok!(fresh.import_json(&exported));
    assert_eq!(fresh.snapshot(), before);
}

// ── HTTP providers against a local server ────────────────────────────────────

async fn openai_server() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{ "message": { "role": "assistant", "content": "## Why Rust\n- Safety" } }],
            "usage": { "prompt_tokens": 120, "completion_tokens": 30 }
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/images/generations"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{ "url": "https://images.test/slide.png" }]
        })))
        .mount(&server)
        .await;
    server
}

fn http_store(base: &str) -> Arc<ProviderConfigStore> {
    let store = ProviderConfigStore::default();
    store
        .upsert(
            ProviderConfig::new("t", GenerationKind::Text, ProviderKind::OpenAi, "sk-test")
                .with_base_url(base),
        )
        .unwrap();
    store
        .upsert(
            ProviderConfig::new("i", GenerationKind::Image, ProviderKind::OpenAi, "sk-test")
                .with_base_url(base),
        )
        .unwrap();
    Arc::new(store)
}

#[tokio::test]
async fn http_round_trip_generates_a_slide() {
    init_tracing();
    let server = openai_server().await;
    let base = format!("{}/v1", server.uri());
    let pages = deck(&[("p1", "Why Rust")]);
    let adapter = HttpProviderAdapter::new(Duration::from_secs(5)).unwrap();
    let orch = Orchestrator::new(
        OrchestratorContext::new(pages.clone(), http_store(&base), Arc::new(adapter)),
        OrchestratorConfig::default(),
    );

    let page = orch.generate("p1", false).await.unwrap();
    assert_eq!(page.status, PageStatus::Completed);
    assert_eq!(page.generated_content.as_deref(), Some("## Why Rust\n- Safety"));
    assert_eq!(
        page.generated_image_url.as_deref(),
        Some("https://images.test/slide.png")
    );
    let records = orch.ledger().records();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].total_tokens, 150);
    assert!(records[0].cost > 0.0);
}

#[tokio::test]
async fn http_auth_failure_marks_page_failed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
        .mount(&server)
        .await;
    let pages = deck(&[("p1", "Why Rust")]);
    let adapter = HttpProviderAdapter::new(Duration::from_secs(5)).unwrap();
    let orch = Orchestrator::new(
        OrchestratorContext::new(pages.clone(), http_store(&server.uri()), Arc::new(adapter)),
        OrchestratorConfig::default(),
    );

    let err = orch.generate("p1", false).await.unwrap_err();
    assert!(matches!(err, SlidesError::Provider(ProviderError::Auth { .. })));
    let page = pages.get("p1").unwrap();
    assert_eq!(page.status, PageStatus::Failed);
    assert!(page.last_error.is_some());
    assert!(orch.ledger().records().is_empty());
}

#[tokio::test]
async fn http_openai_images_ignore_linked_material() {
    init_tracing();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{ "message": { "role": "assistant",
                "content": "## Why Rust\n![logo](https://cdn.test/logo.png)\n- Safety" } }],
            "usage": { "prompt_tokens": 120, "completion_tokens": 30 }
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/images/generations"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{ "url": "https://images.test/slide.png" }]
        })))
        .expect(2)
        .mount(&server)
        .await;
    let base = format!("{}/v1", server.uri());
    let pages = deck(&[("p1", "Why Rust")]);
    let adapter = HttpProviderAdapter::new(Duration::from_secs(5)).unwrap();
    let orch = Orchestrator::new(
        OrchestratorContext::new(pages.clone(), http_store(&base), Arc::new(adapter)),
        OrchestratorConfig::default(),
    );

    let page = orch.generate("p1", false).await.unwrap();
    assert_eq!(page.status, PageStatus::Completed);
    assert!(page.generated_content.unwrap().contains("cdn.test/logo.png"));

    // Forced regeneration reuses the linked text and still succeeds.
    let page = orch.generate("p1", true).await.unwrap();
    assert_eq!(page.status, PageStatus::Completed);
    assert!(page.last_error.is_none());
    assert_eq!(page.image_versions.len(), 2);
}
