//! Generation orchestrator: drives one page through its lifecycle.
//!
//! ```text
//!   PENDING ──generate──► GENERATING ──ok──► COMPLETED
//!                             │                  │
//!                             └──error──► FAILED │
//!                                           │    │
//!               generate(force) / edit ◄────┴────┘
//! ```
//!
//! ## Job registry
//!
//! At most one job per page is in flight. Jobs run on spawned tokio tasks and
//! are registered as [`Shared`] futures, so:
//!
//! * a non-forced `generate` on a page with a job in flight awaits that job
//!   and returns its result, issuing no provider request of its own;
//! * a forced `generate` or an `edit_image` on such a page chains a new job
//!   behind the current one. The new job starts only after the previous one
//!   settles, so there are never two simultaneous provider requests for a
//!   page and the last request made is the one whose result ends up on the
//!   page;
//! * dropping the caller's future does not cancel the provider request.
//!
//! ## Failure model
//!
//! Missing or invalid provider configuration is detected before the page is
//! touched and returned as [`SlidesError::ConfigMissing`]. Provider failures
//! mark the page FAILED with the message in `last_error`, and are returned
//! to the caller. A job that panics or is cancelled also leaves the page
//! FAILED. Nothing is retried automatically.
//!
//! ## Image history
//!
//! Every image a job produces is appended to [`Page::image_versions`] and
//! becomes current. [`Orchestrator::set_current_image_version`] points the
//! page back at an earlier one.

use crate::config::{GenerationKind, OrchestratorConfig, ProviderConfig};
use crate::error::{ProviderError, SlidesError};
use crate::events::{EventBus, EventListener, SlidesEvent, Subscription};
use crate::ledger::{NewUsage, UsageLedger};
use crate::model::{BatchResult, ImageOrigin, ImageVersion, Page, PageOutcome, PageStatus};
use crate::pages::PageRepository;
use crate::prompts;
use crate::providers::{GenerationRequest, GenerationResponse, ProviderAdapter, ReferenceAsset};
use crate::resolver::ConfigResolver;
use chrono::Utc;
use futures::future::{BoxFuture, FutureExt, Shared};
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

type JobFuture = Shared<BoxFuture<'static, Result<Page, SlidesError>>>;

struct JobEntry {
    ticket: u64,
    job: JobFuture,
}

/// Collaborators the orchestrator works with.
///
/// Everything is passed in explicitly; the orchestrator owns no global state.
#[derive(Clone)]
pub struct OrchestratorContext {
    pub pages: Arc<dyn PageRepository>,
    pub resolver: Arc<dyn ConfigResolver>,
    pub adapter: Arc<dyn ProviderAdapter>,
    pub ledger: Arc<UsageLedger>,
    pub events: EventBus,
}

impl OrchestratorContext {
    pub fn new(
        pages: Arc<dyn PageRepository>,
        resolver: Arc<dyn ConfigResolver>,
        adapter: Arc<dyn ProviderAdapter>,
    ) -> Self {
        Self {
            pages,
            resolver,
            adapter,
            ledger: Arc::new(UsageLedger::in_memory()),
            events: EventBus::new(),
        }
    }

    pub fn with_ledger(mut self, ledger: Arc<UsageLedger>) -> Self {
        self.ledger = ledger;
        self
    }

    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }
}

struct Inner {
    ctx: OrchestratorContext,
    config: OrchestratorConfig,
    jobs: Mutex<HashMap<String, JobEntry>>,
    next_ticket: AtomicU64,
    closed: AtomicBool,
}

/// Cloneable handle; clones share the job registry.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("config", &self.inner.config)
            .field("in_flight", &self.inner.jobs.lock().len())
            .finish()
    }
}

/// Provider configs resolved before a job is registered.
#[derive(Clone)]
struct Resolved {
    text: Option<ProviderConfig>,
    image: ProviderConfig,
}

/// What a registered job does once it owns the page.
enum JobKind {
    Generate(Resolved),
    Edit {
        image: ProviderConfig,
        instruction: String,
    },
}

impl JobKind {
    fn origin(&self) -> (ImageOrigin, Option<String>) {
        match self {
            JobKind::Generate(_) => (ImageOrigin::Generated, None),
            JobKind::Edit { instruction, .. } => (ImageOrigin::Edited, Some(instruction.clone())),
        }
    }
}

/// Removes the registry entry when the job task ends, including on panic.
struct JobGuard {
    inner: Arc<Inner>,
    page_id: String,
    ticket: u64,
}

impl Drop for JobGuard {
    fn drop(&mut self) {
        let mut jobs = self.inner.jobs.lock();
        if jobs.get(&self.page_id).is_some_and(|e| e.ticket == self.ticket) {
            jobs.remove(&self.page_id);
        }
    }
}

impl Orchestrator {
    pub fn new(ctx: OrchestratorContext, config: OrchestratorConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                ctx,
                config,
                jobs: Mutex::new(HashMap::new()),
                next_ticket: AtomicU64::new(1),
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.inner.config
    }

    pub fn ledger(&self) -> &Arc<UsageLedger> {
        &self.inner.ctx.ledger
    }

    pub fn pages(&self) -> &Arc<dyn PageRepository> {
        &self.inner.ctx.pages
    }

    pub fn events(&self) -> &EventBus {
        &self.inner.ctx.events
    }

    /// Register a listener for orchestration events.
    pub fn subscribe(&self, listener: impl EventListener + 'static) -> Subscription {
        self.inner.ctx.events.subscribe(listener)
    }

    /// Ids of pages with a job in flight.
    pub fn in_flight(&self) -> Vec<String> {
        self.inner.jobs.lock().keys().cloned().collect()
    }

    pub fn is_generating(&self, page_id: &str) -> bool {
        self.inner.jobs.lock().contains_key(page_id)
    }

    /// Generate one page.
    ///
    /// With `force = false` a page that is already COMPLETED with an image is
    /// returned unchanged, and a page with a job in flight resolves with that
    /// job's result. With `force = true` a new provider call is always made.
    pub async fn generate(&self, page_id: &str, force: bool) -> Result<Page, SlidesError> {
        self.ensure_open()?;
        let page = self.inner.page(page_id)?;

        if !force {
            if let Some(job) = self.current_job(page_id) {
                debug!("Page {page_id} already generating; joining existing job");
                return job.await;
            }
            if page.is_done() {
                debug!("Page {page_id} already completed; nothing to do");
                return Ok(page);
            }
        }

        let resolved = self.inner.resolve(&page.required_kinds())?;
        self.register(page_id, JobKind::Generate(resolved), !force).await
    }

    /// Redraw the page's current image from a natural-language instruction.
    ///
    /// The current image is sent as a reference to the default image
    /// provider, so the provider must accept reference images. The result
    /// becomes a new [`ImageOrigin::Edited`] version. Edits always chain
    /// behind a job in flight, like a forced `generate`.
    pub async fn edit_image(&self, page_id: &str, instruction: &str) -> Result<Page, SlidesError> {
        self.ensure_open()?;
        let page = self.inner.page(page_id)?;
        let instruction = instruction.trim();
        if instruction.is_empty() {
            return Err(SlidesError::InvalidRequest {
                page_id: page_id.to_string(),
                action: "edit",
                reason: "the edit instruction is empty".into(),
            });
        }
        // A job in flight may still produce the first image.
        if !self.is_generating(page_id) {
            self.inner.ensure_has_image(&page)?;
        }

        let image = self.inner.resolve_one(GenerationKind::Image)?;
        if !image.provider.supports_references(GenerationKind::Image) {
            return Err(ProviderError::UnsupportedCapability {
                provider: image.provider.to_string(),
                capability: "image editing (reference images for image generation)".into(),
            }
            .into());
        }

        let kind = JobKind::Edit {
            image,
            instruction: instruction.to_string(),
        };
        self.register(page_id, kind, false).await
    }

    /// Every image the page has had, oldest first.
    pub fn image_versions(&self, page_id: &str) -> Result<Vec<ImageVersion>, SlidesError> {
        Ok(self.inner.page(page_id)?.image_versions)
    }

    /// Make an earlier image version current again.
    ///
    /// Rejected while a job is in flight for the page, since that job's
    /// result would replace the selection when it lands.
    pub fn set_current_image_version(
        &self,
        page_id: &str,
        version: u32,
    ) -> Result<Page, SlidesError> {
        if self.is_generating(page_id) {
            return Err(SlidesError::InvalidRequest {
                page_id: page_id.to_string(),
                action: "switch the image of",
                reason: "a generation job is in flight".into(),
            });
        }
        let page = self.inner.page(page_id)?;
        if !page.image_versions.iter().any(|v| v.version == version) {
            return Err(SlidesError::ImageVersionNotFound {
                page_id: page_id.to_string(),
                version,
            });
        }
        let page = self.inner.update(page_id, |p| {
            p.select_image_version(version);
        })?;
        info!("Page {page_id}: image version {version} is now current");
        self.inner.publish(SlidesEvent::ImageVersionSelected {
            page_id: page_id.to_string(),
            version,
        });
        Ok(page)
    }

    /// Generate every page of a project in deck order, at most
    /// `deck_concurrency` at a time. Per-page failures are collected, not
    /// propagated.
    pub async fn generate_deck(&self, project_id: &str, force: bool) -> BatchResult {
        let pages = self.inner.ctx.pages.pages_for_project(project_id);
        let ids: Vec<String> = pages.into_iter().map(|p| p.id).collect();
        info!(
            "Generating deck {project_id}: {} pages, concurrency {}",
            ids.len(),
            self.inner.config.deck_concurrency
        );
        self.inner.ctx.events.publish(SlidesEvent::BatchDispatched {
            page_ids: ids.clone(),
        });

        let outcomes: Vec<PageOutcome> = stream::iter(ids.into_iter().map(|page_id| {
            let this = self.clone();
            async move {
                let result = this.generate(&page_id, force).await;
                PageOutcome { page_id, result }
            }
        }))
        .buffer_unordered(self.inner.config.deck_concurrency.max(1))
        .collect()
        .await;

        let result = self.settle(outcomes);
        info!(
            "Deck {project_id} settled: {} succeeded, {} failed",
            result.succeeded.len(),
            result.failed.len()
        );
        result
    }

    /// Stop accepting work and wait for every in-flight job to settle.
    pub async fn shutdown(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        let jobs: Vec<JobFuture> = self
            .inner
            .jobs
            .lock()
            .values()
            .map(|e| e.job.clone())
            .collect();
        if !jobs.is_empty() {
            info!("Waiting for {} in-flight generation jobs", jobs.len());
        }
        futures::future::join_all(jobs).await;
    }

    /// Fold settled page outcomes into a [`BatchResult`] and announce it
    /// with [`SlidesEvent::BatchSettled`].
    pub fn settle(&self, outcomes: Vec<PageOutcome>) -> BatchResult {
        let mut result = BatchResult::default();
        for outcome in outcomes {
            if let Err(e) = &outcome.result {
                warn!("Page {} failed: {}", outcome.page_id, e);
            }
            result.push(outcome);
        }
        self.inner.ctx.events.publish(SlidesEvent::BatchSettled {
            succeeded: result.succeeded.len(),
            failed: result.failed.len(),
        });
        result
    }

    fn ensure_open(&self) -> Result<(), SlidesError> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(SlidesError::Internal("orchestrator has been shut down".into()));
        }
        Ok(())
    }

    fn current_job(&self, page_id: &str) -> Option<JobFuture> {
        self.inner.jobs.lock().get(page_id).map(|e| e.job.clone())
    }

    /// Join the job in flight (when `join_existing`) or register a new one
    /// chained behind it.
    fn register(&self, page_id: &str, kind: JobKind, join_existing: bool) -> JobFuture {
        let mut jobs = self.inner.jobs.lock();
        let previous = jobs.get(page_id).map(|e| e.job.clone());
        match previous {
            Some(existing) if join_existing => existing,
            previous => {
                let ticket = self.inner.next_ticket.fetch_add(1, Ordering::Relaxed);
                let job = self.spawn_job(page_id, ticket, kind, previous);
                jobs.insert(
                    page_id.to_string(),
                    JobEntry {
                        ticket,
                        job: job.clone(),
                    },
                );
                job
            }
        }
    }

    /// Spawn the job task. Must be called with the registry lock held so the
    /// entry is inserted before the task can remove it.
    fn spawn_job(
        &self,
        page_id: &str,
        ticket: u64,
        kind: JobKind,
        previous: Option<JobFuture>,
    ) -> JobFuture {
        let guard = JobGuard {
            inner: Arc::clone(&self.inner),
            page_id: page_id.to_string(),
            ticket,
        };
        let inner = Arc::clone(&self.inner);
        let id = page_id.to_string();
        let handle = tokio::spawn(async move {
            let _guard = guard;
            if let Some(previous) = previous {
                debug!("Page {id}: waiting for previous job before starting a new one");
                let _ = previous.await;
            }
            // The page is written FAILED before the guard frees the registry slot.
            match AssertUnwindSafe(inner.run(&id, kind)).catch_unwind().await {
                Ok(result) => result,
                Err(panic) => Err(inner.abort(
                    &id,
                    format!("generation task panicked: {}", panic_message(&*panic)),
                )),
            }
        });

        let inner = Arc::clone(&self.inner);
        let id = page_id.to_string();
        async move {
            match handle.await {
                Ok(result) => result,
                Err(join_err) => {
                    Err(inner.abort(&id, format!("generation task failed: {join_err}")))
                }
            }
        }
        .boxed()
        .shared()
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        *s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic payload"
    }
}

impl Inner {
    fn page(&self, page_id: &str) -> Result<Page, SlidesError> {
        self.ctx
            .pages
            .get(page_id)
            .ok_or_else(|| SlidesError::PageNotFound {
                page_id: page_id.to_string(),
            })
    }

    fn ensure_has_image(&self, page: &Page) -> Result<(), SlidesError> {
        if page.generated_image_url.as_deref().is_some_and(|u| !u.is_empty()) {
            return Ok(());
        }
        Err(SlidesError::InvalidRequest {
            page_id: page.id.clone(),
            action: "edit",
            reason: "the page has no image yet".into(),
        })
    }

    fn resolve_one(&self, kind: GenerationKind) -> Result<ProviderConfig, SlidesError> {
        let config = self
            .ctx
            .resolver
            .get_default(kind)
            .ok_or_else(|| SlidesError::ConfigMissing {
                kind,
                reason: format!("no default {kind} provider is set"),
            })?;
        let report = self.ctx.resolver.validate(&config);
        if !report.is_valid {
            return Err(SlidesError::ConfigMissing {
                kind,
                reason: format!(
                    "default {kind} provider '{}' is unusable: {}",
                    config.id,
                    report.errors.join("; ")
                ),
            });
        }
        for warning in &report.warnings {
            debug!("Provider '{}': {}", config.id, warning);
        }
        Ok(config)
    }

    fn resolve(&self, kinds: &[GenerationKind]) -> Result<Resolved, SlidesError> {
        let text = if kinds.contains(&GenerationKind::Text) {
            Some(self.resolve_one(GenerationKind::Text)?)
        } else {
            None
        };
        let image = self.resolve_one(GenerationKind::Image)?;
        Ok(Resolved { text, image })
    }

    fn publish(&self, event: SlidesEvent) {
        self.ctx.events.publish(event);
    }

    fn update(&self, page_id: &str, mut edit: impl FnMut(&mut Page)) -> Result<Page, SlidesError> {
        self.ctx
            .pages
            .update(page_id, &mut |p| {
                edit(p);
                p.updated_at = Some(Utc::now());
            })
            .ok_or_else(|| SlidesError::PageNotFound {
                page_id: page_id.to_string(),
            })
    }

    /// Mark the page FAILED after its job ended without producing a result.
    fn abort(&self, page_id: &str, message: String) -> SlidesError {
        error!("Generation job for page {page_id} ended abnormally: {message}");
        let mut from = PageStatus::Generating;
        match self.update(page_id, |p| {
            from = p.status;
            p.status = PageStatus::Failed;
            p.last_error = Some(message.clone());
        }) {
            Ok(_) => {
                if from != PageStatus::Failed {
                    self.publish(SlidesEvent::StatusChanged {
                        page_id: page_id.to_string(),
                        from,
                        to: PageStatus::Failed,
                    });
                }
                self.publish(SlidesEvent::PageFailed {
                    page_id: page_id.to_string(),
                    error: message.clone(),
                });
            }
            Err(e) => debug!("Page {page_id}: abnormal end not recorded: {e}"),
        }
        SlidesError::Internal(message)
    }

    async fn run(&self, page_id: &str, kind: JobKind) -> Result<Page, SlidesError> {
        let page = self.page(page_id)?;

        // A chained job may find the text gone (previous job failed early),
        // or, for an edit, no image (previous job never produced one).
        let text_config = match &kind {
            JobKind::Generate(resolved) => match (page.has_content(), &resolved.text) {
                (true, _) => None,
                (false, Some(c)) => Some(c.clone()),
                (false, None) => Some(self.resolve_one(GenerationKind::Text)?),
            },
            JobKind::Edit { .. } => {
                self.ensure_has_image(&page)?;
                None
            }
        };

        let from = page.status;
        let page = self.update(page_id, |p| {
            if p.status.is_settled() {
                p.retry_count += 1;
            }
            p.status = PageStatus::Generating;
            p.last_error = None;
        })?;
        self.publish(SlidesEvent::StatusChanged {
            page_id: page_id.to_string(),
            from,
            to: PageStatus::Generating,
        });

        let (origin, note) = kind.origin();
        let outcome = match kind {
            JobKind::Generate(resolved) => {
                info!(
                    "Generating page {page_id} (attempt {}, text: {})",
                    page.retry_count + 1,
                    text_config.is_some()
                );
                self.produce(&page, text_config, resolved.image).await
            }
            JobKind::Edit { image, instruction } => {
                info!("Editing image of page {page_id}: {instruction}");
                self.redraw(&page, image, &instruction).await
            }
        };

        match outcome {
            Ok(image_url) => {
                let mut version = 0;
                let page = self.update(page_id, |p| {
                    p.status = PageStatus::Completed;
                    p.last_error = None;
                    version =
                        p.push_image_version(image_url.clone(), origin, note.clone(), Utc::now());
                })?;
                self.publish(SlidesEvent::StatusChanged {
                    page_id: page_id.to_string(),
                    from: PageStatus::Generating,
                    to: PageStatus::Completed,
                });
                self.publish(SlidesEvent::PageCompleted {
                    page_id: page_id.to_string(),
                });
                info!("Page {page_id} completed (image version {version})");
                Ok(page)
            }
            Err(e) => {
                let message = e.to_string();
                self.update(page_id, |p| {
                    p.status = PageStatus::Failed;
                    p.last_error = Some(message.clone());
                })?;
                self.publish(SlidesEvent::StatusChanged {
                    page_id: page_id.to_string(),
                    from: PageStatus::Generating,
                    to: PageStatus::Failed,
                });
                self.publish(SlidesEvent::PageFailed {
                    page_id: page_id.to_string(),
                    error: message,
                });
                warn!("Page {page_id} failed: {e}");
                Err(e)
            }
        }
    }

    /// Run the provider calls for one page; returns the image URL.
    async fn produce(
        &self,
        page: &Page,
        text_config: Option<ProviderConfig>,
        image_config: ProviderConfig,
    ) -> Result<String, SlidesError> {
        let deck = self.ctx.pages.pages_for_project(&page.project_id);
        let outline = prompts::outline_text(&deck);
        let page_number = deck
            .iter()
            .position(|p| p.id == page.id)
            .map_or(page.order as usize + 1, |i| i + 1);

        let content = match text_config {
            Some(config) => {
                let prompt =
                    prompts::page_content_prompt(&outline, page, page_number, deck.len().max(1));
                let system = self
                    .config
                    .system_prompt
                    .clone()
                    .unwrap_or_else(|| prompts::DEFAULT_SYSTEM_PROMPT.to_string());
                let request = GenerationRequest::new(GenerationKind::Text, prompt, config)
                    .with_system_prompt(system);
                let response = self.call(page, request).await?;
                let content = response.content.trim().to_string();
                // Keep the text even if the image step fails, so a retry only redraws.
                self.update(&page.id, |p| {
                    p.generated_content = Some(content.clone());
                })?;
                content
            }
            None => page.generated_content.clone().unwrap_or_default(),
        };

        let references = self.material_references(page, &content, &image_config);
        let prompt = prompts::image_prompt(
            &outline,
            page,
            &content,
            !references.is_empty(),
            self.config.extra_requirements.as_deref(),
        );
        let image_config = self.with_image_defaults(image_config);
        let request = GenerationRequest::new(GenerationKind::Image, prompt, image_config)
            .with_references(references);
        self.draw(page, request).await
    }

    /// Edit the current image: one image call with that image as reference.
    async fn redraw(
        &self,
        page: &Page,
        image_config: ProviderConfig,
        instruction: &str,
    ) -> Result<String, SlidesError> {
        self.ensure_has_image(page)?;
        let current = page.generated_image_url.as_deref().unwrap_or_default();
        let prompt = prompts::image_edit_prompt(instruction, page.generated_content.as_deref());
        let image_config = self.with_image_defaults(image_config);
        let request = GenerationRequest::new(GenerationKind::Image, prompt, image_config)
            .with_references(vec![ReferenceAsset::from_url_or_data(current)]);
        self.draw(page, request).await
    }

    /// Images linked from the slide text that the image provider can use.
    ///
    /// Links a provider cannot fetch are dropped, and so is everything when
    /// the provider takes no reference images; the prompt then carries no
    /// material-images note either.
    fn material_references(
        &self,
        page: &Page,
        content: &str,
        image_config: &ProviderConfig,
    ) -> Vec<ReferenceAsset> {
        let (fetchable, unreachable): (Vec<String>, Vec<String>) =
            prompts::extract_image_urls_from_markdown(content)
                .into_iter()
                .partition(|u| prompts::is_fetchable_reference(u));
        if !unreachable.is_empty() {
            debug!(
                "Page {}: skipping {} relative image link(s) as references",
                page.id,
                unreachable.len()
            );
        }
        let accepted = image_config
            .provider
            .supports_references(GenerationKind::Image);
        if !fetchable.is_empty() && !accepted {
            debug!(
                "Page {}: {} does not take reference images; dropping {} linked image(s)",
                page.id,
                image_config.provider,
                fetchable.len()
            );
            return Vec::new();
        }
        fetchable
            .iter()
            .map(|u| ReferenceAsset::from_url_or_data(u))
            .collect()
    }

    fn with_image_defaults(&self, mut image_config: ProviderConfig) -> ProviderConfig {
        let params = &mut image_config.params;
        if params.aspect_ratio.is_none() {
            params.aspect_ratio = Some(self.config.default_aspect_ratio.clone());
        }
        if params.resolution.is_none() {
            params.resolution = Some(self.config.default_resolution.clone());
        }
        image_config
    }

    async fn draw(&self, page: &Page, request: GenerationRequest) -> Result<String, SlidesError> {
        let provider = request.config.provider.to_string();
        let response = self.call(page, request).await?;
        response.image_url.ok_or_else(|| {
            ProviderError::MalformedResponse {
                provider,
                detail: "image generation returned no image".into(),
            }
            .into()
        })
    }

    /// One provider call plus its usage record.
    async fn call(
        &self,
        page: &Page,
        request: GenerationRequest,
    ) -> Result<GenerationResponse, ProviderError> {
        let kind = request.kind;
        let provider = request.config.provider.to_string();
        let model = request.config.effective_model();
        let response = self.ctx.adapter.execute(request).await?;

        let record = self.ctx.ledger.add_record(
            NewUsage::new(
                kind,
                provider,
                model,
                response.tokens_used.input,
                response.tokens_used.output,
            )
            .project(page.project_id.clone())
            .page(page.id.clone()),
        );
        self.publish(SlidesEvent::UsageRecorded(record));
        Ok(response)
    }
}
