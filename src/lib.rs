//! # edgequake-slides
//!
//! Turn a topic outline into a slide deck by orchestrating interchangeable
//! text- and image-generation providers.
//!
//! ## What this crate does
//!
//! Each slide ("page") has its own generation state machine. The
//! [`Orchestrator`] drives a page from outline to generated text and image,
//! guarantees at most one in-flight provider request per page, records token
//! usage and estimated cost in a [`UsageLedger`], and lets callers regenerate
//! unsatisfactory pages in bulk with [`batch_retry`]. Every image a page gets
//! is kept as a version; [`Orchestrator::edit_image`] redraws the current one
//! from an instruction.
//!
//! ## Generation flow
//!
//! ```text
//! generate(page, force)
//!  │
//!  ├─ 1. Resolve   default provider per required kind (text and/or image)
//!  ├─ 2. Register  one job per page (join or chain behind an in-flight job)
//!  ├─ 3. Text      outline entry → slide content       (if the page has none)
//!  ├─ 4. Image     slide content → slide image
//!  ├─ 5. Account   one usage record per provider call
//!  └─ 6. Settle    COMPLETED with a new image version, or FAILED with last_error
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_slides::{
//!     GenerationKind, HttpProviderAdapter, InMemoryPageRepository, Orchestrator,
//!     OrchestratorConfig, OrchestratorContext, OutlineContent, Page, ProviderConfig,
//!     ProviderConfigStore, ProviderKind,
//! };
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = ProviderConfigStore::default();
//!     store.upsert(ProviderConfig::new("text", GenerationKind::Text, ProviderKind::OpenAi, "sk-..."))?;
//!     store.upsert(ProviderConfig::new("image", GenerationKind::Image, ProviderKind::Google, "AIza..."))?;
//!
//!     let pages = InMemoryPageRepository::new();
//!     pages.insert(Page::new("p1", "deck", 0, OutlineContent {
//!         title: "Why Rust".into(),
//!         points: vec!["Memory safety".into(), "Fearless concurrency".into()],
//!         part: None,
//!     }));
//!
//!     let config = OrchestratorConfig::default();
//!     let adapter = HttpProviderAdapter::new(Duration::from_secs(config.request_timeout_secs))?;
//!     let orchestrator = Orchestrator::new(
//!         OrchestratorContext::new(Arc::new(pages), Arc::new(store), Arc::new(adapter)),
//!         config,
//!     );
//!
//!     let page = orchestrator.generate("p1", false).await?;
//!     println!("{:?}: {:?}", page.status, page.generated_image_url);
//!     orchestrator.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `slides` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! edgequake-slides = { version = "0.1", default-features = false }
//! ```
//!
//! ## Providers
//!
//! | Provider            | Text | Image | Reference images |
//! |---------------------|------|-------|------------------|
//! | `google`            | ✓    | ✓     | text + image     |
//! | `openai`            | ✓    | ✓     | text only        |
//! | `anthropic`         | ✓    |       | text only        |
//! | `qwen`              | ✓    | ✓     | text only        |
//! | `baidu`             | ✓    | ✓     |                  |
//! | `openai_compatible` | ✓    | ✓     | text only        |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod batch;
pub mod config;
pub mod error;
pub mod events;
pub mod ledger;
pub mod model;
pub mod orchestrator;
pub mod pages;
pub mod pricing;
pub mod prompts;
pub mod providers;
pub mod resolver;
mod storage;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use batch::{batch_generate, batch_retry, batch_retry_stream, OutcomeStream};
pub use config::{
    validate, GenerationKind, OrchestratorConfig, OrchestratorConfigBuilder, ProviderConfig,
    ProviderKind, ProviderParams, ValidationReport,
};
pub use error::{ProviderError, SlidesError};
pub use events::{EventBus, EventListener, SlidesEvent, Subscription};
pub use ledger::{DailyStats, NewUsage, PeriodTotals, UsageLedger, UsageRecord};
pub use model::{
    BatchResult, DeckFile, ImageOrigin, ImageVersion, OutlineContent, Page, PageFailure,
    PageOutcome, PageStatus,
};
pub use orchestrator::{Orchestrator, OrchestratorContext};
pub use pages::{InMemoryPageRepository, PageRepository};
pub use providers::{
    test_connection, ConnectionTestResult, GenerationRequest, GenerationResponse,
    HttpProviderAdapter, ProviderAdapter, ReferenceAsset, TokenUsage,
};
pub use resolver::{ConfigResolver, ConfigSet, ProviderConfigStore};
