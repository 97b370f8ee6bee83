//! CLI binary for edgequake-slides.
//!
//! A thin shim over the library crate: loads a deck document, wires the
//! persistent config store and usage ledger from the data directory, runs
//! generation and writes the deck back.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use edgequake_slides::{
    batch_generate, batch_retry, test_connection, BatchResult, DeckFile, GenerationKind,
    HttpProviderAdapter, ImageOrigin, InMemoryPageRepository, Orchestrator, OrchestratorConfig,
    OrchestratorContext, PageOutcome, PageRepository, PageStatus, ProviderConfigStore, SlidesEvent,
    Subscription, UsageLedger,
};
use indicatif::{ProgressBar, ProgressStyle};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── Event-driven progress bar ────────────────────────────────────────────────

/// Renders one progress bar for a run and a log line per settled page.
/// Pages settle out of order, so start times are tracked per page id.
struct CliProgress {
    bar: ProgressBar,
    start_times: Mutex<HashMap<String, Instant>>,
}

impl CliProgress {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(TICKS),
        );
        bar.set_prefix("Preparing");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
        })
    }

    fn activate(&self, total: usize) {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} slides  \
             ⏱ {elapsed_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);
        self.bar.set_length(total as u64);
        self.bar.set_style(style);
        self.bar.set_prefix("Generating");
    }

    fn elapsed(&self, page_id: &str) -> String {
        let secs = self
            .start_times
            .lock()
            .remove(page_id)
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0);
        dim(&format!("{secs:.1}s"))
    }

    fn on_event(&self, event: &SlidesEvent) {
        match event {
            SlidesEvent::BatchDispatched { page_ids } => self.activate(page_ids.len()),
            SlidesEvent::StatusChanged {
                page_id,
                to: PageStatus::Generating,
                ..
            } => {
                self.start_times.lock().insert(page_id.clone(), Instant::now());
                self.bar.set_message(page_id.clone());
            }
            SlidesEvent::PageCompleted { page_id } => {
                let elapsed = self.elapsed(page_id);
                self.bar
                    .println(format!("  {} {:<24} {}", green("✓"), page_id, elapsed));
                self.bar.inc(1);
            }
            SlidesEvent::PageFailed { page_id, error } => {
                let elapsed = self.elapsed(page_id);
                let msg = if error.chars().count() > 80 {
                    format!("{}\u{2026}", error.chars().take(79).collect::<String>())
                } else {
                    error.clone()
                };
                self.bar.println(format!(
                    "  {} {:<24} {}  {}",
                    red("✗"),
                    page_id,
                    red(&msg),
                    elapsed
                ));
                self.bar.inc(1);
            }
            _ => {}
        }
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Generate every slide of a deck that is not done yet
  slides generate deck.json

  # Regenerate the whole deck
  slides generate --force deck.json

  # Generate two slides only
  slides generate deck.json --page p1 --page p4

  # Regenerate a few slides in one batch
  slides retry deck.json --page p2 --page p5

  # Redraw one slide image from an instruction, then go back to version 1
  slides edit deck.json --page p3 "make the chart blue"
  slides versions deck.json --page p3 --set 1

  # Token usage for the last 7 days
  slides usage --days 7

  # Drop usage records older than 30 days
  slides usage prune --keep 30

  # Move provider configs between machines
  slides config export -o providers.json
  slides config import providers.json

  # Check the default providers can be reached
  slides config test

DECK FILE:
  {
    "projectId": "rust-intro",
    "pages": [
      { "id": "p1", "order": 0,
        "outlineContent": { "title": "Why Rust", "points": ["Safety", "Speed"] } }
    ]
  }

  Generated content, image URLs, status and errors are written back into
  the same file after every run.

ENVIRONMENT VARIABLES:
  SLIDES_DATA_DIR     Directory holding provider-configs.json and usage-stats.json
  SLIDES_TIMEOUT      Per-request provider timeout in seconds
  SLIDES_CONCURRENCY  Slides generated concurrently by `generate`
  SLIDES_VERBOSE      Enable DEBUG-level logs
"#;

/// Generate slide decks with text and image generation providers.
#[derive(Parser, Debug)]
#[command(
    name = "slides",
    version,
    about = "Generate slide decks with text and image generation providers",
    long_about = "Turn a deck outline into slide text and slide images using configurable \
providers (Google, OpenAI, Anthropic, Qwen, Baidu, or any OpenAI-compatible endpoint). Tracks \
token usage and estimated cost per day.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Directory for provider configs and usage statistics.
    #[arg(long, global = true, env = "SLIDES_DATA_DIR", default_value = ".slides")]
    data_dir: PathBuf,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "SLIDES_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate text and images for every slide of a deck.
    Generate {
        /// Deck JSON file; updated in place.
        deck: PathBuf,

        /// Only generate these slide ids (repeatable). Defaults to the whole deck.
        #[arg(long = "page")]
        pages: Vec<String>,

        /// Regenerate slides that are already complete.
        #[arg(long)]
        force: bool,

        #[command(flatten)]
        run: RunArgs,
    },

    /// Force-regenerate the selected slides concurrently.
    Retry {
        /// Deck JSON file; updated in place.
        deck: PathBuf,

        /// Slide id to regenerate (repeatable).
        #[arg(long = "page", required = true)]
        pages: Vec<String>,

        #[command(flatten)]
        run: RunArgs,
    },

    /// Redraw a slide's current image from an instruction.
    ///
    /// Needs a default image provider that accepts reference images.
    Edit {
        /// Deck JSON file; updated in place.
        deck: PathBuf,

        /// Slide id to edit.
        #[arg(long = "page")]
        page: String,

        /// What to change, in plain language.
        instruction: String,

        #[command(flatten)]
        run: RunArgs,
    },

    /// List a slide's image versions, or make one current.
    Versions {
        /// Deck JSON file; updated in place with `--set`.
        deck: PathBuf,

        #[arg(long = "page")]
        page: String,

        /// Version number to make current.
        #[arg(long)]
        set: Option<u32>,
    },

    /// Show or maintain token usage statistics.
    Usage {
        /// Number of days to show, ending today.
        #[arg(long, default_value_t = 7)]
        days: u32,

        /// Print JSON instead of a table.
        #[arg(long)]
        json: bool,

        #[command(subcommand)]
        action: Option<UsageAction>,
    },

    /// Manage provider configurations.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(clap::Args, Debug)]
struct RunArgs {
    /// Per-request provider timeout in seconds.
    #[arg(long, env = "SLIDES_TIMEOUT", default_value_t = 300)]
    timeout: u64,

    /// Slides generated concurrently by `generate`.
    #[arg(short, long, env = "SLIDES_CONCURRENCY", default_value_t = 8)]
    concurrency: usize,

    /// Extra instructions appended to every image prompt.
    #[arg(long)]
    extra_requirements: Option<String>,

    /// Disable progress bar.
    #[arg(long)]
    no_progress: bool,
}

#[derive(Subcommand, Debug)]
enum UsageAction {
    /// Keep only the last N days of records.
    Prune {
        #[arg(long)]
        keep: u32,
    },
    /// Delete every usage record.
    Reset,
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// List configured providers.
    List,
    /// Write the configuration set as JSON.
    Export {
        /// Output file (stdout if omitted).
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Replace the configuration set from a JSON file.
    Import { file: PathBuf },
    /// Send a test request through a provider config.
    Test {
        /// Config id to test. Defaults to the default config of each kind.
        #[arg(long)]
        id: Option<String>,

        /// Only test the default of this kind.
        #[arg(long, value_enum)]
        kind: Option<KindArg>,

        #[arg(long, env = "SLIDES_TIMEOUT", default_value_t = 60)]
        timeout: u64,
    },
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum KindArg {
    Text,
    Image,
}

impl From<KindArg> for GenerationKind {
    fn from(v: KindArg) -> Self {
        match v {
            KindArg::Text => GenerationKind::Text,
            KindArg::Image => GenerationKind::Image,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar gives the feedback that matters during generation,
    // so library INFO logs are only shown in verbose mode.
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "error"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    match &cli.command {
        Command::Generate {
            deck,
            pages,
            force,
            run,
        } => {
            let force = *force;
            if pages.is_empty() {
                run_deck(&cli, deck, run, move |o, project| async move {
                    o.generate_deck(&project, force).await
                })
                .await
            } else {
                let pages = pages.clone();
                run_deck(&cli, deck, run, move |o, _| async move {
                    batch_generate(&o, pages, force).await
                })
                .await
            }
        }
        Command::Retry { deck, pages, run } => {
            let pages = pages.clone();
            run_deck(&cli, deck, run, move |o, _| async move {
                batch_retry(&o, pages).await
            })
            .await
        }
        Command::Edit {
            deck,
            page,
            instruction,
            run,
        } => {
            let (page, instruction) = (page.clone(), instruction.clone());
            run_deck(&cli, deck, run, move |o, _| async move {
                edit_one(&o, page, &instruction).await
            })
            .await
        }
        Command::Versions { deck, page, set } => versions(&cli, deck, page, *set).await,
        Command::Usage { days, json, action } => usage(&cli, *days, *json, action.as_ref()),
        Command::Config { action } => config(&cli, action).await,
    }
}

// ── generate / retry ─────────────────────────────────────────────────────────

/// Edit one slide; reported as a batch of one so the summary stays uniform.
async fn edit_one(orchestrator: &Orchestrator, page_id: String, instruction: &str) -> BatchResult {
    orchestrator.events().publish(SlidesEvent::BatchDispatched {
        page_ids: vec![page_id.clone()],
    });
    let result = orchestrator.edit_image(&page_id, instruction).await;
    orchestrator.settle(vec![PageOutcome { page_id, result }])
}

async fn read_deck(path: &Path) -> Result<DeckFile> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read deck {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("Invalid deck file {}", path.display()))
}

async fn write_deck(path: &Path, deck: &DeckFile) -> Result<()> {
    let json = serde_json::to_string_pretty(deck).context("Failed to serialise deck")?;
    tokio::fs::write(path, json)
        .await
        .with_context(|| format!("Failed to write deck {}", path.display()))
}

async fn run_deck<F, Fut>(cli: &Cli, deck_path: &Path, run: &RunArgs, job: F) -> Result<()>
where
    F: FnOnce(Orchestrator, String) -> Fut,
    Fut: std::future::Future<Output = BatchResult>,
{
    let deck = read_deck(deck_path).await?;
    let project_id = deck.project_id.clone();
    let pages = Arc::new(InMemoryPageRepository::from_deck(deck));

    let store = ProviderConfigStore::open(&cli.data_dir).context("Failed to open config store")?;
    let ledger = Arc::new(UsageLedger::open(&cli.data_dir).context("Failed to open usage ledger")?);
    let tokens_before = ledger.total_tokens_used();
    let cost_before = ledger.total_cost();

    let mut builder = OrchestratorConfig::builder()
        .request_timeout_secs(run.timeout)
        .deck_concurrency(run.concurrency);
    if let Some(extra) = &run.extra_requirements {
        builder = builder.extra_requirements(extra.clone());
    }
    let config = builder.build().context("Invalid configuration")?;

    let adapter = HttpProviderAdapter::new(Duration::from_secs(config.request_timeout_secs))
        .context("Failed to build HTTP client")?;
    let ctx = OrchestratorContext::new(pages.clone(), Arc::new(store), Arc::new(adapter))
        .with_ledger(ledger.clone());
    let orchestrator = Orchestrator::new(ctx, config);

    let show_progress = !cli.quiet && !run.no_progress;
    let progress = show_progress.then(CliProgress::new);
    let subscription: Option<Subscription> = progress.as_ref().map(|p| {
        let p = p.clone();
        orchestrator.subscribe(move |event: &SlidesEvent| p.on_event(event))
    });

    let started = Instant::now();
    let result = job(orchestrator.clone(), project_id.clone()).await;
    orchestrator.shutdown().await;
    ledger.flush().context("Failed to save usage ledger")?;

    if let Some(sub) = subscription {
        sub.unsubscribe();
    }
    if let Some(p) = &progress {
        p.finish();
    }

    write_deck(deck_path, &pages.to_deck(&project_id)).await?;

    if !cli.quiet {
        let total = result.total();
        let ok = result.succeeded.len();
        eprintln!(
            "{}  {}/{} slides  {:.1}s  →  {}",
            if result.is_full_success() {
                green("✔")
            } else if ok == 0 {
                red("✘")
            } else {
                cyan("⚠")
            },
            bold(&ok.to_string()),
            total,
            started.elapsed().as_secs_f64(),
            bold(&deck_path.display().to_string()),
        );
        eprintln!(
            "   {} tokens  /  ${:.4} estimated",
            dim(&(ledger.total_tokens_used().saturating_sub(tokens_before)).to_string()),
            ledger.total_cost() - cost_before,
        );
        if !show_progress {
            for failure in &result.failed {
                eprintln!("  {} {}: {}", red("✗"), failure.page_id, failure.error);
            }
        }
    }

    if !result.is_full_success() {
        anyhow::bail!("{} of {} slides failed", result.failed.len(), result.total());
    }
    Ok(())
}

// ── versions ─────────────────────────────────────────────────────────────────

async fn versions(cli: &Cli, deck_path: &Path, page_id: &str, set: Option<u32>) -> Result<()> {
    let deck = read_deck(deck_path).await?;
    let project_id = deck.project_id.clone();
    let pages = Arc::new(InMemoryPageRepository::from_deck(deck));
    let store = ProviderConfigStore::open(&cli.data_dir).context("Failed to open config store")?;
    let adapter = HttpProviderAdapter::new(Duration::from_secs(60))
        .context("Failed to build HTTP client")?;
    let orchestrator = Orchestrator::new(
        OrchestratorContext::new(pages.clone(), Arc::new(store), Arc::new(adapter)),
        OrchestratorConfig::default(),
    );

    if let Some(version) = set {
        orchestrator.set_current_image_version(page_id, version)?;
        write_deck(deck_path, &pages.to_deck(&project_id)).await?;
        if !cli.quiet {
            eprintln!("{} {page_id} now shows image version {version}", green("✔"));
        }
        return Ok(());
    }

    let current = pages.get(page_id).and_then(|p| p.current_image_version);
    let versions = orchestrator.image_versions(page_id)?;
    if versions.is_empty() {
        eprintln!("{}", dim(&format!("{page_id} has no image versions yet")));
    }
    for v in &versions {
        let marker = if current == Some(v.version) { cyan("*") } else { " ".into() };
        let origin = match v.origin {
            ImageOrigin::Generated => "generated".to_string(),
            ImageOrigin::Edited => format!("edited: {}", v.instruction.as_deref().unwrap_or("")),
        };
        println!(
            "  {} v{:<3} {}  {}  {}",
            marker,
            v.version,
            v.created_at.format("%Y-%m-%d %H:%M"),
            v.image_url,
            dim(&origin)
        );
    }
    Ok(())
}

// ── usage ────────────────────────────────────────────────────────────────────

fn usage(cli: &Cli, days: u32, json: bool, action: Option<&UsageAction>) -> Result<()> {
    let ledger = UsageLedger::open(&cli.data_dir).context("Failed to open usage ledger")?;

    match action {
        Some(UsageAction::Prune { keep }) => {
            let removed = ledger.clear_old_records(*keep);
            ledger.flush().context("Failed to save usage ledger")?;
            eprintln!("{} removed {removed} records older than {keep} days", green("✔"));
            return Ok(());
        }
        Some(UsageAction::Reset) => {
            ledger.reset_stats();
            ledger.flush().context("Failed to save usage ledger")?;
            eprintln!("{} usage statistics reset", green("✔"));
            return Ok(());
        }
        None => {}
    }

    let period = ledger.get_stats_for_period(days);
    let monthly = ledger.get_monthly_stats();

    if json {
        let doc = serde_json::json!({
            "days": period,
            "monthly": monthly,
            "totalTokensUsed": ledger.total_tokens_used(),
            "totalCost": ledger.total_cost(),
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&doc).context("Failed to serialise usage")?
        );
        return Ok(());
    }

    println!(
        "{:<12} {:>10} {:>10} {:>10} {:>8} {:>10}",
        "Date", "Text", "Image", "Total", "Calls", "Cost $"
    );
    for day in &period {
        println!(
            "{:<12} {:>10} {:>10} {:>10} {:>8} {:>10.4}",
            day.date, day.text_tokens, day.image_tokens, day.total_tokens, day.request_count,
            day.estimated_cost
        );
    }
    println!();
    println!(
        "Last 30 days: {} tokens, {} calls, ${:.4}",
        monthly.total_tokens, monthly.request_count, monthly.estimated_cost
    );
    println!(
        "All time:     {} tokens, ${:.4}",
        ledger.total_tokens_used(),
        ledger.total_cost()
    );
    Ok(())
}

// ── config ───────────────────────────────────────────────────────────────────

async fn config(cli: &Cli, action: &ConfigAction) -> Result<()> {
    let store = ProviderConfigStore::open(&cli.data_dir).context("Failed to open config store")?;

    match action {
        ConfigAction::List => {
            let set = store.snapshot();
            for kind in [GenerationKind::Text, GenerationKind::Image] {
                println!("{}", bold(&format!("{kind} providers")));
                let default = set.default_id(kind);
                for c in set.apis(kind) {
                    println!(
                        "  {} {:<20} {:<18} {:<28} {}",
                        if default == Some(c.id.as_str()) { cyan("*") } else { " ".into() },
                        c.id,
                        c.provider,
                        c.effective_model(),
                        if c.enabled { String::new() } else { dim("(disabled)") },
                    );
                }
            }
        }
        ConfigAction::Export { output } => {
            let json = store.export_json().context("Failed to export configs")?;
            match output {
                Some(path) => {
                    tokio::fs::write(path, json)
                        .await
                        .with_context(|| format!("Failed to write {}", path.display()))?;
                    if !cli.quiet {
                        eprintln!("{} exported to {}", green("✔"), bold(&path.display().to_string()));
                    }
                }
                None => println!("{json}"),
            }
        }
        ConfigAction::Import { file } => {
            let raw = tokio::fs::read_to_string(file)
                .await
                .with_context(|| format!("Failed to read {}", file.display()))?;
            store.import_json(&raw).context("Import rejected")?;
            if !cli.quiet {
                let set = store.snapshot();
                eprintln!(
                    "{} imported {} text and {} image configs",
                    green("✔"),
                    set.text_apis.len(),
                    set.image_apis.len()
                );
            }
        }
        ConfigAction::Test { id, kind, timeout } => {
            let targets = match id {
                Some(id) => vec![store
                    .get(id)
                    .with_context(|| format!("No provider config with id '{id}'"))?],
                None => {
                    let kinds: Vec<GenerationKind> = match kind {
                        Some(k) => vec![(*k).into()],
                        None => vec![GenerationKind::Text, GenerationKind::Image],
                    };
                    let set = store.snapshot();
                    kinds
                        .into_iter()
                        .filter_map(|k| set.default_config(k).cloned())
                        .collect()
                }
            };
            if targets.is_empty() {
                anyhow::bail!("No provider configs to test");
            }

            let adapter = HttpProviderAdapter::new(Duration::from_secs(*timeout))
                .context("Failed to build HTTP client")?;
            let mut failed = 0usize;
            for target in &targets {
                let result = test_connection(&adapter, target).await;
                let message = result.message.unwrap_or_default();
                if result.success {
                    println!("  {} {:<20} {}", green("✓"), target.id, dim(&message));
                } else {
                    failed += 1;
                    println!("  {} {:<20} {}", red("✗"), target.id, red(&message));
                }
            }
            if failed > 0 {
                anyhow::bail!("{failed} of {} connection tests failed", targets.len());
            }
        }
    }
    Ok(())
}
