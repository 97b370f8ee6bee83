//! Usage ledger: append-only token/cost records with daily aggregation.
//!
//! Every [`UsageLedger::add_record`] appends one [`UsageRecord`] and updates,
//! in the same critical section, the [`DailyStats`] bucket for the record's
//! UTC date and the running totals. The invariant kept at all times:
//!
//! * `total_tokens_used()` equals the sum of `total_tokens` over retained records;
//! * every daily bucket equals the sum over the records of that date.
//!
//! Bulk operations ([`UsageLedger::clear_old_records`], [`UsageLedger::reset_stats`])
//! recompute buckets and totals from what remains rather than subtracting.
//!
//! When opened on a data directory the ledger persists to
//! `<dir>/usage-stats.json` after each mutation. Inside a tokio runtime the
//! write runs on the blocking pool, so recording usage never stalls a
//! generation task on disk I/O, and mutations that land while a write is
//! queued share it. Without a runtime the write happens inline. Call
//! [`UsageLedger::flush`] before exiting to be sure the file is current.

use crate::config::GenerationKind;
use crate::error::SlidesError;
use crate::pricing;
use crate::storage;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Stable storage key for persisted usage statistics.
pub const STORAGE_KEY: &str = "usage-stats";

/// Length of the rolling window used by [`UsageLedger::get_monthly_stats`].
pub const MONTHLY_WINDOW_DAYS: u32 = 30;

/// Time source, injectable for tests.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// One provider call's usage. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageRecord {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub kind: GenerationKind,
    pub provider: String,
    pub model: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
    pub cost: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_id: Option<String>,
}

impl UsageRecord {
    pub fn date(&self) -> NaiveDate {
        self.timestamp.date_naive()
    }
}

/// Input to [`UsageLedger::add_record`]: a record without id or timestamp.
///
/// `cost` is computed from the price table when left `None`.
#[derive(Debug, Clone, Default)]
pub struct NewUsage {
    pub kind: Option<GenerationKind>,
    pub provider: String,
    pub model: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost: Option<f64>,
    pub project_id: Option<String>,
    pub page_id: Option<String>,
}

impl NewUsage {
    pub fn new(
        kind: GenerationKind,
        provider: impl Into<String>,
        model: impl Into<String>,
        input_tokens: u64,
        output_tokens: u64,
    ) -> Self {
        Self {
            kind: Some(kind),
            provider: provider.into(),
            model: model.into(),
            input_tokens,
            output_tokens,
            ..Default::default()
        }
    }

    pub fn project(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }

    pub fn page(mut self, page_id: impl Into<String>) -> Self {
        self.page_id = Some(page_id.into());
        self
    }

    pub fn cost(mut self, cost: f64) -> Self {
        self.cost = Some(cost);
        self
    }
}

/// Aggregates for one UTC calendar date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyStats {
    pub date: NaiveDate,
    pub text_tokens: u64,
    pub image_tokens: u64,
    pub total_tokens: u64,
    pub request_count: u64,
    pub estimated_cost: f64,
}

impl DailyStats {
    pub fn empty(date: NaiveDate) -> Self {
        Self {
            date,
            text_tokens: 0,
            image_tokens: 0,
            total_tokens: 0,
            request_count: 0,
            estimated_cost: 0.0,
        }
    }

    fn add(&mut self, record: &UsageRecord) {
        match record.kind {
            GenerationKind::Text => self.text_tokens += record.total_tokens,
            GenerationKind::Image => self.image_tokens += record.total_tokens,
        }
        self.total_tokens += record.total_tokens;
        self.request_count += 1;
        self.estimated_cost += record.cost;
    }
}

/// Totals over a window of days.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeriodTotals {
    pub total_tokens: u64,
    pub request_count: u64,
    pub estimated_cost: f64,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LedgerState {
    records: Vec<UsageRecord>,
    daily_stats: BTreeMap<NaiveDate, DailyStats>,
    total_tokens_used: u64,
    total_cost: f64,
}

impl LedgerState {
    fn from_records(records: Vec<UsageRecord>) -> Self {
        let mut state = Self {
            records,
            ..Default::default()
        };
        state.recompute();
        state
    }

    fn apply(&mut self, record: &UsageRecord) {
        self.daily_stats
            .entry(record.date())
            .or_insert_with(|| DailyStats::empty(record.date()))
            .add(record);
        self.total_tokens_used += record.total_tokens;
        self.total_cost += record.cost;
    }

    fn recompute(&mut self) {
        self.daily_stats.clear();
        self.total_tokens_used = 0;
        self.total_cost = 0.0;
        let records = std::mem::take(&mut self.records);
        for r in &records {
            self.apply(r);
        }
        self.records = records;
    }
}

/// Ledger state plus what background writers need to persist it.
struct Shared {
    state: RwLock<LedgerState>,
    path: Option<PathBuf>,
    /// Serialises writers; the snapshot is taken under it, so the newest
    /// snapshot is always written last.
    write_lock: Mutex<()>,
    /// A background write is queued and has not taken its snapshot yet.
    write_queued: AtomicBool,
}

impl Shared {
    fn new(state: LedgerState, path: Option<PathBuf>) -> Arc<Self> {
        Arc::new(Self {
            state: RwLock::new(state),
            path,
            write_lock: Mutex::new(()),
            write_queued: AtomicBool::new(false),
        })
    }

    fn write(&self) -> Result<(), SlidesError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let _guard = self.write_lock.lock();
        self.write_queued.store(false, Ordering::SeqCst);
        let snapshot = self.state.read().clone();
        storage::write_json_atomic(path, &snapshot)
    }

    fn write_logged(&self) {
        if let Err(e) = self.write() {
            warn!("Failed to persist usage statistics: {e}");
        }
    }
}

pub struct UsageLedger {
    shared: Arc<Shared>,
    clock: Clock,
}

impl std::fmt::Debug for UsageLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.state.read();
        f.debug_struct("UsageLedger")
            .field("records", &state.records.len())
            .field("total_tokens_used", &state.total_tokens_used)
            .field("path", &self.shared.path)
            .finish()
    }
}

impl Default for UsageLedger {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl UsageLedger {
    /// A ledger that is never persisted.
    pub fn in_memory() -> Self {
        Self {
            shared: Shared::new(LedgerState::default(), None),
            clock: Arc::new(Utc::now),
        }
    }

    /// Load `<dir>/usage-stats.json`, or start empty when it does not exist.
    ///
    /// Buckets and totals are rebuilt from the stored records.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, SlidesError> {
        let path = dir.as_ref().join(format!("{STORAGE_KEY}.json"));
        let state = match storage::read_json::<LedgerState>(&path)? {
            Some(stored) => {
                info!(
                    "Loaded {} usage records from {}",
                    stored.records.len(),
                    path.display()
                );
                LedgerState::from_records(stored.records)
            }
            None => LedgerState::default(),
        };
        Ok(Self {
            shared: Shared::new(state, Some(path)),
            clock: Arc::new(Utc::now),
        })
    }

    /// Replace the time source.
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn path(&self) -> Option<&Path> {
        self.shared.path.as_deref()
    }

    /// Append a record, assigning id, timestamp and (if absent) cost.
    pub fn add_record(&self, usage: NewUsage) -> UsageRecord {
        let cost = usage.cost.unwrap_or_else(|| {
            pricing::calculate_cost(&usage.model, usage.input_tokens, usage.output_tokens)
        });
        let record = UsageRecord {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: (self.clock)(),
            kind: usage.kind.unwrap_or(GenerationKind::Text),
            provider: usage.provider,
            model: usage.model,
            input_tokens: usage.input_tokens,
            output_tokens: usage.output_tokens,
            total_tokens: usage.input_tokens + usage.output_tokens,
            cost,
            project_id: usage.project_id,
            page_id: usage.page_id,
        };

        {
            let mut state = self.state().write();
            state.apply(&record);
            state.records.push(record.clone());
        }
        debug!(
            "Usage recorded: {} {} {} tokens (${:.6})",
            record.provider, record.model, record.total_tokens, record.cost
        );
        self.persist_best_effort();
        record
    }

    pub fn today(&self) -> NaiveDate {
        (self.clock)().date_naive()
    }

    /// Stats for the current UTC date (zeroed when nothing was recorded).
    pub fn get_today_stats(&self) -> DailyStats {
        let today = self.today();
        self.state()
            .read()
            .daily_stats
            .get(&today)
            .cloned()
            .unwrap_or_else(|| DailyStats::empty(today))
    }

    /// Buckets with activity in the last `days` days (today included),
    /// ascending by date.
    pub fn get_stats_for_period(&self, days: u32) -> Vec<DailyStats> {
        if days == 0 {
            return Vec::new();
        }
        let today = self.today();
        let start = today - Duration::days(i64::from(days) - 1);
        self.state()
            .read()
            .daily_stats
            .range(start..=today)
            .map(|(_, s)| s.clone())
            .collect()
    }

    /// Totals over the rolling 30-day window ending today.
    pub fn get_monthly_stats(&self) -> PeriodTotals {
        self.get_stats_for_period(MONTHLY_WINDOW_DAYS)
            .iter()
            .fold(PeriodTotals::default(), |mut acc, s| {
                acc.total_tokens += s.total_tokens;
                acc.request_count += s.request_count;
                acc.estimated_cost += s.estimated_cost;
                acc
            })
    }

    /// Drop records and buckets dated before the last `days_to_keep` days.
    ///
    /// Returns the number of records removed. Totals are recomputed from the
    /// retained records.
    pub fn clear_old_records(&self, days_to_keep: u32) -> usize {
        let today = self.today();
        let removed = {
            let mut state = self.state().write();
            let before = state.records.len();
            if days_to_keep == 0 {
                state.records.clear();
            } else {
                let cutoff = today - Duration::days(i64::from(days_to_keep) - 1);
                state.records.retain(|r| r.date() >= cutoff);
            }
            state.recompute();
            before - state.records.len()
        };
        info!("Pruned {removed} usage records (keeping {days_to_keep} days)");
        self.persist_best_effort();
        removed
    }

    /// Clear everything and zero the totals.
    pub fn reset_stats(&self) {
        *self.state().write() = LedgerState::default();
        info!("Usage statistics reset");
        self.persist_best_effort();
    }

    pub fn total_tokens_used(&self) -> u64 {
        self.state().read().total_tokens_used
    }

    pub fn total_cost(&self) -> f64 {
        self.state().read().total_cost
    }

    pub fn records(&self) -> Vec<UsageRecord> {
        self.state().read().records.clone()
    }

    pub fn all_daily_stats(&self) -> Vec<DailyStats> {
        self.state().read().daily_stats.values().cloned().collect()
    }

    /// Write the current state to disk now, on the calling thread. No-op
    /// for in-memory ledgers.
    pub fn flush(&self) -> Result<(), SlidesError> {
        self.shared.write()
    }

    fn state(&self) -> &RwLock<LedgerState> {
        &self.shared.state
    }

    fn persist_best_effort(&self) {
        if self.shared.path.is_none() {
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                if self.shared.write_queued.swap(true, Ordering::SeqCst) {
                    return;
                }
                let shared = Arc::clone(&self.shared);
                handle.spawn_blocking(move || shared.write_logged());
            }
            Err(_) => self.shared.write_logged(),
        }
    }
}
