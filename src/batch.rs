//! Batch generation of a caller-selected set of pages.
//!
//! Every page is dispatched at once (no fan-out bound) and the batch settles
//! only after every page has settled. One page's failure never short-circuits
//! the others; failures are logged and collected in [`BatchResult::failed`].
//!
//! [`batch_retry`] forces regeneration; [`batch_generate`] lets the caller
//! choose, so already-completed pages can be skipped. Completion order across
//! pages is unspecified. Use [`batch_retry_stream`] to observe outcomes as
//! they land.

use crate::events::SlidesEvent;
use crate::model::{BatchResult, PageOutcome};
use crate::orchestrator::Orchestrator;
use futures::future::join_all;
use futures::stream::{FuturesUnordered, Stream};
use std::collections::BTreeSet;
use std::future::Future;
use std::pin::Pin;
use tracing::info;

/// A boxed stream of per-page outcomes, in completion order.
pub type OutcomeStream = Pin<Box<dyn Stream<Item = PageOutcome> + Send>>;

fn dedup<I, S>(page_ids: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut seen = BTreeSet::new();
    page_ids
        .into_iter()
        .map(Into::into)
        .filter(|id| seen.insert(id.clone()))
        .collect()
}

fn dispatch(
    orchestrator: &Orchestrator,
    ids: Vec<String>,
    force: bool,
) -> Vec<impl Future<Output = PageOutcome> + Send + 'static> {
    info!("Batch: dispatching {} pages (force: {force})", ids.len());
    orchestrator.events().publish(SlidesEvent::BatchDispatched {
        page_ids: ids.clone(),
    });
    ids.into_iter()
        .map(|page_id| {
            let orchestrator = orchestrator.clone();
            async move {
                let result = orchestrator.generate(&page_id, force).await;
                PageOutcome { page_id, result }
            }
        })
        .collect()
}

/// Force-regenerate every page in `page_ids` concurrently and wait for all
/// of them. Duplicate ids are dispatched once.
pub async fn batch_retry<I, S>(orchestrator: &Orchestrator, page_ids: I) -> BatchResult
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    batch_generate(orchestrator, page_ids, true).await
}

/// Generate every page in `page_ids` concurrently and wait for all of them.
///
/// With `force = false` completed pages settle as successes without a
/// provider call, exactly as [`Orchestrator::generate`] does for one page.
pub async fn batch_generate<I, S>(
    orchestrator: &Orchestrator,
    page_ids: I,
    force: bool,
) -> BatchResult
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let ids = dedup(page_ids);
    let futures = dispatch(orchestrator, ids, force);
    let outcomes = join_all(futures).await;
    let result = orchestrator.settle(outcomes);
    info!(
        "Batch settled: {} succeeded, {} failed",
        result.succeeded.len(),
        result.failed.len()
    );
    result
}

/// Like [`batch_retry`] but yields each page's outcome as it settles.
///
/// Every page is dispatched on the first poll. Generation runs on spawned
/// tasks, so dropping the stream afterwards does not cancel issued requests.
pub fn batch_retry_stream<I, S>(orchestrator: &Orchestrator, page_ids: I) -> OutcomeStream
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let ids = dedup(page_ids);
    let pending: FuturesUnordered<_> = dispatch(orchestrator, ids, true).into_iter().collect();
    Box::pin(pending)
}
