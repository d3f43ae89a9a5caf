//! Bounded-concurrency batch execution.
//!
//! Items are split into fixed-size groups. The futures of one group run
//! concurrently and the group is awaited in full before the next one starts,
//! so at most `batch_size` operations are ever in flight. There are no
//! retries; each operation reports its own failure in its output.

use std::future::Future;

use futures_util::future::join_all;

use crate::broadcast::CancelFlag;

/// Batch size for pointer, sidecar and link writes.
pub const FILE_BATCH_SIZE: usize = 20;

/// Batch size for artwork downloads.
pub const IMAGE_BATCH_SIZE: usize = 10;

/// Outcome of a batched run.
#[derive(Debug)]
pub struct BatchOutcome<T> {
    /// Outputs in input order, for every item that was dispatched.
    pub results: Vec<T>,
    /// Set when the cancel flag stopped dispatch before all items ran.
    pub cancelled: bool,
}

/// Runs `op` over `items` in sequential groups of `batch_size`.
pub async fn run_in_batches<I, F, Fut, T>(items: I, batch_size: usize, op: F) -> Vec<T>
where
    I: IntoIterator,
    F: FnMut(I::Item) -> Fut,
    Fut: Future<Output = T>,
{
    run_batches(items, batch_size, &CancelFlag::new(), op, |_| {})
        .await
        .results
}

/// Like [`run_in_batches`], checking `cancel` before each group and calling
/// `on_batch` with the running count of finished items after each group.
pub async fn run_batches<I, F, Fut, T, P>(
    items: I,
    batch_size: usize,
    cancel: &CancelFlag,
    mut op: F,
    mut on_batch: P,
) -> BatchOutcome<T>
where
    I: IntoIterator,
    F: FnMut(I::Item) -> Fut,
    Fut: Future<Output = T>,
    P: FnMut(usize),
{
    let batch_size = batch_size.max(1);
    let mut iter = items.into_iter().peekable();
    let mut results = Vec::new();

    while iter.peek().is_some() {
        if cancel.is_cancelled() {
            log::debug!("Batch dispatch stopped by cancellation");
            return BatchOutcome {
                results,
                cancelled: true,
            };
        }

        let batch: Vec<Fut> = iter.by_ref().take(batch_size).map(&mut op).collect();
        results.extend(join_all(batch).await);
        on_batch(results.len());
    }

    BatchOutcome {
        results,
        cancelled: false,
    }
}
