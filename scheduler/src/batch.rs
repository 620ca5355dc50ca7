//! Bounded parallel batch execution with ordered results.

use std::collections::VecDeque;
use std::future::Future;

use futures_util::stream::{FuturesUnordered, StreamExt};

use quarry_types::Task;

use crate::controller::ConcurrencyController;

/// Run every task through `executor`, keeping at most
/// `controller.concurrency()` executions in flight, and return the results
/// ordered by task index regardless of completion order.
///
/// The executor owns its task's retries and controller reporting; this loop
/// only decides when to launch. The window is re-read before every launch,
/// so adjustments made by in-flight tasks govern the next scheduling
/// decision without disturbing work that is already running.
///
/// Zero tasks return an empty vec immediately. Executor futures return
/// plain values; a panic inside one is a programming error and propagates.
pub async fn run_batch<P, R, F, Fut>(
    tasks: Vec<Task<P>>,
    controller: &ConcurrencyController,
    executor: F,
) -> Vec<R>
where
    F: Fn(Task<P>) -> Fut,
    Fut: Future<Output = R>,
{
    let total = tasks.len();
    if total == 0 {
        return Vec::new();
    }

    tracing::debug!(
        tasks = total,
        window = controller.concurrency(),
        "starting batch"
    );

    let mut pending: VecDeque<Task<P>> = tasks.into();
    let mut in_flight = FuturesUnordered::new();
    let mut finished: Vec<(usize, R)> = Vec::with_capacity(total);

    loop {
        while in_flight.len() < controller.concurrency() {
            let Some(task) = pending.pop_front() else {
                break;
            };
            let index = task.index;
            let execution = executor(task);
            in_flight.push(async move { (index, execution.await) });
        }

        match in_flight.next().await {
            Some((index, result)) => finished.push((index, result)),
            None => break,
        }
    }

    tracing::debug!(
        tasks = total,
        window = controller.concurrency(),
        "batch complete"
    );

    finished.sort_by_key(|(index, _)| *index);
    finished.into_iter().map(|(_, result)| result).collect()
}
