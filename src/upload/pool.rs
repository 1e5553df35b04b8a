//! Bounded worker pool
//!
//! A shared FIFO task queue drained by at most `concurrency` consumers. The
//! consumers are futures joined on the calling task, so "parallel" work is
//! interleaved I/O and never more than `concurrency` workers run at once.
//!
//! Used identically for chunk-level and file-level concurrency.

use futures::future::join_all;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::future::Future;

/// Run `worker` over every task with at most `concurrency` in flight.
///
/// Results are returned in completion order, not queue order. A
/// `concurrency` of zero is treated as one.
pub async fn run_bounded<T, R, F, Fut>(
    tasks: impl IntoIterator<Item = T>,
    concurrency: usize,
    worker: F,
) -> Vec<R>
where
    F: Fn(T) -> Fut,
    Fut: Future<Output = R>,
{
    let queue: Mutex<VecDeque<T>> = Mutex::new(tasks.into_iter().collect());
    let total = queue.lock().len();
    let consumers = concurrency.max(1).min(total);
    let results = Mutex::new(Vec::with_capacity(total));

    let queue = &queue;
    let results_ref = &results;
    let worker = &worker;

    join_all((0..consumers).map(|_| async move {
        loop {
            let next = queue.lock().pop_front();
            let Some(task) = next else {
                break;
            };
            let result = worker(task).await;
            results_ref.lock().push(result);
        }
    }))
    .await;

    results.into_inner()
}
