//! Fixed-size worker pool over a finite list of items
//!
//! Items are fed through a bounded channel shared by all workers. The first
//! failing item cancels the remaining work; its error is what the caller gets
//! back. Cancelling the caller's token stops dispatch of new items.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::{NestError, Result};

type ErrorSlot = Arc<std::sync::Mutex<Option<NestError>>>;

/// Run `f` over every item with at most `concurrency` calls in flight.
///
/// `concurrency <= 0` runs the items one at a time. Returns the first error
/// produced by `f`, or [`NestError::Cancelled`] if `cancel` fired before all
/// items were dispatched.
pub async fn for_each_concurrent<T, F, Fut>(
    items: Vec<T>,
    concurrency: i32,
    cancel: &CancellationToken,
    f: F,
) -> Result<()>
where
    T: Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    let worker_count = usize::try_from(concurrency)
        .ok()
        .filter(|n| *n > 0)
        .unwrap_or(1);
    let token = cancel.child_token();
    let first_error: ErrorSlot = Arc::default();
    let f = Arc::new(f);

    let (item_tx, item_rx) = mpsc::channel::<T>(worker_count);
    let item_rx = Arc::new(Mutex::new(item_rx));

    debug!(workers = worker_count, items = items.len(), "Starting worker pool");

    let mut workers = JoinSet::new();
    for worker_id in 0..worker_count {
        workers.spawn(worker_task(
            worker_id,
            Arc::clone(&item_rx),
            Arc::clone(&f),
            token.clone(),
            Arc::clone(&first_error),
        ));
    }
    // workers hold the only receivers from here on
    drop(item_rx);

    for item in items {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            sent = item_tx.send(item) => {
                if sent.is_err() {
                    break;
                }
            }
        }
    }
    drop(item_tx);

    while let Some(joined) = workers.join_next().await {
        if let Err(e) = joined {
            token.cancel();
            record_error(
                &first_error,
                NestError::Internal(format!("worker task failed: {}", e)),
            );
        }
    }

    let failure = first_error
        .lock()
        .map_err(|e| NestError::Internal(format!("Lock poisoned: {}", e)))?
        .take();
    if let Some(err) = failure {
        return Err(err);
    }
    if cancel.is_cancelled() {
        info!("Worker pool cancelled");
        return Err(NestError::Cancelled);
    }
    Ok(())
}

async fn worker_task<T, F, Fut>(
    worker_id: usize,
    item_rx: Arc<Mutex<mpsc::Receiver<T>>>,
    f: Arc<F>,
    token: CancellationToken,
    first_error: ErrorSlot,
) where
    F: Fn(T) -> Fut,
    Fut: Future<Output = Result<()>>,
{
    loop {
        let item = {
            let mut rx = item_rx.lock().await;
            tokio::select! {
                biased;
                _ = token.cancelled() => None,
                item = rx.recv() => item,
            }
        };

        let Some(item) = item else {
            break;
        };
        if token.is_cancelled() {
            break;
        }

        if let Err(e) = f(item).await {
            debug!(worker_id, error = %e, "Worker stopping after error");
            record_error(&first_error, e);
            token.cancel();
            break;
        }
    }

    debug!(worker_id, "Worker finished");
}

/// Keep the first error only.
fn record_error(slot: &ErrorSlot, err: NestError) {
    if let Ok(mut slot) = slot.lock() {
        if slot.is_none() {
            *slot = Some(err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_processes_every_item() {
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);

        for_each_concurrent((0..50).collect(), 4, &CancellationToken::new(), move |i: i32| {
            let sink = Arc::clone(&sink);
            async move {
                sink.lock().unwrap().push(i);
                Ok::<_, NestError>(())
            }
        })
        .await
        .unwrap();

        let mut seen = seen.lock().unwrap().clone();
        seen.sort();
        assert_eq!(seen, (0..50).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_non_positive_concurrency_runs_sequentially() {
        for concurrency in [0, -3] {
            let in_flight = Arc::new(AtomicUsize::new(0));
            let peak = Arc::new(AtomicUsize::new(0));
            let (in_flight_c, peak_c) = (Arc::clone(&in_flight), Arc::clone(&peak));
            let cancel = CancellationToken::new();

            for_each_concurrent((0..10).collect(), concurrency, &cancel, move |_: i32| {
                let in_flight = Arc::clone(&in_flight_c);
                let peak = Arc::clone(&peak_c);
                async move {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(2)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    Ok::<_, NestError>(())
                }
            })
            .await
            .unwrap();

            assert_eq!(peak.load(Ordering::SeqCst), 1);
        }
    }

    #[tokio::test]
    async fn test_respects_concurrency_limit() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let (in_flight_c, peak_c) = (Arc::clone(&in_flight), Arc::clone(&peak));

        for_each_concurrent((0..20).collect(), 3, &CancellationToken::new(), move |_: i32| {
            let in_flight = Arc::clone(&in_flight_c);
            let peak = Arc::clone(&peak_c);
            async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok::<_, NestError>(())
            }
        })
        .await
        .unwrap();

        assert!(peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn test_first_error_stops_dispatch() {
        let processed = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&processed);
        let cancel = CancellationToken::new();

        let result = for_each_concurrent((0..100).collect(), 1, &cancel, move |i: i64| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                if i == 3 {
                    return Err(NestError::Persistence {
                        nest_id: i,
                        message: "disk full".into(),
                    });
                }
                Ok::<_, NestError>(())
            }
        })
        .await;

        assert!(matches!(result, Err(NestError::Persistence { nest_id: 3, .. })));
        assert_eq!(processed.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_external_cancellation() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        let processed = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&processed);

        let result = for_each_concurrent((0..100).collect(), 2, &cancel, move |i: i32| {
            let counter = Arc::clone(&counter);
            let trigger = trigger.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                if i == 5 {
                    trigger.cancel();
                }
                Ok::<_, NestError>(())
            }
        })
        .await;

        assert!(matches!(result, Err(NestError::Cancelled)));
        assert!(processed.load(Ordering::SeqCst) < 100);
    }

    #[tokio::test]
    async fn test_empty_input() {
        let cancel = CancellationToken::new();
        let result = for_each_concurrent(Vec::<i32>::new(), 4, &cancel, |_| async {
            Ok::<_, NestError>(())
        })
        .await;
        assert!(result.is_ok());
    }
}
