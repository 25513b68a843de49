use std::future::Future;

use futures::stream::{self, StreamExt};
use tokio::time::Instant;

use crate::core::{BatchResult, IpfsError, Result};
use crate::progress::ProgressTracker;

/// Run `op` over `inputs` with at most `parallelism` in flight.
///
/// Outcomes are slotted by input index, so the result order matches the
/// input order whatever the completion order. Once `deadline` passes,
/// outstanding items are dropped and report `Timeout`.
pub(crate) async fn run_indexed<I, T, F, Fut>(
    inputs: Vec<I>,
    parallelism: usize,
    deadline: Option<Instant>,
    progress: &ProgressTracker,
    op: F,
) -> BatchResult<T>
where
    F: Fn(I) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let total = inputs.len();
    let mut slots: Vec<Option<Result<T>>> = (0..total).map(|_| None).collect();

    let tasks = inputs.into_iter().enumerate().map(|(index, input)| {
        let call = op(input);
        async move {
            let outcome = match deadline {
                Some(deadline) => tokio::time::timeout_at(deadline, call)
                    .await
                    .unwrap_or_else(|_| Err(deadline_elapsed())),
                None => call.await,
            };
            (index, outcome)
        }
    });

    let mut completed = 0;
    let mut pending = stream::iter(tasks).buffer_unordered(parallelism.max(1));
    while let Some((index, outcome)) = pending.next().await {
        completed += 1;
        progress.batch_item(index, completed, total, outcome.is_ok());
        if let Err(e) = &outcome {
            log::debug!("Batch item {} failed: {}", index, e);
        }
        slots[index] = Some(outcome);
    }

    BatchResult::new(
        slots
            .into_iter()
            .map(|slot| slot.unwrap_or_else(|| Err(deadline_elapsed())))
            .collect(),
    )
}

fn deadline_elapsed() -> IpfsError {
    IpfsError::Timeout("batch deadline elapsed before the item completed".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::{MetricsObserver, NoopObserver};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn order_follows_input_not_completion() {
        let tracker = ProgressTracker::new(Arc::new(NoopObserver));
        // later items finish first
        let result = run_indexed(vec![30u64, 20, 10, 0], 4, None, &tracker, |ms| async move {
            tokio::time::sleep(Duration::from_millis(ms)).await;
            Ok(ms)
        })
        .await;

        let values: Vec<u64> = result.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(values, vec![30, 20, 10, 0]);
    }

    #[tokio::test]
    async fn parallelism_is_capped() {
        let tracker = ProgressTracker::new(Arc::new(NoopObserver));
        let in_flight = AtomicUsize::new(0);
        let peak = AtomicUsize::new(0);

        let result = run_indexed((0..12).collect(), 3, None, &tracker, |i: usize| {
            let in_flight = &in_flight;
            let peak = &peak;
            async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok(i)
            }
        })
        .await;

        assert!(result.all_succeeded());
        assert!(peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn failures_stay_with_their_item() {
        let metrics = Arc::new(MetricsObserver::new());
        let tracker = ProgressTracker::new(metrics.clone());
        let result = run_indexed(vec![1, 2, 3], 2, None, &tracker, |n: i32| async move {
            if n == 2 {
                Err(IpfsError::Validation("two".into()))
            } else {
                Ok(n)
            }
        })
        .await;

        assert_eq!(result.success_count(), 2);
        assert!(matches!(result.get(1), Some(Err(IpfsError::Validation(_)))));
        assert_eq!(*result.get(2).unwrap().as_ref().unwrap(), 3);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.batch_items_succeeded, 2);
        assert_eq!(snapshot.batch_items_failed, 1);
        assert_eq!(snapshot.last_percent, 100);
    }

    #[tokio::test]
    async fn deadline_times_out_pending_items() {
        let tracker = ProgressTracker::new(Arc::new(NoopObserver));
        let deadline = Instant::now() + Duration::from_millis(50);
        let result = run_indexed(vec![0u64, 5_000], 2, Some(deadline), &tracker, |ms| async move {
            tokio::time::sleep(Duration::from_millis(ms)).await;
            Ok(ms)
        })
        .await;

        assert!(result.get(0).unwrap().is_ok());
        assert!(matches!(result.get(1), Some(Err(IpfsError::Timeout(_)))));
    }

    #[tokio::test]
    async fn empty_batch() {
        let tracker = ProgressTracker::new(Arc::new(NoopObserver));
        let result = run_indexed(Vec::<u8>::new(), 4, None, &tracker, |n| async move { Ok(n) }).await;
        assert!(result.is_empty());
    }
}
