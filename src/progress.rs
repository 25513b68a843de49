//! Progress and metrics observation for long-running transfers and batches.
//!
//! Observers are invoked inline at checkpoints. Dispatch goes through a
//! [`ProgressTracker`], which keeps the reported percentage monotonic and
//! swallows observer failures (returned errors and panics alike).

use std::io::Write;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

/// Error an observer may return; logged and otherwise ignored
pub type ObserverError = Box<dyn std::error::Error + Send + Sync>;

/// Direction of a byte transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Upload,
    Download,
}

/// Where in an operation an event was raised
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Checkpoint {
    /// A chunk of an upload or download went over the wire
    ChunkTransferred {
        direction: Direction,
        /// Bytes in this chunk
        chunk: u64,
        /// Bytes moved so far in this transfer
        transferred: u64,
        total: Option<u64>,
    },
    /// One member of a batch resolved
    BatchItemCompleted {
        index: usize,
        completed: usize,
        total: usize,
        succeeded: bool,
    },
}

/// A single progress notification
#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub checkpoint: Checkpoint,
    /// 0..=100, never decreasing within one operation
    pub percent: u8,
    pub message: String,
}

/// Receives progress notifications.
///
/// Implementations must return quickly; they run on the task performing the
/// transfer.
pub trait ProgressObserver: Send + Sync {
    fn on_progress(&self, event: &ProgressEvent) -> Result<(), ObserverError>;
}

/// Observer that ignores everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl ProgressObserver for NoopObserver {
    fn on_progress(&self, _event: &ProgressEvent) -> Result<(), ObserverError> {
        Ok(())
    }
}

/// Dispatches events of one operation to an observer
#[derive(Clone)]
pub struct ProgressTracker {
    inner: Arc<TrackerInner>,
}

struct TrackerInner {
    observer: Arc<dyn ProgressObserver>,
    last_percent: AtomicU8,
}

impl ProgressTracker {
    pub fn new(observer: Arc<dyn ProgressObserver>) -> Self {
        Self {
            inner: Arc::new(TrackerInner {
                observer,
                last_percent: AtomicU8::new(0),
            }),
        }
    }

    /// Report a checkpoint. Never fails and never panics.
    pub fn report(&self, checkpoint: Checkpoint, percent: u8, message: impl Into<String>) {
        let percent = percent.min(100);
        let previous = self.inner.last_percent.fetch_max(percent, Ordering::AcqRel);
        let event = ProgressEvent {
            checkpoint,
            percent: percent.max(previous),
            message: message.into(),
        };

        let observer = &self.inner.observer;
        match panic::catch_unwind(AssertUnwindSafe(|| observer.on_progress(&event))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => log::warn!("Progress observer failed at {}%: {}", event.percent, e),
            Err(_) => log::warn!("Progress observer panicked at {}%", event.percent),
        }
    }

    /// Report a `chunk`-byte chunk, bringing this transfer to `transferred` of `total` bytes
    pub fn chunk(&self, direction: Direction, chunk: u64, transferred: u64, total: Option<u64>) {
        let percent = match total {
            Some(0) => 100,
            Some(total) => ((transferred.min(total) * 100) / total) as u8,
            None => 0,
        };
        let verb = match direction {
            Direction::Upload => "uploaded",
            Direction::Download => "downloaded",
        };
        let message = match total {
            Some(total) => format!("{} {} of {} bytes", verb, transferred, total),
            None => format!("{} {} bytes", verb, transferred),
        };
        self.report(
            Checkpoint::ChunkTransferred {
                direction,
                chunk,
                transferred,
                total,
            },
            percent,
            message,
        );
    }

    /// Report that batch item `index` resolved as the `completed`-th of `total`
    pub fn batch_item(&self, index: usize, completed: usize, total: usize, succeeded: bool) {
        let percent = if total == 0 {
            100
        } else {
            ((completed.min(total) * 100) / total) as u8
        };
        let outcome = if succeeded { "ok" } else { "failed" };
        self.report(
            Checkpoint::BatchItemCompleted {
                index,
                completed,
                total,
                succeeded,
            },
            percent,
            format!("item {} {} ({}/{})", index, outcome, completed, total),
        );
    }
}

impl std::fmt::Debug for ProgressTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressTracker")
            .field("last_percent", &self.inner.last_percent.load(Ordering::Relaxed))
            .finish()
    }
}

/// Counters collected from progress events
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub events: u64,
    pub chunks: u64,
    pub bytes_uploaded: u64,
    pub bytes_downloaded: u64,
    pub batch_items_succeeded: u64,
    pub batch_items_failed: u64,
    pub last_percent: u8,
}

/// Observer that aggregates progress events into counters
#[derive(Debug, Default)]
pub struct MetricsObserver {
    events: AtomicU64,
    chunks: AtomicU64,
    bytes_uploaded: AtomicU64,
    bytes_downloaded: AtomicU64,
    batch_items_succeeded: AtomicU64,
    batch_items_failed: AtomicU64,
    last_percent: AtomicU8,
}

impl MetricsObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            events: self.events.load(Ordering::Relaxed),
            chunks: self.chunks.load(Ordering::Relaxed),
            bytes_uploaded: self.bytes_uploaded.load(Ordering::Relaxed),
            bytes_downloaded: self.bytes_downloaded.load(Ordering::Relaxed),
            batch_items_succeeded: self.batch_items_succeeded.load(Ordering::Relaxed),
            batch_items_failed: self.batch_items_failed.load(Ordering::Relaxed),
            last_percent: self.last_percent.load(Ordering::Relaxed),
        }
    }
}

impl ProgressObserver for MetricsObserver {
    fn on_progress(&self, event: &ProgressEvent) -> Result<(), ObserverError> {
        self.events.fetch_add(1, Ordering::Relaxed);
        self.last_percent.store(event.percent, Ordering::Relaxed);

        match &event.checkpoint {
            Checkpoint::ChunkTransferred { direction, chunk, .. } => {
                self.chunks.fetch_add(1, Ordering::Relaxed);
                let counter = match direction {
                    Direction::Upload => &self.bytes_uploaded,
                    Direction::Download => &self.bytes_downloaded,
                };
                counter.fetch_add(*chunk, Ordering::Relaxed);
            }
            Checkpoint::BatchItemCompleted { succeeded, .. } => {
                let counter = if *succeeded {
                    &self.batch_items_succeeded
                } else {
                    &self.batch_items_failed
                };
                counter.fetch_add(1, Ordering::Relaxed);
            }
        }
        Ok(())
    }
}

/// Progress printer for the command line
#[derive(Debug, Default)]
pub struct CmdProgress;

impl ProgressObserver for CmdProgress {
    fn on_progress(&self, event: &ProgressEvent) -> Result<(), ObserverError> {
        let mut stderr = std::io::stderr().lock();
        writeln!(stderr, "[{:>3}%] {}", event.percent, event.message)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder {
        percents: Mutex<Vec<u8>>,
    }

    impl ProgressObserver for Recorder {
        fn on_progress(&self, event: &ProgressEvent) -> Result<(), ObserverError> {
            self.percents.lock().push(event.percent);
            Ok(())
        }
    }

    struct Failing;

    impl ProgressObserver for Failing {
        fn on_progress(&self, _event: &ProgressEvent) -> Result<(), ObserverError> {
            Err("observer is broken".into())
        }
    }

    struct Panicking;

    impl ProgressObserver for Panicking {
        fn on_progress(&self, _event: &ProgressEvent) -> Result<(), ObserverError> {
            panic!("observer exploded");
        }
    }

    #[test]
    fn percent_is_monotonic_and_clamped() {
        let recorder = Arc::new(Recorder::default());
        let tracker = ProgressTracker::new(recorder.clone());

        tracker.report(Checkpoint::BatchItemCompleted { index: 0, completed: 1, total: 4, succeeded: true }, 25, "a");
        tracker.report(Checkpoint::BatchItemCompleted { index: 2, completed: 2, total: 4, succeeded: true }, 10, "b");
        tracker.report(Checkpoint::BatchItemCompleted { index: 1, completed: 3, total: 4, succeeded: true }, 250, "c");

        assert_eq!(*recorder.percents.lock(), vec![25, 25, 100]);
    }

    #[test]
    fn chunk_percentages() {
        let recorder = Arc::new(Recorder::default());
        let tracker = ProgressTracker::new(recorder.clone());

        tracker.chunk(Direction::Upload, 256, 256, Some(1024));
        tracker.chunk(Direction::Upload, 768, 1024, Some(1024));
        assert_eq!(*recorder.percents.lock(), vec![25, 100]);

        let recorder = Arc::new(Recorder::default());
        let tracker = ProgressTracker::new(recorder.clone());
        tracker.chunk(Direction::Download, 0, 0, Some(0));
        assert_eq!(*recorder.percents.lock(), vec![100]);
    }

    #[test]
    fn observer_errors_and_panics_are_contained() {
        ProgressTracker::new(Arc::new(Failing)).chunk(Direction::Upload, 1, 1, Some(2));
        ProgressTracker::new(Arc::new(Panicking)).batch_item(0, 1, 1, false);
    }

    #[test]
    fn metrics_observer_counts() {
        let metrics = Arc::new(MetricsObserver::new());
        let tracker = ProgressTracker::new(metrics.clone());

        tracker.chunk(Direction::Upload, 512, 512, Some(1024));
        tracker.chunk(Direction::Upload, 512, 1024, Some(1024));
        let batch = ProgressTracker::new(metrics.clone());
        batch.batch_item(0, 1, 2, true);
        batch.batch_item(1, 2, 2, false);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.events, 4);
        assert_eq!(snapshot.chunks, 2);
        assert_eq!(snapshot.bytes_uploaded, 1024);
        assert_eq!(snapshot.batch_items_succeeded, 1);
        assert_eq!(snapshot.batch_items_failed, 1);
        assert_eq!(snapshot.last_percent, 100);
    }

    #[test]
    fn byte_counters_accumulate_across_transfers() {
        let metrics = Arc::new(MetricsObserver::new());

        let first = ProgressTracker::new(metrics.clone());
        first.chunk(Direction::Upload, 600, 600, Some(1000));
        first.chunk(Direction::Upload, 400, 1000, Some(1000));
        let second = ProgressTracker::new(metrics.clone());
        second.chunk(Direction::Upload, 1000, 1000, Some(1000));
        let third = ProgressTracker::new(metrics.clone());
        third.chunk(Direction::Download, 300, 300, None);
        third.chunk(Direction::Download, 200, 500, None);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.bytes_uploaded, 2000);
        assert_eq!(snapshot.bytes_downloaded, 500);
        assert_eq!(snapshot.chunks, 5);
    }
}
