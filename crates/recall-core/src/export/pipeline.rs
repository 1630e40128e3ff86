//! Producer / worker pool / reporter skeleton shared by every export phase.
//!
//! ```text
//! producer ──▶ bounded queue ──▶ permit ──▶ spawn_blocking(process) ──▶ completed
//!                                                                         │
//!                              reporter (interval) ◀──────────────────────┘──▶ ProgressSink
//! ```
//!
//! The producer and every item run on the blocking pool. Concurrency is
//! capped by a semaphore holding `workers` permits.

use super::progress::{PhaseRange, ProgressSink};
use crate::error::{RecallError, Result};
use std::fmt::Display;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Semaphore};
use tokio::task::{JoinError, JoinSet};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{info, warn};

/// One export phase: a fixed item set and the per-item operation.
///
/// Every method except `name` and `label` runs on a blocking thread.
pub trait PhaseJob: Send + Sync + 'static {
    type Item: Send + 'static;

    fn name(&self) -> &'static str;

    /// Number of items `produce` will enqueue.
    fn total(&self) -> Result<u64>;

    /// Enqueues every item with `blocking_send`. Returns early if the
    /// queue closes.
    fn produce(&self, queue: &mpsc::Sender<Self::Item>) -> Result<()>;

    /// Short description of an item for error events.
    fn label(&self, item: &Self::Item) -> String;

    fn process(&self, item: Self::Item) -> Result<()>;
}

#[derive(Debug, Clone, Copy)]
pub struct PoolConfig {
    pub workers: usize,
    pub queue_depth: usize,
    pub report_interval: Duration,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PhaseReport {
    pub total: u64,
    pub completed: u64,
    pub failed: u64,
}

fn joined<T>(outcome: std::result::Result<Result<T>, JoinError>) -> Result<T> {
    outcome.map_err(|e| RecallError::TaskFailed(e.to_string()))?
}

/// Runs `job` to completion. Item failures, including panics, become error
/// events; they never stop the phase.
pub async fn run_phase<J: PhaseJob>(job: Arc<J>, range: PhaseRange, pool: PoolConfig, sink: &ProgressSink) -> PhaseReport {
    let name = job.name();
    sink.processing(format!("{name} start"), range.low).await;

    let sizing = Arc::clone(&job);
    let total = match joined(tokio::task::spawn_blocking(move || sizing.total()).await) {
        Ok(n) => n,
        Err(e) => {
            warn!(phase = name, error = %e, "could not size phase");
            sink.error(format!("{name}: {e}")).await;
            0
        }
    };
    info!(phase = name, total, workers = pool.workers, "phase started");

    let completed = Arc::new(AtomicU64::new(0));
    let failed = Arc::new(AtomicU64::new(0));

    let (queue_tx, mut queue_rx) = mpsc::channel::<J::Item>(pool.queue_depth.max(1));
    let producer = {
        let job = Arc::clone(&job);
        tokio::task::spawn_blocking(move || job.produce(&queue_tx))
    };

    let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
    let reporter = {
        let sink = sink.clone();
        let completed = Arc::clone(&completed);
        tokio::spawn(async move {
            let period = pool.report_interval.max(Duration::from_millis(1));
            let mut ticks = interval_at(Instant::now() + period, period);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = &mut stop_rx => break,
                    _ = ticks.tick() => {
                        let done = completed.load(Ordering::Relaxed);
                        sink.processing(format!("{name} doing"), range.at(done, total)).await;
                    }
                }
            }
        })
    };

    let permits = Arc::new(Semaphore::new(pool.workers.max(1)));
    let mut workers = JoinSet::new();
    while let Some(item) = queue_rx.recv().await {
        let Ok(permit) = Arc::clone(&permits).acquire_owned().await else {
            break;
        };
        let job = Arc::clone(&job);
        let sink = sink.clone();
        let completed = Arc::clone(&completed);
        let failed = Arc::clone(&failed);
        workers.spawn(async move {
            let _permit = permit;
            let label = job.label(&item);
            let outcome = joined(tokio::task::spawn_blocking(move || job.process(item)).await);
            if let Err(e) = outcome {
                failed.fetch_add(1, Ordering::Relaxed);
                report_failure(&sink, name, &label, e).await;
            }
            completed.fetch_add(1, Ordering::Relaxed);
        });
    }
    while let Some(finished) = workers.join_next().await {
        if let Err(e) = finished {
            warn!(phase = name, error = %e, "worker task lost");
        }
    }

    if let Err(e) = joined(producer.await) {
        report_failure(sink, name, "enumeration", e).await;
    }
    drop(stop_tx);
    if let Err(e) = reporter.await {
        warn!(phase = name, error = %e, "reporter task lost");
    }

    let report = PhaseReport {
        total,
        completed: completed.load(Ordering::Relaxed),
        failed: failed.load(Ordering::Relaxed),
    };
    info!(
        phase = name,
        completed = report.completed,
        failed = report.failed,
        "phase finished"
    );
    sink.processing(format!("{name} end"), range.high).await;
    report
}

async fn report_failure(sink: &ProgressSink, phase: &str, label: &str, err: impl Display) {
    warn!(phase, item = label, error = %err, "item failed");
    sink.error(format!("{phase} {label}: {err}")).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::progress::{EventStatus, ProgressEvent};

    struct Numbers {
        count: u64,
        seen: AtomicU64,
        panic_on: Option<u64>,
    }

    impl Numbers {
        fn new(count: u64) -> Arc<Self> {
            Arc::new(Self {
                count,
                seen: AtomicU64::new(0),
                panic_on: None,
            })
        }
    }

    impl PhaseJob for Numbers {
        type Item = u64;

        fn name(&self) -> &'static str {
            "numbers"
        }

        fn total(&self) -> Result<u64> {
            Ok(self.count)
        }

        fn produce(&self, queue: &mpsc::Sender<u64>) -> Result<()> {
            for i in 0..self.count {
                if queue.blocking_send(i).is_err() {
                    break;
                }
            }
            Ok(())
        }

        fn label(&self, item: &u64) -> String {
            format!("#{item}")
        }

        fn process(&self, item: u64) -> Result<()> {
            self.seen.fetch_add(1, Ordering::Relaxed);
            std::thread::sleep(Duration::from_millis(1));
            if self.panic_on == Some(item) {
                panic!("item {item} blew up");
            }
            if item % 10 == 3 {
                return Err(RecallError::Unsupported("odd item"));
            }
            Ok(())
        }
    }

    async fn drain(mut rx: mpsc::Receiver<ProgressEvent>) -> Vec<ProgressEvent> {
        let mut out = Vec::new();
        while let Some(ev) = rx.recv().await {
            out.push(ev);
        }
        out
    }

    fn pool(workers: usize, queue_depth: usize, millis: u64) -> PoolConfig {
        PoolConfig {
            workers,
            queue_depth,
            report_interval: Duration::from_millis(millis),
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn every_item_processed_and_failures_reported() {
        let (tx, rx) = mpsc::channel(1024);
        let sink = ProgressSink::new(tx);
        let job = Numbers::new(50);

        let report = run_phase(Arc::clone(&job), PhaseRange::new(10, 30), pool(4, 3, 2), &sink).await;
        drop(sink);

        assert_eq!(report, PhaseReport { total: 50, completed: 50, failed: 5 });
        assert_eq!(job.seen.load(Ordering::Relaxed), 50);

        let events = drain(rx).await;
        assert_eq!(events.first().unwrap().progress, 10);
        let last = events.last().unwrap();
        assert_eq!((last.status, last.progress), (EventStatus::Processing, 30));
        assert_eq!(events.iter().filter(|e| e.status == EventStatus::Error).count(), 5);
        assert!(events.windows(2).all(|w| w[0].progress <= w[1].progress));
    }

    #[tokio::test]
    async fn empty_phase_jumps_to_high() {
        let (tx, rx) = mpsc::channel(16);
        let sink = ProgressSink::new(tx);
        run_phase(Numbers::new(0), PhaseRange::new(61, 80), pool(2, 1, 50), &sink).await;
        drop(sink);
        let progress: Vec<u8> = drain(rx).await.iter().map(|e| e.progress).collect();
        assert_eq!(progress.first(), Some(&61));
        assert_eq!(progress.last(), Some(&80));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn panicking_item_is_a_failure_not_a_hang() {
        let (tx, rx) = mpsc::channel(1024);
        let sink = ProgressSink::new(tx);
        let job = Arc::new(Numbers {
            count: 20,
            seen: AtomicU64::new(0),
            panic_on: Some(7),
        });

        let phase = run_phase(Arc::clone(&job), PhaseRange::new(21, 60), pool(1, 1, 5), &sink);
        let report = tokio::time::timeout(Duration::from_secs(10), phase)
            .await
            .expect("phase finished");
        drop(sink);

        // items 3 and 13 fail normally, item 7 panics
        assert_eq!(report, PhaseReport { total: 20, completed: 20, failed: 3 });
        assert_eq!(job.seen.load(Ordering::Relaxed), 20);
        let events = drain(rx).await;
        assert!(events.iter().any(|e| e.status == EventStatus::Error && e.result.starts_with("numbers #7")));
        assert_eq!(events.last().unwrap().progress, 60);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn dropped_receiver_does_not_stop_the_phase() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let sink = ProgressSink::new(tx);
        let job = Numbers::new(30);

        let report = run_phase(Arc::clone(&job), PhaseRange::new(1, 20), pool(3, 2, 1), &sink).await;

        assert_eq!(report, PhaseReport { total: 30, completed: 30, failed: 3 });
        assert!(sink.is_closed());
    }
}
