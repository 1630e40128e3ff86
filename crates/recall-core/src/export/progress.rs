//! Progress events for one export run.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Processing,
    Error,
}

impl EventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Processing => "processing",
            Self::Error => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub status: EventStatus,
    pub result: String,
    pub progress: u8,
}

/// Sub-range of 0..=100 owned by one phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseRange {
    pub low: u8,
    pub high: u8,
}

impl PhaseRange {
    pub const fn new(low: u8, high: u8) -> Self {
        Self { low, high }
    }

    pub fn at(&self, completed: u64, total: u64) -> u8 {
        if total == 0 {
            return self.low;
        }
        let frac = completed.min(total) as f64 / total as f64;
        let span = f64::from(self.high - self.low);
        self.low + (frac * span) as u8
    }
}

/// Sending half of the progress stream. Clones share one progress counter.
///
/// Reported progress never goes down: a lower value is raised to the last
/// one sent. Error events carry the last progress. Once the receiver is
/// gone, events are dropped and the run carries on.
#[derive(Clone)]
pub struct ProgressSink {
    tx: mpsc::Sender<ProgressEvent>,
    last: Arc<Mutex<u8>>,
    closed: Arc<AtomicBool>,
}

impl ProgressSink {
    pub fn new(tx: mpsc::Sender<ProgressEvent>) -> Self {
        Self {
            tx,
            last: Arc::new(Mutex::new(0)),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub async fn last(&self) -> u8 {
        *self.last.lock().await
    }

    /// True once an event could not be delivered.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }

    pub async fn processing(&self, result: impl Into<String>, progress: u8) {
        let mut last = self.last.lock().await;
        *last = progress.min(100).max(*last);
        self.send(ProgressEvent {
            status: EventStatus::Processing,
            result: result.into(),
            progress: *last,
        })
        .await;
    }

    pub async fn error(&self, result: impl Into<String>) {
        let last = self.last.lock().await;
        self.send(ProgressEvent {
            status: EventStatus::Error,
            result: result.into(),
            progress: *last,
        })
        .await;
    }

    // Called while holding `last` so events leave in progress order.
    async fn send(&self, event: ProgressEvent) {
        if self.tx.send(event).await.is_err() && !self.closed.swap(true, Ordering::Relaxed) {
            info!("progress receiver dropped, discarding further events");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_interpolates() {
        let r = PhaseRange::new(21, 60);
        assert_eq!(r.at(0, 10), 21);
        assert_eq!(r.at(5, 10), 40);
        assert_eq!(r.at(10, 10), 60);
        assert_eq!(r.at(12, 10), 60);
        assert_eq!(r.at(3, 0), 21);
    }

    #[tokio::test]
    async fn sink_never_goes_backwards() {
        let (tx, mut rx) = mpsc::channel(16);
        let sink = ProgressSink::new(tx);
        sink.processing("a", 30).await;
        sink.clone().processing("b", 10).await;
        sink.error("broken item").await;
        sink.processing("c", 250).await;
        assert_eq!(sink.last().await, 100);
        drop(sink);

        let mut seen = Vec::new();
        while let Some(ev) = rx.recv().await {
            seen.push((ev.status, ev.progress));
        }
        assert_eq!(
            seen,
            vec![
                (EventStatus::Processing, 30),
                (EventStatus::Processing, 30),
                (EventStatus::Error, 30),
                (EventStatus::Processing, 100),
            ]
        );
    }

    #[tokio::test]
    async fn closed_receiver_is_noticed_once_and_ignored() {
        let (tx, rx) = mpsc::channel(4);
        let sink = ProgressSink::new(tx);
        sink.processing("delivered", 5).await;
        assert!(!sink.is_closed());
        drop(rx);

        sink.processing("lost", 10).await;
        sink.error("also lost").await;
        assert!(sink.is_closed());
        assert_eq!(sink.last().await, 10);
    }

    #[test]
    fn event_json_shape() {
        let ev = ProgressEvent {
            status: EventStatus::Error,
            result: "x".into(),
            progress: 7,
        };
        let v = serde_json::to_value(&ev).unwrap();
        assert_eq!(v["status"], "error");
        assert_eq!(v["progress"], 7);
    }
}
