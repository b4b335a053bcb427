//! Cancellable progress token for long-running chain walks.

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Progress of a walk: the last applied sequence and the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanProgress {
    pub sequence: u64,
    pub end_sequence: u64,
}

/// Tracks one in-flight scan or head update.
///
/// The same token type serves full rescans and routine head updates; the two
/// uses are distinguished by which orchestrator slot holds it. `abort`
/// raises the cancellation signal and waits for the holder to acknowledge
/// with [`ScanState::signal_complete`], so a caller returning from `abort`
/// knows no further blocks will be applied.
#[derive(Debug)]
pub struct ScanState {
    token: CancellationToken,
    progress: watch::Sender<ScanProgress>,
    complete: watch::Sender<bool>,
    started_at: DateTime<Utc>,
}

impl ScanState {
    pub fn new(sequence: u64, end_sequence: u64) -> Self {
        let (progress, _) = watch::channel(ScanProgress { sequence, end_sequence });
        let (complete, _) = watch::channel(false);
        Self {
            token: CancellationToken::new(),
            progress,
            complete,
            started_at: Utc::now(),
        }
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn sequence(&self) -> u64 {
        self.progress.borrow().sequence
    }

    pub fn end_sequence(&self) -> u64 {
        self.progress.borrow().end_sequence
    }

    /// Publishes progress to observers.
    pub fn signal(&self, sequence: u64) {
        self.progress.send_modify(|p| p.sequence = sequence);
    }

    /// Moves the target when the walk overtakes the sequence it was created
    /// against.
    pub fn set_end_sequence(&self, end_sequence: u64) {
        self.progress.send_modify(|p| p.end_sequence = end_sequence);
    }

    /// A receiver observers can await progress changes on.
    pub fn subscribe(&self) -> watch::Receiver<ScanProgress> {
        self.progress.subscribe()
    }

    pub fn is_aborted(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Marks the walk finished, releasing any `abort` waiters.
    pub fn signal_complete(&self) {
        self.complete.send_replace(true);
    }

    /// Waits until the holder signals completion.
    pub async fn wait(&self) {
        let mut done = self.complete.subscribe();
        while !*done.borrow_and_update() {
            if done.changed().await.is_err() {
                return;
            }
        }
    }

    /// Raises the abort signal and waits for the holder to wind down.
    pub async fn abort(&self) {
        self.token.cancel();
        self.wait().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn signal_updates_progress() {
        let state = ScanState::new(0, 100);
        state.signal(42);
        assert_eq!(state.sequence(), 42);
        assert_eq!(state.end_sequence(), 100);

        state.set_end_sequence(120);
        assert_eq!(state.end_sequence(), 120);
    }

    #[tokio::test]
    async fn abort_waits_for_completion() {
        let state = Arc::new(ScanState::new(0, 10));

        let worker = {
            let state = state.clone();
            tokio::spawn(async move {
                while !state.is_aborted() {
                    tokio::time::sleep(std::time::Duration::from_millis(1)).await;
                }
                state.signal(5);
                state.signal_complete();
            })
        };

        state.abort().await;
        assert_eq!(state.sequence(), 5);
        worker.await.unwrap();
    }

    #[tokio::test]
    async fn wait_returns_immediately_when_already_complete() {
        let state = ScanState::new(0, 10);
        state.signal_complete();
        state.wait().await;
    }
}
