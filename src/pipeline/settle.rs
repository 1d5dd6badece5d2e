//! Settling detection: when has asynchronous rendering finished?
//!
//! Markdown renderers in extensible hosts hand every block to third-party
//! post-processors that run on their own schedule. There is no global
//! "done" event, so completion is inferred from activity:
//!
//! ```text
//!  block A  ├──────┤
//!  block B        ├────┤
//!                      │◄──── delay ────►│ settled
//!  poll    ·   ·   ·   ·   ·   ·   ·   ·   ·
//! ```
//!
//! The heuristic assumes the gap between two consecutive post-processed
//! blocks is always shorter than `delay`. When the renderer can say for sure
//! that it is done ([`RenderTarget::mark_complete`]) the signal wins and the
//! debounce window is not used.

use crate::config::SettlingConfig;
use crate::host::RenderTarget;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;
use tracing::{debug, warn};

/// Activity snapshot for one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SettlingState {
    pub is_processing: bool,
    /// `None` until the first reset: nothing was ever started.
    pub last_activity_at: Option<Instant>,
}

#[derive(Debug, Default)]
struct Activity {
    in_flight: usize,
    last_activity_at: Option<Instant>,
}

/// Per-run block activity, shared with the renderer's post-processors.
///
/// Overlapping blocks are counted, so `is_processing` stays true until the
/// last of them has finished.
#[derive(Debug, Clone, Default)]
pub struct ActivityTracker {
    inner: Arc<Mutex<Activity>>,
}

impl ActivityTracker {
    /// A tracker in the "never started" state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a run: not processing, last activity now.
    pub fn reset(&self) {
        let mut a = self.lock();
        a.in_flight = 0;
        a.last_activity_at = Some(Instant::now());
    }

    pub fn on_block_processing_started(&self) {
        self.lock().in_flight += 1;
    }

    pub fn on_block_processing_finished(&self) {
        let mut a = self.lock();
        a.in_flight = a.in_flight.saturating_sub(1);
        a.last_activity_at = Some(Instant::now());
    }

    pub fn state(&self) -> SettlingState {
        let a = self.lock();
        SettlingState {
            is_processing: a.in_flight > 0,
            last_activity_at: a.last_activity_at,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Activity> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// How a settling wait ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SettleOutcome {
    /// Nothing was ever started; returned immediately.
    #[default]
    Idle,
    /// No activity for the configured delay.
    Settled,
    /// The renderer signalled completion.
    Signalled,
    /// `max_wait` elapsed first.
    TimedOut,
}

/// Polls an [`ActivityTracker`] until rendering is quiet.
#[derive(Debug, Clone)]
pub struct SettlingDetector {
    config: SettlingConfig,
}

impl SettlingDetector {
    pub fn new(config: SettlingConfig) -> Self {
        Self { config }
    }

    /// True when `state` has been quiet for at least the configured delay.
    pub fn is_settled(&self, state: &SettlingState, now: Instant) -> bool {
        match state.last_activity_at {
            None => true,
            Some(at) => !state.is_processing && now.duration_since(at) >= self.config.delay(),
        }
    }

    /// Wait until the tracker has been quiet for the configured delay.
    pub async fn until_settled(&self, tracker: &ActivityTracker) -> SettleOutcome {
        if tracker.state().last_activity_at.is_none() {
            return SettleOutcome::Idle;
        }
        self.poll(|| self.is_settled(&tracker.state(), Instant::now()), SettleOutcome::Settled)
            .await
    }

    /// Wait for `target`, using its completion signal when it has one.
    pub async fn until_target_settled(
        &self,
        tracker: &ActivityTracker,
        target: &RenderTarget,
    ) -> SettleOutcome {
        if target.has_completion_signal() {
            return self
                .poll(|| target.is_complete(), SettleOutcome::Signalled)
                .await;
        }
        self.until_settled(tracker).await
    }

    async fn poll(&self, mut done: impl FnMut() -> bool, outcome: SettleOutcome) -> SettleOutcome {
        let started = Instant::now();
        let interval = self.config.poll_interval();
        loop {
            if done() {
                debug!(
                    "Rendering settled ({:?}) after {}ms",
                    outcome,
                    started.elapsed().as_millis()
                );
                return outcome;
            }
            if let Some(max) = self.config.max_wait() {
                if started.elapsed() >= max {
                    warn!(
                        "Rendering still active after {}ms; continuing with a possibly incomplete document",
                        max.as_millis()
                    );
                    return SettleOutcome::TimedOut;
                }
            }
            tokio::time::sleep(interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn detector(delay_ms: u64) -> SettlingDetector {
        SettlingDetector::new(SettlingConfig {
            delay_ms,
            poll_interval_ms: 5,
            max_wait_ms: None,
        })
    }

    #[test]
    fn new_tracker_is_never_started() {
        let t = ActivityTracker::new();
        assert_eq!(t.state().last_activity_at, None);
        assert!(!t.state().is_processing);
    }

    #[test]
    fn overlapping_blocks_keep_processing_true() {
        let t = ActivityTracker::new();
        t.reset();
        t.on_block_processing_started();
        t.on_block_processing_started();
        t.on_block_processing_finished();
        assert!(t.state().is_processing);
        t.on_block_processing_finished();
        assert!(!t.state().is_processing);
    }

    #[test]
    fn is_settled_requires_quiet_window() {
        let d = detector(100);
        let now = Instant::now();
        let recent = SettlingState {
            is_processing: false,
            last_activity_at: Some(now),
        };
        assert!(!d.is_settled(&recent, now + Duration::from_millis(50)));
        assert!(d.is_settled(&recent, now + Duration::from_millis(100)));

        let busy = SettlingState {
            is_processing: true,
            last_activity_at: Some(now),
        };
        assert!(!d.is_settled(&busy, now + Duration::from_secs(10)));
    }

    #[tokio::test]
    async fn never_started_returns_immediately() {
        let d = detector(10_000);
        let started = Instant::now();
        let outcome = d.until_settled(&ActivityTracker::new()).await;
        assert_eq!(outcome, SettleOutcome::Idle);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn waits_at_least_delay_after_last_activity() {
        let d = detector(60);
        let t = ActivityTracker::new();
        t.reset();
        t.on_block_processing_started();

        let worker = t.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            worker.on_block_processing_finished();
        });

        let started = Instant::now();
        let outcome = d.until_settled(&t).await;
        assert_eq!(outcome, SettleOutcome::Settled);
        // 30ms of work + 60ms of silence.
        assert!(started.elapsed() >= Duration::from_millis(90));
        let last = t.state().last_activity_at.unwrap();
        assert!(Instant::now().duration_since(last) >= Duration::from_millis(60));
    }

    #[tokio::test]
    async fn completion_signal_skips_debounce() {
        let d = detector(10_000);
        let t = ActivityTracker::new();
        t.reset();
        let target = RenderTarget::new();
        target.expect_completion_signal();

        let signal = target.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            signal.mark_complete();
        });

        let started = Instant::now();
        let outcome = d.until_target_settled(&t, &target).await;
        assert_eq!(outcome, SettleOutcome::Signalled);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn max_wait_gives_up() {
        let d = SettlingDetector::new(SettlingConfig {
            delay_ms: 10,
            poll_interval_ms: 5,
            max_wait_ms: Some(40),
        });
        let t = ActivityTracker::new();
        t.reset();
        t.on_block_processing_started();
        assert_eq!(d.until_settled(&t).await, SettleOutcome::TimedOut);
    }
}
