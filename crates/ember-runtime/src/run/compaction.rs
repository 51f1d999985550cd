//! Compaction bookkeeping and the cross-call wait signal.
//!
//! A run may go through any number of context-compaction passes, each of
//! which may ask for a retry. External callers that need to know when all of
//! that work has finished take a [`CompactionWait`] and await it; the
//! coordinator resolves the underlying one-shot exactly once per settlement
//! and never blocks on it itself.

use std::future::IntoFuture;

use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use metrics::counter;
use tokio::sync::oneshot;
use tracing::debug;

/// How a compaction wait ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompactionOutcome {
    /// Nothing was pending when the wait was requested.
    Idle,
    /// Compaction finished without a pending retry.
    Completed,
    /// One or more retries occurred and the run has ended.
    RetriesSettled {
        /// Retries resolved by this settlement.
        retries: u32,
    },
    /// The run was dropped before compaction settled.
    Abandoned,
}

/// Coordinator state, as seen from outside.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompactionPhase {
    /// No compaction has started since the last settlement.
    Idle,
    /// A compaction pass is running.
    InFlight,
    /// A pass ended asking for a retry; settlement is deferred to run end.
    RetryNoted,
    /// The last wait was resolved and nothing is pending.
    Settled,
}

/// Shared one-shot receiver behind a pending [`CompactionWait`].
pub type WaitFuture = Shared<oneshot::Receiver<CompactionOutcome>>;

struct PendingWait {
    tx: oneshot::Sender<CompactionOutcome>,
    rx: WaitFuture,
}

impl PendingWait {
    fn new() -> Self {
        let (tx, rx) = oneshot::channel();
        Self { tx, rx: rx.shared() }
    }
}

/// Tracks in-flight compaction, pending retries, and the wait signal.
#[derive(Default)]
pub struct CompactionCoordinator {
    in_flight: bool,
    pending_retry: u32,
    wait: Option<PendingWait>,
    last_outcome: Option<CompactionOutcome>,
    retries_total: u32,
}

impl CompactionCoordinator {
    /// Idle coordinator with no wait signal.
    pub fn new() -> Self {
        Self::default()
    }

    /// A compaction pass started.
    pub fn begin(&mut self) {
        self.in_flight = true;
        if self.wait.is_none() {
            self.wait = Some(PendingWait::new());
        }
    }

    /// A compaction pass ended.
    ///
    /// Without a retry the current wait resolves immediately. Retries noted
    /// earlier stay counted until [`settle`](Self::settle).
    pub fn end(&mut self, will_retry: bool) {
        self.in_flight = false;
        if will_retry {
            self.pending_retry += 1;
            self.retries_total += 1;
            counter!("ember_compaction_retries_total").increment(1);
        } else {
            let _ = self.resolve(CompactionOutcome::Completed);
        }
    }

    /// Resolve everything outstanding. Called once, at run end.
    ///
    /// Returns the outcome delivered to waiters, if a wait existed.
    pub fn settle(&mut self) -> Option<CompactionOutcome> {
        if self.in_flight {
            debug!("run ended with compaction still in flight");
            self.in_flight = false;
        }
        if self.pending_retry > 0 {
            let retries = std::mem::take(&mut self.pending_retry);
            self.resolve(CompactionOutcome::RetriesSettled { retries })
        } else {
            self.resolve(CompactionOutcome::Completed)
        }
    }

    fn resolve(&mut self, outcome: CompactionOutcome) -> Option<CompactionOutcome> {
        let Some(pending) = self.wait.take() else {
            debug!(?outcome, "no compaction wait to resolve");
            return None;
        };
        // Every waiter may have gone away; that is not an error.
        let _ = pending.tx.send(outcome);
        self.last_outcome = Some(outcome);
        Some(outcome)
    }

    /// Handle for awaiting settlement.
    ///
    /// Every handle taken while a wait is pending observes the same
    /// resolution. With nothing pending the handle is ready with
    /// [`CompactionOutcome::Idle`].
    pub fn wait_handle(&self) -> CompactionWait {
        match &self.wait {
            Some(pending) => CompactionWait::Pending(pending.rx.clone()),
            None => CompactionWait::Ready(CompactionOutcome::Idle),
        }
    }

    /// Current phase.
    pub fn phase(&self) -> CompactionPhase {
        if self.in_flight {
            CompactionPhase::InFlight
        } else if self.pending_retry > 0 {
            CompactionPhase::RetryNoted
        } else if self.last_outcome.is_some() && self.wait.is_none() {
            CompactionPhase::Settled
        } else {
            CompactionPhase::Idle
        }
    }

    /// Whether a compaction pass is running.
    pub fn in_flight(&self) -> bool {
        self.in_flight
    }

    /// Retries noted and not yet settled.
    pub fn pending_retry(&self) -> u32 {
        self.pending_retry
    }

    /// Retries noted over the whole run.
    pub fn retries_total(&self) -> u32 {
        self.retries_total
    }

    /// Whether a wait signal exists and is unresolved.
    pub fn has_pending_wait(&self) -> bool {
        self.wait.is_some()
    }

    /// Outcome of the most recent resolution.
    pub fn last_outcome(&self) -> Option<CompactionOutcome> {
        self.last_outcome
    }
}

impl std::fmt::Debug for CompactionCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompactionCoordinator")
            .field("in_flight", &self.in_flight)
            .field("pending_retry", &self.pending_retry)
            .field("has_pending_wait", &self.wait.is_some())
            .field("last_outcome", &self.last_outcome)
            .finish()
    }
}

/// Cloneable handle that resolves when compaction settles.
///
/// Awaiting it never blocks the run. If the run is dropped before settling,
/// it resolves to [`CompactionOutcome::Abandoned`].
#[derive(Clone)]
pub enum CompactionWait {
    /// Already resolved.
    Ready(CompactionOutcome),
    /// Shared one-shot owned by the coordinator.
    Pending(WaitFuture),
}

impl CompactionWait {
    /// Wait for settlement.
    pub async fn settled(self) -> CompactionOutcome {
        match self {
            Self::Ready(outcome) => outcome,
            Self::Pending(rx) => rx.await.unwrap_or(CompactionOutcome::Abandoned),
        }
    }

    /// Resolved outcome, without waiting.
    pub fn try_outcome(&self) -> Option<CompactionOutcome> {
        match self {
            Self::Ready(outcome) => Some(*outcome),
            Self::Pending(rx) => rx
                .clone()
                .now_or_never()
                .map(|res| res.unwrap_or(CompactionOutcome::Abandoned)),
        }
    }

    /// Whether the wait has resolved.
    pub fn is_settled(&self) -> bool {
        self.try_outcome().is_some()
    }
}

impl IntoFuture for CompactionWait {
    type Output = CompactionOutcome;
    type IntoFuture = BoxFuture<'static, CompactionOutcome>;

    fn into_future(self) -> Self::IntoFuture {
        self.settled().boxed()
    }
}

impl std::fmt::Debug for CompactionWait {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ready(outcome) => f.debug_tuple("Ready").field(outcome).finish(),
            Self::Pending(_) => f.write_str("Pending"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn fresh_coordinator_is_idle() {
        let c = CompactionCoordinator::new();
        assert_eq!(c.phase(), CompactionPhase::Idle);
        assert!(!c.in_flight());
        assert_eq!(c.wait_handle().try_outcome(), Some(CompactionOutcome::Idle));
    }

    #[test]
    fn begin_creates_one_shared_wait() {
        let mut c = CompactionCoordinator::new();
        c.begin();
        let first = c.wait_handle();
        c.begin();
        let second = c.wait_handle();

        assert_eq!(c.phase(), CompactionPhase::InFlight);
        assert!(!first.is_settled());
        c.end(false);
        assert_eq!(first.try_outcome(), Some(CompactionOutcome::Completed));
        assert_eq!(second.try_outcome(), Some(CompactionOutcome::Completed));
    }

    #[tokio::test]
    async fn end_without_retry_resolves_immediately() {
        let mut c = CompactionCoordinator::new();
        c.begin();
        let wait = c.wait_handle();
        c.end(false);

        assert_eq!(wait.await, CompactionOutcome::Completed);
        assert_eq!(c.phase(), CompactionPhase::Settled);
        assert!(!c.has_pending_wait());
    }

    #[tokio::test]
    async fn retries_settle_once_at_run_end() {
        let mut c = CompactionCoordinator::new();
        c.begin();
        let wait = c.wait_handle();
        c.end(true);
        c.begin();
        c.end(true);

        assert_eq!(c.phase(), CompactionPhase::RetryNoted);
        assert_eq!(c.pending_retry(), 2);
        assert!(!wait.is_settled());

        let outcome = c.settle();
        assert_eq!(outcome, Some(CompactionOutcome::RetriesSettled { retries: 2 }));
        assert_eq!(c.pending_retry(), 0);
        assert_eq!(c.retries_total(), 2);
        assert_eq!(wait.await, CompactionOutcome::RetriesSettled { retries: 2 });
    }

    #[test]
    fn clean_end_after_retry_resolves_and_settle_drains_counter() {
        let mut c = CompactionCoordinator::new();
        c.begin();
        let wait = c.wait_handle();
        c.end(true);
        c.begin();
        c.end(false);

        assert_eq!(wait.try_outcome(), Some(CompactionOutcome::Completed));
        assert_eq!(c.phase(), CompactionPhase::RetryNoted);
        assert_matches!(c.settle(), None);
        assert_eq!(c.pending_retry(), 0);
        assert_eq!(c.phase(), CompactionPhase::Settled);
    }

    #[test]
    fn second_resolution_is_noop() {
        let mut c = CompactionCoordinator::new();
        c.begin();
        let wait = c.wait_handle();
        c.end(false);
        assert_eq!(c.settle(), None);
        assert_eq!(wait.try_outcome(), Some(CompactionOutcome::Completed));
    }

    #[test]
    fn settle_without_compaction_creates_nothing() {
        let mut c = CompactionCoordinator::new();
        assert_eq!(c.settle(), None);
        assert!(!c.has_pending_wait());
        assert_eq!(c.phase(), CompactionPhase::Idle);
    }

    #[test]
    fn new_compaction_after_settlement_gets_fresh_wait() {
        let mut c = CompactionCoordinator::new();
        c.begin();
        let old = c.wait_handle();
        c.end(false);
        c.begin();
        let new = c.wait_handle();

        assert!(old.is_settled());
        assert!(!new.is_settled());
    }

    #[test]
    fn settle_clears_stuck_in_flight() {
        let mut c = CompactionCoordinator::new();
        c.begin();
        let wait = c.wait_handle();
        assert_eq!(c.settle(), Some(CompactionOutcome::Completed));
        assert!(!c.in_flight());
        assert!(wait.is_settled());
    }

    #[tokio::test]
    async fn dropped_coordinator_abandons_waiters() {
        let mut c = CompactionCoordinator::new();
        c.begin();
        let wait = c.wait_handle();
        drop(c);
        assert_eq!(wait.settled().await, CompactionOutcome::Abandoned);
    }
}
