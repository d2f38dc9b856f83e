//! Position reconciliation against the venue.
//!
//! The venue emits no close events, so closures are inferred: a
//! position id that was present in the previous open-position poll
//! and absent in the current one is recorded as closed exactly once.
//! One background worker runs per discovered account; each polls on
//! its own cadence and a per-account throttle bounds venue traffic to
//! at most one call per refresh window.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use bridge_venue::VenueApi;

use crate::state::BridgeState;

/// Upper bound on one idle sleep slice, so a stop signal is observed
/// within this latency regardless of the poll interval.
const STOP_CHECK_SLICE: Duration = Duration::from_millis(500);

/// Per-account open-position poller.
pub struct PositionReconciler {
    state: Arc<BridgeState>,
    venue: Arc<dyn VenueApi>,
    /// Minimum interval between venue calls for one account.
    refresh: Duration,
}

impl PositionReconciler {
    pub fn new(state: Arc<BridgeState>, venue: Arc<dyn VenueApi>, refresh: Duration) -> Self {
        Self {
            state,
            venue,
            refresh,
        }
    }

    /// One poll cycle for `account_id`. Returns whether a venue call
    /// was made (the throttle may skip the cycle entirely).
    ///
    /// Failures are absorbed: the previous snapshot stays in place and
    /// the next cycle retries.
    pub async fn poll_once(&self, account_id: i64, force: bool) -> bool {
        if !force && !self.state.begin_poll(account_id, self.refresh) {
            debug!(account_id, "poll throttled");
            return false;
        }

        match self.venue.search_open_positions(account_id).await {
            Ok(positions) => {
                let closed = self.state.apply_poll(account_id, &positions);
                for c in &closed {
                    info!(
                        account_id,
                        position_id = c.id,
                        "position closed on venue (inferred from poll diff)"
                    );
                }
                debug!(account_id, open = positions.len(), "poll applied");
            }
            Err(e) => {
                warn!(account_id, error = %e, "open-position poll failed, keeping previous snapshot");
            }
        }
        if !force {
            self.state.end_poll(account_id);
        }
        true
    }

    /// Open-position count for one account, optionally forcing a
    /// fresh poll past the throttle.
    pub async fn open_count(&self, account_id: i64, force_refresh: bool) -> usize {
        if force_refresh {
            self.poll_once(account_id, true).await;
        }
        self.state.client_open(&account_id.to_string()).len()
    }

    /// Open-position counts for every known account, keyed by account
    /// id string.
    pub async fn all_open_counts(&self, force_refresh: bool) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for account in self.state.known_accounts() {
            let count = self.open_count(account.id, force_refresh).await;
            counts.insert(account.id.to_string(), count);
        }
        counts
    }
}

struct Worker {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

/// Owns one polling worker per account.
pub struct ReconcilerSupervisor {
    reconciler: Arc<PositionReconciler>,
    workers: Mutex<HashMap<i64, Worker>>,
}

impl ReconcilerSupervisor {
    pub fn new(reconciler: Arc<PositionReconciler>) -> Self {
        Self {
            reconciler,
            workers: Mutex::new(HashMap::new()),
        }
    }

    /// Start a worker for `account_id` unless one is already running.
    /// Returns true if a new worker was started.
    pub fn ensure_running(&self, account_id: i64, interval: Duration) -> bool {
        let mut workers = self.workers.lock();
        // A worker that was told to stop may still be draining its
        // current sleep slice; treat it as gone so stop-then-restart
        // does not leave the account unpolled for a slice.
        if let Some(worker) = workers.get(&account_id)
            && !worker.handle.is_finished()
            && !worker.stop.load(Ordering::Acquire)
        {
            return false;
        }

        let stop = Arc::new(AtomicBool::new(false));
        let handle = tokio::spawn(run_worker(
            Arc::clone(&self.reconciler),
            account_id,
            interval,
            Arc::clone(&stop),
        ));
        workers.insert(account_id, Worker { stop, handle });
        info!(account_id, interval_secs = interval.as_secs(), "reconciler worker started");
        true
    }

    /// Signal one worker to exit after its current sleep slice.
    pub fn stop(&self, account_id: i64) {
        if let Some(worker) = self.workers.lock().get(&account_id) {
            worker.stop.store(true, Ordering::Release);
        }
    }

    /// Signal every worker to exit. Does not wait for them.
    pub fn stop_all(&self) {
        let workers = self.workers.lock();
        for (account_id, worker) in workers.iter() {
            debug!(account_id, "stopping reconciler worker");
            worker.stop.store(true, Ordering::Release);
        }
    }

    /// Number of workers that have not yet exited.
    pub fn active_workers(&self) -> usize {
        self.workers
            .lock()
            .values()
            .filter(|w| !w.handle.is_finished())
            .count()
    }
}

async fn run_worker(
    reconciler: Arc<PositionReconciler>,
    account_id: i64,
    interval: Duration,
    stop: Arc<AtomicBool>,
) {
    'poll: while !stop.load(Ordering::Acquire) {
        reconciler.poll_once(account_id, false).await;

        // Sleep in bounded slices so the stop flag is observed with
        // sub-second latency even for long intervals.
        let mut remaining = interval;
        loop {
            if stop.load(Ordering::Acquire) {
                break 'poll;
            }
            if remaining.is_zero() {
                break;
            }
            let slice = remaining.min(STOP_CHECK_SLICE);
            tokio::time::sleep(slice).await;
            remaining -= slice;
        }
    }
    info!(account_id, "reconciler worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    use bridge_venue::{VenueAccount, VenueError, VenuePosition};

    /// Mock venue whose open-position responses are swapped by tests.
    struct SwappableVenue {
        calls: AtomicUsize,
        positions: Mutex<Result<Vec<i64>, ()>>,
    }

    impl SwappableVenue {
        fn with_ids(ids: &[i64]) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                positions: Mutex::new(Ok(ids.to_vec())),
            }
        }

        fn set_ids(&self, ids: &[i64]) {
            *self.positions.lock() = Ok(ids.to_vec());
        }

        fn set_failing(&self) {
            *self.positions.lock() = Err(());
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    fn position(id: i64) -> VenuePosition {
        VenuePosition {
            id,
            account_id: 7,
            contract_id: "CON.F.US.GCE.Z25".to_string(),
            creation_timestamp: None,
            position_type: 0,
            size: 1,
            average_price: None,
        }
    }

    #[async_trait]
    impl VenueApi for SwappableVenue {
        async fn search_accounts(
            &self,
            _only_active: bool,
        ) -> Result<Vec<VenueAccount>, VenueError> {
            Ok(Vec::new())
        }

        async fn search_open_positions(
            &self,
            _account_id: i64,
        ) -> Result<Vec<VenuePosition>, VenueError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &*self.positions.lock() {
                Ok(ids) => Ok(ids.iter().copied().map(position).collect()),
                Err(()) => Err(VenueError::Status {
                    status: 500,
                    body: "boom".to_string(),
                }),
            }
        }
    }

    fn reconciler(
        venue: Arc<SwappableVenue>,
        refresh: Duration,
    ) -> (Arc<BridgeState>, PositionReconciler) {
        let state = Arc::new(BridgeState::new());
        let recon = PositionReconciler::new(Arc::clone(&state), venue, refresh);
        (state, recon)
    }

    #[tokio::test]
    async fn disappearing_id_is_closed_exactly_once() {
        let venue = Arc::new(SwappableVenue::with_ids(&[1, 2, 3]));
        let (state, recon) = reconciler(Arc::clone(&venue), Duration::ZERO);

        recon.poll_once(7, false).await;
        venue.set_ids(&[2, 3, 4]);
        recon.poll_once(7, false).await;

        let history = state.closed_history(7);
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].id, 1);
        assert_eq!(history[0].account_id, 7);

        // The snapshot is the new poll's list.
        let open = state.client_open("7");
        assert_eq!(open.len(), 3);

        recon.poll_once(7, false).await;
        assert_eq!(state.closed_history(7).len(), 1);
    }

    #[tokio::test]
    async fn throttle_allows_one_call_per_window() {
        let venue = Arc::new(SwappableVenue::with_ids(&[1]));
        let (_state, recon) = reconciler(Arc::clone(&venue), Duration::from_secs(60));

        assert!(recon.poll_once(7, false).await);
        assert!(!recon.poll_once(7, false).await);
        assert_eq!(venue.calls(), 1);

        // Independent accounts have independent windows.
        assert!(recon.poll_once(8, false).await);
        assert_eq!(venue.calls(), 2);
    }

    #[tokio::test]
    async fn failure_keeps_previous_snapshot() {
        let venue = Arc::new(SwappableVenue::with_ids(&[1, 2]));
        let (state, recon) = reconciler(Arc::clone(&venue), Duration::ZERO);

        recon.poll_once(7, false).await;
        assert_eq!(state.client_open("7").len(), 2);

        venue.set_failing();
        recon.poll_once(7, false).await;
        assert_eq!(state.client_open("7").len(), 2);
        assert!(state.closed_history(7).is_empty());

        // Recovery resumes diffing from the last good snapshot.
        venue.set_ids(&[2]);
        recon.poll_once(7, false).await;
        assert_eq!(state.closed_history(7).len(), 1);
    }

    #[tokio::test]
    async fn open_count_can_bypass_throttle() {
        let venue = Arc::new(SwappableVenue::with_ids(&[1, 2]));
        let (_state, recon) = reconciler(Arc::clone(&venue), Duration::from_secs(60));

        assert_eq!(recon.open_count(7, true).await, 2);
        venue.set_ids(&[1]);
        // Throttled read serves the stored snapshot.
        assert_eq!(recon.open_count(7, false).await, 2);
        // A forced read polls again.
        assert_eq!(recon.open_count(7, true).await, 1);
    }

    #[tokio::test]
    async fn all_open_counts_covers_known_accounts() {
        let venue = Arc::new(SwappableVenue::with_ids(&[1]));
        let (state, recon) = reconciler(Arc::clone(&venue), Duration::ZERO);
        state.merge_accounts(&[
            VenueAccount {
                id: 7,
                name: "PRAC-7".to_string(),
                balance: None,
                can_trade: true,
                is_visible: true,
                simulated: true,
            },
            VenueAccount {
                id: 8,
                name: "PRAC-8".to_string(),
                balance: None,
                can_trade: true,
                is_visible: true,
                simulated: true,
            },
        ]);

        let counts = recon.all_open_counts(true).await;
        assert_eq!(counts.len(), 2);
        assert_eq!(counts["7"], 1);
        assert_eq!(counts["8"], 1);
    }

    #[tokio::test]
    async fn ensure_running_is_idempotent() {
        let venue = Arc::new(SwappableVenue::with_ids(&[1]));
        let (_state, recon) = reconciler(Arc::clone(&venue), Duration::from_secs(3600));
        let supervisor = ReconcilerSupervisor::new(Arc::new(recon));

        assert!(supervisor.ensure_running(7, Duration::from_secs(10)));
        assert!(!supervisor.ensure_running(7, Duration::from_secs(10)));
        assert_eq!(supervisor.active_workers(), 1);

        // One worker, one throttled poll: exactly one venue call.
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(venue.calls(), 1);

        supervisor.stop_all();
        tokio::time::sleep(Duration::from_millis(700)).await;
        assert_eq!(supervisor.active_workers(), 0);
    }

    /// Venue that parks inside the position lookup so overlapping
    /// callers can be observed.
    struct SlowVenue {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl VenueApi for SlowVenue {
        async fn search_accounts(
            &self,
            _only_active: bool,
        ) -> Result<Vec<VenueAccount>, VenueError> {
            Ok(Vec::new())
        }

        async fn search_open_positions(
            &self,
            _account_id: i64,
        ) -> Result<Vec<VenuePosition>, VenueError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(vec![position(1)])
        }
    }

    #[tokio::test]
    async fn overlapping_polls_make_one_venue_call() {
        let venue = Arc::new(SlowVenue {
            calls: AtomicUsize::new(0),
        });
        let state = Arc::new(BridgeState::new());
        let recon = PositionReconciler::new(
            Arc::clone(&state),
            Arc::clone(&venue) as Arc<dyn VenueApi>,
            Duration::ZERO,
        );

        // Zero refresh window: only the in-flight reservation can
        // keep the second caller out.
        let (first, second) = tokio::join!(recon.poll_once(7, false), recon.poll_once(7, false));
        assert!(first);
        assert!(!second);
        assert_eq!(venue.calls.load(Ordering::SeqCst), 1);

        // The reservation is released once the call resolves.
        assert!(recon.poll_once(7, false).await);
        assert_eq!(venue.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn restart_after_stop_is_immediate() {
        let venue = Arc::new(SwappableVenue::with_ids(&[]));
        let (_state, recon) = reconciler(Arc::clone(&venue), Duration::from_secs(3600));
        let supervisor = ReconcilerSupervisor::new(Arc::new(recon));

        supervisor.ensure_running(7, Duration::from_secs(10));
        supervisor.stop(7);
        // No settling wait: the old worker may still be inside its
        // sleep slice, but a restart must not be declined.
        assert!(supervisor.ensure_running(7, Duration::from_secs(10)));
        supervisor.stop_all();
    }

    #[tokio::test]
    async fn stopped_worker_can_be_restarted() {
        let venue = Arc::new(SwappableVenue::with_ids(&[]));
        let (_state, recon) = reconciler(Arc::clone(&venue), Duration::from_secs(3600));
        let supervisor = ReconcilerSupervisor::new(Arc::new(recon));

        supervisor.ensure_running(7, Duration::from_secs(10));
        supervisor.stop(7);
        tokio::time::sleep(Duration::from_millis(700)).await;
        assert_eq!(supervisor.active_workers(), 0);

        assert!(supervisor.ensure_running(7, Duration::from_secs(10)));
        supervisor.stop_all();
    }
}
