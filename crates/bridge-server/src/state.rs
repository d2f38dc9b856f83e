//! Process-wide shared state.
//!
//! `BridgeState` owns every map the server mutates at runtime: client
//! snapshots, command queues, delivery stats, the venue account
//! registry, and per-account reconciler state. One coarse
//! `parking_lot::Mutex` serializes all of it, so a logical operation
//! that touches several maps (snapshot update, registry merge, poll
//! diff) is never observed half-applied. Critical sections only do
//! in-memory work; network calls happen outside the lock, and every
//! read hands the caller an owned copy.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;

use bridge_common::ActionCode;
use bridge_venue::{VenueAccount, VenuePosition};

use crate::commands::Command;

/// Per-client delivery counters. `replies` only ever grows.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DeliveryStats {
    pub replies: u64,
    pub last_action: ActionCode,
}

/// Display-only classification of a venue account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountLabel {
    Practice,
    Funded,
}

impl std::fmt::Display for AccountLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AccountLabel::Practice => write!(f, "practice"),
            AccountLabel::Funded => write!(f, "funded"),
        }
    }
}

/// A venue account as tracked in the registry.
#[derive(Debug, Clone, Serialize)]
pub struct AccountInfo {
    pub id: i64,
    pub name: String,
    pub label: AccountLabel,
}

impl AccountInfo {
    fn classify(account: &VenueAccount) -> AccountLabel {
        if account.simulated || account.name.starts_with("PRAC") {
            AccountLabel::Practice
        } else {
            AccountLabel::Funded
        }
    }

    fn from_venue(account: &VenueAccount) -> Self {
        Self {
            id: account.id,
            name: account.name.clone(),
            label: Self::classify(account),
        }
    }
}

/// A closure inferred by the reconciler: the position id was present
/// in the previous poll and absent in the current one.
#[derive(Debug, Clone, Serialize)]
pub struct ClosedPosition {
    pub id: i64,
    pub account_id: i64,
    pub closed_at: DateTime<Utc>,
}

/// Per-account reconciler bookkeeping.
#[derive(Debug, Default)]
struct ReconEntry {
    known_ids: HashSet<i64>,
    last_poll: Option<Instant>,
    poll_in_flight: bool,
    closed_history: Vec<ClosedPosition>,
}

#[derive(Default)]
struct StateInner {
    open: HashMap<String, Vec<Value>>,
    closed_online: HashMap<String, Vec<Value>>,
    last_seen: HashMap<String, Instant>,
    commands: HashMap<String, Vec<Command>>,
    stats: HashMap<String, DeliveryStats>,
    registry: BTreeMap<i64, AccountInfo>,
    directory_cache: Vec<AccountInfo>,
    directory_fetched_at: Option<Instant>,
    recon: HashMap<i64, ReconEntry>,
}

/// The shared state container. Cloned by `Arc`, never by value.
#[derive(Default)]
pub struct BridgeState {
    inner: Mutex<StateInner>,
}

impl BridgeState {
    pub fn new() -> Self {
        Self::default()
    }

    // ------------------------------------------------------------------
    // Client snapshots
    // ------------------------------------------------------------------

    /// Replace both position lists for `key` and stamp last-seen.
    /// Missing lists are treated as empty.
    pub fn record_snapshot(
        &self,
        key: &str,
        open: Option<Vec<Value>>,
        closed_online: Option<Vec<Value>>,
    ) {
        let mut inner = self.inner.lock();
        inner
            .open
            .insert(key.to_string(), open.unwrap_or_default());
        inner
            .closed_online
            .insert(key.to_string(), closed_online.unwrap_or_default());
        inner.last_seen.insert(key.to_string(), Instant::now());
    }

    /// Copy of the open-position snapshot; empty for unknown keys.
    pub fn client_open(&self, key: &str) -> Vec<Value> {
        self.inner.lock().open.get(key).cloned().unwrap_or_default()
    }

    /// Copy of the closed-online snapshot; empty for unknown keys.
    pub fn client_closed_online(&self, key: &str) -> Vec<Value> {
        self.inner
            .lock()
            .closed_online
            .get(key)
            .cloned()
            .unwrap_or_default()
    }

    /// Sorted union of every key ever seen, including discovered venue
    /// account ids.
    pub fn list_keys(&self) -> Vec<String> {
        let inner = self.inner.lock();
        let mut keys: BTreeSet<String> = BTreeSet::new();
        keys.extend(inner.open.keys().cloned());
        keys.extend(inner.closed_online.keys().cloned());
        keys.extend(inner.registry.keys().map(|id| id.to_string()));
        keys.into_iter().collect()
    }

    /// True iff a snapshot was recorded for `key` within `timeout`.
    pub fn is_online(&self, key: &str, timeout: Duration) -> bool {
        let inner = self.inner.lock();
        match inner.last_seen.get(key) {
            Some(seen) => seen.elapsed() <= timeout,
            None => false,
        }
    }

    // ------------------------------------------------------------------
    // Delivery stats
    // ------------------------------------------------------------------

    /// Count one command delivery for `key` and record the delivered
    /// action. Returns the updated counters.
    pub fn record_delivery(&self, key: &str, action: ActionCode) -> DeliveryStats {
        let mut inner = self.inner.lock();
        let stats = inner.stats.entry(key.to_string()).or_default();
        stats.replies += 1;
        stats.last_action = action;
        stats.clone()
    }

    pub fn client_stats(&self, key: &str) -> DeliveryStats {
        self.inner
            .lock()
            .stats
            .get(key)
            .cloned()
            .unwrap_or_default()
    }

    // ------------------------------------------------------------------
    // Account registry / directory cache
    // ------------------------------------------------------------------

    /// Age of the cached directory response, if one was ever attempted.
    pub fn directory_age(&self) -> Option<Duration> {
        self.inner
            .lock()
            .directory_fetched_at
            .map(|at| at.elapsed())
    }

    /// Merge a fresh directory response: union new ids into the
    /// registry (known ids keep their original entry), replace the
    /// cached response, and stamp the fetch time. Returns the number
    /// of newly seen accounts.
    pub fn merge_accounts(&self, accounts: &[VenueAccount]) -> usize {
        let mut inner = self.inner.lock();
        let mut added = 0;
        for account in accounts {
            inner.registry.entry(account.id).or_insert_with(|| {
                added += 1;
                AccountInfo::from_venue(account)
            });
        }
        inner.directory_cache = accounts.iter().map(AccountInfo::from_venue).collect();
        inner.directory_fetched_at = Some(Instant::now());
        added
    }

    /// Stamp the fetch time without changing cache or registry. Used
    /// after a failed lookup so the backoff window still applies.
    pub fn touch_directory(&self) {
        self.inner.lock().directory_fetched_at = Some(Instant::now());
    }

    /// The last successful directory response (possibly empty).
    pub fn cached_directory(&self) -> Vec<AccountInfo> {
        self.inner.lock().directory_cache.clone()
    }

    /// Every account ever discovered, ordered by id.
    pub fn known_accounts(&self) -> Vec<AccountInfo> {
        self.inner.lock().registry.values().cloned().collect()
    }

    // ------------------------------------------------------------------
    // Reconciler state
    // ------------------------------------------------------------------

    /// Reserve a poll slot for `account_id`: true iff the throttle
    /// window has elapsed and no other poll is in flight. Check and
    /// reservation happen in one critical section, so two concurrent
    /// callers cannot both pass. A successful reservation must be
    /// released with [`end_poll`](Self::end_poll) once the venue call
    /// resolves, whatever its outcome.
    pub fn begin_poll(&self, account_id: i64, refresh: Duration) -> bool {
        let mut inner = self.inner.lock();
        let entry = inner.recon.entry(account_id).or_default();
        if entry.poll_in_flight {
            return false;
        }
        if let Some(last) = entry.last_poll
            && last.elapsed() < refresh
        {
            return false;
        }
        entry.poll_in_flight = true;
        true
    }

    /// Release the in-flight reservation taken by `begin_poll`. The
    /// throttle timestamp is only advanced by `apply_poll`, so a
    /// failed poll stays immediately retryable.
    pub fn end_poll(&self, account_id: i64) {
        let mut inner = self.inner.lock();
        if let Some(entry) = inner.recon.get_mut(&account_id) {
            entry.poll_in_flight = false;
        }
    }

    /// Apply one successful open-position poll: diff ids against the
    /// previous poll, append inferred closures, replace this account's
    /// open snapshot, and stamp the poll time. Returns the newly
    /// inferred closures.
    pub fn apply_poll(&self, account_id: i64, positions: &[VenuePosition]) -> Vec<ClosedPosition> {
        let now = Utc::now();
        let current_ids: HashSet<i64> = positions.iter().map(|p| p.id).collect();

        let mut inner = self.inner.lock();

        let snapshot: Vec<Value> = positions
            .iter()
            .filter_map(|p| serde_json::to_value(p).ok())
            .collect();
        let key = account_id.to_string();
        inner.open.insert(key.clone(), snapshot);
        inner.last_seen.insert(key, Instant::now());

        let entry = inner.recon.entry(account_id).or_default();
        let mut closed = Vec::new();
        for id in entry.known_ids.difference(&current_ids) {
            closed.push(ClosedPosition {
                id: *id,
                account_id,
                closed_at: now,
            });
        }
        entry.closed_history.extend(closed.iter().cloned());
        entry.known_ids = current_ids;
        entry.last_poll = Some(Instant::now());
        closed
    }

    /// Copy of the inferred-closure history for an account.
    pub fn closed_history(&self, account_id: i64) -> Vec<ClosedPosition> {
        self.inner
            .lock()
            .recon
            .get(&account_id)
            .map(|r| r.closed_history.clone())
            .unwrap_or_default()
    }

    // ------------------------------------------------------------------
    // Command queue storage (operations live in commands.rs)
    // ------------------------------------------------------------------

    pub(crate) fn with_commands<T>(
        &self,
        key: &str,
        f: impl FnOnce(&mut Vec<Command>) -> T,
    ) -> T {
        let mut inner = self.inner.lock();
        f(inner.commands.entry(key.to_string()).or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    fn position(id: i64) -> VenuePosition {
        VenuePosition {
            id,
            account_id: 11357588,
            contract_id: "CON.F.US.GCE.Z25".to_string(),
            creation_timestamp: None,
            position_type: 0,
            size: 1,
            average_price: None,
        }
    }

    fn account(id: i64, name: &str, simulated: bool) -> VenueAccount {
        VenueAccount {
            id,
            name: name.to_string(),
            balance: None,
            can_trade: true,
            is_visible: true,
            simulated,
        }
    }

    #[test]
    fn unknown_key_reads_are_empty_not_errors() {
        let state = BridgeState::new();
        assert!(state.client_open("nobody").is_empty());
        assert!(state.client_closed_online("nobody").is_empty());
        assert!(!state.is_online("nobody", Duration::from_secs(60)));
        assert_eq!(state.client_stats("nobody"), DeliveryStats::default());
    }

    #[test]
    fn snapshot_replacement_is_wholesale() {
        let state = BridgeState::new();
        state.record_snapshot(
            "A1",
            Some(vec![json!({"ticket": 1}), json!({"ticket": 2})]),
            Some(vec![json!({"ticket": 9})]),
        );
        assert_eq!(state.client_open("A1").len(), 2);
        assert_eq!(state.client_closed_online("A1").len(), 1);

        state.record_snapshot("A1", Some(vec![json!({"ticket": 3})]), None);
        assert_eq!(state.client_open("A1"), vec![json!({"ticket": 3})]);
        assert!(state.client_closed_online("A1").is_empty());
    }

    #[test]
    fn reads_return_independent_copies() {
        let state = BridgeState::new();
        state.record_snapshot("A1", Some(vec![json!({"ticket": 1})]), None);

        let mut copy = state.client_open("A1");
        copy.push(json!({"ticket": 2}));
        assert_eq!(state.client_open("A1").len(), 1);
    }

    #[test]
    fn is_online_after_snapshot() {
        let state = BridgeState::new();
        state.record_snapshot("A1", None, None);
        assert!(state.is_online("A1", Duration::from_secs(60)));
        assert!(!state.is_online("A1", Duration::ZERO));
    }

    #[test]
    fn list_keys_unions_snapshots_and_registry() {
        let state = BridgeState::new();
        state.record_snapshot("zeta", None, None);
        state.record_snapshot("alpha", None, None);
        state.merge_accounts(&[account(42, "PRACV2-1", true)]);
        assert_eq!(state.list_keys(), vec!["42", "alpha", "zeta"]);
    }

    #[test]
    fn delivery_stats_increment_and_track_last_action() {
        let state = BridgeState::new();
        let first = state.record_delivery("A1", ActionCode::NoOp);
        assert_eq!(first.replies, 1);
        let second = state.record_delivery("A1", ActionCode::OpenLong);
        assert_eq!(second.replies, 2);
        assert_eq!(second.last_action, ActionCode::OpenLong);
        assert_eq!(state.client_stats("A1").replies, 2);
    }

    #[test]
    fn registry_merge_is_set_union() {
        let state = BridgeState::new();
        assert_eq!(state.merge_accounts(&[account(1, "PRAC-1", true)]), 1);
        assert_eq!(
            state.merge_accounts(&[account(1, "PRAC-1", true), account(2, "EXPRESS-2", false)]),
            1
        );
        let known = state.known_accounts();
        assert_eq!(known.len(), 2);
        assert_eq!(known[0].label, AccountLabel::Practice);
        assert_eq!(known[1].label, AccountLabel::Funded);
    }

    #[test]
    fn directory_cache_survives_touch() {
        let state = BridgeState::new();
        assert!(state.directory_age().is_none());
        state.merge_accounts(&[account(1, "PRAC-1", true)]);
        assert_eq!(state.cached_directory().len(), 1);

        state.touch_directory();
        assert_eq!(state.cached_directory().len(), 1);
        assert!(state.directory_age().unwrap() < Duration::from_secs(5));
    }

    #[test]
    fn poll_diff_records_each_disappearance_once() {
        let state = BridgeState::new();

        let closed = state.apply_poll(7, &[position(1), position(2), position(3)]);
        assert!(closed.is_empty());

        let closed = state.apply_poll(7, &[position(2), position(3), position(4)]);
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].id, 1);

        // id 1 must not be reported again
        let closed = state.apply_poll(7, &[position(2), position(3), position(4)]);
        assert!(closed.is_empty());

        let history = state.closed_history(7);
        assert_eq!(history.len(), 1);
        assert_eq!(state.client_open("7").len(), 3);
    }

    #[test]
    fn throttle_window_gates_polls() {
        let state = BridgeState::new();
        assert!(state.begin_poll(7, Duration::from_secs(60)));
        state.apply_poll(7, &[position(1)]);
        state.end_poll(7);
        assert!(!state.begin_poll(7, Duration::from_secs(60)));
        assert!(state.begin_poll(7, Duration::ZERO));
        state.end_poll(7);
    }

    #[test]
    fn in_flight_reservation_blocks_a_second_poll() {
        let state = BridgeState::new();
        assert!(state.begin_poll(7, Duration::ZERO));
        // A second caller inside the same window must not pass even
        // with a zero refresh interval.
        assert!(!state.begin_poll(7, Duration::ZERO));

        state.end_poll(7);
        assert!(state.begin_poll(7, Duration::ZERO));
        state.end_poll(7);
    }

    #[test]
    fn failed_poll_releases_without_arming_the_window() {
        let state = BridgeState::new();
        assert!(state.begin_poll(7, Duration::from_secs(60)));
        // Venue call failed: released with no apply_poll.
        state.end_poll(7);
        assert!(state.begin_poll(7, Duration::from_secs(60)));
        state.end_poll(7);
    }

    #[test]
    fn concurrent_snapshot_and_stats_updates() {
        let state = Arc::new(BridgeState::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let state = Arc::clone(&state);
                std::thread::spawn(move || {
                    for j in 0..100 {
                        let key = format!("client-{i}");
                        state.record_snapshot(&key, Some(vec![json!({"n": j})]), None);
                        state.record_delivery(&key, ActionCode::NoOp);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(state.client_stats("client-0").replies, 100);
        assert_eq!(state.list_keys().len(), 8);
    }
}
