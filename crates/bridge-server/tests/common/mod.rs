//! Shared fixtures for the integration tests.
#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use bridge_common::Journal;
use bridge_server::discovery::{AccountDiscovery, DiscoveryConfig};
use bridge_server::http::AppContext;
use bridge_server::inject::{InjectionPolicy, NoInjection};
use bridge_server::reconciler::PositionReconciler;
use bridge_server::state::BridgeState;
use bridge_venue::client::{VenueApi, VenueError};
use bridge_venue::types::{VenueAccount, VenuePosition};

/// In-memory venue whose accounts and positions can be swapped between
/// calls. Counts requests so tests can assert on throttling.
pub struct FakeVenue {
    accounts: Mutex<Vec<VenueAccount>>,
    positions: Mutex<Vec<VenuePosition>>,
    pub account_calls: AtomicUsize,
    pub position_calls: AtomicUsize,
}

impl FakeVenue {
    pub fn new() -> Self {
        Self {
            accounts: Mutex::new(Vec::new()),
            positions: Mutex::new(Vec::new()),
            account_calls: AtomicUsize::new(0),
            position_calls: AtomicUsize::new(0),
        }
    }

    pub fn set_accounts(&self, accounts: Vec<VenueAccount>) {
        *self.accounts.lock() = accounts;
    }

    pub fn set_positions(&self, positions: Vec<VenuePosition>) {
        *self.positions.lock() = positions;
    }
}

#[async_trait]
impl VenueApi for FakeVenue {
    async fn search_accounts(&self, _only_active: bool) -> Result<Vec<VenueAccount>, VenueError> {
        self.account_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.accounts.lock().clone())
    }

    async fn search_open_positions(
        &self,
        account_id: i64,
    ) -> Result<Vec<VenuePosition>, VenueError> {
        self.position_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .positions
            .lock()
            .iter()
            .filter(|p| p.account_id == account_id)
            .cloned()
            .collect())
    }
}

pub fn account(id: i64, name: &str, simulated: bool) -> VenueAccount {
    VenueAccount {
        id,
        name: name.to_string(),
        balance: None,
        can_trade: true,
        is_visible: true,
        simulated,
    }
}

pub fn position(id: i64, account_id: i64) -> VenuePosition {
    VenuePosition {
        id,
        account_id,
        contract_id: "CON.F.US.MGC.Z26".to_string(),
        creation_timestamp: None,
        position_type: 0,
        size: 1,
        average_price: None,
    }
}

/// Full app context over a `FakeVenue`, with the journal disabled and
/// no scripted injection.
pub fn test_context(venue: Arc<FakeVenue>) -> Arc<AppContext> {
    test_context_with_policy(venue, Arc::new(NoInjection))
}

pub fn test_context_with_policy(
    venue: Arc<FakeVenue>,
    policy: Arc<dyn InjectionPolicy>,
) -> Arc<AppContext> {
    let state = Arc::new(BridgeState::new());
    let venue: Arc<dyn VenueApi> = venue;
    let discovery = Arc::new(AccountDiscovery::new(
        Arc::clone(&state),
        Arc::clone(&venue),
        DiscoveryConfig {
            max_age: Duration::from_secs(300),
            only_active: true,
        },
    ));
    let reconciler = Arc::new(PositionReconciler::new(
        Arc::clone(&state),
        venue,
        Duration::from_secs(300),
    ));
    Arc::new(AppContext {
        state,
        journal: Journal::disabled(),
        policy,
        discovery,
        reconciler,
        online_timeout: Duration::from_secs(60),
    })
}
