//! Venue account discovery.
//!
//! Wraps the directory lookup with a max-age cache and folds newly
//! seen account ids into the registry. A failed lookup degrades to
//! the previous cached response and still advances the cache
//! timestamp, so one broken call cannot turn into a hammering loop.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use bridge_venue::VenueApi;

use crate::state::{AccountInfo, BridgeState};

/// Settings for [`AccountDiscovery`].
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// Serve the cached directory while it is younger than this.
    pub max_age: Duration,
    /// Restrict the directory call to active accounts.
    pub only_active: bool,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            max_age: Duration::from_secs(300),
            only_active: false,
        }
    }
}

/// Cached account directory backed by the venue API.
pub struct AccountDiscovery {
    state: Arc<BridgeState>,
    venue: Arc<dyn VenueApi>,
    config: DiscoveryConfig,
}

impl AccountDiscovery {
    pub fn new(state: Arc<BridgeState>, venue: Arc<dyn VenueApi>, config: DiscoveryConfig) -> Self {
        Self {
            state,
            venue,
            config,
        }
    }

    /// The current directory: cached if fresh enough, otherwise
    /// re-fetched. Never fails; a lookup error returns whatever was
    /// cached before (possibly nothing).
    pub async fn refresh(&self) -> Vec<AccountInfo> {
        if let Some(age) = self.state.directory_age()
            && age < self.config.max_age
        {
            debug!(age_secs = age.as_secs(), "directory cache hit");
            return self.state.cached_directory();
        }

        match self.venue.search_accounts(self.config.only_active).await {
            Ok(accounts) => {
                let added = self.state.merge_accounts(&accounts);
                if added > 0 {
                    info!(total = accounts.len(), added, "account directory refreshed");
                } else {
                    debug!(total = accounts.len(), "account directory refreshed");
                }
                self.state.cached_directory()
            }
            Err(e) => {
                warn!(error = %e, "account directory lookup failed, serving cached result");
                // Failed lookups still arm the backoff window.
                self.state.touch_directory();
                self.state.cached_directory()
            }
        }
    }

    /// Every account ever discovered, ordered by id.
    pub fn known_accounts(&self) -> Vec<AccountInfo> {
        self.state.known_accounts()
    }
}
