//! Delivery-count command injection.
//!
//! The transport layer reports every command delivery; a policy may
//! respond by enqueueing a follow-up command for that client. The
//! scripted sequence ("on the 20th poll, open a long") is product
//! configuration, not engine behavior, so it lives behind this trait
//! and is loaded from the config file.

use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::debug;

use bridge_common::ActionCode;

use crate::state::DeliveryStats;

/// Decides whether a delivery should trigger a scripted command.
pub trait InjectionPolicy: Send + Sync {
    /// Called with the updated counters after each delivery. A `Some`
    /// return is enqueued for the client before the response goes out.
    fn on_delivery(
        &self,
        client: &str,
        stats: &DeliveryStats,
    ) -> Option<(ActionCode, Map<String, Value>)>;
}

/// Policy that never injects.
pub struct NoInjection;

impl InjectionPolicy for NoInjection {
    fn on_delivery(
        &self,
        _client: &str,
        _stats: &DeliveryStats,
    ) -> Option<(ActionCode, Map<String, Value>)> {
        None
    }
}

/// One configured trigger: at exactly `at_reply` deliveries, enqueue
/// `action` with `payload`.
#[derive(Debug, Clone, Deserialize)]
pub struct ScriptStep {
    pub at_reply: u64,
    pub action: ActionCode,
    #[serde(default)]
    pub payload: Map<String, Value>,
}

/// Reply-count-triggered script. Each step fires at most once per
/// client because the reply counter is strictly increasing and steps
/// match on exact equality.
pub struct ScriptedSequence {
    steps: Vec<ScriptStep>,
}

impl ScriptedSequence {
    pub fn new(steps: Vec<ScriptStep>) -> Self {
        Self { steps }
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

impl InjectionPolicy for ScriptedSequence {
    fn on_delivery(
        &self,
        client: &str,
        stats: &DeliveryStats,
    ) -> Option<(ActionCode, Map<String, Value>)> {
        let step = self.steps.iter().find(|s| s.at_reply == stats.replies)?;
        debug!(
            client,
            reply = stats.replies,
            action = %step.action,
            "script step matched"
        );
        Some((step.action, step.payload.clone()))
    }
}
