//! Command-coordination server for terminal trading clients.
//!
//! Terminals push position snapshots and poll for commands over HTTP;
//! a background reconciler compares venue-side open positions against
//! the last known set to infer closures.

pub mod commands;
pub mod config;
pub mod discovery;
pub mod http;
pub mod inject;
pub mod reconciler;
pub mod state;

pub use commands::{AckOutcome, Command, CommandMessage, CommandStatus, Directive};
pub use config::BridgeConfig;
pub use discovery::{AccountDiscovery, DiscoveryConfig};
pub use http::{AppContext, router, run_server};
pub use inject::{InjectionPolicy, NoInjection, ScriptStep, ScriptedSequence};
pub use reconciler::{PositionReconciler, ReconcilerSupervisor};
pub use state::{AccountInfo, AccountLabel, BridgeState, ClosedPosition, DeliveryStats};
