//! Shared types and utilities for the bridge server workspace.
//!
//! This crate contains:
//! - Common enums (ActionCode, Side, OrderType) used on both the
//!   terminal-facing and venue-facing wire formats
//! - The append-only JSONL journal for ingested payloads

pub mod journal;
pub mod types;

pub use journal::Journal;
pub use types::{ActionCode, InvalidWireCode, OrderType, Side, now_iso};
