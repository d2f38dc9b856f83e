//! HTTP client for the external trading venue.
//!
//! The venue exposes a JSON-over-POST API: key-based login returning a
//! bearer token, account search, open-position search, order
//! placement, and full/partial position close. Every response carries
//! a `{success, errorCode, errorMessage}` envelope.
//!
//! Discovery and reconciliation consume the [`VenueApi`] trait rather
//! than the concrete client so they can be tested without a network.

pub mod auth;
pub mod client;
pub mod types;

pub use auth::Authenticator;
pub use client::{VenueApi, VenueClient, VenueClientConfig, VenueError};
pub use types::{
    BracketLeg, OrderPlaceRequest, OrderPlaceResponse, VenueAccount, VenuePosition, VenueResponse,
};
