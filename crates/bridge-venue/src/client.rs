//! Venue REST client.
//!
//! All calls are authenticated POSTs. A 401 response triggers one
//! re-login and one retry before the failure is surfaced; an envelope
//! with `success=false` maps to [`VenueError::Api`].

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{debug, warn};

use crate::auth::Authenticator;
use crate::types::{
    AccountSearchRequest, AccountSearchResponse, CloseContractRequest, OrderPlaceRequest,
    OrderPlaceResponse, PartialCloseContractRequest, PositionSearchRequest,
    PositionSearchResponse, VenueAccount, VenuePosition, VenueResponse,
};

/// Errors surfaced by venue calls.
#[derive(Debug, Error)]
pub enum VenueError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("authentication failed: code {code}, message: {message}")]
    Auth { code: i64, message: String },

    #[error("venue API error: code {code}, message: {message}")]
    Api { code: i64, message: String },
}

/// Connection settings for [`VenueClient`].
#[derive(Debug, Clone)]
pub struct VenueClientConfig {
    pub base_url: String,
    pub username: String,
    pub api_key: String,
    pub request_timeout: Duration,
}

impl VenueClientConfig {
    pub fn new(
        base_url: impl Into<String>,
        username: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            username: username.into(),
            api_key: api_key.into(),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// The directory and open-position lookups consumed by discovery and
/// reconciliation. Kept narrow so tests can substitute a mock.
#[async_trait]
pub trait VenueApi: Send + Sync {
    async fn search_accounts(&self, only_active: bool) -> Result<Vec<VenueAccount>, VenueError>;

    async fn search_open_positions(
        &self,
        account_id: i64,
    ) -> Result<Vec<VenuePosition>, VenueError>;
}

/// Authenticated client for the venue REST API.
pub struct VenueClient {
    http: Client,
    base_url: String,
    auth: Authenticator,
}

impl VenueClient {
    pub fn new(config: VenueClientConfig) -> Result<Self, VenueError> {
        let http = Client::builder().timeout(config.request_timeout).build()?;
        let auth = Authenticator::new(
            http.clone(),
            config.base_url.clone(),
            config.username,
            config.api_key,
        );
        Ok(Self {
            http,
            base_url: config.base_url,
            auth,
        })
    }

    /// Authenticated POST with refresh-and-retry-once on 401.
    async fn authed_post<B, R>(&self, path: &str, body: &B) -> Result<R, VenueError>
    where
        B: Serialize + Sync,
        R: DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, path);
        let token = self.auth.token().await?;

        debug!(url = %url, "venue request");
        let mut response = self
            .http
            .post(&url)
            .bearer_auth(&token)
            .json(body)
            .send()
            .await?;

        if response.status() == StatusCode::UNAUTHORIZED {
            warn!(url = %url, "venue returned 401, refreshing token");
            let token = self.auth.refresh().await?;
            response = self
                .http
                .post(&url)
                .bearer_auth(&token)
                .json(body)
                .send()
                .await?;
        }

        let status = response.status();
        if !status.is_success() {
            return Err(VenueError::Status {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }

        Ok(response.json().await?)
    }

    /// Place an order (market/limit/stop, optionally with brackets).
    pub async fn place_order(
        &self,
        request: &OrderPlaceRequest,
    ) -> Result<OrderPlaceResponse, VenueError> {
        let resp: OrderPlaceResponse = self.authed_post("/api/Order/place", request).await?;
        if !resp.success {
            return Err(VenueError::Api {
                code: resp.error_code,
                message: resp.error_message.clone().unwrap_or_default(),
            });
        }
        Ok(resp)
    }

    /// Close the full position on a contract.
    pub async fn close_contract(
        &self,
        account_id: i64,
        contract_id: &str,
    ) -> Result<(), VenueError> {
        let body = CloseContractRequest {
            account_id,
            contract_id: contract_id.to_string(),
        };
        let resp: VenueResponse = self
            .authed_post("/api/Position/closeContract", &body)
            .await?;
        envelope_ok(resp)
    }

    /// Close `size` contracts of a position.
    pub async fn partial_close_contract(
        &self,
        account_id: i64,
        contract_id: &str,
        size: i64,
    ) -> Result<(), VenueError> {
        let body = PartialCloseContractRequest {
            account_id,
            contract_id: contract_id.to_string(),
            size,
        };
        let resp: VenueResponse = self
            .authed_post("/api/Position/partialCloseContract", &body)
            .await?;
        envelope_ok(resp)
    }
}

fn envelope_ok(resp: VenueResponse) -> Result<(), VenueError> {
    if resp.success {
        Ok(())
    } else {
        Err(VenueError::Api {
            code: resp.error_code,
            message: resp.error_message.unwrap_or_default(),
        })
    }
}

#[async_trait]
impl VenueApi for VenueClient {
    async fn search_accounts(&self, only_active: bool) -> Result<Vec<VenueAccount>, VenueError> {
        let body = AccountSearchRequest {
            only_active_accounts: only_active,
        };
        let resp: AccountSearchResponse = self.authed_post("/api/Account/search", &body).await?;
        if !resp.success {
            return Err(VenueError::Api {
                code: resp.error_code,
                message: resp.error_message.unwrap_or_default(),
            });
        }
        Ok(resp.accounts)
    }

    async fn search_open_positions(
        &self,
        account_id: i64,
    ) -> Result<Vec<VenuePosition>, VenueError> {
        let body = PositionSearchRequest { account_id };
        let resp: PositionSearchResponse =
            self.authed_post("/api/Position/searchOpen", &body).await?;
        if !resp.success {
            return Err(VenueError::Api {
                code: resp.error_code,
                message: resp.error_message.unwrap_or_default(),
            });
        }
        Ok(resp.positions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults_to_thirty_second_timeout() {
        let config = VenueClientConfig::new("https://venue.example", "user", "key");
        assert_eq!(config.request_timeout, Duration::from_secs(30));
    }

    #[test]
    fn api_error_display_includes_code_and_message() {
        let err = VenueError::Api {
            code: 5,
            message: "account not found".to_string(),
        };
        let text = err.to_string();
        assert!(text.contains("code 5"));
        assert!(text.contains("account not found"));
    }

    #[test]
    fn envelope_failure_maps_to_api_error() {
        let resp = VenueResponse {
            success: false,
            error_code: 2,
            error_message: Some("rejected".to_string()),
        };
        assert!(matches!(
            envelope_ok(resp),
            Err(VenueError::Api { code: 2, .. })
        ));
    }
}
