//! Key-based login and bearer-token caching.
//!
//! Tokens are cached for the lifetime of the process; the client
//! forces a refresh when the venue answers 401.

use parking_lot::RwLock;
use reqwest::Client;
use tracing::{debug, info};

use crate::client::VenueError;
use crate::types::{LoginRequest, LoginResponse};

/// Performs `loginKey` authentication and caches the bearer token.
pub struct Authenticator {
    http: Client,
    base_url: String,
    username: String,
    api_key: String,
    token: RwLock<Option<String>>,
}

impl Authenticator {
    pub fn new(http: Client, base_url: String, username: String, api_key: String) -> Self {
        Self {
            http,
            base_url,
            username,
            api_key,
            token: RwLock::new(None),
        }
    }

    /// Current token, logging in first if none is cached.
    pub async fn token(&self) -> Result<String, VenueError> {
        if let Some(token) = self.token.read().clone() {
            debug!("using cached venue token");
            return Ok(token);
        }
        self.refresh().await
    }

    /// Discard any cached token and log in again.
    pub async fn refresh(&self) -> Result<String, VenueError> {
        let token = self.login().await?;
        *self.token.write() = Some(token.clone());
        Ok(token)
    }

    async fn login(&self) -> Result<String, VenueError> {
        let url = format!("{}/api/Auth/loginKey", self.base_url);
        let body = LoginRequest {
            user_name: self.username.clone(),
            api_key: self.api_key.clone(),
        };

        let response = self.http.post(&url).json(&body).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(VenueError::Status {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }

        let login: LoginResponse = response.json().await?;
        if !login.success {
            return Err(VenueError::Auth {
                code: login.error_code,
                message: login.error_message.unwrap_or_default(),
            });
        }

        match login.token {
            Some(token) => {
                info!(user = %self.username, "venue login succeeded");
                Ok(token)
            }
            None => Err(VenueError::Auth {
                code: login.error_code,
                message: "login succeeded but no token returned".to_string(),
            }),
        }
    }
}
