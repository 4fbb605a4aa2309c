//! OAuth2 client-credentials token acquisition.
//!
//! The exporter trades its long-lived client id/secret for a short-lived bearer
//! token with a single POST. Any failure here is fatal to the run.

use std::fmt;
use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, instrument};
use url::Url;

use crate::config::Credentials;

/// Errors raised while obtaining an access token.
#[derive(Debug, Error)]
pub enum AuthError {
    /// The token endpoint could not be reached.
    #[error("network error requesting access token from {url}: {source}")]
    Network {
        /// Token endpoint URL.
        url: String,
        /// Underlying network error.
        #[source]
        source: reqwest::Error,
    },

    /// The token endpoint answered with a non-2xx status.
    #[error("token endpoint {url} rejected the credentials (HTTP {status})")]
    Rejected {
        /// Token endpoint URL.
        url: String,
        /// HTTP status code.
        status: u16,
    },

    /// The token response was not the expected JSON.
    #[error("malformed token response from {url}: {source}")]
    Malformed {
        /// Token endpoint URL.
        url: String,
        /// Underlying decode error.
        #[source]
        source: reqwest::Error,
    },

    /// The token response carried an empty token.
    #[error("token endpoint {url} returned an empty access token")]
    EmptyToken {
        /// Token endpoint URL.
        url: String,
    },

    /// The API kept answering 401 even with a freshly issued token.
    #[error("API rejected a freshly issued access token at {url}")]
    TokenRejected {
        /// API URL that answered 401.
        url: String,
    },
}

/// Opaque bearer token with an optional expiry.
#[derive(Clone)]
pub struct AccessToken {
    value: String,
    lifetime: Option<Duration>,
    expires_at: Option<Instant>,
}

impl AccessToken {
    /// Wraps a token string. `expires_in` of `None` means the token never expires.
    pub fn new(value: impl Into<String>, expires_in: Option<Duration>) -> Self {
        Self {
            value: value.into(),
            lifetime: expires_in,
            expires_at: expires_in.map(|ttl| Instant::now() + ttl),
        }
    }

    /// Returns the raw token for the `Authorization` header.
    #[must_use]
    pub fn secret(&self) -> &str {
        &self.value
    }

    /// Returns true if the token expires within `margin` from now.
    #[must_use]
    pub fn expires_within(&self, margin: Duration) -> bool {
        self.expires_at
            .is_some_and(|expires_at| Instant::now() + margin >= expires_at)
    }

    /// Caps `margin` at half the token's lifetime, so a token issued for less
    /// than the margin is still used for a while before renewal.
    #[must_use]
    pub fn renewal_margin(&self, margin: Duration) -> Duration {
        self.lifetime.map_or(margin, |ttl| margin.min(ttl / 2))
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("value", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

#[derive(Serialize)]
struct TokenRequest<'a> {
    grant_type: &'static str,
    client_id: &'a str,
    client_secret: &'a str,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

/// Exchanges client credentials for an [`AccessToken`].
#[derive(Debug, Clone)]
pub struct TokenProvider {
    http: Client,
    token_url: Url,
}

impl TokenProvider {
    /// Creates a provider that posts to `token_url` using `http`.
    #[must_use]
    pub fn new(http: Client, token_url: Url) -> Self {
        Self { http, token_url }
    }

    /// Performs the client-credentials grant.
    ///
    /// One outbound call, no retry, no caching.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError`] on any network error, non-2xx response, or bad body.
    #[instrument(skip_all, fields(token_url = %self.token_url))]
    pub async fn acquire_token(&self, credentials: &Credentials) -> Result<AccessToken, AuthError> {
        info!("requesting access token");
        let url = self.token_url.as_str();

        let response = self
            .http
            .post(self.token_url.clone())
            .json(&TokenRequest {
                grant_type: "client_credentials",
                client_id: credentials.client_id(),
                client_secret: credentials.client_secret(),
            })
            .send()
            .await
            .map_err(|source| AuthError::Network {
                url: url.to_string(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(AuthError::Rejected {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let body: TokenResponse = response.json().await.map_err(|source| AuthError::Malformed {
            url: url.to_string(),
            source,
        })?;
        if body.access_token.trim().is_empty() {
            return Err(AuthError::EmptyToken {
                url: url.to_string(),
            });
        }

        debug!(expires_in = ?body.expires_in, "access token received");
        Ok(AccessToken::new(
            body.access_token,
            body.expires_in.map(Duration::from_secs),
        ))
    }
}
