//! Authenticated, rate-limited client for the help-desk REST API.
//!
//! [`ApiClient`] is the only place that performs HTTP. Every outbound call,
//! including token acquisition, listing pages, and attachment downloads, runs
//! inside [`RateLimiter::schedule`], so the whole process shares one gate.
//!
//! Each call is attempted under a [`RetryPolicy`]: transient failures (timeouts,
//! connection errors, 429, 5xx) are retried as fresh scheduled calls with
//! exponential backoff; a 401 triggers one token renewal. What happens after
//! retries are exhausted is up to the caller.
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//! use std::sync::Arc;
//! use helpdesk_export::{ApiClient, Credentials, ExportConfig, RateLimiter};
//! use helpdesk_export::api::models::ConversationPage;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let base = url::Url::parse("https://api.helpscout.net/v2")?;
//! let config = ExportConfig::new(Some(Credentials::new("id", "secret")), base, Path::new("."));
//! let limiter = Arc::new(RateLimiter::new(config.rate_limit));
//! let client = ApiClient::new(&config, config.require_credentials()?.clone(), limiter)?;
//! client.authenticate().await?;
//! let page: ConversationPage = client.get_json(&client.endpoint(&["conversations"])).await?;
//! println!("{} pages", page.page.total_pages);
//! # Ok(())
//! # }
//! ```

mod auth;
mod error;
pub mod models;
pub mod retry;

use std::ffi::OsString;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::Client;
use reqwest::header::RETRY_AFTER;
use serde::de::DeserializeOwned;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};
use url::Url;

pub use auth::{AccessToken, AuthError, TokenProvider};
pub use error::ApiError;
pub use retry::{FailureType, RetryDecision, RetryPolicy, classify_error};

use crate::config::{Credentials, ExportConfig};
use crate::rate_limiter::{RateLimiter, parse_retry_after};
use crate::user_agent;

/// Client for the help-desk API.
///
/// Create once per run and share by reference.
#[derive(Debug)]
pub struct ApiClient {
    http: Client,
    base_url: Url,
    credentials: Credentials,
    tokens: TokenProvider,
    /// Current token; `None` before [`authenticate`](Self::authenticate) or after a 401.
    token: Mutex<Option<AccessToken>>,
    refresh_margin: Duration,
    limiter: Arc<RateLimiter>,
    retry: RetryPolicy,
}

impl ApiClient {
    /// Creates a client from the resolved config.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::ClientBuild`] if the HTTP client cannot be built.
    pub fn new(
        config: &ExportConfig,
        credentials: Credentials,
        limiter: Arc<RateLimiter>,
    ) -> Result<Self, ApiError> {
        let http = build_http_client(config.connect_timeout, config.read_timeout)
            .map_err(ApiError::ClientBuild)?;
        let tokens = TokenProvider::new(http.clone(), config.token_url.clone());
        Ok(Self {
            http,
            base_url: config.api_base_url.clone(),
            credentials,
            tokens,
            token: Mutex::new(None),
            refresh_margin: config.token_refresh_margin,
            limiter,
            retry: RetryPolicy::with_max_retries(config.max_retries),
        })
    }

    /// Replaces the retry policy.
    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Returns the shared rate limiter.
    #[must_use]
    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// Builds `<base>/<segments...>`, percent-encoding each segment.
    #[must_use]
    pub fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    /// Obtains the initial access token.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError`]; callers treat it as fatal.
    pub async fn authenticate(&self) -> Result<(), AuthError> {
        self.bearer().await.map(|_| ())
    }

    /// Returns a usable bearer token, acquiring or renewing it as needed.
    async fn bearer(&self) -> Result<String, AuthError> {
        let mut current = self.token.lock().await;
        if let Some(token) = current.as_ref()
            && !token.expires_within(token.renewal_margin(self.refresh_margin))
        {
            return Ok(token.secret().to_string());
        }
        if current.is_some() {
            info!("access token about to expire, renewing");
        }

        let fresh = self
            .limiter
            .schedule(|| self.tokens.acquire_token(&self.credentials))
            .await?;
        let secret = fresh.secret().to_string();
        *current = Some(fresh);
        Ok(secret)
    }

    async fn invalidate_token(&self) {
        *self.token.lock().await = None;
    }

    /// GETs `url` and decodes the JSON body.
    ///
    /// # Errors
    ///
    /// Returns the last [`ApiError`] once retries are exhausted.
    #[instrument(skip_all, fields(url = %url))]
    pub async fn get_json<T: DeserializeOwned>(&self, url: &Url) -> Result<T, ApiError> {
        self.execute(url, |bearer| async move {
            let response = self.send_get(url, &bearer).await?;
            response
                .json::<T>()
                .await
                .map_err(|e| ApiError::decode(url.as_str(), e))
        })
        .await
    }

    /// Streams the body of `url` into `dest`, returning the byte count.
    ///
    /// The body is written to `<dest>.part` and renamed on success, so `dest`
    /// is either complete or absent. Parent directories are created as needed.
    ///
    /// # Errors
    ///
    /// Returns the last [`ApiError`] once retries are exhausted.
    #[instrument(skip_all, fields(url = %url, dest = %dest.display()))]
    pub async fn download_to(&self, url: &Url, dest: &Path) -> Result<u64, ApiError> {
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ApiError::io(parent, e))?;
        }
        self.execute(url, |bearer| async move {
            let response = self.send_get(url, &bearer).await?;
            stream_to_file(response, url, dest).await
        })
        .await
    }

    /// Runs `op` through the limiter under the retry policy.
    async fn execute<T, F, Fut>(&self, url: &Url, op: F) -> Result<T, ApiError>
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        let op = &op;
        let mut attempt: u32 = 1;
        let mut renewed = false;

        loop {
            let bearer = self.bearer().await?;
            let error = match self.limiter.schedule(move || op(bearer)).await {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };

            if let ApiError::HttpStatus {
                status: 429,
                retry_after: Some(raw),
                ..
            } = &error
                && let Some(delay) = parse_retry_after(raw)
            {
                self.limiter.record_rate_limit(delay);
            }

            let failure = classify_error(&error);
            if failure == FailureType::NeedsAuth {
                if renewed {
                    return Err(AuthError::TokenRejected {
                        url: url.to_string(),
                    }
                    .into());
                }
                warn!(url = %url, "access token rejected, renewing");
                renewed = true;
                self.invalidate_token().await;
                continue;
            }

            match self.retry.should_retry(failure, attempt) {
                RetryDecision::Retry {
                    delay,
                    attempt: next,
                } => {
                    warn!(
                        url = %url,
                        error = %error,
                        attempt = next,
                        delay_ms = delay.as_millis(),
                        "retrying API call"
                    );
                    tokio::time::sleep(delay).await;
                    attempt = next;
                }
                RetryDecision::DoNotRetry { reason } => {
                    debug!(url = %url, reason, "giving up on API call");
                    return Err(error);
                }
            }
        }
    }

    async fn send_get(&self, url: &Url, bearer: &str) -> Result<reqwest::Response, ApiError> {
        let response = self
            .http
            .get(url.clone())
            .bearer_auth(bearer)
            .send()
            .await
            .map_err(|e| ApiError::from_reqwest(url.as_str(), e))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .map(ToString::to_string);
            return Err(ApiError::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
                retry_after,
            });
        }

        Ok(response)
    }
}

fn build_http_client(connect_timeout: Duration, read_timeout: Duration) -> Result<Client, reqwest::Error> {
    Client::builder()
        .connect_timeout(connect_timeout)
        .timeout(read_timeout)
        .gzip(true)
        .user_agent(user_agent::default_user_agent())
        .build()
}

fn partial_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().map(OsString::from).unwrap_or_default();
    name.push(".part");
    dest.with_file_name(name)
}

/// Streams to `<dest>.part`, then renames into place. The partial file is
/// removed on any failure.
async fn stream_to_file(
    response: reqwest::Response,
    url: &Url,
    dest: &Path,
) -> Result<u64, ApiError> {
    let partial = partial_path(dest);
    let outcome = match write_body(response, url, &partial).await {
        Ok(bytes) => tokio::fs::rename(&partial, dest)
            .await
            .map(|()| bytes)
            .map_err(|e| ApiError::io(dest, e)),
        Err(error) => Err(error),
    };

    if outcome.is_err() {
        debug!(path = %partial.display(), "cleaning up partial file after error");
        let _ = tokio::fs::remove_file(&partial).await;
    }
    outcome
}

async fn write_body(response: reqwest::Response, url: &Url, path: &Path) -> Result<u64, ApiError> {
    let file = File::create(path)
        .await
        .map_err(|e| ApiError::io(path, e))?;
    let mut writer = BufWriter::new(file);
    let mut stream = response.bytes_stream();
    let mut bytes_written: u64 = 0;

    while let Some(chunk_result) = stream.next().await {
        let chunk = chunk_result.map_err(|e| ApiError::from_reqwest(url.as_str(), e))?;
        writer
            .write_all(&chunk)
            .await
            .map_err(|e| ApiError::io(path, e))?;
        bytes_written += chunk.len() as u64;
    }

    writer.flush().await.map_err(|e| ApiError::io(path, e))?;
    Ok(bytes_written)
}
