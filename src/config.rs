//! Export configuration.
//!
//! [`ExportConfig`] is resolved once at startup and handed by reference to every
//! component that needs it (token provider, rate limiter, file locations). Values
//! are layered, lowest priority first:
//!
//! 1. Built-in defaults (the `DEFAULT_*` constants below)
//! 2. The TOML config file ([`FileConfig`])
//! 3. Environment variables (credentials only)
//! 4. CLI overrides ([`ConfigOverrides`])
//!
//! # Example config file
//!
//! ```toml
//! client_id = "abc"
//! client_secret = "xyz"
//! output_dir = "/srv/export"
//! rate_limit_ms = 3100
//!
//! [policies]
//! discovery = "fail_fast"
//! threads = "skip_and_log"
//! ```

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use url::Url;

/// Default REST API root.
pub const DEFAULT_API_BASE_URL: &str = "https://api.helpscout.net/v2";

/// Default OAuth2 client-credentials token endpoint.
pub const DEFAULT_TOKEN_URL: &str = "https://api.helpscout.net/v2/oauth2/token";

/// Default `status` filter sent with listing requests.
pub const DEFAULT_CONVERSATION_STATUS: &str = "all";

/// Default minimum spacing between API calls (~200 calls per 10 minutes).
pub const DEFAULT_RATE_LIMIT_MS: u64 = 3100;

/// Default retries for transient failures (in addition to the first attempt).
pub const DEFAULT_MAX_RETRIES: u32 = 2;

/// Default HTTP connect timeout.
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default HTTP read timeout (attachments can be large).
pub const DEFAULT_READ_TIMEOUT_SECS: u64 = 300;

/// Tokens expiring within this window are renewed before the next call.
pub const DEFAULT_TOKEN_REFRESH_MARGIN_SECS: u64 = 60;

/// Default pending-IDs snapshot file name.
pub const DEFAULT_PENDING_IDS_FILE: &str = "conversations_ids.txt";

/// Default done-IDs log file name.
pub const DEFAULT_DONE_IDS_FILE: &str = "processed_ids.txt";

/// Default output table file name.
pub const DEFAULT_CSV_FILE: &str = "conversations.csv";

/// Default attachment storage directory name.
pub const DEFAULT_ATTACHMENTS_DIR: &str = "attachments";

/// Environment variable holding the OAuth2 client id.
pub const CLIENT_ID_ENV: &str = "HELPDESK_CLIENT_ID";

/// Environment variable holding the OAuth2 client secret.
pub const CLIENT_SECRET_ENV: &str = "HELPDESK_CLIENT_SECRET";

const MAX_RATE_LIMIT_MS: u64 = 600_000;
const MAX_RETRIES_LIMIT: u32 = 10;
const TIMEOUT_RANGE_SECS: std::ops::RangeInclusive<u64> = 1..=3600;

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("failed to read config file {path}: {source}")]
    Read {
        /// Path of the config file.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The config file is not valid TOML or contains unknown keys.
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        /// Path of the config file.
        path: PathBuf,
        /// Underlying TOML error.
        #[source]
        source: toml::de::Error,
    },

    /// A credential needed for API access was not supplied anywhere.
    #[error("missing required setting `{field}` (set it in the config file or via {env})")]
    MissingCredential {
        /// Config key name.
        field: &'static str,
        /// Environment variable that can supply it.
        env: &'static str,
    },

    /// A value is out of range or malformed.
    #[error("invalid value for `{field}`: {reason}")]
    Invalid {
        /// Config key name.
        field: &'static str,
        /// What is wrong with it.
        reason: String,
    },
}

impl ConfigError {
    fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

/// How a fetch operation reacts once its retries are exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorPolicy {
    /// Propagate the error to the caller.
    FailFast,
    /// Log a warning and degrade (absent item, empty list, omitted file).
    #[default]
    SkipAndLog,
}

/// Per-operation error policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchPolicies {
    /// Listing page fetches during discovery.
    pub discovery: ErrorPolicy,
    /// Conversation detail fetches.
    pub item: ErrorPolicy,
    /// Thread list fetches.
    pub threads: ErrorPolicy,
    /// Individual attachment downloads.
    pub attachments: ErrorPolicy,
}

impl Default for FetchPolicies {
    fn default() -> Self {
        Self {
            discovery: ErrorPolicy::FailFast,
            item: ErrorPolicy::SkipAndLog,
            threads: ErrorPolicy::SkipAndLog,
            attachments: ErrorPolicy::SkipAndLog,
        }
    }
}

/// `[policies]` table of the config file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PolicyOverrides {
    pub discovery: Option<ErrorPolicy>,
    pub item: Option<ErrorPolicy>,
    pub threads: Option<ErrorPolicy>,
    pub attachments: Option<ErrorPolicy>,
}

/// TOML-backed file configuration. Every key is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub api_base_url: Option<String>,
    pub token_url: Option<String>,
    pub conversation_status: Option<String>,
    pub rate_limit_ms: Option<u64>,
    pub max_retries: Option<u32>,
    pub connect_timeout_secs: Option<u64>,
    pub read_timeout_secs: Option<u64>,
    pub token_refresh_margin_secs: Option<u64>,
    pub output_dir: Option<PathBuf>,
    pub pending_ids_file: Option<PathBuf>,
    pub done_ids_file: Option<PathBuf>,
    pub csv_file: Option<PathBuf>,
    pub attachments_dir: Option<PathBuf>,
    pub policies: Option<PolicyOverrides>,
}

impl FileConfig {
    /// Parses config from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns the TOML error for bad syntax, wrong types, or unknown keys.
    pub fn from_toml_str(raw: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(raw)
    }

    /// Reads and parses a config file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Read`] or [`ConfigError::Parse`].
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Resolves the default config path.
///
/// Priority:
/// 1. `$XDG_CONFIG_HOME/helpdesk-export/config.toml`
/// 2. `$HOME/.config/helpdesk-export/config.toml`
#[must_use]
pub fn resolve_default_config_path() -> Option<PathBuf> {
    if let Some(xdg_config_home) = env_var_non_empty_os("XDG_CONFIG_HOME") {
        return Some(
            PathBuf::from(xdg_config_home)
                .join("helpdesk-export")
                .join("config.toml"),
        );
    }

    let home = env_var_non_empty_os("HOME")?;
    Some(
        PathBuf::from(home)
            .join(".config")
            .join("helpdesk-export")
            .join("config.toml"),
    )
}

fn env_var_non_empty_os(name: &str) -> Option<std::ffi::OsString> {
    let value = std::env::var_os(name)?;
    if value.is_empty() { None } else { Some(value) }
}

/// Values supplied on the command line; they win over everything else.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub output_dir: Option<PathBuf>,
    pub rate_limit_ms: Option<u64>,
    pub max_retries: Option<u32>,
}

/// OAuth2 client credentials.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    client_id: String,
    client_secret: String,
}

impl Credentials {
    /// Creates credentials from an id and secret.
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        }
    }

    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    #[must_use]
    pub fn client_secret(&self) -> &str {
        &self.client_secret
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .finish()
    }
}

/// Resolved locations of every on-disk artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportPaths {
    /// Pending-IDs snapshot written by discovery.
    pub pending_ids: PathBuf,
    /// Append-only done-IDs log.
    pub done_ids: PathBuf,
    /// Output table.
    pub csv: PathBuf,
    /// Root of the attachment tree.
    pub attachments_dir: PathBuf,
}

impl ExportPaths {
    /// Builds the default layout under `output_dir`.
    #[must_use]
    pub fn under(output_dir: &Path) -> Self {
        Self {
            pending_ids: join_output(output_dir, Path::new(DEFAULT_PENDING_IDS_FILE)),
            done_ids: join_output(output_dir, Path::new(DEFAULT_DONE_IDS_FILE)),
            csv: join_output(output_dir, Path::new(DEFAULT_CSV_FILE)),
            attachments_dir: join_output(output_dir, Path::new(DEFAULT_ATTACHMENTS_DIR)),
        }
    }
}

/// Fully resolved and validated export configuration.
#[derive(Debug, Clone)]
pub struct ExportConfig {
    /// `None` only when no command needing the API was requested.
    pub credentials: Option<Credentials>,
    pub api_base_url: Url,
    pub token_url: Url,
    pub conversation_status: String,
    /// Minimum spacing between call starts. Zero disables spacing.
    pub rate_limit: Duration,
    pub max_retries: u32,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub token_refresh_margin: Duration,
    pub paths: ExportPaths,
    pub policies: FetchPolicies,
}

impl ExportConfig {
    /// Creates a config with built-in defaults, the given credentials and API
    /// root, and every artifact stored under `output_dir`.
    #[must_use]
    pub fn new(credentials: Option<Credentials>, api_base_url: Url, output_dir: &Path) -> Self {
        let token_url = default_url(DEFAULT_TOKEN_URL);
        Self {
            credentials,
            api_base_url,
            token_url,
            conversation_status: DEFAULT_CONVERSATION_STATUS.to_string(),
            rate_limit: Duration::from_millis(DEFAULT_RATE_LIMIT_MS),
            max_retries: DEFAULT_MAX_RETRIES,
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            read_timeout: Duration::from_secs(DEFAULT_READ_TIMEOUT_SECS),
            token_refresh_margin: Duration::from_secs(DEFAULT_TOKEN_REFRESH_MARGIN_SECS),
            paths: ExportPaths::under(output_dir),
            policies: FetchPolicies::default(),
        }
    }

    /// Layers defaults, file config, environment, and CLI overrides.
    ///
    /// `env` looks up environment variables; pass `|name| std::env::var(name).ok()`
    /// in production. Credentials are optional here; commands that talk to the API
    /// call [`require_credentials`](Self::require_credentials).
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for malformed URLs or out-of-range values.
    pub fn resolve(
        file: Option<&FileConfig>,
        overrides: &ConfigOverrides,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let empty = FileConfig::default();
        let file = file.unwrap_or(&empty);

        let output_dir = overrides
            .output_dir
            .clone()
            .or_else(|| file.output_dir.clone())
            .unwrap_or_else(|| PathBuf::from("."));

        let api_base_url = parse_http_url(
            "api_base_url",
            file.api_base_url.as_deref().unwrap_or(DEFAULT_API_BASE_URL),
        )?;
        let token_url = parse_http_url(
            "token_url",
            file.token_url.as_deref().unwrap_or(DEFAULT_TOKEN_URL),
        )?;

        let client_id = env(CLIENT_ID_ENV).or_else(|| file.client_id.clone());
        let client_secret = env(CLIENT_SECRET_ENV).or_else(|| file.client_secret.clone());
        let credentials = match (client_id, client_secret) {
            (Some(id), Some(secret)) if !id.trim().is_empty() && !secret.trim().is_empty() => {
                Some(Credentials::new(id.trim(), secret.trim()))
            }
            _ => None,
        };

        let conversation_status = file
            .conversation_status
            .clone()
            .unwrap_or_else(|| DEFAULT_CONVERSATION_STATUS.to_string());
        if conversation_status.trim().is_empty() {
            return Err(ConfigError::invalid(
                "conversation_status",
                "must not be empty",
            ));
        }

        let rate_limit_ms = overrides
            .rate_limit_ms
            .or(file.rate_limit_ms)
            .unwrap_or(DEFAULT_RATE_LIMIT_MS);
        if rate_limit_ms > MAX_RATE_LIMIT_MS {
            return Err(ConfigError::invalid(
                "rate_limit_ms",
                format!("{rate_limit_ms} exceeds maximum {MAX_RATE_LIMIT_MS}"),
            ));
        }

        let max_retries = overrides
            .max_retries
            .or(file.max_retries)
            .unwrap_or(DEFAULT_MAX_RETRIES);
        if max_retries > MAX_RETRIES_LIMIT {
            return Err(ConfigError::invalid(
                "max_retries",
                format!("{max_retries} exceeds maximum {MAX_RETRIES_LIMIT}"),
            ));
        }

        let connect_timeout = timeout_secs(
            "connect_timeout_secs",
            file.connect_timeout_secs
                .unwrap_or(DEFAULT_CONNECT_TIMEOUT_SECS),
        )?;
        let read_timeout = timeout_secs(
            "read_timeout_secs",
            file.read_timeout_secs.unwrap_or(DEFAULT_READ_TIMEOUT_SECS),
        )?;
        let token_refresh_margin = Duration::from_secs(
            file.token_refresh_margin_secs
                .unwrap_or(DEFAULT_TOKEN_REFRESH_MARGIN_SECS),
        );

        let defaults = ExportPaths::under(&output_dir);
        let paths = ExportPaths {
            pending_ids: relative_to(&output_dir, file.pending_ids_file.as_deref())
                .unwrap_or(defaults.pending_ids),
            done_ids: relative_to(&output_dir, file.done_ids_file.as_deref())
                .unwrap_or(defaults.done_ids),
            csv: relative_to(&output_dir, file.csv_file.as_deref()).unwrap_or(defaults.csv),
            attachments_dir: relative_to(&output_dir, file.attachments_dir.as_deref())
                .unwrap_or(defaults.attachments_dir),
        };
        if paths.pending_ids == paths.done_ids {
            return Err(ConfigError::invalid(
                "done_ids_file",
                "must differ from pending_ids_file",
            ));
        }

        let mut policies = FetchPolicies::default();
        if let Some(table) = &file.policies {
            policies.discovery = table.discovery.unwrap_or(policies.discovery);
            policies.item = table.item.unwrap_or(policies.item);
            policies.threads = table.threads.unwrap_or(policies.threads);
            policies.attachments = table.attachments.unwrap_or(policies.attachments);
        }

        Ok(Self {
            credentials,
            api_base_url,
            token_url,
            conversation_status,
            rate_limit: Duration::from_millis(rate_limit_ms),
            max_retries,
            connect_timeout,
            read_timeout,
            token_refresh_margin,
            paths,
            policies,
        })
    }

    /// Returns the credentials or the error naming the first missing one.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingCredential`] when either value is absent.
    pub fn require_credentials(&self) -> Result<&Credentials, ConfigError> {
        self.credentials
            .as_ref()
            .ok_or(ConfigError::MissingCredential {
                field: "client_id / client_secret",
                env: "HELPDESK_CLIENT_ID / HELPDESK_CLIENT_SECRET",
            })
    }
}

fn parse_http_url(field: &'static str, raw: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(raw.trim())
        .map_err(|e| ConfigError::invalid(field, format!("'{raw}' is not a URL: {e}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigError::invalid(
            field,
            format!("'{raw}' must use http or https"),
        ));
    }
    Ok(url)
}

#[allow(clippy::expect_used)]
fn default_url(raw: &str) -> Url {
    Url::parse(raw).expect("built-in URL is valid")
}

fn timeout_secs(field: &'static str, value: u64) -> Result<Duration, ConfigError> {
    if !TIMEOUT_RANGE_SECS.contains(&value) {
        return Err(ConfigError::invalid(
            field,
            format!("{value} outside range 1..=3600"),
        ));
    }
    Ok(Duration::from_secs(value))
}

fn relative_to(base: &Path, value: Option<&Path>) -> Option<PathBuf> {
    value.map(|p| join_output(base, p))
}

/// Joins `name` under `base`; the current directory adds no `./` prefix,
/// so attachment paths in the table read `attachments/<id>/<file>`.
fn join_output(base: &Path, name: &Path) -> PathBuf {
    if name.is_absolute() || base == Path::new(".") {
        name.to_path_buf()
    } else {
        base.join(name)
    }
}
