//! Help-desk conversation exporter.
//!
//! Exports conversations (metadata, message threads, attachments) from a
//! paginated, rate-limited REST API into a CSV table and an attachment tree.
//! Work happens in two independently invoked phases:
//!
//! 1. **Discovery** walks the listing pages and writes a pending-ids snapshot.
//! 2. **Processing** fetches each pending conversation not yet done, appends a
//!    row, and records the id in an append-only done log.
//!
//! Processing is resumable: remaining work is always the snapshot minus the
//! done log, so an interrupted run picks up where it stopped.
//!
//! # Architecture
//!
//! - [`config`] - Layered configuration and per-operation error policies
//! - [`rate_limiter`] - Fixed-spacing, one-in-flight gate for every API call
//! - [`api`] - Authenticated HTTP client, token handling, retries, wire models
//! - [`export`] - Pager, item fetcher, record flattening, processing loop
//! - [`progress`] - Pending snapshot and done log
//! - [`sink`] - Output table writer

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod api;
pub mod config;
pub mod error;
pub mod export;
pub mod progress;
pub mod rate_limiter;
pub mod sink;
pub(crate) mod user_agent;

// Re-export commonly used types
pub use api::{ApiClient, ApiError, AuthError, RetryPolicy};
pub use config::{
    ConfigError, ConfigOverrides, Credentials, ErrorPolicy, ExportConfig, ExportPaths,
    FetchPolicies, FileConfig,
};
pub use error::ExportError;
pub use export::{ProcessOptions, ProcessStats, connect, run_discovery, run_processing};
pub use progress::{ProgressError, ProgressSnapshot, ProgressStore};
pub use rate_limiter::RateLimiter;
pub use sink::{CsvSink, RecordSink, SinkError};
