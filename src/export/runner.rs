//! Discovery and processing runs.
//!
//! Per identifier the processing loop moves through
//! `Pending -> Fetching -> {Skipped, Saved, Failed}`:
//!
//! - **Skipped**: the item is unavailable; nothing is written and it stays
//!   pending for a future run.
//! - **Saved**: the row is appended to the sink, then the id is appended to the
//!   done log.
//! - **Failed**: a `FailFast` fetch error or a sink error; nothing is marked
//!   done and the loop continues.
//!
//! Authentication and progress-store failures stop the run.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use tracing::{Instrument, debug, info, info_span, warn};

use super::fetcher::{FetchError, ItemFetcher};
use super::pager::{DiscoveredIds, discover_all_ids};
use super::record::ConversationRecord;
use crate::api::ApiClient;
use crate::api::models::ConversationId;
use crate::config::ExportConfig;
use crate::error::ExportError;
use crate::progress::ProgressStore;
use crate::rate_limiter::RateLimiter;
use crate::sink::{RecordSink, SinkError};

/// Counters for one processing run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessStats {
    /// Rows written and ids marked done.
    pub saved: usize,
    /// Items that were unavailable and stay pending.
    pub skipped: usize,
    /// Items that failed and stay pending.
    pub failed: usize,
    /// Pending ids already in the done log at start.
    pub already_done: usize,
}

impl ProcessStats {
    /// Items attempted in this run.
    #[must_use]
    pub fn attempted(&self) -> usize {
        self.saved + self.skipped + self.failed
    }

    /// Items attempted but not finished.
    #[must_use]
    pub fn unfinished(&self) -> usize {
        self.skipped + self.failed
    }
}

impl fmt::Display for ProcessStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} saved, {} skipped, {} failed, {} already done",
            self.saved, self.skipped, self.failed, self.already_done
        )
    }
}

/// Knobs for [`run_processing`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessOptions {
    /// Process at most this many remaining ids.
    pub limit: Option<usize>,
}

/// Terminal state of one identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ItemOutcome {
    Saved,
    Skipped,
    Failed,
}

enum ItemFailure {
    Fetch(FetchError),
    Sink(SinkError),
}

impl From<FetchError> for ItemFailure {
    fn from(error: FetchError) -> Self {
        Self::Fetch(error)
    }
}

impl From<SinkError> for ItemFailure {
    fn from(error: SinkError) -> Self {
        Self::Sink(error)
    }
}

/// Builds the shared limiter and an authenticated [`ApiClient`].
///
/// # Errors
///
/// Returns [`ExportError::Config`] when credentials are missing,
/// [`ExportError::Client`] if the HTTP client cannot be built, and
/// [`ExportError::Auth`] if the token request fails.
pub async fn connect(config: &ExportConfig) -> Result<ApiClient, ExportError> {
    let credentials = config.require_credentials()?.clone();
    let limiter = if config.rate_limit.is_zero() {
        debug!("rate limiting disabled");
        RateLimiter::disabled()
    } else {
        debug!(rate_limit_ms = config.rate_limit.as_millis(), "rate limiting enabled");
        RateLimiter::new(config.rate_limit)
    };

    let client = ApiClient::new(config, credentials, Arc::new(limiter))?;
    client.authenticate().await?;
    Ok(client)
}

/// Discovers every conversation id and replaces the pending snapshot.
///
/// # Errors
///
/// Returns [`ExportError`] if discovery fails or the snapshot cannot be written.
pub async fn run_discovery(
    client: &ApiClient,
    config: &ExportConfig,
) -> Result<DiscoveredIds, ExportError> {
    let discovered = discover_all_ids(
        client,
        &config.conversation_status,
        config.policies.discovery,
    )
    .await?;
    ProgressStore::from_paths(&config.paths).write_snapshot(&discovered.ids)?;
    Ok(discovered)
}

/// Processes every pending id not yet done, in snapshot order.
///
/// # Errors
///
/// Returns [`ExportError::Progress`] if progress cannot be loaded or persisted,
/// and [`ExportError::Auth`] if credentials stop working. Per-item failures are
/// counted in the returned stats instead.
pub async fn run_processing<S: RecordSink>(
    client: &ApiClient,
    config: &ExportConfig,
    sink: &mut S,
    options: ProcessOptions,
) -> Result<ProcessStats, ExportError> {
    let store = ProgressStore::from_paths(&config.paths);
    let mut progress = store.load()?;
    let remaining = progress.remaining();

    let mut stats = ProcessStats {
        already_done: progress
            .pending()
            .iter()
            .collect::<HashSet<_>>()
            .into_iter()
            .filter(|id| progress.is_done(id))
            .count(),
        ..ProcessStats::default()
    };

    let batch: Vec<&ConversationId> = remaining
        .iter()
        .take(options.limit.unwrap_or(usize::MAX))
        .collect();
    info!(
        pending = progress.pending().len(),
        already_done = stats.already_done,
        remaining = remaining.len(),
        batch = batch.len(),
        "starting processing"
    );

    let fetcher = ItemFetcher::new(client, &config.paths.attachments_dir, config.policies);
    let total = batch.len();

    for (index, id) in batch.into_iter().enumerate() {
        let span = info_span!("conversation", conversation_id = %id, n = index + 1, of = total);
        let outcome = match process_one(&fetcher, &mut *sink, id).instrument(span.clone()).await {
            Ok(outcome) => outcome,
            Err(ItemFailure::Fetch(FetchError::Auth(source))) => {
                return Err(ExportError::Auth(source));
            }
            Err(ItemFailure::Fetch(error)) => {
                span.in_scope(|| warn!(error = %error, "conversation failed"));
                ItemOutcome::Failed
            }
            Err(ItemFailure::Sink(error)) => {
                span.in_scope(|| warn!(error = %error, "could not write row"));
                ItemOutcome::Failed
            }
        };

        match outcome {
            ItemOutcome::Saved => {
                store.mark_done(id)?;
                progress.record_done(id.clone());
                stats.saved += 1;
            }
            ItemOutcome::Skipped => stats.skipped += 1,
            ItemOutcome::Failed => stats.failed += 1,
        }
    }

    info!(
        saved = stats.saved,
        skipped = stats.skipped,
        failed = stats.failed,
        already_done = stats.already_done,
        "processing finished"
    );
    Ok(stats)
}

async fn process_one<S: RecordSink>(
    fetcher: &ItemFetcher<'_>,
    sink: &mut S,
    id: &ConversationId,
) -> Result<ItemOutcome, ItemFailure> {
    let Some(conversation) = fetcher.fetch_item(id).await? else {
        return Ok(ItemOutcome::Skipped);
    };

    let threads = fetcher.fetch_threads(id).await?;
    let mut attachments = Vec::new();
    for thread in &threads {
        attachments.extend(fetcher.fetch_and_download_attachments(id, thread).await?);
    }

    let record = ConversationRecord::from_parts(&conversation, &threads, &attachments);
    sink.append(&record)?;
    info!(
        threads = threads.len(),
        attachments = attachments.len(),
        "conversation saved"
    );
    Ok(ItemOutcome::Saved)
}
