//! Pager: walks the numbered listing pages and collects conversation ids.

use thiserror::Error;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::api::models::{ConversationId, ConversationPage};
use crate::api::{ApiClient, ApiError, AuthError};
use crate::config::ErrorPolicy;

/// Errors that abort discovery.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("listing page {page} failed: {source}")]
    Page {
        page: u32,
        #[source]
        source: ApiError,
    },
}

impl DiscoveryError {
    fn from_page(page: u32, error: ApiError) -> Self {
        match error {
            ApiError::Auth(source) => Self::Auth(source),
            source => Self::Page { page, source },
        }
    }
}

/// Outcome of a discovery walk.
#[derive(Debug, Clone, Default)]
pub struct DiscoveredIds {
    /// Identifiers in page order, then in-page order.
    pub ids: Vec<ConversationId>,
    /// `totalPages` reported by the first page.
    pub total_pages: u32,
    /// `totalElements` reported by the first page.
    pub reported_elements: u64,
    /// Pages dropped under `SkipAndLog`.
    pub skipped_pages: Vec<u32>,
}

/// Collects every conversation id from the listing endpoint.
///
/// Page 1 supplies `totalPages` and its own items; pages `2..=totalPages` are
/// then fetched one after another. Page 1 failing always aborts, since the
/// page count is unknown without it. Later page failures follow `policy`.
///
/// # Errors
///
/// Returns [`DiscoveryError`] on auth failure, on page 1 failure, or on any
/// page failure under `FailFast`.
#[instrument(skip(client))]
pub async fn discover_all_ids(
    client: &ApiClient,
    status: &str,
    policy: ErrorPolicy,
) -> Result<DiscoveredIds, DiscoveryError> {
    let first = fetch_page(client, status, 1)
        .await
        .map_err(|e| DiscoveryError::from_page(1, e))?;

    let mut result = DiscoveredIds {
        ids: first.ids(),
        total_pages: first.page.total_pages,
        reported_elements: first.page.total_elements,
        skipped_pages: Vec::new(),
    };
    info!(
        total_pages = result.total_pages,
        total_elements = result.reported_elements,
        "starting discovery"
    );

    for page in 2..=result.total_pages {
        match fetch_page(client, status, page).await {
            Ok(listing) => {
                let ids = listing.ids();
                debug!(page, count = ids.len(), "page fetched");
                result.ids.extend(ids);
            }
            Err(error) => match (policy, DiscoveryError::from_page(page, error)) {
                (_, DiscoveryError::Auth(source)) => return Err(DiscoveryError::Auth(source)),
                (ErrorPolicy::FailFast, error) => return Err(error),
                (ErrorPolicy::SkipAndLog, error) => {
                    warn!(page, error = %error, "skipping listing page");
                    result.skipped_pages.push(page);
                }
            },
        }
    }

    let collected = result.ids.len() as u64;
    if collected == result.reported_elements {
        info!(count = collected, "discovery complete");
    } else {
        warn!(
            collected,
            reported = result.reported_elements,
            "collected id count differs from reported total"
        );
    }
    Ok(result)
}

async fn fetch_page(client: &ApiClient, status: &str, page: u32) -> Result<ConversationPage, ApiError> {
    client.get_json(&listing_url(client, status, page)).await
}

fn listing_url(client: &ApiClient, status: &str, page: u32) -> Url {
    let mut url = client.endpoint(&["conversations"]);
    url.query_pairs_mut()
        .append_pair("status", status)
        .append_pair("page", &page.to_string());
    url
}
