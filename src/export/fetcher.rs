//! Item Fetcher: conversation detail, threads, and attachment downloads.
//!
//! Each operation is governed by its own [`ErrorPolicy`]. Under `SkipAndLog` a
//! failure is logged and degraded (absent item, empty thread list, omitted
//! attachment); under `FailFast` it is returned to the caller. Authentication
//! failures are always returned.

use std::path::{Component, Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::api::models::{AttachmentRef, Conversation, ConversationId, Thread, ThreadPage};
use crate::api::{ApiClient, ApiError, AuthError};
use crate::config::{ErrorPolicy, FetchPolicies};

/// Errors surfaced by the fetcher.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Credentials stopped working; the run must stop.
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("fetching conversation {id}: {source}")]
    Item {
        id: ConversationId,
        #[source]
        source: ApiError,
    },

    #[error("fetching threads of conversation {id}: {source}")]
    Threads {
        id: ConversationId,
        #[source]
        source: ApiError,
    },

    #[error("downloading attachment '{filename}' of conversation {id}: {source}")]
    Attachment {
        id: ConversationId,
        filename: String,
        #[source]
        source: ApiError,
    },
}

/// Fetches conversations and their sub-resources through an [`ApiClient`].
#[derive(Debug)]
pub struct ItemFetcher<'a> {
    client: &'a ApiClient,
    attachments_dir: PathBuf,
    policies: FetchPolicies,
}

impl<'a> ItemFetcher<'a> {
    #[must_use]
    pub fn new(client: &'a ApiClient, attachments_dir: impl Into<PathBuf>, policies: FetchPolicies) -> Self {
        Self {
            client,
            attachments_dir: attachments_dir.into(),
            policies,
        }
    }

    /// Fetches one conversation's detail.
    ///
    /// `Ok(None)` means the conversation is unavailable for now; it stays
    /// pending for a future run.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Auth`] always, and [`FetchError::Item`] under `FailFast`.
    #[instrument(skip(self), fields(conversation_id = %id))]
    pub async fn fetch_item(&self, id: &ConversationId) -> Result<Option<Conversation>, FetchError> {
        let url = self.client.endpoint(&["conversations", id.as_str()]);
        match self.client.get_json::<Conversation>(&url).await {
            Ok(conversation) => Ok(Some(conversation)),
            Err(error) => {
                on_failure(self.policies.item, error, "conversation unavailable, skipping", |source| {
                    FetchError::Item {
                        id: id.clone(),
                        source,
                    }
                })?;
                Ok(None)
            }
        }
    }

    /// Fetches a conversation's threads, in API order.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Auth`] always, and [`FetchError::Threads`] under
    /// `FailFast`. Under `SkipAndLog` a failure yields an empty list.
    #[instrument(skip(self), fields(conversation_id = %id))]
    pub async fn fetch_threads(&self, id: &ConversationId) -> Result<Vec<Thread>, FetchError> {
        let url = self.client.endpoint(&["conversations", id.as_str(), "threads"]);
        match self.client.get_json::<ThreadPage>(&url).await {
            Ok(page) => {
                debug!(count = page.embedded.threads.len(), "threads fetched");
                Ok(page.embedded.threads)
            }
            Err(error) => {
                on_failure(self.policies.threads, error, "threads unavailable, continuing without them", |source| {
                    FetchError::Threads {
                        id: id.clone(),
                        source,
                    }
                })?;
                Ok(Vec::new())
            }
        }
    }

    /// Downloads every attachment referenced by `thread` into
    /// `<attachments_dir>/<id>/<filename>` and returns the saved paths.
    ///
    /// References without a filename or download link are skipped with a
    /// warning. Siblings of a failed download are still attempted.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Auth`] always, and [`FetchError::Attachment`] under
    /// `FailFast`.
    #[instrument(skip(self, thread), fields(conversation_id = %id, thread_id = ?thread.id))]
    pub async fn fetch_and_download_attachments(
        &self,
        id: &ConversationId,
        thread: &Thread,
    ) -> Result<Vec<PathBuf>, FetchError> {
        let item_dir = self.attachments_dir.join(sanitize_filename(id.as_str()));
        let mut saved = Vec::new();

        for attachment in &thread.embedded.attachments {
            let Some(filename) = attachment.filename.as_deref().filter(|f| !f.trim().is_empty())
            else {
                warn!(attachment_id = ?attachment.id, "attachment has no filename, skipping");
                continue;
            };
            let Some(href) = download_href(attachment) else {
                warn!(filename, "attachment has no download link, skipping");
                continue;
            };

            let dest = item_dir.join(sanitize_filename(filename));
            match self.download_one(href, &dest).await {
                Ok(bytes) => {
                    info!(filename, bytes, path = %dest.display(), "attachment saved");
                    saved.push(dest);
                }
                Err(error) => {
                    on_failure(self.policies.attachments, error, "attachment download failed, omitting it", |source| {
                        FetchError::Attachment {
                            id: id.clone(),
                            filename: filename.to_string(),
                            source,
                        }
                    })?;
                }
            }
        }

        Ok(saved)
    }

    async fn download_one(&self, href: &str, dest: &Path) -> Result<u64, ApiError> {
        let url = Url::parse(href).map_err(|_| ApiError::invalid_url(href))?;
        self.client.download_to(&url, dest).await
    }
}

fn download_href(attachment: &AttachmentRef) -> Option<&str> {
    attachment
        .links
        .data
        .as_ref()
        .map(|link| link.href.trim())
        .filter(|href| !href.is_empty())
}

/// Applies `policy` to a failed call. Auth failures always propagate.
fn on_failure(
    policy: ErrorPolicy,
    error: ApiError,
    skip_message: &str,
    wrap: impl FnOnce(ApiError) -> FetchError,
) -> Result<(), FetchError> {
    if let ApiError::Auth(source) = error {
        return Err(FetchError::Auth(source));
    }
    match policy {
        ErrorPolicy::FailFast => Err(wrap(error)),
        ErrorPolicy::SkipAndLog => {
            warn!(error = %error, "{skip_message}");
            Ok(())
        }
    }
}

/// Makes an API-supplied name safe to use as a single path component.
///
/// Separators and characters reserved on common filesystems become `_`;
/// everything else is kept verbatim. `.` and `..` are neutralized.
pub(crate) fn sanitize_filename(name: &str) -> String {
    let sanitized: String = name
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    if sanitized.is_empty() {
        return "_".to_string();
    }

    if is_safe_filename_segment(&sanitized) {
        sanitized
    } else {
        sanitized.replace('.', "_")
    }
}

fn is_safe_filename_segment(name: &str) -> bool {
    !Path::new(name).components().any(|component| {
        matches!(
            component,
            Component::CurDir | Component::ParentDir | Component::RootDir | Component::Prefix(_)
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_keeps_ordinary_names_verbatim() {
        assert_eq!(sanitize_filename("Invoice 2024 (final).pdf"), "Invoice 2024 (final).pdf");
        assert_eq!(sanitize_filename("résumé.docx"), "résumé.docx");
    }

    #[test]
    fn test_sanitize_replaces_separators_and_reserved() {
        assert_eq!(sanitize_filename("../../etc/passwd"), ".._.._etc_passwd");
        assert_eq!(sanitize_filename("a\\b:c*d?.txt"), "a_b_c_d_.txt");
    }

    #[test]
    fn test_sanitize_neutralizes_dot_segments() {
        assert_eq!(sanitize_filename(".."), "__");
        assert_eq!(sanitize_filename("."), "_");
        assert_eq!(sanitize_filename("   "), "_");
    }

    #[test]
    fn test_download_href_ignores_blank_links() {
        let attachment: AttachmentRef =
            serde_json::from_str(r#"{"filename":"a","_links":{"data":{"href":"  "}}}"#)
                .unwrap_or_default();
        assert!(download_href(&attachment).is_none());
        assert!(download_href(&AttachmentRef::default()).is_none());
    }
}
