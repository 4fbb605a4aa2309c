//! Flattening of a fetched conversation into one output row.

use std::path::PathBuf;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use crate::api::models::{Conversation, Thread};

/// Column titles of the output table, in order.
pub const CSV_COLUMNS: [&str; 11] = [
    "ID",
    "Subject",
    "Status",
    "Customer Email",
    "Created At",
    "Closed At",
    "Assignee Name",
    "Tags",
    "Type",
    "Threads",
    "Attachments",
];

const NOT_CLOSED: &str = "Not Closed";
const UNASSIGNED: &str = "Unassigned";
const NO_CONTENT: &str = "No Content";
const THREAD_SEPARATOR: &str = "; ";
const LIST_SEPARATOR: &str = ", ";

#[allow(clippy::expect_used)]
static HTML_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[^>]*>?").expect("HTML tag regex is valid"));

#[allow(clippy::expect_used)]
static LINE_BREAK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\r\n|\n|\r").expect("line break regex is valid"));

/// One row of the output table.
///
/// Field order and serde names match [`CSV_COLUMNS`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConversationRecord {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "Subject")]
    pub subject: String,
    #[serde(rename = "Status")]
    pub status: String,
    #[serde(rename = "Customer Email")]
    pub customer_email: String,
    #[serde(rename = "Created At")]
    pub created_at: String,
    #[serde(rename = "Closed At")]
    pub closed_at: String,
    #[serde(rename = "Assignee Name")]
    pub assignee_name: String,
    #[serde(rename = "Tags")]
    pub tags: String,
    #[serde(rename = "Type")]
    pub kind: String,
    #[serde(rename = "Threads")]
    pub threads: String,
    #[serde(rename = "Attachments")]
    pub attachments: String,
}

impl ConversationRecord {
    /// Builds a row from the conversation detail, its threads, and the local
    /// paths of attachments that were saved.
    #[must_use]
    pub fn from_parts(
        conversation: &Conversation,
        threads: &[Thread],
        attachments: &[PathBuf],
    ) -> Self {
        let assignee_name = conversation
            .assignee
            .as_ref()
            .and_then(|a| a.display_name())
            .unwrap_or_else(|| UNASSIGNED.to_string());

        Self {
            id: conversation.id.to_string(),
            subject: conversation.subject.clone().unwrap_or_default(),
            status: conversation.status.clone().unwrap_or_default(),
            customer_email: conversation
                .primary_customer
                .as_ref()
                .and_then(|c| c.email.clone())
                .unwrap_or_default(),
            created_at: conversation.created_at.clone().unwrap_or_default(),
            closed_at: conversation
                .closed_at
                .clone()
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| NOT_CLOSED.to_string()),
            assignee_name,
            tags: conversation
                .tags
                .iter()
                .map(|t| t.tag.as_str())
                .collect::<Vec<_>>()
                .join(LIST_SEPARATOR),
            kind: conversation.kind.clone().unwrap_or_default(),
            threads: threads
                .iter()
                .map(thread_text)
                .collect::<Vec<_>>()
                .join(THREAD_SEPARATOR),
            attachments: attachments
                .iter()
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
                .join(LIST_SEPARATOR),
        }
    }
}

/// Plain-text rendering of one thread: its body, else its action text, else
/// `No Content`.
#[must_use]
pub fn thread_text(thread: &Thread) -> String {
    let raw = thread
        .body
        .as_deref()
        .filter(|s| !s.is_empty())
        .or_else(|| {
            thread
                .action
                .as_ref()
                .and_then(|a| a.text.as_deref())
                .filter(|s| !s.is_empty())
        })
        .unwrap_or(NO_CONTENT);
    sanitize_html(raw)
}

/// Strips HTML tags and folds line breaks into spaces.
#[must_use]
pub fn sanitize_html(raw: &str) -> String {
    let without_tags = HTML_TAG.replace_all(raw, "");
    LINE_BREAK.replace_all(&without_tags, " ").into_owned()
}
