//! Wire models for the help-desk REST API.
//!
//! Only the fields the exporter reads are modeled; everything else in the
//! payloads is ignored. HAL-style `_embedded` / `_links` members map to
//! `embedded` / `links`.

use std::fmt;

use serde::Deserialize;

/// Identifier of a remote conversation.
///
/// The API sends numbers; the progress files store text. Equality is an exact
/// string match on the trimmed value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize)]
#[serde(from = "RawId")]
pub struct ConversationId(String);

impl ConversationId {
    /// Creates an identifier from text, trimming surrounding whitespace.
    pub fn new(value: impl AsRef<str>) -> Self {
        Self(value.as_ref().trim().to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConversationId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<u64> for ConversationId {
    fn from(value: u64) -> Self {
        Self(value.to_string())
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
    Number(u64),
    Text(String),
}

impl From<RawId> for ConversationId {
    fn from(raw: RawId) -> Self {
        match raw {
            RawId::Number(n) => Self::from(n),
            RawId::Text(s) => Self::new(s),
        }
    }
}

/// Pagination block of a listing response.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    pub total_pages: u32,
    #[serde(default)]
    pub total_elements: u64,
}

/// One page of the conversation listing.
#[derive(Debug, Deserialize)]
pub struct ConversationPage {
    pub page: PageInfo,
    /// Absent when the collection is empty.
    #[serde(rename = "_embedded", default)]
    pub embedded: ConversationList,
}

#[derive(Debug, Default, Deserialize)]
pub struct ConversationList {
    #[serde(default)]
    pub conversations: Vec<ConversationSummary>,
}

#[derive(Debug, Deserialize)]
pub struct ConversationSummary {
    pub id: ConversationId,
}

impl ConversationPage {
    /// Identifiers on this page, in listing order.
    #[must_use]
    pub fn ids(&self) -> Vec<ConversationId> {
        self.embedded
            .conversations
            .iter()
            .map(|c| c.id.clone())
            .collect()
    }
}

/// Conversation detail.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: ConversationId,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub primary_customer: Option<Customer>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub closed_at: Option<String>,
    #[serde(default)]
    pub assignee: Option<Person>,
    #[serde(default)]
    pub tags: Vec<Tag>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Customer {
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Person {
    #[serde(default)]
    pub first: Option<String>,
    #[serde(default)]
    pub last: Option<String>,
}

impl Person {
    /// "First Last", skipping missing parts. `None` when both are blank.
    #[must_use]
    pub fn display_name(&self) -> Option<String> {
        let parts: Vec<&str> = [self.first.as_deref(), self.last.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect();
        (!parts.is_empty()).then(|| parts.join(" "))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Tag {
    pub tag: String,
}

/// Response of the threads endpoint.
#[derive(Debug, Default, Deserialize)]
pub struct ThreadPage {
    #[serde(rename = "_embedded", default)]
    pub embedded: ThreadList,
}

#[derive(Debug, Default, Deserialize)]
pub struct ThreadList {
    #[serde(default)]
    pub threads: Vec<Thread>,
}

/// One message or event in a conversation.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Thread {
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub action: Option<ThreadAction>,
    #[serde(rename = "_embedded", default)]
    pub embedded: ThreadEmbedded,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ThreadAction {
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ThreadEmbedded {
    #[serde(default)]
    pub attachments: Vec<AttachmentRef>,
}

/// Attachment reference inside a thread.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AttachmentRef {
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(rename = "_links", default)]
    pub links: AttachmentLinks,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AttachmentLinks {
    /// Binary download link.
    #[serde(default)]
    pub data: Option<Link>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Link {
    pub href: String,
}
