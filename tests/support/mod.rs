//! Shared helpers for integration tests: a mocked help-desk API and a client
//! wired to it with no spacing and zero-delay retries.

#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use helpdesk_export::{ApiClient, Credentials, ExportConfig, RateLimiter, RetryPolicy};
use serde_json::{Value, json};
use url::Url;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, Respond, ResponseTemplate};

pub const TOKEN: &str = "test-token";

/// Config pointing at `server`, storing everything under `dir`, no spacing.
pub fn config_for(server: &MockServer, dir: &Path) -> ExportConfig {
    let mut config = ExportConfig::new(
        Some(Credentials::new("client-id", "client-secret")),
        Url::parse(&server.uri()).expect("mock server uri is a URL"),
        dir,
    );
    config.token_url =
        Url::parse(&format!("{}/oauth2/token", server.uri())).expect("token url is a URL");
    config.rate_limit = Duration::ZERO;
    config
}

/// Client for `config` with an unspaced limiter and immediate retries.
pub fn client_for(config: &ExportConfig, max_attempts: u32) -> ApiClient {
    client_with_limiter(config, max_attempts, Arc::new(RateLimiter::disabled()))
}

pub fn client_with_limiter(
    config: &ExportConfig,
    max_attempts: u32,
    limiter: Arc<RateLimiter>,
) -> ApiClient {
    let credentials = config
        .require_credentials()
        .expect("test config has credentials")
        .clone();
    ApiClient::new(config, credentials, limiter)
        .expect("client builds")
        .with_retry_policy(RetryPolicy::new(
            max_attempts,
            Duration::ZERO,
            Duration::ZERO,
            2.0,
        ))
}

pub async fn mount_token(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/oauth2/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": TOKEN,
            "token_type": "bearer",
            "expires_in": 7200
        })))
        .mount(server)
        .await;
}

/// Listing envelope for one page.
pub fn listing_page(ids: &[u64], total_pages: u32, total_elements: u64) -> Value {
    let conversations: Vec<Value> = ids.iter().map(|id| json!({ "id": id })).collect();
    json!({
        "_embedded": { "conversations": conversations },
        "page": { "size": 2, "totalElements": total_elements, "totalPages": total_pages, "number": 1 }
    })
}

/// Mounts `pages` as listing pages 1..=n.
pub async fn mount_listing(server: &MockServer, pages: &[&[u64]]) {
    let total_pages = u32::try_from(pages.len()).expect("few pages");
    let total_elements: u64 = pages.iter().map(|p| p.len() as u64).sum();
    for (index, ids) in pages.iter().enumerate() {
        Mock::given(method("GET"))
            .and(path("/conversations"))
            .and(query_param("page", (index + 1).to_string()))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(listing_page(
                    ids,
                    total_pages,
                    total_elements,
                )),
            )
            .mount(server)
            .await;
    }
}

pub fn conversation_json(id: u64) -> Value {
    json!({
        "id": id,
        "number": id,
        "subject": format!("Subject {id}"),
        "status": "closed",
        "type": "email",
        "primaryCustomer": { "email": format!("customer{id}@example.com") },
        "createdAt": "2024-03-01T10:00:00Z",
        "closedAt": "2024-03-02T10:00:00Z",
        "assignee": { "first": "Ann", "last": "Lee" },
        "tags": [{ "id": 1, "tag": "billing" }, { "id": 2, "tag": "vip" }]
    })
}

/// Mounts detail and an empty thread list for a conversation.
pub async fn mount_conversation(server: &MockServer, id: u64) {
    mount_conversation_with_threads(server, id, json!([])).await;
}

pub async fn mount_conversation_with_threads(server: &MockServer, id: u64, threads: Value) {
    Mock::given(method("GET"))
        .and(path(format!("/conversations/{id}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(conversation_json(id)))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/conversations/{id}/threads")))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "_embedded": { "threads": threads } })),
        )
        .mount(server)
        .await;
}

/// Writes a pending snapshot by hand.
pub fn write_pending(config: &ExportConfig, ids: &[u64]) {
    let body: String = ids.iter().map(|id| format!("{id}\n")).collect();
    std::fs::write(&config.paths.pending_ids, body).expect("write pending snapshot");
}

pub fn read_done(config: &ExportConfig) -> Vec<String> {
    std::fs::read_to_string(&config.paths.done_ids)
        .unwrap_or_default()
        .lines()
        .map(ToString::to_string)
        .collect()
}

pub fn read_rows(config: &ExportConfig) -> Vec<csv::StringRecord> {
    let Ok(mut reader) = csv::Reader::from_path(&config.paths.csv) else {
        return Vec::new();
    };
    reader
        .records()
        .map(|r| r.expect("valid csv row"))
        .collect()
}

/// Fails `fail_count` times with `fail_status`, then answers 200 with `body`.
pub struct FlakyResponder {
    request_count: Arc<AtomicUsize>,
    fail_count: usize,
    fail_status: u16,
    body: Value,
}

impl FlakyResponder {
    pub fn new(fail_count: usize, fail_status: u16, body: Value) -> Self {
        Self {
            request_count: Arc::new(AtomicUsize::new(0)),
            fail_count,
            fail_status,
            body,
        }
    }
}

impl Respond for FlakyResponder {
    fn respond(&self, _request: &wiremock::Request) -> ResponseTemplate {
        let n = self.request_count.fetch_add(1, Ordering::SeqCst);
        if n < self.fail_count {
            ResponseTemplate::new(self.fail_status).insert_header("Retry-After", "0")
        } else {
            ResponseTemplate::new(200).set_body_json(self.body.clone())
        }
    }
}
