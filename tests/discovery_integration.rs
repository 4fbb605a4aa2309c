//! Integration tests for bulk id discovery against a mocked listing endpoint.

mod support;

use std::sync::Arc;
use std::time::{Duration, Instant};

use helpdesk_export::api::models::ConversationId;
use helpdesk_export::export::{DiscoveryError, discover_all_ids};
use helpdesk_export::{
    ErrorPolicy, ExportError, ProgressStore, RateLimiter, connect, run_discovery,
};
use serde_json::json;
use support::{TOKEN, client_for, client_with_limiter, config_for, listing_page, mount_listing, mount_token};
use tempfile::TempDir;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn ids(raw: &[u64]) -> Vec<ConversationId> {
    raw.iter().copied().map(ConversationId::from).collect()
}

#[tokio::test]
async fn test_three_pages_of_two_yield_six_ids_in_order() {
    let server = MockServer::start().await;
    let dir = TempDir::new().expect("temp dir");
    mount_token(&server).await;
    mount_listing(&server, &[&[11, 12], &[21, 22], &[31, 32]]).await;

    let config = config_for(&server, dir.path());
    let client = client_for(&config, 1);
    let discovered = discover_all_ids(&client, "all", ErrorPolicy::FailFast)
        .await
        .expect("discovery succeeds");

    assert_eq!(discovered.ids, ids(&[11, 12, 21, 22, 31, 32]));
    assert_eq!(discovered.total_pages, 3);
    assert_eq!(discovered.reported_elements, 6);
    assert!(discovered.skipped_pages.is_empty());
}

#[tokio::test]
async fn test_listing_sends_status_filter_and_bearer_token() {
    let server = MockServer::start().await;
    let dir = TempDir::new().expect("temp dir");
    mount_token(&server).await;
    Mock::given(method("GET"))
        .and(path("/conversations"))
        .and(query_param("status", "closed"))
        .and(query_param("page", "1"))
        .and(header("authorization", format!("Bearer {TOKEN}").as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(listing_page(&[5], 1, 1)))
        .expect(1)
        .mount(&server)
        .await;

    let config = config_for(&server, dir.path());
    let client = client_for(&config, 1);
    let discovered = discover_all_ids(&client, "closed", ErrorPolicy::FailFast)
        .await
        .expect("discovery succeeds");
    assert_eq!(discovered.ids, ids(&[5]));
}

#[tokio::test]
async fn test_page_one_is_fetched_once() {
    let server = MockServer::start().await;
    let dir = TempDir::new().expect("temp dir");
    mount_token(&server).await;
    Mock::given(method("GET"))
        .and(path("/conversations"))
        .and(query_param("page", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(listing_page(&[1, 2], 2, 3)))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/conversations"))
        .and(query_param("page", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(listing_page(&[3], 2, 3)))
        .expect(1)
        .mount(&server)
        .await;

    let config = config_for(&server, dir.path());
    let client = client_for(&config, 1);
    let discovered = discover_all_ids(&client, "all", ErrorPolicy::FailFast)
        .await
        .expect("discovery succeeds");
    assert_eq!(discovered.ids, ids(&[1, 2, 3]));
}

#[tokio::test]
async fn test_empty_collection_without_embedded() {
    let server = MockServer::start().await;
    let dir = TempDir::new().expect("temp dir");
    mount_token(&server).await;
    Mock::given(method("GET"))
        .and(path("/conversations"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "page": { "size": 50, "totalElements": 0, "totalPages": 0, "number": 1 }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let config = config_for(&server, dir.path());
    let client = client_for(&config, 1);
    let discovered = discover_all_ids(&client, "all", ErrorPolicy::FailFast)
        .await
        .expect("discovery succeeds");
    assert!(discovered.ids.is_empty());
}

#[tokio::test]
async fn test_failed_page_aborts_under_fail_fast() {
    let server = MockServer::start().await;
    let dir = TempDir::new().expect("temp dir");
    mount_token(&server).await;
    Mock::given(method("GET"))
        .and(path("/conversations"))
        .and(query_param("page", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(listing_page(&[1, 2], 2, 4)))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/conversations"))
        .and(query_param("page", "2"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let config = config_for(&server, dir.path());
    let client = client_for(&config, 1);
    let err = discover_all_ids(&client, "all", ErrorPolicy::FailFast)
        .await
        .expect_err("page 2 fails");
    assert!(matches!(err, DiscoveryError::Page { page: 2, .. }), "{err}");
}

#[tokio::test]
async fn test_failed_page_skipped_under_skip_and_log() {
    let server = MockServer::start().await;
    let dir = TempDir::new().expect("temp dir");
    mount_token(&server).await;
    for (page, body) in [
        ("1", listing_page(&[1, 2], 3, 6)),
        ("3", listing_page(&[5, 6], 3, 6)),
    ] {
        Mock::given(method("GET"))
            .and(path("/conversations"))
            .and(query_param("page", page))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(&server)
            .await;
    }
    Mock::given(method("GET"))
        .and(path("/conversations"))
        .and(query_param("page", "2"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let config = config_for(&server, dir.path());
    let client = client_for(&config, 2);
    let discovered = discover_all_ids(&client, "all", ErrorPolicy::SkipAndLog)
        .await
        .expect("skip policy keeps going");
    assert_eq!(discovered.ids, ids(&[1, 2, 5, 6]));
    assert_eq!(discovered.skipped_pages, vec![2]);
}

#[tokio::test]
async fn test_transient_page_error_is_retried() {
    let server = MockServer::start().await;
    let dir = TempDir::new().expect("temp dir");
    mount_token(&server).await;
    Mock::given(method("GET"))
        .and(path("/conversations"))
        .respond_with(support::FlakyResponder::new(2, 503, listing_page(&[7, 8], 1, 2)))
        .expect(3)
        .mount(&server)
        .await;

    let config = config_for(&server, dir.path());
    let client = client_for(&config, 3);
    let discovered = discover_all_ids(&client, "all", ErrorPolicy::FailFast)
        .await
        .expect("third attempt succeeds");
    assert_eq!(discovered.ids, ids(&[7, 8]));
}

#[tokio::test]
async fn test_rejected_credentials_are_auth_error() {
    let server = MockServer::start().await;
    let dir = TempDir::new().expect("temp dir");
    Mock::given(method("POST"))
        .and(path("/oauth2/token"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/conversations"))
        .respond_with(ResponseTemplate::new(200).set_body_json(listing_page(&[1], 1, 1)))
        .expect(0)
        .mount(&server)
        .await;

    let config = config_for(&server, dir.path());
    let client = client_for(&config, 3);
    let err = run_discovery(&client, &config)
        .await
        .expect_err("token request rejected");
    assert!(matches!(err, ExportError::Auth(_)), "{err}");
    assert!(!config.paths.pending_ids.exists());
}

#[tokio::test]
async fn test_run_discovery_writes_snapshot_replacing_old_one() {
    let server = MockServer::start().await;
    let dir = TempDir::new().expect("temp dir");
    mount_token(&server).await;
    mount_listing(&server, &[&[3, 1], &[2]]).await;

    let config = config_for(&server, dir.path());
    std::fs::write(&config.paths.pending_ids, "99\n98\n").expect("seed old snapshot");
    let client = client_for(&config, 1);
    run_discovery(&client, &config).await.expect("discovery succeeds");

    let snapshot = ProgressStore::from_paths(&config.paths)
        .load()
        .expect("snapshot loads");
    assert_eq!(snapshot.pending(), ids(&[3, 1, 2]).as_slice());
}

#[tokio::test]
async fn test_calls_are_spaced_by_the_limiter() {
    let server = MockServer::start().await;
    let dir = TempDir::new().expect("temp dir");
    mount_token(&server).await;
    mount_listing(&server, &[&[1], &[2], &[3]]).await;

    let spacing = Duration::from_millis(60);
    let config = config_for(&server, dir.path());
    let limiter = Arc::new(RateLimiter::new(spacing));
    let client = client_with_limiter(&config, 1, Arc::clone(&limiter));

    let started = Instant::now();
    discover_all_ids(&client, "all", ErrorPolicy::FailFast)
        .await
        .expect("discovery succeeds");
    let elapsed = started.elapsed();

    // token + 3 pages
    assert_eq!(limiter.started(), 4);
    assert!(elapsed >= spacing * 3, "elapsed {elapsed:?} < {:?}", spacing * 3);
}

#[tokio::test]
async fn test_connect_without_credentials_is_config_error() {
    let server = MockServer::start().await;
    let dir = TempDir::new().expect("temp dir");
    let mut config = config_for(&server, dir.path());
    config.credentials = None;

    let err = connect(&config).await.expect_err("no credentials");
    assert!(matches!(err, ExportError::Config(_)), "{err}");
    assert!(err.to_string().contains("HELPDESK_CLIENT_ID"));
}

#[tokio::test]
async fn test_connect_authenticates_once() {
    let server = MockServer::start().await;
    let dir = TempDir::new().expect("temp dir");
    Mock::given(method("POST"))
        .and(path("/oauth2/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": TOKEN,
            "expires_in": 7200
        })))
        .expect(1)
        .mount(&server)
        .await;
    mount_listing(&server, &[&[1]]).await;

    let config = config_for(&server, dir.path());
    let client = connect(&config).await.expect("token issued");
    let discovered = discover_all_ids(&client, "all", ErrorPolicy::FailFast)
        .await
        .expect("discovery succeeds");
    assert_eq!(discovered.ids, ids(&[1]));
}

#[tokio::test]
async fn test_connect_with_rejected_credentials_is_auth_error() {
    let server = MockServer::start().await;
    let dir = TempDir::new().expect("temp dir");
    Mock::given(method("POST"))
        .and(path("/oauth2/token"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;

    let config = config_for(&server, dir.path());
    let err = connect(&config).await.expect_err("credentials rejected");
    assert!(matches!(err, ExportError::Auth(_)), "{err}");
}
