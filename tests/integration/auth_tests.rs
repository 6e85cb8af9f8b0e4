//! Authorization tests for signed artifacts.
//!
//! Tests verify:
//! - Tokens accepted under `token` and `auth`
//! - Rejections (missing, wrong secret, expired, other resource)
//! - No file or backend I/O before authorization succeeds

use axum::http::StatusCode;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

use media_gateway::{IiifSettings, TokenAuthority};

use super::test_utils::{
    body_bytes, body_json, build_router, descriptor, get, key, write_file, FakeBackend,
    MockMediaStore,
};

const SECRET: &str = "s3cret";

/// Authorized requests resolve locally and never reach the backend.
const UNUSED_REPLY: &str = "Status: 500 Internal Server Error\r\n\r\nunexpected";

/// Subject of `/media/art/abc/resize/200/100` with the test prefix.
const SUBJECT: &str = "media/art/abc/resize/100/200";

fn token_for(subject: &str) -> String {
    TokenAuthority::new()
        .issue(SECRET, subject, Duration::from_secs(60))
        .unwrap()
}

fn signed_store(base: &Path) -> MockMediaStore {
    MockMediaStore::new().with_artifact(
        key("abc", "resize", "100/200"),
        descriptor(base, "resize/abc.png", "image/png", Some(SECRET), 1),
    )
}

// =============================================================================
// Accepted Tokens
// =============================================================================

#[tokio::test]
async fn test_valid_token_serves_artifact() {
    let dir = tempfile::tempdir().unwrap();
    write_file(dir.path(), "resize/abc.png", b"signed pixels");
    let router = build_router(
        Arc::new(signed_store(dir.path())),
        FakeBackend::start(UNUSED_REPLY).await.address(),
        IiifSettings::default(),
    )
    .await;

    let uri = format!("/media/art/abc/resize/200/100?token={}", token_for(SUBJECT));
    let response = router.oneshot(get(&uri)).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_bytes(response).await, b"signed pixels");
}

#[tokio::test]
async fn test_auth_parameter_is_accepted() {
    let dir = tempfile::tempdir().unwrap();
    write_file(dir.path(), "resize/abc.png", b"signed pixels");
    let router = build_router(
        Arc::new(signed_store(dir.path())),
        FakeBackend::start(UNUSED_REPLY).await.address(),
        IiifSettings::default(),
    )
    .await;

    let uri = format!("/media/art/abc/resize/200/100?auth={}", token_for(SUBJECT));
    let response = router.oneshot(get(&uri)).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_subject_comparison_ignores_case() {
    let dir = tempfile::tempdir().unwrap();
    write_file(dir.path(), "resize/abc.png", b"signed pixels");
    let router = build_router(
        Arc::new(signed_store(dir.path())),
        FakeBackend::start(UNUSED_REPLY).await.address(),
        IiifSettings::default(),
    )
    .await;

    let token = token_for("MEDIA/Art/ABC/resize/100/200");
    let uri = format!("/media/Art/abc/resize/200/100?token={}", token);
    let response = router.oneshot(get(&uri)).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}

// =============================================================================
// Rejected Tokens
// =============================================================================

#[tokio::test]
async fn test_missing_token_is_forbidden_without_io() {
    // The artifact file does not exist: a 404 would mean the file was touched
    let dir = tempfile::tempdir().unwrap();
    let backend = FakeBackend::start(UNUSED_REPLY).await;
    let router = build_router(
        Arc::new(signed_store(dir.path())),
        backend.address(),
        IiifSettings::default(),
    )
    .await;

    let response = router
        .oneshot(get("/media/art/abc/resize/200/100"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(body_json(response).await["error"], "missing_token");
    assert_eq!(backend.connection_count(), 0);
}

#[tokio::test]
async fn test_wrong_secret_is_forbidden() {
    let dir = tempfile::tempdir().unwrap();
    let backend = FakeBackend::start(UNUSED_REPLY).await;
    let router = build_router(
        Arc::new(signed_store(dir.path())),
        backend.address(),
        IiifSettings::default(),
    )
    .await;

    let token = TokenAuthority::new()
        .issue("other", SUBJECT, Duration::from_secs(60))
        .unwrap();
    let uri = format!("/media/art/abc/resize/200/100?token={}", token);
    let response = router.oneshot(get(&uri)).await.unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(body_json(response).await["error"], "forbidden");
    assert_eq!(backend.connection_count(), 0);
}

#[tokio::test]
async fn test_expired_token_is_forbidden() {
    let dir = tempfile::tempdir().unwrap();
    write_file(dir.path(), "resize/abc.png", b"signed pixels");
    let router = build_router(
        Arc::new(signed_store(dir.path())),
        FakeBackend::start(UNUSED_REPLY).await.address(),
        IiifSettings::default(),
    )
    .await;

    let token = TokenAuthority::new()
        .issue_with_expiry(SECRET, SUBJECT, 1)
        .unwrap();
    let uri = format!("/media/art/abc/resize/200/100?token={}", token);
    let response = router.oneshot(get(&uri)).await.unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_token_for_other_resource_is_forbidden() {
    let dir = tempfile::tempdir().unwrap();
    write_file(dir.path(), "resize/abc.png", b"signed pixels");
    let router = build_router(
        Arc::new(signed_store(dir.path())),
        FakeBackend::start(UNUSED_REPLY).await.address(),
        IiifSettings::default(),
    )
    .await;

    let token = token_for("media/art/abc/resize/100/300");
    let uri = format!("/media/art/abc/resize/200/100?token={}", token);
    let response = router.oneshot(get(&uri)).await.unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_token_parameter_takes_priority_over_auth() {
    let dir = tempfile::tempdir().unwrap();
    write_file(dir.path(), "resize/abc.png", b"signed pixels");
    let router = build_router(
        Arc::new(signed_store(dir.path())),
        FakeBackend::start(UNUSED_REPLY).await.address(),
        IiifSettings::default(),
    )
    .await;

    let uri = format!(
        "/media/art/abc/resize/200/100?auth={}&token=bogus",
        token_for(SUBJECT)
    );
    let response = router.oneshot(get(&uri)).await.unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_unsigned_artifact_ignores_token() {
    let dir = tempfile::tempdir().unwrap();
    write_file(dir.path(), "open.png", b"open");
    let store = MockMediaStore::new().with_artifact(
        key("abc", "resize", "100"),
        descriptor(dir.path(), "open.png", "image/png", None, 1),
    );
    let router = build_router(
        Arc::new(store),
        FakeBackend::start(UNUSED_REPLY).await.address(),
        IiifSettings::default(),
    )
    .await;

    let response = router
        .oneshot(get("/media/art/abc/resize/100?token=garbage"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}
