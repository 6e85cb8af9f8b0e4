//! Dispatch tests for cached artifacts served from disk.
//!
//! Tests verify:
//! - Canonical lookup (sorted parameters, case-insensitive collection)
//! - Range support and response headers
//! - Missing files and directories
//! - Health and fallback routes

use axum::http::{header, StatusCode};
use std::sync::Arc;
use tower::ServiceExt;

use media_gateway::IiifSettings;

use super::test_utils::{
    body_bytes, body_json, build_router, closed_address, descriptor, get, key, write_file,
    FakeBackend, MockMediaStore,
};

const NO_BACKEND_REPLY: &str = "Status: 500 Internal Server Error\r\n\r\nunexpected";

// =============================================================================
// Cached Artifacts
// =============================================================================

#[tokio::test]
async fn test_cached_artifact_served_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    write_file(dir.path(), "resize/abc.png", b"pixels");

    let store = Arc::new(MockMediaStore::new().with_artifact(
        key("abc", "resize", "100/200"),
        descriptor(dir.path(), "resize/abc.png", "image/png", None, 1),
    ));
    let backend = FakeBackend::start(NO_BACKEND_REPLY).await;
    let router = build_router(store.clone(), backend.address(), IiifSettings::default()).await;

    // Parameters arrive unsorted; the lookup key is canonical
    let response = router
        .oneshot(get("/media/art/abc/resize/200/100"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "image/png"
    );
    assert_eq!(body_bytes(response).await, b"pixels");
    assert_eq!(store.lookup_count(), 1);
    assert_eq!(backend.connection_count(), 0);
}

#[tokio::test]
async fn test_collection_name_is_case_insensitive() {
    let dir = tempfile::tempdir().unwrap();
    write_file(dir.path(), "thumb.jpg", b"thumb");

    let store = Arc::new(MockMediaStore::new().with_artifact(
        key("abc", "thumb", ""),
        descriptor(dir.path(), "thumb.jpg", "image/jpeg", None, 1),
    ));
    let router = build_router(
        store,
        media_gateway::FcgiAddress::Tcp(closed_address().await),
        IiifSettings::default(),
    )
    .await;

    let response = router.oneshot(get("/media/ART/abc/thumb")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_bytes(response).await, b"thumb");
}

#[tokio::test]
async fn test_range_request_returns_partial_content() {
    let dir = tempfile::tempdir().unwrap();
    write_file(dir.path(), "clip.mp4", b"0123456789");

    let store = Arc::new(MockMediaStore::new().with_artifact(
        key("abc", "video", ""),
        descriptor(dir.path(), "clip.mp4", "video/mp4", None, 1),
    ));
    let router = build_router(
        store,
        media_gateway::FcgiAddress::Tcp(closed_address().await),
        IiifSettings::default(),
    )
    .await;

    let mut request = get("/media/art/abc/video");
    request
        .headers_mut()
        .insert(header::RANGE, "bytes=2-5".parse().unwrap());
    let response = router.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(
        response.headers().get(header::CONTENT_RANGE).unwrap(),
        "bytes 2-5/10"
    );
    assert_eq!(body_bytes(response).await, b"2345");
}

#[tokio::test]
async fn test_server_and_cors_headers_on_every_response() {
    let dir = tempfile::tempdir().unwrap();
    write_file(dir.path(), "a.txt", b"a");

    let store = Arc::new(MockMediaStore::new().with_artifact(
        key("abc", "text", ""),
        descriptor(dir.path(), "a.txt", "text/plain", None, 1),
    ));
    let router = build_router(
        store,
        media_gateway::FcgiAddress::Tcp(closed_address().await),
        IiifSettings::default(),
    )
    .await;

    for uri in ["/media/art/abc/text", "/nowhere"] {
        let mut request = get(uri);
        request
            .headers_mut()
            .insert(header::ORIGIN, "https://viewer.example".parse().unwrap());
        let response = router.clone().oneshot(request).await.unwrap();

        let server = response.headers().get(header::SERVER).unwrap();
        assert!(server.to_str().unwrap().starts_with("media-gateway/"));
        assert_eq!(
            response
                .headers()
                .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
                .unwrap(),
            "*"
        );
    }
}

// =============================================================================
// Missing Files
// =============================================================================

#[tokio::test]
async fn test_artifact_row_without_file_is_not_found() {
    let dir = tempfile::tempdir().unwrap();

    let store = Arc::new(MockMediaStore::new().with_artifact(
        key("abc", "resize", "100"),
        descriptor(dir.path(), "gone.png", "image/png", None, 1),
    ));
    let backend = FakeBackend::start(NO_BACKEND_REPLY).await;
    let router = build_router(store, backend.address(), IiifSettings::default()).await;

    let response = router.oneshot(get("/media/art/abc/resize/100")).await.unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let json = body_json(response).await;
    assert_eq!(json["error"], "artifact_missing");
    assert_eq!(json["status"], 404);

    // A stale row is not a cache miss
    assert_eq!(backend.connection_count(), 0);
}

#[tokio::test]
async fn test_artifact_pointing_at_directory_is_forbidden() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("folder")).unwrap();

    let store = Arc::new(MockMediaStore::new().with_artifact(
        key("abc", "resize", "100"),
        descriptor(dir.path(), "folder", "image/png", None, 1),
    ));
    let router = build_router(
        store,
        media_gateway::FcgiAddress::Tcp(closed_address().await),
        IiifSettings::default(),
    )
    .await;

    let response = router.oneshot(get("/media/art/abc/resize/100")).await.unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(body_json(response).await["error"], "forbidden");
}

#[tokio::test]
async fn test_store_failure_is_server_error() {
    let store = Arc::new(MockMediaStore::new().failing());
    let backend = FakeBackend::start(NO_BACKEND_REPLY).await;
    let router = build_router(store, backend.address(), IiifSettings::default()).await;

    let response = router.oneshot(get("/media/art/abc/resize/100")).await.unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body_json(response).await["error"], "store_error");
    assert_eq!(backend.connection_count(), 0);
}

// =============================================================================
// Health and Fallback
// =============================================================================

#[tokio::test]
async fn test_health_reports_registry_generation() {
    let store = Arc::new(MockMediaStore::new().with_storage(1, "/data", None));
    let router = build_router(
        store,
        media_gateway::FcgiAddress::Tcp(closed_address().await),
        IiifSettings::default(),
    )
    .await;

    let response = router.oneshot(get("/health")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["generation"], 1);
    assert_eq!(json["collections"], 1);
    assert_eq!(json["storages"], 1);
}

#[tokio::test]
async fn test_unknown_route_is_json_not_found() {
    let store = Arc::new(MockMediaStore::new());
    let router = build_router(
        store,
        media_gateway::FcgiAddress::Tcp(closed_address().await),
        IiifSettings::default(),
    )
    .await;

    let response = router.oneshot(get("/elsewhere/abc")).await.unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await["error"], "not_found");
}
