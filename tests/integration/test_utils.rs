//! Test utilities for integration tests.
//!
//! Provides an in-memory store with lookup tracking, a scripted FastCGI
//! responder, a stalling image service and helpers to assemble a router
//! around them.

use async_trait::async_trait;
use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::Request;
use axum::response::Response;
use axum::Router;
use http_body_util::BodyExt;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::RwLock;

use media_gateway::error::StoreError;
use media_gateway::gateway::fcgi::{
    decode_params, end_request_body, read_record, write_record, RecordType,
};
use media_gateway::{
    create_router, AppState, ArtifactDescriptor, ArtifactKey, ArtifactResolver, Catalog,
    Collection, FcgiAddress, FcgiBackend, FcgiTimeouts, IiifProxy, IiifSettings, MediaStore,
    RouterConfig, Storage,
};

/// Collection every test store knows.
pub const COLLECTION: &str = "art";
pub const COLLECTION_ID: i64 = 7;

/// Address the fake client connects from.
pub fn client_addr() -> SocketAddr {
    SocketAddr::from(([203, 0, 113, 7], 51000))
}

// =============================================================================
// Mock Store with Lookup Tracking
// =============================================================================

/// In-memory store counting artifact lookups.
pub struct MockMediaStore {
    collections: Vec<Collection>,
    storages: Vec<Storage>,
    artifacts: HashMap<ArtifactKey, ArtifactDescriptor>,
    lookups: AtomicUsize,
    fail_lookups: AtomicBool,
}

impl MockMediaStore {
    pub fn new() -> Self {
        Self {
            collections: vec![Collection {
                id: COLLECTION_ID,
                name: COLLECTION.to_string(),
            }],
            storages: Vec::new(),
            artifacts: HashMap::new(),
            lookups: AtomicUsize::new(0),
            fail_lookups: AtomicBool::new(false),
        }
    }

    pub fn with_storage(mut self, id: i64, base_location: &str, secret: Option<&str>) -> Self {
        self.storages.push(Storage {
            id,
            name: format!("storage-{}", id),
            base_location: base_location.to_string(),
            secret: secret.map(str::to_string),
        });
        self
    }

    pub fn with_artifact(mut self, key: ArtifactKey, descriptor: ArtifactDescriptor) -> Self {
        self.artifacts.insert(key, descriptor);
        self
    }

    pub fn failing(self) -> Self {
        self.fail_lookups.store(true, Ordering::SeqCst);
        self
    }

    pub fn lookup_count(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MediaStore for MockMediaStore {
    async fn load_collections(&self) -> Result<Vec<Collection>, StoreError> {
        Ok(self.collections.clone())
    }

    async fn load_storages(&self) -> Result<Vec<Storage>, StoreError> {
        Ok(self.storages.clone())
    }

    async fn find_artifact(
        &self,
        key: &ArtifactKey,
    ) -> Result<Option<ArtifactDescriptor>, StoreError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        if self.fail_lookups.load(Ordering::SeqCst) {
            return Err(StoreError::Query("server has gone away".to_string()));
        }
        Ok(self.artifacts.get(key).cloned())
    }
}

/// Key in the test collection.
pub fn key(signature: &str, action: &str, params: &str) -> ArtifactKey {
    ArtifactKey::new(COLLECTION_ID, signature, action, params)
}

/// Descriptor for `relative` under `base`.
pub fn descriptor(
    base: &Path,
    relative: &str,
    mime_type: &str,
    signing_key: Option<&str>,
    storage_id: i64,
) -> ArtifactDescriptor {
    ArtifactDescriptor {
        file_base: base.to_string_lossy().into_owned(),
        relative_path: relative.to_string(),
        mime_type: mime_type.to_string(),
        signing_key: signing_key.map(str::to_string),
        storage_id,
    }
}

/// Write `content` at `relative` below `base`, creating directories.
pub fn write_file(base: &Path, relative: &str, content: &[u8]) {
    let path = base.join(relative);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, content).unwrap();
}

// =============================================================================
// Scripted FastCGI Responder
// =============================================================================

/// How the fake responder answers once a request is in.
#[derive(Clone, Copy)]
enum Script {
    /// STDOUT, then END_REQUEST
    Reply(&'static str),
    /// Nothing at all
    Silent,
    /// STDOUT, then nothing
    Stall(&'static str),
}

/// How long a quiet responder holds its connection open.
const QUIET_FOR: Duration = Duration::from_secs(60);

/// A FastCGI responder answering every request with the same script.
///
/// Records the CGI environment of each request it receives.
pub struct FakeBackend {
    addr: SocketAddr,
    connections: Arc<AtomicUsize>,
    requests: Arc<RwLock<Vec<HashMap<String, String>>>>,
}

impl FakeBackend {
    /// Start a responder replying with `stdout` (CGI headers and body).
    pub async fn start(stdout: &'static str) -> Self {
        Self::spawn(Script::Reply(stdout)).await
    }

    /// Start a responder that reads requests and never answers.
    pub async fn silent() -> Self {
        Self::spawn(Script::Silent).await
    }

    /// Start a responder that sends `stdout` and then goes quiet without
    /// ending the request.
    pub async fn stalling(stdout: &'static str) -> Self {
        Self::spawn(Script::Stall(stdout)).await
    }

    async fn spawn(script: Script) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let connections = Arc::new(AtomicUsize::new(0));
        let requests = Arc::new(RwLock::new(Vec::new()));

        let accepted = Arc::clone(&connections);
        let recorded = Arc::clone(&requests);
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                accepted.fetch_add(1, Ordering::SeqCst);
                let recorded = Arc::clone(&recorded);
                tokio::spawn(async move {
                    let mut params = Vec::new();
                    while let Ok(Some(record)) = read_record(&mut socket).await {
                        match record.record_type {
                            RecordType::Params => params.extend_from_slice(&record.content),
                            RecordType::Stdin if record.content.is_empty() => break,
                            _ => {}
                        }
                    }
                    let env = decode_params(&params).unwrap().into_iter().collect();
                    recorded.write().await.push(env);

                    match script {
                        Script::Reply(stdout) => {
                            write_record(&mut socket, RecordType::Stdout, 1, stdout.as_bytes())
                                .await
                                .unwrap();
                            write_record(&mut socket, RecordType::Stdout, 1, &[])
                                .await
                                .unwrap();
                            write_record(
                                &mut socket,
                                RecordType::EndRequest,
                                1,
                                &end_request_body(0, 0),
                            )
                            .await
                            .unwrap();
                        }
                        Script::Silent => tokio::time::sleep(QUIET_FOR).await,
                        Script::Stall(stdout) => {
                            write_record(&mut socket, RecordType::Stdout, 1, stdout.as_bytes())
                                .await
                                .unwrap();
                            tokio::time::sleep(QUIET_FOR).await;
                        }
                    }
                });
            }
        });

        Self {
            addr,
            connections,
            requests,
        }
    }

    pub fn address(&self) -> FcgiAddress {
        FcgiAddress::Tcp(self.addr.to_string())
    }

    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// CGI environment of the `index`th request.
    pub async fn request(&self, index: usize) -> HashMap<String, String> {
        self.requests.read().await[index].clone()
    }
}

/// An HTTP server that answers with headers and one body chunk, then
/// goes quiet with the response unfinished.
pub async fn stalling_image_service() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut request = [0u8; 4096];
                let _ = socket.read(&mut request).await;
                socket
                    .write_all(
                        b"HTTP/1.1 200 OK\r\n\
                          Content-Type: image/png\r\n\
                          Transfer-Encoding: chunked\r\n\r\n\
                          5\r\nfirst\r\n",
                    )
                    .await
                    .unwrap();
                tokio::time::sleep(QUIET_FOR).await;
            });
        }
    });

    addr
}

/// An address nothing listens on.
pub async fn closed_address() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr.to_string()
}

// =============================================================================
// Router Assembly
// =============================================================================

pub const SCRIPT_FILENAME: &str = "/srv/media/index.php";
pub const SUB_PREFIX: &str = "media/";

/// Backend timeouts used unless a test picks its own.
pub fn backend_timeouts() -> FcgiTimeouts {
    FcgiTimeouts {
        connect: Duration::from_secs(2),
        response: Duration::from_secs(5),
        idle: Duration::from_secs(5),
    }
}

/// Build a router around `store`.
pub async fn build_router(
    store: Arc<MockMediaStore>,
    backend: FcgiAddress,
    iiif: IiifSettings,
) -> Router {
    build_router_with_timeouts(store, backend, iiif, backend_timeouts()).await
}

/// Build a router around `store` with explicit backend timeouts.
pub async fn build_router_with_timeouts(
    store: Arc<MockMediaStore>,
    backend: FcgiAddress,
    iiif: IiifSettings,
    timeouts: FcgiTimeouts,
) -> Router {
    let catalog = Arc::new(Catalog::load(store).await.unwrap());
    let backend = FcgiBackend::new(backend, SCRIPT_FILENAME).with_timeouts(timeouts);
    let state = AppState::new(
        ArtifactResolver::new(catalog),
        backend,
        IiifProxy::new(iiif).unwrap(),
    )
    .with_sub_prefix(SUB_PREFIX);

    create_router(state, RouterConfig::new().with_tracing(false))
}

/// IIIF settings rooted at `local_base`, pointing at `url`.
pub fn iiif_settings(url: &str, local_base: &Path) -> IiifSettings {
    IiifSettings {
        url: url.to_string(),
        local_base: local_base.to_string_lossy().into_owned(),
        alias: "/iiif".to_string(),
        sub_prefix: SUB_PREFIX.to_string(),
        response_timeout: Duration::from_secs(5),
        ..IiifSettings::default()
    }
}

/// GET request carrying the client's connection info.
pub fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .extension(ConnectInfo(client_addr()))
        .body(Body::empty())
        .unwrap()
}

pub async fn body_bytes(response: Response) -> Vec<u8> {
    response
        .into_body()
        .collect()
        .await
        .unwrap()
        .to_bytes()
        .to_vec()
}

pub async fn body_json(response: Response) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}
