//! # intake: a small file ingestion service
//!
//! `intake` accepts files over HTTP through two transports and stores each one on local disk under
//! a freshly generated, collision-free name:
//!
//! - **Form transport** (`POST /upload/form`): standard multipart form data, files under the
//!   `files` field.
//! - **Structured transport** (`POST /upload/structured`): a JSON document carrying uploader
//!   metadata and a list of base64-encoded files.
//!
//! Both return a per-file report listing what was stored (generated name, original name, byte
//! size, public path) and what failed and why. A bad file never sinks its siblings; only
//! request-level problems such as an unparseable body, an empty file list or an oversized body
//! reject the whole request.
//!
//! ## Architecture
//!
//! The transport adapters in [`api::handlers::uploads`] normalize a request into an ordered list of
//! pending files and hand it to [`ingest::ingest_batch`], which stores them through a
//! [`storage::FileStore`] with bounded concurrency. [`storage::LocalFileStore`] writes each file to
//! a hidden part file and renames it into place once it is fully on disk, so readers never see a
//! partial upload. Dropping a request (client disconnect) drops its in-flight writes, and their
//! part files are removed.
//!
//! Stored files are served back under `storage.public_path` (default `/uploads`). Concurrent
//! uploads can be capped through [`limits::UploadLimiter`], which answers HTTP 429 when the queue
//! is full.
//!
//! ## Configuration
//!
//! See [`config`] for the YAML file and `INTAKE_*` environment overrides, and [`telemetry`] for
//! logging and optional OTLP trace export.

pub mod api;
pub mod config;
pub mod errors;
pub mod ingest;
pub mod limits;
mod openapi;
pub mod storage;
pub mod telemetry;
#[cfg(test)]
mod test_utils;

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Request},
    http::{self, HeaderValue, StatusCode},
    middleware::{self, Next, from_fn_with_state},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use axum_prometheus::PrometheusMetricLayer;
use bon::Builder;
pub use config::Config;
use config::CorsOrigin;
use tokio::net::TcpListener;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    services::ServeDir,
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::{Level, debug, info, instrument, warn};
use utoipa::OpenApi;
use utoipa_scalar::{Scalar, Servable};

use crate::{
    limits::UploadLimiter,
    openapi::ApiDoc,
    storage::{FileStore, LocalFileStore},
};

/// State shared by every request handler.
///
/// ```ignore
/// let state = AppState::builder()
///     .config(config)
///     .store(Arc::new(LocalFileStore::from_config(&config.storage)))
///     .maybe_upload_limiter(UploadLimiter::from_config(&config.limits.uploads))
///     .build();
/// ```
#[derive(Clone, Builder)]
pub struct AppState {
    pub config: Config,
    pub store: Arc<dyn FileStore>,
    /// None = uploads are not capped
    pub upload_limiter: Option<Arc<UploadLimiter>>,
}

fn create_cors_layer(config: &Config) -> anyhow::Result<CorsLayer> {
    let cors_config = &config.cors;

    let allow_origin = if cors_config
        .allowed_origins
        .iter()
        .any(|origin| matches!(origin, CorsOrigin::Wildcard))
    {
        AllowOrigin::any()
    } else {
        let mut origins = Vec::new();
        for origin in &cors_config.allowed_origins {
            if let CorsOrigin::Url(url) = origin {
                // Browsers send the bare origin, without path or trailing slash
                origins.push(url.origin().ascii_serialization().parse::<HeaderValue>()?);
            }
        }
        AllowOrigin::list(origins)
    };

    let mut cors = CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([http::Method::GET, http::Method::POST])
        .allow_headers([http::header::CONTENT_TYPE]);

    if let Some(max_age) = cors_config.max_age {
        cors = cors.max_age(std::time::Duration::from_secs(max_age));
    }

    Ok(cors)
}

/// Part files live next to finished uploads; never hand them out.
///
/// `ServeDir` percent-decodes the path before it touches the filesystem, so segments are checked
/// in decoded form. A segment that does not decode is refused as well.
async fn hide_partial_files(request: Request, next: Next) -> Response {
    if is_hidden_path(request.uri().path()) {
        return StatusCode::NOT_FOUND.into_response();
    }
    next.run(request).await
}

fn is_hidden_path(path: &str) -> bool {
    path.split('/').any(|segment| match urlencoding::decode(segment) {
        Ok(decoded) => decoded.starts_with('.'),
        Err(_) => true,
    })
}

/// Build the router with every endpoint and middleware.
///
/// Upload routes carry the request body limit and the upload limiter; stored files are mounted
/// under `storage.public_path` when `storage.serve_files` is set.
#[instrument(skip_all)]
pub fn build_router(state: &AppState) -> anyhow::Result<Router> {
    let upload_limits = &state.config.limits.uploads;

    let upload_routes = Router::new()
        .route("/upload/form", post(api::handlers::uploads::upload_form))
        .route("/upload/structured", post(api::handlers::uploads::upload_structured))
        // Paths the existing browser client posts to
        .route("/api/simple-upload", post(api::handlers::uploads::upload_form))
        .route("/api/complex-upload", post(api::handlers::uploads::upload_structured))
        .layer(DefaultBodyLimit::max(upload_limits.max_request_size as usize))
        .route_layer(from_fn_with_state(state.clone(), limits::limit_uploads))
        .with_state(state.clone());

    let mut router = Router::new()
        .route("/healthz", get(|| async { "OK" }))
        .route("/openapi.json", get(|| async { Json(ApiDoc::openapi()) }))
        .merge(Scalar::with_url("/docs", ApiDoc::openapi()))
        .merge(upload_routes);

    let storage = &state.config.storage;
    if storage.serve_files {
        let public_path = storage.public_path.trim_end_matches('/');
        let files = tower::ServiceBuilder::new()
            .layer(middleware::from_fn(hide_partial_files))
            .service(ServeDir::new(&storage.root));
        router = router.nest_service(public_path, files);
        debug!("Serving stored files from {} at {}", storage.root.display(), public_path);
    }

    let cors_layer = create_cors_layer(&state.config)?;
    router = router.layer(cors_layer);

    if state.config.enable_metrics {
        let (prometheus_layer, metric_handle) = PrometheusMetricLayer::pair();
        router = router
            .route("/internal/metrics", get(|| async move { metric_handle.render() }))
            .layer(prometheus_layer);
    }

    let router = router.layer(
        TraceLayer::new_for_http()
            .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
            .on_request(DefaultOnRequest::new().level(Level::INFO))
            .on_response(DefaultOnResponse::new().level(Level::INFO)),
    );

    Ok(router)
}

pub struct Application {
    router: Router,
    config: Config,
}

impl Application {
    /// Prepare local storage and build the router.
    ///
    /// Part files left by an earlier process that died mid-write are removed first.
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        debug!("Starting intake with configuration: {:#?}", config);

        let store = LocalFileStore::from_config(&config.storage);
        match store.sweep_partial_files().await {
            Ok(0) => {}
            Ok(removed) => info!("Removed {} stale part file(s) from {}", removed, store.root().display()),
            Err(e) => warn!("Could not sweep stale part files from {}: {}", store.root().display(), e),
        }

        let state = AppState::builder()
            .config(config.clone())
            .store(Arc::new(store))
            .maybe_upload_limiter(UploadLimiter::from_config(&config.limits.uploads))
            .build();

        let router = build_router(&state)?;

        Ok(Self { router, config })
    }

    #[cfg(test)]
    pub fn into_test_server(self) -> axum_test::TestServer {
        axum_test::TestServer::new(self.router).expect("Failed to create test server")
    }

    pub async fn serve<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let bind_addr = self.config.bind_address();
        let listener = TcpListener::bind(&bind_addr).await?;
        info!(
            "intake listening on http://{}, storing uploads in {}",
            bind_addr,
            self.config.storage.root.display()
        );

        axum::serve(listener, self.router).with_graceful_shutdown(shutdown).await?;

        info!("Shutting down telemetry...");
        telemetry::shutdown_telemetry();

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{create_test_config, create_test_server};
    use axum_test::multipart::{MultipartForm, Part};

    #[test_log::test(tokio::test)]
    async fn test_startup_sweeps_partial_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(".0f9c.part"), b"half a file").unwrap();
        std::fs::write(dir.path().join("kept.txt"), b"complete").unwrap();

        let server = Application::new(create_test_config(dir.path()))
            .await
            .unwrap()
            .into_test_server();

        assert!(!dir.path().join(".0f9c.part").exists());
        server.get("/uploads/kept.txt").await.assert_text("complete");
    }

    #[test_log::test(tokio::test)]
    async fn test_startup_with_missing_root() {
        let dir = tempfile::tempdir().unwrap();
        let config = create_test_config(&dir.path().join("not-yet"));

        let server = Application::new(config).await.unwrap().into_test_server();
        server.get("/healthz").await.assert_text("OK");
    }

    #[test_log::test(tokio::test)]
    async fn test_part_files_are_not_served() {
        let (server, dir) = create_test_server(|_| {});
        std::fs::write(dir.path().join(".abc.part"), b"in progress").unwrap();

        server.get("/uploads/.abc.part").await.assert_status_not_found();
        server.get("/uploads/missing.png").await.assert_status_not_found();
    }

    #[test_log::test(tokio::test)]
    async fn test_encoded_part_file_names_are_not_served() {
        let (server, dir) = create_test_server(|_| {});
        std::fs::write(dir.path().join(".abc.part"), b"in progress").unwrap();
        std::fs::write(dir.path().join("done.txt"), b"complete").unwrap();

        server.get("/uploads/%2Eabc.part").await.assert_status_not_found();
        server.get("/uploads/%2eabc.part").await.assert_status_not_found();
        server.get("/uploads/%2E%61bc.part").await.assert_status_not_found();
        // Encoded names that do not start with a dot still resolve
        server.get("/uploads/%64one.txt").await.assert_text("complete");
    }

    #[test]
    fn test_hidden_path_detection() {
        assert!(is_hidden_path("/.abc.part"));
        assert!(is_hidden_path("/%2Eabc.part"));
        assert!(is_hidden_path("/nested/%2e%2e/secret"));
        assert!(is_hidden_path("/%FF%FE"));
        assert!(!is_hidden_path("/abc.part"));
        assert!(!is_hidden_path("/"));
        assert!(!is_hidden_path("/0f9c.png"));
    }

    #[test_log::test(tokio::test)]
    async fn test_serving_can_be_disabled() {
        let (server, dir) = create_test_server(|config| config.storage.serve_files = false);
        std::fs::write(dir.path().join("a.txt"), b"a").unwrap();

        server.get("/uploads/a.txt").await.assert_status_not_found();
    }

    #[test_log::test(tokio::test)]
    async fn test_custom_public_path() {
        let (server, _dir) = create_test_server(|config| config.storage.public_path = "/files/".to_string());

        let form = MultipartForm::new().add_part("files", Part::bytes(b"hi".to_vec()).file_name("hi.txt"));
        let body: serde_json::Value = server.post("/upload/form").multipart(form).await.json();

        let path = body["files"][0]["path"].as_str().unwrap();
        assert!(path.starts_with("/files/"));
        server.get(path).await.assert_text("hi");
    }

    #[test_log::test(tokio::test)]
    async fn test_openapi_and_docs() {
        let (server, _dir) = create_test_server(|_| {});

        let response = server.get("/openapi.json").await;
        assert_eq!(response.status_code().as_u16(), 200);
        let content = response.text();
        assert!(content.contains("\"openapi\""));
        assert!(content.contains("/upload/structured"));

        assert_eq!(server.get("/docs").await.status_code().as_u16(), 200);
    }

    #[test_log::test(tokio::test)]
    async fn test_cors_preflight_for_allowed_origin() {
        let (server, _dir) = create_test_server(|_| {});

        let response = server
            .method(http::Method::OPTIONS, "/upload/structured")
            .add_header("origin", "http://localhost:3000")
            .add_header("access-control-request-method", "POST")
            .add_header("access-control-request-headers", "content-type")
            .await;

        assert_eq!(response.header("access-control-allow-origin"), "http://localhost:3000");
    }

    #[test_log::test(tokio::test)]
    async fn test_metrics_endpoint() {
        let (server, _dir) = create_test_server(|config| config.enable_metrics = true);

        server.get("/healthz").await.assert_status_ok();
        server.get("/internal/metrics").await.assert_status_ok();
    }

    #[test]
    fn test_wildcard_cors_layer_builds() {
        let mut config = Config::default();
        config.cors.allowed_origins = vec![
            CorsOrigin::Wildcard,
            CorsOrigin::Url("https://app.example.com".parse().unwrap()),
        ];
        assert!(create_cors_layer(&config).is_ok());
    }
}
