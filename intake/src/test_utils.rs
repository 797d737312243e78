//! Test helpers: configs rooted in a temp directory and in-process test servers.

use std::path::Path;
use std::sync::Arc;

use axum_test::TestServer;
use tempfile::TempDir;

use crate::{
    AppState, build_router,
    config::Config,
    limits::UploadLimiter,
    storage::{FileStore, LocalFileStore},
};

pub fn create_test_config(root: &Path) -> Config {
    let mut config = Config::default();
    config.host = "127.0.0.1".to_string();
    config.port = 0;
    config.storage.root = root.to_path_buf();
    config
}

fn server_for(state: AppState) -> TestServer {
    let router = build_router(&state).expect("Failed to build router");
    TestServer::new(router).expect("Failed to create test server")
}

/// Server backed by a [`LocalFileStore`] in a fresh temp directory. Keep the `TempDir` alive for
/// the test's duration.
pub fn create_test_server(configure: impl FnOnce(&mut Config)) -> (TestServer, TempDir) {
    create_test_server_with_store(configure, |config| Arc::new(LocalFileStore::from_config(&config.storage)))
}

pub fn create_test_server_with_store(
    configure: impl FnOnce(&mut Config),
    store: impl FnOnce(&Config) -> Arc<dyn FileStore>,
) -> (TestServer, TempDir) {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let mut config = create_test_config(dir.path());
    configure(&mut config);

    let state = AppState::builder()
        .config(config.clone())
        .store(store(&config))
        .maybe_upload_limiter(UploadLimiter::from_config(&config.limits.uploads))
        .build();

    (server_for(state), dir)
}

/// Server whose uploads go through a limiter the test controls.
pub fn create_test_server_with_limiter(limiter: Arc<UploadLimiter>) -> (TestServer, TempDir) {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let config = create_test_config(dir.path());

    let state = AppState::builder()
        .config(config.clone())
        .store(Arc::new(LocalFileStore::from_config(&config.storage)))
        .upload_limiter(limiter)
        .build();

    (server_for(state), dir)
}
