//! gitdoc web server and REST API.
//!
//! Provides an Axum-based HTTP server with:
//! - Document CRUD, history and version endpoints
//! - Fork, merge and conflict resolution endpoints
//! - A health endpoint

pub mod api;
pub mod locks;

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::http::{header, Method};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use gitdoc_core::config::AppConfig;
use gitdoc_core::DocumentStore;

use crate::locks::DocumentLocks;

/// Shared application state accessible from all handlers.
pub struct AppState {
    pub store: DocumentStore,
    pub config: AppConfig,
    /// Serializes access per document id.
    pub locks: DocumentLocks,
}

/// The web server.
pub struct WebServer {
    state: Arc<AppState>,
}

impl WebServer {
    /// Create a web server over the storage described by `config`.
    pub fn new(config: AppConfig) -> Self {
        let store = DocumentStore::new(config.storage.clone());
        Self::with_store(config, store)
    }

    /// Create a web server over an already configured store (e.g. with hooks).
    pub fn with_store(config: AppConfig, store: DocumentStore) -> Self {
        let state = Arc::new(AppState {
            store,
            config,
            locks: DocumentLocks::default(),
        });
        Self { state }
    }

    /// Build the router with all routes and middleware.
    pub fn router(&self) -> Router {
        let cors = CorsLayer::new()
            .allow_origin(tower_http::cors::Any)
            .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
            .allow_headers([header::CONTENT_TYPE]);

        Router::new()
            .merge(api::status::routes())
            .merge(api::documents::routes())
            .merge(api::merges::routes())
            .layer(DefaultBodyLimit::max(self.state.config.server.body_limit_bytes))
            .layer(TraceLayer::new_for_http())
            .layer(cors)
            .with_state(Arc::clone(&self.state))
    }

    /// Serve on `listen_addr` until `shutdown` resolves.
    pub async fn start<F>(self, listen_addr: &str, shutdown: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr: SocketAddr = listen_addr.parse()?;
        let app = self.router();

        info!(addr = %addr, "starting web server");

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await?;

        info!("web server stopped");
        Ok(())
    }
}
