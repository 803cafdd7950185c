//! API server implementation.
//!
//! Wires the store, repository cache, and package builder into a router
//! and serves it.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::http::{HeaderValue, Method, header};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use drover_core::store::{MemoryStore, Store};
use drover_core::token::{TokenAuthenticator, TokenConfig};
use drover_core::{Error, Result};
use drover_repo::{CacheConfig, GitCli, PackageBuilder, PackageConfig, RepositoryCache};

use crate::config::{Config, CorsConfig};
use crate::service::ReconciliationService;

/// Health check response.
#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct HealthResponse {
    /// Service status.
    pub status: String,
}

/// Shared application state for all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Server configuration.
    pub config: Config,
    /// The reconciliation service.
    pub service: Arc<ReconciliationService>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("config", &self.config)
            .field("service", &"<ReconciliationService>")
            .finish()
    }
}

/// Health check endpoint handler.
///
/// Returns 200 OK if the service is alive; a shallow check with no
/// dependency probing.
async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

/// The drover API server.
pub struct Server {
    config: Config,
    store: Arc<dyn Store>,
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("config", &self.config)
            .field("store", &"<Store>")
            .finish()
    }
}

impl Server {
    /// Creates a new server with the in-memory store.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self {
            config,
            store: Arc::new(MemoryStore::new()),
        }
    }

    /// Creates a new server with an explicit store.
    #[must_use]
    pub fn with_store(config: Config, store: Arc<dyn Store>) -> Self {
        Self { config, store }
    }

    /// Returns the server configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Creates the router with all routes and middleware.
    fn create_router(&self) -> Router {
        let git = GitCli::new(self.config.git.to_timeouts());
        let cache = Arc::new(RepositoryCache::new(
            CacheConfig {
                root: self.config.repos_root.clone(),
            },
            git.clone(),
        ));
        let packages = PackageBuilder::new(
            PackageConfig {
                repos_root: self.config.repos_root.clone(),
                max_payload_bytes: self.config.max_payload_bytes,
            },
            git,
        );
        let tokens = TokenAuthenticator::new(TokenConfig {
            token_bytes: self.config.node_token_bytes,
        });
        let service = Arc::new(ReconciliationService::new(
            Arc::clone(&self.store),
            cache,
            packages,
            tokens,
        ));

        let state = Arc::new(AppState {
            config: self.config.clone(),
            service,
        });

        let cors = Self::build_cors_layer(&self.config.cors);

        Router::new()
            .route("/health", get(health))
            .nest("/api/v1", crate::routes::agent_routes())
            .nest("/api/v1", crate::routes::admin_routes())
            .layer(cors)
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }

    fn build_cors_layer(cors_config: &CorsConfig) -> CorsLayer {
        let cors = CorsLayer::new()
            .allow_methods([
                Method::GET,
                Method::POST,
                Method::PUT,
                Method::DELETE,
                Method::OPTIONS,
            ])
            .allow_headers([
                header::CONTENT_TYPE,
                header::ACCEPT,
                header::HeaderName::from_static(crate::auth::ADMIN_KEY_HEADER),
                header::HeaderName::from_static(crate::auth::NODE_NAME_HEADER),
                header::HeaderName::from_static(crate::auth::NODE_TOKEN_HEADER),
            ])
            .expose_headers([
                header::CONTENT_TYPE,
                header::CONTENT_DISPOSITION,
                header::HeaderName::from_static(crate::routes::agents::COMMIT_HASH_HEADER),
                header::HeaderName::from_static(crate::routes::agents::PACKAGE_DIGEST_HEADER),
            ])
            .max_age(Duration::from_secs(cors_config.max_age_seconds));

        if cors_config.allowed_origins.is_empty() {
            return cors;
        }
        if cors_config.allowed_origins.iter().any(|o| o == "*") {
            return cors.allow_origin(Any);
        }

        let origins: Vec<HeaderValue> = cors_config
            .allowed_origins
            .iter()
            .filter_map(|origin| match HeaderValue::from_str(origin) {
                Ok(value) => Some(value),
                Err(_) => {
                    tracing::error!(origin = %origin, "invalid CORS origin; skipping");
                    None
                }
            })
            .collect();
        if origins.is_empty() {
            tracing::warn!("all configured CORS origins were invalid; CORS disabled");
            cors
        } else {
            cors.allow_origin(AllowOrigin::list(origins))
        }
    }

    /// Starts the server and blocks until shutdown.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the port cannot
    /// be bound.
    pub async fn serve(&self) -> Result<()> {
        self.config.validate()?;

        let addr = SocketAddr::from(([0, 0, 0, 0], self.config.http_port));
        let router = self.create_router();

        tracing::info!(
            http_port = self.config.http_port,
            repos_root = %self.config.repos_root.display(),
            "starting drover API server"
        );

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| Error::Internal(format!("failed to bind to {addr}: {e}")))?;

        axum::serve(listener, router)
            .await
            .map_err(|e| Error::Internal(format!("server error: {e}")))?;

        Ok(())
    }

    /// Creates a router without binding a port, for integration tests.
    #[doc(hidden)]
    pub fn test_router(&self) -> Router {
        self.create_router()
    }
}
