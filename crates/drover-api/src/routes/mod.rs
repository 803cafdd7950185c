//! HTTP route handlers.

pub mod agents;
pub mod nodes;
pub mod policies;
pub mod repositories;
pub mod runs;

use std::sync::Arc;

use axum::Router;

use crate::server::AppState;

/// `/api/v1/agents` routes (node-authenticated pull protocol).
pub fn agent_routes() -> Router<Arc<AppState>> {
    agents::routes()
}

/// `/api/v1` operator routes (admin-authenticated).
pub fn admin_routes() -> Router<Arc<AppState>> {
    Router::new()
        .merge(nodes::routes())
        .merge(policies::routes())
        .merge(repositories::routes())
        .merge(runs::routes())
}
