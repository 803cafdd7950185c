//! Request authentication extractors.
//!
//! Two independent schemes:
//!
//! - Agents authenticate per node with `X-Node-Name` + `X-Node-Token`. An
//!   unknown name is 404 and a bad token 401, in that order, before any
//!   handler logic runs.
//! - Operators authenticate with the shared `X-Admin-API-Key` secret,
//!   compared in constant time. In debug mode with no key configured the
//!   check is waived.

use std::sync::Arc;

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use drover_core::model::Node;
use drover_core::token::verify_admin_key;

use crate::error::ApiError;
use crate::server::AppState;

/// Header carrying the node's unique name.
pub const NODE_NAME_HEADER: &str = "x-node-name";
/// Header carrying the node's bearer token.
pub const NODE_TOKEN_HEADER: &str = "x-node-token";
/// Header carrying the shared operator secret.
pub const ADMIN_KEY_HEADER: &str = "x-admin-api-key";

fn header<'a>(parts: &'a Parts, name: &str) -> Option<&'a str> {
    parts.headers.get(name).and_then(|v| v.to_str().ok())
}

/// An agent request's authenticated node, extracted from headers.
#[derive(Debug, Clone)]
pub struct AuthenticatedNode(pub Node);

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AuthenticatedNode {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let name = header(parts, NODE_NAME_HEADER)
            .ok_or_else(|| ApiError::unauthorized("X-Node-Name header required"))?
            .to_string();
        let token = header(parts, NODE_TOKEN_HEADER)
            .ok_or_else(|| ApiError::unauthorized("X-Node-Token header required"))?
            .to_string();

        let node = state.service.authenticate_node(&name, &token).await?;
        Ok(Self(node))
    }
}

/// Marker extracted when a request passed the operator check.
#[derive(Debug, Clone, Copy)]
pub struct AdminContext;

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AdminContext {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let Some(configured) = state.config.admin_api_key.as_deref() else {
            if state.config.debug {
                return Ok(Self);
            }
            // validate() should have refused this configuration at startup.
            return Err(ApiError::internal("admin API key not configured"));
        };

        let presented = header(parts, ADMIN_KEY_HEADER)
            .ok_or_else(|| ApiError::unauthorized("X-Admin-API-Key header required"))?;
        if !verify_admin_key(presented, configured) {
            tracing::warn!("admin API key rejected");
            return Err(ApiError::unauthorized("invalid admin API key"));
        }
        Ok(Self)
    }
}
