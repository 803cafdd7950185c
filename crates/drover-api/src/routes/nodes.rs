//! Node administration routes.
//!
//! ## Routes
//!
//! - `POST   /nodes` - Register a node (returns the token once)
//! - `GET    /nodes` - List nodes
//! - `GET    /nodes/{id}` - Get a node
//! - `DELETE /nodes/{id}` - Delete a node
//! - `POST   /nodes/{id}/token` - Regenerate the node's token
//! - `PUT    /nodes/{id}/policy` - Assign or clear the node's policy

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use drover_core::model::{Node, NodeStatus};

use crate::auth::AdminContext;
use crate::error::ApiError;
use crate::server::AppState;

/// Request to register a node.
#[derive(Debug, Deserialize)]
#[cfg_attr(test, derive(serde::Serialize))]
pub struct CreateNodeRequest {
    /// Unique node name (typically the hostname).
    pub name: String,
}

/// Request to assign or clear a node's policy.
#[derive(Debug, Deserialize)]
#[cfg_attr(test, derive(serde::Serialize))]
pub struct AssignPolicyRequest {
    /// Policy to assign; `null` clears the assignment.
    pub policy_id: Option<Uuid>,
}

/// Node representation. Never includes the token hash.
#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct NodeResponse {
    /// Node ID.
    pub id: Uuid,
    /// Node name.
    pub name: String,
    /// Assigned policy, if any.
    pub assigned_policy_id: Option<Uuid>,
    /// Last authenticated contact.
    pub last_seen_at: Option<DateTime<Utc>>,
    /// Status of the most recent run.
    pub last_status: NodeStatus,
}

impl From<Node> for NodeResponse {
    fn from(node: Node) -> Self {
        Self {
            id: node.id,
            name: node.name,
            assigned_policy_id: node.assigned_policy_id,
            last_seen_at: node.last_seen_at,
            last_status: node.last_status,
        }
    }
}

/// Registration response, carrying the one-time plaintext token.
#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct NodeWithTokenResponse {
    /// The node record.
    pub node: NodeResponse,
    /// The plaintext token. Shown exactly once; only a hash is stored.
    pub token: String,
}

/// List nodes response.
#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct ListNodesResponse {
    /// All registered nodes, sorted by name.
    pub nodes: Vec<NodeResponse>,
}

/// Creates node routes.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/nodes", post(create_node).get(list_nodes))
        .route("/nodes/:id", get(get_node).delete(delete_node))
        .route("/nodes/:id/token", post(regenerate_token))
        .route("/nodes/:id/policy", put(assign_policy))
}

/// Register a node.
///
/// POST /api/v1/nodes
async fn create_node(
    _: AdminContext,
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateNodeRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let (node, token) = state.service.register_node(&req.name).await?;
    Ok((
        StatusCode::CREATED,
        Json(NodeWithTokenResponse {
            node: node.into(),
            token,
        }),
    ))
}

/// List all nodes.
///
/// GET /api/v1/nodes
async fn list_nodes(
    _: AdminContext,
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    let nodes = state.service.store().list_nodes().await?;
    Ok(Json(ListNodesResponse {
        nodes: nodes.into_iter().map(NodeResponse::from).collect(),
    }))
}

/// Get a node by ID.
///
/// GET /api/v1/nodes/{id}
async fn get_node(
    _: AdminContext,
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let node = state.service.store().get_node(id).await?;
    Ok(Json(NodeResponse::from(node)))
}

/// Delete a node.
///
/// DELETE /api/v1/nodes/{id}
async fn delete_node(
    _: AdminContext,
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    if state.service.store().delete_node(id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::not_found(format!("node not found: {id}")))
    }
}

/// Regenerate a node's token, invalidating the previous one.
///
/// POST /api/v1/nodes/{id}/token
async fn regenerate_token(
    _: AdminContext,
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let (node, token) = state.service.regenerate_token(id).await?;
    Ok(Json(NodeWithTokenResponse {
        node: node.into(),
        token,
    }))
}

/// Assign or clear a node's policy.
///
/// PUT /api/v1/nodes/{id}/policy
async fn assign_policy(
    _: AdminContext,
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<AssignPolicyRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let node = state.service.assign_policy(id, req.policy_id).await?;
    Ok(Json(NodeResponse::from(node)))
}
