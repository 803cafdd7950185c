//! Policy administration routes.
//!
//! ## Routes
//!
//! - `POST   /policies` - Create a policy
//! - `GET    /policies` - List policies
//! - `GET    /policies/{id}` - Get a policy
//! - `DELETE /policies/{id}` - Delete a policy

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use drover_core::model::Policy;

use crate::auth::AdminContext;
use crate::error::ApiError;
use crate::server::AppState;

/// Request to create a policy.
#[derive(Debug, Deserialize)]
#[cfg_attr(test, derive(serde::Serialize))]
pub struct CreatePolicyRequest {
    /// Policy name (must be unique).
    pub name: String,
    /// The repository the configuration lives in. Must exist.
    pub repository_id: Uuid,
    /// Branch override. Defaults to the repository's default branch.
    #[serde(default)]
    pub branch: Option<String>,
    /// Path of the configuration entry point, relative to the repository
    /// root. Must not be absolute or contain `..` segments.
    pub config_path: String,
}

/// Policy representation.
#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct PolicyResponse {
    /// Policy ID.
    pub id: Uuid,
    /// Policy name.
    pub name: String,
    /// Owning repository.
    pub repository_id: Uuid,
    /// Branch override, if set.
    pub branch: Option<String>,
    /// Configuration entry-point path.
    pub config_path: String,
}

impl From<Policy> for PolicyResponse {
    fn from(policy: Policy) -> Self {
        Self {
            id: policy.id,
            name: policy.name,
            repository_id: policy.repository_id,
            branch: policy.branch,
            config_path: policy.config_path,
        }
    }
}

/// List policies response.
#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct ListPoliciesResponse {
    /// All policies, sorted by name.
    pub policies: Vec<PolicyResponse>,
}

/// Creates policy routes.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/policies", post(create_policy).get(list_policies))
        .route("/policies/:id", get(get_policy).delete(delete_policy))
}

/// Create a policy.
///
/// POST /api/v1/policies
async fn create_policy(
    _: AdminContext,
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreatePolicyRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let policy = state
        .service
        .create_policy(&req.name, req.repository_id, req.branch, &req.config_path)
        .await?;
    Ok((StatusCode::CREATED, Json(PolicyResponse::from(policy))))
}

/// List all policies.
///
/// GET /api/v1/policies
async fn list_policies(
    _: AdminContext,
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    let policies = state.service.store().list_policies().await?;
    Ok(Json(ListPoliciesResponse {
        policies: policies.into_iter().map(PolicyResponse::from).collect(),
    }))
}

/// Get a policy by ID.
///
/// GET /api/v1/policies/{id}
async fn get_policy(
    _: AdminContext,
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let policy = state.service.store().get_policy(id).await?;
    Ok(Json(PolicyResponse::from(policy)))
}

/// Delete a policy.
///
/// Nodes referencing it keep their assignment; the dangling reference
/// resolves to "nothing assigned".
///
/// DELETE /api/v1/policies/{id}
async fn delete_policy(
    _: AdminContext,
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    if state.service.store().delete_policy(id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::not_found(format!("policy not found: {id}")))
    }
}
