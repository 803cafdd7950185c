//! Repository administration routes.
//!
//! ## Routes
//!
//! - `POST   /repositories` - Register a repository
//! - `GET    /repositories` - List repositories
//! - `GET    /repositories/{id}` - Get a repository
//! - `DELETE /repositories/{id}` - Delete a repository and its checkout
//! - `POST   /repositories/{id}/sync` - Synchronize the working copy now
//! - `GET    /repositories/{id}/status` - Local checkout status

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use drover_core::model::GitRepository;

use crate::auth::AdminContext;
use crate::error::ApiError;
use crate::server::AppState;

/// Request to register a repository.
#[derive(Debug, Deserialize)]
#[cfg_attr(test, derive(serde::Serialize))]
pub struct CreateRepositoryRequest {
    /// Display name (must be unique).
    pub name: String,
    /// Clone URL.
    pub url: String,
    /// Branch used when a policy carries no override.
    pub default_branch: String,
}

/// Repository representation.
#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct RepositoryResponse {
    /// Repository ID.
    pub id: Uuid,
    /// Display name.
    pub name: String,
    /// Clone URL.
    pub url: String,
    /// Default branch.
    pub default_branch: String,
}

impl From<GitRepository> for RepositoryResponse {
    fn from(repository: GitRepository) -> Self {
        Self {
            id: repository.id,
            name: repository.name,
            url: repository.url,
            default_branch: repository.default_branch,
        }
    }
}

/// List repositories response.
#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct ListRepositoriesResponse {
    /// All repositories, sorted by name.
    pub repositories: Vec<RepositoryResponse>,
}

/// Result of an on-demand synchronization.
#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct SyncResponse {
    /// Commit the working copy is at after the sync.
    pub commit: String,
    /// Whether the sync changed the checked-out commit.
    pub changed: bool,
}

/// Local checkout status.
#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct RepositoryStatusResponse {
    /// Whether a local checkout exists.
    pub synchronized: bool,
    /// Checked-out commit, when synchronized.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit: Option<String>,
    /// Checked-out branch, when synchronized.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    /// Last synchronization time, when synchronized.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_synced_at: Option<DateTime<Utc>>,
}

/// Creates repository routes.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/repositories",
            post(create_repository).get(list_repositories),
        )
        .route(
            "/repositories/:id",
            get(get_repository).delete(delete_repository),
        )
        .route("/repositories/:id/sync", post(sync_repository))
        .route("/repositories/:id/status", get(repository_status))
}

/// Register a repository.
///
/// POST /api/v1/repositories
async fn create_repository(
    _: AdminContext,
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateRepositoryRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let repository = state
        .service
        .create_repository(&req.name, &req.url, &req.default_branch)
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(RepositoryResponse::from(repository)),
    ))
}

/// List all repositories.
///
/// GET /api/v1/repositories
async fn list_repositories(
    _: AdminContext,
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    let repositories = state.service.store().list_repositories().await?;
    Ok(Json(ListRepositoriesResponse {
        repositories: repositories
            .into_iter()
            .map(RepositoryResponse::from)
            .collect(),
    }))
}

/// Get a repository by ID.
///
/// GET /api/v1/repositories/{id}
async fn get_repository(
    _: AdminContext,
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let repository = state.service.store().get_repository(id).await?;
    Ok(Json(RepositoryResponse::from(repository)))
}

/// Delete a repository record and its local checkout.
///
/// DELETE /api/v1/repositories/{id}
async fn delete_repository(
    _: AdminContext,
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    if state.service.delete_repository(id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::not_found(format!("repository not found: {id}")))
    }
}

/// Synchronize the working copy now.
///
/// POST /api/v1/repositories/{id}/sync
async fn sync_repository(
    _: AdminContext,
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let outcome = state.service.sync_repository(id).await?;
    Ok(Json(SyncResponse {
        commit: outcome.commit,
        changed: outcome.changed,
    }))
}

/// Local checkout status.
///
/// GET /api/v1/repositories/{id}/status
async fn repository_status(
    _: AdminContext,
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let status = state.service.repository_status(id).await?;
    let response = match status {
        Some(status) => RepositoryStatusResponse {
            synchronized: true,
            commit: Some(status.commit),
            branch: Some(status.branch),
            last_synced_at: Some(status.last_synced_at),
        },
        None => RepositoryStatusResponse {
            synchronized: false,
            commit: None,
            branch: None,
            last_synced_at: None,
        },
    };
    Ok(Json(response))
}
