//! Run history routes (read-only; runs are appended by agents).
//!
//! ## Routes
//!
//! - `GET /runs` - List runs, newest first, optionally filtered by node
//! - `GET /runs/{id}` - Get a run

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use drover_core::model::{ReconciliationRun, RunStatus};

use crate::auth::AdminContext;
use crate::error::ApiError;
use crate::server::AppState;

/// Query parameters for listing runs.
#[derive(Debug, Deserialize)]
pub struct ListRunsQuery {
    /// Restrict to runs reported by this node.
    #[serde(default)]
    pub node_id: Option<Uuid>,
}

/// Run representation.
#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct RunResponse {
    /// Run ID.
    pub id: Uuid,
    /// The reporting node.
    pub node_id: Uuid,
    /// The policy that was applied.
    pub policy_id: Uuid,
    /// Commit the node applied, when known.
    pub git_commit: Option<String>,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the run finished.
    pub finished_at: Option<DateTime<Utc>>,
    /// Reported outcome.
    pub status: RunStatus,
    /// Summary or error message.
    pub summary: Option<String>,
}

impl From<ReconciliationRun> for RunResponse {
    fn from(run: ReconciliationRun) -> Self {
        Self {
            id: run.id,
            node_id: run.node_id,
            policy_id: run.policy_id,
            git_commit: run.git_commit,
            started_at: run.started_at,
            finished_at: run.finished_at,
            status: run.status,
            summary: run.summary,
        }
    }
}

/// List runs response.
#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct ListRunsResponse {
    /// Runs, newest first.
    pub runs: Vec<RunResponse>,
}

/// Creates run routes.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/runs", get(list_runs))
        .route("/runs/:id", get(get_run))
}

/// List runs.
///
/// GET /api/v1/runs?node_id=...
async fn list_runs(
    _: AdminContext,
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListRunsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let runs = state.service.store().list_runs(query.node_id).await?;
    Ok(Json(ListRunsResponse {
        runs: runs.into_iter().map(RunResponse::from).collect(),
    }))
}

/// Get a run by ID.
///
/// GET /api/v1/runs/{id}
async fn get_run(
    _: AdminContext,
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let run = state.service.store().get_run(id).await?;
    Ok(Json(RunResponse::from(run)))
}
