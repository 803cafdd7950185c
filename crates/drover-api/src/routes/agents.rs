//! Agent pull-protocol routes.
//!
//! All endpoints require node authentication (`X-Node-Name` +
//! `X-Node-Token`); see [`crate::auth::AuthenticatedNode`].
//!
//! ## Routes
//!
//! - `GET  /agents/desired-state` - What the node should be applying
//! - `GET  /agents/package` - Download the configuration package
//! - `POST /agents/runs` - Report a reconciliation run
//! - `POST /agents/heartbeat` - Liveness ping

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::Router;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use drover_core::model::RunStatus;

use crate::auth::AuthenticatedNode;
use crate::error::ApiError;
use crate::server::AppState;
use crate::service::RunReport;

/// Response header carrying the packaged commit hash.
pub const COMMIT_HASH_HEADER: &str = "x-commit-hash";
/// Response header carrying the package content digest.
pub const PACKAGE_DIGEST_HEADER: &str = "x-package-digest";
/// Where an assigned node fetches its package; advertised in the
/// desired-state response so agents need not hard-code the route.
pub const PACKAGE_ROUTE: &str = "/api/v1/agents/package";

/// Policy summary in a desired-state response.
#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct PolicySummary {
    /// Policy ID.
    pub id: Uuid,
    /// Policy name.
    pub name: String,
    /// Effective branch (policy override or repository default).
    pub branch: String,
    /// Configuration entry-point path.
    pub config_path: String,
}

/// Repository summary in a desired-state response.
#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct RepositorySummary {
    /// Repository ID.
    pub id: Uuid,
    /// Repository name.
    pub name: String,
}

/// Desired-state response.
#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct DesiredStateResponse {
    /// Whether a resolvable policy is assigned.
    pub assigned: bool,
    /// The reporting node's ID.
    pub node_id: Uuid,
    /// The reporting node's name.
    pub node_name: String,
    /// The assigned policy, when resolvable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy: Option<PolicySummary>,
    /// The policy's repository, when resolvable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repository: Option<RepositorySummary>,
    /// Package download path, populated when assigned.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub package_url: Option<String>,
}

/// Run report request body.
#[derive(Debug, Deserialize)]
#[cfg_attr(test, derive(serde::Serialize))]
pub struct RunReportRequest {
    /// The policy the run was executed against.
    pub policy_id: Uuid,
    /// Reported outcome.
    pub status: RunStatus,
    /// Commit the agent applied, when known.
    #[serde(default)]
    pub git_commit: Option<String>,
    /// When the run started. Defaults to receipt time.
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    /// Human-readable summary or error message.
    #[serde(default)]
    pub summary: Option<String>,
}

/// Run report response.
#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct RunReportResponse {
    /// Always true on success.
    pub ok: bool,
    /// ID of the recorded run.
    pub run_id: Uuid,
    /// Confirmation message.
    pub message: String,
}

/// Heartbeat response.
#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct HeartbeatResponse {
    /// Always true on success.
    pub ok: bool,
    /// Server time at receipt.
    pub server_time: DateTime<Utc>,
    /// The node's ID.
    pub node_id: Uuid,
    /// The node's name.
    pub node_name: String,
}

/// Creates agent routes.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/agents/desired-state", get(desired_state))
        .route("/agents/package", get(download_package))
        .route("/agents/runs", post(report_run))
        .route("/agents/heartbeat", post(heartbeat))
}

/// What the node should currently be applying.
///
/// GET /api/v1/agents/desired-state
async fn desired_state(
    AuthenticatedNode(node): AuthenticatedNode,
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    let resolved = state.service.resolve_desired_state(&node).await?;

    let (policy, repository) = match (resolved.policy, resolved.repository) {
        (Some(policy), Some(repository)) => {
            let branch = policy
                .branch
                .clone()
                .unwrap_or_else(|| repository.default_branch.clone());
            (
                Some(PolicySummary {
                    id: policy.id,
                    name: policy.name,
                    branch,
                    config_path: policy.config_path,
                }),
                Some(RepositorySummary {
                    id: repository.id,
                    name: repository.name,
                }),
            )
        }
        _ => (None, None),
    };

    let package_url = resolved.assigned.then(|| PACKAGE_ROUTE.to_string());

    Ok(Json(DesiredStateResponse {
        assigned: resolved.assigned,
        node_id: node.id,
        node_name: node.name,
        policy,
        repository,
        package_url,
    }))
}

/// Download the node's configuration package.
///
/// GET /api/v1/agents/package
///
/// Responds with `application/gzip` bytes; the packaged commit and the
/// archive digest travel in `X-Commit-Hash` and `X-Package-Digest`.
async fn download_package(
    AuthenticatedNode(node): AuthenticatedNode,
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    let package = state.service.prepare_package(&node).await?;

    let commit8 = &package.commit[..package.commit.len().min(8)];
    let filename = format!("config-{}-{commit8}.tar.gz", node.name);

    Ok((
        [
            (header::CONTENT_TYPE.as_str(), "application/gzip".to_string()),
            (
                header::CONTENT_DISPOSITION.as_str(),
                format!("attachment; filename=\"{filename}\""),
            ),
            (COMMIT_HASH_HEADER, package.commit.clone()),
            (PACKAGE_DIGEST_HEADER, package.digest.clone()),
        ],
        package.bytes,
    ))
}

/// Report a reconciliation run.
///
/// POST /api/v1/agents/runs
async fn report_run(
    AuthenticatedNode(node): AuthenticatedNode,
    State(state): State<Arc<AppState>>,
    Json(req): Json<RunReportRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let run = state
        .service
        .report_run(
            &node,
            RunReport {
                policy_id: req.policy_id,
                status: req.status,
                git_commit: req.git_commit,
                started_at: req.started_at,
                summary: req.summary,
            },
        )
        .await?;

    Ok(Json(RunReportResponse {
        ok: true,
        run_id: run.id,
        message: "run recorded".to_string(),
    }))
}

/// Liveness ping.
///
/// POST /api/v1/agents/heartbeat
///
/// Authentication already stamps `last_seen_at`; the handler only echoes
/// identity and server time.
async fn heartbeat(
    AuthenticatedNode(node): AuthenticatedNode,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(HeartbeatResponse {
        ok: true,
        server_time: Utc::now(),
        node_id: node.id,
        node_name: node.name,
    }))
}
