//! Entity model for the drover control plane.
//!
//! Four entities make up the data model:
//!
//! - [`Node`]: a managed machine polling for configuration
//! - [`Policy`]: a binding of repository + branch + path defining what a node applies
//! - [`GitRepository`]: a remote repository the server mirrors locally
//! - [`ReconciliationRun`]: an immutable record of one apply attempt
//!
//! Dangling references are legal by design: a node's `assigned_policy_id` or a
//! policy's `repository_id` may stop resolving after a deletion. Callers must
//! treat an unresolved reference as "no policy assigned", never as an error.
//! Run records capture `node_id`/`policy_id` at report time and outlive both.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Lifecycle status of a node, as observed via its last contact.
///
/// No state is terminal; the next run report can move a node in any
/// direction. Heartbeats and desired-state queries never change it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    /// Default / reset state.
    Unknown,
    /// Initial state, set at creation.
    Registered,
    /// A run report with status `in_progress` was received.
    InProgress,
    /// The last reported run succeeded.
    Success,
    /// The last reported run failed.
    Failed,
    /// The last reported run was skipped.
    Skipped,
}

impl Default for NodeStatus {
    fn default() -> Self {
        Self::Unknown
    }
}

/// Outcome of a reconciliation run, as reported by the agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// The configuration was applied successfully.
    Success,
    /// The apply attempt failed.
    Failed,
    /// The run is still executing (progress report).
    InProgress,
    /// The run was skipped (e.g. nothing to do).
    Skipped,
}

impl From<RunStatus> for NodeStatus {
    fn from(status: RunStatus) -> Self {
        match status {
            RunStatus::Success => Self::Success,
            RunStatus::Failed => Self::Failed,
            RunStatus::InProgress => Self::InProgress,
            RunStatus::Skipped => Self::Skipped,
        }
    }
}

/// A managed machine that polls the server for its desired configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    /// Unique node identifier.
    pub id: Uuid,
    /// Unique name (typically the hostname).
    pub name: String,
    /// Irreversible salted hash of the node's bearer token.
    ///
    /// The plaintext token is shown exactly once at issuance and never
    /// retrievable afterwards.
    pub token_hash: String,
    /// Policy this node should apply, if one is assigned.
    ///
    /// May dangle after a policy deletion; see the module docs.
    pub assigned_policy_id: Option<Uuid>,
    /// Timestamp of the last authenticated contact.
    pub last_seen_at: Option<DateTime<Utc>>,
    /// Status reported by the most recent run.
    pub last_status: NodeStatus,
}

impl Node {
    /// Creates a new node in the `Registered` state.
    #[must_use]
    pub fn new(name: impl Into<String>, token_hash: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            token_hash: token_hash.into(),
            assigned_policy_id: None,
            last_seen_at: None,
            last_status: NodeStatus::Registered,
        }
    }
}

/// A named binding of repository + branch + path defining what a node applies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Policy {
    /// Unique policy identifier.
    pub id: Uuid,
    /// Policy name.
    pub name: String,
    /// The owning repository. Must resolve at creation time; may dangle later.
    pub repository_id: Uuid,
    /// Branch override. When `None`, the repository's default branch is used.
    pub branch: Option<String>,
    /// Path of the configuration entry point, relative to the repository root.
    pub config_path: String,
}

impl Policy {
    /// Creates a new policy after validating `config_path`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] if the path is absolute, empty, or
    /// contains a parent-directory segment.
    pub fn new(
        name: impl Into<String>,
        repository_id: Uuid,
        branch: Option<String>,
        config_path: impl Into<String>,
    ) -> Result<Self> {
        let config_path = config_path.into();
        validate_config_path(&config_path)?;
        Ok(Self {
            id: Uuid::new_v4(),
            name: name.into(),
            repository_id,
            branch,
            config_path,
        })
    }
}

/// Rejects config paths that could escape the working copy.
///
/// Checked before any filesystem access; the package builder re-checks it
/// as defense against stored records predating the validation.
///
/// # Errors
///
/// Returns [`Error::Validation`] if the path is empty, absolute, or contains
/// a `..` segment.
pub fn validate_config_path(path: &str) -> Result<()> {
    if path.trim().is_empty() {
        return Err(Error::validation("config_path must not be empty"));
    }
    if path.starts_with('/') || path.starts_with('\\') {
        return Err(Error::validation("config_path must be relative"));
    }
    let has_traversal = path
        .split(['/', '\\'])
        .any(|segment| segment == "..");
    if has_traversal {
        return Err(Error::validation(
            "config_path must not contain parent-directory segments",
        ));
    }
    Ok(())
}

/// A remote git repository the server mirrors into a local working copy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitRepository {
    /// Unique repository identifier. Also keys the on-disk working copy.
    pub id: Uuid,
    /// Display name.
    pub name: String,
    /// Clone URL.
    pub url: String,
    /// Branch used when a policy carries no override.
    pub default_branch: String,
}

impl GitRepository {
    /// Creates a new repository record.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        url: impl Into<String>,
        default_branch: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            url: url.into(),
            default_branch: default_branch.into(),
        }
    }
}

/// An immutable record of one attempt by a node to apply its configuration.
///
/// Append-only history. `node_id` and `policy_id` are captured at report
/// time; later deletion of either referenced entity does not invalidate the
/// run (accepted historical drift).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciliationRun {
    /// Unique run identifier.
    pub id: Uuid,
    /// The reporting node.
    pub node_id: Uuid,
    /// The policy that was applied.
    pub policy_id: Uuid,
    /// Commit the node applied, when known.
    pub git_commit: Option<String>,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the run finished (stamped at report receipt).
    pub finished_at: Option<DateTime<Utc>>,
    /// Reported outcome.
    pub status: RunStatus,
    /// Human-readable summary or error message.
    pub summary: Option<String>,
}
