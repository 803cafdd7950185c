//! Reconciliation service: the business logic behind the HTTP surface.
//!
//! Handlers translate DTOs and delegate here; this module owns entity
//! lifecycles, the desired-state resolution chain, and the sync+package
//! pipeline. Everything returns [`ApiError`] so handlers stay one-liners.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::Instrument;
use uuid::Uuid;

use drover_core::model::{GitRepository, Node, Policy, ReconciliationRun, RunStatus};
use drover_core::observability::{agent_span, repo_span};
use drover_core::store::Store;
use drover_core::token::TokenAuthenticator;
use drover_repo::{
    CheckoutStatus, Package, PackageBuilder, PackageMode, RepositoryCache, SyncOutcome,
};

use crate::error::{ApiError, ApiResult};

/// What a node should currently be applying.
///
/// `assigned` is false when the node has no policy or when its reference
/// chain no longer resolves (a deleted policy or repository). A dangling
/// reference is reported as "nothing assigned", never as an error.
#[derive(Debug, Clone)]
pub struct DesiredState {
    /// Whether a fully resolvable policy is assigned.
    pub assigned: bool,
    /// The resolved policy, when assigned.
    pub policy: Option<Policy>,
    /// The policy's repository, when assigned.
    pub repository: Option<GitRepository>,
}

/// Fields of an agent's run report, already parsed from the wire.
#[derive(Debug, Clone)]
pub struct RunReport {
    /// The policy the run was executed against.
    pub policy_id: Uuid,
    /// Reported outcome.
    pub status: RunStatus,
    /// Commit the agent applied, when known.
    pub git_commit: Option<String>,
    /// When the run started; defaults to receipt time.
    pub started_at: Option<DateTime<Utc>>,
    /// Human-readable summary or error message.
    pub summary: Option<String>,
}

/// Core service coordinating the store, the repository cache, and the
/// package builder.
pub struct ReconciliationService {
    store: Arc<dyn Store>,
    cache: Arc<RepositoryCache>,
    packages: PackageBuilder,
    tokens: TokenAuthenticator,
}

impl std::fmt::Debug for ReconciliationService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconciliationService")
            .field("store", &"<Store>")
            .field("tokens", &self.tokens)
            .finish_non_exhaustive()
    }
}

impl ReconciliationService {
    /// Creates the service over its collaborators.
    #[must_use]
    pub fn new(
        store: Arc<dyn Store>,
        cache: Arc<RepositoryCache>,
        packages: PackageBuilder,
        tokens: TokenAuthenticator,
    ) -> Self {
        Self {
            store,
            cache,
            packages,
            tokens,
        }
    }

    /// Direct store access for plain CRUD reads and deletes.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    // ------------------------------------------------------------------
    // Agent operations
    // ------------------------------------------------------------------

    /// Authenticates an agent by node name and bearer token.
    ///
    /// An unknown name is 404 and a bad token 401, checked in that order
    /// and before any business logic. Successful authentication counts as
    /// contact and stamps `last_seen_at`.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] as described above.
    pub async fn authenticate_node(&self, name: &str, token: &str) -> ApiResult<Node> {
        let node = self
            .store
            .find_node_by_name(name)
            .await?
            .ok_or_else(|| ApiError::not_found(format!("node not found: {name}")))?;

        if !self.tokens.verify(token, &node.token_hash) {
            tracing::warn!(node = %name, "node token rejected");
            return Err(ApiError::unauthorized("invalid node token"));
        }

        let node = self
            .store
            .update_node(node.id, Box::new(|n| n.last_seen_at = Some(Utc::now())))
            .await?;
        Ok(node)
    }

    /// Resolves the desired state for an authenticated node.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] only on store failure; dangling references
    /// resolve to `assigned: false`.
    pub async fn resolve_desired_state(&self, node: &Node) -> ApiResult<DesiredState> {
        let unassigned = DesiredState {
            assigned: false,
            policy: None,
            repository: None,
        };

        let Some(policy_id) = node.assigned_policy_id else {
            return Ok(unassigned);
        };
        let Ok(policy) = self.store.get_policy(policy_id).await else {
            tracing::debug!(node = %node.name, %policy_id, "assigned policy no longer exists");
            return Ok(unassigned);
        };
        let Ok(repository) = self.store.get_repository(policy.repository_id).await else {
            tracing::debug!(
                node = %node.name,
                policy = %policy.name,
                "policy repository no longer exists"
            );
            return Ok(unassigned);
        };

        Ok(DesiredState {
            assigned: true,
            policy: Some(policy),
            repository: Some(repository),
        })
    }

    /// Synchronizes the node's repository and builds its package.
    ///
    /// Sync and build run under one repository lock, so the archive always
    /// reflects a single commit.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] when nothing is assigned, or when sync or
    /// packaging fails.
    pub async fn prepare_package(&self, node: &Node) -> ApiResult<Package> {
        let state = self.resolve_desired_state(node).await?;
        let (Some(policy), Some(repository)) = (state.policy, state.repository) else {
            return Err(ApiError::unprocessable(
                "NO_POLICY_ASSIGNED",
                format!("node {} has no resolvable policy", node.name),
            ));
        };

        let branch = policy
            .branch
            .as_deref()
            .unwrap_or(&repository.default_branch);

        let span = repo_span("sync-and-package", &repository.id.to_string());
        let package = async {
            let guard = self.cache.lock(repository.id).await;
            self.cache
                .sync_or_clone(&guard, &repository.url, branch)
                .await?;
            self.packages
                .build(&guard, &policy.config_path, PackageMode::Full)
                .await
                .map_err(ApiError::from)
        }
        .instrument(span)
        .await?;

        Ok(package)
    }

    /// Records a run report from an authenticated node.
    ///
    /// The report names the policy it ran against; that policy must exist
    /// at report time, independent of the node's current assignment (an
    /// agent may legitimately report a run started under an assignment
    /// that has since changed). `finished_at` is stamped with the receipt
    /// time; the report cannot set it. The node's `last_status` follows
    /// the reported status.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] when the reported policy does not exist, or
    /// on store failure.
    pub async fn report_run(&self, node: &Node, report: RunReport) -> ApiResult<ReconciliationRun> {
        let policy = match self.store.get_policy(report.policy_id).await {
            Ok(policy) => policy,
            Err(drover_core::Error::NotFound { .. }) => {
                return Err(ApiError::bad_request(format!(
                    "policy not found: {}",
                    report.policy_id
                )));
            }
            Err(err) => return Err(err.into()),
        };

        let now = Utc::now();
        let run = ReconciliationRun {
            id: Uuid::new_v4(),
            node_id: node.id,
            policy_id: policy.id,
            git_commit: report.git_commit,
            started_at: report.started_at.unwrap_or(now),
            finished_at: Some(now),
            status: report.status,
            summary: report.summary,
        };
        let status = report.status;
        async {
            self.store.append_run(run.clone()).await?;
            self.store
                .update_node(
                    node.id,
                    Box::new(move |n| {
                        n.last_status = status.into();
                        n.last_seen_at = Some(now);
                    }),
                )
                .await
        }
        .instrument(agent_span("report-run", &node.id.to_string()))
        .await?;

        tracing::info!(
            node = %node.name,
            run_id = %run.id,
            status = ?run.status,
            "run recorded"
        );
        Ok(run)
    }

    // ------------------------------------------------------------------
    // Operator operations
    // ------------------------------------------------------------------

    /// Registers a node and returns it with the one-time plaintext token.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] on a duplicate name or hashing failure.
    pub async fn register_node(&self, name: &str) -> ApiResult<(Node, String)> {
        if name.trim().is_empty() {
            return Err(ApiError::bad_request("node name must not be empty"));
        }
        let token = self.tokens.issue();
        let hash = self.tokens.hash(&token)?;
        let node = Node::new(name.trim(), hash);
        self.store.create_node(node.clone()).await?;
        tracing::info!(node = %node.name, id = %node.id, "node registered");
        Ok((node, token))
    }

    /// Replaces a node's token, invalidating the previous one immediately.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] if the node does not exist or hashing fails.
    pub async fn regenerate_token(&self, node_id: Uuid) -> ApiResult<(Node, String)> {
        let token = self.tokens.issue();
        let hash = self.tokens.hash(&token)?;
        let node = self
            .store
            .update_node(node_id, Box::new(move |n| n.token_hash = hash))
            .await?;
        tracing::info!(node = %node.name, "node token regenerated");
        Ok((node, token))
    }

    /// Assigns a policy to a node, or clears the assignment with `None`.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] if the node or the policy does not exist.
    pub async fn assign_policy(&self, node_id: Uuid, policy_id: Option<Uuid>) -> ApiResult<Node> {
        if let Some(policy_id) = policy_id {
            self.store.get_policy(policy_id).await?;
        }
        let node = self
            .store
            .update_node(node_id, Box::new(move |n| n.assigned_policy_id = policy_id))
            .await?;
        Ok(node)
    }

    /// Creates a policy after checking its repository exists.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] on an unknown repository, an invalid config
    /// path, or a duplicate name.
    pub async fn create_policy(
        &self,
        name: &str,
        repository_id: Uuid,
        branch: Option<String>,
        config_path: &str,
    ) -> ApiResult<Policy> {
        self.store.get_repository(repository_id).await?;
        let policy = Policy::new(name, repository_id, branch, config_path)?;
        self.store.create_policy(policy.clone()).await?;
        Ok(policy)
    }

    /// Registers a remote repository.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] on a duplicate name or empty fields.
    pub async fn create_repository(
        &self,
        name: &str,
        url: &str,
        default_branch: &str,
    ) -> ApiResult<GitRepository> {
        if name.trim().is_empty() || url.trim().is_empty() || default_branch.trim().is_empty() {
            return Err(ApiError::bad_request(
                "repository name, url, and default_branch must not be empty",
            ));
        }
        let repository = GitRepository::new(name.trim(), url.trim(), default_branch.trim());
        self.store.create_repository(repository.clone()).await?;
        Ok(repository)
    }

    /// Synchronizes a repository's working copy on demand.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] if the repository is unknown or the sync fails.
    pub async fn sync_repository(&self, repository_id: Uuid) -> ApiResult<SyncOutcome> {
        let repository = self.store.get_repository(repository_id).await?;
        let guard = self.cache.lock(repository.id).await;
        let outcome = self
            .cache
            .sync_or_clone(&guard, &repository.url, &repository.default_branch)
            .await?;
        Ok(outcome)
    }

    /// Returns the local checkout status for a repository.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] if the repository is unknown or inspection fails.
    pub async fn repository_status(
        &self,
        repository_id: Uuid,
    ) -> ApiResult<Option<CheckoutStatus>> {
        self.store.get_repository(repository_id).await?;
        Ok(self.cache.status(repository_id).await?)
    }

    /// Deletes a repository record and its local checkout.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] if the checkout exists but cannot be removed.
    pub async fn delete_repository(&self, repository_id: Uuid) -> ApiResult<bool> {
        let removed = self.store.delete_repository(repository_id).await?;
        // Remove the checkout in either case; a leftover directory for a
        // missing record is stale state worth clearing.
        self.cache.remove(repository_id).await?;
        Ok(removed)
    }
}
