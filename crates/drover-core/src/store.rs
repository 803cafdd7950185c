//! Entity store abstraction.
//!
//! Persistent storage is an external collaborator of the control plane: the
//! server only needs typed access to entity records plus an atomic
//! read-modify-write on nodes (status and last-seen mutations happen on every
//! authenticated contact and must not lose updates under concurrent contacts
//! from the same node). The [`Store`] trait captures that contract;
//! [`MemoryStore`] is the in-process implementation used by the server
//! default wiring and by tests. A database-backed implementation plugs in
//! behind the same trait with one transaction per call.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::model::{GitRepository, Node, Policy, ReconciliationRun};

/// A single-shot mutation applied to a node under the store's write lock.
pub type NodeMutation = Box<dyn FnOnce(&mut Node) + Send>;

/// Typed access to entity records.
///
/// All methods are atomic with respect to each other. Run records are
/// append-only: there is no update or delete for them.
#[async_trait]
pub trait Store: Send + Sync + 'static {
    /// Inserts a new node.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Conflict`] if a node with the same name exists.
    async fn create_node(&self, node: Node) -> Result<()>;

    /// Fetches a node by id.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if no such node exists.
    async fn get_node(&self, id: Uuid) -> Result<Node>;

    /// Fetches a node by its unique name, if present.
    async fn find_node_by_name(&self, name: &str) -> Result<Option<Node>>;

    /// Lists all nodes.
    async fn list_nodes(&self) -> Result<Vec<Node>>;

    /// Applies `mutate` to the node under the write lock and returns the
    /// updated record.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if no such node exists.
    async fn update_node(&self, id: Uuid, mutate: NodeMutation) -> Result<Node>;

    /// Deletes a node. Returns whether a record was removed.
    async fn delete_node(&self, id: Uuid) -> Result<bool>;

    /// Inserts a new policy.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Conflict`] if a policy with the same name exists.
    async fn create_policy(&self, policy: Policy) -> Result<()>;

    /// Fetches a policy by id.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if no such policy exists.
    async fn get_policy(&self, id: Uuid) -> Result<Policy>;

    /// Lists all policies.
    async fn list_policies(&self) -> Result<Vec<Policy>>;

    /// Deletes a policy. Returns whether a record was removed.
    ///
    /// Nodes referencing the policy keep their `assigned_policy_id`; the
    /// dangling reference is treated as "no policy assigned" on resolution.
    async fn delete_policy(&self, id: Uuid) -> Result<bool>;

    /// Inserts a new repository.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Conflict`] if a repository with the same name exists.
    async fn create_repository(&self, repository: GitRepository) -> Result<()>;

    /// Fetches a repository by id.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if no such repository exists.
    async fn get_repository(&self, id: Uuid) -> Result<GitRepository>;

    /// Lists all repositories.
    async fn list_repositories(&self) -> Result<Vec<GitRepository>>;

    /// Deletes a repository. Returns whether a record was removed.
    async fn delete_repository(&self, id: Uuid) -> Result<bool>;

    /// Appends an immutable run record.
    async fn append_run(&self, run: ReconciliationRun) -> Result<()>;

    /// Fetches a run by id.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if no such run exists.
    async fn get_run(&self, id: Uuid) -> Result<ReconciliationRun>;

    /// Lists runs, newest first, optionally filtered by node.
    async fn list_runs(&self, node_id: Option<Uuid>) -> Result<Vec<ReconciliationRun>>;
}

#[derive(Debug, Default)]
struct Tables {
    nodes: HashMap<Uuid, Node>,
    policies: HashMap<Uuid, Policy>,
    repositories: HashMap<Uuid, GitRepository>,
    runs: Vec<ReconciliationRun>,
}

/// In-memory store.
///
/// A single `RwLock` over all tables keeps every mutation atomic; write
/// volume here is one small mutation per agent contact, so the coarse lock
/// is not a bottleneck.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    /// Creates a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn create_node(&self, node: Node) -> Result<()> {
        let mut tables = self.tables.write().await;
        if tables.nodes.values().any(|n| n.name == node.name) {
            return Err(Error::Conflict(format!(
                "node name already exists: {}",
                node.name
            )));
        }
        tables.nodes.insert(node.id, node);
        Ok(())
    }

    async fn get_node(&self, id: Uuid) -> Result<Node> {
        self.tables
            .read()
            .await
            .nodes
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::not_found("node", id))
    }

    async fn find_node_by_name(&self, name: &str) -> Result<Option<Node>> {
        Ok(self
            .tables
            .read()
            .await
            .nodes
            .values()
            .find(|n| n.name == name)
            .cloned())
    }

    async fn list_nodes(&self) -> Result<Vec<Node>> {
        let mut nodes: Vec<Node> = self.tables.read().await.nodes.values().cloned().collect();
        nodes.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(nodes)
    }

    async fn update_node(&self, id: Uuid, mutate: NodeMutation) -> Result<Node> {
        let mut tables = self.tables.write().await;
        let node = tables
            .nodes
            .get_mut(&id)
            .ok_or_else(|| Error::not_found("node", id))?;
        mutate(node);
        Ok(node.clone())
    }

    async fn delete_node(&self, id: Uuid) -> Result<bool> {
        Ok(self.tables.write().await.nodes.remove(&id).is_some())
    }

    async fn create_policy(&self, policy: Policy) -> Result<()> {
        let mut tables = self.tables.write().await;
        if tables.policies.values().any(|p| p.name == policy.name) {
            return Err(Error::Conflict(format!(
                "policy name already exists: {}",
                policy.name
            )));
        }
        tables.policies.insert(policy.id, policy);
        Ok(())
    }

    async fn get_policy(&self, id: Uuid) -> Result<Policy> {
        self.tables
            .read()
            .await
            .policies
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::not_found("policy", id))
    }

    async fn list_policies(&self) -> Result<Vec<Policy>> {
        let mut policies: Vec<Policy> =
            self.tables.read().await.policies.values().cloned().collect();
        policies.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(policies)
    }

    async fn delete_policy(&self, id: Uuid) -> Result<bool> {
        Ok(self.tables.write().await.policies.remove(&id).is_some())
    }

    async fn create_repository(&self, repository: GitRepository) -> Result<()> {
        let mut tables = self.tables.write().await;
        if tables
            .repositories
            .values()
            .any(|r| r.name == repository.name)
        {
            return Err(Error::Conflict(format!(
                "repository name already exists: {}",
                repository.name
            )));
        }
        tables.repositories.insert(repository.id, repository);
        Ok(())
    }

    async fn get_repository(&self, id: Uuid) -> Result<GitRepository> {
        self.tables
            .read()
            .await
            .repositories
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::not_found("repository", id))
    }

    async fn list_repositories(&self) -> Result<Vec<GitRepository>> {
        let mut repositories: Vec<GitRepository> = self
            .tables
            .read()
            .await
            .repositories
            .values()
            .cloned()
            .collect();
        repositories.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(repositories)
    }

    async fn delete_repository(&self, id: Uuid) -> Result<bool> {
        Ok(self.tables.write().await.repositories.remove(&id).is_some())
    }

    async fn append_run(&self, run: ReconciliationRun) -> Result<()> {
        self.tables.write().await.runs.push(run);
        Ok(())
    }

    async fn get_run(&self, id: Uuid) -> Result<ReconciliationRun> {
        self.tables
            .read()
            .await
            .runs
            .iter()
            .find(|r| r.id == id)
            .cloned()
            .ok_or_else(|| Error::not_found("run", id))
    }

    async fn list_runs(&self, node_id: Option<Uuid>) -> Result<Vec<ReconciliationRun>> {
        let tables = self.tables.read().await;
        let mut runs: Vec<ReconciliationRun> = tables
            .runs
            .iter()
            .filter(|r| node_id.is_none_or(|id| r.node_id == id))
            .cloned()
            .collect();
        runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(runs)
    }
}
