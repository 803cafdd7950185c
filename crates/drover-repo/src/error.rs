//! Error types for repository synchronization and packaging.
//!
//! Both enums are client-facing by design: their `Display` output names the
//! stage that failed and carries the underlying diagnostic, never a raw
//! backtrace. The HTTP layer surfaces them verbatim as 400-class failures.

/// A git working-copy synchronization failure.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// The git binary could not be spawned.
    #[error("git {stage}: failed to spawn git: {source}")]
    Spawn {
        /// The operation being attempted.
        stage: &'static str,
        /// The underlying spawn failure.
        #[source]
        source: std::io::Error,
    },

    /// A git invocation exited non-zero.
    #[error("git {stage} failed: {stderr}")]
    Command {
        /// The operation that failed.
        stage: &'static str,
        /// Trimmed stderr from the git process.
        stderr: String,
    },

    /// A git invocation exceeded its operation timeout.
    #[error("git {stage} timed out after {seconds}s")]
    Timeout {
        /// The operation that timed out.
        stage: &'static str,
        /// The configured timeout that was exceeded.
        seconds: u64,
    },

    /// Git produced output that could not be interpreted.
    #[error("git {stage}: unexpected output: {detail}")]
    Output {
        /// The operation whose output was malformed.
        stage: &'static str,
        /// What was wrong with it.
        detail: String,
    },

    /// A filesystem operation on the cache directory failed.
    #[error("repository cache io error: {0}")]
    Io(#[from] std::io::Error),
}

/// A package build failure.
#[derive(Debug, thiserror::Error)]
pub enum PackagingError {
    /// No local working copy exists for the repository.
    #[error("repository {repo_id} has no local checkout; sync first")]
    NotSynchronized {
        /// The repository that was requested.
        repo_id: uuid::Uuid,
    },

    /// The configured path does not resolve inside the working copy.
    #[error("config path not found in working copy: {path}")]
    MissingPath {
        /// The path that failed to resolve.
        path: String,
    },

    /// The configured path attempts to escape the working copy.
    #[error("config path rejected: {reason}")]
    InvalidPath {
        /// Why the path was rejected.
        reason: String,
    },

    /// The payload exceeds the configured archive size bound.
    #[error("package payload is {size} bytes, exceeding the {limit} byte limit")]
    TooLarge {
        /// Total payload size encountered.
        size: u64,
        /// The configured cap.
        limit: u64,
    },

    /// Resolving the working copy's commit failed.
    #[error("failed to resolve working copy commit: {0}")]
    Commit(#[from] SyncError),

    /// Writing the archive failed.
    #[error("archive error: {0}")]
    Io(#[from] std::io::Error),
}
