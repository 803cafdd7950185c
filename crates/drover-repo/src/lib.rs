//! # drover-repo
//!
//! Repository synchronization and package building for the drover control
//! plane.
//!
//! This crate owns the mutable on-disk state of the server: one local git
//! working copy per configured repository, pinned to whatever branch was
//! last requested. From a synchronized working copy it derives the delivery
//! artifact handed to agents: a gzip-compressed tar archive with a
//! provenance manifest and a content digest.
//!
//! Version control is an external capability: every operation shells out to
//! the `git` binary through [`GitCli`] with a per-operation timeout, and is
//! never reimplemented here.
//!
//! ## Locking discipline
//!
//! All filesystem mutation of a working copy happens under that
//! repository's entry in the cache's lock arena. [`RepositoryCache::lock`]
//! returns a [`RepoGuard`]; both [`RepositoryCache::sync_or_clone`] and
//! [`PackageBuilder::build`] take the guard by reference, so a
//! sync-then-build sequence holds one guard for its whole duration and
//! concurrent requests against the same repository queue instead of
//! interleaving. Distinct repositories proceed fully in parallel.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod cache;
pub mod error;
pub mod git;
pub mod package;

pub use cache::{CacheConfig, CheckoutStatus, RepoGuard, RepositoryCache, SyncOutcome};
pub use error::{PackagingError, SyncError};
pub use git::{GitCli, GitTimeouts};
pub use package::{MANIFEST_NAME, Package, PackageBuilder, PackageConfig, PackageMode};
