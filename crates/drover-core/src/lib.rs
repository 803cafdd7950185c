//! # drover-core
//!
//! Core abstractions for the drover configuration-reconciliation control plane.
//!
//! This crate provides the foundational types and traits used across all drover
//! components:
//!
//! - **Entity Model**: nodes, policies, repositories, and reconciliation runs
//! - **Store Trait**: abstract entity storage with an in-memory backend
//! - **Token Authentication**: issuance and verification of node credentials
//! - **Error Types**: shared error definitions and result types
//!
//! ## Crate Boundary
//!
//! `drover-core` is the only crate allowed to define shared primitives.
//! The repository cache and the HTTP layer both depend on it and never on
//! each other's internals.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod model;
pub mod observability;
pub mod store;
pub mod token;

pub use error::{Error, Result};
pub use model::{GitRepository, Node, NodeStatus, Policy, ReconciliationRun, RunStatus};
pub use store::{MemoryStore, Store};
pub use token::{TokenAuthenticator, TokenConfig};
