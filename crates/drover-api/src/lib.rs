//! # drover-api
//!
//! HTTP API server for the drover configuration control plane.
//!
//! Two route families share one router:
//!
//! - `/api/v1/agents/*`: the pull protocol spoken by node agents,
//!   authenticated per node with `X-Node-Name` + `X-Node-Token`
//! - `/api/v1/{nodes,policies,repositories,runs}`: the operator CRUD
//!   surface, authenticated with the shared `X-Admin-API-Key` secret
//!
//! The HTTP layer stays thin: handlers translate between wire DTOs and
//! [`service::ReconciliationService`], which owns all business logic.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod auth;
pub mod config;
pub mod error;
pub mod routes;
pub mod server;
pub mod service;
