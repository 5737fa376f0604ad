//! Equinix Core
//!
//! Shared building blocks for the Equinix providers: attribute schemas,
//! configuration and state records, the resource and data source traits,
//! diagnostics, and the status waiter every asynchronous resource polls with.

pub mod config;
pub mod diagnostics;
pub mod model;
pub mod patch;
pub mod provider;
pub mod resource;
pub mod schema;
pub mod timeouts;
pub mod waiter;
