//! service-core: Shared infrastructure for the interpretation workspace.
pub mod config;
pub mod error;
pub mod middleware;
pub mod observability;
