//! Deployment config applier for LLM Serve
//!
//! This crate validates a multi-application serve config, uploads local
//! working directories as packages and submits the config to a Ray
//! dashboard in a single request.

pub mod address;
pub mod applier;
pub mod cli;
pub mod client;
pub mod package;
pub mod schema;

// Re-export commonly used types
pub use address::validate_dashboard_address;
pub use applier::{deploy, DeployRequest};
pub use cli::DeployArgs;
pub use client::{ControlPlane, DashboardClient, DashboardOptions};
pub use schema::ServeDeployConfig;
