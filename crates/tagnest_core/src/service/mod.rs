//! Workspace use-case services.
//!
//! # Responsibility
//! - Orchestrate graph, cache and repository into workspace operations.
//! - Keep callers decoupled from storage and locking details.

pub mod sessions;
pub mod workspace_service;
