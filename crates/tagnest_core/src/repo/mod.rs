//! Repository layer abstractions and persistence implementations.
//!
//! # Responsibility
//! - Define the storage contract consumed by the workspace engine.
//! - Isolate SQLite query details from graph and dispatch orchestration.
//!
//! # Invariants
//! - Every query is scoped by workspace id.
//! - Repository APIs return semantic errors (`GroupNotFound`,
//!   `CardNotFound`) in addition to DB transport errors.

pub mod workspace_repo;
