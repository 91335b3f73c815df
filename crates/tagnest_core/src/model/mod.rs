//! Domain model for groups, cards and derived expansions.
//!
//! # Responsibility
//! - Define the canonical shapes shared by graph, cache, algebra and storage.
//! - Own name/tag normalization rules so every layer agrees on identity.
//!
//! # Invariants
//! - Every entity is scoped to exactly one `WorkspaceId`.
//! - Tags are identified by their normalized (trimmed, lowercase) name.
//! - `ExpansionResult` is derived data and never persisted.

pub mod card;
pub mod expansion;
pub mod group;
