//! Core logic for tagnest: nested tag groups, expansion and card filtering.
//! This crate owns every graph and cache invariant; hosts only call in.

pub mod algebra;
pub mod config;
pub mod db;
pub mod engine;
pub mod logging;
pub mod model;
pub mod repo;
pub mod service;

pub use algebra::dispatch::{
    route, ApplyResult, DispatchAction, SourceKind, SourceRef, TargetKind, TargetRef, Zone,
};
pub use config::{CacheConfig, ConfigError, EngineConfig, InvalidationStrategy};
pub use db::{open_db, open_db_in_memory, DbError, DbResult};
pub use engine::cache::{CacheStats, ExpansionCache};
pub use engine::graph::{CycleReason, GraphError, GroupGraph};
pub use logging::{default_log_level, init_logging, logging_status};
pub use model::card::{Card, CardId, CardSet};
pub use model::expansion::ExpansionResult;
pub use model::group::{EdgeDelta, EntityRef, Group, GroupId, WorkspaceId};
pub use repo::workspace_repo::{
    SqliteWorkspaceRepository, WorkspaceRepoError, WorkspaceRepoResult, WorkspaceRepository,
};
pub use service::sessions::WorkspaceSessions;
pub use service::workspace_service::{
    EngineError, EngineResult, InvalidationScope, MissingEntity, WorkspaceEngine,
};

/// Minimal health-check API for early integration.
pub fn ping() -> &'static str {
    "pong"
}

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
