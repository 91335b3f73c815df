//! Workspace session registry.
//!
//! # Responsibility
//! - Map workspace ids to open engines.
//! - Expose workspace-keyed entry points for the presentation layer.
//!
//! # Invariants
//! - At most one engine per workspace id; caches are never shared.
//! - Closing a session drops its cache with it.

use crate::algebra::dispatch::{ApplyResult, SourceRef, TargetRef};
use crate::config::EngineConfig;
use crate::engine::cache::CacheStats;
use crate::model::expansion::ExpansionResult;
use crate::model::group::{EntityRef, Group, GroupId, WorkspaceId};
use crate::repo::workspace_repo::WorkspaceRepository;
use crate::service::workspace_service::{
    EngineError, EngineResult, InvalidationScope, WorkspaceEngine,
};
use log::info;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Registry of open workspace engines.
pub struct WorkspaceSessions<R: WorkspaceRepository> {
    config: EngineConfig,
    engines: RwLock<HashMap<WorkspaceId, Arc<WorkspaceEngine<R>>>>,
}

impl<R: WorkspaceRepository> WorkspaceSessions<R> {
    /// Creates a registry whose engines share `config`.
    pub fn new(config: EngineConfig) -> EngineResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            engines: RwLock::new(HashMap::new()),
        })
    }

    /// Opens a session, or returns the one already open for `workspace_id`.
    ///
    /// The engine loads outside the registry lock. When two opens race,
    /// the first insert wins and the other engine is dropped.
    pub fn open(
        &self,
        workspace_id: WorkspaceId,
        repo: R,
    ) -> EngineResult<Arc<WorkspaceEngine<R>>> {
        if let Some(engine) = self.engines.read().get(&workspace_id) {
            return Ok(Arc::clone(engine));
        }
        let loaded = Arc::new(WorkspaceEngine::open(
            workspace_id,
            repo,
            self.config.clone(),
        )?);
        let engine = Arc::clone(
            self.engines
                .write()
                .entry(workspace_id)
                .or_insert_with(|| Arc::clone(&loaded)),
        );
        Ok(engine)
    }

    pub fn get(&self, workspace_id: WorkspaceId) -> EngineResult<Arc<WorkspaceEngine<R>>> {
        self.engines
            .read()
            .get(&workspace_id)
            .cloned()
            .ok_or(EngineError::WorkspaceNotOpen(workspace_id))
    }

    pub fn is_open(&self, workspace_id: WorkspaceId) -> bool {
        self.engines.read().contains_key(&workspace_id)
    }

    /// Closes a session. Returns whether one was open.
    pub fn close(&self, workspace_id: WorkspaceId) -> bool {
        let closed = self.engines.write().remove(&workspace_id).is_some();
        if closed {
            info!(
                "event=workspace_close module=sessions status=ok workspace={}",
                workspace_id
            );
        }
        closed
    }

    pub fn create_group(
        &self,
        workspace_id: WorkspaceId,
        name: &str,
        initial_members: &[EntityRef],
    ) -> EngineResult<GroupId> {
        self.get(workspace_id)?
            .create_group(workspace_id, name, initial_members)
    }

    pub fn apply(
        &self,
        workspace_id: WorkspaceId,
        source: SourceRef,
        target: TargetRef,
    ) -> EngineResult<ApplyResult> {
        self.get(workspace_id)?.apply(workspace_id, source, target)
    }

    pub fn expand(
        &self,
        workspace_id: WorkspaceId,
        group_id: GroupId,
    ) -> EngineResult<Arc<ExpansionResult>> {
        self.get(workspace_id)?.expand(workspace_id, group_id)
    }

    pub fn cache_stats(&self, workspace_id: WorkspaceId) -> EngineResult<CacheStats> {
        self.get(workspace_id)?.cache_stats(workspace_id)
    }

    pub fn invalidate_cache(
        &self,
        workspace_id: WorkspaceId,
        scope: InvalidationScope,
    ) -> EngineResult<()> {
        self.get(workspace_id)?.invalidate_cache(workspace_id, scope)
    }

    pub fn propose_membership(
        &self,
        workspace_id: WorkspaceId,
        parent_id: GroupId,
        member: EntityRef,
    ) -> EngineResult<bool> {
        self.get(workspace_id)?
            .propose_membership(workspace_id, parent_id, member)
    }

    pub fn propose_memberships(
        &self,
        workspace_id: WorkspaceId,
        parent_id: GroupId,
        members: &[EntityRef],
    ) -> EngineResult<Vec<EntityRef>> {
        self.get(workspace_id)?
            .propose_memberships(workspace_id, parent_id, members)
    }

    pub fn remove_membership(
        &self,
        workspace_id: WorkspaceId,
        parent_id: GroupId,
        member: &EntityRef,
    ) -> EngineResult<bool> {
        self.get(workspace_id)?
            .remove_membership(workspace_id, parent_id, member)
    }

    pub fn delete_group(&self, workspace_id: WorkspaceId, group_id: GroupId) -> EngineResult<()> {
        self.get(workspace_id)?.delete_group(workspace_id, group_id)
    }

    pub fn rename_group(
        &self,
        workspace_id: WorkspaceId,
        group_id: GroupId,
        name: &str,
    ) -> EngineResult<()> {
        self.get(workspace_id)?
            .rename_group(workspace_id, group_id, name)
    }

    pub fn get_group(&self, workspace_id: WorkspaceId, group_id: GroupId) -> EngineResult<Group> {
        self.get(workspace_id)?.get_group(workspace_id, group_id)
    }

    pub fn list_groups(&self, workspace_id: WorkspaceId) -> EngineResult<Vec<Group>> {
        self.get(workspace_id)?.list_groups(workspace_id)
    }
}
