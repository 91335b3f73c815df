//! Workspace engine use-case service.
//!
//! # Responsibility
//! - Own the in-memory graph, expansion cache and repository of one
//!   workspace session.
//! - Run membership mutations as check -> persist -> commit -> invalidate.
//! - Route drag-and-apply requests through the dispatch table.
//!
//! # Invariants
//! - Every call names its workspace; a different id is `WorkspaceMismatch`.
//! - Mutations hold the graph write lock for their whole critical section;
//!   reads hold the read lock while they fill the cache.
//! - Lock order is graph, then repository.
//! - A rejected mutation leaves graph, storage and cache untouched.

use crate::algebra::dispatch::{
    route, ApplyResult, SourceKind, SourceRef, TargetKind, TargetRef, Zone,
};
use crate::config::{ConfigError, EngineConfig, InvalidationStrategy};
use crate::engine::cache::{CacheStats, ExpansionCache};
use crate::engine::expand::Expander;
use crate::engine::graph::{CycleReason, GraphError, GroupGraph};
use crate::model::card::{Card, CardId, CardSet};
use crate::model::expansion::ExpansionResult;
use crate::model::group::{
    normalize_group_name, normalize_tag, EdgeDelta, EntityRef, Group, GroupId, WorkspaceId,
};
use crate::repo::workspace_repo::{WorkspaceRepoError, WorkspaceRepository};
use log::{debug, info, warn};
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeSet;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

/// Entity a lookup failed to find.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingEntity {
    Group(GroupId),
    Card(CardId),
}

impl Display for MissingEntity {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Group(id) => write!(f, "group not found: {id}"),
            Self::Card(id) => write!(f, "card not found: {id}"),
        }
    }
}

/// Cache scope for explicit invalidation requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidationScope {
    /// The group and every group that contains it.
    Group(GroupId),
    All,
}

/// Errors from workspace engine operations.
#[derive(Debug)]
pub enum EngineError {
    /// Proposed nesting would break acyclicity. Nothing changed.
    CycleRejected {
        parent: GroupId,
        member: GroupId,
        reason: CycleReason,
    },
    /// A complete expansion was required but the nesting ceiling was hit.
    DepthExceeded { group_id: GroupId, max_depth: usize },
    NotFound(MissingEntity),
    DuplicateName(String),
    /// Group name is blank after trim.
    InvalidName,
    /// Tag name is blank after trim.
    InvalidTag(String),
    WorkspaceMismatch {
        expected: WorkspaceId,
        actual: WorkspaceId,
    },
    WorkspaceNotOpen(WorkspaceId),
    UnsupportedDispatch {
        source: SourceKind,
        target: TargetKind,
    },
    Config(ConfigError),
    /// Repository-level failure.
    Repo(WorkspaceRepoError),
}

impl Display for EngineError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CycleRejected {
                parent,
                member,
                reason,
            } => write!(f, "cannot nest group {member} under {parent}: {reason}"),
            Self::DepthExceeded {
                group_id,
                max_depth,
            } => write!(
                f,
                "expansion of group {group_id} exceeds max depth {max_depth}"
            ),
            Self::NotFound(entity) => write!(f, "{entity}"),
            Self::DuplicateName(name) => write!(f, "group name already in use: `{name}`"),
            Self::InvalidName => write!(f, "group name must not be blank"),
            Self::InvalidTag(value) => write!(f, "invalid tag: `{value}`"),
            Self::WorkspaceMismatch { expected, actual } => write!(
                f,
                "workspace mismatch: engine serves {expected}, request names {actual}"
            ),
            Self::WorkspaceNotOpen(id) => write!(f, "workspace not open: {id}"),
            Self::UnsupportedDispatch { source, target } => {
                write!(f, "cannot apply {source} to {target}")
            }
            Self::Config(err) => write!(f, "invalid engine config: {err}"),
            Self::Repo(err) => write!(f, "{err}"),
        }
    }
}

impl Error for EngineError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Config(err) => Some(err),
            Self::Repo(err) => Some(err),
            _ => None,
        }
    }
}

impl From<GraphError> for EngineError {
    fn from(value: GraphError) -> Self {
        match value {
            GraphError::GroupNotFound(id) => Self::NotFound(MissingEntity::Group(id)),
            GraphError::Cycle {
                parent,
                member,
                reason,
            } => Self::CycleRejected {
                parent,
                member,
                reason,
            },
            GraphError::InvalidTag(value) => Self::InvalidTag(value),
            GraphError::DuplicateName(name) => Self::DuplicateName(name),
        }
    }
}

impl From<WorkspaceRepoError> for EngineError {
    fn from(value: WorkspaceRepoError) -> Self {
        match value {
            WorkspaceRepoError::GroupNotFound(id) => Self::NotFound(MissingEntity::Group(id)),
            WorkspaceRepoError::CardNotFound(id) => Self::NotFound(MissingEntity::Card(id)),
            WorkspaceRepoError::DuplicateGroupName(name) => Self::DuplicateName(name),
            other => Self::Repo(other),
        }
    }
}

impl From<ConfigError> for EngineError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value)
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

/// Engine for one open workspace.
pub struct WorkspaceEngine<R: WorkspaceRepository> {
    workspace_id: WorkspaceId,
    config: EngineConfig,
    graph: RwLock<GroupGraph>,
    cache: ExpansionCache,
    repo: Mutex<R>,
}

impl<R: WorkspaceRepository> WorkspaceEngine<R> {
    /// Validates `config`, loads the workspace graph and starts a fresh cache.
    pub fn open(workspace_id: WorkspaceId, repo: R, config: EngineConfig) -> EngineResult<Self> {
        config.validate()?;
        let groups = repo.list_groups(workspace_id)?;
        let graph = GroupGraph::from_groups(workspace_id, groups);
        let cache = ExpansionCache::new(&config.cache);
        if !cache.is_enabled() {
            warn!("event=workspace_open module=engine status=degraded reason=cache_disabled");
        }
        info!(
            "event=workspace_open module=engine status=ok workspace={} groups={} max_depth={}",
            workspace_id,
            graph.len(),
            config.max_depth
        );

        Ok(Self {
            workspace_id,
            config,
            graph: RwLock::new(graph),
            cache,
            repo: Mutex::new(repo),
        })
    }

    pub fn workspace_id(&self) -> WorkspaceId {
        self.workspace_id
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Creates a group with optional initial members.
    ///
    /// A new group has no parents, so initial group members cannot close a
    /// cycle; they only need to exist.
    pub fn create_group(
        &self,
        workspace_id: WorkspaceId,
        name: &str,
        initial_members: &[EntityRef],
    ) -> EngineResult<GroupId> {
        self.ensure_workspace(workspace_id)?;
        let name = normalize_group_name(name).ok_or(EngineError::InvalidName)?;

        let mut graph = self.graph.write();
        graph.ensure_name_available(&name, None)?;
        let mut members = BTreeSet::new();
        for member in initial_members {
            let member = normalize_member(member)?;
            if let EntityRef::Group(child) = &member {
                graph.require(*child)?;
            }
            members.insert(member);
        }
        let members: Vec<EntityRef> = members.into_iter().collect();

        let group = self
            .repo
            .lock()
            .create_group(workspace_id, &name, &members)?;
        let group_id = group.id;
        graph.insert_group(group);
        info!(
            "event=group_create module=engine status=ok group={} members={}",
            group_id,
            members.len()
        );
        Ok(group_id)
    }

    /// Adds one member to `parent` after the cycle guard accepts it.
    ///
    /// Returns `false` when the edge already existed.
    pub fn propose_membership(
        &self,
        workspace_id: WorkspaceId,
        parent_id: GroupId,
        member: EntityRef,
    ) -> EngineResult<bool> {
        let added = self.propose_memberships(workspace_id, parent_id, &[member])?;
        Ok(!added.is_empty())
    }

    /// Adds several members to `parent` all-or-nothing.
    ///
    /// Every member is checked against the same committed snapshot before
    /// anything is persisted. Returns the members that were not present yet.
    pub fn propose_memberships(
        &self,
        workspace_id: WorkspaceId,
        parent_id: GroupId,
        members: &[EntityRef],
    ) -> EngineResult<Vec<EntityRef>> {
        self.ensure_workspace(workspace_id)?;
        let mut graph = self.graph.write();

        let accepted = match graph.check_memberships(parent_id, members) {
            Ok(accepted) => accepted,
            Err(err) => {
                log_rejection(parent_id, &err);
                return Err(err.into());
            }
        };
        let parent = graph.require(parent_id)?;
        let fresh: Vec<EntityRef> = accepted
            .into_iter()
            .filter(|member| !parent.members.contains(member))
            .collect();
        if fresh.is_empty() {
            debug!(
                "event=membership_propose module=engine status=ok parent={} added=0",
                parent_id
            );
            return Ok(Vec::new());
        }

        self.repo.lock().persist_membership_change(
            workspace_id,
            parent_id,
            &EdgeDelta::add(fresh.clone()),
        )?;
        let added = graph.add_members(parent_id, &fresh)?;
        let invalidated = self.invalidate_for_change(parent_id, &graph);
        info!(
            "event=membership_propose module=engine status=ok parent={} added={} invalidated={}",
            parent_id,
            added.len(),
            invalidated
        );
        Ok(added)
    }

    /// Removes one member. Returns `false` when it was not present.
    pub fn remove_membership(
        &self,
        workspace_id: WorkspaceId,
        parent_id: GroupId,
        member: &EntityRef,
    ) -> EngineResult<bool> {
        self.ensure_workspace(workspace_id)?;
        let member = normalize_member(member)?;
        let mut graph = self.graph.write();
        let parent = graph.require(parent_id)?;
        if !parent.members.contains(&member) {
            return Ok(false);
        }

        self.repo.lock().persist_membership_change(
            workspace_id,
            parent_id,
            &EdgeDelta::remove(member.clone()),
        )?;
        graph.remove_member(parent_id, &member)?;
        let invalidated = self.invalidate_for_change(parent_id, &graph);
        info!(
            "event=membership_remove module=engine status=ok parent={} invalidated={}",
            parent_id, invalidated
        );
        Ok(true)
    }

    /// Deletes a group and every edge touching it.
    ///
    /// Nested groups and tags stay. Former ancestors are invalidated before
    /// the edges to them disappear from the graph.
    pub fn delete_group(&self, workspace_id: WorkspaceId, group_id: GroupId) -> EngineResult<()> {
        self.ensure_workspace(workspace_id)?;
        let mut graph = self.graph.write();
        graph.require(group_id)?;

        self.repo.lock().delete_group(workspace_id, group_id)?;
        let invalidated = self.invalidate_for_change(group_id, &graph);
        graph.remove_group(group_id)?;
        info!(
            "event=group_delete module=engine status=ok group={} invalidated={}",
            group_id, invalidated
        );
        Ok(())
    }

    /// Renames a group. Expansions do not carry names, so the cache stays.
    pub fn rename_group(
        &self,
        workspace_id: WorkspaceId,
        group_id: GroupId,
        name: &str,
    ) -> EngineResult<()> {
        self.ensure_workspace(workspace_id)?;
        let name = normalize_group_name(name).ok_or(EngineError::InvalidName)?;
        let mut graph = self.graph.write();
        graph.require(group_id)?;
        graph.ensure_name_available(&name, Some(group_id))?;

        self.repo
            .lock()
            .rename_group(workspace_id, group_id, &name)?;
        graph.rename_group(group_id, name)?;
        info!("event=group_rename module=engine status=ok group={}", group_id);
        Ok(())
    }

    pub fn get_group(&self, workspace_id: WorkspaceId, group_id: GroupId) -> EngineResult<Group> {
        self.ensure_workspace(workspace_id)?;
        let graph = self.graph.read();
        Ok(graph.require(group_id)?.clone())
    }

    /// All groups ordered by creation time.
    pub fn list_groups(&self, workspace_id: WorkspaceId) -> EngineResult<Vec<Group>> {
        self.ensure_workspace(workspace_id)?;
        let graph = self.graph.read();
        Ok(graph.groups().into_iter().cloned().collect())
    }

    /// Direct parents of a group.
    pub fn parents_of(
        &self,
        workspace_id: WorkspaceId,
        group_id: GroupId,
    ) -> EngineResult<BTreeSet<GroupId>> {
        self.ensure_workspace(workspace_id)?;
        let graph = self.graph.read();
        graph.require(group_id)?;
        Ok(graph.parents_of(group_id))
    }

    /// Expands a group with the configured ceiling, through the cache.
    ///
    /// Hitting the ceiling is not an error; the result is flagged truncated.
    pub fn expand(
        &self,
        workspace_id: WorkspaceId,
        group_id: GroupId,
    ) -> EngineResult<Arc<ExpansionResult>> {
        self.ensure_workspace(workspace_id)?;
        let graph = self.graph.read();
        self.expand_locked(&graph, group_id)
    }

    /// Like `expand`, but a truncated result is `DepthExceeded`.
    pub fn expand_complete(
        &self,
        workspace_id: WorkspaceId,
        group_id: GroupId,
    ) -> EngineResult<Arc<ExpansionResult>> {
        let result = self.expand(workspace_id, group_id)?;
        if result.truncated {
            return Err(EngineError::DepthExceeded {
                group_id,
                max_depth: self.config.max_depth,
            });
        }
        Ok(result)
    }

    /// Applies `source` to `target` according to the dispatch table.
    pub fn apply(
        &self,
        workspace_id: WorkspaceId,
        source: SourceRef,
        target: TargetRef,
    ) -> EngineResult<ApplyResult> {
        self.ensure_workspace(workspace_id)?;
        let (source_kind, target_kind) = (source.kind(), target.kind());
        let Some(action) = route(source_kind, target_kind) else {
            info!(
                "event=dispatch module=engine status=rejected source={} target={}",
                source_kind, target_kind
            );
            return Err(EngineError::UnsupportedDispatch {
                source: source_kind,
                target: target_kind,
            });
        };
        debug!(
            "event=dispatch module=engine status=start action={}",
            action.as_str()
        );

        match (source, target) {
            (SourceRef::Tag(raw), TargetRef::Zone { zone, selection }) => {
                let tag = normalize_tag(&raw).ok_or(EngineError::InvalidTag(raw))?;
                self.filter_zone(workspace_id, zone, selection, &BTreeSet::from([tag]), false)
            }
            (SourceRef::Group(group_id), TargetRef::Zone { zone, selection }) => {
                let expansion = self.expand(workspace_id, group_id)?;
                self.filter_zone(
                    workspace_id,
                    zone,
                    selection,
                    &expansion.tags,
                    expansion.truncated,
                )
            }
            (SourceRef::Group(group_id), TargetRef::Card(card_id)) => {
                self.tag_card_with_expansion(workspace_id, group_id, card_id)
            }
            (SourceRef::Tag(raw), TargetRef::Group(parent_id)) => {
                self.add_members(workspace_id, parent_id, vec![EntityRef::Tag(raw)])
            }
            (SourceRef::Group(child_id), TargetRef::Group(parent_id)) => {
                self.add_members(workspace_id, parent_id, vec![EntityRef::Group(child_id)])
            }
            (SourceRef::Selection(members), TargetRef::Group(parent_id)) => {
                self.add_members(workspace_id, parent_id, members)
            }
            _ => Err(EngineError::UnsupportedDispatch {
                source: source_kind,
                target: target_kind,
            }),
        }
    }

    /// Mirrors one host card into the store so zones can filter it.
    pub fn create_card(&self, workspace_id: WorkspaceId, tags: &[&str]) -> EngineResult<Card> {
        self.ensure_workspace(workspace_id)?;
        let mut normalized = BTreeSet::new();
        for tag in tags {
            let tag = normalize_tag(tag).ok_or_else(|| EngineError::InvalidTag(tag.to_string()))?;
            normalized.insert(tag);
        }
        let normalized: Vec<String> = normalized.into_iter().collect();
        Ok(self.repo.lock().create_card(workspace_id, &normalized)?)
    }

    /// Card universe of the workspace.
    pub fn list_cards(&self, workspace_id: WorkspaceId) -> EngineResult<Vec<Card>> {
        self.ensure_workspace(workspace_id)?;
        Ok(self.repo.lock().list_cards(workspace_id)?)
    }

    pub fn cache_stats(&self, workspace_id: WorkspaceId) -> EngineResult<CacheStats> {
        self.ensure_workspace(workspace_id)?;
        Ok(self.cache.stats())
    }

    /// Drops cache entries on request.
    pub fn invalidate_cache(
        &self,
        workspace_id: WorkspaceId,
        scope: InvalidationScope,
    ) -> EngineResult<()> {
        self.ensure_workspace(workspace_id)?;
        match scope {
            InvalidationScope::Group(group_id) => {
                let graph = self.graph.read();
                graph.require(group_id)?;
                self.cache.invalidate_transitive(group_id, &graph);
            }
            InvalidationScope::All => self.cache.invalidate_all(),
        }
        Ok(())
    }

    fn ensure_workspace(&self, workspace_id: WorkspaceId) -> EngineResult<()> {
        if workspace_id != self.workspace_id {
            return Err(EngineError::WorkspaceMismatch {
                expected: self.workspace_id,
                actual: workspace_id,
            });
        }
        Ok(())
    }

    fn expand_locked(
        &self,
        graph: &GroupGraph,
        group_id: GroupId,
    ) -> EngineResult<Arc<ExpansionResult>> {
        let max_depth = self.config.max_depth;
        let result =
            Expander::with_cache(graph, &self.cache, max_depth).expand(group_id, max_depth)?;
        if result.truncated {
            debug!(
                "event=expand module=engine status=truncated group={} max_depth={}",
                group_id, max_depth
            );
        }
        Ok(result)
    }

    /// Drops cache entries affected by a change under `group_id`.
    ///
    /// Runs with the graph write lock held. For deletions `graph` must still
    /// contain the edges being removed.
    fn invalidate_for_change(&self, group_id: GroupId, graph: &GroupGraph) -> usize {
        match self.config.cache.invalidation {
            InvalidationStrategy::Transitive => self.cache.invalidate_transitive(group_id, graph),
            InvalidationStrategy::FlushAll => {
                self.cache.invalidate_all();
                graph.len()
            }
        }
    }

    fn add_members(
        &self,
        workspace_id: WorkspaceId,
        parent_id: GroupId,
        members: Vec<EntityRef>,
    ) -> EngineResult<ApplyResult> {
        let added = self.propose_memberships(workspace_id, parent_id, &members)?;
        Ok(ApplyResult::MembershipAdded {
            group_id: parent_id,
            added,
        })
    }

    fn tag_card_with_expansion(
        &self,
        workspace_id: WorkspaceId,
        group_id: GroupId,
        card_id: CardId,
    ) -> EngineResult<ApplyResult> {
        let expansion = self.expand(workspace_id, group_id)?;
        let repo = self.repo.lock();
        let card = repo
            .get_card(workspace_id, card_id)?
            .ok_or(EngineError::NotFound(MissingEntity::Card(card_id)))?;

        let added: BTreeSet<String> = expansion.tags.difference(&card.tags).cloned().collect();
        let card = if added.is_empty() {
            card
        } else {
            repo.add_card_tags(workspace_id, card_id, &added)?
        };
        info!(
            "event=card_tag module=engine status=ok card={} group={} added={}",
            card_id,
            group_id,
            added.len()
        );
        Ok(ApplyResult::CardTagged {
            card,
            added,
            truncated: expansion.truncated,
        })
    }

    fn filter_zone(
        &self,
        workspace_id: WorkspaceId,
        zone: Zone,
        selection: Option<CardSet>,
        tags: &BTreeSet<String>,
        truncated: bool,
    ) -> EngineResult<ApplyResult> {
        if let Some(selection) = &selection {
            if let Some(foreign) = selection
                .iter()
                .find(|card| card.workspace_id != workspace_id)
            {
                return Err(EngineError::WorkspaceMismatch {
                    expected: workspace_id,
                    actual: foreign.workspace_id,
                });
            }
        }

        let pushdown = zone == Zone::Intersection && self.config.intersection_pushdown;

        // With push-down the superset query replaces the universe scan.
        let repo = self.repo.lock();
        let (universe, matches): (CardSet, CardSet) = if pushdown {
            let matches = repo
                .get_cards_with_tag_superset(workspace_id, tags)?
                .into_iter()
                .collect();
            (CardSet::new(), matches)
        } else {
            let universe: CardSet = repo.list_cards(workspace_id)?.into_iter().collect();
            let matches = zone.matches(&universe, tags);
            (universe, matches)
        };
        drop(repo);

        let match_count = matches.len();
        let cards = match selection {
            Some(selection) => zone.combine(&selection, &matches),
            // U ∩ M = M
            None if pushdown => matches,
            None if zone.starts_from_universe() => zone.combine(&universe, &matches),
            None => zone.combine(&CardSet::new(), &matches),
        };
        debug!(
            "event=zone_filter module=engine status=ok zone={:?} operand_tags={} matches={} result={} pushdown={}",
            zone,
            tags.len(),
            match_count,
            cards.len(),
            pushdown
        );
        Ok(ApplyResult::Selection {
            zone,
            cards,
            truncated,
        })
    }
}

fn normalize_member(member: &EntityRef) -> EngineResult<EntityRef> {
    match member {
        EntityRef::Tag(raw) => {
            EntityRef::tag(raw).ok_or_else(|| EngineError::InvalidTag(raw.clone()))
        }
        EntityRef::Group(id) => Ok(EntityRef::Group(*id)),
    }
}

fn log_rejection(parent_id: GroupId, err: &GraphError) {
    let reason = match err {
        GraphError::Cycle {
            reason: CycleReason::SelfReference,
            ..
        } => "self_reference",
        GraphError::Cycle { .. } => "cycle",
        GraphError::GroupNotFound(_) => "not_found",
        GraphError::InvalidTag(_) => "invalid_tag",
        GraphError::DuplicateName(_) => "duplicate_name",
    };
    info!(
        "event=membership_propose module=engine status=rejected parent={} reason={}",
        parent_id, reason
    );
}
