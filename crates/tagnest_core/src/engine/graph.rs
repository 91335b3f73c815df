//! In-memory group graph and cycle guard.
//!
//! # Responsibility
//! - Hold the committed membership relation of one workspace as an arena of
//!   groups addressed by id, plus a reverse (child -> parents) index.
//! - Accept or reject proposed edges before anything is persisted.
//!
//! # Invariants
//! - Group -> group edges form a DAG at all times.
//! - A group never contains itself.
//! - `parents` mirrors every group -> group edge in `groups`.
//! - Name keys are unique per workspace (case-folded).

use crate::model::group::{group_name_key, EntityRef, Group, GroupId, WorkspaceId};
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Why a proposed nesting edge was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleReason {
    /// Parent and member are the same group.
    SelfReference,
    /// The member already reaches the parent; `path` runs member -> parent.
    Cycle { path: Vec<GroupId> },
}

impl Display for CycleReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SelfReference => write!(f, "a group cannot contain itself"),
            Self::Cycle { path } => {
                let rendered = path
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(" -> ");
                write!(f, "member already contains parent via {rendered}")
            }
        }
    }
}

/// Errors from graph validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    GroupNotFound(GroupId),
    Cycle {
        parent: GroupId,
        member: GroupId,
        reason: CycleReason,
    },
    InvalidTag(String),
    DuplicateName(String),
}

impl Display for GraphError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::GroupNotFound(id) => write!(f, "group not found: {id}"),
            Self::Cycle {
                parent,
                member,
                reason,
            } => write!(f, "cannot nest group {member} under {parent}: {reason}"),
            Self::InvalidTag(value) => write!(f, "invalid tag: `{value}`"),
            Self::DuplicateName(name) => write!(f, "group name already in use: `{name}`"),
        }
    }
}

impl Error for GraphError {}

/// Committed membership graph of one workspace.
#[derive(Debug, Clone)]
pub struct GroupGraph {
    workspace_id: WorkspaceId,
    groups: HashMap<GroupId, Group>,
    parents: HashMap<GroupId, BTreeSet<GroupId>>,
    names: HashMap<String, GroupId>,
}

impl GroupGraph {
    /// Creates an empty graph for one workspace.
    pub fn new(workspace_id: WorkspaceId) -> Self {
        Self {
            workspace_id,
            groups: HashMap::new(),
            parents: HashMap::new(),
            names: HashMap::new(),
        }
    }

    /// Rebuilds a graph from stored groups.
    ///
    /// Groups from other workspaces are ignored. Edges pointing at groups
    /// that are not part of the load are dropped.
    pub fn from_groups(workspace_id: WorkspaceId, groups: Vec<Group>) -> Self {
        let mut graph = Self::new(workspace_id);
        for group in groups
            .into_iter()
            .filter(|group| group.workspace_id == workspace_id)
        {
            graph.names.insert(group_name_key(&group.name), group.id);
            graph.groups.insert(group.id, group);
        }

        let known: HashSet<GroupId> = graph.groups.keys().copied().collect();
        for group in graph.groups.values_mut() {
            group.members.retain(|member| match member {
                EntityRef::Group(child) => known.contains(child) && *child != group.id,
                EntityRef::Tag(_) => true,
            });
        }

        let edges: Vec<(GroupId, GroupId)> = graph
            .groups
            .values()
            .flat_map(|group| group.group_members().map(move |child| (group.id, child)))
            .collect();
        for (parent, child) in edges {
            graph.parents.entry(child).or_default().insert(parent);
        }
        graph
    }

    pub fn workspace_id(&self) -> WorkspaceId {
        self.workspace_id
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn contains(&self, group_id: GroupId) -> bool {
        self.groups.contains_key(&group_id)
    }

    pub fn group(&self, group_id: GroupId) -> Option<&Group> {
        self.groups.get(&group_id)
    }

    /// Returns the group or `GroupNotFound`.
    pub fn require(&self, group_id: GroupId) -> Result<&Group, GraphError> {
        self.groups
            .get(&group_id)
            .ok_or(GraphError::GroupNotFound(group_id))
    }

    /// All groups ordered by creation time, then id.
    pub fn groups(&self) -> Vec<&Group> {
        let mut groups: Vec<&Group> = self.groups.values().collect();
        groups.sort_by_key(|group| (group.created_at, group.id));
        groups
    }

    /// Looks a group up by name (case-insensitive).
    pub fn find_by_name(&self, name: &str) -> Option<GroupId> {
        self.names.get(&group_name_key(name)).copied()
    }

    /// Fails with `DuplicateName` when `name` is used by a group other than `except`.
    pub fn ensure_name_available(
        &self,
        name: &str,
        except: Option<GroupId>,
    ) -> Result<(), GraphError> {
        match self.find_by_name(name) {
            Some(existing) if Some(existing) != except => {
                Err(GraphError::DuplicateName(name.to_string()))
            }
            _ => Ok(()),
        }
    }

    /// Direct parents of a group.
    pub fn parents_of(&self, group_id: GroupId) -> BTreeSet<GroupId> {
        self.parents.get(&group_id).cloned().unwrap_or_default()
    }

    /// Every group that transitively contains `group_id`, excluding itself.
    pub fn ancestors_of(&self, group_id: GroupId) -> BTreeSet<GroupId> {
        let mut seen = BTreeSet::new();
        let mut queue: VecDeque<GroupId> = VecDeque::from([group_id]);
        while let Some(current) = queue.pop_front() {
            if let Some(parents) = self.parents.get(&current) {
                for parent in parents {
                    if seen.insert(*parent) {
                        queue.push_back(*parent);
                    }
                }
            }
        }
        seen
    }

    /// Validates one proposed edge against the committed graph.
    ///
    /// Returns the normalized member. Does not mutate.
    pub fn check_membership(
        &self,
        parent_id: GroupId,
        member: &EntityRef,
    ) -> Result<EntityRef, GraphError> {
        self.require(parent_id)?;
        match member {
            EntityRef::Tag(raw) => {
                EntityRef::tag(raw).ok_or_else(|| GraphError::InvalidTag(raw.clone()))
            }
            EntityRef::Group(member_id) => {
                let member_id = *member_id;
                if member_id == parent_id {
                    return Err(GraphError::Cycle {
                        parent: parent_id,
                        member: member_id,
                        reason: CycleReason::SelfReference,
                    });
                }
                self.require(member_id)?;
                if let Some(path) = self.find_path(member_id, parent_id) {
                    return Err(GraphError::Cycle {
                        parent: parent_id,
                        member: member_id,
                        reason: CycleReason::Cycle { path },
                    });
                }
                Ok(EntityRef::Group(member_id))
            }
        }
    }

    /// Validates a batch of members against this one snapshot.
    ///
    /// Every new edge starts at `parent_id`, so a cycle through any of them
    /// needs a committed path from a member back to the parent; checking
    /// members one by one is therefore exact. Duplicates collapse.
    pub fn check_memberships(
        &self,
        parent_id: GroupId,
        members: &[EntityRef],
    ) -> Result<Vec<EntityRef>, GraphError> {
        let mut accepted = BTreeSet::new();
        for member in members {
            accepted.insert(self.check_membership(parent_id, member)?);
        }
        Ok(accepted.into_iter().collect())
    }

    /// Depth-first search along group edges from `from`, returning the path
    /// `from -> ... -> to` when `to` is reachable.
    fn find_path(&self, from: GroupId, to: GroupId) -> Option<Vec<GroupId>> {
        let mut came_from: HashMap<GroupId, GroupId> = HashMap::new();
        let mut visited: HashSet<GroupId> = HashSet::from([from]);
        let mut stack = vec![from];

        while let Some(current) = stack.pop() {
            if current == to {
                let mut path = vec![current];
                let mut cursor = current;
                while let Some(previous) = came_from.get(&cursor) {
                    path.push(*previous);
                    cursor = *previous;
                }
                path.reverse();
                return Some(path);
            }

            let Some(group) = self.groups.get(&current) else {
                continue;
            };
            for child in group.group_members() {
                if visited.insert(child) {
                    came_from.insert(child, current);
                    stack.push(child);
                }
            }
        }
        None
    }

    /// Inserts a freshly created group. Members must already be validated.
    pub fn insert_group(&mut self, group: Group) {
        for child in group.group_members() {
            self.parents.entry(child).or_default().insert(group.id);
        }
        self.names.insert(group_name_key(&group.name), group.id);
        self.groups.insert(group.id, group);
    }

    /// Commits validated members. Returns the ones that were not present yet.
    pub fn add_members(
        &mut self,
        parent_id: GroupId,
        members: &[EntityRef],
    ) -> Result<Vec<EntityRef>, GraphError> {
        let parent = self
            .groups
            .get_mut(&parent_id)
            .ok_or(GraphError::GroupNotFound(parent_id))?;
        let mut added = Vec::new();
        for member in members {
            if parent.members.insert(member.clone()) {
                added.push(member.clone());
            }
        }
        for child in added.iter().filter_map(EntityRef::as_group) {
            self.parents.entry(child).or_default().insert(parent_id);
        }
        Ok(added)
    }

    /// Removes one edge. Returns whether it existed.
    pub fn remove_member(
        &mut self,
        parent_id: GroupId,
        member: &EntityRef,
    ) -> Result<bool, GraphError> {
        let parent = self
            .groups
            .get_mut(&parent_id)
            .ok_or(GraphError::GroupNotFound(parent_id))?;
        let removed = parent.members.remove(member);
        if let (true, EntityRef::Group(child)) = (removed, member) {
            self.unlink_parent(*child, parent_id);
        }
        Ok(removed)
    }

    /// Removes a group together with every edge touching it.
    ///
    /// Member tags and nested groups are left in place.
    pub fn remove_group(&mut self, group_id: GroupId) -> Result<Group, GraphError> {
        let group = self
            .groups
            .remove(&group_id)
            .ok_or(GraphError::GroupNotFound(group_id))?;
        self.names.remove(&group_name_key(&group.name));

        for child in group.group_members() {
            self.unlink_parent(child, group_id);
        }
        if let Some(parents) = self.parents.remove(&group_id) {
            for parent in parents {
                if let Some(parent_group) = self.groups.get_mut(&parent) {
                    parent_group.members.remove(&EntityRef::Group(group_id));
                }
            }
        }
        Ok(group)
    }

    /// Renames a group. The caller checks availability first.
    pub fn rename_group(&mut self, group_id: GroupId, name: String) -> Result<(), GraphError> {
        let group = self
            .groups
            .get_mut(&group_id)
            .ok_or(GraphError::GroupNotFound(group_id))?;
        self.names.remove(&group_name_key(&group.name));
        self.names.insert(group_name_key(&name), group_id);
        group.name = name;
        Ok(())
    }

    fn unlink_parent(&mut self, child: GroupId, parent: GroupId) {
        if let Some(parents) = self.parents.get_mut(&child) {
            parents.remove(&parent);
            if parents.is_empty() {
                self.parents.remove(&child);
            }
        }
    }
}
