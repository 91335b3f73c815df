//! Group domain model.
//!
//! # Responsibility
//! - Define `Group` nodes and the `EntityRef` members they hold.
//! - Normalize user-provided group names and tag names.
//!
//! # Invariants
//! - Group names are trimmed and non-blank; uniqueness is case-insensitive.
//! - Tag names are trimmed, lowercased and non-blank.
//! - A group never lists itself as a member.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Isolation boundary id. Supplied by the tenancy layer.
pub type WorkspaceId = Uuid;

/// Stable group identifier.
pub type GroupId = Uuid;

/// One member of a group: either an atomic tag or a nested group.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum EntityRef {
    /// Atomic tag, by normalized name.
    Tag(String),
    /// Nested group.
    Group(GroupId),
}

impl EntityRef {
    /// Builds a tag reference from raw input, normalizing the name.
    ///
    /// Returns `None` for blank input.
    pub fn tag(name: &str) -> Option<Self> {
        normalize_tag(name).map(Self::Tag)
    }

    /// Returns the nested group id, if this is a group reference.
    pub fn as_group(&self) -> Option<GroupId> {
        match self {
            Self::Group(id) => Some(*id),
            Self::Tag(_) => None,
        }
    }

    /// Returns the tag name, if this is a tag reference.
    pub fn as_tag(&self) -> Option<&str> {
        match self {
            Self::Tag(name) => Some(name.as_str()),
            Self::Group(_) => None,
        }
    }
}

impl Display for EntityRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Tag(name) => write!(f, "tag:{name}"),
            Self::Group(id) => write!(f, "group:{id}"),
        }
    }
}

/// Named composite node in the membership graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    /// Stable id.
    pub id: GroupId,
    /// Owning workspace.
    pub workspace_id: WorkspaceId,
    /// Display name, unique per workspace (case-insensitive).
    pub name: String,
    /// Direct members.
    pub members: BTreeSet<EntityRef>,
    /// Epoch ms creation timestamp.
    pub created_at: i64,
}

impl Group {
    /// Iterates direct tag members.
    pub fn tag_members(&self) -> impl Iterator<Item = &str> {
        self.members.iter().filter_map(EntityRef::as_tag)
    }

    /// Iterates direct group members.
    pub fn group_members(&self) -> impl Iterator<Item = GroupId> + '_ {
        self.members.iter().filter_map(EntityRef::as_group)
    }
}

/// Membership edges added to and removed from one parent group.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EdgeDelta {
    pub added: Vec<EntityRef>,
    pub removed: Vec<EntityRef>,
}

impl EdgeDelta {
    pub fn add(members: Vec<EntityRef>) -> Self {
        Self {
            added: members,
            removed: Vec::new(),
        }
    }

    pub fn remove(member: EntityRef) -> Self {
        Self {
            added: Vec::new(),
            removed: vec![member],
        }
    }
}

/// Normalizes one tag name. Returns `None` for blank input.
pub fn normalize_tag(tag: &str) -> Option<String> {
    let trimmed = tag.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_lowercase())
    }
}

/// Normalizes one group name. Returns `None` for blank input.
///
/// Case is preserved for display; use [`group_name_key`] for comparisons.
pub fn normalize_group_name(name: &str) -> Option<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Case-folded key used for per-workspace name uniqueness.
pub fn group_name_key(name: &str) -> String {
    name.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::{group_name_key, normalize_group_name, normalize_tag, EntityRef};

    #[test]
    fn tag_names_are_trimmed_and_lowercased() {
        assert_eq!(normalize_tag("  Python "), Some("python".to_string()));
        assert_eq!(normalize_tag("   "), None);
        assert_eq!(
            EntityRef::tag("Team-Frontend"),
            Some(EntityRef::Tag("team-frontend".to_string()))
        );
    }

    #[test]
    fn group_names_keep_case_but_compare_folded() {
        assert_eq!(
            normalize_group_name(" Backend "),
            Some("Backend".to_string())
        );
        assert_eq!(normalize_group_name("\t"), None);
        assert_eq!(group_name_key("Backend"), group_name_key(" BACKEND"));
    }

    #[test]
    fn entity_ref_serializes_with_kind_tag() {
        let value = serde_json::to_value(EntityRef::Tag("java".to_string())).unwrap();
        assert_eq!(value["kind"], "tag");
        assert_eq!(value["id"], "java");
    }
}
