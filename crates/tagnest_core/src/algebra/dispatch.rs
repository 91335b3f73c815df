//! Source/target dispatch for drag-and-apply operations.
//!
//! # Responsibility
//! - Name what can be applied (`SourceRef`) and where (`TargetRef`).
//! - Map every `(SourceKind, TargetKind)` pair to one `DispatchAction`.
//! - Define how each filter zone folds an operand into a selection.
//!
//! # Invariants
//! - The routing table is a closed, exhaustive `match`; unlisted pairs
//!   resolve to `None` and are rejected by the engine.
//! - Actions with a group source expand through the cache.
//! - Actions that add membership pass the cycle guard first.

use crate::algebra::card_set::{difference, intersection, union, with_all_tags, with_any_tag};
use crate::model::card::{Card, CardId, CardSet};
use crate::model::group::{EntityRef, GroupId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt::{Display, Formatter};

/// Filter zone a tag or group can be dropped on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Zone {
    /// OR: add cards carrying any operand tag.
    Union,
    /// AND: keep cards carrying every operand tag.
    Intersection,
    /// NOT: drop cards carrying any operand tag.
    Exclusion,
}

impl Zone {
    /// Cards of `universe` the operand selects for this zone.
    pub fn matches<'a>(
        self,
        universe: impl IntoIterator<Item = &'a Card>,
        tags: &BTreeSet<String>,
    ) -> CardSet {
        match self {
            Self::Intersection => with_all_tags(universe, tags),
            Self::Union | Self::Exclusion => with_any_tag(universe, tags),
        }
    }

    /// Folds operand matches into the current selection.
    pub fn combine(self, selection: &CardSet, matches: &CardSet) -> CardSet {
        match self {
            Self::Union => union(selection, matches),
            Self::Intersection => intersection(selection, matches),
            Self::Exclusion => difference(selection, matches),
        }
    }

    /// Whether an absent selection starts from the whole universe (true)
    /// or from nothing (false).
    pub fn starts_from_universe(self) -> bool {
        !matches!(self, Self::Union)
    }
}

/// What is being applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceRef {
    Tag(String),
    Group(GroupId),
    /// Multi-selection of tags and groups dragged together.
    Selection(Vec<EntityRef>),
}

impl SourceRef {
    pub fn kind(&self) -> SourceKind {
        match self {
            Self::Tag(_) => SourceKind::Tag,
            Self::Group(_) => SourceKind::Group,
            Self::Selection(_) => SourceKind::Selection,
        }
    }
}

/// Where it is being applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetRef {
    /// A filter zone. `selection` is the zone's current content; `None`
    /// means the zone's neutral start (universe for AND/NOT, empty for OR).
    Zone {
        zone: Zone,
        selection: Option<CardSet>,
    },
    Card(CardId),
    Group(GroupId),
}

impl TargetRef {
    /// Zone target with a neutral start.
    pub fn zone(zone: Zone) -> Self {
        Self::Zone {
            zone,
            selection: None,
        }
    }

    pub fn kind(&self) -> TargetKind {
        match self {
            Self::Zone { zone, .. } => match zone {
                Zone::Union => TargetKind::UnionZone,
                Zone::Intersection => TargetKind::IntersectionZone,
                Zone::Exclusion => TargetKind::ExclusionZone,
            },
            Self::Card(_) => TargetKind::Card,
            Self::Group(_) => TargetKind::Group,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceKind {
    Tag,
    Group,
    Selection,
}

impl SourceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Tag => "tag",
            Self::Group => "group",
            Self::Selection => "selection",
        }
    }
}

impl Display for SourceKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetKind {
    UnionZone,
    IntersectionZone,
    ExclusionZone,
    Card,
    Group,
}

impl TargetKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::UnionZone => "union_zone",
            Self::IntersectionZone => "intersection_zone",
            Self::ExclusionZone => "exclusion_zone",
            Self::Card => "card",
            Self::Group => "group",
        }
    }
}

impl Display for TargetKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Behavior selected for one source/target pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchAction {
    /// Filter a zone with a single-tag set.
    FilterWithTag,
    /// Expand the group (cache-assisted) and filter a zone with its tags.
    FilterWithExpansion,
    /// Expand the group and add its tags to a card.
    TagCardWithExpansion,
    /// Add a tag to a group; trivially acyclic.
    AddTagMember,
    /// Nest a group inside another after a full cycle check.
    NestGroup,
    /// Add several members atomically.
    AddMembersBatch,
}

impl DispatchAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::FilterWithTag => "filter_with_tag",
            Self::FilterWithExpansion => "filter_with_expansion",
            Self::TagCardWithExpansion => "tag_card_with_expansion",
            Self::AddTagMember => "add_tag_member",
            Self::NestGroup => "nest_group",
            Self::AddMembersBatch => "add_members_batch",
        }
    }
}

/// Routing table.
pub fn route(source: SourceKind, target: TargetKind) -> Option<DispatchAction> {
    use TargetKind::{Card, ExclusionZone, Group, IntersectionZone, UnionZone};

    match (source, target) {
        (SourceKind::Tag, UnionZone | IntersectionZone | ExclusionZone) => {
            Some(DispatchAction::FilterWithTag)
        }
        (SourceKind::Group, UnionZone | IntersectionZone | ExclusionZone) => {
            Some(DispatchAction::FilterWithExpansion)
        }
        (SourceKind::Group, Card) => Some(DispatchAction::TagCardWithExpansion),
        (SourceKind::Tag, Group) => Some(DispatchAction::AddTagMember),
        (SourceKind::Group, Group) => Some(DispatchAction::NestGroup),
        (SourceKind::Selection, Group) => Some(DispatchAction::AddMembersBatch),
        (SourceKind::Tag, Card) => None,
        (SourceKind::Selection, UnionZone | IntersectionZone | ExclusionZone | Card) => None,
    }
}

/// Outcome of one `apply` call.
#[derive(Debug, Clone, PartialEq)]
pub enum ApplyResult {
    /// New content of a filter zone.
    Selection {
        zone: Zone,
        cards: CardSet,
        /// Operand expansion hit the nesting ceiling.
        truncated: bool,
    },
    /// Card after tags were added.
    CardTagged {
        card: Card,
        added: BTreeSet<String>,
        truncated: bool,
    },
    /// Membership accepted; `added` excludes members already present.
    MembershipAdded {
        group_id: GroupId,
        added: Vec<EntityRef>,
    },
}
