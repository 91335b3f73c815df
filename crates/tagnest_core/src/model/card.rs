//! Card model and card-level set container.
//!
//! Cards are owned outside this crate. The algebra layer only reads them,
//! apart from the group-to-card dispatch which adds tags.

use serde::{Deserialize, Serialize};
use std::collections::btree_map::{self, BTreeMap};
use std::collections::BTreeSet;
use uuid::Uuid;

use crate::model::group::WorkspaceId;

/// Stable card identifier.
pub type CardId = Uuid;

/// Card read model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Card {
    pub id: CardId,
    pub workspace_id: WorkspaceId,
    /// Normalized tag names.
    pub tags: BTreeSet<String>,
}

impl Card {
    /// Returns true when every tag in `required` is present on this card.
    pub fn has_all(&self, required: &BTreeSet<String>) -> bool {
        required.is_subset(&self.tags)
    }

    /// Returns true when at least one tag in `candidates` is present.
    pub fn has_any(&self, candidates: &BTreeSet<String>) -> bool {
        !self.tags.is_disjoint(candidates)
    }
}

/// Set of cards keyed by identity.
///
/// Inserting a card whose id is already present keeps the existing entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardSet {
    cards: BTreeMap<CardId, Card>,
}

impl CardSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a card unless one with the same id is already present.
    pub fn insert(&mut self, card: Card) {
        self.cards.entry(card.id).or_insert(card);
    }

    pub fn contains(&self, id: &CardId) -> bool {
        self.cards.contains_key(id)
    }

    pub fn get(&self, id: &CardId) -> Option<&Card> {
        self.cards.get(id)
    }

    pub fn len(&self) -> usize {
        self.cards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cards.is_empty()
    }

    pub fn iter(&self) -> btree_map::Values<'_, CardId, Card> {
        self.cards.values()
    }

    /// Card ids in ascending order.
    pub fn ids(&self) -> Vec<CardId> {
        self.cards.keys().copied().collect()
    }
}

impl FromIterator<Card> for CardSet {
    fn from_iter<I: IntoIterator<Item = Card>>(iter: I) -> Self {
        let mut set = CardSet::new();
        for card in iter {
            set.insert(card);
        }
        set
    }
}

impl IntoIterator for CardSet {
    type Item = Card;
    type IntoIter = btree_map::IntoValues<CardId, Card>;

    fn into_iter(self) -> Self::IntoIter {
        self.cards.into_values()
    }
}

impl<'a> IntoIterator for &'a CardSet {
    type Item = &'a Card;
    type IntoIter = btree_map::Values<'a, CardId, Card>;

    fn into_iter(self) -> Self::IntoIter {
        self.cards.values()
    }
}
