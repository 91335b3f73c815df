//! Card-level set algebra.
//!
//! # Invariants
//! - Sets are keyed by card id; a card present on both sides of a union
//!   appears once, taken from the left operand.
//! - `intersection`, `union` and `symmetric_difference` are commutative,
//!   `union` is associative and `intersection` distributes over `union`
//!   for cards drawn from one consistent universe.

use crate::model::card::{Card, CardSet};
use std::collections::BTreeSet;

/// Cards whose tag set contains every tag in `tags`.
///
/// An empty `tags` matches every card.
pub fn with_all_tags<'a>(
    universe: impl IntoIterator<Item = &'a Card>,
    tags: &BTreeSet<String>,
) -> CardSet {
    universe
        .into_iter()
        .filter(|card| card.has_all(tags))
        .cloned()
        .collect()
}

/// Cards carrying at least one tag in `tags`.
///
/// An empty `tags` matches nothing.
pub fn with_any_tag<'a>(
    universe: impl IntoIterator<Item = &'a Card>,
    tags: &BTreeSet<String>,
) -> CardSet {
    universe
        .into_iter()
        .filter(|card| card.has_any(tags))
        .cloned()
        .collect()
}

pub fn intersection(left: &CardSet, right: &CardSet) -> CardSet {
    left.iter()
        .filter(|card| right.contains(&card.id))
        .cloned()
        .collect()
}

pub fn union(left: &CardSet, right: &CardSet) -> CardSet {
    left.iter().chain(right.iter()).cloned().collect()
}

pub fn difference(left: &CardSet, right: &CardSet) -> CardSet {
    left.iter()
        .filter(|card| !right.contains(&card.id))
        .cloned()
        .collect()
}

pub fn symmetric_difference(left: &CardSet, right: &CardSet) -> CardSet {
    union(&difference(left, right), &difference(right, left))
}

#[cfg(test)]
mod tests {
    use super::{difference, symmetric_difference, union, with_all_tags, with_any_tag};
    use crate::model::card::{Card, CardSet};
    use std::collections::BTreeSet;
    use uuid::Uuid;

    fn card(tags: &[&str]) -> Card {
        Card {
            id: Uuid::new_v4(),
            workspace_id: Uuid::nil(),
            tags: tags.iter().map(|tag| tag.to_string()).collect(),
        }
    }

    fn tags(values: &[&str]) -> BTreeSet<String> {
        values.iter().map(|tag| tag.to_string()).collect()
    }

    #[test]
    fn all_and_any_differ_for_multi_tag_operands() {
        let both = card(&["python", "java"]);
        let one = card(&["python"]);
        let none = card(&["go"]);
        let universe = vec![both.clone(), one.clone(), none];

        let all = with_all_tags(&universe, &tags(&["python", "java"]));
        assert_eq!(all.ids(), vec![both.id]);

        let any = with_any_tag(&universe, &tags(&["python", "java"]));
        assert_eq!(any.len(), 2);
        assert!(any.contains(&one.id));
    }

    #[test]
    fn empty_operand_edge_cases() {
        let universe = vec![card(&["a"]), card(&[])];
        assert_eq!(with_all_tags(&universe, &BTreeSet::new()).len(), 2);
        assert!(with_any_tag(&universe, &BTreeSet::new()).is_empty());
    }

    #[test]
    fn union_keeps_one_copy_per_card() {
        let shared = card(&["a"]);
        let left: CardSet = [shared.clone(), card(&["b"])].into_iter().collect();
        let right: CardSet = [shared.clone()].into_iter().collect();
        assert_eq!(union(&left, &right).len(), 2);
        assert_eq!(difference(&left, &right).len(), 1);
        assert_eq!(symmetric_difference(&left, &right).len(), 1);
    }
}
