//! Expansion result model.
//!
//! # Invariants
//! - `depth` counts group levels actually traversed; the root is level 1.
//! - A result with `truncated == false` is independent of the path used to
//!   reach its group and of the depth budget, as long as the budget covers
//!   `depth`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Flat set of atomic tags reachable from one group.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpansionResult {
    /// Reachable tag names.
    pub tags: BTreeSet<String>,
    /// Set when at least one branch hit the nesting ceiling.
    pub truncated: bool,
    /// Longest group chain traversed, root included.
    pub depth: usize,
}

impl ExpansionResult {
    /// Returns whether this result may be reused under `budget` remaining levels.
    ///
    /// Truncated results are only reusable under the exact budget that
    /// produced them, which the caller tracks separately.
    pub fn is_complete_within(&self, budget: usize) -> bool {
        !self.truncated && self.depth <= budget
    }
}
