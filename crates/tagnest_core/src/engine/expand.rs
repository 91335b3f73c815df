//! Group expansion.
//!
//! # Responsibility
//! - Resolve a group to the flat set of atomic tags reachable from it.
//! - Stop descending at the nesting ceiling and flag the result truncated.
//!
//! # Invariants
//! - The root group sits at level 1; a child at level `d + 1 > max_depth` is
//!   not entered.
//! - Memoization is keyed by group id. Complete results are reused whenever
//!   the remaining budget covers their depth; truncated results only under
//!   the budget that produced them.
//! - Only the committed graph is read; the cycle guard keeps it acyclic, so
//!   recursion is bounded by `max_depth`.

use crate::engine::cache::{CacheError, ExpansionCache};
use crate::engine::graph::{GraphError, GroupGraph};
use crate::model::expansion::ExpansionResult;
use crate::model::group::GroupId;
use log::warn;
use std::collections::HashMap;
use std::sync::Arc;

/// One expansion pass over a fixed graph snapshot.
///
/// Holds a local memo so shared subgraphs (diamonds) are walked once even
/// when no cache is attached.
pub struct Expander<'a> {
    graph: &'a GroupGraph,
    cache: Option<&'a ExpansionCache>,
    cache_budget: usize,
    complete: HashMap<GroupId, Arc<ExpansionResult>>,
    partial: HashMap<(GroupId, usize), Arc<ExpansionResult>>,
    cache_warned: bool,
}

impl<'a> Expander<'a> {
    /// Creates an expander without a cache.
    pub fn new(graph: &'a GroupGraph) -> Self {
        Self {
            graph,
            cache: None,
            cache_budget: 0,
            complete: HashMap::new(),
            partial: HashMap::new(),
            cache_warned: false,
        }
    }

    /// Creates an expander that reads and fills `cache`.
    ///
    /// `cache_budget` is the depth ceiling the cache is keyed for; truncated
    /// results are cached only when computed under exactly that budget.
    pub fn with_cache(
        graph: &'a GroupGraph,
        cache: &'a ExpansionCache,
        cache_budget: usize,
    ) -> Self {
        Self {
            cache: Some(cache),
            cache_budget,
            ..Self::new(graph)
        }
    }

    /// Expands one group with `max_depth` levels (at least one).
    pub fn expand(
        &mut self,
        group_id: GroupId,
        max_depth: usize,
    ) -> Result<Arc<ExpansionResult>, GraphError> {
        self.resolve(group_id, max_depth.max(1))
    }

    fn resolve(
        &mut self,
        group_id: GroupId,
        budget: usize,
    ) -> Result<Arc<ExpansionResult>, GraphError> {
        if let Some(found) = self.complete.get(&group_id) {
            if found.is_complete_within(budget) {
                return Ok(Arc::clone(found));
            }
        }
        if let Some(found) = self.partial.get(&(group_id, budget)) {
            return Ok(Arc::clone(found));
        }
        if let Some(hit) = self.cached(group_id, budget) {
            if !hit.truncated {
                self.complete.insert(group_id, Arc::clone(&hit));
            }
            return Ok(hit);
        }

        let graph = self.graph;
        let group = graph.require(group_id)?;
        let mut result = ExpansionResult {
            tags: group.tag_members().map(str::to_string).collect(),
            truncated: false,
            depth: 1,
        };

        for child in group.group_members() {
            if budget <= 1 {
                result.truncated = true;
                break;
            }
            let nested = self.resolve(child, budget - 1)?;
            result.tags.extend(nested.tags.iter().cloned());
            result.truncated |= nested.truncated;
            result.depth = result.depth.max(nested.depth + 1);
        }

        let result = Arc::new(result);
        if result.truncated {
            self.partial.insert((group_id, budget), Arc::clone(&result));
        } else {
            self.complete.insert(group_id, Arc::clone(&result));
        }
        self.store(group_id, budget, &result);
        Ok(result)
    }

    fn cached(&mut self, group_id: GroupId, budget: usize) -> Option<Arc<ExpansionResult>> {
        let cache = self.cache?;
        let cache_budget = self.cache_budget;
        let lookup = cache.lookup(group_id, |entry| {
            entry.is_complete_within(budget) || (entry.truncated && budget == cache_budget)
        });
        match lookup {
            Ok(found) => found,
            Err(CacheError::Unavailable) => {
                if !self.cache_warned {
                    warn!("event=cache_lookup module=expand status=degraded reason=cache_unavailable");
                    self.cache_warned = true;
                }
                None
            }
        }
    }

    fn store(&self, group_id: GroupId, budget: usize, result: &Arc<ExpansionResult>) {
        if let Some(cache) = self.cache {
            if !result.truncated || budget == self.cache_budget {
                cache.insert(group_id, Arc::clone(result));
            }
        }
    }
}

/// Expands one group without any cache.
pub fn expand_uncached(
    graph: &GroupGraph,
    group_id: GroupId,
    max_depth: usize,
) -> Result<Arc<ExpansionResult>, GraphError> {
    Expander::new(graph).expand(group_id, max_depth)
}
