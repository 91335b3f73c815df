//! Group graph, expansion and expansion cache.
//!
//! # Responsibility
//! - Keep the committed membership DAG of one workspace in memory.
//! - Resolve groups into flat tag sets with a depth ceiling.
//! - Memoize expansions per workspace with LRU/TTL bounds.
//!
//! # Invariants
//! - The graph is acyclic; the cycle guard runs before every edge commit.
//! - Cache entries never outlive a change to their subgraph.

pub mod cache;
pub mod expand;
pub mod graph;
