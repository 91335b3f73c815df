//! Card-set algebra and drag-and-apply dispatch.
//!
//! # Responsibility
//! - Pure set operations over cards (`card_set`).
//! - The closed source/target routing table and zone semantics (`dispatch`).
//!
//! # Invariants
//! - Nothing here touches storage, the graph or the cache; the engine feeds
//!   in card universes and expanded tag sets.

pub mod card_set;
pub mod dispatch;
