//! Engine configuration.
//!
//! # Responsibility
//! - Hold tunables for expansion depth, cache sizing and invalidation.
//! - Validate host-provided values before any engine is constructed.
//!
//! # Invariants
//! - Every field has a default; partial documents deserialize cleanly.
//! - Engines never run with a configuration that failed `validate()`.

use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::Duration;

pub const DEFAULT_MAX_DEPTH: usize = 10;
pub const MAX_DEPTH_CEILING: usize = 64;
pub const DEFAULT_CACHE_CAPACITY: u64 = 10_000;
pub const DEFAULT_CACHE_TTL_SECS: u64 = 300;

/// How mutations clear cached expansions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvalidationStrategy {
    /// Drop the mutated group and every ancestor found via the reverse index.
    #[default]
    Transitive,
    /// Drop every cached expansion of the workspace.
    FlushAll,
}

/// Expansion cache settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// When false, every lookup reports the cache unavailable and expansions
    /// are recomputed from the graph.
    pub enabled: bool,
    /// Maximum number of cached expansions per workspace.
    pub capacity: u64,
    /// Entry lifetime measured from insertion.
    pub ttl_secs: u64,
    pub invalidation: InvalidationStrategy,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            capacity: DEFAULT_CACHE_CAPACITY,
            ttl_secs: DEFAULT_CACHE_TTL_SECS,
            invalidation: InvalidationStrategy::Transitive,
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

/// Per-workspace engine settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Nesting ceiling for expansion; the root group is level 1.
    pub max_depth: usize,
    /// Ask storage for tag-superset matches instead of filtering in memory.
    pub intersection_pushdown: bool,
    pub cache: CacheConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
            intersection_pushdown: false,
            cache: CacheConfig::default(),
        }
    }
}

/// Invalid configuration value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    MaxDepthOutOfRange(usize),
    ZeroCacheCapacity,
    ZeroCacheTtl,
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MaxDepthOutOfRange(value) => write!(
                f,
                "max_depth must be within 1..={MAX_DEPTH_CEILING}, got {value}"
            ),
            Self::ZeroCacheCapacity => write!(f, "cache.capacity must be greater than zero"),
            Self::ZeroCacheTtl => write!(f, "cache.ttl_secs must be greater than zero"),
        }
    }
}

impl Error for ConfigError {}

impl EngineConfig {
    /// Checks value ranges.
    ///
    /// # Errors
    /// - `max_depth` outside `1..=64`.
    /// - zero cache capacity or TTL.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_depth == 0 || self.max_depth > MAX_DEPTH_CEILING {
            return Err(ConfigError::MaxDepthOutOfRange(self.max_depth));
        }
        if self.cache.capacity == 0 {
            return Err(ConfigError::ZeroCacheCapacity);
        }
        if self.cache.ttl_secs == 0 {
            return Err(ConfigError::ZeroCacheTtl);
        }
        Ok(())
    }
}
