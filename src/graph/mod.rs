//! One-hop expansion of seed assets into related assets.
//!
//! The relationship endpoint is tried first. When it answers 404, or returns
//! nothing for a seed, it is considered absent for the rest of the run and
//! every later seed goes through the heuristic fallbacks instead.

mod fallback;
mod walker;

pub use fallback::FallbackStrategy;
pub use walker::{RelationshipWalker, WalkerLimits};

use serde::Serialize;

use crate::models::Asset;

/// Result of expanding a set of seeds.
#[derive(Debug, Clone, Default, Serialize)]
pub struct WalkOutcome {
    /// Related assets, unordered, never including a seed
    pub related: Vec<Asset>,
    /// The relationship endpoint was marked unavailable during this run
    pub relationship_unavailable: bool,
    /// At least one fallback strategy ran
    pub fallback_used: bool,
    /// The run stopped early; `related` holds what was gathered before
    pub cancelled: bool,
    pub seeds_processed: usize,
    /// User-facing notes about degraded paths
    pub warnings: Vec<String>,
}
