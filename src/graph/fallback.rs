use crate::directory::FilterExpr;
use crate::models::{Asset, RelationKind};

use super::WalkerLimits;

/// Heuristic substitutes for relationship data, tried in this order.
///
/// None of them has a precision guarantee; they can and do surface assets
/// that are not actually connected to the seed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackStrategy {
    /// Name shares the seed's first token
    SimilarName,
    /// Same type id and name contains the seed's first token
    SameType,
    /// Same value of the typed environment attribute
    SameEnvironment,
}

impl FallbackStrategy {
    pub const ORDER: [FallbackStrategy; 3] = [
        FallbackStrategy::SimilarName,
        FallbackStrategy::SameType,
        FallbackStrategy::SameEnvironment,
    ];

    pub fn kind(self) -> RelationKind {
        match self {
            FallbackStrategy::SimilarName => RelationKind::SimilarName,
            FallbackStrategy::SameType => RelationKind::SameType,
            FallbackStrategy::SameEnvironment => RelationKind::SameEnvironment,
        }
    }

    /// Search filter for `seed`, or `None` when the seed lacks the data this
    /// strategy keys on.
    pub fn filter_for(self, seed: &Asset) -> Option<FilterExpr> {
        match self {
            FallbackStrategy::SimilarName => {
                let token = seed.name_token()?;
                Some(FilterExpr::text("name", token))
            }
            FallbackStrategy::SameType => {
                let token = seed.name_token()?;
                let type_id = seed.asset_type_id.filter(|id| *id != 0)?;
                Some(FilterExpr::number("asset_type_id", type_id).and(FilterExpr::text("name", token)))
            }
            FallbackStrategy::SameEnvironment => {
                let (key, value) = seed.environment()?;
                Some(FilterExpr::text(key, value))
            }
        }
    }

    /// Most new assets this strategy may add per seed; `None` is uncapped.
    pub fn cap(self, limits: &WalkerLimits) -> Option<usize> {
        match self {
            FallbackStrategy::SimilarName => None,
            FallbackStrategy::SameType => Some(limits.same_type_cap),
            FallbackStrategy::SameEnvironment => Some(limits.same_environment_cap),
        }
    }
}
