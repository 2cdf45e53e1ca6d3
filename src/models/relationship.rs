//! Relationship records from the asset directory's relationship endpoint.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Asset;

/// Which side of a relationship an asset sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipRole {
    Primary,
    Secondary,
}

/// One side of a relationship.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint<'a> {
    pub id: u64,
    pub kind: &'a str,
}

impl Endpoint<'_> {
    pub fn is_asset(&self) -> bool {
        self.kind.eq_ignore_ascii_case("asset")
    }
}

/// A relationship between two endpoints, at least one of which is an asset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    pub id: u64,
    #[serde(default)]
    pub relationship_type_id: u64,
    pub primary_id: u64,
    #[serde(default = "asset_kind")]
    pub primary_type: String,
    pub secondary_id: u64,
    #[serde(default = "asset_kind")]
    pub secondary_type: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

fn asset_kind() -> String {
    "asset".to_string()
}

impl Relationship {
    pub fn primary(&self) -> Endpoint<'_> {
        Endpoint { id: self.primary_id, kind: &self.primary_type }
    }

    pub fn secondary(&self) -> Endpoint<'_> {
        Endpoint { id: self.secondary_id, kind: &self.secondary_type }
    }

    /// The endpoint opposite `seed`, with the role it plays.
    ///
    /// Returns `None` when the seed is not an asset endpoint of this
    /// relationship, when it is on both sides, or when the opposite endpoint
    /// is not an asset (a person, a ticket).
    pub fn counterpart_of(&self, seed: &Asset) -> Option<(u64, RelationshipRole)> {
        let primary = self.primary();
        let secondary = self.secondary();
        let seed_is_primary = primary.is_asset() && seed.is_identified_by(primary.id);
        let seed_is_secondary = secondary.is_asset() && seed.is_identified_by(secondary.id);

        match (seed_is_primary, seed_is_secondary) {
            (true, false) if secondary.is_asset() => Some((secondary.id, RelationshipRole::Secondary)),
            (false, true) if primary.is_asset() => Some((primary.id, RelationshipRole::Primary)),
            _ => None,
        }
    }
}
