//! Asset (configuration item) records as returned by the asset directory.

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::OnceLock;

use super::RelationshipRole;

/// A configuration item.
///
/// `id` is the authoritative key. `display_id` is what the relationship API is
/// queried with and may differ from `id`; a relationship can reference either,
/// so dedup bookkeeping has to track both.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Asset {
    pub id: u64,
    #[serde(default)]
    pub display_id: u64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub asset_type_id: Option<u64>,
    /// Primary-agent owner
    #[serde(default)]
    pub agent_id: Option<u64>,
    /// Secondary-user owner
    #[serde(default)]
    pub user_id: Option<u64>,
    /// Explicit manager
    #[serde(default, alias = "managed_by_id")]
    pub managed_by: Option<u64>,
    /// Per-asset-type custom fields; genuinely dynamic, left untyped
    #[serde(default)]
    pub type_fields: HashMap<String, Value>,
    /// Set when the asset was discovered through a seed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relationship: Option<RelationshipContext>,
}

impl Asset {
    /// Creates an asset whose display id equals its id.
    pub fn new(id: u64, name: impl Into<String>) -> Self {
        Self {
            id,
            display_id: id,
            name: name.into(),
            asset_type_id: None,
            agent_id: None,
            user_id: None,
            managed_by: None,
            type_fields: HashMap::new(),
            relationship: None,
        }
    }

    /// The id used for relationship-API requests. Some payloads omit
    /// `display_id`; fall back to `id` then.
    pub fn display_key(&self) -> u64 {
        if self.display_id == 0 {
            self.id
        } else {
            self.display_id
        }
    }

    /// True if `candidate` names this asset by either of its ids.
    pub fn is_identified_by(&self, candidate: u64) -> bool {
        candidate == self.id || candidate == self.display_key()
    }

    /// Owner id by field priority: primary agent, then user, then manager.
    pub fn owner_id(&self) -> Option<u64> {
        self.agent_id
            .filter(|id| *id != 0)
            .or(self.user_id.filter(|id| *id != 0))
            .or(self.managed_by.filter(|id| *id != 0))
    }

    /// All populated owner references, deduplicated, in priority order.
    pub fn owner_ids(&self) -> Vec<u64> {
        let mut out = Vec::with_capacity(3);
        for id in [self.agent_id, self.user_id, self.managed_by].into_iter().flatten() {
            if id != 0 && !out.contains(&id) {
                out.push(id);
            }
        }
        out
    }

    /// First whitespace-delimited token of the name.
    pub fn name_token(&self) -> Option<&str> {
        self.name.split_whitespace().next()
    }

    /// Value of the typed "environment" attribute, if any.
    ///
    /// Type fields carry a numeric suffix per asset type (`environment_7001`),
    /// so the key is matched by pattern rather than by exact name.
    pub fn environment(&self) -> Option<(&str, &str)> {
        static ENV_KEY: OnceLock<Option<Regex>> = OnceLock::new();
        let pattern = ENV_KEY
            .get_or_init(|| Regex::new(r"(?i)^environment(_\d+)?$").ok())
            .as_ref()?;

        let mut keys: Vec<&String> = self.type_fields.keys().filter(|k| pattern.is_match(k)).collect();
        keys.sort();
        keys.into_iter().find_map(|key| {
            self.type_fields
                .get(key)
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(|v| (key.as_str(), v))
        })
    }

    /// Attach discovery provenance.
    pub fn with_relationship(mut self, context: RelationshipContext) -> Self {
        self.relationship = Some(context);
        self
    }

    pub fn to_ref(&self) -> AssetRef {
        AssetRef {
            id: self.id,
            display_id: self.display_key(),
            name: self.name.clone(),
        }
    }
}

/// Lightweight pointer back to the asset that produced a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetRef {
    pub id: u64,
    pub display_id: u64,
    pub name: String,
}

/// How a related asset was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RelationKind {
    /// Returned by the relationship endpoint
    Direct { relationship_type_id: u64 },
    SimilarName,
    SameType,
    SameEnvironment,
}

impl RelationKind {
    pub fn is_fallback(&self) -> bool {
        !matches!(self, RelationKind::Direct { .. })
    }
}

impl fmt::Display for RelationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelationKind::Direct { relationship_type_id } => {
                write!(f, "Relationship type {}", relationship_type_id)
            }
            RelationKind::SimilarName => f.write_str("Similar Name"),
            RelationKind::SameType => f.write_str("Same Type"),
            RelationKind::SameEnvironment => f.write_str("Same Environment"),
        }
    }
}

/// Discovery metadata carried by a related asset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationshipContext {
    pub kind: RelationKind,
    /// Seed asset this one was discovered from
    pub origin_seed_id: u64,
    pub origin_seed_name: String,
    #[serde(default)]
    pub relationship_id: Option<u64>,
    /// Role of the related asset within the relationship
    #[serde(default)]
    pub role: Option<RelationshipRole>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl RelationshipContext {
    /// Context for a heuristic (fallback) match.
    pub fn heuristic(kind: RelationKind, seed: &Asset) -> Self {
        Self {
            kind,
            origin_seed_id: seed.id,
            origin_seed_name: seed.name.clone(),
            relationship_id: None,
            role: None,
            created_at: None,
            updated_at: None,
        }
    }
}

/// Entry of the asset-type catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetType {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub parent_asset_type_id: Option<u64>,
}

/// The tenant's asset-type catalog.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AssetTypeCatalog {
    pub types: Vec<AssetType>,
}

impl AssetTypeCatalog {
    pub fn new(types: Vec<AssetType>) -> Self {
        Self { types }
    }

    pub fn name_of(&self, type_id: u64) -> Option<&str> {
        self.types.iter().find(|t| t.id == type_id).map(|t| t.name.as_str())
    }

    /// Type ids whose name contains any configured name, case-insensitively.
    ///
    /// An empty `configured` list means "no restriction" and yields an empty set.
    pub fn match_configured(&self, configured: &[String]) -> HashSet<u64> {
        let needles: Vec<String> = configured
            .iter()
            .map(|n| n.trim().to_lowercase())
            .filter(|n| !n.is_empty())
            .collect();

        self.types
            .iter()
            .filter(|t| {
                let name = t.name.to_lowercase();
                needles.iter().any(|needle| name.contains(needle))
            })
            .map(|t| t.id)
            .collect()
    }
}
