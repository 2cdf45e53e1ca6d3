use serde::{Deserialize, Serialize};
use std::fmt;

use super::{Asset, AssetRef, Identity, RelationKind};

/// Provenance tag for parties added by hand through people search.
pub const MANUAL_SOURCE: &str = "Manually added";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartyRole {
    Approver,
    Stakeholder,
}

impl fmt::Display for PartyRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PartyRole::Approver => f.write_str("Approver"),
            PartyRole::Stakeholder => f.write_str("Stakeholder"),
        }
    }
}

/// A person affected by the change, with the asset that made them so.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImpactedPartyRecord {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub department: Option<String>,
    pub role: PartyRole,
    /// Human-readable provenance
    pub source: String,
    #[serde(default)]
    pub source_asset: Option<AssetRef>,
}

impl ImpactedPartyRecord {
    /// Record for the owner of `asset`.
    pub fn from_asset_owner(identity: &Identity, role: PartyRole, asset: &Asset) -> Self {
        let source = match &asset.relationship {
            Some(ctx) => match ctx.kind {
                RelationKind::Direct { .. } => {
                    format!("Owner of {} (related to {})", asset.name, ctx.origin_seed_name)
                }
                kind => format!("Owner of {} ({} as {})", asset.name, kind, ctx.origin_seed_name),
            },
            None => format!("Owner of {}", asset.name),
        };

        Self {
            id: identity.id,
            name: identity.name.clone(),
            email: identity.email.clone(),
            department: identity.department().map(String::from),
            role,
            source,
            source_asset: Some(asset.to_ref()),
        }
    }

    /// Record for a person added by hand.
    pub fn manual(identity: &Identity, role: PartyRole) -> Self {
        Self {
            id: identity.id,
            name: identity.name.clone(),
            email: identity.email.clone(),
            department: identity.department().map(String::from),
            role,
            source: MANUAL_SOURCE.to_string(),
            source_asset: None,
        }
    }
}
