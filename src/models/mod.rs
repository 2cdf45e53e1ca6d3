//! Records the engine works with: assets and their relationships, people
//! resolved from the identity directory, and the impacted-party output.

mod asset;
mod identity;
mod party;
mod relationship;

pub use asset::{Asset, AssetRef, AssetType, AssetTypeCatalog, RelationKind, RelationshipContext};
pub use identity::{Identity, IdentityKind};
pub use party::{ImpactedPartyRecord, PartyRole, MANUAL_SOURCE};
pub use relationship::{Endpoint, Relationship, RelationshipRole};
