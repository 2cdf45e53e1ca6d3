//! Clients for the two external directories: the asset directory
//! (configuration items, relationships, asset types) and the identity
//! directory (requesters and agents).

mod client;
mod filter;
mod mock;
mod types;

pub use client::HttpDirectoryClient;
pub use filter::{FilterExpr, FilterValue};
pub use mock::MockDirectory;
pub use types::Person;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{Asset, AssetType, Relationship};

/// Asset directory service.
///
/// A 404 from `list_relationships` surfaces as [`crate::ImpactError::NotFound`]
/// and means the capability is absent for this tenant.
#[async_trait]
pub trait AssetDirectory: Send + Sync {
    /// Relationships involving the asset with this display id.
    async fn list_relationships(&self, display_id: u64) -> Result<Vec<Relationship>>;

    /// Full details for one asset.
    async fn get_asset(&self, id: u64) -> Result<Asset>;

    /// One page of assets matching `filter` (pages are 1-based).
    async fn search_assets(&self, filter: &FilterExpr, page: usize, per_page: usize) -> Result<Vec<Asset>>;

    /// One page of the asset-type catalog.
    async fn list_asset_types(&self, page: usize, per_page: usize) -> Result<Vec<AssetType>>;
}

/// Identity directory with two collections sharing one id space.
#[async_trait]
pub trait IdentityDirectory: Send + Sync {
    async fn get_requester(&self, id: u64) -> Result<Person>;

    async fn get_agent(&self, id: u64) -> Result<Person>;

    async fn search_requesters(&self, term: &str, page: usize, per_page: usize) -> Result<Vec<Person>>;

    async fn search_agents(&self, term: &str, page: usize, per_page: usize) -> Result<Vec<Person>>;
}
