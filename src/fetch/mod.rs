//! Paginated, delay-throttled access to the directories.
//!
//! Nothing here returns an error to its caller: a failed page ends that fetch
//! chain and whatever was accumulated is returned. Only complete results are
//! written to the cache, so a partial answer is retried on the next miss.

mod rate;

pub use rate::RatePlan;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::cache::{digest_key, CacheFamilies, TtlCache};
use crate::directory::{AssetDirectory, FilterExpr, IdentityDirectory, Person};
use crate::error::ImpactError;
use crate::models::{Asset, AssetType, Relationship};

/// Hard cap on items per page imposed by the platform.
pub const MAX_PAGE_SIZE: usize = 100;

/// One page of results. `has_more` is inferred: a full page implies another.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub has_more: bool,
}

/// Accumulated pages and whether the walk ended normally.
#[derive(Debug, Clone, PartialEq)]
pub struct Paged<T> {
    pub items: Vec<T>,
    /// False when a page failed and `items` is partial
    pub complete: bool,
}

/// Outcome of a relationship lookup for one asset.
#[derive(Debug, Clone, PartialEq)]
pub enum RelationshipLookup {
    Found(Vec<Relationship>),
    /// 404-class answer: the capability is absent
    Unsupported,
    /// Transient failure; the capability may still work for other assets
    Failed(String),
}

pub struct RateLimitedFetcher {
    assets: Arc<dyn AssetDirectory>,
    identities: Arc<dyn IdentityDirectory>,
    cache: TtlCache,
    families: CacheFamilies,
    page_size: usize,
    page_delay: Duration,
}

impl RateLimitedFetcher {
    /// Full pages, no delay and default cache TTLs until configured otherwise.
    pub fn new(assets: Arc<dyn AssetDirectory>, identities: Arc<dyn IdentityDirectory>, cache: TtlCache) -> Self {
        Self {
            assets,
            identities,
            cache,
            families: CacheFamilies::default(),
            page_size: MAX_PAGE_SIZE,
            page_delay: Duration::ZERO,
        }
    }

    /// `page_size` is clamped to `1..=MAX_PAGE_SIZE`.
    pub fn with_paging(mut self, page_size: usize, page_delay: Duration) -> Self {
        self.page_size = page_size.clamp(1, MAX_PAGE_SIZE);
        self.page_delay = page_delay;
        self
    }

    pub fn with_families(mut self, families: CacheFamilies) -> Self {
        self.families = families;
        self
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn page_delay(&self) -> Duration {
        self.page_delay
    }

    pub fn cache(&self) -> &TtlCache {
        &self.cache
    }

    pub fn families(&self) -> &CacheFamilies {
        &self.families
    }

    /// Fetch a single page through `fetch(page, per_page)`.
    pub async fn fetch_page<T, F, Fut>(&self, page: usize, fetch: F) -> Result<Page<T>, ImpactError>
    where
        F: FnOnce(usize, usize) -> Fut,
        Fut: Future<Output = Result<Vec<T>, ImpactError>>,
    {
        let items = fetch(page, self.page_size).await?;
        let has_more = items.len() == self.page_size;
        Ok(Page { items, has_more })
    }

    /// Walk pages 1..=`page_cap` (or until `limit` items), sleeping the
    /// configured delay between requests. An error ends the walk early.
    pub async fn paginate<T, F, Fut>(&self, label: &str, page_cap: usize, limit: Option<usize>, fetch: F) -> Paged<T>
    where
        F: Fn(usize, usize) -> Fut,
        Fut: Future<Output = Result<Vec<T>, ImpactError>>,
    {
        let mut items = Vec::new();
        for page in 1..=page_cap.max(1) {
            if page > 1 && !self.page_delay.is_zero() {
                log::debug!("{}: waiting {:?} before page {}", label, self.page_delay, page);
                tokio::time::sleep(self.page_delay).await;
            }

            match self.fetch_page(page, &fetch).await {
                Ok(result) => {
                    log::debug!("{}: page {} returned {} items", label, page, result.items.len());
                    items.extend(result.items);
                    if let Some(limit) = limit {
                        if items.len() >= limit {
                            items.truncate(limit);
                            break;
                        }
                    }
                    if !result.has_more {
                        break;
                    }
                }
                Err(e) => {
                    log::warn!("{}: page {} failed, keeping {} items: {}", label, page, items.len(), e);
                    return Paged { items, complete: false };
                }
            }
        }
        Paged { items, complete: true }
    }

    /// Assets matching `filter`, up to `page_cap` pages and `limit` items.
    /// Cached in the `search` family under a digest of the request.
    pub async fn search_assets(&self, filter: &FilterExpr, page_cap: usize, limit: Option<usize>) -> Vec<Asset> {
        let key = digest_key(&format!("{}|{}|{:?}|{}", filter, page_cap, limit, self.page_size));
        if let Some(hit) = self.cache.get::<Vec<Asset>>(&self.families.search, &key).await {
            return hit;
        }

        let label = format!("search assets [{}]", filter);
        let result = self
            .paginate(&label, page_cap, limit, |page, per_page| async move {
                self.assets.search_assets(filter, page, per_page).await
            })
            .await;
        if result.complete {
            self.cache.set(&self.families.search, &key, &result.items).await;
        }
        result.items
    }

    /// The whole asset-type catalog, up to `page_cap` pages.
    pub async fn fetch_all_asset_types(&self, page_cap: usize) -> Vec<AssetType> {
        let family = &self.families.asset_types;
        if let Some(hit) = self.cache.get::<Vec<AssetType>>(family, "all").await {
            return hit;
        }

        let result = self
            .paginate("asset types", page_cap, None, |page, per_page| async move {
                self.assets.list_asset_types(page, per_page).await
            })
            .await;
        if result.complete {
            self.cache.set(family, "all", &result.items).await;
        }
        result.items
    }

    pub async fn fetch_asset(&self, id: u64) -> Option<Asset> {
        let key = id.to_string();
        if let Some(hit) = self.cache.get::<Asset>(&self.families.asset, &key).await {
            return Some(hit);
        }

        match self.assets.get_asset(id).await {
            Ok(asset) => {
                self.cache.set(&self.families.asset, &key, &asset).await;
                Some(asset)
            }
            Err(e) if e.is_not_found() => {
                log::debug!("Asset {} not found", id);
                None
            }
            Err(e) => {
                log::warn!("Asset {} fetch failed: {}", id, e);
                None
            }
        }
    }

    /// Relationships of the asset with this display id. Only successful
    /// answers are cached; a 404 must be observed live by every run.
    pub async fn fetch_relationships(&self, display_id: u64) -> RelationshipLookup {
        let key = display_id.to_string();
        let family = &self.families.relationships;
        if let Some(hit) = self.cache.get::<Vec<Relationship>>(family, &key).await {
            return RelationshipLookup::Found(hit);
        }

        match self.assets.list_relationships(display_id).await {
            Ok(relationships) => {
                self.cache.set(family, &key, &relationships).await;
                RelationshipLookup::Found(relationships)
            }
            Err(e) if e.is_not_found() => RelationshipLookup::Unsupported,
            Err(e) => {
                log::warn!("Relationships for asset {} failed: {}", display_id, e);
                RelationshipLookup::Failed(e.to_string())
            }
        }
    }

    pub async fn find_requester(&self, id: u64) -> Option<Person> {
        probe("requester", id, self.identities.get_requester(id).await)
    }

    pub async fn find_agent(&self, id: u64) -> Option<Person> {
        probe("agent", id, self.identities.get_agent(id).await)
    }

    pub async fn search_requesters(&self, term: &str, page_cap: usize) -> Vec<Person> {
        self.paginate("search requesters", page_cap, None, |page, per_page| async move {
            self.identities.search_requesters(term, page, per_page).await
        })
        .await
        .items
    }

    pub async fn search_agents(&self, term: &str, page_cap: usize) -> Vec<Person> {
        self.paginate("search agents", page_cap, None, |page, per_page| async move {
            self.identities.search_agents(term, page, per_page).await
        })
        .await
        .items
    }
}

fn probe(collection: &str, id: u64, result: Result<Person, ImpactError>) -> Option<Person> {
    match result {
        Ok(person) => Some(person),
        Err(e) if e.is_not_found() => {
            log::debug!("{} {} not found", collection, id);
            None
        }
        Err(e) => {
            log::warn!("{} {} lookup failed: {}", collection, id, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryStore;
    use crate::directory::MockDirectory;

    fn fetcher(dir: Arc<MockDirectory>, page_size: usize) -> RateLimitedFetcher {
        let cache = TtlCache::new(Arc::new(MemoryStore::new(256)));
        RateLimitedFetcher::new(dir.clone(), dir, cache).with_paging(page_size, Duration::ZERO)
    }

    fn named(n: u64) -> Asset {
        Asset::new(n, format!("node-{}", n))
    }

    fn nodes(count: u64) -> MockDirectory {
        (1..=count).fold(MockDirectory::new(), |d, n| d.with_asset(named(n)))
    }

    #[tokio::test]
    async fn test_has_more_inferred_from_full_page() {
        let dir = Arc::new(nodes(3));
        let f = fetcher(dir.clone(), 2);
        let filter = FilterExpr::text("name", "node");

        let page = f
            .fetch_page(1, |p, pp| dir.search_assets(&filter, p, pp))
            .await
            .unwrap();
        assert!(page.has_more);
        let page = f
            .fetch_page(2, |p, pp| dir.search_assets(&filter, p, pp))
            .await
            .unwrap();
        assert!(!page.has_more);
        assert_eq!(page.items.len(), 1);
    }

    #[tokio::test]
    async fn test_page_cap_bounds_requests() {
        let dir = Arc::new(nodes(10));
        let f = fetcher(dir.clone(), 2);
        let found = f.search_assets(&FilterExpr::text("name", "node"), 3, None).await;
        assert_eq!(found.len(), 6);
        assert_eq!(dir.search_calls(), 3);
    }

    #[tokio::test]
    async fn test_exact_multiple_costs_one_empty_page() {
        let dir = Arc::new(nodes(4));
        let f = fetcher(dir.clone(), 2);
        let found = f.search_assets(&FilterExpr::text("name", "node"), 10, None).await;
        assert_eq!(found.len(), 4);
        assert_eq!(dir.search_calls(), 3);
    }

    #[tokio::test]
    async fn test_failed_page_returns_partial_and_is_not_cached() {
        let dir = Arc::new(nodes(6).failing_search_page(2));
        let f = fetcher(dir.clone(), 2);
        let filter = FilterExpr::text("name", "node");

        let found = f.search_assets(&filter, 5, None).await;
        assert_eq!(found.iter().map(|a| a.id).collect::<Vec<_>>(), vec![1, 2]);

        f.search_assets(&filter, 5, None).await;
        assert_eq!(dir.search_calls(), 4);
    }

    #[tokio::test]
    async fn test_complete_search_is_cached() {
        let dir = Arc::new(nodes(3));
        let f = fetcher(dir.clone(), 10);
        let filter = FilterExpr::text("name", "node");

        let first = f.search_assets(&filter, 5, None).await;
        let second = f.search_assets(&filter, 5, None).await;
        assert_eq!(first, second);
        assert_eq!(dir.search_calls(), 1);
    }

    #[tokio::test]
    async fn test_limit_truncates() {
        let dir = Arc::new(nodes(10));
        let f = fetcher(dir.clone(), 4);
        let found = f.search_assets(&FilterExpr::text("name", "node"), 5, Some(3)).await;
        assert_eq!(found.len(), 3);
        assert_eq!(dir.search_calls(), 1);
    }

    #[tokio::test]
    async fn test_page_size_clamped() {
        let dir = Arc::new(MockDirectory::new());
        assert_eq!(fetcher(dir.clone(), 0).page_size(), 1);
        assert_eq!(fetcher(dir, 5000).page_size(), MAX_PAGE_SIZE);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delay_between_pages() {
        let dir = Arc::new(nodes(4));
        let cache = TtlCache::new(Arc::new(MemoryStore::new(16)));
        let f = RateLimitedFetcher::new(dir.clone(), dir, cache).with_paging(2, Duration::from_millis(600));
        let start = tokio::time::Instant::now();
        f.search_assets(&FilterExpr::text("name", "node"), 3, None).await;
        // three requests, two gaps
        assert_eq!(start.elapsed(), Duration::from_millis(1200));
    }

    #[tokio::test(start_paused = true)]
    async fn test_item_fetches_are_not_paced() {
        let dir = Arc::new(nodes(3).with_link(1, 1, 2));
        let cache = TtlCache::new(Arc::new(MemoryStore::new(16)));
        let f = RateLimitedFetcher::new(dir.clone(), dir, cache).with_paging(2, Duration::from_millis(600));
        let start = tokio::time::Instant::now();
        for id in 1..=3 {
            assert!(f.fetch_asset(id).await.is_some());
        }
        assert!(matches!(f.fetch_relationships(1).await, RelationshipLookup::Found(_)));
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_asset_types_paged_and_cached() {
        let dir = Arc::new((1..=5).fold(MockDirectory::new(), |d, n| {
            d.with_asset_type(AssetType {
                id: n,
                name: format!("Type {}", n),
                parent_asset_type_id: None,
            })
        }));
        let f = fetcher(dir.clone(), 2);
        assert_eq!(f.fetch_all_asset_types(10).await.len(), 5);
        assert_eq!(f.fetch_all_asset_types(10).await.len(), 5);
        assert_eq!(dir.asset_type_calls(), 3);
    }

    #[tokio::test]
    async fn test_asset_fetch_cached_and_failures_are_none() {
        let dir = Arc::new(nodes(2).failing_asset(2));
        let f = fetcher(dir.clone(), 10);
        assert_eq!(f.fetch_asset(1).await.map(|a| a.id), Some(1));
        assert!(f.fetch_asset(1).await.is_some());
        assert_eq!(dir.asset_calls(), 1);
        assert!(f.fetch_asset(2).await.is_none());
        assert!(f.fetch_asset(99).await.is_none());
    }

    #[tokio::test]
    async fn test_relationship_lookup_classification() {
        let dir = Arc::new(MockDirectory::new().failing_relationships_for(2).with_link(1, 1, 3));
        let f = fetcher(dir, 10);
        assert!(matches!(f.fetch_relationships(1).await, RelationshipLookup::Found(r) if r.len() == 1));
        assert!(matches!(f.fetch_relationships(2).await, RelationshipLookup::Failed(_)));

        let dir = Arc::new(MockDirectory::new().without_relationship_support());
        let f = fetcher(dir.clone(), 10);
        assert_eq!(f.fetch_relationships(1).await, RelationshipLookup::Unsupported);
        assert_eq!(f.fetch_relationships(1).await, RelationshipLookup::Unsupported);
        assert_eq!(dir.relationship_calls(), 2);
    }
}
