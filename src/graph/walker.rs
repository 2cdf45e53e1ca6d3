use futures_util::stream::{self, StreamExt};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use super::{FallbackStrategy, WalkOutcome};
use crate::cancel::CancellationToken;
use crate::config::AnalysisConfig;
use crate::fetch::{RateLimitedFetcher, RelationshipLookup};
use crate::models::{Asset, RelationKind, Relationship, RelationshipContext, RelationshipRole};

/// Bounds on how much work a walk may do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalkerLimits {
    /// Pages read per fallback search
    pub search_page_cap: usize,
    pub same_type_cap: usize,
    pub same_environment_cap: usize,
    /// Seeds expanded concurrently
    pub workers: usize,
}

impl Default for WalkerLimits {
    fn default() -> Self {
        Self::from_config(&AnalysisConfig::default())
    }
}

impl WalkerLimits {
    pub fn from_config(config: &AnalysisConfig) -> Self {
        Self {
            search_page_cap: config.asset_page_cap.max(1),
            same_type_cap: config.fallback_same_type_cap,
            same_environment_cap: config.fallback_same_environment_cap,
            workers: config.workers.max(1),
        }
    }
}

/// Per-run state shared by every worker.
struct WalkState {
    /// Ids and display ids of every asset seen, seeds included
    visited: Mutex<HashSet<u64>>,
    relationship_unavailable: AtomicBool,
    fallback_used: AtomicBool,
}

impl WalkState {
    fn new(seeds: &[Asset]) -> Self {
        let visited = seeds.iter().flat_map(|s| [s.id, s.display_key()]).collect();
        Self {
            visited: Mutex::new(visited),
            relationship_unavailable: AtomicBool::new(false),
            fallback_used: AtomicBool::new(false),
        }
    }

    fn visited(&self) -> std::sync::MutexGuard<'_, HashSet<u64>> {
        self.visited.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Reserve a candidate id before fetching its details.
    fn claim_id(&self, id: u64) -> bool {
        self.visited().insert(id)
    }

    /// Give back an id whose details could not be fetched, so a later seed
    /// naming it can try again.
    fn release_id(&self, id: u64) {
        self.visited().remove(&id);
    }

    /// Reserve both ids of `asset`. `pre_claimed` is an id already reserved
    /// through [`WalkState::claim_id`] for this same asset.
    fn claim_asset(&self, asset: &Asset, pre_claimed: Option<u64>) -> bool {
        let mut visited = self.visited();
        let ids = [asset.id, asset.display_key()];
        if ids.iter().any(|id| Some(*id) != pre_claimed && visited.contains(id)) {
            return false;
        }
        visited.extend(ids);
        true
    }

    fn is_unavailable(&self) -> bool {
        self.relationship_unavailable.load(Ordering::SeqCst)
    }

    /// True for the first caller only.
    fn mark_unavailable(&self) -> bool {
        !self.relationship_unavailable.swap(true, Ordering::SeqCst)
    }
}

#[derive(Default)]
struct SeedExpansion {
    related: Vec<Asset>,
    warnings: Vec<String>,
    skipped: bool,
}

/// Expands seed assets one hop, with heuristic fallbacks.
pub struct RelationshipWalker {
    fetcher: Arc<RateLimitedFetcher>,
    limits: WalkerLimits,
}

impl RelationshipWalker {
    pub fn new(fetcher: Arc<RateLimitedFetcher>, limits: WalkerLimits) -> Self {
        Self { fetcher, limits }
    }

    pub fn limits(&self) -> &WalkerLimits {
        &self.limits
    }

    /// Related assets for `seeds`, one hop out.
    ///
    /// Up to `limits.workers` seeds are in flight at once. `token` is checked
    /// before each seed starts; seeds already expanded keep their results.
    pub async fn expand(&self, seeds: &[Asset], token: &CancellationToken) -> WalkOutcome {
        let mut unique: Vec<&Asset> = Vec::with_capacity(seeds.len());
        let mut seen = HashSet::new();
        for seed in seeds {
            if seen.insert(seed.id) {
                unique.push(seed);
            }
        }

        let state = WalkState::new(seeds);
        // Futures are built up front (they are lazy) so the stream holds no
        // higher-ranked closure, which keeps the returned future `Send`.
        let pending: Vec<_> = unique
            .iter()
            .map(|seed| self.expand_seed(seed, &state, token))
            .collect();
        let expansions: Vec<SeedExpansion> = stream::iter(pending)
            .buffer_unordered(self.limits.workers.max(1))
            .collect()
            .await;

        let mut outcome = WalkOutcome {
            relationship_unavailable: state.is_unavailable(),
            fallback_used: state.fallback_used.load(Ordering::SeqCst),
            ..WalkOutcome::default()
        };
        if outcome.relationship_unavailable {
            outcome.warnings.push(
                "Relationship data is unavailable; related assets were inferred from similar names, types and environments"
                    .to_string(),
            );
        }

        for expansion in expansions {
            if expansion.skipped {
                outcome.cancelled = true;
                continue;
            }
            outcome.seeds_processed += 1;
            outcome.related.extend(expansion.related);
            outcome.warnings.extend(expansion.warnings);
        }

        if outcome.cancelled {
            outcome.warnings.push(format!(
                "Analysis cancelled after {} of {} seed assets",
                outcome.seeds_processed,
                unique.len()
            ));
        }

        log::info!(
            "Expanded {} seeds into {} related assets (relationships unavailable: {}, fallback: {})",
            outcome.seeds_processed,
            outcome.related.len(),
            outcome.relationship_unavailable,
            outcome.fallback_used
        );
        outcome
    }

    async fn expand_seed(&self, seed: &Asset, state: &WalkState, token: &CancellationToken) -> SeedExpansion {
        if token.is_cancelled() {
            log::debug!("Skipping seed {} after cancellation", seed.id);
            return SeedExpansion {
                skipped: true,
                ..SeedExpansion::default()
            };
        }

        if !state.is_unavailable() {
            match self.fetcher.fetch_relationships(seed.display_key()).await {
                RelationshipLookup::Found(relationships) if !relationships.is_empty() => {
                    return self.follow_relationships(seed, &relationships, state).await;
                }
                RelationshipLookup::Found(_) => {
                    if state.mark_unavailable() {
                        log::warn!("Seed {} has no relationships; switching to fallback strategies", seed.id);
                    }
                }
                RelationshipLookup::Unsupported => {
                    if state.mark_unavailable() {
                        log::warn!("Relationship endpoint not found; switching to fallback strategies");
                    }
                }
                RelationshipLookup::Failed(cause) => {
                    return SeedExpansion {
                        warnings: vec![format!(
                            "Relationships for {} could not be loaded: {}",
                            seed.name, cause
                        )],
                        ..SeedExpansion::default()
                    };
                }
            }
        }

        self.run_fallbacks(seed, state).await
    }

    async fn follow_relationships(
        &self,
        seed: &Asset,
        relationships: &[Relationship],
        state: &WalkState,
    ) -> SeedExpansion {
        let mut expansion = SeedExpansion::default();
        for relationship in relationships {
            let Some((candidate, role)) = relationship.counterpart_of(seed) else {
                continue;
            };
            if !state.claim_id(candidate) {
                continue;
            }
            let Some(asset) = self.fetcher.fetch_asset(candidate).await else {
                state.release_id(candidate);
                continue;
            };
            if !state.claim_asset(&asset, Some(candidate)) {
                continue;
            }
            expansion.related.push(asset.with_relationship(direct_context(seed, relationship, role)));
        }
        log::debug!(
            "Seed {} has {} relationships, {} new related assets",
            seed.id,
            relationships.len(),
            expansion.related.len()
        );
        expansion
    }

    async fn run_fallbacks(&self, seed: &Asset, state: &WalkState) -> SeedExpansion {
        state.fallback_used.store(true, Ordering::SeqCst);
        let mut expansion = SeedExpansion::default();

        for strategy in FallbackStrategy::ORDER {
            let Some(filter) = strategy.filter_for(seed) else {
                continue;
            };
            let cap = strategy.cap(&self.limits);
            if cap == Some(0) {
                continue;
            }

            let found = self
                .fetcher
                .search_assets(&filter, self.limits.search_page_cap, None)
                .await;
            let mut added = 0;
            for asset in found {
                if cap.is_some_and(|cap| added >= cap) {
                    break;
                }
                if !state.claim_asset(&asset, None) {
                    continue;
                }
                let context = RelationshipContext::heuristic(strategy.kind(), seed);
                expansion.related.push(asset.with_relationship(context));
                added += 1;
            }
            log::info!("Fallback {} for seed {} added {} assets", strategy.kind(), seed.id, added);
        }
        expansion
    }
}

fn direct_context(seed: &Asset, relationship: &Relationship, role: RelationshipRole) -> RelationshipContext {
    RelationshipContext {
        kind: RelationKind::Direct {
            relationship_type_id: relationship.relationship_type_id,
        },
        origin_seed_id: seed.id,
        origin_seed_name: seed.name.clone(),
        relationship_id: Some(relationship.id),
        role: Some(role),
        created_at: relationship.created_at,
        updated_at: relationship.updated_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{MemoryStore, TtlCache};
    use crate::directory::{AssetDirectory, FilterExpr, MockDirectory};
    use crate::error::{ImpactError, Result};
    use crate::models::AssetType;
    use serde_json::json;

    fn asset(id: u64, name: &str) -> Asset {
        Asset::new(id, name)
    }

    fn walker(dir: Arc<MockDirectory>, limits: WalkerLimits) -> RelationshipWalker {
        let cache = TtlCache::new(Arc::new(MemoryStore::new(256)));
        let fetcher = RateLimitedFetcher::new(dir.clone(), dir, cache).with_paging(10, std::time::Duration::ZERO);
        RelationshipWalker::new(Arc::new(fetcher), limits)
    }

    fn ids(assets: &[Asset]) -> Vec<u64> {
        let mut out: Vec<u64> = assets.iter().map(|a| a.id).collect();
        out.sort();
        out
    }

    #[tokio::test]
    async fn test_direct_relationships_one_hop() {
        let dir = Arc::new(
            MockDirectory::new()
                .with_asset(asset(1, "api"))
                .with_asset(asset(2, "db"))
                .with_asset(asset(3, "disk"))
                .with_link(10, 1, 2)
                .with_link(11, 2, 3),
        );
        let w = walker(dir, WalkerLimits::default());
        let outcome = w.expand(&[asset(1, "api")], &CancellationToken::new()).await;

        assert_eq!(ids(&outcome.related), vec![2]);
        let context = outcome.related[0].relationship.as_ref().unwrap();
        assert_eq!(context.kind, RelationKind::Direct { relationship_type_id: 1 });
        assert_eq!(context.relationship_id, Some(10));
        assert_eq!(context.role, Some(RelationshipRole::Secondary));
        assert_eq!(context.origin_seed_id, 1);
        assert!(!outcome.relationship_unavailable);
        assert!(!outcome.fallback_used);
    }

    #[tokio::test]
    async fn test_seeds_never_related_and_dedup() {
        let dir = Arc::new(
            MockDirectory::new()
                .with_asset(asset(1, "a"))
                .with_asset(asset(2, "b"))
                .with_asset(asset(3, "c"))
                .with_link(10, 1, 2)
                .with_link(11, 1, 3)
                .with_link(12, 2, 3),
        );
        let w = walker(dir.clone(), WalkerLimits::default());
        let outcome = w
            .expand(&[asset(1, "a"), asset(2, "b")], &CancellationToken::new())
            .await;

        assert_eq!(ids(&outcome.related), vec![3]);
        // asset 3 is fetched once even though both seeds point at it
        assert_eq!(dir.asset_calls(), 1);
    }

    #[tokio::test]
    async fn test_display_id_tracked_for_dedup() {
        let mut related = asset(500, "cache");
        related.display_id = 5;
        let dir = Arc::new(
            MockDirectory::new()
                .with_asset(asset(1, "a"))
                .with_asset(asset(2, "b"))
                .with_asset(related)
                // one seed references the display id, the other the id
                .with_link(10, 1, 5)
                .with_link(11, 2, 500),
        );
        let w = walker(dir, WalkerLimits::default());
        let outcome = w
            .expand(&[asset(1, "a"), asset(2, "b")], &CancellationToken::new())
            .await;
        assert_eq!(ids(&outcome.related), vec![500]);
    }

    #[tokio::test]
    async fn test_not_found_switches_to_fallbacks_for_all_later_seeds() {
        let dir = Arc::new(
            MockDirectory::new()
                .without_relationship_support()
                .with_asset(asset(1, "db- primary"))
                .with_asset(asset(2, "web front"))
                .with_asset(asset(3, "db- replica"))
                .with_asset(asset(4, "web back")),
        );
        let w = walker(dir.clone(), WalkerLimits::default());
        let outcome = w
            .expand(&[asset(1, "db- primary"), asset(2, "web front")], &CancellationToken::new())
            .await;

        assert_eq!(ids(&outcome.related), vec![3, 4]);
        assert!(outcome.related.iter().all(|a| {
            a.relationship.as_ref().map(|c| c.kind) == Some(RelationKind::SimilarName)
        }));
        assert!(outcome.relationship_unavailable);
        assert!(outcome.fallback_used);
        assert_eq!(dir.relationship_calls(), 1);
        assert!(!outcome.warnings.is_empty());
    }

    #[tokio::test]
    async fn test_empty_relationships_mark_unavailable() {
        let dir = Arc::new(
            MockDirectory::new()
                .with_asset(asset(1, "app one"))
                .with_asset(asset(2, "app two"))
                .with_asset(asset(3, "other")),
        );
        let w = walker(dir.clone(), WalkerLimits::default());
        let outcome = w
            .expand(&[asset(1, "app one"), asset(3, "other")], &CancellationToken::new())
            .await;

        assert!(outcome.relationship_unavailable);
        assert_eq!(ids(&outcome.related), vec![2]);
        assert_eq!(dir.relationship_calls(), 1);
    }

    #[tokio::test]
    async fn test_transient_failure_keeps_primary_strategy() {
        let dir = Arc::new(
            MockDirectory::new()
                .failing_relationships_for(1)
                .with_asset(asset(1, "a"))
                .with_asset(asset(2, "b"))
                .with_asset(asset(3, "c"))
                .with_link(10, 2, 3),
        );
        let w = walker(dir.clone(), WalkerLimits::default());
        let outcome = w
            .expand(&[asset(1, "a"), asset(2, "b")], &CancellationToken::new())
            .await;

        assert!(!outcome.relationship_unavailable);
        assert!(!outcome.fallback_used);
        assert_eq!(ids(&outcome.related), vec![3]);
        assert_eq!(dir.relationship_calls(), 2);
        assert_eq!(outcome.warnings.len(), 1);
    }

    #[tokio::test]
    async fn test_same_type_requires_type_and_token_and_is_capped() {
        let typed = |id: u64, name: &str, type_id: u64| {
            let mut a = asset(id, name);
            a.asset_type_id = Some(type_id);
            a
        };
        let dir = Arc::new(
            MockDirectory::new()
                .without_relationship_support()
                .with_asset(typed(2, "pg docs", 8))
                .with_asset(typed(3, "pg wiki", 8))
                .with_asset(typed(4, "pg node4", 7))
                .with_asset(typed(5, "pg node5", 7))
                .with_asset(typed(9, "mysql", 7)),
        );
        let cache = TtlCache::new(Arc::new(MemoryStore::new(64)));
        let fetcher = RateLimitedFetcher::new(dir.clone(), dir, cache).with_paging(2, std::time::Duration::ZERO);
        let limits = WalkerLimits {
            search_page_cap: 1,
            same_type_cap: 1,
            ..WalkerLimits::default()
        };
        let w = RelationshipWalker::new(Arc::new(fetcher), limits);

        let outcome = w.expand(&[typed(1, "pg main", 7)], &CancellationToken::new()).await;
        // name search is cut at one page; same-type adds one more, never "mysql"
        assert_eq!(ids(&outcome.related), vec![2, 3, 4]);
        let same_type: Vec<u64> = outcome
            .related
            .iter()
            .filter(|a| a.relationship.as_ref().map(|c| c.kind) == Some(RelationKind::SameType))
            .map(|a| a.id)
            .collect();
        assert_eq!(same_type, vec![4]);
    }

    #[tokio::test]
    async fn test_same_environment_fallback_capped() {
        let env = |id: u64, name: &str, value: &str| {
            let mut a = asset(id, name);
            a.type_fields.insert("environment_7".into(), json!(value));
            a
        };
        let dir = MockDirectory::new()
            .without_relationship_support()
            .with_asset(env(2, "alpha", "prod"))
            .with_asset(env(3, "beta", "prod"))
            .with_asset(env(4, "gamma", "prod"))
            .with_asset(env(5, "delta", "staging"));
        let limits = WalkerLimits {
            same_environment_cap: 2,
            ..WalkerLimits::default()
        };
        let w = walker(Arc::new(dir), limits);

        let outcome = w
            .expand(&[env(1, "zeta", "Prod")], &CancellationToken::new())
            .await;
        assert_eq!(ids(&outcome.related), vec![2, 3]);
        assert!(outcome.related.iter().all(|a| {
            a.relationship.as_ref().map(|c| c.kind) == Some(RelationKind::SameEnvironment)
        }));
    }

    #[tokio::test]
    async fn test_cancelled_before_start_processes_nothing() {
        let dir = Arc::new(MockDirectory::new().with_asset(asset(2, "b")).with_link(10, 1, 2));
        let w = walker(dir.clone(), WalkerLimits::default());
        let token = CancellationToken::new();
        token.cancel();

        let outcome = w.expand(&[asset(1, "a")], &token).await;
        assert!(outcome.cancelled);
        assert_eq!(outcome.seeds_processed, 0);
        assert!(outcome.related.is_empty());
        assert_eq!(dir.relationship_calls(), 0);
    }

    #[tokio::test]
    async fn test_parallel_workers_share_unavailable_flag() {
        let mut dir = MockDirectory::new().without_relationship_support();
        let mut seeds = Vec::new();
        for id in 1..=8 {
            let name = format!("svc{} node", id);
            dir = dir.with_asset(asset(id, &name));
            seeds.push(asset(id, &name));
        }
        let dir = Arc::new(dir);
        let limits = WalkerLimits {
            workers: 4,
            ..WalkerLimits::default()
        };
        let w = walker(dir.clone(), limits);
        let outcome = w.expand(&seeds, &CancellationToken::new()).await;

        assert!(outcome.relationship_unavailable);
        assert_eq!(outcome.seeds_processed, 8);
        // only workers already in flight can have probed before the flag flipped
        assert!(dir.relationship_calls() <= 4);
        assert!(outcome.related.is_empty());
    }

    /// Fails the first `failures` detail requests, then delegates.
    struct FlakyDetails {
        inner: Arc<MockDirectory>,
        failures: std::sync::atomic::AtomicUsize,
    }

    #[async_trait::async_trait]
    impl AssetDirectory for FlakyDetails {
        async fn list_relationships(&self, display_id: u64) -> Result<Vec<Relationship>> {
            self.inner.list_relationships(display_id).await
        }

        async fn get_asset(&self, id: u64) -> Result<Asset> {
            let left = self.failures.load(Ordering::SeqCst);
            if left > 0 {
                self.failures.store(left - 1, Ordering::SeqCst);
                return Err(ImpactError::Http("timeout".to_string()));
            }
            self.inner.get_asset(id).await
        }

        async fn search_assets(&self, filter: &FilterExpr, page: usize, per_page: usize) -> Result<Vec<Asset>> {
            self.inner.search_assets(filter, page, per_page).await
        }

        async fn list_asset_types(&self, page: usize, per_page: usize) -> Result<Vec<AssetType>> {
            self.inner.list_asset_types(page, per_page).await
        }
    }

    #[tokio::test]
    async fn test_failed_detail_fetch_retried_by_later_seed() {
        let dir = Arc::new(
            MockDirectory::new()
                .with_asset(asset(2, "shared db"))
                .with_link(10, 1, 2)
                .with_link(11, 3, 2),
        );
        let assets = Arc::new(FlakyDetails {
            inner: dir.clone(),
            failures: std::sync::atomic::AtomicUsize::new(1),
        });
        let cache = TtlCache::new(Arc::new(MemoryStore::new(64)));
        let fetcher = RateLimitedFetcher::new(assets, dir, cache).with_paging(10, std::time::Duration::ZERO);
        let w = RelationshipWalker::new(Arc::new(fetcher), WalkerLimits::default());

        let outcome = w.expand(&[asset(1, "api"), asset(3, "worker")], &CancellationToken::new()).await;

        assert_eq!(ids(&outcome.related), vec![2]);
        let context = outcome.related[0].relationship.as_ref().unwrap();
        assert_eq!(context.origin_seed_id, 3);
    }
}
