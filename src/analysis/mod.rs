//! One impact analysis run: seeds in, approvers and stakeholders out.
//!
//! `AnalysisContext` holds everything a run needs (fetcher, resolver,
//! walker, classifier) so several analyses can run side by side and each
//! component can be tested on its own.

use anyhow::Context as _;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::cache::{CacheFamilies, LayeredStore, MemoryStore, SqliteStore, TtlCache};
use crate::cancel::CancellationToken;
use crate::config::{AnalysisConfig, Config};
use crate::db::{migrate, Db};
use crate::directory::{AssetDirectory, FilterExpr, HttpDirectoryClient, IdentityDirectory};
use crate::error::{ImpactError, Result};
use crate::fetch::RateLimitedFetcher;
use crate::graph::{RelationshipWalker, WalkerLimits};
use crate::identity::IdentityResolver;
use crate::impact::{ImpactClassifier, ImpactSet, ManualParty, UnresolvedOwner};
use crate::models::{Asset, AssetTypeCatalog, PartyRole};
use crate::risk::{self, ReviewerSelection};

/// Everything one run produced. Partial when `cancelled` is set.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisReport {
    pub run_id: Uuid,
    pub seeds: Vec<Asset>,
    pub related: Vec<Asset>,
    pub parties: ImpactSet,
    pub unresolved: Vec<UnresolvedOwner>,
    pub relationship_unavailable: bool,
    pub fallback_used: bool,
    pub cancelled: bool,
    pub warnings: Vec<String>,
}

impl AnalysisReport {
    /// Owner ids of every seed asset, deduplicated.
    pub fn seed_owner_ids(&self) -> Vec<u64> {
        let mut seen = HashSet::new();
        self.seeds
            .iter()
            .flat_map(Asset::owner_ids)
            .filter(|id| seen.insert(*id))
            .collect()
    }

    /// Peer reviewers drawn from this run's approvers and seed owners.
    pub fn peer_reviewers(&self, requester: Option<u64>, implementer: Option<u64>) -> ReviewerSelection {
        risk::select_peer_reviewers(
            requester,
            implementer,
            &self.parties.approver_ids(),
            &self.seed_owner_ids(),
        )
    }
}

pub struct AnalysisContext {
    config: AnalysisConfig,
    fetcher: Arc<RateLimitedFetcher>,
    resolver: Arc<IdentityResolver>,
    walker: RelationshipWalker,
    classifier: ImpactClassifier,
}

impl AnalysisContext {
    /// Wire a context over the given directories and cache.
    pub fn new(
        assets: Arc<dyn AssetDirectory>,
        identities: Arc<dyn IdentityDirectory>,
        cache: TtlCache,
        config: &Config,
    ) -> Self {
        let fetcher = RateLimitedFetcher::new(assets, identities, cache)
            .with_paging(config.rate_limit.page_size, config.page_delay())
            .with_families(CacheFamilies::from_config(&config.cache));
        Self::with_fetcher(Arc::new(fetcher), &config.analysis)
    }

    pub fn with_fetcher(fetcher: Arc<RateLimitedFetcher>, config: &AnalysisConfig) -> Self {
        let resolver = Arc::new(
            IdentityResolver::new(fetcher.clone()).with_search_page_cap(config.identity_page_cap),
        );
        Self {
            config: config.clone(),
            walker: RelationshipWalker::new(fetcher.clone(), WalkerLimits::from_config(config)),
            classifier: ImpactClassifier::new(resolver.clone()),
            fetcher,
            resolver,
        }
    }

    /// Live context: SQLite-backed cache behind an LRU layer and the HTTP
    /// directory client. Needs the API key in the environment.
    pub async fn from_config(config: &Config) -> anyhow::Result<Self> {
        let db = Db::open_migrated(config.db_path(), &migrate::default_migrations_dir())
            .await
            .with_context(|| format!("Failed to open cache database {}", config.db_path().display()))?;
        let disk = Arc::new(SqliteStore::new(db, config.cache.scope.clone()));
        let store = LayeredStore::new(MemoryStore::new(config.cache.memory_capacity), disk);
        let cache = TtlCache::new(Arc::new(store));

        let api_key = config.api_key()?;
        let client = Arc::new(
            HttpDirectoryClient::new(
                &config.directory.base_url,
                &api_key,
                Duration::from_secs(config.directory.timeout_secs),
            )
            .context("Failed to build directory client")?,
        );

        Ok(Self::new(client.clone(), client, cache, config))
    }

    pub fn fetcher(&self) -> &Arc<RateLimitedFetcher> {
        &self.fetcher
    }

    pub fn resolver(&self) -> &Arc<IdentityResolver> {
        &self.resolver
    }

    /// Load seed assets by id. Ids that cannot be loaded become warnings.
    pub async fn load_seeds(&self, ids: &[u64]) -> (Vec<Asset>, Vec<String>) {
        let mut seeds = Vec::with_capacity(ids.len());
        let mut warnings = Vec::new();
        let mut seen = HashSet::new();
        for id in ids {
            if !seen.insert(*id) {
                continue;
            }
            match self.fetcher.fetch_asset(*id).await {
                Some(asset) => seeds.push(asset),
                None => warnings.push(format!("Asset {} could not be loaded and was skipped", id)),
            }
        }
        (seeds, warnings)
    }

    /// Analyse the assets with these ids.
    pub async fn run_for_ids(&self, ids: &[u64], token: &CancellationToken) -> Result<AnalysisReport> {
        if ids.is_empty() {
            return Err(no_seeds());
        }
        let (seeds, warnings) = self.load_seeds(ids).await;
        if seeds.is_empty() {
            return Err(ImpactError::NotFound(format!(
                "none of the selected assets could be loaded: {:?}",
                ids
            )));
        }
        let mut report = self.run(&seeds, token).await?;
        report.warnings.splice(0..0, warnings);
        Ok(report)
    }

    /// Expand `seeds`, resolve owners and classify them.
    ///
    /// Zero seeds is rejected before any request is made. Cancellation stops
    /// the expansion between seeds; whatever was gathered is still classified.
    pub async fn run(&self, seeds: &[Asset], token: &CancellationToken) -> Result<AnalysisReport> {
        if seeds.is_empty() {
            return Err(no_seeds());
        }

        let run_id = Uuid::new_v4();
        log::info!("[{}] Analysing {} seed assets", run_id, seeds.len());

        let walk = self.walker.expand(seeds, token).await;
        let classification = self.classifier.classify(seeds, &walk.related).await;

        let mut warnings = walk.warnings;
        for miss in &classification.unresolved {
            warnings.push(unresolved_warning(miss));
        }

        let report = AnalysisReport {
            run_id,
            seeds: seeds.to_vec(),
            related: walk.related,
            parties: classification.parties,
            unresolved: classification.unresolved,
            relationship_unavailable: walk.relationship_unavailable,
            fallback_used: walk.fallback_used,
            cancelled: walk.cancelled,
            warnings,
        };

        log::info!(
            "[{}] {} related assets, {} approvers, {} stakeholders, {} warnings{}",
            run_id,
            report.related.len(),
            report.parties.approvers().len(),
            report.parties.stakeholders().len(),
            report.warnings.len(),
            if report.cancelled { " (cancelled)" } else { "" }
        );
        Ok(report)
    }

    /// Add people picked by hand to a finished report, tagged "Manually
    /// added". Additions that change nothing and ids nobody answers to are
    /// reported as warnings.
    pub async fn add_manual_parties(&self, report: &mut AnalysisReport, additions: &[ManualParty]) {
        for addition in additions {
            let Some(identity) = self.resolver.resolve_owner_record(addition.id).await else {
                report
                    .warnings
                    .push(format!("Person {} could not be found and was not added", addition.id));
                continue;
            };
            let outcome = report.parties.add_manual(&identity, addition.role);
            match outcome.warning(&identity, addition.role) {
                Some(warning) => report.warnings.push(warning),
                None => log::info!(
                    "[{}] {} added by hand as {} ({:?})",
                    report.run_id,
                    identity.name,
                    addition.role,
                    outcome
                ),
            }
        }
    }

    /// The asset-type catalog.
    pub async fn asset_types(&self) -> AssetTypeCatalog {
        AssetTypeCatalog::new(
            self.fetcher
                .fetch_all_asset_types(self.config.asset_type_page_cap)
                .await,
        )
    }

    /// Name search for seed assets, restricted to the configured asset types
    /// when any of them match the catalog.
    pub async fn search_assets(&self, term: &str) -> Vec<Asset> {
        let term = term.trim();
        if term.is_empty() {
            return Vec::new();
        }

        let mut filter = FilterExpr::text("name", term);
        if !self.config.asset_type_names.is_empty() {
            let mut type_ids: Vec<u64> = self
                .asset_types()
                .await
                .match_configured(&self.config.asset_type_names)
                .into_iter()
                .collect();
            type_ids.sort_unstable();
            match FilterExpr::any_of("asset_type_id", type_ids) {
                Some(types) => filter = filter.and(types),
                None => log::warn!(
                    "No asset types match {:?}; searching all types",
                    self.config.asset_type_names
                ),
            }
        }

        self.fetcher
            .search_assets(&filter, self.config.asset_page_cap, None)
            .await
    }
}

fn no_seeds() -> ImpactError {
    ImpactError::Validation("Select at least one asset before running impact analysis".to_string())
}

fn unresolved_warning(miss: &UnresolvedOwner) -> String {
    let role = match miss.role {
        PartyRole::Approver => "selected",
        PartyRole::Stakeholder => "related",
    };
    match miss.owner_id {
        Some(id) => format!(
            "Owner {} of {} asset {} could not be resolved",
            id, role, miss.asset.name
        ),
        None => format!("The {} asset {} has no owner", role, miss.asset.name),
    }
}
