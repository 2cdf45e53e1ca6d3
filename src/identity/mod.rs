//! Owner id to identity resolution across the requester and agent
//! collections.
//!
//! The two collections share one numeric id space and nothing in an id says
//! which one it belongs to, so every resolution is a two-probe sequence and a
//! miss is an ordinary outcome (stale references, deleted accounts).

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::fetch::RateLimitedFetcher;
use crate::models::{Identity, IdentityKind};

/// Display name used when an owner id cannot be resolved.
pub const UNKNOWN_OWNER: &str = "Unknown";

pub struct IdentityResolver {
    fetcher: Arc<RateLimitedFetcher>,
    search_page_cap: usize,
}

impl IdentityResolver {
    pub fn new(fetcher: Arc<RateLimitedFetcher>) -> Self {
        Self {
            fetcher,
            search_page_cap: 1,
        }
    }

    /// Pages read per collection by [`IdentityResolver::search_people`].
    pub fn with_search_page_cap(mut self, cap: usize) -> Self {
        self.search_page_cap = cap.max(1);
        self
    }

    async fn cached(&self, id: u64) -> Option<Identity> {
        let fetcher = &self.fetcher;
        fetcher
            .cache()
            .get::<Identity>(&fetcher.families().identity, &id.to_string())
            .await
    }

    async fn remember(&self, identity: &Identity) {
        let fetcher = &self.fetcher;
        fetcher
            .cache()
            .set(&fetcher.families().identity, &identity.id.to_string(), identity)
            .await;
    }

    /// Cache, then requester probe, then agent probe. Never fails; a double
    /// miss is `None`.
    pub async fn resolve_owner_record(&self, id: u64) -> Option<Identity> {
        if id == 0 {
            return None;
        }
        if let Some(identity) = self.cached(id).await {
            return Some(identity);
        }

        if let Some(person) = self.fetcher.find_requester(id).await {
            let identity = person.into_identity(IdentityKind::Requester);
            self.remember(&identity).await;
            return Some(identity);
        }

        if let Some(person) = self.fetcher.find_agent(id).await {
            let identity = person.into_identity(IdentityKind::Agent);
            self.remember(&identity).await;
            return Some(identity);
        }

        log::debug!("Owner {} not found as requester or agent", id);
        None
    }

    /// Display name for `id`, or "Unknown".
    pub async fn resolve_owner_name(&self, id: u64) -> String {
        self.resolve_owner_record(id)
            .await
            .map(|identity| identity.name)
            .unwrap_or_else(|| UNKNOWN_OWNER.to_string())
    }

    /// Free-text people search over both collections, merged by id.
    /// An id returned by both searches is tagged `Both`.
    pub async fn search_people(&self, term: &str) -> Vec<Identity> {
        let term = term.trim();
        if term.is_empty() {
            return Vec::new();
        }

        let requesters = self.fetcher.search_requesters(term, self.search_page_cap).await;
        let agents = self.fetcher.search_agents(term, self.search_page_cap).await;

        let mut merged: BTreeMap<u64, Identity> = BTreeMap::new();
        let tagged = requesters
            .into_iter()
            .map(|p| (p, IdentityKind::Requester))
            .chain(agents.into_iter().map(|p| (p, IdentityKind::Agent)));
        for (person, kind) in tagged {
            match merged.get_mut(&person.id) {
                Some(existing) => existing.kind = existing.kind.merge(kind),
                None => {
                    merged.insert(person.id, person.into_identity(kind));
                }
            }
        }

        for identity in merged.values() {
            self.remember(identity).await;
        }
        log::debug!("People search '{}' matched {} identities", term, merged.len());
        merged.into_values().collect()
    }
}
