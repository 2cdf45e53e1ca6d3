//! In-memory directory for tests and offline runs.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use super::{AssetDirectory, FilterExpr, FilterValue, IdentityDirectory, Person};
use crate::error::{ImpactError, Result};
use crate::models::{Asset, AssetType, Relationship};

#[derive(Default)]
struct State {
    assets: Vec<Asset>,
    relationships: Vec<Relationship>,
    asset_types: Vec<AssetType>,
    requesters: HashMap<u64, Person>,
    agents: HashMap<u64, Person>,
    relationships_unsupported: bool,
    failing_relationship_ids: HashSet<u64>,
    failing_asset_ids: HashSet<u64>,
    failing_search_pages: HashSet<usize>,
}

/// Implements both directory traits over in-memory data, with injectable
/// failures and per-endpoint call counters.
#[derive(Default)]
pub struct MockDirectory {
    state: Mutex<State>,
    relationship_calls: AtomicUsize,
    asset_calls: AtomicUsize,
    search_calls: AtomicUsize,
    asset_type_calls: AtomicUsize,
    requester_calls: AtomicUsize,
    agent_calls: AtomicUsize,
}

impl MockDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn with_asset(self, asset: Asset) -> Self {
        self.state().assets.push(asset);
        self
    }

    pub fn with_relationship(self, relationship: Relationship) -> Self {
        self.state().relationships.push(relationship);
        self
    }

    /// Asset-to-asset relationship shorthand.
    pub fn with_link(self, id: u64, primary_id: u64, secondary_id: u64) -> Self {
        self.with_relationship(Relationship {
            id,
            relationship_type_id: 1,
            primary_id,
            primary_type: "asset".to_string(),
            secondary_id,
            secondary_type: "asset".to_string(),
            created_at: None,
            updated_at: None,
        })
    }

    pub fn with_asset_type(self, asset_type: AssetType) -> Self {
        self.state().asset_types.push(asset_type);
        self
    }

    pub fn with_requester(self, person: Person) -> Self {
        self.state().requesters.insert(person.id, person);
        self
    }

    pub fn with_agent(self, person: Person) -> Self {
        self.state().agents.insert(person.id, person);
        self
    }

    /// Every relationship request answers 404.
    pub fn without_relationship_support(self) -> Self {
        self.state().relationships_unsupported = true;
        self
    }

    /// Relationship requests for this display id fail with a 500.
    pub fn failing_relationships_for(self, display_id: u64) -> Self {
        self.state().failing_relationship_ids.insert(display_id);
        self
    }

    /// Detail requests for this asset fail with a 500.
    pub fn failing_asset(self, id: u64) -> Self {
        self.state().failing_asset_ids.insert(id);
        self
    }

    /// Search requests for this page number fail with a 500.
    pub fn failing_search_page(self, page: usize) -> Self {
        self.state().failing_search_pages.insert(page);
        self
    }

    pub fn relationship_calls(&self) -> usize {
        self.relationship_calls.load(Ordering::SeqCst)
    }

    pub fn asset_calls(&self) -> usize {
        self.asset_calls.load(Ordering::SeqCst)
    }

    pub fn search_calls(&self) -> usize {
        self.search_calls.load(Ordering::SeqCst)
    }

    pub fn asset_type_calls(&self) -> usize {
        self.asset_type_calls.load(Ordering::SeqCst)
    }

    pub fn requester_calls(&self) -> usize {
        self.requester_calls.load(Ordering::SeqCst)
    }

    pub fn agent_calls(&self) -> usize {
        self.agent_calls.load(Ordering::SeqCst)
    }
}

fn server_error(what: &str) -> ImpactError {
    ImpactError::Api {
        status: 500,
        message: format!("injected failure: {}", what),
    }
}

fn page_of<T: Clone>(items: &[T], page: usize, per_page: usize) -> Vec<T> {
    let start = page.saturating_sub(1) * per_page;
    items.iter().skip(start).take(per_page).cloned().collect()
}

/// Name clauses match as case-insensitive substrings, like the vendor's
/// name search; other fields match exactly (type fields included).
fn asset_matches(asset: &Asset, filter: &FilterExpr) -> bool {
    match filter {
        FilterExpr::And(parts) => parts.iter().all(|p| asset_matches(asset, p)),
        FilterExpr::Or(parts) => parts.iter().any(|p| asset_matches(asset, p)),
        FilterExpr::Clause { field, value } => match (field.as_str(), value) {
            ("name", FilterValue::Text(v)) => asset.name.to_lowercase().contains(&v.to_lowercase()),
            ("asset_type_id", FilterValue::Number(n)) => asset.asset_type_id == Some(*n),
            ("id", FilterValue::Number(n)) => asset.id == *n,
            (other, FilterValue::Text(v)) => asset
                .type_fields
                .get(other)
                .and_then(|x| x.as_str())
                .map(|x| x.eq_ignore_ascii_case(v))
                .unwrap_or(false),
            (other, FilterValue::Number(n)) => asset
                .type_fields
                .get(other)
                .and_then(|x| x.as_u64())
                .map(|x| x == *n)
                .unwrap_or(false),
        },
    }
}

fn person_matches(person: &Person, term: &str) -> bool {
    let term = term.trim().to_lowercase();
    [&person.first_name, &person.last_name, &person.email]
        .into_iter()
        .flatten()
        .any(|v| v.to_lowercase().contains(&term))
}

fn sorted_people(people: &HashMap<u64, Person>, term: &str) -> Vec<Person> {
    let mut out: Vec<Person> = people.values().filter(|p| person_matches(p, term)).cloned().collect();
    out.sort_by_key(|p| p.id);
    out
}

#[async_trait]
impl AssetDirectory for MockDirectory {
    async fn list_relationships(&self, display_id: u64) -> Result<Vec<Relationship>> {
        self.relationship_calls.fetch_add(1, Ordering::SeqCst);
        let state = self.state();
        if state.relationships_unsupported {
            return Err(ImpactError::NotFound("relationships".to_string()));
        }
        if state.failing_relationship_ids.contains(&display_id) {
            return Err(server_error("relationships"));
        }
        Ok(state
            .relationships
            .iter()
            .filter(|r| r.primary_id == display_id || r.secondary_id == display_id)
            .cloned()
            .collect())
    }

    async fn get_asset(&self, id: u64) -> Result<Asset> {
        self.asset_calls.fetch_add(1, Ordering::SeqCst);
        let state = self.state();
        if state.failing_asset_ids.contains(&id) {
            return Err(server_error("asset"));
        }
        state
            .assets
            .iter()
            .find(|a| a.is_identified_by(id))
            .cloned()
            .ok_or_else(|| ImpactError::NotFound(format!("assets/{}", id)))
    }

    async fn search_assets(&self, filter: &FilterExpr, page: usize, per_page: usize) -> Result<Vec<Asset>> {
        self.search_calls.fetch_add(1, Ordering::SeqCst);
        let state = self.state();
        if state.failing_search_pages.contains(&page) {
            return Err(server_error("search"));
        }
        let mut matches: Vec<Asset> = state
            .assets
            .iter()
            .filter(|a| asset_matches(a, filter))
            .cloned()
            .collect();
        matches.sort_by_key(|a| a.id);
        Ok(page_of(&matches, page, per_page))
    }

    async fn list_asset_types(&self, page: usize, per_page: usize) -> Result<Vec<AssetType>> {
        self.asset_type_calls.fetch_add(1, Ordering::SeqCst);
        let state = self.state();
        Ok(page_of(&state.asset_types, page, per_page))
    }
}

#[async_trait]
impl IdentityDirectory for MockDirectory {
    async fn get_requester(&self, id: u64) -> Result<Person> {
        self.requester_calls.fetch_add(1, Ordering::SeqCst);
        self.state()
            .requesters
            .get(&id)
            .cloned()
            .ok_or_else(|| ImpactError::NotFound(format!("requesters/{}", id)))
    }

    async fn get_agent(&self, id: u64) -> Result<Person> {
        self.agent_calls.fetch_add(1, Ordering::SeqCst);
        self.state()
            .agents
            .get(&id)
            .cloned()
            .ok_or_else(|| ImpactError::NotFound(format!("agents/{}", id)))
    }

    async fn search_requesters(&self, term: &str, page: usize, per_page: usize) -> Result<Vec<Person>> {
        self.requester_calls.fetch_add(1, Ordering::SeqCst);
        let people = sorted_people(&self.state().requesters, term);
        Ok(page_of(&people, page, per_page))
    }

    async fn search_agents(&self, term: &str, page: usize, per_page: usize) -> Result<Vec<Person>> {
        self.agent_calls.fetch_add(1, Ordering::SeqCst);
        let people = sorted_people(&self.state().agents, term);
        Ok(page_of(&people, page, per_page))
    }
}
