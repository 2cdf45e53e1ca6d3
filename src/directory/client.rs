use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use url::Url;

use super::{AssetDirectory, FilterExpr, IdentityDirectory, Person};
use crate::error::{ImpactError, Result};
use crate::models::{Asset, AssetType, Relationship};

#[derive(Deserialize)]
struct RelationshipsResponse {
    #[serde(default)]
    relationships: Vec<Relationship>,
}

#[derive(Deserialize)]
struct AssetResponse {
    asset: Asset,
}

#[derive(Deserialize)]
struct AssetsResponse {
    #[serde(default)]
    assets: Vec<Asset>,
}

#[derive(Deserialize)]
struct AssetTypesResponse {
    #[serde(default)]
    asset_types: Vec<AssetType>,
}

#[derive(Deserialize)]
struct RequesterResponse {
    requester: Person,
}

#[derive(Deserialize)]
struct RequestersResponse {
    #[serde(default)]
    requesters: Vec<Person>,
}

#[derive(Deserialize)]
struct AgentResponse {
    agent: Person,
}

#[derive(Deserialize)]
struct AgentsResponse {
    #[serde(default)]
    agents: Vec<Person>,
}

/// HTTP client for the vendor REST API
///
/// Implements both directory traits. Requests are not retried here: a failed
/// page ends that fetch chain and the next cache miss tries again.
pub struct HttpDirectoryClient {
    client: Client,
    base_url: Url,
    auth_header: String,
}

impl HttpDirectoryClient {
    /// Create a client for `base_url` (e.g. `https://acme.example.com/api/v2`)
    ///
    /// # Arguments
    ///
    /// * `base_url` - API root; a trailing slash is added if missing
    /// * `api_key` - sent as HTTP Basic credentials `api_key:X`
    /// * `timeout` - per-request timeout; a timed-out page reads as "no more results"
    pub fn new(base_url: &str, api_key: &str, timeout: Duration) -> Result<Self> {
        let mut normalized = base_url.trim().to_string();
        if !normalized.ends_with('/') {
            normalized.push('/');
        }
        let base_url = Url::parse(&normalized)
            .map_err(|e| ImpactError::Config(format!("Invalid directory base_url {}: {}", base_url, e)))?;

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ImpactError::Http(format!("Failed to build HTTP client: {}", e)))?;

        let auth_header = format!("Basic {}", STANDARD.encode(format!("{}:X", api_key)));

        Ok(Self {
            client,
            base_url,
            auth_header,
        })
    }

    fn url(&self, path: &str, query: &[(&str, String)]) -> Result<Url> {
        let mut url = self
            .base_url
            .join(path.trim_start_matches('/'))
            .map_err(|e| ImpactError::Config(format!("Invalid request path {}: {}", path, e)))?;
        if !query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (k, v) in query {
                pairs.append_pair(k, v);
            }
        }
        Ok(url)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Result<T> {
        let url = self.url(path, query)?;
        log::debug!("GET {}", url);

        let response = self
            .client
            .get(url.clone())
            .header("Authorization", &self.auth_header)
            .header("Content-Type", "application/json")
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ImpactError::Http(format!("Timeout requesting {}", path))
                } else {
                    ImpactError::Http(format!("Network error requesting {}: {}", path, e))
                }
            })?;

        let status = response.status();

        if status == StatusCode::NOT_FOUND {
            return Err(ImpactError::NotFound(path.to_string()));
        }

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .unwrap_or("unknown")
                .to_string();
            log::warn!("Rate limited on {} (Retry-After: {}s)", path, retry_after);
        }

        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read error response".to_string());
            return Err(ImpactError::Api {
                status: status.as_u16(),
                message: body,
            });
        }

        response
            .json::<T>()
            .await
            .map_err(|e| ImpactError::Parse(format!("Failed to parse response from {}: {}", path, e)))
    }

    fn page_query(page: usize, per_page: usize) -> Vec<(&'static str, String)> {
        vec![("page", page.to_string()), ("per_page", per_page.to_string())]
    }
}

#[async_trait]
impl AssetDirectory for HttpDirectoryClient {
    async fn list_relationships(&self, display_id: u64) -> Result<Vec<Relationship>> {
        let response: RelationshipsResponse = self
            .get_json("relationships", &[("ownerAssetId", display_id.to_string())])
            .await?;
        Ok(response.relationships)
    }

    async fn get_asset(&self, id: u64) -> Result<Asset> {
        let response: AssetResponse = self.get_json(&format!("assets/{}", id), &[]).await?;
        Ok(response.asset)
    }

    async fn search_assets(&self, filter: &FilterExpr, page: usize, per_page: usize) -> Result<Vec<Asset>> {
        let mut query = Self::page_query(page, per_page);
        query.push(("filter", filter.to_query_param()));
        let response: AssetsResponse = self.get_json("assets", &query).await?;
        Ok(response.assets)
    }

    async fn list_asset_types(&self, page: usize, per_page: usize) -> Result<Vec<AssetType>> {
        let response: AssetTypesResponse = self
            .get_json("asset_types", &Self::page_query(page, per_page))
            .await?;
        Ok(response.asset_types)
    }
}

fn people_query(term: &str) -> String {
    let term = term.trim();
    FilterExpr::text("first_name", term)
        .or(FilterExpr::text("last_name", term))
        .or(FilterExpr::text("primary_email", term))
        .to_query_param()
}

#[async_trait]
impl IdentityDirectory for HttpDirectoryClient {
    async fn get_requester(&self, id: u64) -> Result<Person> {
        let response: RequesterResponse = self.get_json(&format!("requesters/{}", id), &[]).await?;
        Ok(response.requester)
    }

    async fn get_agent(&self, id: u64) -> Result<Person> {
        let response: AgentResponse = self.get_json(&format!("agents/{}", id), &[]).await?;
        Ok(response.agent)
    }

    async fn search_requesters(&self, term: &str, page: usize, per_page: usize) -> Result<Vec<Person>> {
        let mut query = Self::page_query(page, per_page);
        query.push(("query", people_query(term)));
        let response: RequestersResponse = self.get_json("requesters", &query).await?;
        Ok(response.requesters)
    }

    async fn search_agents(&self, term: &str, page: usize, per_page: usize) -> Result<Vec<Person>> {
        let mut query = Self::page_query(page, per_page);
        query.push(("query", people_query(term)));
        let response: AgentsResponse = self.get_json("agents", &query).await?;
        Ok(response.agents)
    }
}
