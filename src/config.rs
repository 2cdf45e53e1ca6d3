use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::fetch::RatePlan;

/// Requests one seed asset costs in the worst case on the primary path
/// (relationship list + detail fetches + owner probes).
///
/// Used only to bound how many requests the worker pool can have in flight
/// at once. Per-item fetches (asset details, relationship lists, owner
/// probes) are not paced; `page_delay` spaces out the pages of paginated
/// listings only.
pub const REQUESTS_PER_ASSET_ESTIMATE: u32 = 4;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub directory: DirectoryConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub http_server: HttpServerConfig,
}

/// Asset and identity directory connection
#[derive(Debug, Clone, Deserialize)]
pub struct DirectoryConfig {
    /// Base URL of the vendor API, e.g. `https://acme.example.com/api/v2`
    pub base_url: String,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// Plan tier and pagination pacing
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_plan")]
    pub plan: String,
    /// 0 = derive the delay from the plan's requests-per-minute budget
    #[serde(default)]
    pub page_delay_ms: u64,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            plan: default_plan(),
            page_delay_ms: 0,
            page_size: default_page_size(),
        }
    }
}

/// Cache store location and per-family TTLs
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
    #[serde(default = "default_memory_capacity")]
    pub memory_capacity: usize,
    #[serde(default = "default_identity_ttl")]
    pub identity_ttl_secs: u64,
    #[serde(default = "default_asset_ttl")]
    pub asset_ttl_secs: u64,
    #[serde(default = "default_search_ttl")]
    pub search_ttl_secs: u64,
    #[serde(default = "default_asset_type_ttl")]
    pub asset_type_ttl_secs: u64,
    /// Tenant/installation scope applied to every stored key
    #[serde(default = "default_scope")]
    pub scope: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            memory_capacity: default_memory_capacity(),
            identity_ttl_secs: default_identity_ttl(),
            asset_ttl_secs: default_asset_ttl(),
            search_ttl_secs: default_search_ttl(),
            asset_type_ttl_secs: default_asset_type_ttl(),
            scope: default_scope(),
        }
    }
}

/// Analysis bounds
#[derive(Debug, Clone, Deserialize)]
pub struct AnalysisConfig {
    #[serde(default = "default_asset_page_cap")]
    pub asset_page_cap: usize,
    #[serde(default = "default_identity_page_cap")]
    pub identity_page_cap: usize,
    #[serde(default = "default_asset_type_page_cap")]
    pub asset_type_page_cap: usize,
    #[serde(default = "default_fallback_cap")]
    pub fallback_same_type_cap: usize,
    #[serde(default = "default_fallback_cap")]
    pub fallback_same_environment_cap: usize,
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Free-text asset type names, matched case-insensitively as substrings
    #[serde(default)]
    pub asset_type_names: Vec<String>,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            asset_page_cap: default_asset_page_cap(),
            identity_page_cap: default_identity_page_cap(),
            asset_type_page_cap: default_asset_type_page_cap(),
            fallback_same_type_cap: default_fallback_cap(),
            fallback_same_environment_cap: default_fallback_cap(),
            workers: default_workers(),
            asset_type_names: Vec::new(),
        }
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct HttpServerConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_http_port")]
    pub port: u16,
    #[serde(default)]
    pub allowed_origins: Vec<String>,
}

impl Default for HttpServerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_http_port(),
            allowed_origins: Vec::new(),
        }
    }
}

fn default_api_key_env() -> String {
    "IMPACTMAP_API_KEY".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_plan() -> String {
    "growth".to_string()
}

fn default_page_size() -> usize {
    100
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./impactmap.db")
}

fn default_memory_capacity() -> usize {
    2048
}

fn default_identity_ttl() -> u64 {
    24 * 60 * 60
}

fn default_asset_ttl() -> u64 {
    60 * 60
}

fn default_search_ttl() -> u64 {
    15 * 60
}

fn default_asset_type_ttl() -> u64 {
    7 * 24 * 60 * 60
}

fn default_scope() -> String {
    "default".to_string()
}

fn default_asset_page_cap() -> usize {
    5
}

fn default_identity_page_cap() -> usize {
    3
}

fn default_asset_type_page_cap() -> usize {
    10
}

fn default_fallback_cap() -> usize {
    5
}

fn default_workers() -> usize {
    1
}

fn default_http_port() -> u16 {
    8080
}

impl Config {
    /// Load configuration from file
    ///
    /// Loads environment variables from .env file (if present) before loading config.
    /// Looks for config file in this order:
    /// 1. Path specified in IMPACTMAP_CONFIG environment variable
    /// 2. ./config.toml in current directory
    pub fn load() -> Result<Self> {
        // .env is optional
        let _ = dotenv::dotenv();

        let config_path = std::env::var("IMPACTMAP_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config.toml"));

        let config_str = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        Self::from_toml_str(&config_str)
    }

    /// Parse and validate a TOML document
    pub fn from_toml_str(config_str: &str) -> Result<Self> {
        let config: Config = toml::from_str(config_str).context("Failed to parse config.toml")?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    fn validate(&self) -> Result<()> {
        let base_url = self.directory.base_url.trim();
        if base_url.is_empty() {
            anyhow::bail!("directory.base_url must be set");
        }
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            anyhow::bail!("directory.base_url must start with http:// or https://: {}", base_url);
        }

        let plan = RatePlan::parse(&self.rate_limit.plan).ok_or_else(|| {
            anyhow::anyhow!(
                "rate_limit.plan '{}' is not a known plan (expected one of: {})",
                self.rate_limit.plan,
                RatePlan::names().join(", ")
            )
        })?;

        if self.rate_limit.page_size == 0 {
            anyhow::bail!("rate_limit.page_size must be greater than 0");
        }

        let ttls = [
            ("cache.identity_ttl_secs", self.cache.identity_ttl_secs),
            ("cache.asset_ttl_secs", self.cache.asset_ttl_secs),
            ("cache.search_ttl_secs", self.cache.search_ttl_secs),
            ("cache.asset_type_ttl_secs", self.cache.asset_type_ttl_secs),
        ];
        for (name, value) in ttls {
            if value == 0 {
                anyhow::bail!("{} must be greater than 0", name);
            }
        }

        if self.cache.scope.trim().is_empty() {
            anyhow::bail!("cache.scope must not be empty");
        }

        let caps = [
            ("analysis.asset_page_cap", self.analysis.asset_page_cap),
            ("analysis.identity_page_cap", self.analysis.identity_page_cap),
            ("analysis.asset_type_page_cap", self.analysis.asset_type_page_cap),
        ];
        for (name, value) in caps {
            if value == 0 {
                anyhow::bail!("{} must be at least 1", name);
            }
        }

        if self.analysis.workers == 0 {
            anyhow::bail!("analysis.workers must be at least 1");
        }

        // Bounds concurrent in-flight requests, not the per-minute rate.
        let worst_case = self.analysis.workers as u32 * REQUESTS_PER_ASSET_ESTIMATE;
        if worst_case > plan.requests_per_minute() {
            anyhow::bail!(
                "analysis.workers = {} would issue up to {} concurrent requests, above the {} plan budget of {} per minute",
                self.analysis.workers,
                worst_case,
                plan.name(),
                plan.requests_per_minute()
            );
        }

        Ok(())
    }

    /// Get database path
    pub fn db_path(&self) -> &Path {
        &self.cache.db_path
    }

    /// Plan tier (validated at load time)
    pub fn plan(&self) -> RatePlan {
        RatePlan::parse(&self.rate_limit.plan).unwrap_or_default()
    }

    /// Delay inserted between successive page requests
    pub fn page_delay(&self) -> Duration {
        if self.rate_limit.page_delay_ms > 0 {
            Duration::from_millis(self.rate_limit.page_delay_ms)
        } else {
            self.plan().page_delay()
        }
    }

    /// Read the directory API key from the environment
    pub fn api_key(&self) -> Result<String> {
        std::env::var(&self.directory.api_key_env).with_context(|| {
            format!(
                "Environment variable {} not set. Set it in your .env file or as an environment variable.",
                self.directory.api_key_env
            )
        })
    }
}
