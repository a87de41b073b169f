//! Configuration for apivec.
//!
//! Provides [`ApivecConfig`], loaded from a TOML file, `APIVEC_*`
//! environment variables and built-in defaults using the `confyg` crate.
//!
//! # Loading Priority
//!
//! 1. Explicit path argument
//! 2. `APIVEC_CONFIG` environment variable
//! 3. XDG default: `~/.config/apivec/config.toml`
//! 4. Built-in defaults
//!
//! # Example
//!
//! ```toml
//! [cost]
//! max_monthly_cost = 25.0
//! fallback_ratio = 0.85
//!
//! [remote]
//! url = "http://localhost:6334"
//! collection = "blender_apis"
//!
//! [sync]
//! auto_sync = true
//! ```

use confyg::{Confygery, env};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Error, Result};

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "APIVEC";

// ============================================================================
// Configuration structs
// ============================================================================

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ApivecConfig {
    /// Cost thresholds and unit prices for the remote backend.
    pub cost: CostConfig,

    /// Embedding model selection.
    pub embedding: EmbeddingConfig,

    /// Local index settings.
    pub local: LocalConfig,

    /// Remote vector database settings.
    pub remote: RemoteConfig,

    /// Cross-backend synchronization.
    pub sync: SyncConfig,

    /// Search defaults.
    pub search: SearchConfig,
}

/// Cost governance settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CostConfig {
    /// Monthly budget for the remote backend.
    pub max_monthly_cost: f64,

    /// Budget ratio at which warning observers fire.
    pub warning_ratio: f64,

    /// Budget ratio at which the manager falls back to the local backend.
    pub fallback_ratio: f64,

    /// Price per 1000 searches.
    pub search_cost_per_1k: f64,

    /// Price per 1000 inserted vectors.
    pub insert_cost_per_1k: f64,

    /// Price per 1000 updated vectors.
    pub update_cost_per_1k: f64,

    /// Price per GB stored for a month.
    pub storage_cost_per_gb_month: f64,

    /// Shortest observation window used when extrapolating to a month.
    pub min_window_secs: u64,

    /// Where usage metrics are persisted.
    pub metrics_file: String,
}

/// Embedding model settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Model identifier.
    pub model: String,

    /// Vector dimension.
    pub dimension: usize,

    /// Model download cache directory.
    pub cache_path: Option<String>,
}

/// Local index settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalConfig {
    /// Directory holding the persisted index artifacts.
    pub index_path: String,

    /// Minimum fuzzy score (0.0 to 1.0) for a name match to count.
    pub fuzzy_floor: f32,
}

/// Remote vector database settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Whether to bring up the remote backend at all.
    pub enabled: bool,

    /// Service URL, or `:memory:` for an in-process collection.
    pub url: String,

    /// Collection name.
    pub collection: String,

    /// API key, if the service requires one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Per-call timeout in seconds.
    pub timeout_secs: u64,

    /// Attempts when bringing the collection up.
    pub connect_attempts: usize,

    /// Maximum age of the fuzzy name cache; defaults to the sync interval.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name_cache_ttl_secs: Option<u64>,

    /// Minimum fuzzy score (0.0 to 1.0) for a name match to count.
    pub fuzzy_floor: f32,
}

/// Synchronization settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Mirror every batch to the inactive backend.
    pub auto_sync: bool,

    /// Seconds between full reconciliations.
    pub sync_interval_secs: u64,
}

/// Search defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Weight of vector similarity in hybrid search.
    pub semantic_weight: f32,

    /// Weight of fuzzy name similarity in hybrid search.
    pub fuzzy_weight: f32,

    /// Result count when the caller does not specify one.
    pub default_top_k: usize,
}

// ============================================================================
// Default implementations
// ============================================================================

impl Default for CostConfig {
    fn default() -> Self {
        Self {
            max_monthly_cost: 50.0,
            warning_ratio: 0.8,
            fallback_ratio: 0.9,
            search_cost_per_1k: 0.0004,
            insert_cost_per_1k: 0.002,
            update_cost_per_1k: 0.002,
            storage_cost_per_gb_month: 0.25,
            min_window_secs: 3600,
            metrics_file: "cost_metrics.json".to_string(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: "all-MiniLM-L6-v2".to_string(),
            dimension: 384,
            cache_path: None,
        }
    }
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            index_path: "local_index".to_string(),
            fuzzy_floor: crate::fuzzy::DEFAULT_FUZZY_FLOOR,
        }
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            url: ":memory:".to_string(),
            collection: "api_catalog".to_string(),
            api_key: None,
            timeout_secs: 30,
            connect_attempts: 3,
            name_cache_ttl_secs: None,
            fuzzy_floor: crate::fuzzy::DEFAULT_FUZZY_FLOOR,
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            auto_sync: true,
            sync_interval_secs: 3600,
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            semantic_weight: 0.7,
            fuzzy_weight: 0.3,
            default_top_k: 10,
        }
    }
}

// ============================================================================
// Validation and accessors
// ============================================================================

impl CostConfig {
    /// Check the threshold invariants.
    pub fn validate(&self) -> Result<()> {
        if !(self.max_monthly_cost > 0.0) {
            return Err(Error::config("cost.max_monthly_cost must be positive"));
        }
        if !(0.0 < self.warning_ratio
            && self.warning_ratio < self.fallback_ratio
            && self.fallback_ratio <= 1.0)
        {
            return Err(Error::config(format!(
                "cost ratios must satisfy 0 < warning ({}) < fallback ({}) <= 1",
                self.warning_ratio, self.fallback_ratio
            )));
        }
        let prices = [
            self.search_cost_per_1k,
            self.insert_cost_per_1k,
            self.update_cost_per_1k,
            self.storage_cost_per_gb_month,
        ];
        if prices.iter().any(|p| !(*p >= 0.0)) {
            return Err(Error::config("cost unit prices must be non-negative"));
        }
        if self.min_window_secs == 0 {
            return Err(Error::config("cost.min_window_secs must be at least 1"));
        }
        Ok(())
    }
}

impl RemoteConfig {
    /// Per-call timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Whether the URL selects the in-process collection.
    pub fn is_in_memory(&self) -> bool {
        self.url.trim() == ":memory:"
    }
}

impl SyncConfig {
    /// Interval between reconciliations.
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs)
    }
}

impl ApivecConfig {
    /// Check every section.
    pub fn validate(&self) -> Result<()> {
        self.cost.validate()?;
        if self.embedding.dimension == 0 {
            return Err(Error::config("embedding.dimension must be positive"));
        }
        if self.remote.timeout_secs == 0 {
            return Err(Error::config("remote.timeout_secs must be positive"));
        }
        if self.search.semantic_weight < 0.0 || self.search.fuzzy_weight < 0.0 {
            return Err(Error::config("search weights must be non-negative"));
        }
        for floor in [self.local.fuzzy_floor, self.remote.fuzzy_floor] {
            if !(0.0..=1.0).contains(&floor) {
                return Err(Error::config("fuzzy_floor must be within 0.0..=1.0"));
            }
        }
        Ok(())
    }

    /// Name-cache TTL for the remote backend.
    pub fn name_cache_ttl(&self) -> Duration {
        Duration::from_secs(
            self.remote
                .name_cache_ttl_secs
                .unwrap_or(self.sync.sync_interval_secs),
        )
    }
}

// ============================================================================
// Config loading
// ============================================================================

impl ApivecConfig {
    /// Load configuration from file, environment, and defaults, then
    /// validate it.
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder =
            Confygery::new().map_err(|e| Error::config(format!("config init: {e}")))?;

        if let Some(path) = Self::resolve_config_path(config_path) {
            if path.exists() {
                log::debug!("Loading config from {}", path.display());
                builder
                    .add_file(&path.to_string_lossy())
                    .map_err(|e| Error::config(format!("config file: {e}")))?;
            }
        }

        let mut env_opts = env::Options::with_top_level(ENV_PREFIX);
        for section in ["cost", "embedding", "local", "remote", "sync", "search"] {
            env_opts.add_section(section);
        }
        builder
            .add_env(env_opts)
            .map_err(|e| Error::config(format!("config env: {e}")))?;

        let config: Self = builder
            .build()
            .map_err(|e| Error::config(format!("config build: {e}")))?;

        config.validate()?;
        Ok(config)
    }

    /// Resolve the config file path from an explicit path, env var, or XDG
    /// default.
    pub fn resolve_config_path(explicit: Option<&str>) -> Option<PathBuf> {
        if let Some(path) = explicit {
            return Some(PathBuf::from(path));
        }
        if let Ok(path) = std::env::var(format!("{ENV_PREFIX}_CONFIG")) {
            return Some(PathBuf::from(path));
        }
        Self::default_config_path()
    }

    /// Return the XDG default config path.
    pub fn default_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("apivec").join("config.toml"))
    }

    /// Serialize this config to a pretty-printed TOML string.
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::config(e.to_string()))
    }

    /// Flatten this config into `APIVEC_*` environment variable pairs.
    pub fn to_env_vars(&self) -> Result<Vec<(String, String)>> {
        let value = toml::Value::try_from(self).map_err(|e| Error::config(e.to_string()))?;
        let mut vars = Vec::new();
        flatten_toml_value(&value, ENV_PREFIX, &mut vars);
        Ok(vars)
    }
}

/// Recursively flatten a TOML value into `KEY=value` pairs.
fn flatten_toml_value(value: &toml::Value, prefix: &str, out: &mut Vec<(String, String)>) {
    match value {
        toml::Value::Table(table) => {
            for (key, val) in table {
                flatten_toml_value(val, &format!("{prefix}_{}", key.to_uppercase()), out);
            }
        }
        toml::Value::Array(arr) => {
            if let Ok(json) = serde_json::to_string(arr) {
                out.push((prefix.to_string(), json));
            }
        }
        toml::Value::String(s) => out.push((prefix.to_string(), s.clone())),
        toml::Value::Integer(i) => out.push((prefix.to_string(), i.to_string())),
        toml::Value::Float(f) => out.push((prefix.to_string(), f.to_string())),
        toml::Value::Boolean(b) => out.push((prefix.to_string(), b.to_string())),
        toml::Value::Datetime(dt) => out.push((prefix.to_string(), dt.to_string())),
    }
}

// ============================================================================
// Tests
// ============================================================================
