use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::utils::file::expand_path;

use super::cli::CliConfig;
use super::constants::{
    APP_DOT_FOLDER, CONFIG_FILE_NAME, DEFAULT_EXPLORING_MAX_DATASETS,
    DEFAULT_EXPLORING_MAX_ENTRIES, DEFAULT_EXPLORING_TTL_SECS, DEFAULT_EXPRESSION_MAX_ENTRIES,
    DEFAULT_EXPRESSION_TTL_SECS, DEFAULT_GEOMETRY_MAX_ENTRIES, DEFAULT_GEOMETRY_TTL_SECS,
    DEFAULT_LARGE_DATASET_THRESHOLD, DEFAULT_POSTGRES_ACQUIRE_TIMEOUT_SECS,
    DEFAULT_POSTGRES_MAX_CONNECTIONS, DEFAULT_SCRATCH_SCHEMA,
};

// =============================================================================
// Embedded Engine Enum
// =============================================================================

/// Embedded SQL engine used for datasets without a full SQL server
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddedEngine {
    #[default]
    Spatialite,
    Duckdb,
}

impl fmt::Display for EmbeddedEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EmbeddedEngine::Spatialite => write!(f, "spatialite"),
            EmbeddedEngine::Duckdb => write!(f, "duckdb"),
        }
    }
}

// =============================================================================
// File Config Sections
// =============================================================================

/// Engine configuration section (from JSON config file)
#[derive(Debug, Default, Clone, Deserialize)]
pub struct EngineFileConfig {
    /// Whether the full SQL backend may be used (default: true)
    pub full_sql_available: Option<bool>,
    /// Metric CRS used for buffers when the request does not name one
    pub metric_srid: Option<u32>,
    /// Feature count above which in-memory filtering warns (default: 50000)
    pub large_dataset_threshold: Option<u64>,
    /// Schema holding materialized views (default: "geofilter")
    pub scratch_schema: Option<String>,
}

/// Cache configuration section (from JSON config file)
#[derive(Debug, Default, Clone, Deserialize)]
pub struct CacheFileConfig {
    pub expression_ttl_secs: Option<u64>,
    pub expression_max_entries: Option<u64>,
    pub geometry_ttl_secs: Option<u64>,
    pub geometry_max_entries: Option<u64>,
    pub exploring_ttl_secs: Option<u64>,
    pub exploring_max_entries: Option<u64>,
    /// Distinct datasets tracked by the exploring cache (default: 50)
    pub exploring_max_datasets: Option<usize>,
}

/// History configuration section (from JSON config file)
#[derive(Debug, Default, Clone, Deserialize)]
pub struct HistoryFileConfig {
    /// Maximum states kept per dataset; unbounded when absent
    pub max_depth: Option<usize>,
}

/// PostgreSQL configuration section (from JSON config file)
#[derive(Debug, Default, Clone, Deserialize)]
pub struct PostgresFileConfig {
    /// PostGIS connection URL (or use GEOFILTER_POSTGRES_URL env var)
    pub url: Option<String>,
    /// Maximum number of connections in the pool (default: 5)
    pub max_connections: Option<u32>,
    /// Connection acquire timeout in seconds (default: 10)
    pub acquire_timeout_secs: Option<u64>,
}

/// Database configuration section (from JSON config file)
#[derive(Debug, Default, Clone, Deserialize)]
pub struct DatabaseFileConfig {
    pub postgres: Option<PostgresFileConfig>,
    /// Embedded engine: spatialite (default) or duckdb
    pub embedded_engine: Option<EmbeddedEngine>,
    /// Embedded database file; in-memory DuckDB or `<data>/embedded.db` when absent
    pub embedded_path: Option<String>,
    /// Directory for embedded temporary objects
    pub scratch_dir: Option<String>,
}

/// File-based configuration (JSON)
#[derive(Debug, Default, Deserialize)]
pub struct FileConfig {
    pub engine: Option<EngineFileConfig>,
    pub cache: Option<CacheFileConfig>,
    pub history: Option<HistoryFileConfig>,
    pub database: Option<DatabaseFileConfig>,
    #[serde(flatten)]
    pub extra: serde_json::Value,
}

impl FileConfig {
    /// Load configuration from a JSON file
    fn load_from_file(path: &Path) -> Result<Self> {
        tracing::debug!(path = %path.display(), "Loading config file");
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        tracing::trace!(config = ?config, "Parsed config file");
        Ok(config)
    }

    /// Warn about unknown fields in the config
    fn warn_unknown_fields(&self) {
        if let serde_json::Value::Object(map) = &self.extra
            && !map.is_empty()
        {
            let keys_str: String = map
                .keys()
                .map(|k| k.as_str())
                .collect::<Vec<_>>()
                .join(", ");
            tracing::warn!(
                fields = %keys_str,
                "Unknown fields in config file (possible typos)"
            );
        }
    }

    /// Merge another FileConfig into this one (other takes precedence)
    fn merge(&mut self, other: FileConfig) {
        // Engine
        if let Some(engine) = other.engine {
            let current = self.engine.get_or_insert_with(EngineFileConfig::default);
            if engine.full_sql_available.is_some() {
                tracing::trace!(value = ?engine.full_sql_available, "Merging engine.full_sql_available");
                current.full_sql_available = engine.full_sql_available;
            }
            if engine.metric_srid.is_some() {
                tracing::trace!(srid = ?engine.metric_srid, "Merging engine.metric_srid");
                current.metric_srid = engine.metric_srid;
            }
            if engine.large_dataset_threshold.is_some() {
                tracing::trace!(
                    threshold = ?engine.large_dataset_threshold,
                    "Merging engine.large_dataset_threshold"
                );
                current.large_dataset_threshold = engine.large_dataset_threshold;
            }
            if engine.scratch_schema.is_some() {
                tracing::trace!(schema = ?engine.scratch_schema, "Merging engine.scratch_schema");
                current.scratch_schema = engine.scratch_schema;
            }
        }

        // Cache
        if let Some(cache) = other.cache {
            let current = self.cache.get_or_insert_with(CacheFileConfig::default);
            if cache.expression_ttl_secs.is_some() {
                current.expression_ttl_secs = cache.expression_ttl_secs;
            }
            if cache.expression_max_entries.is_some() {
                current.expression_max_entries = cache.expression_max_entries;
            }
            if cache.geometry_ttl_secs.is_some() {
                current.geometry_ttl_secs = cache.geometry_ttl_secs;
            }
            if cache.geometry_max_entries.is_some() {
                current.geometry_max_entries = cache.geometry_max_entries;
            }
            if cache.exploring_ttl_secs.is_some() {
                current.exploring_ttl_secs = cache.exploring_ttl_secs;
            }
            if cache.exploring_max_entries.is_some() {
                current.exploring_max_entries = cache.exploring_max_entries;
            }
            if cache.exploring_max_datasets.is_some() {
                current.exploring_max_datasets = cache.exploring_max_datasets;
            }
            tracing::trace!(cache = ?current, "Merged cache section");
        }

        // History
        if let Some(history) = other.history {
            let current = self.history.get_or_insert_with(HistoryFileConfig::default);
            if history.max_depth.is_some() {
                tracing::trace!(max_depth = ?history.max_depth, "Merging history.max_depth");
                current.max_depth = history.max_depth;
            }
        }

        // Database (with nested postgres)
        if let Some(database) = other.database {
            let current = self.database.get_or_insert_with(DatabaseFileConfig::default);

            if let Some(pg) = database.postgres {
                let current_pg = current
                    .postgres
                    .get_or_insert_with(PostgresFileConfig::default);
                if pg.url.is_some() {
                    tracing::trace!("Merging database.postgres.url");
                    current_pg.url = pg.url;
                }
                if pg.max_connections.is_some() {
                    tracing::trace!(
                        max_connections = ?pg.max_connections,
                        "Merging database.postgres.max_connections"
                    );
                    current_pg.max_connections = pg.max_connections;
                }
                if pg.acquire_timeout_secs.is_some() {
                    current_pg.acquire_timeout_secs = pg.acquire_timeout_secs;
                }
            }

            if database.embedded_engine.is_some() {
                tracing::trace!(engine = ?database.embedded_engine, "Merging database.embedded_engine");
                current.embedded_engine = database.embedded_engine;
            }
            if database.embedded_path.is_some() {
                current.embedded_path = database.embedded_path;
            }
            if database.scratch_dir.is_some() {
                current.scratch_dir = database.scratch_dir;
            }
        }

        // Extra (unknown) fields are reported per file, not merged
    }
}

// =============================================================================
// Resolved Config
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub full_sql_available: bool,
    pub metric_srid: Option<u32>,
    pub large_dataset_threshold: u64,
    pub scratch_schema: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            full_sql_available: true,
            metric_srid: None,
            large_dataset_threshold: DEFAULT_LARGE_DATASET_THRESHOLD,
            scratch_schema: DEFAULT_SCRATCH_SCHEMA.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    pub expression_ttl_secs: u64,
    pub expression_max_entries: u64,
    pub geometry_ttl_secs: u64,
    pub geometry_max_entries: u64,
    pub exploring_ttl_secs: u64,
    pub exploring_max_entries: u64,
    pub exploring_max_datasets: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            expression_ttl_secs: DEFAULT_EXPRESSION_TTL_SECS,
            expression_max_entries: DEFAULT_EXPRESSION_MAX_ENTRIES,
            geometry_ttl_secs: DEFAULT_GEOMETRY_TTL_SECS,
            geometry_max_entries: DEFAULT_GEOMETRY_MAX_ENTRIES,
            exploring_ttl_secs: DEFAULT_EXPLORING_TTL_SECS,
            exploring_max_entries: DEFAULT_EXPLORING_MAX_ENTRIES,
            exploring_max_datasets: DEFAULT_EXPLORING_MAX_DATASETS,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HistoryConfig {
    pub max_depth: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostgresConfig {
    pub url: Option<String>,
    pub max_connections: u32,
    pub acquire_timeout_secs: u64,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: DEFAULT_POSTGRES_MAX_CONNECTIONS,
            acquire_timeout_secs: DEFAULT_POSTGRES_ACQUIRE_TIMEOUT_SECS,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DatabaseConfig {
    pub postgres: PostgresConfig,
    pub embedded_engine: EmbeddedEngine,
    pub embedded_path: Option<PathBuf>,
    pub scratch_dir: Option<PathBuf>,
}

/// Application configuration
#[derive(Debug, Clone, Default)]
pub struct AppConfig {
    pub engine: EngineConfig,
    pub cache: CacheConfig,
    pub history: HistoryConfig,
    pub database: DatabaseConfig,
}

impl AppConfig {
    /// Load configuration from all sources
    ///
    /// Priority (lowest to highest):
    /// 1. Defaults
    /// 2. Profile directory config (~/.geofilter/geofilter.json)
    /// 3. Local directory config OR CLI-specified config path
    /// 4. CLI arguments (which include env var fallbacks via clap)
    pub fn load(cli: &CliConfig) -> Result<Self> {
        tracing::debug!("Loading application configuration");
        tracing::trace!(cli = ?cli, "CLI config");

        let mut file_config = FileConfig::default();
        let mut found_configs: Vec<String> = Vec::new();

        if let Some(profile_path) = get_profile_config_path()
            && profile_path.exists()
        {
            let profile_config = FileConfig::load_from_file(&profile_path)?;
            profile_config.warn_unknown_fields();
            file_config.merge(profile_config);
            found_configs.push(profile_path.display().to_string());
        }

        let overlay_path = if let Some(ref path) = cli.config {
            let expanded = expand_path(&path.to_string_lossy());
            if !expanded.exists() {
                anyhow::bail!("Config file not found: {}", expanded.display());
            }
            Some(expanded)
        } else {
            let local = PathBuf::from(CONFIG_FILE_NAME);
            if local.exists() { Some(local) } else { None }
        };

        if let Some(path) = overlay_path {
            let overlay_config = FileConfig::load_from_file(&path)?;
            overlay_config.warn_unknown_fields();
            file_config.merge(overlay_config);
            found_configs.push(path.display().to_string());
        }

        tracing::debug!(configs = ?found_configs, "Config files loaded");

        let config = Self::from_layers(file_config, cli);
        config.validate()?;
        tracing::debug!(config = ?config, "Configuration resolved");
        Ok(config)
    }

    /// Layer defaults, file values and CLI/env overrides
    fn from_layers(file_config: FileConfig, cli: &CliConfig) -> Self {
        let file_engine = file_config.engine.unwrap_or_default();
        let file_cache = file_config.cache.unwrap_or_default();
        let file_history = file_config.history.unwrap_or_default();
        let file_database = file_config.database.unwrap_or_default();
        let file_postgres = file_database.postgres.unwrap_or_default();

        let engine_defaults = EngineConfig::default();
        let engine = EngineConfig {
            full_sql_available: cli
                .full_sql
                .or(file_engine.full_sql_available)
                .unwrap_or(engine_defaults.full_sql_available),
            metric_srid: file_engine.metric_srid,
            large_dataset_threshold: file_engine
                .large_dataset_threshold
                .unwrap_or(engine_defaults.large_dataset_threshold),
            scratch_schema: file_engine
                .scratch_schema
                .unwrap_or(engine_defaults.scratch_schema),
        };

        let cache_defaults = CacheConfig::default();
        let cache = CacheConfig {
            expression_ttl_secs: file_cache
                .expression_ttl_secs
                .unwrap_or(cache_defaults.expression_ttl_secs),
            expression_max_entries: file_cache
                .expression_max_entries
                .unwrap_or(cache_defaults.expression_max_entries),
            geometry_ttl_secs: file_cache
                .geometry_ttl_secs
                .unwrap_or(cache_defaults.geometry_ttl_secs),
            geometry_max_entries: file_cache
                .geometry_max_entries
                .unwrap_or(cache_defaults.geometry_max_entries),
            exploring_ttl_secs: file_cache
                .exploring_ttl_secs
                .unwrap_or(cache_defaults.exploring_ttl_secs),
            exploring_max_entries: file_cache
                .exploring_max_entries
                .unwrap_or(cache_defaults.exploring_max_entries),
            exploring_max_datasets: file_cache
                .exploring_max_datasets
                .unwrap_or(cache_defaults.exploring_max_datasets),
        };

        let history = HistoryConfig {
            max_depth: file_history.max_depth,
        };

        // postgres.url: CLI/env overrides file config
        let postgres = PostgresConfig {
            url: cli.postgres_url.clone().or(file_postgres.url),
            max_connections: file_postgres
                .max_connections
                .unwrap_or(DEFAULT_POSTGRES_MAX_CONNECTIONS),
            acquire_timeout_secs: file_postgres
                .acquire_timeout_secs
                .unwrap_or(DEFAULT_POSTGRES_ACQUIRE_TIMEOUT_SECS),
        };

        let database = DatabaseConfig {
            postgres,
            embedded_engine: cli
                .embedded_engine
                .or(file_database.embedded_engine)
                .unwrap_or_default(),
            embedded_path: cli
                .embedded_path
                .clone()
                .or_else(|| file_database.embedded_path.map(|p| expand_path(&p))),
            scratch_dir: file_database.scratch_dir.map(|p| expand_path(&p)),
        };

        Self {
            engine,
            cache,
            history,
            database,
        }
    }

    fn validate(&self) -> Result<()> {
        if self.engine.scratch_schema.trim().is_empty() {
            anyhow::bail!("Configuration error: engine.scratch_schema must not be empty");
        }
        if self.engine.metric_srid == Some(0) {
            anyhow::bail!("Configuration error: engine.metric_srid must be a valid EPSG code");
        }

        let capacities = [
            ("cache.expression_max_entries", self.cache.expression_max_entries),
            ("cache.geometry_max_entries", self.cache.geometry_max_entries),
            ("cache.exploring_max_entries", self.cache.exploring_max_entries),
            (
                "cache.exploring_max_datasets",
                self.cache.exploring_max_datasets as u64,
            ),
        ];
        for (name, value) in capacities {
            if value == 0 {
                anyhow::bail!("Configuration error: {} must be greater than 0", name);
            }
        }

        if self.history.max_depth == Some(0) {
            anyhow::bail!("Configuration error: history.max_depth must be greater than 0");
        }

        if let Some(url) = &self.database.postgres.url
            && url.trim().is_empty()
        {
            anyhow::bail!("Configuration error: database.postgres.url must not be empty");
        }
        if self.database.postgres.max_connections == 0 {
            anyhow::bail!(
                "Configuration error: database.postgres.max_connections must be greater than 0"
            );
        }

        Ok(())
    }
}

/// Get the profile config path (~/.geofilter/geofilter.json)
fn get_profile_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(APP_DOT_FOLDER).join(CONFIG_FILE_NAME))
}
