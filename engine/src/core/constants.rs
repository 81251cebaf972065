// =============================================================================
// Application Identity
// =============================================================================

/// Application name in title case (for display and platform directories)
pub const APP_NAME: &str = "GeoFilter";

/// Unix-style dotfile folder name
pub const APP_DOT_FOLDER: &str = ".geofilter";

// =============================================================================
// Configuration Files
// =============================================================================

/// Config file name
pub const CONFIG_FILE_NAME: &str = "geofilter.json";

/// Environment variable for config file path
pub const ENV_CONFIG: &str = "GEOFILTER_CONFIG";

// =============================================================================
// Environment Variables
// =============================================================================

/// Environment variable for log level/filter
pub const ENV_LOG: &str = "GEOFILTER_LOG";

/// Environment variable to override data directory
pub const ENV_DATA_DIR: &str = "GEOFILTER_DATA_DIR";

/// Environment variable for the PostGIS connection URL
pub const ENV_POSTGRES_URL: &str = "GEOFILTER_POSTGRES_URL";

/// Environment variable forcing the full SQL capability flag
pub const ENV_FULL_SQL: &str = "GEOFILTER_FULL_SQL";

/// Environment variable selecting the embedded engine (`spatialite` | `duckdb`)
pub const ENV_EMBEDDED_ENGINE: &str = "GEOFILTER_EMBEDDED_ENGINE";

/// Environment variable for the embedded database file
pub const ENV_EMBEDDED_PATH: &str = "GEOFILTER_EMBEDDED_PATH";

/// Default log filter when neither ENV_LOG nor RUST_LOG is set
pub const DEFAULT_LOG_FILTER: &str = "info,geofilter=info";

// =============================================================================
// Engine Defaults
// =============================================================================

/// Scratch schema holding materialized views on the full SQL backend
pub const DEFAULT_SCRATCH_SCHEMA: &str = "geofilter";

/// Prefix of materialized views created on the full SQL backend
pub const MATERIALIZED_VIEW_PREFIX: &str = "mv_";

/// Prefix of scratch tables created on embedded backends
pub const TEMP_TABLE_PREFIX: &str = "geofilter_tmp_";

/// Hex characters of the content hash used in artifact names
pub const ARTIFACT_HASH_LEN: usize = 16;

/// Feature count above which the reader path reports a performance warning
pub const DEFAULT_LARGE_DATASET_THRESHOLD: u64 = 50_000;

/// Decimal places of buffer distances rendered into SQL
pub const SQL_DISTANCE_DECIMALS: usize = 6;

// =============================================================================
// Filter Chain Limits
// =============================================================================

/// Maximum accepted size of a filter chain JSON document
pub const MAX_CHAIN_JSON_SIZE: usize = 256 * 1024;

/// Maximum number of filters in one chain
pub const MAX_FILTERS_PER_CHAIN: usize = 64;

/// Maximum payload size of a single filter
pub const MAX_FILTER_PAYLOAD_SIZE: usize = 64 * 1024;

// =============================================================================
// Cache Defaults
// =============================================================================

/// Exploring-result cache TTL in seconds
pub const DEFAULT_EXPLORING_TTL_SECS: u64 = 300;

/// Distinct datasets tracked by the exploring-result cache
pub const DEFAULT_EXPLORING_MAX_DATASETS: usize = 50;

/// Maximum entries of the exploring-result cache
pub const DEFAULT_EXPLORING_MAX_ENTRIES: u64 = 500;

/// Expression cache TTL in seconds
pub const DEFAULT_EXPRESSION_TTL_SECS: u64 = 3600;

/// Maximum entries of the expression cache
pub const DEFAULT_EXPRESSION_MAX_ENTRIES: u64 = 1_000;

/// Prepared-geometry cache TTL in seconds
pub const DEFAULT_GEOMETRY_TTL_SECS: u64 = 900;

/// Maximum entries of the prepared-geometry cache
pub const DEFAULT_GEOMETRY_MAX_ENTRIES: u64 = 200;

// =============================================================================
// Database Defaults
// =============================================================================

/// Maximum PostGIS pool connections
pub const DEFAULT_POSTGRES_MAX_CONNECTIONS: u32 = 5;

/// PostGIS pool acquire timeout in seconds
pub const DEFAULT_POSTGRES_ACQUIRE_TIMEOUT_SECS: u64 = 10;

/// Spatialite loadable extension name
pub const SPATIALITE_EXTENSION: &str = "mod_spatialite";

// =============================================================================
// Storage
// =============================================================================

/// Session file name inside the data directory
pub const SESSION_FILE_NAME: &str = "session.json";

/// Scratch subdirectory for embedded temporary objects
pub const SCRATCH_DIR_NAME: &str = "scratch";

/// File holding the subset expression of every CLI-managed dataset
pub const SUBSETS_FILE_NAME: &str = "subsets.json";

/// Default Spatialite database file inside the data directory
pub const EMBEDDED_DB_FILE_NAME: &str = "embedded.db";
