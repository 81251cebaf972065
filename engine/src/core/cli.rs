use clap::{Parser, Subcommand};

use std::path::PathBuf;

use super::config::EmbeddedEngine;
use super::constants::{
    ENV_CONFIG, ENV_EMBEDDED_ENGINE, ENV_EMBEDDED_PATH, ENV_FULL_SQL, ENV_POSTGRES_URL,
};

#[derive(Parser)]
#[command(name = "geofilter")]
#[command(version, about = "Spatial filter engine for multi-backend datasets", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Path to config file
    #[arg(long, short = 'c', global = true, env = ENV_CONFIG)]
    pub config: Option<PathBuf>,

    /// PostGIS connection URL for full SQL datasets
    #[arg(long, global = true, env = ENV_POSTGRES_URL)]
    pub postgres_url: Option<String>,

    /// Whether the full SQL backend may be used
    #[arg(long, global = true, env = ENV_FULL_SQL)]
    pub full_sql: Option<bool>,

    /// Embedded SQL engine (spatialite or duckdb)
    #[arg(long, global = true, env = ENV_EMBEDDED_ENGINE, value_parser = parse_embedded_engine)]
    pub embedded_engine: Option<EmbeddedEngine>,

    /// Embedded database file
    #[arg(long, global = true, env = ENV_EMBEDDED_PATH)]
    pub embedded_path: Option<PathBuf>,
}

/// Parse embedded engine from CLI/env string
fn parse_embedded_engine(s: &str) -> Result<EmbeddedEngine, String> {
    match s.to_lowercase().as_str() {
        "spatialite" => Ok(EmbeddedEngine::Spatialite),
        "duckdb" => Ok(EmbeddedEngine::Duckdb),
        _ => Err(format!(
            "Invalid embedded engine '{}'. Valid options: spatialite, duckdb",
            s
        )),
    }
}

#[derive(Subcommand, Clone, Debug)]
pub enum Commands {
    /// Run a filter request described by a JSON file
    Run {
        /// Request file (action, datasets, chain, source selection)
        request: PathBuf,
        /// Record generated SQL instead of executing it
        #[arg(long)]
        dry_run: bool,
    },
    /// Step a dataset back to its previous filter state
    Undo {
        dataset: String,
    },
    /// Re-apply a dataset's next filter state
    Redo {
        dataset: String,
    },
    /// Print a dataset's filter history
    History {
        dataset: String,
    },
    /// System maintenance commands
    System {
        #[command(subcommand)]
        command: SystemCommands,
    },
}

#[derive(Subcommand, Clone, Debug)]
pub enum SystemCommands {
    /// Delete local data directory (session, subsets, scratch). Requires confirmation.
    Prune {
        /// Skip confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
}

/// Configuration derived from CLI arguments
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub config: Option<PathBuf>,
    pub postgres_url: Option<String>,
    pub full_sql: Option<bool>,
    pub embedded_engine: Option<EmbeddedEngine>,
    pub embedded_path: Option<PathBuf>,
}

/// Parse CLI arguments and return config with command
pub fn parse() -> (CliConfig, Option<Commands>) {
    let cli = Cli::parse();
    let config = CliConfig {
        config: cli.config,
        postgres_url: cli.postgres_url,
        full_sql: cli.full_sql,
        embedded_engine: cli.embedded_engine,
        embedded_path: cli.embedded_path,
    };
    (config, cli.command)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_embedded_engine() {
        assert_eq!(parse_embedded_engine("DuckDB"), Ok(EmbeddedEngine::Duckdb));
        assert_eq!(
            parse_embedded_engine("spatialite"),
            Ok(EmbeddedEngine::Spatialite)
        );
        assert!(parse_embedded_engine("sqlite").is_err());
    }

    #[test]
    fn test_cli_run_command() {
        let cli = Cli::try_parse_from([
            "geofilter",
            "--full-sql",
            "false",
            "run",
            "request.json",
            "--dry-run",
        ])
        .unwrap();
        assert_eq!(cli.full_sql, Some(false));
        match cli.command {
            Some(Commands::Run { request, dry_run }) => {
                assert_eq!(request, PathBuf::from("request.json"));
                assert!(dry_run);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_cli_prune_command() {
        let cli = Cli::try_parse_from(["geofilter", "system", "prune", "-y"]).unwrap();
        assert!(matches!(
            cli.command,
            Some(Commands::System {
                command: SystemCommands::Prune { yes: true }
            })
        ));
    }
}
