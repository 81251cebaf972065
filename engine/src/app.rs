//! Core application

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::mpsc;

use crate::core::cli::{self, CliConfig, Commands, SystemCommands};
use crate::core::config::{AppConfig, EmbeddedEngine};
use crate::core::constants::{DEFAULT_LOG_FILTER, ENV_LOG};
use crate::core::request::RunRequest;
use crate::core::shutdown::ShutdownService;
use crate::core::storage::AppStorage;
use crate::data::connector::{DatasetBinding, RegistryConnector};
use crate::data::executor::{
    DuckdbExecutor, PostgisExecutor, RecordingExecutor, SpatialiteExecutor, SqlExecutor,
};
use crate::data::reader::JsonFileReader;
use crate::data::sql::SqlBackend;
use crate::data::subset::{MemorySubset, SubsetStore, SubsetTarget};
use crate::domain::dataset::ProviderKind;
use crate::domain::orchestrator::{
    EngineContext, FilterOrchestrator, ProgressEvent, SerialRunner,
};
use crate::domain::session::SessionStore;

const PROGRESS_CHANNEL_SIZE: usize = 64;

pub struct CoreApp {
    pub config: AppConfig,
    pub storage: AppStorage,
    pub shutdown: ShutdownService,
}

/// SQL executors opened for one run
#[derive(Default)]
struct RunExecutors {
    full: Option<Arc<dyn SqlExecutor>>,
    embedded: Option<Arc<dyn SqlExecutor>>,
    /// Dry-run recorders, reported after the run
    recorders: Vec<Arc<RecordingExecutor>>,
}

impl RunExecutors {
    /// Executor for a dataset of `kind`; full SQL datasets fall back to the embedded engine
    fn for_kind(&self, kind: ProviderKind) -> Option<Arc<dyn SqlExecutor>> {
        match kind {
            ProviderKind::FullSql => self.full.clone().or_else(|| self.embedded.clone()),
            ProviderKind::EmbeddedSql => self.embedded.clone(),
            ProviderKind::GenericReader => None,
        }
    }
}

impl CoreApp {
    /// Run the application with CLI argument parsing
    pub async fn run() -> Result<()> {
        dotenvy::dotenv().ok();
        Self::init_logging();

        tracing::debug!("Application starting");

        let (cli_config, command) = cli::parse();
        tracing::trace!(command = ?command, "Parsed command");

        let command = match command {
            Some(Commands::System {
                command: system_cmd,
            }) => {
                return Self::handle_system_command(system_cmd);
            }
            Some(command) => command,
            None => {
                println!("Nothing to do. Run `geofilter --help` for available commands.");
                return Ok(());
            }
        };

        let app = Self::init(&cli_config).await?;
        match command {
            Commands::Run { request, dry_run } => app.run_request(&request, dry_run).await,
            Commands::Undo { dataset } => app.step_history(&dataset, false).await,
            Commands::Redo { dataset } => app.step_history(&dataset, true).await,
            Commands::History { dataset } => app.print_history(&dataset).await,
            Commands::System { .. } => Ok(()),
        }
    }

    async fn init(cli: &CliConfig) -> Result<Self> {
        let config = AppConfig::load(cli)?;
        let storage = AppStorage::init(&config).await?;
        let shutdown = ShutdownService::new();
        Ok(Self {
            config,
            storage,
            shutdown,
        })
    }

    /// Orchestrator over `connector`, with the persisted session when `persist` is set
    async fn orchestrator(
        &self,
        connector: Arc<RegistryConnector>,
        persist: bool,
    ) -> Result<FilterOrchestrator> {
        let mut ctx = EngineContext::new(
            self.config.engine.clone(),
            &self.config.cache,
            &self.config.history,
        )
        .context("Failed to initialize caches")?
        .with_runner(Arc::new(SerialRunner::new()));
        if persist {
            ctx = ctx.with_session(SessionStore::new(self.storage.session_path()));
        }

        let orchestrator = FilterOrchestrator::new(ctx, connector);
        let restored = orchestrator
            .restore_session()
            .await
            .context("Failed to restore session")?;
        tracing::debug!(datasets = restored, "Session restored");
        Ok(orchestrator)
    }

    async fn run_request(&self, path: &Path, dry_run: bool) -> Result<()> {
        let request = RunRequest::load(path)?;
        let chain = request.chain()?;
        let executors = self.open_executors(&request, dry_run).await?;

        let subsets = SubsetStore::new(self.storage.subsets_path());
        let connector = RegistryConnector::new();
        for descriptor in request.descriptors() {
            let id = descriptor.dataset_id.as_str();
            let subset: Arc<dyn SubsetTarget> = if dry_run {
                Arc::new(MemorySubset::new(subsets.get(id).await?))
            } else {
                Arc::new(subsets.target(id))
            };

            let mut binding = DatasetBinding::new(subset);
            if let Some(sql) = executors.for_kind(descriptor.provider_kind) {
                binding = binding.with_sql(sql);
            }
            if let Some(files) = request.datasets.get(id) {
                if let Some(features) = &files.features {
                    binding = binding.with_reader(Arc::new(JsonFileReader::new(id, features)));
                }
                if let Some(count) = files.feature_count {
                    binding = binding.with_estimate(count);
                }
            }
            connector.register(id, binding);
        }

        let orchestrator = self.orchestrator(Arc::new(connector), !dry_run).await?;

        self.shutdown.install_signal_handlers();
        let (progress_tx, mut progress_rx) = mpsc::channel::<ProgressEvent>(PROGRESS_CHANNEL_SIZE);
        let progress_task = tokio::spawn(async move {
            while let Some(event) = progress_rx.recv().await {
                tracing::info!(
                    dataset = %event.dataset_id,
                    stage = ?event.stage,
                    "[{}/{}]",
                    event.completed,
                    event.total
                );
            }
        });

        let options = request
            .run_options()
            .with_progress(progress_tx)
            .with_cancel(self.shutdown.token());
        let summary = orchestrator
            .run_filter_action(
                request.action,
                request.source.as_ref(),
                &request.targets,
                &chain,
                options,
            )
            .await
            .context("Filter run failed")?;
        if let Err(e) = progress_task.await {
            tracing::debug!(error = %e, "Progress task ended abnormally");
        }

        println!("{}", serde_json::to_string_pretty(&summary)?);
        for recorder in &executors.recorders {
            let statements = recorder.statements();
            if statements.is_empty() {
                continue;
            }
            println!("\n-- {} statements", recorder.backend());
            for sql in statements {
                println!("{};", sql);
            }
        }

        if summary.cancelled {
            anyhow::bail!("Run cancelled; datasets already applied were kept");
        }
        Ok(())
    }

    /// Open the SQL executors the request's datasets need
    async fn open_executors(&self, request: &RunRequest, dry_run: bool) -> Result<RunExecutors> {
        let kinds: Vec<ProviderKind> = request
            .descriptors()
            .iter()
            .map(|d| d.provider_kind)
            .collect();
        let wants_full = kinds.contains(&ProviderKind::FullSql);
        let use_full = wants_full
            && self.config.engine.full_sql_available
            && (dry_run || self.config.database.postgres.url.is_some());
        let wants_embedded =
            kinds.contains(&ProviderKind::EmbeddedSql) || (wants_full && !use_full);

        if wants_full && !use_full {
            tracing::debug!("Full SQL datasets will use the embedded engine");
        }

        let embedded_backend = match self.config.database.embedded_engine {
            EmbeddedEngine::Spatialite => SqlBackend::Spatialite,
            EmbeddedEngine::Duckdb => SqlBackend::Duckdb,
        };

        let mut executors = RunExecutors::default();
        if dry_run {
            if use_full {
                let recorder = Arc::new(RecordingExecutor::new(SqlBackend::Postgis));
                let shared: Arc<dyn SqlExecutor> = recorder.clone();
                executors.full = Some(shared);
                executors.recorders.push(recorder);
            }
            if wants_embedded {
                let recorder = Arc::new(RecordingExecutor::new(embedded_backend));
                let shared: Arc<dyn SqlExecutor> = recorder.clone();
                executors.embedded = Some(shared);
                executors.recorders.push(recorder);
            }
            return Ok(executors);
        }

        if use_full {
            let postgis: Arc<dyn SqlExecutor> = Arc::new(
                PostgisExecutor::connect(&self.config.database.postgres)
                    .await
                    .context("Failed to connect to PostGIS")?,
            );
            executors.full = Some(postgis);
        }
        if wants_embedded {
            let embedded: Arc<dyn SqlExecutor> = match self.config.database.embedded_engine {
                EmbeddedEngine::Spatialite => {
                    let path = self.storage.embedded_db_path(&self.config);
                    Arc::new(
                        SpatialiteExecutor::open(&path)
                            .await
                            .context("Failed to open Spatialite database")?,
                    )
                }
                EmbeddedEngine::Duckdb => Arc::new(
                    DuckdbExecutor::open(
                        self.config.database.embedded_path.as_deref(),
                        Some(self.storage.scratch_dir()),
                    )
                    .await
                    .context("Failed to open DuckDB database")?,
                ),
            };
            executors.embedded = Some(embedded);
        }
        Ok(executors)
    }

    /// Move a dataset's history cursor and apply the resulting subset
    async fn step_history(&self, dataset: &str, redo: bool) -> Result<()> {
        let orchestrator = self
            .orchestrator(Arc::new(RegistryConnector::new()), true)
            .await?;
        let expression = if redo {
            orchestrator.redo(dataset)?
        } else {
            orchestrator.undo(dataset)?
        };

        let subsets = SubsetStore::new(self.storage.subsets_path());
        if let Err(e) = subsets.set(dataset, &expression).await {
            // Keep the cursor on the subset that is still applied
            let restored = if redo {
                orchestrator.undo(dataset)
            } else {
                orchestrator.redo(dataset)
            };
            if let Err(restore_err) = restored {
                tracing::warn!(dataset = %dataset, error = %restore_err, "Failed to restore history cursor");
            }
            return Err(e).context("Failed to apply subset");
        }
        orchestrator
            .persist_session()
            .await
            .context("Failed to save session")?;

        if expression.is_empty() {
            println!("{}: filter cleared", dataset);
        } else {
            println!("{}: {}", dataset, expression);
        }
        Ok(())
    }

    async fn print_history(&self, dataset: &str) -> Result<()> {
        let orchestrator = self
            .orchestrator(Arc::new(RegistryConnector::new()), true)
            .await?;
        let entries = orchestrator.history(dataset);
        if entries.is_empty() {
            println!("No history for dataset {}", dataset);
            return Ok(());
        }
        println!("{}", serde_json::to_string_pretty(&entries)?);
        Ok(())
    }

    fn handle_system_command(cmd: SystemCommands) -> Result<()> {
        match cmd {
            SystemCommands::Prune { yes } => Self::prune_data(yes),
        }
    }

    fn prune_data(skip_confirm: bool) -> Result<()> {
        let data_dir = AppStorage::resolve_data_dir();

        if !data_dir.exists() {
            println!(
                "Nothing to prune. Data directory does not exist: {}",
                data_dir.display()
            );
            return Ok(());
        }

        let data_dir = data_dir.canonicalize().unwrap_or(data_dir);

        println!("This will permanently delete the local data directory:");
        println!("  {}", data_dir.display());
        println!();
        println!(
            "Saved subsets, filter history and scratch files are removed. \
             Materialized views on PostGIS are not touched."
        );

        if !skip_confirm {
            print!("\nContinue? [y/N] ");
            std::io::Write::flush(&mut std::io::stdout())?;

            let mut input = String::new();
            std::io::stdin().read_line(&mut input)?;

            if !matches!(input.trim().to_lowercase().as_str(), "y" | "yes") {
                println!("Aborted.");
                return Ok(());
            }
        }

        std::fs::remove_dir_all(&data_dir)
            .with_context(|| format!("Failed to delete data directory: {}", data_dir.display()))?;
        println!("Pruned: {}", data_dir.display());
        Ok(())
    }

    fn init_logging() {
        let filter = std::env::var(ENV_LOG)
            .or_else(|_| std::env::var("RUST_LOG"))
            .unwrap_or_else(|_| DEFAULT_LOG_FILTER.to_string());

        tracing_subscriber::fmt()
            .with_target(false)
            .with_thread_ids(false)
            .with_level(true)
            .with_ansi(true)
            .compact()
            .with_env_filter(filter)
            .init();
    }
}
