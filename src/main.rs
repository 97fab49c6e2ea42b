//! Stratum CLI entrypoint.
//!
//! This is the main entrypoint for the stratum command-line tool.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use stratum::cancel::CancelSignal;
use stratum::cli::{Cli, Commands, OutputFormat, OutputFormatter, StateCommands};
use stratum::config::{
    DesiredDocument, DocumentHasher, DocumentLoader, DocumentValidator, StateBackend,
    find_document_file,
};
use stratum::error::{ConfigError, Result, StratumError};
use stratum::graph::GraphBuilder;
use stratum::planner::PlanMode;
use stratum::provider::ProviderRegistry;
use stratum::reconciler::Reconciler;
use stratum::state::{LocalStateStore, S3StateStore, StateStore};

use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

/// Exit status for failed or incomplete runs.
const EXIT_FAILED: u8 = 1;
/// Exit status for errors raised before any provider call.
const EXIT_PLAN_ERROR: u8 = 2;

/// Main entrypoint.
fn main() -> ExitCode {
    let cli = Cli::parse_args();

    init_logging(cli.verbose, cli.log_format);

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {e}");
            return ExitCode::from(EXIT_FAILED);
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e}");
            if e.is_plan_time() {
                ExitCode::from(EXIT_PLAN_ERROR)
            } else {
                ExitCode::from(EXIT_FAILED)
            }
        }
    }
}

/// Initializes the logging system.
fn init_logging(verbose: bool, format: OutputFormat) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    match format {
        OutputFormat::Text => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init(),
        OutputFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init(),
    }
}

/// Main async entry point.
async fn run(cli: Cli) -> Result<ExitCode> {
    let formatter = OutputFormatter::new(cli.output);
    let config = cli.config.as_deref();

    match cli.command {
        Commands::Validate { warnings } => cmd_validate(config, warnings, &formatter),
        Commands::Plan { detailed } => cmd_plan(config, detailed, &formatter).await,
        Commands::Apply { yes, parallelism } => {
            cmd_run(config, PlanMode::Apply, yes, parallelism, &formatter).await
        }
        Commands::Destroy { yes, parallelism } => {
            cmd_run(config, PlanMode::Destroy, yes, parallelism, &formatter).await
        }
        Commands::Graph => cmd_graph(config),
        Commands::State { command } => cmd_state(config, command, &formatter).await,
    }
}

/// Validate the document and its resource graph.
fn cmd_validate(
    config_path: Option<&Path>,
    warnings: bool,
    formatter: &OutputFormatter,
) -> Result<ExitCode> {
    let (document, _) = load_document(config_path)?;
    let result = DocumentValidator::new().check(&document);
    emit(&formatter.format_validation(&result, warnings))?;

    if !result.is_valid() {
        return Ok(ExitCode::from(EXIT_PLAN_ERROR));
    }

    let registry = ProviderRegistry::from_config(&document.providers)?;
    let graph = GraphBuilder::new(&registry).build(&document)?;
    emit(&formatter.format_message(
        true,
        &format!("Resource graph has {} node(s), no cycles", graph.len()),
    ))?;
    Ok(ExitCode::SUCCESS)
}

/// Show what apply would change.
async fn cmd_plan(
    config_path: Option<&Path>,
    detailed: bool,
    formatter: &OutputFormatter,
) -> Result<ExitCode> {
    let (document, registry, store) = load_context(config_path).await?;
    let plan = Reconciler::new(&document, &registry, store)
        .plan(PlanMode::Apply)
        .await?;

    emit(&formatter.format_plan(&plan, detailed))?;
    Ok(ExitCode::SUCCESS)
}

/// Apply or destroy after confirmation.
async fn cmd_run(
    config_path: Option<&Path>,
    mode: PlanMode,
    auto_approve: bool,
    parallelism: Option<usize>,
    formatter: &OutputFormatter,
) -> Result<ExitCode> {
    let (document, registry, store) = load_context(config_path).await?;

    let cancel = CancelSignal::new();
    let mut reconciler =
        Reconciler::new(&document, &registry, store).with_cancel(cancel.clone());
    if let Some(parallelism) = parallelism {
        reconciler = reconciler.with_parallelism(parallelism.max(1));
    }

    let plan = reconciler.plan(mode).await?;
    emit(&formatter.format_plan(&plan, false))?;
    if plan.is_empty() {
        return Ok(ExitCode::SUCCESS);
    }

    if !auto_approve {
        let question = match mode {
            PlanMode::Apply => "Do you want to apply this plan? [y/N]: ",
            PlanMode::Destroy => "This destroys every recorded resource. Continue? [y/N]: ",
        };
        if !confirm(question)? {
            eprintln!("Cancelled.");
            return Ok(ExitCode::SUCCESS);
        }
    }

    // Installed after the prompt so Ctrl-C while answering still exits the process.
    let _interrupt = InterruptHandler::install(cancel);
    let result = match mode {
        PlanMode::Apply => reconciler.apply().await?,
        PlanMode::Destroy => reconciler.destroy().await?,
    };
    emit(&formatter.format_result(&result))?;

    if result.success {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::from(EXIT_FAILED))
    }
}

/// Print the resource graph in DOT format.
fn cmd_graph(config_path: Option<&Path>) -> Result<ExitCode> {
    let (document, _) = load_document(config_path)?;
    DocumentValidator::new().validate(&document)?;
    let registry = ProviderRegistry::from_config(&document.providers)?;
    let graph = GraphBuilder::new(&registry).build(&document)?;

    emit(&graph.to_dot())?;
    Ok(ExitCode::SUCCESS)
}

/// State management commands.
async fn cmd_state(
    config_path: Option<&Path>,
    command: StateCommands,
    formatter: &OutputFormatter,
) -> Result<ExitCode> {
    let (document, _, store) = load_context(config_path).await?;

    match command {
        StateCommands::Show => {
            let snapshot = store.load().await?;
            let lock = store.get_lock_info().await?;
            let hash = DocumentHasher::new().hash_document(&document)?;
            emit(&formatter.format_state(&snapshot, lock.as_ref(), &hash))?;
        }
        StateCommands::Unlock { lock_id, force } => {
            if let Some(id) = lock_id {
                store.release_lock(&id).await?;
                emit(&formatter.format_message(true, "State unlocked"))?;
            } else if force {
                if let Some(lock) = store.get_lock_info().await? {
                    warn!("Force-releasing lock held by {}", lock.holder);
                    store.release_lock(&lock.lock_id).await?;
                    emit(&formatter.format_message(true, "State forcefully unlocked"))?;
                } else {
                    emit(&formatter.format_message(true, "State is not locked"))?;
                }
            } else {
                emit(&formatter.format_message(false, "Please provide --lock-id or use --force"))?;
                return Ok(ExitCode::from(EXIT_FAILED));
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Writes command output to stdout.
fn emit(text: &str) -> Result<()> {
    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{}", text.trim_end())?;
    Ok(())
}

/// Asks a yes/no question on stderr.
fn confirm(question: &str) -> Result<bool> {
    eprint!("{question}");
    std::io::stderr().flush()?;

    let mut input = String::new();
    std::io::stdin().read_line(&mut input)?;
    Ok(input.trim().eq_ignore_ascii_case("y"))
}

/// Cancels the run on Ctrl-C until dropped.
struct InterruptHandler {
    task: tokio::task::JoinHandle<()>,
}

impl InterruptHandler {
    fn install(cancel: CancelSignal) -> Self {
        let task = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, letting in-flight operations finish");
                cancel.cancel();
            }
        });
        Self { task }
    }
}

impl Drop for InterruptHandler {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Resolves the document path.
fn resolve_document_path(config_path: Option<&Path>) -> Result<PathBuf> {
    config_path.map_or_else(|| find_document_file("."), |path| Ok(path.to_path_buf()))
}

/// Loads the document with `.env` and environment overrides applied.
fn load_document(config_path: Option<&Path>) -> Result<(DesiredDocument, PathBuf)> {
    let document_file = resolve_document_path(config_path)?;
    debug!("Loading document from: {}", document_file.display());

    let base_dir = document_file
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
        .to_path_buf();

    let loader = DocumentLoader::new().with_base_path(&base_dir);
    loader.load_dotenv()?;
    let document = loader.load_with_env(&document_file)?;

    Ok((document, base_dir))
}

/// Loads and validates the document, then builds providers and the state store.
async fn load_context(
    config_path: Option<&Path>,
) -> Result<(DesiredDocument, ProviderRegistry, Arc<dyn StateStore>)> {
    let (document, base_dir) = load_document(config_path)?;
    DocumentValidator::new().validate(&document)?;

    let registry = ProviderRegistry::from_config(&document.providers)?;

    let store: Arc<dyn StateStore> = match document.state.backend {
        StateBackend::Local => {
            let path = document
                .state
                .path
                .as_ref()
                .map_or_else(|| base_dir.join(stratum::state::STATE_DIR), |p| base_dir.join(p));
            Arc::new(LocalStateStore::with_base_dir(path))
        }
        StateBackend::S3 => {
            let bucket = document.state.bucket.as_deref().ok_or_else(|| {
                StratumError::Config(ConfigError::validation(
                    "S3 backend requires a bucket",
                    "state.bucket",
                ))
            })?;
            Arc::new(
                S3StateStore::new(
                    bucket,
                    document.state.prefix.as_deref(),
                    document.state.region.as_deref(),
                )
                .await?,
            )
        }
    };
    debug!("Using {} state backend", store.backend_type());

    Ok((document, registry, store))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_interrupt_handler_released_on_drop() {
        let cancel = CancelSignal::new();
        let handler = InterruptHandler::install(cancel.clone());
        tokio::task::yield_now().await;
        assert!(!handler.task.is_finished());

        drop(handler);
        tokio::task::yield_now().await;
        assert!(!cancel.is_cancelled());
    }
}
