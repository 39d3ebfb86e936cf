//! Command-line interface for actionflow.
//!
//! Provides commands for inspecting action schemas, validating and running a
//! single workflow step, correlating an exported execution history and
//! showing the resolved configuration.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::actions::register_builtins;
use crate::config::{self, ResolvedConfig};
use crate::controller::{ActionController, AttemptError, AttemptInfo, ValidateActionInput};
use crate::domain::{exec_id_from_parts, ActionStatement, Role, RunActionInput, RunContext};
use crate::executor::{FsResultStore, LocalExecutor, ResultsBackend};
use crate::history::{correlate, History};
use crate::registry::{
    ActionRegistry, ChainSecretResolver, EnvSecretResolver, SecretResolver, StaticSecretResolver,
};

/// actionflow - workflow action execution core
#[derive(Parser, Debug)]
#[command(name = "actionflow")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print argument and return schemas of registered actions
    Schemas {
        /// Only actions whose key matches this glob (e.g. "core.*")
        #[arg(short, long)]
        filter: Option<String>,
    },

    /// Validate a step's arguments without running it
    Validate {
        /// Step definition (YAML ActionStatement)
        statement: PathBuf,
    },

    /// Run one attempt of a step
    Run {
        /// Step definition (YAML ActionStatement)
        statement: PathBuf,

        /// Where the result goes (defaults to the configured backend)
        #[arg(short, long, value_enum)]
        backend: Option<BackendArg>,

        /// Attempt number reported in failures
        #[arg(short, long, default_value = "1")]
        attempt: u32,

        /// Workflow id
        #[arg(long, env = "ACTIONFLOW_WF_ID", default_value = "wf-local")]
        wf_id: String,

        /// Workflow execution id (<wf_id>:<suffix>); generated if omitted
        #[arg(long)]
        wf_exec_id: Option<String>,

        /// Environment for the run context
        #[arg(short, long)]
        environment: Option<String>,
    },

    /// Correlate an exported execution history
    History {
        /// History JSON ({"events": [...]} or a bare array)
        events: PathBuf,

        /// Only print failure events
        #[arg(long)]
        failures_only: bool,
    },

    /// Show resolved configuration (debug)
    Config,
}

/// Results backend for CLI (maps to ResultsBackend)
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum BackendArg {
    /// Return the raw result
    Memory,

    /// Store the result and return a pointer
    Store,
}

impl From<BackendArg> for ResultsBackend {
    fn from(b: BackendArg) -> Self {
        match b {
            BackendArg::Memory => ResultsBackend::Memory,
            BackendArg::Store => ResultsBackend::Store,
        }
    }
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Schemas { filter } => show_schemas(filter.as_deref()).await,
            Commands::Validate { statement } => validate_statement(&statement).await,
            Commands::Run {
                statement,
                backend,
                attempt,
                wf_id,
                wf_exec_id,
                environment,
            } => {
                let options = RunOptions {
                    backend: backend.map(Into::into),
                    attempt,
                    wf_id,
                    wf_exec_id,
                    environment,
                };
                run_statement(&statement, options).await
            }
            Commands::History {
                events,
                failures_only,
            } => show_history(&events, failures_only).await,
            Commands::Config => show_config().await,
        }
    }
}

struct RunOptions {
    backend: Option<ResultsBackend>,
    attempt: u32,
    wf_id: String,
    wf_exec_id: Option<String>,
    environment: Option<String>,
}

/// Build the registry with built-ins and the configured secret sources
fn build_registry(cfg: &ResolvedConfig) -> Result<Arc<ActionRegistry>> {
    let resolver: Arc<dyn SecretResolver> = Arc::new(
        ChainSecretResolver::new()
            .with(Arc::new(StaticSecretResolver::new(cfg.secrets.clone())))
            .with(Arc::new(EnvSecretResolver)),
    );

    let mut registry = ActionRegistry::with_resolver(resolver);
    register_builtins(&mut registry).context("Failed to register built-in actions")?;
    Ok(Arc::new(registry))
}

fn build_controller(cfg: &ResolvedConfig) -> Result<ActionController> {
    let registry = build_registry(cfg)?;
    let store = Arc::new(FsResultStore::new(&cfg.store_dir));
    Ok(ActionController::new(Arc::new(LocalExecutor::with_store(
        registry, store,
    ))))
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("Failed to encode output")?
    );
    Ok(())
}

/// Print schemas of registered actions
async fn show_schemas(filter: Option<&str>) -> Result<()> {
    let cfg = config::config()?;
    let registry = build_registry(cfg)?;

    let schemas = match filter {
        Some(pattern) => registry
            .schemas_matching(pattern)
            .with_context(|| format!("Invalid filter pattern: {}", pattern))?,
        None => registry.get_schemas(),
    };

    if schemas.is_empty() {
        eprintln!("No actions match.");
        return Ok(());
    }
    print_json(&schemas)
}

/// Validate a step definition
async fn validate_statement(path: &Path) -> Result<()> {
    let cfg = config::config()?;
    let task = ActionStatement::from_file(path)?;
    let controller = build_controller(cfg)?;

    let response = controller
        .validate_action(&ValidateActionInput {
            role: Role::service(),
            task,
        })
        .await?;

    print_json(&response)?;
    if !response.ok {
        std::process::exit(1);
    }
    Ok(())
}

/// Run one attempt of a step definition
async fn run_statement(path: &Path, options: RunOptions) -> Result<()> {
    let cfg = config::config()?;
    let task = ActionStatement::from_file(path)?;
    let controller = build_controller(cfg)?;

    let wf_exec_id = options
        .wf_exec_id
        .unwrap_or_else(|| exec_id_from_parts(&options.wf_id, &format!("exec-{}", Uuid::new_v4())));
    let environment = options
        .environment
        .unwrap_or_else(|| cfg.environment.clone());
    let backend = options.backend.unwrap_or(cfg.results_backend);
    let input = RunActionInput::new(
        task,
        RunContext::new(options.wf_id, wf_exec_id).with_environment(environment),
    );

    // Ctrl-C cancels the attempt
    let cancel = CancellationToken::new();
    let signal_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            signal_token.cancel();
        }
    });

    info!(%backend, wf_exec_id = %input.run_context.wf_exec_id, "Running step");
    let attempt = AttemptInfo::with_cancel(options.attempt, cancel);
    match controller
        .run(&input, &Role::service(), &attempt, backend)
        .await
    {
        Ok(output) => print_json(&output),
        Err(AttemptError::Failed(failure)) => {
            print_json(&failure)?;
            eprintln!(
                "\n[Step '{}' failed ({})]",
                input.task.ref_,
                if failure.non_retryable { "fatal" } else { "retryable" }
            );
            std::process::exit(1);
        }
        Err(e @ AttemptError::Cancelled { .. }) => {
            warn!("{}", e);
            eprintln!("\n[{}]", e);
            std::process::exit(130);
        }
    }
}

/// Correlate and print an execution history
async fn show_history(path: &Path, failures_only: bool) -> Result<()> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read history file: {}", path.display()))?;
    let history = History::from_json(&content)
        .with_context(|| format!("Failed to parse history file: {}", path.display()))?;

    let mut entries = correlate(&history.events);
    if failures_only {
        entries.retain(|entry| entry.failure.is_some());
    }
    print_json(&entries)
}

/// Show resolved configuration
async fn show_config() -> Result<()> {
    let cfg = config::config()?;

    println!("actionflow configuration");
    println!();
    println!(
        "Config file: {}",
        cfg.config_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none - using defaults)".to_string())
    );
    println!();
    println!("Paths:");
    println!("  Home:  {}", cfg.home.display());
    println!("  Store: {}", cfg.store_dir.display());
    println!();
    println!("Executor:");
    println!("  Results backend: {}", cfg.results_backend);
    println!("  Environment:     {}", cfg.environment);
    println!();
    println!("Secrets:");
    if cfg.secrets.is_empty() {
        println!("  (none configured; ACTIONFLOW_SECRET_* variables are used)");
    } else {
        let mut names: Vec<&String> = cfg.secrets.keys().collect();
        names.sort();
        for name in names {
            println!("  {}", name);
        }
    }
    if let Some(filter) = &cfg.log_filter {
        println!();
        println!("Log filter: {}", filter);
    }

    Ok(())
}
