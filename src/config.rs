//! Configuration for actionflow.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (ACTIONFLOW_HOME, ACTIONFLOW_STORE_DIR,
//!    ACTIONFLOW_ENVIRONMENT, ACTIONFLOW_RESULTS_BACKEND)
//! 2. Config file (.actionflow/config.yaml)
//! 3. Defaults (~/.actionflow)
//!
//! Config file discovery:
//! - Searches current directory and parents for .actionflow/config.yaml
//! - `paths.home` is relative to the .actionflow/ directory, `paths.store`
//!   to the project root (the directory holding .actionflow/)

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::domain::statement::default_environment;
use crate::executor::ResultsBackend;

pub const CONFIG_DIR: &str = ".actionflow";

/// Global cached configuration (stores Result to handle init errors)
static CONFIG: OnceLock<Result<ResolvedConfig, String>> = OnceLock::new();

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigFile {
    pub version: String,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub executor: ExecutorConfig,
    /// Secret name -> value, served by the static resolver
    #[serde(default)]
    pub secrets: HashMap<String, String>,
    /// tracing EnvFilter directive used when RUST_LOG is unset
    #[serde(default)]
    pub log_filter: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PathsConfig {
    /// Engine state directory (relative to .actionflow/)
    pub home: Option<String>,
    /// Result store directory (relative to the project root)
    pub store: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExecutorConfig {
    pub results_backend: Option<ResultsBackend>,
    pub environment: Option<String>,
}

/// Resolved configuration with absolute paths
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// Absolute path to actionflow home
    pub home: PathBuf,
    /// Root of the file result store
    pub store_dir: PathBuf,
    /// Backend used by `run` unless overridden
    pub results_backend: ResultsBackend,
    /// Environment placed in new run contexts
    pub environment: String,
    pub secrets: HashMap<String, String>,
    pub log_filter: Option<String>,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
}

/// Find config file by searching current directory and parents
fn find_config_file() -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let config_path = current.join(CONFIG_DIR).join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Resolve a path that may be relative to `base`
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
            .canonicalize()
            .unwrap_or_else(|_| base.join(path_str))
    }
}

/// Merge env, file and defaults
fn resolve(
    default_home: PathBuf,
    file: Option<(PathBuf, ConfigFile)>,
    env: impl Fn(&str) -> Option<String>,
) -> Result<ResolvedConfig> {
    let (config_file, config) = match file {
        Some((path, config)) => (Some(path), Some(config)),
        None => (None, None),
    };

    // .actionflow/ and the project root above it
    let config_dir = config_file.as_deref().and_then(Path::parent);
    let base_dir = config_dir.and_then(Path::parent);

    let home = if let Some(env_home) = env("ACTIONFLOW_HOME") {
        PathBuf::from(env_home)
    } else if let (Some(dir), Some(home)) = (
        config_dir,
        config.as_ref().and_then(|c| c.paths.home.as_deref()),
    ) {
        resolve_path(dir, home)
    } else {
        default_home
    };

    let store_dir = if let Some(env_store) = env("ACTIONFLOW_STORE_DIR") {
        PathBuf::from(env_store)
    } else if let (Some(dir), Some(store)) = (
        base_dir,
        config.as_ref().and_then(|c| c.paths.store.as_deref()),
    ) {
        resolve_path(dir, store)
    } else {
        home.join("store")
    };

    let results_backend = match env("ACTIONFLOW_RESULTS_BACKEND") {
        Some(raw) => raw
            .parse()
            .context("Invalid ACTIONFLOW_RESULTS_BACKEND")?,
        None => config
            .as_ref()
            .and_then(|c| c.executor.results_backend)
            .unwrap_or_default(),
    };

    let environment = env("ACTIONFLOW_ENVIRONMENT")
        .or_else(|| config.as_ref().and_then(|c| c.executor.environment.clone()))
        .unwrap_or_else(default_environment);

    let (secrets, log_filter) = match config {
        Some(config) => (config.secrets, config.log_filter),
        None => (HashMap::new(), None),
    };

    Ok(ResolvedConfig {
        home,
        store_dir,
        results_backend,
        environment,
        secrets,
        log_filter,
        config_file,
    })
}

/// Load configuration from all sources
fn load_config() -> Result<ResolvedConfig> {
    let default_home = dirs::home_dir()
        .context("Failed to determine home directory")?
        .join(CONFIG_DIR);

    let file = match find_config_file() {
        Some(path) => {
            let config = load_config_file(&path)?;
            Some((path, config))
        }
        None => None,
    };

    resolve(default_home, file, |key| std::env::var(key).ok())
}

/// Get the global configuration (loads once, then cached)
pub fn config() -> Result<&'static ResolvedConfig> {
    let result = CONFIG.get_or_init(|| load_config().map_err(|e| e.to_string()));

    match result {
        Ok(config) => Ok(config),
        Err(e) => anyhow::bail!("{}", e),
    }
}

/// Force reload configuration (useful for testing)
pub fn reload_config() -> Result<ResolvedConfig> {
    load_config()
}

/// Get the actionflow home directory
pub fn actionflow_home() -> Result<PathBuf> {
    Ok(config()?.home.clone())
}

/// Get the result store directory
pub fn store_dir() -> Result<PathBuf> {
    Ok(config()?.store_dir.clone())
}
