//! Workflow step definitions and the per-attempt invocation input.
//!
//! An `ActionStatement` is one step of a workflow. It is immutable once
//! dispatched; the durable executor hands the same statement to every
//! attempt wrapped in a `RunActionInput`.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// A single workflow step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionStatement {
    /// Identifier assigned by the workflow definition layer (if any)
    #[serde(default)]
    pub id: Option<String>,

    /// Symbolic name, unique within the workflow
    #[serde(rename = "ref")]
    pub ref_: String,

    /// Namespaced action key (`namespace.name`)
    pub action: String,

    /// Keyword arguments for the action
    #[serde(default)]
    pub args: Map<String, Value>,

    #[serde(default)]
    pub title: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub retry_policy: RetryPolicy,

    /// Delay before the action starts, in seconds
    #[serde(default, deserialize_with = "non_negative_seconds")]
    pub start_delay: f64,
}

impl ActionStatement {
    /// Create a statement with empty args and default policy
    pub fn new(ref_: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            id: None,
            ref_: ref_.into(),
            action: action.into(),
            args: Map::new(),
            title: String::new(),
            description: String::new(),
            retry_policy: RetryPolicy::default(),
            start_delay: 0.0,
        }
    }

    /// Set a single keyword argument
    pub fn with_arg(mut self, name: impl Into<String>, value: Value) -> Self {
        self.args.insert(name.into(), value);
        self
    }

    pub fn with_args(mut self, args: Map<String, Value>) -> Self {
        self.args = args;
        self
    }

    /// Set the start delay in seconds (negative values are clamped to zero)
    pub fn with_start_delay(mut self, seconds: f64) -> Self {
        self.start_delay = seconds.max(0.0);
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    /// Start delay as a `Duration`, `None` when there is nothing to wait for
    pub fn start_delay(&self) -> Option<Duration> {
        if self.start_delay > 0.0 && self.start_delay.is_finite() {
            // Saturate delays beyond what a Duration can hold
            Some(Duration::try_from_secs_f64(self.start_delay).unwrap_or(Duration::MAX))
        } else {
            None
        }
    }

    /// Load a statement from a YAML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read statement file: {}", path.display()))?;

        Self::from_yaml(&content)
    }

    /// Parse a statement from YAML content
    pub fn from_yaml(content: &str) -> Result<Self> {
        let statement: Self =
            serde_yaml::from_str(content).context("Failed to parse action statement YAML")?;
        statement.validate()?;
        Ok(statement)
    }

    /// Validate the statement definition
    pub fn validate(&self) -> Result<()> {
        if self.ref_.is_empty() {
            anyhow::bail!("Action statement ref cannot be empty");
        }

        match self.action.rsplit_once('.') {
            Some((namespace, name)) if !namespace.is_empty() && !name.is_empty() => {}
            _ => anyhow::bail!(
                "Action '{}' in step '{}' is not of the form namespace.name",
                self.action,
                self.ref_
            ),
        }

        if Duration::try_from_secs_f64(self.start_delay).is_err() {
            anyhow::bail!(
                "start_delay of step '{}' must be a non-negative number of seconds, got {}",
                self.ref_,
                self.start_delay
            );
        }

        Ok(())
    }
}

fn non_negative_seconds<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = f64::deserialize(deserializer)?;
    if Duration::try_from_secs_f64(value).is_err() {
        return Err(serde::de::Error::custom(format!(
            "start_delay must be a non-negative number of seconds, got {}",
            value
        )));
    }
    Ok(value)
}

/// Retry policy carried with each step
///
/// The core never retries on its own. The policy is forwarded to the durable
/// executor and logged with every attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including first try)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Per-attempt timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout: u64,
}

fn default_max_attempts() -> u32 {
    1
}
fn default_timeout() -> u64 {
    300
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            timeout: default_timeout(),
        }
    }
}

/// Execution context carried alongside every invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunContext {
    pub wf_id: String,
    pub wf_exec_id: String,
    #[serde(default)]
    pub wf_run_id: Option<uuid::Uuid>,
    #[serde(default = "default_environment")]
    pub environment: String,
}

pub(crate) fn default_environment() -> String {
    "default".to_string()
}

impl RunContext {
    pub fn new(wf_id: impl Into<String>, wf_exec_id: impl Into<String>) -> Self {
        Self {
            wf_id: wf_id.into(),
            wf_exec_id: wf_exec_id.into(),
            wf_run_id: None,
            environment: default_environment(),
        }
    }

    pub fn with_environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = environment.into();
        self
    }
}

/// The unit passed to the invocation controller for one attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunActionInput {
    pub task: ActionStatement,
    pub run_context: RunContext,
}

impl RunActionInput {
    pub fn new(task: ActionStatement, run_context: RunContext) -> Self {
        Self { task, run_context }
    }
}
