//! Scoped secret injection for a single invocation.
//!
//! `SecretSandbox::acquire` resolves the action's declared secrets for the
//! calling role and returns a `SandboxGuard`. The implementation reads the
//! values through a `Secrets` view. Dropping the guard clears the values, so
//! every exit path releases them: normal return, error, panic, or the
//! invocation future being dropped on cancellation. A view that outlives its
//! guard (e.g. a blocking task still running after cancellation) sees
//! nothing.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

use crate::domain::Role;

/// Prefix for secrets read from the process environment
pub const ENV_SECRET_PREFIX: &str = "ACTIONFLOW_SECRET_";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SandboxError {
    #[error("Secret '{0}' is not defined")]
    MissingSecret(String),

    #[error("Failed to resolve secrets: {0}")]
    Resolver(String),
}

impl SandboxError {
    /// Resolver backend failures are transient; an undefined secret is not
    pub fn is_retryable(&self) -> bool {
        matches!(self, SandboxError::Resolver(_))
    }
}

/// Source of secret values
#[async_trait]
pub trait SecretResolver: Send + Sync {
    /// Resolve every name in `names` for `role`
    async fn resolve(
        &self,
        names: &BTreeSet<String>,
        role: &Role,
    ) -> Result<HashMap<String, String>, SandboxError>;
}

/// Secrets held in memory (loaded from config or built in tests)
#[derive(Debug, Clone, Default)]
pub struct StaticSecretResolver {
    values: HashMap<String, String>,
}

impl StaticSecretResolver {
    pub fn new(values: HashMap<String, String>) -> Self {
        Self { values }
    }

    pub fn with_secret(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(name.into(), value.into());
        self
    }
}

#[async_trait]
impl SecretResolver for StaticSecretResolver {
    async fn resolve(
        &self,
        names: &BTreeSet<String>,
        _role: &Role,
    ) -> Result<HashMap<String, String>, SandboxError> {
        names
            .iter()
            .map(|name| {
                self.values
                    .get(name)
                    .map(|v| (name.clone(), v.clone()))
                    .ok_or_else(|| SandboxError::MissingSecret(name.clone()))
            })
            .collect()
    }
}

/// Secrets read from `ACTIONFLOW_SECRET_<NAME>` environment variables
#[derive(Debug, Clone, Default)]
pub struct EnvSecretResolver;

impl EnvSecretResolver {
    pub fn variable_name(secret: &str) -> String {
        let normalized: String = secret
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
            .collect();
        format!("{}{}", ENV_SECRET_PREFIX, normalized)
    }
}

#[async_trait]
impl SecretResolver for EnvSecretResolver {
    async fn resolve(
        &self,
        names: &BTreeSet<String>,
        _role: &Role,
    ) -> Result<HashMap<String, String>, SandboxError> {
        names
            .iter()
            .map(|name| {
                std::env::var(Self::variable_name(name))
                    .map(|v| (name.clone(), v))
                    .map_err(|_| SandboxError::MissingSecret(name.clone()))
            })
            .collect()
    }
}

/// Tries each resolver in order for every name
///
/// A `MissingSecret` from one resolver falls through to the next. Any other
/// error stops resolution.
#[derive(Clone, Default)]
pub struct ChainSecretResolver {
    resolvers: Vec<Arc<dyn SecretResolver>>,
}

impl ChainSecretResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, resolver: Arc<dyn SecretResolver>) -> Self {
        self.resolvers.push(resolver);
        self
    }
}

#[async_trait]
impl SecretResolver for ChainSecretResolver {
    async fn resolve(
        &self,
        names: &BTreeSet<String>,
        role: &Role,
    ) -> Result<HashMap<String, String>, SandboxError> {
        let mut values = HashMap::with_capacity(names.len());
        'names: for name in names {
            let single = BTreeSet::from([name.clone()]);
            for resolver in &self.resolvers {
                match resolver.resolve(&single, role).await {
                    Ok(found) => {
                        values.extend(found);
                        continue 'names;
                    }
                    Err(SandboxError::MissingSecret(_)) => continue,
                    Err(e) => return Err(e),
                }
            }
            return Err(SandboxError::MissingSecret(name.clone()));
        }
        Ok(values)
    }
}

type Slot = Arc<RwLock<Option<HashMap<String, String>>>>;

/// Read-only view of the secrets injected for one invocation
#[derive(Debug, Clone, Default)]
pub struct Secrets {
    slot: Slot,
}

impl Secrets {
    /// Get a secret value; `None` if undeclared or already released
    pub fn get(&self, name: &str) -> Option<String> {
        let guard = self.slot.read().ok()?;
        guard.as_ref()?.get(name).cloned()
    }

    /// Whether the owning sandbox is still open
    pub fn is_active(&self) -> bool {
        self.slot.read().map(|g| g.is_some()).unwrap_or(false)
    }

    /// Names of the secrets currently visible
    pub fn names(&self) -> Vec<String> {
        let Ok(guard) = self.slot.read() else {
            return Vec::new();
        };
        let mut names: Vec<String> = guard
            .as_ref()
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }
}

/// Entry point for opening a per-invocation sandbox
pub struct SecretSandbox;

impl SecretSandbox {
    /// Resolve `names` for `role` and inject them into a fresh guard
    pub async fn acquire(
        resolver: &dyn SecretResolver,
        names: &BTreeSet<String>,
        role: &Role,
    ) -> Result<SandboxGuard, SandboxError> {
        let values = if names.is_empty() {
            HashMap::new()
        } else {
            resolver.resolve(names, role).await?
        };
        debug!(count = values.len(), %role, "Opened secret sandbox");

        Ok(SandboxGuard {
            slot: Arc::new(RwLock::new(Some(values))),
        })
    }
}

/// Owner of the injected secret state; releases it on drop
#[derive(Debug)]
pub struct SandboxGuard {
    slot: Slot,
}

impl SandboxGuard {
    /// A view to hand to the implementation
    pub fn secrets(&self) -> Secrets {
        Secrets {
            slot: Arc::clone(&self.slot),
        }
    }
}

impl Drop for SandboxGuard {
    fn drop(&mut self) {
        // A poisoned lock still holds the values; clear them anyway.
        let mut guard = match self.slot.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(mut values) = guard.take() {
            values.clear();
        }
    }
}
