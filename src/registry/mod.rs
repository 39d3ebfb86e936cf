//! Dynamic action registry.
//!
//! The registry maps action keys (`namespace.name`) to registered actions:
//! the implementation, its derived argument schema, declared secrets and
//! metadata. It is built once at process startup and then shared read-only
//! (typically as `Arc<ActionRegistry>`), so lookups need no lock.
//!
//! ```rust,ignore
//! let mut registry = ActionRegistry::new();
//! registry.register(
//!     ActionSpec::new("core", "add")
//!         .description("Add two integers")
//!         .param(ParamSpec::required("a", TypeTag::Int))
//!         .param(ParamSpec::required("b", TypeTag::Int))
//!         .returns(TypeTag::Int)
//!         .handler(|args, _ctx| async move {
//!             let a = args["a"].as_i64().unwrap_or_default();
//!             let b = args["b"].as_i64().unwrap_or_default();
//!             Ok(json!(a + b))
//!         }),
//! )?;
//! let registry = Arc::new(registry);
//! ```
//!
//! Every call goes through `RegisteredAction::invoke`, which rejects
//! positional arguments, validates keyword arguments against the schema,
//! resolves the caller role and opens a secret sandbox before running the
//! implementation.

pub mod sandbox;
pub mod schema;

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, info, info_span, Instrument};

use crate::domain::{ApplicationFailure, ErrorKind, Role};

pub use sandbox::{
    ChainSecretResolver, EnvSecretResolver, SandboxError, SandboxGuard, SecretResolver,
    SecretSandbox, Secrets, StaticSecretResolver,
};
pub use schema::{
    ActionSchema, ArgsSchema, ParamDefault, ParamSpec, ReturnSchema, SchemaError, TypeTag,
    ValidationIssue,
};

/// Namespace used when none is given
pub const DEFAULT_NAMESPACE: &str = "core";

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Keyword arguments passed to an implementation
pub type Kwargs = Map<String, Value>;

/// Per-invocation context handed to an implementation
#[derive(Debug, Clone)]
pub struct ActionContext {
    pub key: String,
    pub role: Role,
    pub secrets: Secrets,
}

/// Errors raised by an action implementation
#[derive(Debug, Error)]
pub enum ActionError {
    /// The action's own expected failure, with its retry intent
    #[error("{detail}")]
    Domain { detail: String, retryable: bool },

    /// A structured failure from a nested call, passed through as is
    #[error(transparent)]
    Application(#[from] ApplicationFailure),

    #[error(transparent)]
    Unexpected(#[from] anyhow::Error),
}

impl ActionError {
    /// A domain error the durable executor may retry
    pub fn retryable(detail: impl Into<String>) -> Self {
        Self::Domain {
            detail: detail.into(),
            retryable: true,
        }
    }

    /// A domain error that must not be retried
    pub fn fatal(detail: impl Into<String>) -> Self {
        Self::Domain {
            detail: detail.into(),
            retryable: false,
        }
    }
}

type AsyncHandler =
    Arc<dyn Fn(Kwargs, ActionContext) -> BoxFuture<'static, Result<Value, ActionError>> + Send + Sync>;
type BlockingHandler = Arc<dyn Fn(Kwargs, ActionContext) -> Result<Value, ActionError> + Send + Sync>;

/// An implementation, async or blocking
///
/// Blocking handlers run on the tokio blocking pool so callers always await.
#[derive(Clone)]
pub enum Handler {
    Async(AsyncHandler),
    Blocking(BlockingHandler),
}

impl Handler {
    pub fn is_async(&self) -> bool {
        matches!(self, Handler::Async(_))
    }
}

impl std::fmt::Debug for Handler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Handler::Async(_) => f.write_str("Handler::Async"),
            Handler::Blocking(_) => f.write_str("Handler::Blocking"),
        }
    }
}

/// Declaration of an action, consumed by `ActionRegistry::register`
#[derive(Debug, Clone)]
pub struct ActionSpec {
    namespace: String,
    name: String,
    description: String,
    version: Option<String>,
    secrets: BTreeSet<String>,
    params: Vec<ParamSpec>,
    returns: Option<TypeTag>,
    metadata: Map<String, Value>,
    handler: Option<Handler>,
}

impl ActionSpec {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            description: String::new(),
            version: None,
            secrets: BTreeSet::new(),
            params: Vec::new(),
            returns: None,
            metadata: Map::new(),
            handler: None,
        }
    }

    /// The key this spec registers under
    pub fn key(&self) -> String {
        format!("{}.{}", self.namespace, self.name)
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    /// Declare secrets injected for the duration of each call
    pub fn secrets<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.secrets.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn param(mut self, param: ParamSpec) -> Self {
        self.params.push(param);
        self
    }

    pub fn params(mut self, params: impl IntoIterator<Item = ParamSpec>) -> Self {
        self.params.extend(params);
        self
    }

    pub fn returns(mut self, ty: TypeTag) -> Self {
        self.returns = Some(ty);
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Attach an async implementation
    pub fn handler<F, Fut>(mut self, func: F) -> Self
    where
        F: Fn(Kwargs, ActionContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, ActionError>> + Send + 'static,
    {
        let func = Arc::new(func);
        self.handler = Some(Handler::Async(Arc::new(move |args, ctx| {
            let func = Arc::clone(&func);
            Box::pin(async move { func(args, ctx).await })
        })));
        self
    }

    /// Attach an async implementation over typed arguments
    ///
    /// The validated keyword arguments are deserialized into `A` and the
    /// output is serialized back to JSON.
    pub fn typed_handler<A, R, F, Fut>(mut self, func: F) -> Self
    where
        A: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        F: Fn(A, ActionContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, ActionError>> + Send + 'static,
    {
        let func = Arc::new(func);
        self.handler = Some(Handler::Async(Arc::new(move |args, ctx| {
            let func = Arc::clone(&func);
            Box::pin(async move {
                let typed: A = serde_json::from_value(Value::Object(args))
                    .map_err(|e| ActionError::Unexpected(e.into()))?;
                let output = func(typed, ctx).await?;
                serde_json::to_value(output).map_err(|e| ActionError::Unexpected(e.into()))
            })
        })));
        self
    }

    /// Attach a synchronous implementation
    pub fn blocking_handler<F>(mut self, func: F) -> Self
    where
        F: Fn(Kwargs, ActionContext) -> Result<Value, ActionError> + Send + Sync + 'static,
    {
        self.handler = Some(Handler::Blocking(Arc::new(func)));
        self
    }
}

/// A call to a registered action
#[derive(Debug, Clone, Default)]
pub struct Invocation {
    positional: Vec<Value>,
    kwargs: Kwargs,
    role: Option<Role>,
}

impl Invocation {
    /// Call with keyword arguments only
    pub fn keyword(kwargs: Kwargs) -> Self {
        Self {
            kwargs,
            ..Default::default()
        }
    }

    /// Build from a raw JSON value: objects become keyword arguments,
    /// arrays become positional arguments, `null` means no arguments
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(kwargs) => Self::keyword(kwargs),
            Value::Array(positional) => Self {
                positional,
                ..Default::default()
            },
            Value::Null => Self::default(),
            other => Self {
                positional: vec![other],
                ..Default::default()
            },
        }
    }

    pub fn with_positional(mut self, value: Value) -> Self {
        self.positional.push(value);
        self
    }

    pub fn with_role(mut self, role: Role) -> Self {
        self.role = Some(role);
        self
    }
}

/// Registry errors raised at registration or call time
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Action '{0}' is already registered")]
    DuplicateKey(String),

    #[error("Action '{0}' has no implementation")]
    NotCallable(String),

    #[error("Invalid action key '{0}': expected namespace.name")]
    InvalidKey(String),

    #[error("Invalid schema for action '{key}': {source}")]
    InvalidSchema {
        key: String,
        #[source]
        source: SchemaError,
    },

    #[error("Action '{0}' is not registered")]
    UnknownAction(String),

    #[error("Action '{key}' must be called with keyword arguments ({count} positional given)")]
    KeywordArgsRequired { key: String, count: usize },

    #[error("Invalid arguments for action '{key}': {}", format_issues(.issues))]
    ArgsValidationFailed {
        key: String,
        issues: Vec<ValidationIssue>,
    },
}

fn format_issues(issues: &[ValidationIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl RegistryError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RegistryError::DuplicateKey(_) => ErrorKind::DuplicateKey,
            // Malformed declarations cannot become a callable action either.
            RegistryError::NotCallable(_)
            | RegistryError::InvalidKey(_)
            | RegistryError::InvalidSchema { .. } => ErrorKind::NotCallable,
            RegistryError::UnknownAction(_) => ErrorKind::UnknownAction,
            RegistryError::KeywordArgsRequired { .. } => ErrorKind::KeywordArgsRequired,
            RegistryError::ArgsValidationFailed { .. } => ErrorKind::ArgsValidationFailed,
        }
    }
}

/// Anything that can go wrong while invoking an action
#[derive(Debug, Error)]
pub enum InvokeError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("Secret sandbox for action '{key}' could not be opened: {source}")]
    Sandbox {
        key: String,
        #[source]
        source: SandboxError,
    },

    #[error(transparent)]
    Action(#[from] ActionError),
}

/// A registered action: implementation plus cached schema and metadata
#[derive(Debug, Clone)]
pub struct RegisteredAction {
    pub key: String,
    pub namespace: String,
    pub name: String,
    pub description: String,
    pub version: Option<String>,
    pub secrets: BTreeSet<String>,
    pub args_schema: ArgsSchema,
    pub return_schema: Option<ReturnSchema>,
    pub metadata: Map<String, Value>,
    handler: Handler,
}

impl RegisteredAction {
    pub fn is_async(&self) -> bool {
        self.handler.is_async()
    }

    /// Schema pair for the introspection surface
    pub fn construct_schema(&self) -> ActionSchema {
        ActionSchema {
            args: self.args_schema.to_json_schema(),
            returns: self.return_schema.as_ref().map(ReturnSchema::to_json_schema),
        }
    }

    /// Invoke through the validating, sandboxed wrapper
    pub async fn invoke(
        &self,
        invocation: Invocation,
        resolver: &dyn SecretResolver,
    ) -> Result<Value, InvokeError> {
        if !invocation.positional.is_empty() {
            return Err(RegistryError::KeywordArgsRequired {
                key: self.key.clone(),
                count: invocation.positional.len(),
            }
            .into());
        }

        let args = self
            .args_schema
            .validate(&invocation.kwargs)
            .map_err(|issues| RegistryError::ArgsValidationFailed {
                key: self.key.clone(),
                issues,
            })?;

        let role = invocation.role.unwrap_or_default();
        let span = info_span!("action", key = %self.key, role = %role);

        async move {
            let guard = SecretSandbox::acquire(resolver, &self.secrets, &role)
                .await
                .map_err(|source| InvokeError::Sandbox {
                    key: self.key.clone(),
                    source,
                })?;
            let ctx = ActionContext {
                key: self.key.clone(),
                role,
                secrets: guard.secrets(),
            };

            debug!(is_async = self.is_async(), "Invoking action");
            let result = match &self.handler {
                Handler::Async(func) => func(args, ctx).await,
                Handler::Blocking(func) => {
                    let func = Arc::clone(func);
                    match tokio::task::spawn_blocking(move || func(args, ctx)).await {
                        Ok(result) => result,
                        Err(e) => Err(ActionError::Unexpected(anyhow::anyhow!(
                            "Blocking action task failed: {}",
                            e
                        ))),
                    }
                }
            };
            drop(guard);

            Ok(result?)
        }
        .instrument(span)
        .await
    }
}

/// Catalog of callable actions
pub struct ActionRegistry {
    actions: HashMap<String, RegisteredAction>,
    resolver: Arc<dyn SecretResolver>,
}

impl Default for ActionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ActionRegistry {
    /// Create an empty registry with no secret source
    pub fn new() -> Self {
        Self::with_resolver(Arc::new(StaticSecretResolver::default()))
    }

    /// Create an empty registry resolving secrets through `resolver`
    pub fn with_resolver(resolver: Arc<dyn SecretResolver>) -> Self {
        Self {
            actions: HashMap::new(),
            resolver,
        }
    }

    /// Register an action
    ///
    /// Fails with `DuplicateKey` if the key is taken (the existing entry is
    /// left untouched) and with `NotCallable` if no handler was attached.
    pub fn register(&mut self, spec: ActionSpec) -> Result<&RegisteredAction, RegistryError> {
        let key = spec.key();
        info!(%key, "Registering action");

        if spec.namespace.is_empty()
            || spec.name.is_empty()
            || spec.name.contains('.')
            || spec.namespace.split('.').any(str::is_empty)
        {
            return Err(RegistryError::InvalidKey(key));
        }
        if self.actions.contains_key(&key) {
            return Err(RegistryError::DuplicateKey(key));
        }
        let handler = spec
            .handler
            .ok_or_else(|| RegistryError::NotCallable(key.clone()))?;

        let title = format!("{}__{}_model", spec.namespace.replace('.', "_"), spec.name);
        let args_schema =
            ArgsSchema::derive(title, spec.params).map_err(|source| RegistryError::InvalidSchema {
                key: key.clone(),
                source,
            })?;

        let action = RegisteredAction {
            key: key.clone(),
            namespace: spec.namespace,
            name: spec.name,
            description: spec.description,
            version: spec.version,
            secrets: spec.secrets,
            args_schema,
            return_schema: spec.returns.map(ReturnSchema::new),
            metadata: spec.metadata,
            handler,
        };

        Ok(self.actions.entry(key).or_insert(action))
    }

    /// Look up a registered action
    pub fn get(&self, key: &str) -> Result<&RegisteredAction, RegistryError> {
        self.actions
            .get(key)
            .ok_or_else(|| RegistryError::UnknownAction(key.to_string()))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.actions.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Registered keys in sorted order
    pub fn keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.actions.keys().map(String::as_str).collect();
        keys.sort_unstable();
        keys
    }

    /// Argument and return schemas for every action
    pub fn get_schemas(&self) -> BTreeMap<String, ActionSchema> {
        self.actions
            .iter()
            .map(|(key, action)| (key.clone(), action.construct_schema()))
            .collect()
    }

    /// Schemas for actions whose key matches a glob pattern (e.g. `core.*`)
    pub fn schemas_matching(
        &self,
        pattern: &str,
    ) -> Result<BTreeMap<String, ActionSchema>, glob::PatternError> {
        let pattern = glob::Pattern::new(pattern)?;
        Ok(self
            .actions
            .iter()
            .filter(|(key, _)| pattern.matches(key))
            .map(|(key, action)| (key.clone(), action.construct_schema()))
            .collect())
    }

    /// Look up and invoke an action in one step
    pub async fn invoke(&self, key: &str, invocation: Invocation) -> Result<Value, InvokeError> {
        let action = self.get(key)?;
        action.invoke(invocation, self.resolver.as_ref()).await
    }
}
