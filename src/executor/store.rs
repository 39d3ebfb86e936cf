//! Result store for store-mode execution.
//!
//! Large action results never cross the control plane inline. The executor
//! writes them to a `ResultStore` under a path derived from the workflow
//! execution id and the step ref, and only a `StoreObjectPtr` travels back.
//!
//! `FsResultStore` keeps one JSON envelope per result on disk:
//! `<root>/<wf_id>/<exec_suffix>/<ref>.json`.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::debug;

use crate::domain::{exec_id_from_parts, exec_id_to_parts, InvalidExecutionId};

/// Opaque pointer to an object in the result store
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StoreObjectPtr {
    pub key: String,
}

/// Structured storage path for one action result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionResultHandle {
    pub wf_exec_id: String,
    #[serde(rename = "ref")]
    pub ref_: String,
}

impl ActionResultHandle {
    pub fn new(wf_exec_id: impl Into<String>, ref_: impl Into<String>) -> Self {
        Self {
            wf_exec_id: wf_exec_id.into(),
            ref_: ref_.into(),
        }
    }

    /// Relative storage path: `<wf_id>/<exec_suffix>/<ref>.<ext>`
    pub fn to_path(&self, ext: &str) -> Result<String, StoreError> {
        let (wf_id, exec_suffix) = exec_id_to_parts(&self.wf_exec_id)?;
        if self.ref_.is_empty() || self.ref_.contains('/') {
            return Err(StoreError::InvalidPath(self.ref_.clone()));
        }
        Ok(format!("{}/{}/{}.{}", wf_id, exec_suffix, self.ref_, ext))
    }

    /// Parse a handle back from a storage path
    pub fn from_path(path: &str) -> Result<Self, StoreError> {
        let segments: Vec<&str> = path.split('/').collect();
        let [wf_id, exec_suffix, object] = segments.as_slice() else {
            return Err(StoreError::InvalidPath(path.to_string()));
        };
        let ref_ = object
            .rsplit_once('.')
            .map(|(stem, _ext)| stem)
            .unwrap_or(*object);
        if wf_id.is_empty() || exec_suffix.is_empty() || ref_.is_empty() {
            return Err(StoreError::InvalidPath(path.to_string()));
        }

        Ok(Self::new(exec_id_from_parts(wf_id, exec_suffix), ref_))
    }

    /// Pointer handed back across the control-plane boundary
    pub fn to_pointer(&self) -> Result<StoreObjectPtr, StoreError> {
        Ok(StoreObjectPtr {
            key: self.to_path("json")?,
        })
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Invalid store path: {0}")]
    InvalidPath(String),

    #[error(transparent)]
    InvalidExecutionId(#[from] InvalidExecutionId),

    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Digest mismatch for {key}: expected {expected}, found {found}")]
    DigestMismatch {
        key: String,
        expected: String,
        found: String,
    },

    #[error("Store I/O error for {key}: {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to encode or decode {key}: {source}")]
    Serde {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Backend holding store-mode results
#[async_trait]
pub trait ResultStore: Send + Sync {
    async fn put_json(&self, key: &str, value: &Value) -> Result<(), StoreError>;

    async fn get_json(&self, key: &str) -> Result<Value, StoreError>;

    /// Dereference a pointer
    async fn resolve(&self, ptr: &StoreObjectPtr) -> Result<Value, StoreError> {
        self.get_json(&ptr.key).await
    }
}

/// In-memory store for tests and ephemeral runs
#[derive(Debug, Default)]
pub struct MemoryResultStore {
    objects: RwLock<HashMap<String, Value>>,
}

impl MemoryResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.objects.read().await.is_empty()
    }
}

#[async_trait]
impl ResultStore for MemoryResultStore {
    async fn put_json(&self, key: &str, value: &Value) -> Result<(), StoreError> {
        self.objects
            .write()
            .await
            .insert(key.to_string(), value.clone());
        Ok(())
    }

    async fn get_json(&self, key: &str) -> Result<Value, StoreError> {
        self.objects
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }
}

/// On-disk envelope
#[derive(Debug, Serialize, Deserialize)]
struct StoredObject {
    /// sha256 of the compact JSON encoding of `value`
    digest: String,
    value: Value,
}

/// File-based store rooted at a directory
#[derive(Debug, Clone)]
pub struct FsResultStore {
    root: PathBuf,
}

impl FsResultStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, key: &str) -> Result<PathBuf, StoreError> {
        // Keys are relative paths produced by ActionResultHandle
        let relative = Path::new(key);
        let safe = relative
            .components()
            .all(|c| matches!(c, std::path::Component::Normal(_)));
        if key.is_empty() || !safe {
            return Err(StoreError::InvalidPath(key.to_string()));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl ResultStore for FsResultStore {
    async fn put_json(&self, key: &str, value: &Value) -> Result<(), StoreError> {
        let path = self.object_path(key)?;
        let io_err = |source: std::io::Error| StoreError::Io {
            key: key.to_string(),
            source,
        };

        let encoded = serde_json::to_vec(value).map_err(|source| StoreError::Serde {
            key: key.to_string(),
            source,
        })?;
        let envelope = StoredObject {
            digest: digest(&encoded),
            value: value.clone(),
        };
        let bytes = serde_json::to_vec(&envelope).map_err(|source| StoreError::Serde {
            key: key.to_string(),
            source,
        })?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
        }

        // Locked write so concurrent attempts of the same step do not interleave
        tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            let mut file = std::fs::OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(false)
                .open(&path)?;
            file.lock_exclusive()?;
            let mut write = || -> std::io::Result<()> {
                file.set_len(0)?;
                file.write_all(&bytes)?;
                file.flush()
            };
            let result = write();
            if let Err(e) = FileExt::unlock(&file) {
                debug!(error = %e, "Failed to unlock result file, released on close");
            }
            result
        })
        .await
        .map_err(|e| io_err(std::io::Error::new(std::io::ErrorKind::Other, e)))?
        .map_err(io_err)
    }

    async fn get_json(&self, key: &str) -> Result<Value, StoreError> {
        let path = self.object_path(key)?;

        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(key.to_string()))
            }
            Err(source) => {
                return Err(StoreError::Io {
                    key: key.to_string(),
                    source,
                })
            }
        };

        let envelope: StoredObject =
            serde_json::from_slice(&bytes).map_err(|source| StoreError::Serde {
                key: key.to_string(),
                source,
            })?;
        let encoded = serde_json::to_vec(&envelope.value).map_err(|source| StoreError::Serde {
            key: key.to_string(),
            source,
        })?;
        let found = digest(&encoded);
        if found != envelope.digest {
            return Err(StoreError::DigestMismatch {
                key: key.to_string(),
                expected: envelope.digest,
                found,
            });
        }

        Ok(envelope.value)
    }
}

fn digest(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("sha256:{}", hex::encode(hasher.finalize()))
}
