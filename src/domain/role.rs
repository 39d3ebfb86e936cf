//! Caller identity attached to every invocation.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Service id used when an invocation arrives without an explicit identity
pub const DEFAULT_SERVICE_ID: &str = "actionflow-executor";

/// Who is calling an action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    #[serde(rename = "type")]
    pub role_type: RoleType,

    #[serde(default)]
    pub workspace_id: Option<Uuid>,

    #[serde(default)]
    pub user_id: Option<Uuid>,

    pub service_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleType {
    User,
    Service,
}

impl Role {
    /// Baseline service identity
    pub fn service() -> Self {
        Self {
            role_type: RoleType::Service,
            workspace_id: None,
            user_id: None,
            service_id: DEFAULT_SERVICE_ID.to_string(),
        }
    }

    /// A user acting through a service
    pub fn user(user_id: Uuid, service_id: impl Into<String>) -> Self {
        Self {
            role_type: RoleType::User,
            workspace_id: None,
            user_id: Some(user_id),
            service_id: service_id.into(),
        }
    }

    pub fn with_workspace(mut self, workspace_id: Uuid) -> Self {
        self.workspace_id = Some(workspace_id);
        self
    }
}

impl Default for Role {
    fn default() -> Self {
        Self::service()
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.role_type, self.user_id) {
            (RoleType::User, Some(user_id)) => {
                write!(f, "user:{}@{}", user_id, self.service_id)
            }
            _ => write!(f, "service:{}", self.service_id),
        }
    }
}
