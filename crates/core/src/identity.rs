use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::workflow::{ProjectId, UserId};

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("identity provider unavailable: {0}")]
    Unavailable(String),
    #[error("unknown user `{0}`")]
    UnknownUser(String),
}

/// Resolved caller identity. Roles are provider-defined labels and are
/// opaque to the workflow engine.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub user_id: UserId,
    pub roles: Vec<String>,
}

/// Boundary to whatever directory service owns users and project rosters.
#[async_trait]
pub trait IdentityGateway: Send + Sync {
    async fn resolve_principal(&self, user_id: &UserId) -> Result<Principal, IdentityError>;

    async fn is_project_member(
        &self,
        project_id: &ProjectId,
        user_id: &UserId,
    ) -> Result<bool, IdentityError>;
}

/// Gateway backed by explicit rosters, for tests and local runs. With no
/// rosters registered it resolves every user and treats every project as
/// open membership.
#[derive(Clone, Default)]
pub struct InMemoryIdentityGateway {
    memberships: Arc<Mutex<HashMap<ProjectId, HashSet<UserId>>>>,
}

impl InMemoryIdentityGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_member(&self, project_id: ProjectId, user_id: UserId) {
        if let Ok(mut memberships) = self.memberships.lock() {
            memberships.entry(project_id).or_default().insert(user_id);
        }
    }
}

#[async_trait]
impl IdentityGateway for InMemoryIdentityGateway {
    async fn resolve_principal(&self, user_id: &UserId) -> Result<Principal, IdentityError> {
        Ok(Principal { user_id: user_id.clone(), roles: Vec::new() })
    }

    async fn is_project_member(
        &self,
        project_id: &ProjectId,
        user_id: &UserId,
    ) -> Result<bool, IdentityError> {
        let memberships = self
            .memberships
            .lock()
            .map_err(|_| IdentityError::Unavailable("roster lock poisoned".to_string()))?;
        match memberships.get(project_id) {
            Some(roster) => Ok(roster.contains(user_id)),
            None => Ok(true),
        }
    }
}
