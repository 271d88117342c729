use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::workflow::{UserId, WorkflowId, WorkflowStatus};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StatusHistoryId(pub String);

/// Append-only audit row. Never mutated or deleted; the sole source of
/// truth for what happened to a workflow and when.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusHistory {
    pub id: StatusHistoryId,
    pub workflow_id: WorkflowId,
    pub status: WorkflowStatus,
    pub previous_status: Option<WorkflowStatus>,
    pub changed_by: UserId,
    pub reason: Option<String>,
    pub assigned_to: Option<UserId>,
    pub created_at: DateTime<Utc>,
}
