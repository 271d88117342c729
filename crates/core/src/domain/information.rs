use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::workflow::{UserId, WorkflowId};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InformationRequestId(pub String);

/// Communication side-channel record. Appending one never changes
/// workflow status.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InformationRequest {
    pub id: InformationRequestId,
    pub workflow_id: WorkflowId,
    pub from_user_id: UserId,
    pub info: String,
    pub deadline: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}
