use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::workflow::{UserId, WorkflowId};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CommentId(pub String);

/// Thread entry on a workflow. Replies nest one level via `parent_id`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    pub id: CommentId,
    pub workflow_id: WorkflowId,
    pub parent_id: Option<CommentId>,
    pub author_id: UserId,
    pub content: String,
    pub is_internal: bool,
    pub created_at: DateTime<Utc>,
}
