use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::workflow::{UserId, WorkflowId};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StepId(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepAction {
    Approve,
    Reject,
    RequestChanges,
    Skip,
}

impl StepAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approve => "approve",
            Self::Reject => "reject",
            Self::RequestChanges => "request_changes",
            Self::Skip => "skip",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "approve" => Some(Self::Approve),
            "reject" => Some(Self::Reject),
            "request_changes" => Some(Self::RequestChanges),
            "skip" => Some(Self::Skip),
            _ => None,
        }
    }
}

/// One ordered review assignment within a workflow.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ApprovalStep {
    pub id: StepId,
    pub workflow_id: WorkflowId,
    /// 1-based, unique within the workflow. Completion must form a prefix
    /// of the order sequence unless a return-to-step reopened a suffix.
    pub step_order: u32,
    pub reviewer_id: UserId,
    pub delegated_to: Option<UserId>,
    pub is_completed: bool,
    pub action: Option<StepAction>,
    pub comment: Option<String>,
    pub reasoning: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
    pub due_date: Option<DateTime<Utc>>,
    pub can_skip: bool,
    pub escalation_level: u32,
    pub approval_weight: Decimal,
    pub created_at: DateTime<Utc>,
}

impl ApprovalStep {
    /// The principal currently authorized to act on this step: the
    /// delegate when one is set, otherwise the original assignee.
    pub fn effective_reviewer(&self) -> &UserId {
        self.delegated_to.as_ref().unwrap_or(&self.reviewer_id)
    }

    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        !self.is_completed && self.due_date.map(|due| due < now).unwrap_or(false)
    }
}
