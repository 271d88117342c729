use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::step::ApprovalStep;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkflowId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReportId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProjectId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Pending,
    InReview,
    Approved,
    Rejected,
    ChangesRequested,
    Cancelled,
    Escalated,
}

impl WorkflowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InReview => "in_review",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::ChangesRequested => "changes_requested",
            Self::Cancelled => "cancelled",
            Self::Escalated => "escalated",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "in_review" => Some(Self::InReview),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            "changes_requested" => Some(Self::ChangesRequested),
            "cancelled" => Some(Self::Cancelled),
            "escalated" => Some(Self::Escalated),
            _ => None,
        }
    }

    /// Terminal statuses admit no further transitions except a resubmit
    /// out of `Rejected`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Approved | Self::Rejected | Self::Cancelled)
    }
}

/// One approval lifecycle instance attached to one submitted report.
///
/// The "current step" is always derived from `steps` (earliest incomplete
/// by `step_order`); it is never stored, so it cannot drift.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ApprovalWorkflow {
    pub id: WorkflowId,
    pub report_id: ReportId,
    pub project_id: ProjectId,
    pub status: WorkflowStatus,
    /// Quorum threshold for weighted approval. `None` means unanimous:
    /// the required weight equals the total non-skipped weight.
    pub required_weight: Option<Decimal>,
    pub steps: Vec<ApprovalStep>,
    pub created_by: UserId,
    pub state_version: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ApprovalWorkflow {
    /// Earliest incomplete step, if any.
    pub fn current_step(&self) -> Option<&ApprovalStep> {
        self.steps.iter().filter(|step| !step.is_completed).min_by_key(|step| step.step_order)
    }

    pub fn step_by_id(&self, step_id: &crate::domain::step::StepId) -> Option<&ApprovalStep> {
        self.steps.iter().find(|step| &step.id == step_id)
    }

    pub fn is_active(&self) -> bool {
        !self.status.is_terminal()
    }
}
