use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use thiserror::Error;

use signoff_core::{
    ApprovalWorkflow, Comment, CommentId, EngineError, InformationRequest, ProjectId, ReportId,
    StatusHistory, TransitionOutcome, TransitionRequest, UserId, WorkflowId,
};

pub mod aggregation;
pub mod workflow;

pub use aggregation::{PendingReview, ReviewerWorkload, WorkflowAggregation};
pub use workflow::SqlWorkflowStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("workflow `{workflow_id}` was modified concurrently")]
    Conflict { workflow_id: String },
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("{entity} `{id}` not found")]
    NotFound { entity: &'static str, id: String },
    #[error("report `{report_id}` already has an active workflow")]
    DuplicateActiveWorkflow { report_id: String },
    #[error("invalid workflow draft: {0}")]
    InvalidDraft(String),
}

/// Input for creating a workflow. Step order is assigned from the vector
/// position, 1-based.
#[derive(Clone, Debug)]
pub struct WorkflowDraft {
    pub report_id: ReportId,
    pub project_id: ProjectId,
    pub created_by: UserId,
    pub required_weight: Option<Decimal>,
    pub steps: Vec<StepDraft>,
}

#[derive(Clone, Debug)]
pub struct StepDraft {
    pub reviewer_id: UserId,
    pub can_skip: bool,
    pub approval_weight: Decimal,
    pub due_date: Option<DateTime<Utc>>,
}

impl StepDraft {
    pub fn reviewer(reviewer_id: UserId) -> Self {
        Self { reviewer_id, can_skip: false, approval_weight: Decimal::ONE, due_date: None }
    }
}

#[derive(Clone, Debug)]
pub struct CommentDraft {
    pub workflow_id: WorkflowId,
    pub parent_id: Option<CommentId>,
    pub author_id: UserId,
    pub content: String,
    pub is_internal: bool,
}

#[derive(Clone, Debug)]
pub struct InformationRequestDraft {
    pub workflow_id: WorkflowId,
    pub from_user_id: UserId,
    pub info: String,
    pub deadline: Option<DateTime<Utc>>,
}

/// Persistence boundary for workflow aggregates. `apply_transition` is the
/// only mutating entry point after creation: it validates through the
/// transition engine and writes the workflow, its steps, and the history
/// row in one transaction guarded by `state_version`.
#[async_trait]
pub trait WorkflowStore: Send + Sync {
    async fn create_workflow(&self, draft: WorkflowDraft) -> Result<ApprovalWorkflow, StoreError>;

    async fn get_by_id(&self, id: &WorkflowId) -> Result<Option<ApprovalWorkflow>, StoreError>;

    /// Active workflow for the report if one exists, otherwise the most
    /// recently updated terminal one.
    async fn get_by_report(
        &self,
        report_id: &ReportId,
    ) -> Result<Option<ApprovalWorkflow>, StoreError>;

    async fn apply_transition(
        &self,
        id: &WorkflowId,
        request: &TransitionRequest,
        actor: &UserId,
    ) -> Result<TransitionOutcome, StoreError>;

    async fn list_history(&self, id: &WorkflowId) -> Result<Vec<StatusHistory>, StoreError>;

    async fn add_comment(&self, draft: CommentDraft) -> Result<Comment, StoreError>;

    async fn list_comments(&self, id: &WorkflowId) -> Result<Vec<Comment>, StoreError>;

    async fn add_information_request(
        &self,
        draft: InformationRequestDraft,
    ) -> Result<InformationRequest, StoreError>;

    async fn list_information_requests(
        &self,
        id: &WorkflowId,
    ) -> Result<Vec<InformationRequest>, StoreError>;
}
