use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use signoff_core::engine::weighted::{weighted_approval, WeightedApproval};
use signoff_core::identity::IdentityGateway;
use signoff_core::notify::NotificationHook;
use signoff_core::{
    ApprovalWorkflow, Comment, InformationRequest, InterfaceError, ProjectId, ReportId,
    StatusHistory, TransitionRequest, UserId, WorkflowId, WorkflowStatus,
};
use signoff_db::store::{
    CommentDraft, InformationRequestDraft, PendingReview, ReviewerWorkload, SqlWorkflowStore,
    StoreError, WorkflowAggregation, WorkflowDraft, WorkflowStore,
};

/// Application layer over the store: project-membership authorization,
/// correlation ids, structured logging, and fire-and-forget notification
/// dispatch after a committed transition.
pub struct WorkflowService {
    store: Arc<SqlWorkflowStore>,
    identity: Arc<dyn IdentityGateway>,
    notifier: Option<Arc<dyn NotificationHook>>,
}

fn new_correlation_id() -> String {
    Uuid::new_v4().to_string()
}

fn store_error(error: StoreError, correlation_id: &str) -> InterfaceError {
    let correlation_id = correlation_id.to_string();
    match error {
        StoreError::Engine(engine) => engine.into_interface(correlation_id),
        StoreError::Conflict { .. } | StoreError::DuplicateActiveWorkflow { .. } => {
            InterfaceError::Conflict { message: error.to_string(), correlation_id }
        }
        StoreError::NotFound { .. } => {
            InterfaceError::NotFound { message: error.to_string(), correlation_id }
        }
        StoreError::InvalidDraft(_) => {
            InterfaceError::BadRequest { message: error.to_string(), correlation_id }
        }
        // A database failure is transient; the caller may retry. A decode
        // failure means a corrupt row and retrying will not help.
        StoreError::Database(_) => {
            InterfaceError::ServiceUnavailable { message: error.to_string(), correlation_id }
        }
        StoreError::Decode(_) => {
            InterfaceError::Internal { message: error.to_string(), correlation_id }
        }
    }
}

impl WorkflowService {
    pub fn new(
        store: Arc<SqlWorkflowStore>,
        identity: Arc<dyn IdentityGateway>,
        notifier: Option<Arc<dyn NotificationHook>>,
    ) -> Self {
        Self { store, identity, notifier }
    }

    async fn authorize_member(
        &self,
        project_id: &ProjectId,
        user: &UserId,
        correlation_id: &str,
    ) -> Result<(), InterfaceError> {
        let is_member =
            self.identity.is_project_member(project_id, user).await.map_err(|error| {
                InterfaceError::ServiceUnavailable {
                    message: error.to_string(),
                    correlation_id: correlation_id.to_string(),
                }
            })?;

        if !is_member {
            return Err(InterfaceError::Unauthorized {
                message: format!(
                    "user `{}` is not a member of project `{}`",
                    user.0, project_id.0
                ),
                correlation_id: correlation_id.to_string(),
            });
        }
        Ok(())
    }

    async fn load_authorized(
        &self,
        id: &WorkflowId,
        actor: &UserId,
        correlation_id: &str,
    ) -> Result<ApprovalWorkflow, InterfaceError> {
        let workflow = self
            .store
            .get_by_id(id)
            .await
            .map_err(|error| store_error(error, correlation_id))?
            .ok_or_else(|| InterfaceError::NotFound {
                message: format!("workflow `{}` not found", id.0),
                correlation_id: correlation_id.to_string(),
            })?;
        self.authorize_member(&workflow.project_id, actor, correlation_id).await?;
        Ok(workflow)
    }

    pub async fn create_workflow(
        &self,
        draft: WorkflowDraft,
    ) -> Result<ApprovalWorkflow, InterfaceError> {
        let correlation_id = new_correlation_id();
        self.authorize_member(&draft.project_id, &draft.created_by, &correlation_id).await?;

        let workflow = self
            .store
            .create_workflow(draft)
            .await
            .map_err(|error| store_error(error, &correlation_id))?;

        info!(
            event_name = "workflow.created",
            correlation_id = %correlation_id,
            workflow_id = %workflow.id.0,
            report_id = %workflow.report_id.0,
            steps = workflow.steps.len(),
            "approval workflow created"
        );
        Ok(workflow)
    }

    pub async fn get_workflow(
        &self,
        id: &WorkflowId,
        actor: &UserId,
    ) -> Result<ApprovalWorkflow, InterfaceError> {
        let correlation_id = new_correlation_id();
        self.load_authorized(id, actor, &correlation_id).await
    }

    pub async fn get_by_report(
        &self,
        report_id: &ReportId,
        actor: &UserId,
    ) -> Result<ApprovalWorkflow, InterfaceError> {
        let correlation_id = new_correlation_id();
        let workflow = self
            .store
            .get_by_report(report_id)
            .await
            .map_err(|error| store_error(error, &correlation_id))?
            .ok_or_else(|| InterfaceError::NotFound {
                message: format!("no workflow for report `{}`", report_id.0),
                correlation_id: correlation_id.clone(),
            })?;
        self.authorize_member(&workflow.project_id, actor, &correlation_id).await?;
        Ok(workflow)
    }

    pub async fn transition(
        &self,
        id: &WorkflowId,
        request: &TransitionRequest,
        actor: &UserId,
    ) -> Result<ApprovalWorkflow, InterfaceError> {
        let correlation_id = new_correlation_id();
        let workflow = self.load_authorized(id, actor, &correlation_id).await?;

        let outcome = match self.store.apply_transition(id, request, actor).await {
            Ok(outcome) => outcome,
            Err(error) => {
                let interface = store_error(error, &correlation_id);
                warn!(
                    event_name = "workflow.transition.rejected",
                    correlation_id = %correlation_id,
                    workflow_id = %id.0,
                    operation = request.operation(),
                    error = %interface,
                    "transition rejected"
                );
                return Err(interface);
            }
        };

        info!(
            event_name = "workflow.transition.applied",
            correlation_id = %correlation_id,
            workflow_id = %id.0,
            operation = request.operation(),
            from_status = workflow.status.as_str(),
            to_status = outcome.workflow.status.as_str(),
            "transition applied"
        );

        if let Some(notifier) = &self.notifier {
            let notifier = notifier.clone();
            let event = outcome.event.clone();
            let correlation_id = correlation_id.clone();
            tokio::spawn(async move {
                if let Err(error) = notifier.notify(&event).await {
                    warn!(
                        event_name = "workflow.notify.failed",
                        correlation_id = %correlation_id,
                        workflow_id = %event.workflow_id.0,
                        error = %error,
                        "notification delivery failed"
                    );
                }
            });
        }

        Ok(outcome.workflow)
    }

    pub async fn weighted_approval(
        &self,
        id: &WorkflowId,
        actor: &UserId,
    ) -> Result<WeightedApproval, InterfaceError> {
        let correlation_id = new_correlation_id();
        let workflow = self.load_authorized(id, actor, &correlation_id).await?;
        Ok(weighted_approval(&workflow))
    }

    pub async fn list_history(
        &self,
        id: &WorkflowId,
        actor: &UserId,
    ) -> Result<Vec<StatusHistory>, InterfaceError> {
        let correlation_id = new_correlation_id();
        self.load_authorized(id, actor, &correlation_id).await?;
        self.store.list_history(id).await.map_err(|error| store_error(error, &correlation_id))
    }

    pub async fn add_comment(&self, draft: CommentDraft) -> Result<Comment, InterfaceError> {
        let correlation_id = new_correlation_id();
        let workflow_id = draft.workflow_id.clone();
        let author_id = draft.author_id.clone();
        self.load_authorized(&workflow_id, &author_id, &correlation_id).await?;
        self.store.add_comment(draft).await.map_err(|error| store_error(error, &correlation_id))
    }

    pub async fn list_comments(
        &self,
        id: &WorkflowId,
        actor: &UserId,
    ) -> Result<Vec<Comment>, InterfaceError> {
        let correlation_id = new_correlation_id();
        self.load_authorized(id, actor, &correlation_id).await?;
        self.store.list_comments(id).await.map_err(|error| store_error(error, &correlation_id))
    }

    pub async fn add_information_request(
        &self,
        draft: InformationRequestDraft,
    ) -> Result<InformationRequest, InterfaceError> {
        let correlation_id = new_correlation_id();
        let workflow_id = draft.workflow_id.clone();
        let from_user_id = draft.from_user_id.clone();
        self.load_authorized(&workflow_id, &from_user_id, &correlation_id).await?;
        self.store
            .add_information_request(draft)
            .await
            .map_err(|error| store_error(error, &correlation_id))
    }

    pub async fn list_information_requests(
        &self,
        id: &WorkflowId,
        actor: &UserId,
    ) -> Result<Vec<InformationRequest>, InterfaceError> {
        let correlation_id = new_correlation_id();
        self.load_authorized(id, actor, &correlation_id).await?;
        self.store
            .list_information_requests(id)
            .await
            .map_err(|error| store_error(error, &correlation_id))
    }

    /// Reviewers may only read their own queue.
    pub async fn pending_reviews(
        &self,
        reviewer: &UserId,
        project: Option<&ProjectId>,
        actor: &UserId,
    ) -> Result<Vec<PendingReview>, InterfaceError> {
        let correlation_id = new_correlation_id();
        if reviewer != actor {
            return Err(InterfaceError::Unauthorized {
                message: "a review queue is only visible to its owner".to_string(),
                correlation_id,
            });
        }
        self.store
            .list_pending_for_reviewer(reviewer, project)
            .await
            .map_err(|error| store_error(error, &correlation_id))
    }

    pub async fn submitted_workflows(
        &self,
        user: &UserId,
        project: Option<&ProjectId>,
        status: Option<WorkflowStatus>,
        actor: &UserId,
    ) -> Result<Vec<ApprovalWorkflow>, InterfaceError> {
        let correlation_id = new_correlation_id();
        if user != actor {
            return Err(InterfaceError::Unauthorized {
                message: "submitted workflows are only visible to their author".to_string(),
                correlation_id,
            });
        }
        self.store
            .list_submitted_by_user(user, project, status)
            .await
            .map_err(|error| store_error(error, &correlation_id))
    }

    pub async fn reviewer_workload(
        &self,
        project: Option<&ProjectId>,
        reviewer: Option<&UserId>,
    ) -> Result<Vec<ReviewerWorkload>, InterfaceError> {
        let correlation_id = new_correlation_id();
        self.store
            .reviewer_workload(project, reviewer)
            .await
            .map_err(|error| store_error(error, &correlation_id))
    }
}
