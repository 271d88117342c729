//! JSON API for the approval workflow engine.
//!
//! - `POST /api/v1/workflows`                                - create a workflow
//! - `GET  /api/v1/workflows/{id}`                           - fetch a workflow
//! - `GET  /api/v1/reports/{report_id}/workflow`             - fetch by report
//! - `POST /api/v1/workflows/{id}/review`                    - approve/reject/request changes/skip
//! - `POST /api/v1/workflows/{id}/delegate`                  - delegate a step
//! - `POST /api/v1/workflows/{id}/escalate`                  - escalate the current step
//! - `POST /api/v1/workflows/{id}/return`                    - return to an earlier step
//! - `POST /api/v1/workflows/{id}/resubmit`                  - resubmit after rejection/changes
//! - `POST /api/v1/workflows/{id}/cancel`                    - cancel an active workflow
//! - `POST /api/v1/workflows/{id}/due-date`                  - set a step due date
//! - `GET  /api/v1/workflows/{id}/history`                   - status history
//! - `GET  /api/v1/workflows/{id}/weighted-approval`         - weighted quorum snapshot
//! - `POST /api/v1/workflows/{id}/comments` / `GET` same     - comment thread
//! - `POST /api/v1/workflows/{id}/information-requests` / `GET` same
//! - `GET  /api/v1/reviewers/{user_id}/pending`              - reviewer queue
//! - `GET  /api/v1/users/{user_id}/submitted`                - author's workflows
//! - `GET  /api/v1/workload`                                 - open steps per reviewer
//!
//! The caller identity arrives in the `x-user-id` header; a directory
//! service in front of this API is expected to have authenticated it.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use signoff_core::{
    ApprovalStep, ApprovalWorkflow, CommentId, InterfaceError, ProjectId, ReportId, ReviewAction,
    StepId, TransitionRequest, UserId, WorkflowId, WorkflowStatus,
};
use signoff_db::store::{CommentDraft, InformationRequestDraft, StepDraft, WorkflowDraft};

use crate::service::WorkflowService;

#[derive(Clone)]
pub struct ApiState {
    service: Arc<WorkflowService>,
}

pub fn router(service: Arc<WorkflowService>) -> Router {
    Router::new()
        .route("/api/v1/workflows", post(create_workflow))
        .route("/api/v1/workflows/{id}", get(get_workflow))
        .route("/api/v1/reports/{report_id}/workflow", get(get_by_report))
        .route("/api/v1/workflows/{id}/review", post(review))
        .route("/api/v1/workflows/{id}/delegate", post(delegate))
        .route("/api/v1/workflows/{id}/escalate", post(escalate))
        .route("/api/v1/workflows/{id}/return", post(return_to_step))
        .route("/api/v1/workflows/{id}/resubmit", post(resubmit))
        .route("/api/v1/workflows/{id}/cancel", post(cancel))
        .route("/api/v1/workflows/{id}/due-date", post(set_due_date))
        .route("/api/v1/workflows/{id}/history", get(list_history))
        .route("/api/v1/workflows/{id}/weighted-approval", get(weighted))
        .route("/api/v1/workflows/{id}/comments", post(add_comment).get(list_comments))
        .route(
            "/api/v1/workflows/{id}/information-requests",
            post(add_information_request).get(list_information_requests),
        )
        .route("/api/v1/reviewers/{user_id}/pending", get(pending_reviews))
        .route("/api/v1/users/{user_id}/submitted", get(submitted))
        .route("/api/v1/workload", get(workload))
        .with_state(ApiState { service })
}

// ---------------------------------------------------------------------------
// Request / Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct CreateWorkflowRequest {
    pub report_id: String,
    pub project_id: String,
    pub required_weight: Option<Decimal>,
    pub steps: Vec<StepRequest>,
}

#[derive(Debug, Deserialize)]
pub struct StepRequest {
    pub reviewer_id: String,
    #[serde(default)]
    pub can_skip: bool,
    pub approval_weight: Option<Decimal>,
    pub due_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct ReviewBody {
    pub action: ReviewAction,
    pub note: Option<String>,
    pub step_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DelegateBody {
    pub step_id: String,
    pub to_user: String,
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct EscalateBody {
    pub to_user: Option<String>,
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct ReturnBody {
    pub target_step_id: String,
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct CancelBody {
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct DueDateBody {
    pub step_id: String,
    pub due_date: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct CommentBody {
    pub parent_id: Option<String>,
    pub content: String,
    #[serde(default)]
    pub is_internal: bool,
}

#[derive(Debug, Deserialize)]
pub struct InformationRequestBody {
    pub info: String,
    pub deadline: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct ProjectQuery {
    pub project_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SubmittedQuery {
    pub project_id: Option<String>,
    pub status: Option<WorkflowStatus>,
}

#[derive(Debug, Deserialize)]
pub struct WorkloadQuery {
    pub project_id: Option<String>,
    pub reviewer_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PendingReviewResponse {
    pub workflow: ApprovalWorkflow,
    pub step: ApprovalStep,
}

#[derive(Debug, Serialize)]
pub struct WorkloadResponse {
    pub reviewer_id: String,
    pub pending_steps: u32,
    pub overdue_steps: u32,
    pub completed_steps: u32,
    pub avg_completion_secs: Option<f64>,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub detail: String,
    pub correlation_id: String,
}

pub struct ApiError(InterfaceError);

impl From<InterfaceError> for ApiError {
    fn from(error: InterfaceError) -> Self {
        Self(error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            InterfaceError::Unauthorized { .. } => StatusCode::FORBIDDEN,
            InterfaceError::Conflict { .. } => StatusCode::CONFLICT,
            InterfaceError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            InterfaceError::NotFound { .. } => StatusCode::NOT_FOUND,
            InterfaceError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            InterfaceError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = ErrorBody {
            error: self.0.user_message().to_string(),
            detail: self.0.to_string(),
            correlation_id: self.0.correlation_id().to_string(),
        };
        (status, Json(body)).into_response()
    }
}

fn actor(headers: &HeaderMap) -> Result<UserId, ApiError> {
    headers
        .get("x-user-id")
        .and_then(|value| value.to_str().ok())
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
        .map(|value| UserId(value.to_string()))
        .ok_or_else(|| {
            ApiError(InterfaceError::BadRequest {
                message: "missing `x-user-id` header".to_string(),
                correlation_id: "request".to_string(),
            })
        })
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn create_workflow(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(body): Json<CreateWorkflowRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let actor = actor(&headers)?;

    let draft = WorkflowDraft {
        report_id: ReportId(body.report_id),
        project_id: ProjectId(body.project_id),
        created_by: actor,
        required_weight: body.required_weight,
        steps: body
            .steps
            .into_iter()
            .map(|step| StepDraft {
                reviewer_id: UserId(step.reviewer_id),
                can_skip: step.can_skip,
                approval_weight: step.approval_weight.unwrap_or(Decimal::ONE),
                due_date: step.due_date,
            })
            .collect(),
    };

    let workflow = state.service.create_workflow(draft).await?;
    Ok((StatusCode::CREATED, Json(workflow)))
}

async fn get_workflow(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<ApprovalWorkflow>, ApiError> {
    let actor = actor(&headers)?;
    let workflow = state.service.get_workflow(&WorkflowId(id), &actor).await?;
    Ok(Json(workflow))
}

async fn get_by_report(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(report_id): Path<String>,
) -> Result<Json<ApprovalWorkflow>, ApiError> {
    let actor = actor(&headers)?;
    let workflow = state.service.get_by_report(&ReportId(report_id), &actor).await?;
    Ok(Json(workflow))
}

async fn apply(
    state: &ApiState,
    id: String,
    request: TransitionRequest,
    actor: UserId,
) -> Result<Json<ApprovalWorkflow>, ApiError> {
    let workflow = state.service.transition(&WorkflowId(id), &request, &actor).await?;
    Ok(Json(workflow))
}

async fn review(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<ReviewBody>,
) -> Result<Json<ApprovalWorkflow>, ApiError> {
    let actor = actor(&headers)?;
    let request = TransitionRequest::Review {
        action: body.action,
        note: body.note,
        step_id: body.step_id.map(StepId),
    };
    apply(&state, id, request, actor).await
}

async fn delegate(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<DelegateBody>,
) -> Result<Json<ApprovalWorkflow>, ApiError> {
    let actor = actor(&headers)?;
    let request = TransitionRequest::Delegate {
        step_id: StepId(body.step_id),
        to_user: UserId(body.to_user),
        reason: body.reason,
    };
    apply(&state, id, request, actor).await
}

async fn escalate(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<EscalateBody>,
) -> Result<Json<ApprovalWorkflow>, ApiError> {
    let actor = actor(&headers)?;
    let request =
        TransitionRequest::Escalate { to_user: body.to_user.map(UserId), reason: body.reason };
    apply(&state, id, request, actor).await
}

async fn return_to_step(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<ReturnBody>,
) -> Result<Json<ApprovalWorkflow>, ApiError> {
    let actor = actor(&headers)?;
    let request = TransitionRequest::ReturnToStep {
        target_step_id: StepId(body.target_step_id),
        reason: body.reason,
    };
    apply(&state, id, request, actor).await
}

async fn resubmit(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<ApprovalWorkflow>, ApiError> {
    let actor = actor(&headers)?;
    apply(&state, id, TransitionRequest::Resubmit, actor).await
}

async fn cancel(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<CancelBody>,
) -> Result<Json<ApprovalWorkflow>, ApiError> {
    let actor = actor(&headers)?;
    apply(&state, id, TransitionRequest::Cancel { reason: body.reason }, actor).await
}

async fn set_due_date(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<DueDateBody>,
) -> Result<Json<ApprovalWorkflow>, ApiError> {
    let actor = actor(&headers)?;
    let request =
        TransitionRequest::SetDueDate { step_id: StepId(body.step_id), due_date: body.due_date };
    apply(&state, id, request, actor).await
}

async fn list_history(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let actor = actor(&headers)?;
    let history = state.service.list_history(&WorkflowId(id), &actor).await?;
    Ok(Json(history))
}

async fn weighted(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let actor = actor(&headers)?;
    let snapshot = state.service.weighted_approval(&WorkflowId(id), &actor).await?;
    Ok(Json(snapshot))
}

async fn add_comment(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<CommentBody>,
) -> Result<impl IntoResponse, ApiError> {
    let actor = actor(&headers)?;
    let comment = state
        .service
        .add_comment(CommentDraft {
            workflow_id: WorkflowId(id),
            parent_id: body.parent_id.map(CommentId),
            author_id: actor,
            content: body.content,
            is_internal: body.is_internal,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(comment)))
}

async fn list_comments(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let actor = actor(&headers)?;
    let comments = state.service.list_comments(&WorkflowId(id), &actor).await?;
    Ok(Json(comments))
}

async fn add_information_request(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<InformationRequestBody>,
) -> Result<impl IntoResponse, ApiError> {
    let actor = actor(&headers)?;
    let request = state
        .service
        .add_information_request(InformationRequestDraft {
            workflow_id: WorkflowId(id),
            from_user_id: actor,
            info: body.info,
            deadline: body.deadline,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(request)))
}

async fn list_information_requests(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let actor = actor(&headers)?;
    let requests = state.service.list_information_requests(&WorkflowId(id), &actor).await?;
    Ok(Json(requests))
}

async fn pending_reviews(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(user_id): Path<String>,
    Query(query): Query<ProjectQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let actor = actor(&headers)?;
    let project = query.project_id.map(ProjectId);
    let pending =
        state.service.pending_reviews(&UserId(user_id), project.as_ref(), &actor).await?;
    let response: Vec<PendingReviewResponse> = pending
        .into_iter()
        .map(|item| PendingReviewResponse { workflow: item.workflow, step: item.step })
        .collect();
    Ok(Json(response))
}

async fn submitted(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(user_id): Path<String>,
    Query(query): Query<SubmittedQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let actor = actor(&headers)?;
    let project = query.project_id.map(ProjectId);
    let workflows = state
        .service
        .submitted_workflows(&UserId(user_id), project.as_ref(), query.status, &actor)
        .await?;
    Ok(Json(workflows))
}

async fn workload(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Query(query): Query<WorkloadQuery>,
) -> Result<impl IntoResponse, ApiError> {
    actor(&headers)?;
    let project = query.project_id.map(ProjectId);
    let reviewer = query.reviewer_id.map(UserId);
    let workload = state.service.reviewer_workload(project.as_ref(), reviewer.as_ref()).await?;
    let response: Vec<WorkloadResponse> = workload
        .into_iter()
        .map(|entry| WorkloadResponse {
            reviewer_id: entry.reviewer_id.0,
            pending_steps: entry.pending_steps,
            overdue_steps: entry.overdue_steps,
            completed_steps: entry.completed_steps,
            avg_completion_secs: entry.avg_completion_secs,
        })
        .collect();
    Ok(Json(response))
}
