pub mod weighted;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::step::{ApprovalStep, StepAction, StepId};
use crate::domain::workflow::{ApprovalWorkflow, UserId, WorkflowStatus};
use crate::errors::EngineError;
use crate::notify::NotificationEvent;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewAction {
    Approve,
    Reject,
    RequestChanges,
    Skip,
}

impl ReviewAction {
    fn as_step_action(self) -> StepAction {
        match self {
            Self::Approve => StepAction::Approve,
            Self::Reject => StepAction::Reject,
            Self::RequestChanges => StepAction::RequestChanges,
            Self::Skip => StepAction::Skip,
        }
    }
}

/// Closed union of every mutating transition. Each variant carries only
/// the fields its precondition needs; there is no partially-filled
/// request shape.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransitionRequest {
    Review {
        action: ReviewAction,
        note: Option<String>,
        /// When set, the review must target exactly this step. A completed
        /// target is reported as `AlreadyCompleted`, which is the guard
        /// against two racing reviews of the same step.
        step_id: Option<StepId>,
    },
    Delegate {
        step_id: StepId,
        to_user: UserId,
        reason: String,
    },
    Escalate {
        to_user: Option<UserId>,
        reason: String,
    },
    SetDueDate {
        step_id: StepId,
        due_date: DateTime<Utc>,
    },
    ReturnToStep {
        target_step_id: StepId,
        reason: String,
    },
    Resubmit,
    Cancel {
        reason: String,
    },
}

impl TransitionRequest {
    pub fn operation(&self) -> &'static str {
        match self {
            Self::Review { .. } => "review",
            Self::Delegate { .. } => "delegate",
            Self::Escalate { .. } => "escalate",
            Self::SetDueDate { .. } => "set_due_date",
            Self::ReturnToStep { .. } => "return_to_step",
            Self::Resubmit => "resubmit",
            Self::Cancel { .. } => "cancel",
        }
    }
}

/// Draft of the history row the store must append atomically with the
/// state change.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryDraft {
    pub status: WorkflowStatus,
    pub previous_status: WorkflowStatus,
    pub reason: Option<String>,
    pub assigned_to: Option<UserId>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TransitionOutcome {
    pub workflow: ApprovalWorkflow,
    pub history: HistoryDraft,
    pub event: NotificationEvent,
}

/// Statuses from which reviewers can still act on steps. `Escalated` is a
/// side flag of an otherwise in-review workflow; `ChangesRequested` waits
/// on a resubmission, not a reviewer.
fn is_reviewable(status: WorkflowStatus) -> bool {
    matches!(
        status,
        WorkflowStatus::Pending | WorkflowStatus::InReview | WorkflowStatus::Escalated
    )
}

fn require_reason(operation: &'static str, reason: &str) -> Result<(), EngineError> {
    if reason.trim().is_empty() {
        return Err(EngineError::ValidationFailed {
            message: format!("`{operation}` requires a non-empty reason"),
        });
    }
    Ok(())
}

/// Validate and apply one transition against the current aggregate.
///
/// Pure: the input workflow is never mutated, and a returned error means
/// no state change at all. `state_version` is left for the store to bump
/// inside its atomic write.
pub fn apply(
    workflow: &ApprovalWorkflow,
    request: &TransitionRequest,
    actor: &UserId,
    now: DateTime<Utc>,
) -> Result<TransitionOutcome, EngineError> {
    match request {
        TransitionRequest::Review { action, note, step_id } => {
            apply_review(workflow, *action, note.as_deref(), step_id.as_ref(), actor, now)
        }
        TransitionRequest::Delegate { step_id, to_user, reason } => {
            apply_delegate(workflow, step_id, to_user, reason, actor, now)
        }
        TransitionRequest::Escalate { to_user, reason } => {
            apply_escalate(workflow, to_user.as_ref(), reason, actor, now)
        }
        TransitionRequest::SetDueDate { step_id, due_date } => {
            apply_set_due_date(workflow, step_id, *due_date, actor, now)
        }
        TransitionRequest::ReturnToStep { target_step_id, reason } => {
            apply_return_to_step(workflow, target_step_id, reason, actor, now)
        }
        TransitionRequest::Resubmit => apply_resubmit(workflow, actor, now),
        TransitionRequest::Cancel { reason } => apply_cancel(workflow, reason, actor, now),
    }
}

fn current_step_checked<'a>(
    workflow: &'a ApprovalWorkflow,
    operation: &'static str,
) -> Result<&'a ApprovalStep, EngineError> {
    workflow.current_step().ok_or_else(|| EngineError::InvalidTransition {
        status: workflow.status,
        operation,
        detail: "workflow has no incomplete step".to_string(),
    })
}

fn authorize_effective_reviewer(step: &ApprovalStep, actor: &UserId) -> Result<(), EngineError> {
    if step.effective_reviewer() != actor {
        return Err(EngineError::Unauthorized {
            actor: actor.0.clone(),
            step_order: step.step_order,
        });
    }
    Ok(())
}

fn apply_review(
    workflow: &ApprovalWorkflow,
    action: ReviewAction,
    note: Option<&str>,
    step_id: Option<&StepId>,
    actor: &UserId,
    now: DateTime<Utc>,
) -> Result<TransitionOutcome, EngineError> {
    if !is_reviewable(workflow.status) {
        return Err(EngineError::InvalidTransition {
            status: workflow.status,
            operation: "review",
            detail: "workflow does not accept reviews in this status".to_string(),
        });
    }

    let current = current_step_checked(workflow, "review")?;

    if let Some(step_id) = step_id {
        let target = workflow.step_by_id(step_id).ok_or_else(|| EngineError::NotFound {
            entity: "step",
            id: step_id.0.clone(),
        })?;
        if target.is_completed {
            return Err(EngineError::AlreadyCompleted { step_order: target.step_order });
        }
        if target.id != current.id {
            return Err(EngineError::InvalidTransition {
                status: workflow.status,
                operation: "review",
                detail: format!(
                    "step {} is not the current step ({} is)",
                    target.step_order, current.step_order
                ),
            });
        }
    }

    authorize_effective_reviewer(current, actor)?;

    if action == ReviewAction::RequestChanges && note.map(str::trim).unwrap_or("").is_empty() {
        return Err(EngineError::ValidationFailed {
            message: "`request_changes` requires a non-empty note".to_string(),
        });
    }
    if action == ReviewAction::Skip && !current.can_skip {
        return Err(EngineError::InvalidTransition {
            status: workflow.status,
            operation: "review",
            detail: format!("step {} cannot be skipped", current.step_order),
        });
    }

    let previous_status = workflow.status;
    let current_order = current.step_order;
    let mut updated = workflow.clone();

    for step in &mut updated.steps {
        if step.step_order == current_order {
            step.is_completed = true;
            step.action = Some(action.as_step_action());
            step.completed_at = Some(now);
            if let Some(note) = note {
                step.comment = Some(note.to_string());
            }
        }
    }

    updated.status = match action {
        ReviewAction::Reject => WorkflowStatus::Rejected,
        ReviewAction::RequestChanges => WorkflowStatus::ChangesRequested,
        ReviewAction::Approve | ReviewAction::Skip => {
            let all_done = updated.current_step().is_none();
            let quorum_met = action == ReviewAction::Approve
                && updated.required_weight.is_some()
                && weighted::weighted_approval(&updated).is_approved;
            if all_done || quorum_met {
                WorkflowStatus::Approved
            } else {
                WorkflowStatus::InReview
            }
        }
    };
    updated.updated_at = now;

    let assigned_to = if updated.status.is_terminal() {
        None
    } else {
        updated.current_step().map(|step| step.effective_reviewer().clone())
    };

    let history = HistoryDraft {
        status: updated.status,
        previous_status,
        reason: note.map(str::to_string),
        assigned_to: assigned_to.clone(),
    };
    let event = NotificationEvent::status_changed(&updated, previous_status, actor, assigned_to);

    Ok(TransitionOutcome { workflow: updated, history, event })
}

fn apply_delegate(
    workflow: &ApprovalWorkflow,
    step_id: &StepId,
    to_user: &UserId,
    reason: &str,
    actor: &UserId,
    now: DateTime<Utc>,
) -> Result<TransitionOutcome, EngineError> {
    if !workflow.is_active() {
        return Err(EngineError::InvalidTransition {
            status: workflow.status,
            operation: "delegate",
            detail: "workflow is terminal".to_string(),
        });
    }

    let step = workflow.step_by_id(step_id).ok_or_else(|| EngineError::NotFound {
        entity: "step",
        id: step_id.0.clone(),
    })?;
    if step.is_completed {
        return Err(EngineError::AlreadyCompleted { step_order: step.step_order });
    }
    authorize_effective_reviewer(step, actor)?;
    require_reason("delegate", reason)?;

    let step_order = step.step_order;
    let mut updated = workflow.clone();
    for step in &mut updated.steps {
        if step.step_order == step_order {
            step.delegated_to = Some(to_user.clone());
        }
    }
    updated.updated_at = now;

    let history = HistoryDraft {
        status: updated.status,
        previous_status: workflow.status,
        reason: Some(reason.to_string()),
        assigned_to: Some(to_user.clone()),
    };
    let event =
        NotificationEvent::status_changed(&updated, workflow.status, actor, Some(to_user.clone()));

    Ok(TransitionOutcome { workflow: updated, history, event })
}

fn apply_escalate(
    workflow: &ApprovalWorkflow,
    to_user: Option<&UserId>,
    reason: &str,
    actor: &UserId,
    now: DateTime<Utc>,
) -> Result<TransitionOutcome, EngineError> {
    if !is_reviewable(workflow.status) {
        return Err(EngineError::InvalidTransition {
            status: workflow.status,
            operation: "escalate",
            detail: "only pending or in-review workflows can be escalated".to_string(),
        });
    }
    require_reason("escalate", reason)?;

    let current_order = current_step_checked(workflow, "escalate")?.step_order;

    let previous_status = workflow.status;
    let mut updated = workflow.clone();
    for step in &mut updated.steps {
        if step.step_order == current_order {
            step.escalation_level += 1;
            if let Some(to_user) = to_user {
                step.delegated_to = Some(to_user.clone());
            }
        }
    }
    updated.status = WorkflowStatus::Escalated;
    updated.updated_at = now;

    let assigned_to = updated.current_step().map(|step| step.effective_reviewer().clone());
    let history = HistoryDraft {
        status: updated.status,
        previous_status,
        reason: Some(reason.to_string()),
        assigned_to: assigned_to.clone(),
    };
    let event = NotificationEvent::status_changed(&updated, previous_status, actor, assigned_to);

    Ok(TransitionOutcome { workflow: updated, history, event })
}

fn apply_set_due_date(
    workflow: &ApprovalWorkflow,
    step_id: &StepId,
    due_date: DateTime<Utc>,
    actor: &UserId,
    now: DateTime<Utc>,
) -> Result<TransitionOutcome, EngineError> {
    if !workflow.is_active() {
        return Err(EngineError::InvalidTransition {
            status: workflow.status,
            operation: "set_due_date",
            detail: "workflow is terminal".to_string(),
        });
    }

    let step = workflow.step_by_id(step_id).ok_or_else(|| EngineError::NotFound {
        entity: "step",
        id: step_id.0.clone(),
    })?;
    if step.is_completed {
        return Err(EngineError::AlreadyCompleted { step_order: step.step_order });
    }

    let step_order = step.step_order;
    let mut updated = workflow.clone();
    for step in &mut updated.steps {
        if step.step_order == step_order {
            step.due_date = Some(due_date);
        }
    }
    updated.updated_at = now;

    let history = HistoryDraft {
        status: updated.status,
        previous_status: workflow.status,
        reason: Some(format!("due date set to {}", due_date.to_rfc3339())),
        assigned_to: None,
    };
    let event = NotificationEvent::status_changed(&updated, workflow.status, actor, None);

    Ok(TransitionOutcome { workflow: updated, history, event })
}

fn apply_return_to_step(
    workflow: &ApprovalWorkflow,
    target_step_id: &StepId,
    reason: &str,
    actor: &UserId,
    now: DateTime<Utc>,
) -> Result<TransitionOutcome, EngineError> {
    if !is_reviewable(workflow.status) {
        return Err(EngineError::InvalidTransition {
            status: workflow.status,
            operation: "return_to_step",
            detail: "workflow does not accept reviews in this status".to_string(),
        });
    }

    let current = current_step_checked(workflow, "return_to_step")?;
    authorize_effective_reviewer(current, actor)?;
    require_reason("return_to_step", reason)?;

    let target = workflow.step_by_id(target_step_id).ok_or_else(|| EngineError::NotFound {
        entity: "step",
        id: target_step_id.0.clone(),
    })?;
    if target.step_order >= current.step_order {
        return Err(EngineError::InvalidTransition {
            status: workflow.status,
            operation: "return_to_step",
            detail: format!(
                "target step {} is not earlier than current step {}",
                target.step_order, current.step_order
            ),
        });
    }

    let previous_status = workflow.status;
    let target_order = target.step_order;
    let mut updated = workflow.clone();
    for step in &mut updated.steps {
        if step.step_order >= target_order {
            step.is_completed = false;
            step.action = None;
            step.completed_at = None;
        }
    }
    updated.status = WorkflowStatus::InReview;
    updated.updated_at = now;

    let assigned_to = updated.current_step().map(|step| step.effective_reviewer().clone());
    let history = HistoryDraft {
        status: updated.status,
        previous_status,
        reason: Some(reason.to_string()),
        assigned_to: assigned_to.clone(),
    };
    let event = NotificationEvent::status_changed(&updated, previous_status, actor, assigned_to);

    Ok(TransitionOutcome { workflow: updated, history, event })
}

fn apply_resubmit(
    workflow: &ApprovalWorkflow,
    actor: &UserId,
    now: DateTime<Utc>,
) -> Result<TransitionOutcome, EngineError> {
    if !matches!(workflow.status, WorkflowStatus::Rejected | WorkflowStatus::ChangesRequested) {
        return Err(EngineError::InvalidTransition {
            status: workflow.status,
            operation: "resubmit",
            detail: "only rejected or changes-requested workflows can be resubmitted".to_string(),
        });
    }

    let previous_status = workflow.status;
    let mut updated = workflow.clone();
    for step in &mut updated.steps {
        step.is_completed = false;
        step.action = None;
        step.completed_at = None;
    }
    updated.status = WorkflowStatus::Pending;
    updated.updated_at = now;

    let assigned_to = updated.current_step().map(|step| step.effective_reviewer().clone());
    let history = HistoryDraft {
        status: updated.status,
        previous_status,
        reason: None,
        assigned_to: assigned_to.clone(),
    };
    let event = NotificationEvent::status_changed(&updated, previous_status, actor, assigned_to);

    Ok(TransitionOutcome { workflow: updated, history, event })
}

fn apply_cancel(
    workflow: &ApprovalWorkflow,
    reason: &str,
    actor: &UserId,
    now: DateTime<Utc>,
) -> Result<TransitionOutcome, EngineError> {
    if !is_reviewable(workflow.status) {
        return Err(EngineError::InvalidTransition {
            status: workflow.status,
            operation: "cancel",
            detail: "only pending or in-review workflows can be cancelled".to_string(),
        });
    }
    require_reason("cancel", reason)?;

    let previous_status = workflow.status;
    let mut updated = workflow.clone();
    updated.status = WorkflowStatus::Cancelled;
    updated.updated_at = now;

    let history = HistoryDraft {
        status: updated.status,
        previous_status,
        reason: Some(reason.to_string()),
        assigned_to: None,
    };
    let event = NotificationEvent::status_changed(&updated, previous_status, actor, None);

    Ok(TransitionOutcome { workflow: updated, history, event })
}
