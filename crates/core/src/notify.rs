use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::workflow::{
    ApprovalWorkflow, ProjectId, ReportId, UserId, WorkflowId, WorkflowStatus,
};

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notification delivery failed: {0}")]
    Delivery(String),
}

/// One outbound notification. Built by the transition engine and handed
/// to the hook after the transaction commits; delivery failures never
/// roll back the workflow write.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationEvent {
    pub event_type: String,
    pub workflow_id: WorkflowId,
    pub report_id: ReportId,
    pub project_id: ProjectId,
    pub status: WorkflowStatus,
    pub previous_status: WorkflowStatus,
    pub actor: UserId,
    pub assigned_to: Option<UserId>,
    pub occurred_at: DateTime<Utc>,
}

impl NotificationEvent {
    pub fn status_changed(
        workflow: &ApprovalWorkflow,
        previous_status: WorkflowStatus,
        actor: &UserId,
        assigned_to: Option<UserId>,
    ) -> Self {
        let event_type = if workflow.status == previous_status {
            "workflow.updated".to_string()
        } else {
            format!("workflow.{}", workflow.status.as_str())
        };
        Self {
            event_type,
            workflow_id: workflow.id.clone(),
            report_id: workflow.report_id.clone(),
            project_id: workflow.project_id.clone(),
            status: workflow.status,
            previous_status,
            actor: actor.clone(),
            assigned_to,
            occurred_at: workflow.updated_at,
        }
    }
}

#[async_trait]
pub trait NotificationHook: Send + Sync {
    async fn notify(&self, event: &NotificationEvent) -> Result<(), NotifyError>;
}

/// Collecting hook for tests and local runs.
#[derive(Clone, Default)]
pub struct InMemoryNotificationHook {
    events: Arc<Mutex<Vec<NotificationEvent>>>,
}

impl InMemoryNotificationHook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<NotificationEvent> {
        self.events.lock().map(|events| events.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl NotificationHook for InMemoryNotificationHook {
    async fn notify(&self, event: &NotificationEvent) -> Result<(), NotifyError> {
        self.events
            .lock()
            .map_err(|_| NotifyError::Delivery("event buffer poisoned".to_string()))?
            .push(event.clone());
        Ok(())
    }
}
