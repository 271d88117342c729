use async_trait::async_trait;
use chrono::Utc;
use sqlx::Row;

use signoff_core::{ApprovalStep, ApprovalWorkflow, ProjectId, UserId, WorkflowId, WorkflowStatus};

use super::workflow::{load_steps, row_to_workflow_shell};
use super::{SqlWorkflowStore, StoreError};

/// One actionable item on a reviewer's queue: an active workflow whose
/// current step is assigned to them.
#[derive(Clone, Debug)]
pub struct PendingReview {
    pub workflow: ApprovalWorkflow,
    pub step: ApprovalStep,
}

/// Per-reviewer step counters plus the average seconds a completed step
/// spent open. Open counts include every incomplete step on an active
/// workflow, not only current ones, so a reviewer queued behind others
/// still shows up.
#[derive(Clone, Debug, PartialEq)]
pub struct ReviewerWorkload {
    pub reviewer_id: UserId,
    pub pending_steps: u32,
    pub overdue_steps: u32,
    pub completed_steps: u32,
    pub avg_completion_secs: Option<f64>,
}

#[async_trait]
pub trait WorkflowAggregation: Send + Sync {
    async fn list_pending_for_reviewer(
        &self,
        reviewer: &UserId,
        project: Option<&ProjectId>,
    ) -> Result<Vec<PendingReview>, StoreError>;

    async fn list_submitted_by_user(
        &self,
        user: &UserId,
        project: Option<&ProjectId>,
        status: Option<WorkflowStatus>,
    ) -> Result<Vec<ApprovalWorkflow>, StoreError>;

    async fn reviewer_workload(
        &self,
        project: Option<&ProjectId>,
        reviewer: Option<&UserId>,
    ) -> Result<Vec<ReviewerWorkload>, StoreError>;
}

const ACTIVE_STATUSES: &str = "('pending', 'in_review', 'escalated')";

#[async_trait]
impl WorkflowAggregation for SqlWorkflowStore {
    async fn list_pending_for_reviewer(
        &self,
        reviewer: &UserId,
        project: Option<&ProjectId>,
    ) -> Result<Vec<PendingReview>, StoreError> {
        let mut conn = self.pool().acquire().await?;
        let project_filter = project.map(|project| project.0.as_str());

        let candidate_ids: Vec<String> = sqlx::query(&format!(
            "SELECT DISTINCT w.id AS id, w.created_at AS created_at
             FROM approval_workflow w
             JOIN approval_step s ON s.workflow_id = w.id
             WHERE w.status IN {ACTIVE_STATUSES}
               AND s.is_completed = 0
               AND COALESCE(s.delegated_to, s.reviewer_id) = ?
               AND (? IS NULL OR w.project_id = ?)
             ORDER BY w.created_at ASC"
        ))
        .bind(&reviewer.0)
        .bind(project_filter)
        .bind(project_filter)
        .fetch_all(&mut *conn)
        .await?
        .iter()
        .map(|row| row.try_get::<String, _>("id"))
        .collect::<Result<_, _>>()?;

        // The current step is derived, so the final filter happens on the
        // loaded aggregate rather than in SQL.
        let mut pending = Vec::new();
        for id in candidate_ids {
            let workflow_id = WorkflowId(id);
            let row = sqlx::query(
                "SELECT id, report_id, project_id, status, required_weight, created_by,
                        state_version, created_at, updated_at
                 FROM approval_workflow WHERE id = ?",
            )
            .bind(&workflow_id.0)
            .fetch_optional(&mut *conn)
            .await?;

            let Some(row) = row else { continue };
            let mut workflow = row_to_workflow_shell(&row)?;
            workflow.steps = load_steps(&mut conn, &workflow_id).await?;

            let current = workflow.current_step().cloned();
            if let Some(step) = current {
                if step.effective_reviewer() == reviewer {
                    pending.push(PendingReview { workflow, step });
                }
            }
        }

        Ok(pending)
    }

    async fn list_submitted_by_user(
        &self,
        user: &UserId,
        project: Option<&ProjectId>,
        status: Option<WorkflowStatus>,
    ) -> Result<Vec<ApprovalWorkflow>, StoreError> {
        let mut conn = self.pool().acquire().await?;
        let project_filter = project.map(|project| project.0.as_str());
        let status_filter = status.map(|status| status.as_str());

        let rows = sqlx::query(
            "SELECT id, report_id, project_id, status, required_weight, created_by,
                    state_version, created_at, updated_at
             FROM approval_workflow
             WHERE created_by = ?
               AND (? IS NULL OR project_id = ?)
               AND (? IS NULL OR status = ?)
             ORDER BY created_at DESC",
        )
        .bind(&user.0)
        .bind(project_filter)
        .bind(project_filter)
        .bind(status_filter)
        .bind(status_filter)
        .fetch_all(&mut *conn)
        .await?;

        let mut workflows = Vec::with_capacity(rows.len());
        for row in &rows {
            let mut workflow = row_to_workflow_shell(row)?;
            let workflow_id = workflow.id.clone();
            workflow.steps = load_steps(&mut conn, &workflow_id).await?;
            workflows.push(workflow);
        }

        Ok(workflows)
    }

    async fn reviewer_workload(
        &self,
        project: Option<&ProjectId>,
        reviewer: Option<&UserId>,
    ) -> Result<Vec<ReviewerWorkload>, StoreError> {
        let now = Utc::now().to_rfc3339();
        let project_filter = project.map(|project| project.0.as_str());
        let reviewer_filter = reviewer.map(|reviewer| reviewer.0.as_str());

        // Completion time is measured per step, completed_at - created_at,
        // in seconds. Attribution follows the effective reviewer.
        let rows = sqlx::query(&format!(
            "SELECT COALESCE(s.delegated_to, s.reviewer_id) AS reviewer,
                    SUM(CASE WHEN s.is_completed = 0 AND w.status IN {ACTIVE_STATUSES}
                             THEN 1 ELSE 0 END) AS pending_steps,
                    SUM(CASE WHEN s.is_completed = 0 AND w.status IN {ACTIVE_STATUSES}
                              AND s.due_date IS NOT NULL AND s.due_date < ?
                             THEN 1 ELSE 0 END) AS overdue_steps,
                    SUM(CASE WHEN s.is_completed = 1 THEN 1 ELSE 0 END) AS completed_steps,
                    AVG(CASE WHEN s.is_completed = 1 AND s.completed_at IS NOT NULL
                             THEN (julianday(s.completed_at) - julianday(s.created_at)) * 86400.0
                             END) AS avg_completion_secs
             FROM approval_step s
             JOIN approval_workflow w ON w.id = s.workflow_id
             WHERE (? IS NULL OR w.project_id = ?)
               AND (? IS NULL OR COALESCE(s.delegated_to, s.reviewer_id) = ?)
             GROUP BY reviewer
             HAVING pending_steps > 0 OR completed_steps > 0
             ORDER BY pending_steps DESC, reviewer ASC"
        ))
        .bind(&now)
        .bind(project_filter)
        .bind(project_filter)
        .bind(reviewer_filter)
        .bind(reviewer_filter)
        .fetch_all(self.pool())
        .await?;

        rows.iter()
            .map(|row| {
                let reviewer: String =
                    row.try_get("reviewer").map_err(|e| StoreError::Decode(e.to_string()))?;
                let pending_steps: i64 =
                    row.try_get("pending_steps").map_err(|e| StoreError::Decode(e.to_string()))?;
                let overdue_steps: i64 =
                    row.try_get("overdue_steps").map_err(|e| StoreError::Decode(e.to_string()))?;
                let completed_steps: i64 = row
                    .try_get("completed_steps")
                    .map_err(|e| StoreError::Decode(e.to_string()))?;
                let avg_completion_secs: Option<f64> = row
                    .try_get("avg_completion_secs")
                    .map_err(|e| StoreError::Decode(e.to_string()))?;

                Ok(ReviewerWorkload {
                    reviewer_id: UserId(reviewer),
                    pending_steps: u32::try_from(pending_steps)
                        .map_err(|_| StoreError::Decode("negative step count".to_string()))?,
                    overdue_steps: u32::try_from(overdue_steps)
                        .map_err(|_| StoreError::Decode("negative step count".to_string()))?,
                    completed_steps: u32::try_from(completed_steps)
                        .map_err(|_| StoreError::Decode("negative step count".to_string()))?,
                    avg_completion_secs,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use signoff_core::{
        ProjectId, ReportId, ReviewAction, StepId, TransitionRequest, UserId, WorkflowStatus,
    };

    use super::WorkflowAggregation;
    use crate::store::{SqlWorkflowStore, StepDraft, WorkflowDraft, WorkflowStore};
    use crate::{connect_with_settings, migrations};

    async fn setup() -> SqlWorkflowStore {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        SqlWorkflowStore::new(pool)
    }

    fn user(id: &str) -> UserId {
        UserId(id.to_string())
    }

    fn draft(report: &str, project: &str, author: &str, reviewers: &[&str]) -> WorkflowDraft {
        WorkflowDraft {
            report_id: ReportId(report.to_string()),
            project_id: ProjectId(project.to_string()),
            created_by: user(author),
            required_weight: None,
            steps: reviewers
                .iter()
                .map(|reviewer| StepDraft::reviewer(user(reviewer)))
                .collect(),
        }
    }

    fn approve() -> TransitionRequest {
        TransitionRequest::Review { action: ReviewAction::Approve, note: None, step_id: None }
    }

    #[tokio::test]
    async fn pending_reviews_surface_only_the_current_step() {
        let store = setup().await;
        store
            .create_workflow(draft("rep-1", "proj-1", "u-author", &["u-1", "u-2"]))
            .await
            .expect("create");

        let for_first = store.list_pending_for_reviewer(&user("u-1"), None).await.expect("list");
        assert_eq!(for_first.len(), 1);
        assert_eq!(for_first[0].step.step_order, 1);

        // u-2 is queued but not yet actionable.
        let for_second = store.list_pending_for_reviewer(&user("u-2"), None).await.expect("list");
        assert!(for_second.is_empty());
    }

    #[tokio::test]
    async fn pending_reviews_follow_delegation() {
        let store = setup().await;
        let created = store
            .create_workflow(draft("rep-1", "proj-1", "u-author", &["u-1"]))
            .await
            .expect("create");

        store
            .apply_transition(
                &created.id,
                &TransitionRequest::Delegate {
                    step_id: StepId(created.steps[0].id.0.clone()),
                    to_user: user("u-b"),
                    reason: "out sick".to_string(),
                },
                &user("u-1"),
            )
            .await
            .expect("delegate");

        assert!(store
            .list_pending_for_reviewer(&user("u-1"), None)
            .await
            .expect("list")
            .is_empty());
        let delegated = store.list_pending_for_reviewer(&user("u-b"), None).await.expect("list");
        assert_eq!(delegated.len(), 1);
    }

    #[tokio::test]
    async fn pending_reviews_respect_the_project_filter() {
        let store = setup().await;
        store
            .create_workflow(draft("rep-1", "proj-1", "u-author", &["u-1"]))
            .await
            .expect("create 1");
        store
            .create_workflow(draft("rep-2", "proj-2", "u-author", &["u-1"]))
            .await
            .expect("create 2");

        let all = store.list_pending_for_reviewer(&user("u-1"), None).await.expect("list");
        assert_eq!(all.len(), 2);

        let scoped = store
            .list_pending_for_reviewer(&user("u-1"), Some(&ProjectId("proj-2".to_string())))
            .await
            .expect("scoped list");
        assert_eq!(scoped.len(), 1);
        assert_eq!(scoped[0].workflow.project_id, ProjectId("proj-2".to_string()));
    }

    #[tokio::test]
    async fn terminal_workflows_drop_off_the_queue() {
        let store = setup().await;
        let created = store
            .create_workflow(draft("rep-1", "proj-1", "u-author", &["u-1"]))
            .await
            .expect("create");
        store.apply_transition(&created.id, &approve(), &user("u-1")).await.expect("approve");

        assert!(store
            .list_pending_for_reviewer(&user("u-1"), None)
            .await
            .expect("list")
            .is_empty());
    }

    #[tokio::test]
    async fn submitted_by_lists_the_authors_workflows() {
        let store = setup().await;
        store
            .create_workflow(draft("rep-1", "proj-1", "u-author", &["u-1"]))
            .await
            .expect("create 1");
        store
            .create_workflow(draft("rep-2", "proj-1", "u-author", &["u-1"]))
            .await
            .expect("create 2");
        store
            .create_workflow(draft("rep-3", "proj-1", "u-other", &["u-1"]))
            .await
            .expect("create 3");

        let submitted =
            store.list_submitted_by_user(&user("u-author"), None, None).await.expect("list");
        assert_eq!(submitted.len(), 2);
        assert!(submitted.iter().all(|workflow| workflow.created_by == user("u-author")));
        assert!(submitted.iter().all(|workflow| !workflow.steps.is_empty()));
    }

    #[tokio::test]
    async fn submitted_by_filters_on_status() {
        let store = setup().await;
        let created = store
            .create_workflow(draft("rep-1", "proj-1", "u-author", &["u-1"]))
            .await
            .expect("create 1");
        store
            .create_workflow(draft("rep-2", "proj-1", "u-author", &["u-1"]))
            .await
            .expect("create 2");
        store.apply_transition(&created.id, &approve(), &user("u-1")).await.expect("approve");

        let approved = store
            .list_submitted_by_user(&user("u-author"), None, Some(WorkflowStatus::Approved))
            .await
            .expect("approved list");
        assert_eq!(approved.len(), 1);
        assert_eq!(approved[0].id, created.id);

        let pending = store
            .list_submitted_by_user(&user("u-author"), None, Some(WorkflowStatus::Pending))
            .await
            .expect("pending list");
        assert_eq!(pending.len(), 1);
    }

    #[tokio::test]
    async fn workload_counts_open_and_overdue_steps_per_effective_reviewer() {
        let store = setup().await;

        let mut first = draft("rep-1", "proj-1", "u-author", &["u-1", "u-2"]);
        first.steps[0].due_date = Some(Utc::now() - Duration::days(1));
        store.create_workflow(first).await.expect("create 1");

        store
            .create_workflow(draft("rep-2", "proj-2", "u-author", &["u-1"]))
            .await
            .expect("create 2");

        let workload = store.reviewer_workload(None, None).await.expect("workload");
        let u1 = workload.iter().find(|entry| entry.reviewer_id == user("u-1")).expect("u-1");
        assert_eq!(u1.pending_steps, 2);
        assert_eq!(u1.overdue_steps, 1);
        assert_eq!(u1.completed_steps, 0);
        assert!(u1.avg_completion_secs.is_none());
        let u2 = workload.iter().find(|entry| entry.reviewer_id == user("u-2")).expect("u-2");
        assert_eq!(u2.pending_steps, 1);
        assert_eq!(u2.overdue_steps, 0);

        let scoped = store
            .reviewer_workload(Some(&ProjectId("proj-2".to_string())), None)
            .await
            .expect("scoped workload");
        assert_eq!(scoped.len(), 1);
        assert_eq!(scoped[0].reviewer_id, user("u-1"));
        assert_eq!(scoped[0].pending_steps, 1);
    }

    #[tokio::test]
    async fn workload_tracks_completed_steps_and_completion_time() {
        let store = setup().await;
        let created = store
            .create_workflow(draft("rep-1", "proj-1", "u-author", &["u-1", "u-2"]))
            .await
            .expect("create");
        store.apply_transition(&created.id, &approve(), &user("u-1")).await.expect("approve");

        let workload = store
            .reviewer_workload(None, Some(&user("u-1")))
            .await
            .expect("workload");
        assert_eq!(workload.len(), 1);
        let u1 = &workload[0];
        assert_eq!(u1.pending_steps, 0);
        assert_eq!(u1.completed_steps, 1);
        let secs = u1.avg_completion_secs.expect("completion time");
        assert!(secs.abs() < 60.0, "unexpected completion time: {secs}");
    }

    #[tokio::test]
    async fn escalated_workflows_stay_on_the_queue() {
        let store = setup().await;
        let created = store
            .create_workflow(draft("rep-1", "proj-1", "u-author", &["u-1"]))
            .await
            .expect("create");

        store
            .apply_transition(
                &created.id,
                &TransitionRequest::Escalate {
                    to_user: Some(user("u-vp")),
                    reason: "stalled for a week".to_string(),
                },
                &user("u-author"),
            )
            .await
            .expect("escalate");

        let loaded = store.get_by_id(&created.id).await.expect("get").expect("exists");
        assert_eq!(loaded.status, WorkflowStatus::Escalated);

        let queue = store.list_pending_for_reviewer(&user("u-vp"), None).await.expect("list");
        assert_eq!(queue.len(), 1);
    }
}
