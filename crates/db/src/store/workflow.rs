use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};
use uuid::Uuid;

use signoff_core::engine;
use signoff_core::{
    ApprovalStep, ApprovalWorkflow, Comment, CommentId, InformationRequest, InformationRequestId,
    ProjectId, ReportId, StatusHistory, StatusHistoryId, StepAction, StepId, TransitionOutcome,
    TransitionRequest, UserId, WorkflowId, WorkflowStatus,
};

use super::{
    CommentDraft, InformationRequestDraft, StoreError, WorkflowDraft, WorkflowStore,
};
use crate::DbPool;

pub struct SqlWorkflowStore {
    pool: DbPool,
}

impl SqlWorkflowStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

fn new_id() -> String {
    Uuid::new_v4().to_string()
}

pub(crate) fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| StoreError::Decode(format!("invalid timestamp `{value}`")))
}

fn decode<T>(result: Result<T, sqlx::Error>) -> Result<T, StoreError> {
    result.map_err(|e| StoreError::Decode(e.to_string()))
}

fn parse_status(value: &str) -> Result<WorkflowStatus, StoreError> {
    WorkflowStatus::parse(value)
        .ok_or_else(|| StoreError::Decode(format!("unknown workflow status `{value}`")))
}

fn parse_weight(value: &str) -> Result<Decimal, StoreError> {
    value
        .parse::<Decimal>()
        .map_err(|_| StoreError::Decode(format!("invalid decimal weight `{value}`")))
}

fn parse_order(value: i64) -> Result<u32, StoreError> {
    u32::try_from(value).map_err(|_| StoreError::Decode(format!("invalid step order `{value}`")))
}

pub(crate) fn row_to_workflow_shell(row: &SqliteRow) -> Result<ApprovalWorkflow, StoreError> {
    let id: String = decode(row.try_get("id"))?;
    let report_id: String = decode(row.try_get("report_id"))?;
    let project_id: String = decode(row.try_get("project_id"))?;
    let status_str: String = decode(row.try_get("status"))?;
    let required_weight_str: Option<String> = decode(row.try_get("required_weight"))?;
    let created_by: String = decode(row.try_get("created_by"))?;
    let state_version: i64 = decode(row.try_get("state_version"))?;
    let created_at_str: String = decode(row.try_get("created_at"))?;
    let updated_at_str: String = decode(row.try_get("updated_at"))?;

    let required_weight = required_weight_str.as_deref().map(parse_weight).transpose()?;

    Ok(ApprovalWorkflow {
        id: WorkflowId(id),
        report_id: ReportId(report_id),
        project_id: ProjectId(project_id),
        status: parse_status(&status_str)?,
        required_weight,
        steps: Vec::new(),
        created_by: UserId(created_by),
        state_version: parse_order(state_version)?,
        created_at: parse_timestamp(&created_at_str)?,
        updated_at: parse_timestamp(&updated_at_str)?,
    })
}

pub(crate) fn row_to_step(row: &SqliteRow) -> Result<ApprovalStep, StoreError> {
    let id: String = decode(row.try_get("id"))?;
    let workflow_id: String = decode(row.try_get("workflow_id"))?;
    let step_order: i64 = decode(row.try_get("step_order"))?;
    let reviewer_id: String = decode(row.try_get("reviewer_id"))?;
    let delegated_to: Option<String> = decode(row.try_get("delegated_to"))?;
    let is_completed: bool = decode(row.try_get("is_completed"))?;
    let action_str: Option<String> = decode(row.try_get("action"))?;
    let comment: Option<String> = decode(row.try_get("comment"))?;
    let reasoning: Option<String> = decode(row.try_get("reasoning"))?;
    let completed_at_str: Option<String> = decode(row.try_get("completed_at"))?;
    let due_date_str: Option<String> = decode(row.try_get("due_date"))?;
    let can_skip: bool = decode(row.try_get("can_skip"))?;
    let escalation_level: i64 = decode(row.try_get("escalation_level"))?;
    let approval_weight_str: String = decode(row.try_get("approval_weight"))?;
    let created_at_str: String = decode(row.try_get("created_at"))?;

    let action = match action_str {
        Some(value) => Some(
            StepAction::parse(&value)
                .ok_or_else(|| StoreError::Decode(format!("unknown step action `{value}`")))?,
        ),
        None => None,
    };

    Ok(ApprovalStep {
        id: StepId(id),
        workflow_id: WorkflowId(workflow_id),
        step_order: parse_order(step_order)?,
        reviewer_id: UserId(reviewer_id),
        delegated_to: delegated_to.map(UserId),
        is_completed,
        action,
        comment,
        reasoning,
        completed_at: completed_at_str.as_deref().map(parse_timestamp).transpose()?,
        due_date: due_date_str.as_deref().map(parse_timestamp).transpose()?,
        can_skip,
        escalation_level: parse_order(escalation_level)?,
        approval_weight: parse_weight(&approval_weight_str)?,
        created_at: parse_timestamp(&created_at_str)?,
    })
}

fn row_to_history(row: &SqliteRow) -> Result<StatusHistory, StoreError> {
    let id: String = decode(row.try_get("id"))?;
    let workflow_id: String = decode(row.try_get("workflow_id"))?;
    let status_str: String = decode(row.try_get("status"))?;
    let previous_status_str: Option<String> = decode(row.try_get("previous_status"))?;
    let changed_by: String = decode(row.try_get("changed_by"))?;
    let reason: Option<String> = decode(row.try_get("reason"))?;
    let assigned_to: Option<String> = decode(row.try_get("assigned_to"))?;
    let created_at_str: String = decode(row.try_get("created_at"))?;

    Ok(StatusHistory {
        id: StatusHistoryId(id),
        workflow_id: WorkflowId(workflow_id),
        status: parse_status(&status_str)?,
        previous_status: previous_status_str.as_deref().map(parse_status).transpose()?,
        changed_by: UserId(changed_by),
        reason,
        assigned_to: assigned_to.map(UserId),
        created_at: parse_timestamp(&created_at_str)?,
    })
}

fn row_to_comment(row: &SqliteRow) -> Result<Comment, StoreError> {
    let id: String = decode(row.try_get("id"))?;
    let workflow_id: String = decode(row.try_get("workflow_id"))?;
    let parent_id: Option<String> = decode(row.try_get("parent_id"))?;
    let author_id: String = decode(row.try_get("author_id"))?;
    let content: String = decode(row.try_get("content"))?;
    let is_internal: bool = decode(row.try_get("is_internal"))?;
    let created_at_str: String = decode(row.try_get("created_at"))?;

    Ok(Comment {
        id: CommentId(id),
        workflow_id: WorkflowId(workflow_id),
        parent_id: parent_id.map(CommentId),
        author_id: UserId(author_id),
        content,
        is_internal,
        created_at: parse_timestamp(&created_at_str)?,
    })
}

fn row_to_information(row: &SqliteRow) -> Result<InformationRequest, StoreError> {
    let id: String = decode(row.try_get("id"))?;
    let workflow_id: String = decode(row.try_get("workflow_id"))?;
    let from_user_id: String = decode(row.try_get("from_user_id"))?;
    let info: String = decode(row.try_get("info"))?;
    let deadline_str: Option<String> = decode(row.try_get("deadline"))?;
    let created_at_str: String = decode(row.try_get("created_at"))?;

    Ok(InformationRequest {
        id: InformationRequestId(id),
        workflow_id: WorkflowId(workflow_id),
        from_user_id: UserId(from_user_id),
        info,
        deadline: deadline_str.as_deref().map(parse_timestamp).transpose()?,
        created_at: parse_timestamp(&created_at_str)?,
    })
}

const WORKFLOW_COLUMNS: &str = "id, report_id, project_id, status, required_weight, created_by,
     state_version, created_at, updated_at";

const STEP_COLUMNS: &str = "id, workflow_id, step_order, reviewer_id, delegated_to, is_completed,
     action, comment, reasoning, completed_at, due_date, can_skip, escalation_level,
     approval_weight, created_at";

pub(crate) async fn load_steps(
    conn: &mut SqliteConnection,
    workflow_id: &WorkflowId,
) -> Result<Vec<ApprovalStep>, StoreError> {
    let rows = sqlx::query(&format!(
        "SELECT {STEP_COLUMNS} FROM approval_step WHERE workflow_id = ? ORDER BY step_order ASC"
    ))
    .bind(&workflow_id.0)
    .fetch_all(&mut *conn)
    .await?;

    rows.iter().map(row_to_step).collect()
}

async fn load_workflow(
    conn: &mut SqliteConnection,
    id: &WorkflowId,
) -> Result<Option<ApprovalWorkflow>, StoreError> {
    let row = sqlx::query(&format!(
        "SELECT {WORKFLOW_COLUMNS} FROM approval_workflow WHERE id = ?"
    ))
    .bind(&id.0)
    .fetch_optional(&mut *conn)
    .await?;

    let Some(row) = row else { return Ok(None) };
    let mut workflow = row_to_workflow_shell(&row)?;
    workflow.steps = load_steps(conn, id).await?;
    Ok(Some(workflow))
}

async fn insert_history(
    conn: &mut SqliteConnection,
    workflow_id: &WorkflowId,
    status: WorkflowStatus,
    previous_status: Option<WorkflowStatus>,
    changed_by: &UserId,
    reason: Option<&str>,
    assigned_to: Option<&UserId>,
    at: DateTime<Utc>,
) -> Result<(), StoreError> {
    sqlx::query(
        "INSERT INTO status_history (id, workflow_id, status, previous_status, changed_by,
                                     reason, assigned_to, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(new_id())
    .bind(&workflow_id.0)
    .bind(status.as_str())
    .bind(previous_status.map(|status| status.as_str()))
    .bind(&changed_by.0)
    .bind(reason)
    .bind(assigned_to.map(|user| user.0.as_str()))
    .bind(at.to_rfc3339())
    .execute(&mut *conn)
    .await?;

    Ok(())
}

fn is_unique_violation(error: &sqlx::Error) -> bool {
    matches!(
        error,
        sqlx::Error::Database(db_err)
            if matches!(db_err.kind(), sqlx::error::ErrorKind::UniqueViolation)
    )
}

fn validate_draft(draft: &WorkflowDraft) -> Result<(), StoreError> {
    if draft.steps.is_empty() {
        return Err(StoreError::InvalidDraft("a workflow needs at least one step".to_string()));
    }
    for step in &draft.steps {
        if step.approval_weight <= Decimal::ZERO {
            return Err(StoreError::InvalidDraft(
                "step approval_weight must be positive".to_string(),
            ));
        }
    }
    if let Some(required) = draft.required_weight {
        if required <= Decimal::ZERO {
            return Err(StoreError::InvalidDraft(
                "required_weight must be positive when set".to_string(),
            ));
        }
    }
    Ok(())
}

#[async_trait]
impl WorkflowStore for SqlWorkflowStore {
    async fn create_workflow(&self, draft: WorkflowDraft) -> Result<ApprovalWorkflow, StoreError> {
        validate_draft(&draft)?;

        let now = Utc::now();
        let workflow_id = WorkflowId(new_id());
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            "INSERT INTO approval_workflow (id, report_id, project_id, status, required_weight,
                                            created_by, state_version, created_at, updated_at)
             VALUES (?, ?, ?, 'pending', ?, ?, 1, ?, ?)",
        )
        .bind(&workflow_id.0)
        .bind(&draft.report_id.0)
        .bind(&draft.project_id.0)
        .bind(draft.required_weight.map(|weight| weight.to_string()))
        .bind(&draft.created_by.0)
        .bind(now.to_rfc3339())
        .bind(now.to_rfc3339())
        .execute(&mut *tx)
        .await;

        if let Err(error) = inserted {
            if is_unique_violation(&error) {
                return Err(StoreError::DuplicateActiveWorkflow {
                    report_id: draft.report_id.0.clone(),
                });
            }
            return Err(error.into());
        }

        let mut steps = Vec::with_capacity(draft.steps.len());
        for (index, step) in draft.steps.iter().enumerate() {
            let step_order = (index + 1) as u32;
            let step_id = StepId(new_id());
            sqlx::query(
                "INSERT INTO approval_step (id, workflow_id, step_order, reviewer_id,
                                            delegated_to, is_completed, action, comment,
                                            reasoning, completed_at, due_date, can_skip,
                                            escalation_level, approval_weight, created_at)
                 VALUES (?, ?, ?, ?, NULL, 0, NULL, NULL, NULL, NULL, ?, ?, 0, ?, ?)",
            )
            .bind(&step_id.0)
            .bind(&workflow_id.0)
            .bind(step_order as i64)
            .bind(&step.reviewer_id.0)
            .bind(step.due_date.map(|due| due.to_rfc3339()))
            .bind(step.can_skip)
            .bind(step.approval_weight.to_string())
            .bind(now.to_rfc3339())
            .execute(&mut *tx)
            .await?;

            steps.push(ApprovalStep {
                id: step_id,
                workflow_id: workflow_id.clone(),
                step_order,
                reviewer_id: step.reviewer_id.clone(),
                delegated_to: None,
                is_completed: false,
                action: None,
                comment: None,
                reasoning: None,
                completed_at: None,
                due_date: step.due_date,
                can_skip: step.can_skip,
                escalation_level: 0,
                approval_weight: step.approval_weight,
                created_at: now,
            });
        }

        let first_reviewer = steps.first().map(|step| step.reviewer_id.clone());
        insert_history(
            &mut tx,
            &workflow_id,
            WorkflowStatus::Pending,
            None,
            &draft.created_by,
            None,
            first_reviewer.as_ref(),
            now,
        )
        .await?;

        tx.commit().await?;

        Ok(ApprovalWorkflow {
            id: workflow_id,
            report_id: draft.report_id,
            project_id: draft.project_id,
            status: WorkflowStatus::Pending,
            required_weight: draft.required_weight,
            steps,
            created_by: draft.created_by,
            state_version: 1,
            created_at: now,
            updated_at: now,
        })
    }

    async fn get_by_id(&self, id: &WorkflowId) -> Result<Option<ApprovalWorkflow>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        load_workflow(&mut conn, id).await
    }

    async fn get_by_report(
        &self,
        report_id: &ReportId,
    ) -> Result<Option<ApprovalWorkflow>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        let row = sqlx::query(&format!(
            "SELECT {WORKFLOW_COLUMNS} FROM approval_workflow
             WHERE report_id = ?
             ORDER BY CASE WHEN status IN ('approved', 'rejected', 'cancelled') THEN 1 ELSE 0 END,
                      updated_at DESC
             LIMIT 1"
        ))
        .bind(&report_id.0)
        .fetch_optional(&mut *conn)
        .await?;

        let Some(row) = row else { return Ok(None) };
        let mut workflow = row_to_workflow_shell(&row)?;
        let workflow_id = workflow.id.clone();
        workflow.steps = load_steps(&mut conn, &workflow_id).await?;
        Ok(Some(workflow))
    }

    async fn apply_transition(
        &self,
        id: &WorkflowId,
        request: &TransitionRequest,
        actor: &UserId,
    ) -> Result<TransitionOutcome, StoreError> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let workflow = load_workflow(&mut tx, id)
            .await?
            .ok_or_else(|| StoreError::NotFound { entity: "workflow", id: id.0.clone() })?;

        let mut outcome = engine::apply(&workflow, request, actor, now)?;
        let next_version = workflow.state_version + 1;

        let updated = sqlx::query(
            "UPDATE approval_workflow
             SET status = ?, state_version = ?, updated_at = ?
             WHERE id = ? AND state_version = ?",
        )
        .bind(outcome.workflow.status.as_str())
        .bind(next_version as i64)
        .bind(now.to_rfc3339())
        .bind(&id.0)
        .bind(workflow.state_version as i64)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(StoreError::Conflict { workflow_id: id.0.clone() });
        }

        for step in &outcome.workflow.steps {
            sqlx::query(
                "UPDATE approval_step
                 SET delegated_to = ?, is_completed = ?, action = ?, comment = ?,
                     reasoning = ?, completed_at = ?, due_date = ?, escalation_level = ?
                 WHERE id = ?",
            )
            .bind(step.delegated_to.as_ref().map(|user| user.0.as_str()))
            .bind(step.is_completed)
            .bind(step.action.map(|action| action.as_str()))
            .bind(step.comment.as_deref())
            .bind(step.reasoning.as_deref())
            .bind(step.completed_at.map(|at| at.to_rfc3339()))
            .bind(step.due_date.map(|due| due.to_rfc3339()))
            .bind(step.escalation_level as i64)
            .bind(&step.id.0)
            .execute(&mut *tx)
            .await?;
        }

        insert_history(
            &mut tx,
            id,
            outcome.history.status,
            Some(outcome.history.previous_status),
            actor,
            outcome.history.reason.as_deref(),
            outcome.history.assigned_to.as_ref(),
            now,
        )
        .await?;

        tx.commit().await?;

        outcome.workflow.state_version = next_version;
        Ok(outcome)
    }

    async fn list_history(&self, id: &WorkflowId) -> Result<Vec<StatusHistory>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, workflow_id, status, previous_status, changed_by, reason, assigned_to,
                    created_at
             FROM status_history WHERE workflow_id = ? ORDER BY created_at ASC, rowid ASC",
        )
        .bind(&id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_history).collect()
    }

    async fn add_comment(&self, draft: CommentDraft) -> Result<Comment, StoreError> {
        if draft.content.trim().is_empty() {
            return Err(StoreError::InvalidDraft("comment content must not be blank".to_string()));
        }

        let comment = Comment {
            id: CommentId(new_id()),
            workflow_id: draft.workflow_id,
            parent_id: draft.parent_id,
            author_id: draft.author_id,
            content: draft.content,
            is_internal: draft.is_internal,
            created_at: Utc::now(),
        };

        sqlx::query(
            "INSERT INTO workflow_comment (id, workflow_id, parent_id, author_id, content,
                                           is_internal, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&comment.id.0)
        .bind(&comment.workflow_id.0)
        .bind(comment.parent_id.as_ref().map(|parent| parent.0.as_str()))
        .bind(&comment.author_id.0)
        .bind(&comment.content)
        .bind(comment.is_internal)
        .bind(comment.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(comment)
    }

    async fn list_comments(&self, id: &WorkflowId) -> Result<Vec<Comment>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, workflow_id, parent_id, author_id, content, is_internal, created_at
             FROM workflow_comment WHERE workflow_id = ? ORDER BY created_at ASC, rowid ASC",
        )
        .bind(&id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_comment).collect()
    }

    async fn add_information_request(
        &self,
        draft: InformationRequestDraft,
    ) -> Result<InformationRequest, StoreError> {
        if draft.info.trim().is_empty() {
            return Err(StoreError::InvalidDraft(
                "information request text must not be blank".to_string(),
            ));
        }

        let request = InformationRequest {
            id: InformationRequestId(new_id()),
            workflow_id: draft.workflow_id,
            from_user_id: draft.from_user_id,
            info: draft.info,
            deadline: draft.deadline,
            created_at: Utc::now(),
        };

        sqlx::query(
            "INSERT INTO information_request (id, workflow_id, from_user_id, info, deadline,
                                              created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&request.id.0)
        .bind(&request.workflow_id.0)
        .bind(&request.from_user_id.0)
        .bind(&request.info)
        .bind(request.deadline.map(|deadline| deadline.to_rfc3339()))
        .bind(request.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(request)
    }

    async fn list_information_requests(
        &self,
        id: &WorkflowId,
    ) -> Result<Vec<InformationRequest>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, workflow_id, from_user_id, info, deadline, created_at
             FROM information_request WHERE workflow_id = ? ORDER BY created_at ASC, rowid ASC",
        )
        .bind(&id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_information).collect()
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use signoff_core::{
        EngineError, ProjectId, ReportId, ReviewAction, TransitionRequest, UserId, WorkflowStatus,
    };

    use super::SqlWorkflowStore;
    use crate::store::{CommentDraft, InformationRequestDraft, StepDraft, WorkflowDraft};
    use crate::store::{StoreError, WorkflowStore};
    use crate::{connect_with_settings, migrations};

    async fn setup() -> SqlWorkflowStore {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        SqlWorkflowStore::new(pool)
    }

    fn draft(report: &str, reviewers: &[&str]) -> WorkflowDraft {
        WorkflowDraft {
            report_id: ReportId(report.to_string()),
            project_id: ProjectId("proj-1".to_string()),
            created_by: UserId("u-author".to_string()),
            required_weight: None,
            steps: reviewers
                .iter()
                .map(|reviewer| StepDraft::reviewer(UserId(reviewer.to_string())))
                .collect(),
        }
    }

    fn approve() -> TransitionRequest {
        TransitionRequest::Review { action: ReviewAction::Approve, note: None, step_id: None }
    }

    fn user(id: &str) -> UserId {
        UserId(id.to_string())
    }

    #[tokio::test]
    async fn create_and_get_round_trip() {
        let store = setup().await;
        let created = store.create_workflow(draft("rep-1", &["u-1", "u-2"])).await.expect("create");

        assert_eq!(created.status, WorkflowStatus::Pending);
        assert_eq!(created.state_version, 1);
        assert_eq!(created.steps.len(), 2);
        assert_eq!(created.steps[0].step_order, 1);
        assert_eq!(created.steps[1].step_order, 2);

        let loaded = store.get_by_id(&created.id).await.expect("get").expect("exists");
        assert_eq!(loaded.id, created.id);
        assert_eq!(loaded.steps.len(), 2);
        assert_eq!(loaded.current_step().map(|step| step.step_order), Some(1));

        let history = store.list_history(&created.id).await.expect("history");
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, WorkflowStatus::Pending);
        assert_eq!(history[0].previous_status, None);
        assert_eq!(history[0].assigned_to, Some(user("u-1")));
    }

    #[tokio::test]
    async fn one_active_workflow_per_report() {
        let store = setup().await;
        let first = store.create_workflow(draft("rep-1", &["u-1"])).await.expect("create");

        let error = store.create_workflow(draft("rep-1", &["u-2"])).await.expect_err("duplicate");
        assert!(matches!(error, StoreError::DuplicateActiveWorkflow { ref report_id } if report_id == "rep-1"));

        // A terminal workflow stops blocking the report.
        store
            .apply_transition(&first.id, &approve(), &user("u-1"))
            .await
            .expect("approve to terminal");
        store.create_workflow(draft("rep-1", &["u-2"])).await.expect("create after terminal");
    }

    #[tokio::test]
    async fn transitions_persist_steps_version_and_history() {
        let store = setup().await;
        let created = store.create_workflow(draft("rep-1", &["u-1", "u-2"])).await.expect("create");

        let outcome =
            store.apply_transition(&created.id, &approve(), &user("u-1")).await.expect("approve");
        assert_eq!(outcome.workflow.status, WorkflowStatus::InReview);
        assert_eq!(outcome.workflow.state_version, 2);

        let loaded = store.get_by_id(&created.id).await.expect("get").expect("exists");
        assert_eq!(loaded.state_version, 2);
        assert!(loaded.steps[0].is_completed);
        assert!(loaded.steps[0].completed_at.is_some());
        assert!(!loaded.steps[1].is_completed);

        let history = store.list_history(&created.id).await.expect("history");
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].previous_status, Some(WorkflowStatus::Pending));
        assert_eq!(history[1].status, WorkflowStatus::InReview);
        assert_eq!(history[1].changed_by, user("u-1"));
        assert_eq!(history[1].assigned_to, Some(user("u-2")));
    }

    #[tokio::test]
    async fn failed_transitions_leave_no_trace() {
        let store = setup().await;
        let created = store.create_workflow(draft("rep-1", &["u-1"])).await.expect("create");

        let error = store
            .apply_transition(&created.id, &approve(), &user("u-intruder"))
            .await
            .expect_err("unauthorized");
        assert!(matches!(error, StoreError::Engine(EngineError::Unauthorized { .. })));

        let loaded = store.get_by_id(&created.id).await.expect("get").expect("exists");
        assert_eq!(loaded.state_version, 1);
        assert!(!loaded.steps[0].is_completed);
        assert_eq!(store.list_history(&created.id).await.expect("history").len(), 1);
    }

    #[tokio::test]
    async fn history_replay_matches_stored_status() {
        let store = setup().await;
        let created =
            store.create_workflow(draft("rep-1", &["u-1", "u-2", "u-3"])).await.expect("create");

        store.apply_transition(&created.id, &approve(), &user("u-1")).await.expect("step 1");
        store
            .apply_transition(
                &created.id,
                &TransitionRequest::Review {
                    action: ReviewAction::RequestChanges,
                    note: Some("expand the appendix".to_string()),
                    step_id: None,
                },
                &user("u-2"),
            )
            .await
            .expect("request changes");
        store
            .apply_transition(&created.id, &TransitionRequest::Resubmit, &user("u-author"))
            .await
            .expect("resubmit");

        let loaded = store.get_by_id(&created.id).await.expect("get").expect("exists");
        let history = store.list_history(&created.id).await.expect("history");

        // The last history row is the stored status; each row chains off
        // the previous one.
        assert_eq!(history.last().map(|row| row.status), Some(loaded.status));
        for pair in history.windows(2) {
            assert_eq!(pair[1].previous_status, Some(pair[0].status));
        }
    }

    #[tokio::test]
    async fn racing_reviews_of_one_step_produce_one_winner() {
        let store = std::sync::Arc::new(setup().await);
        let created = store.create_workflow(draft("rep-1", &["u-1", "u-2"])).await.expect("create");

        let target = TransitionRequest::Review {
            action: ReviewAction::Approve,
            note: None,
            step_id: Some(created.steps[0].id.clone()),
        };

        let first = {
            let store = store.clone();
            let id = created.id.clone();
            let target = target.clone();
            tokio::spawn(async move { store.apply_transition(&id, &target, &user("u-1")).await })
        };
        let second = {
            let store = store.clone();
            let id = created.id.clone();
            let target = target.clone();
            tokio::spawn(async move { store.apply_transition(&id, &target, &user("u-1")).await })
        };

        let results = [first.await.expect("join"), second.await.expect("join")];
        let successes = results.iter().filter(|result| result.is_ok()).count();
        assert_eq!(successes, 1, "exactly one racing review may win");

        let loser = results.into_iter().find(|result| result.is_err()).expect("one loser");
        assert!(matches!(
            loser,
            Err(StoreError::Engine(EngineError::AlreadyCompleted { step_order: 1 }))
                | Err(StoreError::Conflict { .. })
        ));

        let loaded = store.get_by_id(&created.id).await.expect("get").expect("exists");
        assert_eq!(loaded.state_version, 2);
        assert_eq!(store.list_history(&created.id).await.expect("history").len(), 2);
    }

    #[tokio::test]
    async fn get_by_report_prefers_the_active_workflow() {
        let store = setup().await;
        let first = store.create_workflow(draft("rep-1", &["u-1"])).await.expect("create");
        store.apply_transition(&first.id, &approve(), &user("u-1")).await.expect("terminal");

        let second = store.create_workflow(draft("rep-1", &["u-2"])).await.expect("second");

        let found = store
            .get_by_report(&ReportId("rep-1".to_string()))
            .await
            .expect("get by report")
            .expect("exists");
        assert_eq!(found.id, second.id);
        assert_eq!(found.status, WorkflowStatus::Pending);
    }

    #[tokio::test]
    async fn comments_and_information_requests_round_trip() {
        let store = setup().await;
        let created = store.create_workflow(draft("rep-1", &["u-1"])).await.expect("create");

        let root = store
            .add_comment(CommentDraft {
                workflow_id: created.id.clone(),
                parent_id: None,
                author_id: user("u-1"),
                content: "Numbers in section 3 look off.".to_string(),
                is_internal: false,
            })
            .await
            .expect("root comment");
        store
            .add_comment(CommentDraft {
                workflow_id: created.id.clone(),
                parent_id: Some(root.id.clone()),
                author_id: user("u-author"),
                content: "Fixed in the latest revision.".to_string(),
                is_internal: false,
            })
            .await
            .expect("reply");

        let comments = store.list_comments(&created.id).await.expect("list comments");
        assert_eq!(comments.len(), 2);
        assert_eq!(comments[1].parent_id, Some(root.id));

        store
            .add_information_request(InformationRequestDraft {
                workflow_id: created.id.clone(),
                from_user_id: user("u-1"),
                info: "Please attach the raw data export.".to_string(),
                deadline: None,
            })
            .await
            .expect("info request");

        let requests =
            store.list_information_requests(&created.id).await.expect("list info requests");
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].from_user_id, user("u-1"));

        // Side-channel writes never move the workflow.
        let loaded = store.get_by_id(&created.id).await.expect("get").expect("exists");
        assert_eq!(loaded.status, WorkflowStatus::Pending);
        assert_eq!(loaded.state_version, 1);
    }

    #[tokio::test]
    async fn malformed_stored_timestamps_are_decode_errors() {
        let store = setup().await;
        let created = store.create_workflow(draft("rep-1", &["u-1"])).await.expect("create");

        sqlx::query("UPDATE approval_workflow SET created_at = 'not-a-timestamp' WHERE id = ?")
            .bind(&created.id.0)
            .execute(store.pool())
            .await
            .expect("corrupt the stored row");

        let error = store.get_by_id(&created.id).await.expect_err("corrupt timestamp");
        assert!(matches!(error, StoreError::Decode(_)));

        // Optional columns are held to the same standard.
        sqlx::query("UPDATE approval_workflow SET created_at = ? WHERE id = ?")
            .bind(created.created_at.to_rfc3339())
            .bind(&created.id.0)
            .execute(store.pool())
            .await
            .expect("restore the workflow row");
        sqlx::query("UPDATE approval_step SET due_date = '2026-13-45' WHERE workflow_id = ?")
            .bind(&created.id.0)
            .execute(store.pool())
            .await
            .expect("corrupt the step row");

        let error = store.get_by_id(&created.id).await.expect_err("corrupt due date");
        assert!(matches!(error, StoreError::Decode(_)));
    }

    #[tokio::test]
    async fn blank_drafts_are_rejected() {
        let store = setup().await;

        let error = store.create_workflow(draft("rep-1", &[])).await.expect_err("no steps");
        assert!(matches!(error, StoreError::InvalidDraft(_)));

        let created = store.create_workflow(draft("rep-2", &["u-1"])).await.expect("create");
        let error = store
            .add_comment(CommentDraft {
                workflow_id: created.id.clone(),
                parent_id: None,
                author_id: user("u-1"),
                content: "   ".to_string(),
                is_internal: false,
            })
            .await
            .expect_err("blank comment");
        assert!(matches!(error, StoreError::InvalidDraft(_)));
    }

    #[tokio::test]
    async fn weighted_workflow_round_trips_decimal_weights() {
        let store = setup().await;
        let mut draft = draft("rep-1", &["u-1", "u-2"]);
        draft.required_weight = Some(Decimal::new(25, 1));
        draft.steps[0].approval_weight = Decimal::new(15, 1);
        draft.steps[1].approval_weight = Decimal::ONE;

        let created = store.create_workflow(draft).await.expect("create");
        let loaded = store.get_by_id(&created.id).await.expect("get").expect("exists");

        assert_eq!(loaded.required_weight, Some(Decimal::new(25, 1)));
        assert_eq!(loaded.steps[0].approval_weight, Decimal::new(15, 1));

        store.apply_transition(&created.id, &approve(), &user("u-1")).await.expect("step 1");
        let outcome =
            store.apply_transition(&created.id, &approve(), &user("u-2")).await.expect("step 2");
        assert_eq!(outcome.workflow.status, WorkflowStatus::Approved);
    }
}
