use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::step::StepAction;
use crate::domain::workflow::ApprovalWorkflow;

/// Snapshot of the weighted-approval aggregate for one workflow.
///
/// Skipped steps are excluded from both sides of the quorum: they
/// contribute nothing to `approved_weight` and nothing to `total_weight`,
/// so skipping can never push a workflow over its threshold.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeightedApproval {
    pub approved_weight: Decimal,
    pub total_weight: Decimal,
    pub required_weight: Decimal,
    pub is_approved: bool,
}

/// Compute the weighted-approval state from the step rows alone. Pure and
/// idempotent: calling it twice on the same workflow yields the same
/// snapshot, and it never writes anything back.
pub fn weighted_approval(workflow: &ApprovalWorkflow) -> WeightedApproval {
    let mut approved_weight = Decimal::ZERO;
    let mut total_weight = Decimal::ZERO;

    for step in &workflow.steps {
        if step.action == Some(StepAction::Skip) {
            continue;
        }
        total_weight += step.approval_weight;
        if step.is_completed && step.action == Some(StepAction::Approve) {
            approved_weight += step.approval_weight;
        }
    }

    // No explicit threshold means unanimity over the non-skipped steps.
    let required_weight = workflow.required_weight.unwrap_or(total_weight);
    let is_approved = total_weight > Decimal::ZERO && approved_weight >= required_weight;

    WeightedApproval { approved_weight, total_weight, required_weight, is_approved }
}
