pub mod config;
pub mod domain;
pub mod engine;
pub mod errors;
pub mod identity;
pub mod notify;

pub use chrono;
pub use rust_decimal;

pub use domain::comment::{Comment, CommentId};
pub use domain::history::{StatusHistory, StatusHistoryId};
pub use domain::information::{InformationRequest, InformationRequestId};
pub use domain::step::{ApprovalStep, StepAction, StepId};
pub use domain::workflow::{
    ApprovalWorkflow, ProjectId, ReportId, UserId, WorkflowId, WorkflowStatus,
};
pub use engine::weighted::WeightedApproval;
pub use engine::{ReviewAction, TransitionOutcome, TransitionRequest};
pub use errors::{EngineError, InterfaceError};
pub use identity::{IdentityError, IdentityGateway, InMemoryIdentityGateway, Principal};
pub use notify::{InMemoryNotificationHook, NotificationEvent, NotificationHook};
