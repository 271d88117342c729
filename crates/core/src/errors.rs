use thiserror::Error;

use crate::domain::workflow::WorkflowStatus;

/// Failures produced by the transition engine itself. Every variant is
/// terminal for the call that raised it and leaves the workflow untouched.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum EngineError {
    #[error("user `{actor}` may not act on step {step_order}")]
    Unauthorized { actor: String, step_order: u32 },
    #[error("invalid transition `{operation}` from {status:?}: {detail}")]
    InvalidTransition { status: WorkflowStatus, operation: &'static str, detail: String },
    #[error("step {step_order} is already completed")]
    AlreadyCompleted { step_order: u32 },
    #[error("validation failed: {message}")]
    ValidationFailed { message: String },
    #[error("{entity} `{id}` not found")]
    NotFound { entity: &'static str, id: String },
}

/// Caller-facing error surface. Every variant carries the correlation id
/// of the request that failed; `user_message` is safe to show end users.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("unauthorized: {message}")]
    Unauthorized { message: String, correlation_id: String },
    #[error("conflict: {message}")]
    Conflict { message: String, correlation_id: String },
    #[error("bad request: {message}")]
    BadRequest { message: String, correlation_id: String },
    #[error("not found: {message}")]
    NotFound { message: String, correlation_id: String },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { message: String, correlation_id: String },
    #[error("internal error: {message}")]
    Internal { message: String, correlation_id: String },
}

impl InterfaceError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Unauthorized { .. } => "You are not authorized to act on this review step.",
            Self::Conflict { .. } => {
                "This step was already completed by a concurrent request. Reload and retry."
            }
            Self::BadRequest { .. } => {
                "The request could not be processed. Check inputs and try again."
            }
            Self::NotFound { .. } => "The requested workflow, step, or report does not exist.",
            Self::ServiceUnavailable { .. } => {
                "The service is temporarily unavailable. Please retry shortly."
            }
            Self::Internal { .. } => "An unexpected internal error occurred.",
        }
    }

    pub fn correlation_id(&self) -> &str {
        match self {
            Self::Unauthorized { correlation_id, .. }
            | Self::Conflict { correlation_id, .. }
            | Self::BadRequest { correlation_id, .. }
            | Self::NotFound { correlation_id, .. }
            | Self::ServiceUnavailable { correlation_id, .. }
            | Self::Internal { correlation_id, .. } => correlation_id,
        }
    }
}

impl EngineError {
    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let message = self.to_string();
        match self {
            Self::Unauthorized { .. } => InterfaceError::Unauthorized { message, correlation_id },
            Self::AlreadyCompleted { .. } => InterfaceError::Conflict { message, correlation_id },
            Self::InvalidTransition { .. } | Self::ValidationFailed { .. } => {
                InterfaceError::BadRequest { message, correlation_id }
            }
            Self::NotFound { .. } => InterfaceError::NotFound { message, correlation_id },
        }
    }
}
