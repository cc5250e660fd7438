//! 错误定义模块

use thiserror::Error;

/// 集成引擎统一错误类型
#[derive(Error, Debug)]
pub enum IntegrationError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Unknown workflow step type: {0}")]
    UnknownStepType(String),

    #[error("Step {step_id} failed: {message}")]
    StepFailed { step_id: String, message: String },

    #[error("Connectivity probe failed: {0}")]
    ProbeFailure(String),

    #[error("Invalid state transition: from {from} on {event}")]
    InvalidStateTransition { from: String, event: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntegrationError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// 错误类别标识，用于执行记录和API响应
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::BadRequest(_) => "bad_request",
            Self::Validation(_) => "validation_error",
            Self::UnknownStepType(_) => "unknown_step_type",
            Self::StepFailed { .. } => "step_failed",
            Self::ProbeFailure(_) => "probe_failure",
            Self::InvalidStateTransition { .. } => "invalid_state_transition",
            Self::Config(_) => "config_error",
            Self::Serialization(_) => "serialization_error",
            Self::Internal(_) => "internal_error",
        }
    }

    /// 是否属于调用方错误（4xx语义）
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::NotFound { .. }
                | Self::BadRequest(_)
                | Self::Validation(_)
                | Self::UnknownStepType(_)
                | Self::InvalidStateTransition { .. }
        )
    }
}

/// 集成引擎统一结果类型
pub type Result<T> = std::result::Result<T, IntegrationError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_names_the_id() {
        let err = IntegrationError::not_found("ExternalSystem", "sys-42");
        assert_eq!(err.to_string(), "ExternalSystem not found: sys-42");
        assert_eq!(err.kind(), "not_found");
        assert!(err.is_client_error());
    }

    #[test]
    fn test_server_side_errors() {
        assert!(!IntegrationError::Internal("boom".to_string()).is_client_error());
        assert!(!IntegrationError::ProbeFailure("timeout".to_string()).is_client_error());
    }
}
