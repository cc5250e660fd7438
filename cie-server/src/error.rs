//! API错误响应

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use cie_core::IntegrationError;
use serde_json::json;
use tracing::error;

/// 处理器返回的错误，响应体为 `{ "error": kind, "message": text }`
#[derive(Debug)]
pub struct ApiError(pub IntegrationError);

pub type ApiResult<T> = std::result::Result<T, ApiError>;

impl From<IntegrationError> for ApiError {
    fn from(error: IntegrationError) -> Self {
        Self(error)
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(error: anyhow::Error) -> Self {
        Self(IntegrationError::Internal(format!("{:#}", error)))
    }
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match &self.0 {
            IntegrationError::NotFound { .. } => StatusCode::NOT_FOUND,
            IntegrationError::BadRequest(_)
            | IntegrationError::Validation(_)
            | IntegrationError::InvalidStateTransition { .. }
            | IntegrationError::UnknownStepType(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!("Request failed: {}", self.0);
        }

        let body = Json(json!({
            "error": self.0.kind(),
            "message": self.0.to_string(),
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (IntegrationError::not_found("ExternalSystem", "x"), StatusCode::NOT_FOUND),
            (IntegrationError::BadRequest("x".into()), StatusCode::BAD_REQUEST),
            (IntegrationError::UnknownStepType("x".into()), StatusCode::BAD_REQUEST),
            (
                IntegrationError::InvalidStateTransition {
                    from: "Active".into(),
                    event: "Activate".into(),
                },
                StatusCode::BAD_REQUEST,
            ),
            (IntegrationError::ProbeFailure("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
            (IntegrationError::Internal("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (error, expected) in cases {
            assert_eq!(ApiError::from(error).status_code(), expected);
        }
    }
}
