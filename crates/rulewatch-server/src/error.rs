use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use rulewatch_core::error::RulewatchError;

/// Stable client-facing message for conditions that fail to parse. The
/// parser's own message goes in the `detail` field.
pub const INVALID_CONDITION: &str = "invalid condition syntax";

// ---------------------------------------------------------------------------
// AppError: unified error type for HTTP responses
// ---------------------------------------------------------------------------

/// Unified error type for HTTP responses.
#[derive(Debug)]
pub struct AppError(pub anyhow::Error);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let Some(e) = self.0.downcast_ref::<RulewatchError>() else {
            tracing::error!(error = %self.0, "request failed");
            let body = serde_json::json!({ "error": self.0.to_string() });
            return (StatusCode::INTERNAL_SERVER_ERROR, axum::Json(body)).into_response();
        };

        let (status, body) = match e {
            RulewatchError::MissingField => (
                StatusCode::BAD_REQUEST,
                serde_json::json!({ "error": e.to_string() }),
            ),
            RulewatchError::InvalidCondition(detail) => (
                StatusCode::BAD_REQUEST,
                serde_json::json!({ "error": INVALID_CONDITION, "detail": detail.to_string() }),
            ),
            RulewatchError::RuleExists(_) => (
                StatusCode::CONFLICT,
                serde_json::json!({ "error": e.to_string() }),
            ),
            RulewatchError::ConfigNotFound(_)
            | RulewatchError::Io(_)
            | RulewatchError::Yaml(_)
            | RulewatchError::Json(_) => {
                tracing::error!(error = %e, "request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    serde_json::json!({ "error": e.to_string() }),
                )
            }
        };
        (status, axum::Json(body)).into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}
