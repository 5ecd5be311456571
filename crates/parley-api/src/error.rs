use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tracing::error;

use parley_gateway::engine::EngineError;
use parley_store::StoreError;

/// Maps engine failures onto the HTTP surface. The socket transport drops
/// the same failures silently; only the observability differs.
pub struct ApiError(EngineError);

pub type ApiResult<T> = Result<T, ApiError>;

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        Self(err)
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        Self(EngineError::Storage(err))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self.0 {
            EngineError::Validation(msg) => (StatusCode::BAD_REQUEST, (*msg).to_string()),
            EngineError::NotFound(entity) => {
                (StatusCode::NOT_FOUND, format!("{entity} not found"))
            }
            EngineError::Forbidden(msg) => (StatusCode::FORBIDDEN, (*msg).to_string()),
            EngineError::Storage(e) => {
                error!("storage failure: {e}");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string())
            }
        };
        (status, Json(serde_json::json!({ "message": message }))).into_response()
    }
}
