use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use tracing::error;

use ladder_engine::LadderError;
use ladder_types::api::ErrorResponse;

/// A failed operation rendered as `{"error": ...}` with a matching status.
#[derive(Debug)]
pub struct ApiError(pub LadderError);

impl From<LadderError> for ApiError {
    fn from(err: LadderError) -> Self {
        Self(err)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self.0 {
            LadderError::Validation(_) => StatusCode::BAD_REQUEST,
            LadderError::Permission(_) => StatusCode::FORBIDDEN,
            LadderError::NotFound(_) => StatusCode::NOT_FOUND,
            LadderError::StateConflict(_) => StatusCode::CONFLICT,
            LadderError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self.0 {
            LadderError::Persistence(e) => {
                error!("Storage failure: {:#}", e);
                "Internal storage error".to_string()
            }
            other => other.to_string(),
        };
        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_errors_map_to_statuses() {
        let cases = [
            (LadderError::validation("x"), StatusCode::BAD_REQUEST),
            (LadderError::permission("x"), StatusCode::FORBIDDEN),
            (LadderError::not_found("x"), StatusCode::NOT_FOUND),
            (LadderError::conflict("x"), StatusCode::CONFLICT),
            (
                LadderError::Persistence(anyhow::anyhow!("disk full")),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError(err).status(), status);
        }
    }
}
