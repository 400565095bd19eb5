use crate::directory::DirectoryError;
use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

impl DirectoryError {
    pub fn status(&self) -> StatusCode {
        match self {
            DirectoryError::InvalidCredentials | DirectoryError::Inactive => {
                StatusCode::BAD_REQUEST
            }
            DirectoryError::Unauthenticated => StatusCode::UNAUTHORIZED,
            DirectoryError::Forbidden(_) => StatusCode::FORBIDDEN,
            DirectoryError::NotFound(_) => StatusCode::NOT_FOUND,
            DirectoryError::Conflict(_) => StatusCode::CONFLICT,
            DirectoryError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            DirectoryError::DataIntegrity(_) | DirectoryError::Store(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for DirectoryError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            DirectoryError::DataIntegrity(_) | DirectoryError::Store(_) => {
                tracing::error!("Request failed: {:#}", self);
                "Internal server error".to_string()
            }
            other => other.to_string(),
        };

        let mut response = (status, Json(json!({ "error": message }))).into_response();
        if status == StatusCode::UNAUTHORIZED {
            response
                .headers_mut()
                .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
        }
        response
    }
}
