use crate::core::ActionError;
use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

#[derive(Debug)]
pub enum HttpError {
    Action(ActionError),
    Unauthorized(String),
    Input(String),
    NotFound(String),
}

impl From<ActionError> for HttpError {
    fn from(err: ActionError) -> Self {
        HttpError::Action(err)
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let (status, message, code) = match self {
            HttpError::Action(ActionError::Validation(msg)) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                msg,
                "validation_error".to_string(),
            ),
            HttpError::Action(ActionError::NotFound(msg)) => {
                (StatusCode::NOT_FOUND, msg, "not_found".to_string())
            }
            HttpError::Action(err @ ActionError::MissingActionHandler { .. }) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                err.to_string(),
                "missing_action_handler".to_string(),
            ),
            HttpError::Action(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                err.to_string(),
                "action_error".to_string(),
            ),

            HttpError::Unauthorized(msg) => {
                (StatusCode::UNAUTHORIZED, msg, "unauthorized".to_string())
            }
            HttpError::Input(msg) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                msg,
                "input_error".to_string(),
            ),
            HttpError::NotFound(msg) => (StatusCode::NOT_FOUND, msg, "not_found".to_string()),
        };

        let body = Json(ErrorResponse {
            error: message,
            code,
        });

        (status, body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, HttpError>;
