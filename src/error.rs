use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use jsonwebtoken::errors::ErrorKind;
use serde_json::json;
use thiserror::Error;
use tracing::error;

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Missing bearer token")]
    MissingToken,
    #[error("Malformed Authorization header")]
    MalformedHeader,
    #[error("Invalid token")]
    InvalidToken,
    #[error("Token expired")]
    ExpiredToken,
    #[error("Token subject is not a user id")]
    InvalidSubject,
}

#[derive(Error, Debug)]
pub enum PollError {
    #[error("Unauthorized: {0}")]
    Unauthorized(#[from] AuthError),
    #[error("Forbidden")]
    Forbidden,
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Poll not found")]
    PollNotFound,
    #[error("Invalid option for this poll")]
    OptionNotFound,
    #[error("Poll is closed")]
    PollClosed,
    #[error("You've already voted on this poll")]
    AlreadyVoted,
    #[error("Database error: {0}")]
    DatabaseError(String),
}

impl PollError {
    pub fn invalid(message: impl Into<String>) -> Self {
        PollError::InvalidRequest(message.into())
    }

    fn status(&self) -> StatusCode {
        match self {
            PollError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            PollError::Forbidden => StatusCode::FORBIDDEN,
            PollError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            PollError::PollNotFound => StatusCode::NOT_FOUND,
            PollError::OptionNotFound => StatusCode::BAD_REQUEST,
            PollError::PollClosed => StatusCode::CONFLICT,
            PollError::AlreadyVoted => StatusCode::CONFLICT,
            PollError::DatabaseError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for PollError {
    fn into_response(self) -> Response {
        let status = self.status();
        let error_message = match &self {
            PollError::Unauthorized(_) => "Unauthorized",
            PollError::Forbidden => "Forbidden",
            PollError::InvalidRequest(_) => "Invalid request",
            PollError::PollNotFound => "Poll not found",
            PollError::OptionNotFound => "Invalid option",
            PollError::PollClosed => "Poll is closed",
            PollError::AlreadyVoted => "Already voted",
            // Store details stay in the logs.
            PollError::DatabaseError(_) => "Internal server error",
        };
        let details = match &self {
            PollError::DatabaseError(msg) => {
                error!("Request failed on the store: {}", msg);
                error_message.to_string()
            }
            other => other.to_string(),
        };

        let body = Json(json!({
            "error": error_message,
            "details": details
        }));

        (status, body).into_response()
    }
}

impl From<sqlx::Error> for PollError {
    fn from(error: sqlx::Error) -> Self {
        PollError::DatabaseError(error.to_string())
    }
}

impl From<jsonwebtoken::errors::Error> for AuthError {
    fn from(error: jsonwebtoken::errors::Error) -> Self {
        match error.kind() {
            ErrorKind::ExpiredSignature => AuthError::ExpiredToken,
            _ => AuthError::InvalidToken,
        }
    }
}
