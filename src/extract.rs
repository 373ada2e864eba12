use crate::error::PollError;
use axum::extract::rejection::{JsonRejection, PathRejection};
use axum::extract::{FromRequest, FromRequestParts};

/// `Path` whose rejection answers with the usual JSON error body.
#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Path), rejection(PollError))]
pub struct PollPath<T>(pub T);

/// `Json` whose rejection answers with the usual JSON error body.
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(PollError))]
pub struct JsonBody<T>(pub T);

impl From<PathRejection> for PollError {
    fn from(rejection: PathRejection) -> Self {
        PollError::InvalidRequest(rejection.body_text())
    }
}

impl From<JsonRejection> for PollError {
    fn from(rejection: JsonRejection) -> Self {
        PollError::InvalidRequest(rejection.body_text())
    }
}
