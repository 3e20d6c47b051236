use crate::body::BoxError;
use crate::multipart::MultipartError;
use http::StatusCode;
use thiserror::Error;

/// Errors raised while reading a request or writing its response.
///
/// Each variant maps to the status code the client sees when the error reaches
/// the dispatcher.
#[derive(Error, Debug)]
pub enum RequestError {
    #[error("failed to read request body: {0}")]
    Body(#[source] BoxError),

    #[error("request body is larger than {limit} bytes")]
    PayloadTooLarge { limit: usize },

    #[error("malformed request body: {0}")]
    MalformedRequest(#[source] serde_json::Error),

    #[error("malformed multipart body: {0}")]
    MalformedMultipart(#[from] MultipartError),

    #[error("malformed form body: {0}")]
    MalformedForm(#[source] serde_urlencoded::de::Error),

    #[error("malformed query string: {0}")]
    MalformedQuery(#[source] serde_urlencoded::de::Error),

    #[error("invalid redirect location: {0}")]
    InvalidLocation(String),

    #[error("failed to serialize response body: {0}")]
    Serialize(#[source] serde_json::Error),

    #[error("a response has already been written for this request")]
    AlreadyResponded,
}

impl RequestError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            RequestError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            RequestError::MalformedRequest(_)
            | RequestError::MalformedMultipart(_)
            | RequestError::MalformedForm(_)
            | RequestError::MalformedQuery(_) => StatusCode::BAD_REQUEST,
            RequestError::Body(_)
            | RequestError::InvalidLocation(_)
            | RequestError::Serialize(_)
            | RequestError::AlreadyResponded => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
