//! Building the responses written back to the http engine.
//!
//! Every response carries an explicit `Content-Length`; bodies are either JSON
//! (`application/json`), plain text (`text/plain`) or empty. Errors are always
//! rendered as `{"error": "<message>"}`.

use crate::body::ResponseBody;
use bytes::Bytes;
use http::header::{CONTENT_LENGTH, CONTENT_TYPE, LOCATION};
use http::{HeaderValue, Response, StatusCode};
use serde::Serialize;

const APPLICATION_JSON: &str = "application/json";
const TEXT_PLAIN: &str = "text/plain";

/// A JSON response with `status`.
pub fn json<T: Serialize + ?Sized>(status: StatusCode, body: &T) -> Result<Response<ResponseBody>, serde_json::Error> {
    let bytes = serde_json::to_vec(body)?;
    Ok(with_body(status, APPLICATION_JSON, Bytes::from(bytes)))
}

/// A plain text response with `status`.
pub fn text(status: StatusCode, text: impl Into<String>) -> Response<ResponseBody> {
    with_body(status, TEXT_PLAIN, Bytes::from(text.into()))
}

/// A `302 Found` pointing at `location`, with an empty body.
pub fn redirect(location: HeaderValue) -> Response<ResponseBody> {
    let mut response = empty(StatusCode::FOUND);
    response.headers_mut().insert(LOCATION, location);
    response
}

/// A response with `status` and no body.
pub fn empty(status: StatusCode) -> Response<ResponseBody> {
    let mut response = Response::new(ResponseBody::empty());
    *response.status_mut() = status;
    response.headers_mut().insert(CONTENT_LENGTH, HeaderValue::from(0_usize));
    response
}

/// The JSON error body `{"error": message}`.
pub fn error(status: StatusCode, message: impl AsRef<str>) -> Response<ResponseBody> {
    let body = serde_json::json!({ "error": message.as_ref() }).to_string();
    with_body(status, APPLICATION_JSON, Bytes::from(body))
}

fn with_body(status: StatusCode, content_type: &'static str, bytes: Bytes) -> Response<ResponseBody> {
    let length = bytes.len();
    let mut response = Response::new(ResponseBody::from(bytes));
    *response.status_mut() = status;

    let headers = response.headers_mut();
    headers.reserve(4);
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    headers.insert(CONTENT_LENGTH, HeaderValue::from(length));
    response
}
