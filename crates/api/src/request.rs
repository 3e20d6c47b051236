//! Request handling module that provides access to HTTP request information.
//!
//! A [`RequestContext`] is created for every request that reached a handler. It owns
//! everything that belongs to that request:
//! - the request head (method, uri, headers)
//! - the path parameters captured by the router
//! - the query parameters
//! - the form fields of a `multipart/form-data` or `application/x-www-form-urlencoded` body
//! - the request body, read at most once and then memoized
//! - the single response the handler writes
//!
//! Form bodies are parsed while the context is built; any other body is read lazily
//! by [`RequestContext::receive`] or [`RequestContext::body_bytes`].

use crate::body::{RequestBody, ResponseBody};
use crate::error::RequestError;
use crate::multipart::{self, FormField, FormFields, MultipartError, MultipartParser};
use crate::responder;
use crate::router::PathParams;
use bytes::{Bytes, BytesMut};
use http::header::{AsHeaderName, CONTENT_TYPE};
use http::request::Parts;
use http::{HeaderMap, HeaderValue, Method, Request, Response, StatusCode, Uri, Version};
use http_body_util::BodyExt;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use tracing::debug;

/// How the body is decoded, picked from the request's `Content-Type`.
#[derive(Debug, Clone, PartialEq, Eq)]
enum BodyKind {
    Multipart { boundary: String },
    UrlEncoded,
    /// JSON, or anything else that is read as JSON on a best-effort basis.
    Raw,
}

enum BodyState {
    Pending(RequestBody),
    Buffered(Bytes),
}

/// The per-request view handed to a handler.
pub struct RequestContext {
    head: Parts,
    path_params: PathParams,
    query_params: Vec<(String, String)>,
    kind: BodyKind,
    form_data: FormFields,
    body: BodyState,
    parsed_body: Option<Value>,
    max_body_size: usize,
    response: Option<Response<ResponseBody>>,
}

impl RequestContext {
    /// Builds the context for `request`.
    ///
    /// Form bodies are read and parsed here, so a malformed multipart body fails the
    /// construction instead of surfacing later in the handler.
    pub async fn new(
        request: Request<RequestBody>,
        path_params: PathParams,
        max_body_size: usize,
    ) -> Result<Self, RequestError> {
        let (head, body) = request.into_parts();
        let query_params = parse_query(head.uri.query())?;
        let kind = body_kind(&head.headers)?;

        let mut ctx = Self {
            head,
            path_params,
            query_params,
            kind,
            form_data: FormFields::new(),
            body: BodyState::Pending(body),
            parsed_body: None,
            max_body_size,
            response: None,
        };

        match ctx.kind.clone() {
            BodyKind::Multipart { boundary } => ctx.read_multipart(boundary).await?,
            BodyKind::UrlEncoded => ctx.read_urlencoded().await?,
            BodyKind::Raw => {}
        }

        Ok(ctx)
    }

    /// Returns the HTTP method of the request
    pub fn method(&self) -> &Method {
        &self.head.method
    }

    /// Returns the path of the request, without the query string
    pub fn path(&self) -> &str {
        self.head.uri.path()
    }

    /// Returns the URI of the request
    pub fn uri(&self) -> &Uri {
        &self.head.uri
    }

    /// Returns the HTTP version of the request
    pub fn version(&self) -> Version {
        self.head.version
    }

    /// Returns the HTTP headers of the request
    pub fn headers(&self) -> &HeaderMap {
        &self.head.headers
    }

    /// Returns the first value of header `name`, if it is valid visible ASCII.
    pub fn header<K: AsHeaderName>(&self, name: K) -> Option<&str> {
        self.head.headers.get(name).and_then(|value| value.to_str().ok())
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header(CONTENT_TYPE)
    }

    /// Returns the path parameters captured by the matched route
    pub fn path_params(&self) -> &PathParams {
        &self.path_params
    }

    pub fn path_param(&self, name: &str) -> Option<&str> {
        self.path_params.get(name)
    }

    /// Decoded query parameters in the order they were sent.
    pub fn query_params(&self) -> &[(String, String)] {
        &self.query_params
    }

    /// Path, query and form parameters merged into one map.
    ///
    /// On a name collision query parameters override path parameters, and form
    /// fields override both.
    pub fn parameters(&self) -> HashMap<String, String> {
        let mut merged = HashMap::with_capacity(self.path_params.len() + self.query_params.len() + self.form_data.len());

        for (name, value) in self.path_params.iter() {
            merged.insert(name.to_owned(), value.to_owned());
        }
        for (name, value) in &self.query_params {
            merged.insert(name.clone(), value.clone());
        }
        for (name, field) in &self.form_data {
            merged.insert(name.clone(), field.value.clone());
        }

        merged
    }

    /// Looks up a single parameter with the same precedence as [`Self::parameters`].
    pub fn parameter(&self, name: &str) -> Option<&str> {
        if let Some(field) = self.form_data.get(name) {
            return Some(&field.value);
        }
        if let Some((_, value)) = self.query_params.iter().rev().find(|(key, _)| key == name) {
            return Some(value);
        }
        self.path_params.get(name)
    }

    /// One form field of a multipart or url-encoded body.
    pub fn form_field(&self, name: &str) -> Option<&FormField> {
        self.form_data.get(name)
    }

    /// All form fields; empty when the body wasn't a form.
    pub fn form_fields(&self) -> &FormFields {
        &self.form_data
    }

    /// Reads the whole body, once. Later calls return the same bytes.
    pub async fn body_bytes(&mut self) -> Result<Bytes, RequestError> {
        if let BodyState::Buffered(bytes) = &self.body {
            return Ok(bytes.clone());
        }
        let mut body = self.take_pending();
        let mut buf = BytesMut::new();

        while let Some(frame) = body.frame().await {
            let frame = frame.map_err(RequestError::Body)?;
            let Ok(data) = frame.into_data() else {
                continue;
            };
            if buf.len() + data.len() > self.max_body_size {
                return Err(RequestError::PayloadTooLarge { limit: self.max_body_size });
            }
            buf.extend_from_slice(&data);
        }

        let bytes = buf.freeze();
        debug!(length = bytes.len(), "read request body");
        self.body = BodyState::Buffered(bytes.clone());
        Ok(bytes)
    }

    /// Decodes the body as `T`.
    ///
    /// The body is decoded into a JSON document the first time and memoized; every
    /// call deserializes `T` from that document, so the stream is never read twice.
    /// Form bodies are first turned into a flat `{"field": "value"}` object, which
    /// makes this method independent of the content type.
    pub async fn receive<T: DeserializeOwned>(&mut self) -> Result<T, RequestError> {
        let document = match self.parsed_body.take() {
            Some(document) => document,
            None => self.decode_body().await?,
        };

        let decoded = T::deserialize(&document).map_err(RequestError::MalformedRequest);
        self.parsed_body = Some(document);
        decoded
    }

    /// Writes `body` as JSON with `status`.
    pub fn respond<T: Serialize + ?Sized>(&mut self, status: StatusCode, body: &T) -> Result<(), RequestError> {
        self.ensure_not_responded()?;
        let response = responder::json(status, body).map_err(RequestError::Serialize)?;
        self.commit(response)
    }

    /// Writes `text` as `text/plain` with `status`.
    pub fn respond_text(&mut self, status: StatusCode, text: impl Into<String>) -> Result<(), RequestError> {
        self.ensure_not_responded()?;
        self.commit(responder::text(status, text))
    }

    /// Writes `status` with an empty body.
    pub fn respond_status(&mut self, status: StatusCode) -> Result<(), RequestError> {
        self.ensure_not_responded()?;
        self.commit(responder::empty(status))
    }

    /// Redirects to `location` with `302 Found`.
    pub fn redirect(&mut self, location: &str) -> Result<(), RequestError> {
        self.ensure_not_responded()?;
        let location =
            HeaderValue::try_from(location).map_err(|_| RequestError::InvalidLocation(location.to_owned()))?;
        self.commit(responder::redirect(location))
    }

    /// Returns true once one of the `respond*` methods succeeded.
    pub fn has_responded(&self) -> bool {
        self.response.is_some()
    }

    pub(crate) fn take_response(&mut self) -> Option<Response<ResponseBody>> {
        self.response.take()
    }

    fn ensure_not_responded(&self) -> Result<(), RequestError> {
        if self.response.is_some() {
            return Err(RequestError::AlreadyResponded);
        }
        Ok(())
    }

    fn commit(&mut self, response: Response<ResponseBody>) -> Result<(), RequestError> {
        debug!(status = response.status().as_u16(), "response committed");
        self.response = Some(response);
        Ok(())
    }

    fn take_pending(&mut self) -> RequestBody {
        match std::mem::replace(&mut self.body, BodyState::Buffered(Bytes::new())) {
            BodyState::Pending(body) => body,
            BodyState::Buffered(bytes) => crate::body::full_body(bytes),
        }
    }

    async fn decode_body(&mut self) -> Result<Value, RequestError> {
        match self.kind {
            BodyKind::Multipart { .. } | BodyKind::UrlEncoded => Ok(Value::Object(
                self.form_data.iter().map(|(name, field)| (name.clone(), Value::String(field.value.clone()))).collect(),
            )),
            BodyKind::Raw => {
                let bytes = self.body_bytes().await?;
                serde_json::from_slice(&bytes).map_err(RequestError::MalformedRequest)
            }
        }
    }

    async fn read_multipart(&mut self, boundary: String) -> Result<(), RequestError> {
        let mut body = self.take_pending();
        let mut parser = MultipartParser::new(boundary);
        let mut raw = BytesMut::new();

        while let Some(frame) = body.frame().await {
            let frame = frame.map_err(RequestError::Body)?;
            let Ok(data) = frame.into_data() else {
                continue;
            };
            if raw.len() + data.len() > self.max_body_size {
                return Err(RequestError::PayloadTooLarge { limit: self.max_body_size });
            }
            parser.feed(&data)?;
            raw.extend_from_slice(&data);
        }

        self.form_data = parser.finish()?;
        self.body = BodyState::Buffered(raw.freeze());
        debug!(fields = self.form_data.len(), "parsed multipart body");
        Ok(())
    }

    async fn read_urlencoded(&mut self) -> Result<(), RequestError> {
        let bytes = self.body_bytes().await?;
        let pairs = serde_urlencoded::from_bytes::<Vec<(String, String)>>(&bytes).map_err(RequestError::MalformedForm)?;
        self.form_data = pairs.into_iter().map(|(name, value)| (name, FormField::text(value))).collect();
        Ok(())
    }
}

impl fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestContext")
            .field("method", &self.head.method)
            .field("uri", &self.head.uri)
            .field("path_params", &self.path_params)
            .field("query_params", &self.query_params)
            .field("form_fields", &self.form_data.len())
            .field("responded", &self.response.is_some())
            .finish_non_exhaustive()
    }
}

fn parse_query(query: Option<&str>) -> Result<Vec<(String, String)>, RequestError> {
    match query {
        None | Some("") => Ok(Vec::new()),
        Some(query) => serde_urlencoded::from_str(query).map_err(RequestError::MalformedQuery),
    }
}

fn body_kind(headers: &HeaderMap) -> Result<BodyKind, RequestError> {
    let Some(content_type) = headers.get(CONTENT_TYPE).and_then(|value| value.to_str().ok()) else {
        return Ok(BodyKind::Raw);
    };
    let Ok(mime) = content_type.parse::<mime::Mime>() else {
        if content_type.trim_start().to_ascii_lowercase().starts_with("multipart/") {
            return Err(MultipartError::InvalidContentType(content_type.to_owned()).into());
        }
        return Ok(BodyKind::Raw);
    };

    if mime.type_() == mime::MULTIPART && mime.subtype() == mime::FORM_DATA {
        let boundary = multipart::boundary_of(content_type)?;
        return Ok(BodyKind::Multipart { boundary });
    }
    if mime.type_() == mime::APPLICATION && mime.subtype() == mime::WWW_FORM_URLENCODED {
        return Ok(BodyKind::UrlEncoded);
    }
    Ok(BodyKind::Raw)
}
