//! `multipart/form-data` parsing.
//!
//! The parser is a line-oriented state machine. Bytes are fed in arbitrary chunks,
//! split on `\n` (a trailing `\r` is dropped), and every complete line drives one
//! transition:
//!
//! ```text
//!  Idle ──boundary──▶ AwaitingHeaders ──blank line──▶ ReadingField
//!   ▲                        ▲                              │
//!   │                        └──────────boundary────────────┘
//!   └──────────closing boundary (`--token--`)───────────────┘
//! ```
//!
//! A field is flushed into the result when the next boundary line is seen, or when
//! input ends while a field is still open. Field values are decoded as UTF-8 and
//! lose their trailing whitespace.

use bytes::{Buf, Bytes, BytesMut};
use serde::Serialize;
use std::collections::HashMap;
use thiserror::Error;

/// Parsed form fields keyed by field name.
pub type FormFields = HashMap<String, FormField>;

/// One named part of a form body.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FormField {
    pub value: String,
    pub file_name: Option<String>,
    pub content_type: Option<String>,
    /// Raw part bytes. The text based parser never fills this in.
    #[serde(skip)]
    pub raw_data: Option<Bytes>,
}

impl FormField {
    /// A plain text field with no file metadata.
    pub fn text(value: impl Into<String>) -> Self {
        Self { value: value.into(), ..Self::default() }
    }

    /// Returns true if the part was sent with a `filename`.
    pub fn is_file(&self) -> bool {
        self.file_name.is_some()
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MultipartError {
    #[error("multipart content type has no boundary")]
    MissingBoundary,

    #[error("content type '{0}' is not multipart/form-data")]
    NotMultipart(String),

    #[error("malformed multipart content type '{0}'")]
    InvalidContentType(String),

    #[error("Content-Disposition has no name: {line}")]
    MissingName { line: String },

    #[error("unterminated quoted value in Content-Disposition: {line}")]
    UnterminatedQuote { line: String },

    #[error("part has no Content-Disposition header")]
    MissingDisposition,
}

/// Extracts the boundary token from a `multipart/form-data` content type.
pub fn boundary_of(content_type: &str) -> Result<String, MultipartError> {
    let mime = content_type
        .parse::<mime::Mime>()
        .map_err(|_| MultipartError::NotMultipart(content_type.to_owned()))?;

    if mime.type_() != mime::MULTIPART || mime.subtype() != mime::FORM_DATA {
        return Err(MultipartError::NotMultipart(content_type.to_owned()));
    }

    match mime.get_param(mime::BOUNDARY) {
        Some(boundary) => match boundary.as_str().trim_matches('"') {
            "" => Err(MultipartError::MissingBoundary),
            boundary => Ok(boundary.to_owned()),
        },
        None => Err(MultipartError::MissingBoundary),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    AwaitingHeaders,
    ReadingField,
}

#[derive(Debug, Default)]
struct OpenField {
    name: Option<String>,
    file_name: Option<String>,
    content_type: Option<String>,
    value: String,
}

/// Incremental `multipart/form-data` parser.
///
/// # Example
/// ```
/// use micro_api::multipart::MultipartParser;
///
/// let mut parser = MultipartParser::new("XyZ");
/// parser.feed(b"--XyZ\r\nContent-Disposition: form-data; name=\"name\"\r\n\r\nAlice\r\n").unwrap();
/// parser.feed(b"--XyZ--\r\n").unwrap();
///
/// let fields = parser.finish().unwrap();
/// assert_eq!(fields["name"].value, "Alice");
/// ```
#[derive(Debug)]
pub struct MultipartParser {
    delimiter: String,
    closing: String,
    state: State,
    field: OpenField,
    buf: BytesMut,
    fields: FormFields,
}

impl MultipartParser {
    pub fn new(boundary: impl AsRef<str>) -> Self {
        let delimiter = format!("--{}", boundary.as_ref());
        let closing = format!("{delimiter}--");
        Self {
            delimiter,
            closing,
            state: State::Idle,
            field: OpenField::default(),
            buf: BytesMut::new(),
            fields: FormFields::new(),
        }
    }

    /// Parses a complete body in one go.
    pub fn parse(body: &[u8], boundary: impl AsRef<str>) -> Result<FormFields, MultipartError> {
        let mut parser = Self::new(boundary);
        parser.feed(body)?;
        parser.finish()
    }

    /// Feeds the next chunk of the body. Chunks may split lines anywhere.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<(), MultipartError> {
        self.buf.extend_from_slice(chunk);

        while let Some(newline) = self.buf.iter().position(|b| *b == b'\n') {
            let mut line = self.buf.split_to(newline + 1);
            line.truncate(newline);
            if line.last() == Some(&b'\r') {
                line.truncate(newline - 1);
            }
            self.on_line(&String::from_utf8_lossy(&line))?;
        }

        Ok(())
    }

    /// Ends the input, flushing a field that is still open.
    pub fn finish(mut self) -> Result<FormFields, MultipartError> {
        if self.buf.has_remaining() {
            let rest = self.buf.split();
            self.on_line(&String::from_utf8_lossy(&rest))?;
        }
        self.flush();
        Ok(self.fields)
    }

    fn on_line(&mut self, line: &str) -> Result<(), MultipartError> {
        if line.starts_with(&self.delimiter) {
            self.flush();
            self.state = if line.trim_end() == self.closing { State::Idle } else { State::AwaitingHeaders };
            return Ok(());
        }

        match self.state {
            State::Idle => {}
            State::AwaitingHeaders => self.on_header(line)?,
            State::ReadingField => {
                self.field.value.push_str(line);
                self.field.value.push('\n');
            }
        }
        Ok(())
    }

    fn on_header(&mut self, line: &str) -> Result<(), MultipartError> {
        if line.trim().is_empty() {
            if self.field.name.is_none() {
                return Err(MultipartError::MissingDisposition);
            }
            self.state = State::ReadingField;
            return Ok(());
        }

        let Some((name, value)) = line.split_once(':') else {
            return Ok(());
        };

        if name.trim().eq_ignore_ascii_case("content-disposition") {
            let field_name = disposition_param(line, "name")?
                .ok_or_else(|| MultipartError::MissingName { line: line.to_owned() })?;
            self.field.name = Some(field_name.to_owned());
            self.field.file_name = disposition_param(line, "filename")?.map(str::to_owned);
        } else if name.trim().eq_ignore_ascii_case("content-type") {
            self.field.content_type = Some(value.trim().to_owned());
        }

        Ok(())
    }

    fn flush(&mut self) {
        let field = std::mem::take(&mut self.field);
        if let Some(name) = field.name {
            let value = field.value.trim_end().to_owned();
            self.fields.insert(
                name,
                FormField { value, file_name: field.file_name, content_type: field.content_type, raw_data: None },
            );
        }
    }
}

/// Finds `key="value"` in a disposition header line.
///
/// The key only counts when it starts a token, so looking up `name` never
/// picks up the tail of `filename`.
fn disposition_param<'a>(line: &'a str, key: &str) -> Result<Option<&'a str>, MultipartError> {
    let needle = format!("{key}=\"");
    let mut from = 0;

    while let Some(found) = line[from..].find(&needle) {
        let start = from + found;
        let starts_token = line[..start].chars().next_back().is_none_or(|c| c == ';' || c.is_whitespace());
        if starts_token {
            let value_start = start + needle.len();
            return match line[value_start..].find('"') {
                Some(end) => Ok(Some(&line[value_start..value_start + end])),
                None => Err(MultipartError::UnterminatedQuote { line: line.to_owned() }),
            };
        }
        from = start + needle.len();
    }

    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::{FormField, MultipartError, MultipartParser, boundary_of};
    use bytes::Bytes;
    use indoc::indoc;
    use std::collections::HashSet;

    const UPLOAD: &str = indoc! {r#"
        --XyZ
        Content-Disposition: form-data; name="name"

        Alice
        --XyZ
        Content-Disposition: form-data; name="file"; filename="a.txt"
        Content-Type: text/plain

        hello
        world

        --XyZ--
    "#};

    #[test]
    fn test_parse_text_and_file_fields() {
        let fields = MultipartParser::parse(UPLOAD.as_bytes(), "XyZ").unwrap();

        assert_eq!(fields.len(), 2);
        assert_eq!(fields["name"], FormField::text("Alice"));

        let file = &fields["file"];
        assert_eq!(file.value, "hello\nworld");
        assert_eq!(file.file_name.as_deref(), Some("a.txt"));
        assert_eq!(file.content_type.as_deref(), Some("text/plain"));
        assert!(file.is_file());
        assert!(file.raw_data.is_none());
    }

    #[test]
    fn test_crlf_line_endings() {
        let body = UPLOAD.replace('\n', "\r\n");
        let fields = MultipartParser::parse(body.as_bytes(), "XyZ").unwrap();

        assert_eq!(fields["name"].value, "Alice");
        assert_eq!(fields["file"].value, "hello\nworld");
    }

    #[test]
    fn test_chunks_can_split_anywhere() {
        let body = UPLOAD.replace('\n', "\r\n");
        let expected = MultipartParser::parse(body.as_bytes(), "XyZ").unwrap();

        for size in [1, 2, 3, 7, 16] {
            let mut parser = MultipartParser::new("XyZ");
            for chunk in body.as_bytes().chunks(size) {
                parser.feed(chunk).unwrap();
            }
            assert_eq!(parser.finish().unwrap(), expected, "chunk size {size}");
        }
    }

    #[test]
    fn test_open_field_is_flushed_at_end_of_input() {
        let body = "--b\r\nContent-Disposition: form-data; name=\"note\"\r\n\r\nunterminated";
        let fields = MultipartParser::parse(body.as_bytes(), "b").unwrap();
        assert_eq!(fields["note"].value, "unterminated");
    }

    #[test]
    fn test_preamble_and_epilogue_are_ignored() {
        let body = indoc! {r#"
            this is a preamble
            Content-Disposition: form-data; name="ghost"

            --b
            Content-Disposition: form-data; name="a"

            1
            --b--
            Content-Disposition: form-data; name="epilogue"
        "#};
        let fields = MultipartParser::parse(body.as_bytes(), "b").unwrap();

        assert_eq!(fields.keys().collect::<Vec<_>>(), ["a"]);
        assert_eq!(fields["a"].value, "1");
    }

    #[test]
    fn test_filename_before_name() {
        let body = "--b\nContent-Disposition: form-data; filename=\"x.bin\"; name=\"upload\"\n\ndata\n--b--\n";
        let fields = MultipartParser::parse(body.as_bytes(), "b").unwrap();

        assert_eq!(fields["upload"].file_name.as_deref(), Some("x.bin"));
        assert_eq!(fields["upload"].value, "data");
    }

    #[test]
    fn test_header_names_are_case_insensitive() {
        let body = "--b\ncontent-disposition: form-data; name=\"a\"\nCONTENT-TYPE: application/json\n\n{}\n--b--\n";
        let fields = MultipartParser::parse(body.as_bytes(), "b").unwrap();

        assert_eq!(fields["a"].content_type.as_deref(), Some("application/json"));
        assert_eq!(fields["a"].value, "{}");
    }

    #[test]
    fn test_duplicate_names_keep_the_last_value() {
        let body = "--b\nContent-Disposition: form-data; name=\"a\"\n\n1\n--b\nContent-Disposition: form-data; name=\"a\"\n\n2\n--b--\n";
        let fields = MultipartParser::parse(body.as_bytes(), "b").unwrap();
        assert_eq!(fields["a"].value, "2");
    }

    #[test]
    fn test_empty_value() {
        let body = "--b\nContent-Disposition: form-data; name=\"empty\"\n\n\n--b--\n";
        let fields = MultipartParser::parse(body.as_bytes(), "b").unwrap();
        assert_eq!(fields["empty"].value, "");
    }

    #[test]
    fn test_missing_name_is_an_error() {
        let body = "--b\nContent-Disposition: form-data; filename=\"a.txt\"\n\nx\n--b--\n";
        let err = MultipartParser::parse(body.as_bytes(), "b").unwrap_err();
        assert!(matches!(err, MultipartError::MissingName { .. }));
    }

    #[test]
    fn test_unterminated_quote_is_an_error() {
        let body = "--b\nContent-Disposition: form-data; name=\"oops\n\nx\n--b--\n";
        let err = MultipartParser::parse(body.as_bytes(), "b").unwrap_err();
        assert!(matches!(err, MultipartError::UnterminatedQuote { .. }));
    }

    #[test]
    fn test_part_without_disposition_is_an_error() {
        let body = "--b\nContent-Type: text/plain\n\nx\n--b--\n";
        let err = MultipartParser::parse(body.as_bytes(), "b").unwrap_err();
        assert_eq!(err, MultipartError::MissingDisposition);
    }

    #[test]
    fn test_encoded_fields_are_recovered() {
        struct Part<'a> {
            name: &'a str,
            value: &'a str,
            file_name: Option<&'a str>,
            content_type: Option<&'a str>,
        }

        let parts = [
            Part { name: "title", value: "Hello, world", file_name: None, content_type: None },
            Part { name: "doc", value: "line one\nline two", file_name: Some("doc.md"), content_type: Some("text/markdown") },
            Part { name: "meta", value: "{\"k\": 1}", file_name: None, content_type: Some("application/json") },
            Part { name: "blank", value: "", file_name: Some("empty.txt"), content_type: None },
        ];

        let boundary = "----formboundary7MA4YWxkTrZu0gW";
        let mut body = String::new();
        for part in &parts {
            body.push_str(&format!("--{boundary}\r\nContent-Disposition: form-data; name=\"{}\"", part.name));
            if let Some(file_name) = part.file_name {
                body.push_str(&format!("; filename=\"{file_name}\""));
            }
            body.push_str("\r\n");
            if let Some(content_type) = part.content_type {
                body.push_str(&format!("Content-Type: {content_type}\r\n"));
            }
            body.push_str(&format!("\r\n{}\r\n", part.value));
        }
        body.push_str(&format!("--{boundary}--\r\n"));

        let fields = MultipartParser::parse(body.as_bytes(), boundary).unwrap();
        assert_eq!(fields.len(), parts.len());
        for part in &parts {
            let field = &fields[part.name];
            assert_eq!(field.value, part.value);
            assert_eq!(field.file_name.as_deref(), part.file_name);
            assert_eq!(field.content_type.as_deref(), part.content_type);
        }
    }

    #[test]
    fn test_raw_data_compares_by_content() {
        let a = FormField { raw_data: Some(Bytes::from(vec![1, 2, 3])), ..FormField::text("x") };
        let b = FormField { raw_data: Some(Bytes::from_static(&[1, 2, 3])), ..FormField::text("x") };
        let c = FormField { raw_data: Some(Bytes::from_static(&[1, 2])), ..FormField::text("x") };

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, FormField::text("x"));

        let set = [a, b, c].into_iter().collect::<HashSet<_>>();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_form_field_serializes_camel_case() {
        let field = FormField {
            value: "hi".into(),
            file_name: Some("a.txt".into()),
            content_type: Some("text/plain".into()),
            raw_data: Some(Bytes::from_static(b"hi")),
        };
        let json = serde_json::to_value(&field).unwrap();
        assert_eq!(json, serde_json::json!({"value": "hi", "fileName": "a.txt", "contentType": "text/plain"}));
    }

    #[test]
    fn test_boundary_of() {
        assert_eq!(boundary_of("multipart/form-data; boundary=XyZ").unwrap(), "XyZ");
        assert_eq!(boundary_of("multipart/form-data; boundary=\"abc-123\"").unwrap(), "abc-123");
        assert_eq!(boundary_of("multipart/form-data").unwrap_err(), MultipartError::MissingBoundary);
        assert!(matches!(boundary_of("application/json"), Err(MultipartError::NotMultipart(_))));
    }
}
