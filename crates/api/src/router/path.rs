//! Path patterns with `{name}` placeholders.
//!
//! A pattern such as `/users/{id}/orders/{orderId}` is compiled into an anchored
//! regular expression where every placeholder becomes a single-segment capture
//! (`([^/]+)`) and every literal run is escaped. Parameter names are kept in the
//! order they appear in the pattern, which is also the order of the capture groups,
//! so extraction is a plain zip of names and captures.

use regex::Regex;
use std::borrow::Cow;
use std::fmt;
use thiserror::Error;

/// Errors raised while compiling a path pattern.
#[derive(Error, Debug)]
pub enum PatternError {
    #[error("pattern '{pattern}' must start with '/'")]
    MissingLeadingSlash { pattern: String },

    #[error("pattern '{pattern}' has an unbalanced '{{' or '}}'")]
    UnbalancedBrace { pattern: String },

    #[error("pattern '{pattern}' has an invalid parameter name '{name}'")]
    InvalidParamName { pattern: String, name: String },

    #[error("pattern '{pattern}' declares parameter '{name}' more than once")]
    DuplicateParam { pattern: String, name: String },

    #[error("pattern '{pattern}' can't be compiled: {source}")]
    Regex {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

/// A compiled path pattern.
#[derive(Debug, Clone)]
pub struct PathPattern {
    pattern: String,
    regex: Regex,
    param_names: Vec<String>,
}

impl PathPattern {
    /// Compiles `pattern` into a matcher.
    ///
    /// A pattern without placeholders matches exactly one path, case-sensitively.
    pub fn compile(pattern: impl Into<String>) -> Result<Self, PatternError> {
        let pattern = pattern.into();
        if !pattern.starts_with('/') {
            return Err(PatternError::MissingLeadingSlash { pattern });
        }

        let mut source = String::with_capacity(pattern.len() + 16);
        source.push('^');
        let mut param_names: Vec<String> = Vec::new();

        let mut rest = pattern.as_str();
        while let Some(open) = rest.find('{') {
            let (literal, tail) = rest.split_at(open);
            if literal.contains('}') {
                return Err(PatternError::UnbalancedBrace { pattern });
            }
            source.push_str(&regex::escape(literal));

            let Some(close) = tail.find('}') else {
                return Err(PatternError::UnbalancedBrace { pattern });
            };
            let name = &tail[1..close];
            if name.is_empty() || !name.chars().all(|c| c.is_alphanumeric() || c == '_') {
                let name = name.to_owned();
                return Err(PatternError::InvalidParamName { pattern, name });
            }
            if param_names.iter().any(|existing| existing == name) {
                let name = name.to_owned();
                return Err(PatternError::DuplicateParam { pattern, name });
            }

            param_names.push(name.to_owned());
            source.push_str("([^/]+)");
            rest = &tail[close + 1..];
        }

        if rest.contains('}') {
            return Err(PatternError::UnbalancedBrace { pattern });
        }
        source.push_str(&regex::escape(rest));
        source.push('$');

        let regex = match Regex::new(&source) {
            Ok(regex) => regex,
            Err(source) => return Err(PatternError::Regex { pattern, source }),
        };
        debug_assert_eq!(regex.captures_len() - 1, param_names.len());

        Ok(Self { pattern, regex, param_names })
    }

    /// The pattern as it was declared.
    pub fn as_str(&self) -> &str {
        &self.pattern
    }

    /// Parameter names in declaration order.
    pub fn param_names(&self) -> &[String] {
        &self.param_names
    }

    /// Returns true if the whole `path` matches this pattern.
    #[inline]
    pub fn matches(&self, path: &str) -> bool {
        self.regex.is_match(path)
    }

    /// Extracts the named parameters of `path`, or `None` if it doesn't match.
    ///
    /// Captured segments are percent-decoded; a segment that doesn't decode to
    /// valid UTF-8 is kept as it was sent.
    pub fn extract(&self, path: &str) -> Option<PathParams> {
        let captures = self.regex.captures(path)?;

        let params = self
            .param_names
            .iter()
            .zip(captures.iter().skip(1))
            .filter_map(|(name, capture)| capture.map(|m| (name.clone(), decode_segment(m.as_str()))))
            .collect::<Vec<_>>();

        Some(PathParams { inner: params })
    }
}

impl fmt::Display for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.pattern)
    }
}

fn decode_segment(segment: &str) -> String {
    match urlencoding::decode(segment) {
        Ok(Cow::Borrowed(decoded)) => decoded.to_owned(),
        Ok(Cow::Owned(decoded)) => decoded,
        Err(_) => segment.to_owned(),
    }
}

/// Path parameters extracted from a concrete request path.
///
/// Entries keep the order of the placeholders in the matched pattern.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathParams {
    inner: Vec<(String, String)>,
}

impl PathParams {
    /// Creates an empty PathParams instance with no parameters
    #[inline]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Returns true if there are no path parameters
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Returns the number of path parameters
    #[inline]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Gets the value of a path parameter by its name
    pub fn get(&self, key: impl AsRef<str>) -> Option<&str> {
        let key = key.as_ref();
        self.inner.iter().find(|(name, _)| name == key).map(|(_, value)| value.as_str())
    }

    /// Iterates over `(name, value)` pairs in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.inner.iter().map(|(name, value)| (name.as_str(), value.as_str()))
    }

    /// Parameter names in declaration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.inner.iter().map(|(name, _)| name.as_str())
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for PathParams {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self { inner: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect() }
    }
}
