//! Schema layer: typed request/response contracts and their validation.
//!
//! Every outbound request and every inbound response or callback passes
//! through this module before reaching the lifecycle manager. Validation is
//! pure: no I/O, no clock, no shared state.
//!
//! - [`requests`] - closed set of per-kind request types ([`TaskRequest`])
//! - [`responses`] - wire envelope, task data, and callback payload decoding
//!
//! Types implement [`Validate`], which reports violations into a
//! [`Validator`]. The validator tracks the current field path so nested
//! structures produce paths like `camera_control.config.zoom`.

pub mod requests;
pub mod responses;

use std::fmt::Display;
use std::sync::OnceLock;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde_json::Value;
use url::Url;

use crate::error::{FieldIssue, ValidationError};

pub use requests::TaskRequest;

/// Maximum length, in characters, of prompt fields.
pub const MAX_PROMPT_CHARS: usize = 2500;

/// A value that can check its own shape and constraints.
///
/// Implementors report every violation through the validator instead of
/// stopping at the first one.
///
/// # Examples
///
/// ```
/// use kling::schema::{Validate, Validator};
///
/// struct Seed(i64);
///
/// impl Validate for Seed {
///     fn validate_into(&self, v: &mut Validator) {
///         v.range("seed", self.0, 0, 1_000);
///     }
/// }
///
/// assert!(Seed(10).validate().is_ok());
/// let err = Seed(-1).validate().unwrap_err();
/// assert_eq!(err.path(), "seed");
/// ```
pub trait Validate {
    /// Reports violations into `v`.
    fn validate_into(&self, v: &mut Validator);

    /// Runs validation and converts the collected issues into a result.
    fn validate(&self) -> Result<(), ValidationError> {
        let mut v = Validator::new();
        self.validate_into(&mut v);
        v.finish()
    }
}

/// Accumulates field issues under a path prefix.
#[derive(Debug, Default)]
pub struct Validator {
    prefix: Vec<String>,
    issues: Vec<FieldIssue>,
}

impl Validator {
    /// Creates an empty validator at the root path.
    pub fn new() -> Self {
        Self::default()
    }

    fn path_of(&self, field: &str) -> String {
        let mut path = String::new();
        for segment in self.prefix.iter().map(String::as_str).chain(std::iter::once(field)) {
            if segment.is_empty() {
                continue;
            }
            if !path.is_empty() && !segment.starts_with('[') {
                path.push('.');
            }
            path.push_str(segment);
        }
        path
    }

    /// Records an issue for `field` under the current prefix.
    pub fn push(&mut self, field: &str, cause: impl Into<String>) {
        let path = self.path_of(field);
        self.issues.push(FieldIssue {
            path,
            cause: cause.into(),
        });
    }

    /// Validates a nested value under `field`.
    pub fn nested<T: Validate + ?Sized>(&mut self, field: &str, value: &T) {
        self.prefix.push(field.to_string());
        value.validate_into(self);
        self.prefix.pop();
    }

    /// Runs `f` with `field` appended to the path prefix.
    pub fn scope(&mut self, field: impl Into<String>, f: impl FnOnce(&mut Self)) {
        self.prefix.push(field.into());
        f(self);
        self.prefix.pop();
    }

    /// Number of issues recorded so far.
    pub fn issue_count(&self) -> usize {
        self.issues.len()
    }

    /// Requires a non-blank string.
    pub fn non_empty(&mut self, field: &str, value: &str) {
        if value.trim().is_empty() {
            self.push(field, "must not be empty");
        }
    }

    /// Requires at most `max` characters.
    pub fn max_chars(&mut self, field: &str, value: &str, max: usize) {
        let count = value.chars().count();
        if count > max {
            self.push(field, format!("must be at most {max} characters (got {count})"));
        }
    }

    /// Requires a prompt: non-empty and within [`MAX_PROMPT_CHARS`].
    pub fn prompt(&mut self, field: &str, value: &str) {
        self.non_empty(field, value);
        self.max_chars(field, value, MAX_PROMPT_CHARS);
    }

    /// Checks an optional prompt only when present.
    pub fn optional_prompt(&mut self, field: &str, value: Option<&str>) {
        if let Some(value) = value {
            self.max_chars(field, value, MAX_PROMPT_CHARS);
        }
    }

    /// Requires `min <= value <= max`.
    pub fn range<T>(&mut self, field: &str, value: T, min: T, max: T)
    where
        T: PartialOrd + Display + Copy,
    {
        // NaN fails both comparisons, so check containment positively.
        if !(value >= min && value <= max) {
            self.push(field, format!("must be between {min} and {max} (got {value})"));
        }
    }

    /// Requires an absolute http(s) URL.
    pub fn http_url(&mut self, field: &str, value: &str) {
        match Url::parse(value) {
            Ok(url) if matches!(url.scheme(), "http" | "https") && url.has_host() => {},
            Ok(url) => self.push(
                field,
                format!("URL scheme must be http or https (got `{}`)", url.scheme()),
            ),
            Err(e) => self.push(field, format!("not a valid URL: {e}")),
        }
    }

    /// Checks an optional URL only when present.
    pub fn optional_http_url(&mut self, field: &str, value: Option<&str>) {
        if let Some(value) = value {
            self.http_url(field, value);
        }
    }

    /// Requires an image given as an http(s) URL or base64 data.
    ///
    /// Base64 may carry a `data:image/...;base64,` prefix.
    pub fn image_source(&mut self, field: &str, value: &str) {
        if value.trim().is_empty() {
            self.push(field, "must not be empty");
            return;
        }
        if value.starts_with("http://") || value.starts_with("https://") {
            self.http_url(field, value);
            return;
        }
        let data = match value.strip_prefix("data:") {
            Some(rest) => match rest.split_once(";base64,") {
                Some((mime, data)) if mime.starts_with("image/") => data,
                _ => {
                    self.push(field, "data URI must be `data:image/<type>;base64,<data>`");
                    return;
                },
            },
            None => value,
        };
        if BASE64.decode(data.trim()).is_err() {
            self.push(field, "must be an http(s) URL or base64-encoded image data");
        }
    }

    /// Requires `value` to match `pattern`.
    pub fn matches(&mut self, field: &str, value: &str, pattern: &Regex, expected: &str) {
        if !pattern.is_match(value) {
            self.push(field, format!("must match {expected} (got `{value}`)"));
        }
    }

    /// Converts the collected issues into a result.
    pub fn finish(self) -> Result<(), ValidationError> {
        match ValidationError::from_issues(self.issues) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// Regex for resolution strings such as `720p`.
pub(crate) fn resolution_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^\d{3,4}p$").expect("static regex is valid"))
}

/// Decodes a JSON value into `T` and validates it.
///
/// Type mismatches reported by serde become a [`ValidationError`] at the
/// root path `$`.
pub fn decode<T>(value: Value) -> Result<T, ValidationError>
where
    T: DeserializeOwned + Validate,
{
    let typed: T =
        serde_json::from_value(value).map_err(|e| ValidationError::new("$", e.to_string()))?;
    typed.validate()?;
    Ok(typed)
}

/// Parses raw bytes as JSON, reporting syntax errors at `$`.
pub fn parse_json(raw: &[u8]) -> Result<Value, ValidationError> {
    serde_json::from_slice(raw).map_err(|e| ValidationError::new("$", format!("malformed JSON: {e}")))
}
