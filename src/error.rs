//! Unified error type.
//!
//! Two families of failure flow through strata:
//!
//! - **Registration errors** ([`Error::RouteConflict`], [`Error::AmbiguousParam`],
//!   [`Error::InvalidPattern`]) are returned synchronously while routes are
//!   being defined. They never touch in-flight requests.
//! - **Dispatch errors** are anything a middleware or handler returns while a
//!   request is being processed. They travel up the onion to the
//!   application's single error path, which turns them into a response via
//!   [`Error::status`] and [`Error::expose`].
//!
//! A route that does not match is *not* an error: it is the default `404`
//! status left untouched.

use std::any::Any;
use std::fmt;

use http::{HeaderMap, StatusCode};

use crate::method::Method;
use crate::status;

/// A boxed, thread-safe error from an external collaborator (body streams,
/// user code, ...).
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// `Result` alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// The error type returned by strata's fallible operations.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The same HTTP method was bound twice on the same trie node.
    #[error("route conflict: {method} {path} is already defined")]
    RouteConflict { method: Method, path: String },

    /// Two parameter segments with the same constraint but different names
    /// were defined under the same node (e.g. `/:id` next to `/:name`).
    #[error("ambiguous parameter under {path}: `:{requested}` collides with `:{existing}`")]
    AmbiguousParam {
        path: String,
        existing: String,
        requested: String,
    },

    /// A parameter constraint (`:id(\d+)`) failed to compile.
    #[error("invalid parameter pattern `{segment}`: {source}")]
    InvalidPattern {
        segment: String,
        #[source]
        source: regex::Error,
    },

    /// An HTTP-level failure carrying its own status code.
    #[error(transparent)]
    Http(#[from] HttpError),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    /// An invalid header name or value.
    #[error("header: {0}")]
    Header(#[from] http::Error),

    /// Reading the inbound body stream failed.
    #[error("body: {0}")]
    Body(#[source] BoxError),

    /// The connection finished before the response was fully sent.
    #[error("request aborted before the response completed")]
    Aborted,

    /// A middleware or handler panicked; the payload is preserved as text.
    #[error("non-error thrown: {0}")]
    Panicked(String),

    #[error("{0}")]
    Other(#[source] BoxError),
}

impl Error {
    /// Shorthand for an [`HttpError`] with a custom message.
    pub fn http(status: u16, message: impl Into<String>) -> Self {
        Self::Http(HttpError::new(status).with_message(message))
    }

    /// Wraps any error type.
    pub fn other(err: impl Into<BoxError>) -> Self {
        Self::Other(err.into())
    }

    /// Converts a panic payload caught at the pipeline boundary.
    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_owned()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "<opaque panic payload>".to_owned()
        };
        Self::Panicked(message)
    }

    /// The status code the error path responds with.
    ///
    /// Unknown or invalid codes on an [`HttpError`] fall back to `500`.
    /// A missing file (`io::ErrorKind::NotFound`) maps to `404`.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Http(e) => status::known(e.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            Self::Io(e) if e.kind() == std::io::ErrorKind::NotFound => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether the error's own message may be sent to the client.
    pub fn expose(&self) -> bool {
        matches!(self, Self::Http(e) if e.expose)
    }

    /// Extra headers to set on the error response.
    pub fn headers(&self) -> Option<&HeaderMap> {
        match self {
            Self::Http(e) if !e.headers.is_empty() => Some(&e.headers),
            _ => None,
        }
    }
}

// ── HttpError ─────────────────────────────────────────────────────────────────

/// An error with an HTTP status, raised from middleware or handlers.
///
/// Client errors (`4xx`) are exposed by default: their message is written to
/// the response body. Server errors (`5xx`) are not, and the client only
/// sees the canonical reason phrase.
///
/// ```rust
/// use strata::HttpError;
///
/// let err = HttpError::new(403).with_message("not your resource");
/// assert!(err.exposed());
///
/// let err = HttpError::new(503).with_header("retry-after", "30");
/// assert!(!err.exposed());
/// ```
#[derive(Clone, Debug)]
pub struct HttpError {
    status: u16,
    message: String,
    expose: bool,
    headers: HeaderMap,
}

impl HttpError {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            message: status::message(status),
            expose: (400..500).contains(&status),
            headers: HeaderMap::new(),
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// Overrides the default exposure rule.
    pub fn with_expose(mut self, expose: bool) -> Self {
        self.expose = expose;
        self
    }

    /// Adds a header to the eventual error response. Invalid names or values
    /// are ignored.
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        if let (Ok(name), Ok(value)) = (
            http::HeaderName::from_bytes(name.as_bytes()),
            http::HeaderValue::from_str(value),
        ) {
            self.headers.append(name, value);
        }
        self
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn exposed(&self) -> bool {
        self.expose
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }
}

impl fmt::Display for HttpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for HttpError {}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(HttpError::new(404).into(), 404)]
    #[case(HttpError::new(418).into(), 418)]
    #[case(HttpError::new(42).into(), 500)]
    #[case(HttpError::new(799).into(), 500)]
    #[case(std::io::Error::from(std::io::ErrorKind::NotFound).into(), 404)]
    #[case(std::io::Error::from(std::io::ErrorKind::PermissionDenied).into(), 500)]
    #[case(Error::Aborted, 500)]
    #[case(Error::Panicked("boom".into()), 500)]
    fn status_mapping(#[case] err: Error, #[case] expected: u16) {
        assert_eq!(err.status().as_u16(), expected);
    }

    #[test]
    fn client_errors_are_exposed_by_default() {
        assert!(Error::http(400, "bad input").expose());
        assert!(!Error::http(500, "db down").expose());
        assert!(Error::Http(HttpError::new(500).with_expose(true)).expose());
        assert!(!Error::other(std::io::Error::other("x")).expose());
    }

    #[test]
    fn default_message_is_reason_phrase() {
        assert_eq!(HttpError::new(404).message(), "Not Found");
        assert_eq!(HttpError::new(499).message(), "499");
    }

    #[test]
    fn panic_payloads_are_preserved() {
        let err = Error::from_panic(Box::new("kaboom"));
        assert_eq!(err.to_string(), "non-error thrown: kaboom");

        let err = Error::from_panic(Box::new(String::from("owned")));
        assert_eq!(err.to_string(), "non-error thrown: owned");

        let err = Error::from_panic(Box::new(7_u8));
        assert_eq!(err.to_string(), "non-error thrown: <opaque panic payload>");
    }

    #[test]
    fn headers_only_for_http_errors() {
        let err: Error = HttpError::new(429).with_header("retry-after", "5").into();
        assert_eq!(err.headers().unwrap()["retry-after"], "5");
        assert!(Error::Aborted.headers().is_none());
    }
}
