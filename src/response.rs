//! The response half of a request context.
//!
//! [`Response`] plays the role of the server's response sink: status,
//! headers, a pending [`Body`], and a one-shot "end" that freezes what will
//! be written to the wire. After [`end`](Response::end) or
//! [`pipe`](Response::pipe) the response is no longer writable and further
//! attempts are ignored.

use std::fmt;
use std::convert::Infallible;

use bytes::Bytes;
use futures_util::TryStreamExt;
use http::header::{self, HeaderName, HeaderValue};
use http::{HeaderMap, StatusCode};
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Empty, Full, StreamBody};
use hyper::body::Frame;
use tracing::{trace, warn};

use crate::body::{Body, BodyStream};
use crate::error::{BoxError, Result};
use crate::status;

/// Body type handed to hyper.
pub type ResponseBody = UnsyncBoxBody<Bytes, BoxError>;

// ── ContentType ───────────────────────────────────────────────────────────────

/// Common content-type values, addressable by shorthand in
/// [`Response::set_type`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ContentType {
    Csv,          // text/csv
    EventStream,  // text/event-stream  (SSE)
    FormData,     // application/x-www-form-urlencoded
    Html,         // text/html; charset=utf-8
    Json,         // application/json; charset=utf-8
    MsgPack,      // application/msgpack
    OctetStream,  // application/octet-stream  (binary / file download)
    Pdf,          // application/pdf
    Text,         // text/plain; charset=utf-8
    Xml,          // application/xml
}

impl ContentType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Csv         => "text/csv",
            Self::EventStream => "text/event-stream",
            Self::FormData    => "application/x-www-form-urlencoded",
            Self::Html        => "text/html; charset=utf-8",
            Self::Json        => "application/json; charset=utf-8",
            Self::MsgPack     => "application/msgpack",
            Self::OctetStream => "application/octet-stream",
            Self::Pdf         => "application/pdf",
            Self::Text        => "text/plain; charset=utf-8",
            Self::Xml         => "application/xml",
        }
    }

    /// Resolves a shorthand (`"json"`, `"html"`, `"bin"`, ...).
    pub fn from_shorthand(s: &str) -> Option<Self> {
        Some(match s.trim_start_matches('.') {
            "csv"                        => Self::Csv,
            "sse" | "event-stream"       => Self::EventStream,
            "form" | "urlencoded"        => Self::FormData,
            "html" | "htm"               => Self::Html,
            "json"                       => Self::Json,
            "msgpack"                    => Self::MsgPack,
            "bin" | "binary" | "octet-stream" => Self::OctetStream,
            "pdf"                        => Self::Pdf,
            "text" | "txt" | "plain"     => Self::Text,
            "xml"                        => Self::Xml,
            _                            => return None,
        })
    }

    /// Media type without parameters, e.g. `application/json`.
    pub fn essence(self) -> &'static str {
        self.as_str().split(';').next().unwrap_or_default()
    }
}

/// Expands a shorthand or passes a full media type through, adding a UTF-8
/// charset to bare `text/*` types.
pub(crate) fn resolve_type(ty: &str) -> Option<String> {
    if ty.contains('/') {
        if ty.starts_with("text/") && !ty.contains("charset") {
            return Some(format!("{ty}; charset=utf-8"));
        }
        return Some(ty.to_owned());
    }
    ContentType::from_shorthand(ty).map(|ct| ct.as_str().to_owned())
}

// ── Response ─────────────────────────────────────────────────────────────────

/// What was committed by `end`/`pipe`.
enum Sent {
    Payload(Bytes),
    Stream(BodyStream),
}

/// The outgoing response of one request.
///
/// Starts as `404 Not Found` with no body. Setting a body without an explicit
/// status promotes it to `200`.
pub struct Response {
    status: StatusCode,
    explicit_status: bool,
    message: Option<String>,
    headers: HeaderMap,
    body: Body,
    headers_sent: bool,
    sent: Option<Sent>,
}

impl Response {
    pub(crate) fn new() -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            explicit_status: false,
            message: None,
            headers: HeaderMap::new(),
            body: Body::Empty,
            headers_sent: false,
            sent: None,
        }
    }

    // ── status ────────────────────────────────────────────────────────────────

    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Sets the status explicitly. A status that forbids a body clears any
    /// body already set.
    pub fn set_status(&mut self, status: StatusCode) {
        if self.headers_sent {
            warn!(%status, "status change after headers were sent is ignored");
            return;
        }
        self.explicit_status = true;
        self.status = status;
        self.message = None;
        if status::is_empty(status) && !self.body.is_empty() {
            self.set_body(Body::Empty);
        }
    }

    /// Status line text: a custom message, else the reason phrase.
    pub fn message(&self) -> String {
        self.message
            .clone()
            .unwrap_or_else(|| status::message(self.status.as_u16()))
    }

    pub fn set_message(&mut self, message: impl Into<String>) {
        self.message = Some(message.into());
    }

    // ── body ──────────────────────────────────────────────────────────────────

    pub fn body(&self) -> &Body {
        &self.body
    }

    /// Sets the body, adjusting status and entity headers:
    ///
    /// - an empty body turns a body-carrying status into `204` and drops
    ///   `content-type`/`content-length`;
    /// - any other body turns a never-set status into `200`;
    /// - `content-type` is inferred unless already present;
    /// - `content-length` is set when the size is known up front.
    pub fn set_body(&mut self, body: impl Into<Body>) {
        let body = body.into();
        let set_type = !self.headers.contains_key(header::CONTENT_TYPE);

        if body.is_empty() {
            if !status::is_empty(self.status) {
                self.status = StatusCode::NO_CONTENT;
                self.explicit_status = true;
            }
            self.headers.remove(header::CONTENT_TYPE);
            self.headers.remove(header::CONTENT_LENGTH);
            self.headers.remove(header::TRANSFER_ENCODING);
            self.body = body;
            return;
        }

        if !self.explicit_status {
            self.status = StatusCode::OK;
        }

        let inferred = match &body {
            Body::Text(s) if s.trim_start().starts_with('<') => ContentType::Html,
            Body::Text(_) => ContentType::Text,
            Body::Bytes(_) | Body::Stream(_) => ContentType::OctetStream,
            Body::Json(_) => ContentType::Json,
            Body::Empty => unreachable!("handled above"),
        };
        if set_type || matches!(body, Body::Json(_)) {
            self.headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(inferred.as_str()));
        }

        match body.sized_len() {
            Some(len) => self.set_length(len as u64),
            None => {
                self.headers.remove(header::CONTENT_LENGTH);
            }
        }
        self.body = body;
    }

    /// Removes the pending body without touching headers or status.
    pub fn take_body(&mut self) -> Body {
        std::mem::take(&mut self.body)
    }

    // ── headers ───────────────────────────────────────────────────────────────

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    /// First value of `name`, if it is valid UTF-8.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Replaces every value of `name`.
    pub fn set_header(&mut self, name: &str, value: &str) -> Result<()> {
        let (name, value) = parse_header(name, value)?;
        self.headers.insert(name, value);
        Ok(())
    }

    /// Adds a value without removing existing ones.
    pub fn append_header(&mut self, name: &str, value: &str) -> Result<()> {
        let (name, value) = parse_header(name, value)?;
        self.headers.append(name, value);
        Ok(())
    }

    pub fn remove_header(&mut self, name: &str) {
        self.headers.remove(name);
    }

    pub(crate) fn clear_headers(&mut self) {
        self.headers.clear();
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header(header::CONTENT_TYPE.as_str())
    }

    /// Sets `content-type` from a shorthand (`"json"`) or a full media type.
    /// An unrecognized shorthand removes the header.
    pub fn set_type(&mut self, ty: &str) {
        match resolve_type(ty).and_then(|t| HeaderValue::from_str(&t).ok()) {
            Some(value) => {
                self.headers.insert(header::CONTENT_TYPE, value);
            }
            None => {
                self.headers.remove(header::CONTENT_TYPE);
            }
        }
    }

    /// Declared `content-length`, or the size of a sized body.
    pub fn length(&self) -> Option<u64> {
        if let Some(v) = self.header(header::CONTENT_LENGTH.as_str()) {
            return v.parse().ok();
        }
        match &self.body {
            Body::Json(v) => serde_json::to_vec(v).ok().map(|b| b.len() as u64),
            other => other.sized_len().map(|n| n as u64),
        }
    }

    pub fn set_length(&mut self, len: u64) {
        self.headers.insert(header::CONTENT_LENGTH, HeaderValue::from(len));
    }

    /// Adds `field` to `Vary` unless already listed.
    pub fn vary(&mut self, field: &str) -> Result<()> {
        let current = self.header(header::VARY.as_str()).unwrap_or_default();
        let fields: Vec<&str> = current.split(',').map(str::trim).filter(|f| !f.is_empty()).collect();
        if fields.contains(&"*") || fields.iter().any(|f| f.eq_ignore_ascii_case(field)) {
            return Ok(());
        }
        let value = if fields.is_empty() || field == "*" {
            field.to_owned()
        } else {
            format!("{}, {field}", fields.join(", "))
        };
        self.set_header(header::VARY.as_str(), &value)
    }

    /// Sends the client to `url`: `302` unless a redirect status is already
    /// set, with a short text body.
    pub fn redirect(&mut self, url: &str) -> Result<()> {
        self.set_header(header::LOCATION.as_str(), url)?;
        if !status::is_redirect(self.status) {
            self.set_status(StatusCode::FOUND);
        }
        self.set_type("text");
        self.set_body(format!("Redirecting to {url}."));
        Ok(())
    }

    /// Marks the response as a download.
    pub fn attachment(&mut self, filename: Option<&str>) -> Result<()> {
        let value = match filename {
            Some(name) => format!("attachment; filename=\"{}\"", name.replace('"', "\\\"")),
            None => "attachment".to_owned(),
        };
        self.set_header(header::CONTENT_DISPOSITION.as_str(), &value)
    }

    // ── sink ──────────────────────────────────────────────────────────────────

    pub fn headers_sent(&self) -> bool {
        self.headers_sent
    }

    /// Commits the status line and headers; later header changes are
    /// ignored by the transport.
    pub fn flush_headers(&mut self) {
        self.headers_sent = true;
    }

    /// `false` once the response has been ended or piped.
    pub fn writable(&self) -> bool {
        self.sent.is_none()
    }

    /// Ends the response with `payload`. Returns `false` if it had already
    /// ended.
    pub fn end(&mut self, payload: Option<Bytes>) -> bool {
        if self.sent.is_some() {
            trace!("end() on a finished response ignored");
            return false;
        }
        self.headers_sent = true;
        self.sent = Some(Sent::Payload(payload.unwrap_or_default()));
        true
    }

    /// Ends the response by streaming `stream` into it.
    pub fn pipe(&mut self, stream: BodyStream) -> bool {
        if self.sent.is_some() {
            trace!("pipe() on a finished response ignored");
            return false;
        }
        self.headers_sent = true;
        self.sent = Some(Sent::Stream(stream));
        true
    }

    /// Takes a piped stream out so the caller can wrap it. The response
    /// stays ended, with the head still to be built by `take_http`.
    pub(crate) fn take_piped(&mut self) -> Option<BodyStream> {
        match self.sent.take() {
            Some(Sent::Stream(stream)) => {
                self.sent = Some(Sent::Payload(Bytes::new()));
                Some(stream)
            }
            other => {
                self.sent = other;
                None
            }
        }
    }

    /// Builds the hyper response from whatever was committed.
    pub(crate) fn take_http(&mut self) -> http::Response<ResponseBody> {
        let body = match self.sent.take() {
            Some(Sent::Payload(bytes)) if bytes.is_empty() => empty_body(),
            Some(Sent::Payload(bytes)) => Full::new(bytes)
                .map_err(|never: Infallible| -> BoxError { match never {} })
                .boxed_unsync(),
            Some(Sent::Stream(stream)) => stream_body(stream),
            None => {
                warn!(status = %self.status, "response was never ended; sending headers only");
                empty_body()
            }
        };
        let mut res = http::Response::new(body);
        *res.status_mut() = self.status;
        *res.headers_mut() = std::mem::take(&mut self.headers);
        res
    }
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Response")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .field("body", &self.body)
            .field("writable", &self.writable())
            .finish()
    }
}

pub(crate) fn stream_body(stream: BodyStream) -> ResponseBody {
    StreamBody::new(stream.map_ok(Frame::data).map_err(|e| -> BoxError { Box::new(e) })).boxed_unsync()
}

fn empty_body() -> ResponseBody {
    Empty::<Bytes>::new()
        .map_err(|never: Infallible| -> BoxError { match never {} })
        .boxed_unsync()
}

fn parse_header(name: &str, value: &str) -> Result<(HeaderName, HeaderValue)> {
    let name = HeaderName::from_bytes(name.as_bytes()).map_err(http::Error::from)?;
    let value = HeaderValue::from_str(value).map_err(http::Error::from)?;
    Ok((name, value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn defaults_to_not_found() {
        let res = Response::new();
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
        assert!(res.body().is_empty());
        assert!(res.writable());
        assert!(!res.headers_sent());
    }

    #[test]
    fn body_promotes_implicit_status() {
        let mut res = Response::new();
        res.set_body("hello");
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(res.content_type(), Some("text/plain; charset=utf-8"));
        assert_eq!(res.length(), Some(5));
    }

    #[test]
    fn body_keeps_explicit_status() {
        let mut res = Response::new();
        res.set_status(StatusCode::CREATED);
        res.set_body(json!({ "id": 1 }));
        assert_eq!(res.status(), StatusCode::CREATED);
        assert_eq!(res.content_type(), Some("application/json; charset=utf-8"));
        assert_eq!(res.header("content-length"), None);
        assert_eq!(res.length(), Some(8));
    }

    #[test]
    fn html_is_sniffed() {
        let mut res = Response::new();
        res.set_body("  <p>hi</p>");
        assert_eq!(res.content_type(), Some("text/html; charset=utf-8"));
    }

    #[test]
    fn existing_type_is_kept_for_text() {
        let mut res = Response::new();
        res.set_type("xml");
        res.set_body("<ok/>");
        assert_eq!(res.content_type(), Some("application/xml"));
    }

    #[test]
    fn empty_body_means_no_content() {
        let mut res = Response::new();
        res.set_body("x");
        res.set_body(());
        assert_eq!(res.status(), StatusCode::NO_CONTENT);
        assert_eq!(res.content_type(), None);
        assert_eq!(res.header("content-length"), None);
    }

    #[test]
    fn empty_status_clears_body() {
        let mut res = Response::new();
        res.set_body("stale");
        res.set_status(StatusCode::NOT_MODIFIED);
        assert!(res.body().is_empty());
        assert_eq!(res.status(), StatusCode::NOT_MODIFIED);
    }

    #[test]
    fn end_is_one_shot() {
        let mut res = Response::new();
        assert!(res.end(Some(Bytes::from_static(b"first"))));
        assert!(!res.writable());
        assert!(res.headers_sent());
        assert!(!res.end(Some(Bytes::from_static(b"second"))));
        assert!(!res.pipe(Box::pin(futures_util::stream::empty())));
    }

    #[test]
    fn piped_streams_can_be_taken_once() {
        let mut res = Response::new();
        assert!(res.take_piped().is_none());
        res.pipe(Box::pin(futures_util::stream::empty()));
        assert!(res.take_piped().is_some());
        assert!(res.take_piped().is_none());
        assert!(!res.writable());
    }

    #[test]
    fn status_frozen_after_headers_sent() {
        let mut res = Response::new();
        res.flush_headers();
        res.set_status(StatusCode::OK);
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn message_defaults_to_reason() {
        let mut res = Response::new();
        assert_eq!(res.message(), "Not Found");
        res.set_message("Nope");
        assert_eq!(res.message(), "Nope");
        res.set_status(StatusCode::OK);
        assert_eq!(res.message(), "OK");
    }

    #[test]
    fn vary_deduplicates() {
        let mut res = Response::new();
        res.vary("Accept").unwrap();
        res.vary("accept").unwrap();
        res.vary("Origin").unwrap();
        assert_eq!(res.header("vary"), Some("Accept, Origin"));
    }

    #[test]
    fn redirect_sets_location() {
        let mut res = Response::new();
        res.redirect("/login").unwrap();
        assert_eq!(res.status(), StatusCode::FOUND);
        assert_eq!(res.header("location"), Some("/login"));
        assert_eq!(res.body().as_text(), Some("Redirecting to /login."));

        let mut res = Response::new();
        res.set_status(StatusCode::MOVED_PERMANENTLY);
        res.redirect("/new").unwrap();
        assert_eq!(res.status(), StatusCode::MOVED_PERMANENTLY);
    }

    #[test]
    fn attachment_header() {
        let mut res = Response::new();
        res.attachment(Some("report.pdf")).unwrap();
        assert_eq!(res.header("content-disposition"), Some("attachment; filename=\"report.pdf\""));
    }

    #[test]
    fn invalid_header_is_an_error() {
        let mut res = Response::new();
        assert!(res.set_header("bad header", "x").is_err());
        assert!(res.set_header("x-ok", "line\nbreak").is_err());
    }

    #[test]
    fn type_shorthands() {
        assert_eq!(resolve_type("json").as_deref(), Some("application/json; charset=utf-8"));
        assert_eq!(resolve_type("text/csv").as_deref(), Some("text/csv; charset=utf-8"));
        assert_eq!(resolve_type("image/png").as_deref(), Some("image/png"));
        assert_eq!(resolve_type("nope"), None);
        assert_eq!(ContentType::Json.essence(), "application/json");
    }
}
