//! The request half of a context.

use std::net::SocketAddr;

use bytes::Bytes;
use http::header::{self, HeaderMap};
use http::{Uri, Version};
use http_body_util::combinators::UnsyncBoxBody;
use serde::de::DeserializeOwned;

use crate::error::{BoxError, Error, HttpError, Result};
use crate::method::Method;
use crate::response::ContentType;

/// Inbound body stream, not yet read.
pub type RequestBody = UnsyncBoxBody<Bytes, BoxError>;

/// An incoming HTTP request.
///
/// The body starts out unread; [`take_body`](Request::take_body) hands the
/// stream to whoever decodes it (normally the body parser), which then stores
/// the result back with [`set_parsed`](Request::set_parsed).
pub struct Request {
    parts: http::request::Parts,
    body: Option<RequestBody>,
    parsed: Option<serde_json::Value>,
    raw_body: Option<String>,
    remote_addr: Option<SocketAddr>,
    original_url: String,
}

impl Request {
    pub(crate) fn new(req: http::Request<RequestBody>, remote_addr: Option<SocketAddr>) -> Self {
        let (parts, body) = req.into_parts();
        let original_url = url_of(&parts.uri);
        Self { parts, body: Some(body), parsed: None, raw_body: None, remote_addr, original_url }
    }

    pub fn method(&self) -> &http::Method {
        &self.parts.method
    }

    /// `GET`, `HEAD`, `PUT`, `DELETE`, `OPTIONS` and `TRACE`.
    pub fn idempotent(&self) -> bool {
        Method::try_from(&self.parts.method).is_ok_and(Method::is_idempotent)
    }

    pub fn uri(&self) -> &Uri {
        &self.parts.uri
    }

    pub fn version(&self) -> Version {
        self.parts.version
    }

    /// Path without the query string, still percent-encoded.
    pub fn path(&self) -> &str {
        self.parts.uri.path()
    }

    /// Path and query, e.g. `/search?q=rust`.
    pub fn url(&self) -> String {
        url_of(&self.parts.uri)
    }

    /// The URL as received, before any middleware rewrote it.
    pub fn original_url(&self) -> &str {
        &self.original_url
    }

    /// Replaces path and query; used by rewriting middleware.
    pub fn set_url(&mut self, url: &str) -> Result<()> {
        let mut builder = Uri::builder().path_and_query(url);
        if let Some(scheme) = self.parts.uri.scheme() {
            builder = builder.scheme(scheme.clone());
        }
        if let Some(authority) = self.parts.uri.authority() {
            builder = builder.authority(authority.clone());
        }
        self.parts.uri = builder.build()?;
        Ok(())
    }

    /// Raw query string without the leading `?`; empty when absent.
    pub fn querystring(&self) -> &str {
        self.parts.uri.query().unwrap_or_default()
    }

    /// Decodes the query string into `T`.
    ///
    /// # Errors
    ///
    /// A `400` [`HttpError`] if the query does not fit `T`.
    pub fn query<T: DeserializeOwned>(&self) -> Result<T> {
        serde_urlencoded::from_str(self.querystring()).map_err(|e| {
            HttpError::new(400)
                .with_message(format!("invalid query string: {e}"))
                .into()
        })
    }

    /// Query parameters in order of appearance, percent-decoded.
    pub fn query_pairs(&self) -> Vec<(String, String)> {
        serde_urlencoded::from_str(self.querystring()).unwrap_or_default()
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.parts.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.parts.headers
    }

    /// First value of `name`, if it is valid UTF-8. `referer` and `referrer`
    /// are interchangeable.
    pub fn header(&self, name: &str) -> Option<&str> {
        let name = if name.eq_ignore_ascii_case("referrer") { "referer" } else { name };
        self.parts.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// The request media type without parameters, lowercased.
    pub fn content_type(&self) -> Option<String> {
        let value = self.header(header::CONTENT_TYPE.as_str())?;
        let essence = value.split(';').next().unwrap_or_default().trim();
        (!essence.is_empty()).then(|| essence.to_ascii_lowercase())
    }

    /// Whether the request carries a body at all.
    pub fn has_body(&self) -> bool {
        self.parts.headers.contains_key(header::TRANSFER_ENCODING)
            || self
                .header(header::CONTENT_LENGTH.as_str())
                .and_then(|v| v.parse::<u64>().ok())
                .is_some_and(|n| n > 0)
    }

    /// Checks the content type against `types`, returning the first that
    /// matches. Entries may be shorthands (`"json"`, `"urlencoded"`), full
    /// media types, or wildcards (`"text/*"`, `"*/json"`). Requests without a
    /// body never match.
    pub fn is<'t>(&self, types: &[&'t str]) -> Option<&'t str> {
        if !self.has_body() {
            return None;
        }
        let actual = self.content_type()?;
        types.iter().copied().find(|ty| media_matches(ty, &actual))
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    /// Takes the unread body stream. `None` once it has been taken.
    pub fn take_body(&mut self) -> Option<RequestBody> {
        self.body.take()
    }

    pub fn body_taken(&self) -> bool {
        self.body.is_none()
    }

    /// The decoded body, once a body parser has run.
    pub fn body(&self) -> Option<&serde_json::Value> {
        self.parsed.as_ref()
    }

    /// Decodes the parsed body into `T`.
    pub fn body_as<T: DeserializeOwned>(&self) -> Result<Option<T>> {
        self.parsed
            .clone()
            .map(serde_json::from_value)
            .transpose()
            .map_err(Error::from)
    }

    pub fn set_parsed(&mut self, value: serde_json::Value) {
        self.parsed = Some(value);
    }

    /// The body text exactly as received, once a body parser has run.
    pub fn raw_body(&self) -> Option<&str> {
        self.raw_body.as_deref()
    }

    pub fn set_raw_body(&mut self, raw: String) {
        self.raw_body = Some(raw);
    }
}

impl std::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Request")
            .field("method", &self.parts.method)
            .field("url", &self.url())
            .field("headers", &self.parts.headers)
            .finish_non_exhaustive()
    }
}

fn url_of(uri: &Uri) -> String {
    uri.path_and_query()
        .map_or_else(|| uri.path().to_owned(), |pq| pq.as_str().to_owned())
}

/// `type-is`-style comparison of a wanted type against the actual essence.
fn media_matches(wanted: &str, actual: &str) -> bool {
    let wanted = match ContentType::from_shorthand(wanted) {
        Some(ct) => ct.essence().to_owned(),
        None if wanted.contains('/') => wanted.to_ascii_lowercase(),
        // Bare subtypes: "png" -> "*/png".
        None => format!("*/{}", wanted.to_ascii_lowercase()),
    };
    let (Some((w_type, w_sub)), Some((a_type, a_sub))) = (wanted.split_once('/'), actual.split_once('/')) else {
        return false;
    };
    let type_ok = w_type == "*" || w_type == a_type;
    let sub_ok = w_sub == "*"
        || w_sub == a_sub
        || w_sub.strip_prefix("*+").is_some_and(|suffix| a_sub.ends_with(&format!("+{suffix}")));
    type_ok && sub_ok
}
