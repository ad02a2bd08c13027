//! Request body decoding.
//!
//! [`BodyParser`] reads the request body once, up to a size limit, and
//! stores both the raw text and a decoded [`serde_json::Value`] on the
//! request:
//!
//! | kind   | default content types                                   | decoded as         |
//! |--------|---------------------------------------------------------|--------------------|
//! | `Json` | `application/json`, `application/json-patch+json`, `application/vnd.api+json`, `application/csp-report` | the JSON value |
//! | `Form` | `application/x-www-form-urlencoded`                     | object of strings  |
//! | `Text` | `text/plain` (off unless enabled)                       | string             |
//!
//! Requests of any other type get an empty object. Malformed bodies fail
//! with `400`, oversized ones with `413`, unless an error callback is set.

use std::fmt;
use std::sync::Arc;

use bytes::BytesMut;
use http_body_util::BodyExt;
use serde_json::{Map, Value};
use tracing::debug;

use crate::compose::{BoxFuture, Middleware, Next};
use crate::context::Context;
use crate::error::{Error, HttpError, Result};

/// Kinds of body the parser understands.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum BodyKind {
    Json,
    Form,
    Text,
}

type DetectJson = Arc<dyn Fn(&Context) -> bool + Send + Sync>;
type OnError = Arc<dyn Fn(&Error, &mut Context) + Send + Sync>;

/// Body parser with the default settings: JSON and form enabled.
pub fn body_parser() -> BodyParser {
    BodyParser::new()
}

/// Configurable body-decoding middleware.
///
/// ```rust
/// use strata::middleware::{BodyKind, BodyParser};
///
/// let parser = BodyParser::new()
///     .enable_types([BodyKind::Json, BodyKind::Text])
///     .extend_types(BodyKind::Json, "application/x-javascript")
///     .limit(64 * 1024);
/// # let _ = parser;
/// ```
#[derive(Clone)]
pub struct BodyParser {
    enabled: Vec<BodyKind>,
    json_types: Vec<String>,
    form_types: Vec<String>,
    text_types: Vec<String>,
    json_limit: usize,
    form_limit: usize,
    text_limit: usize,
    strict: bool,
    detect_json: Option<DetectJson>,
    on_error: Option<OnError>,
}

impl Default for BodyParser {
    fn default() -> Self {
        Self {
            enabled: vec![BodyKind::Json, BodyKind::Form],
            json_types: [
                "application/json",
                "application/json-patch+json",
                "application/vnd.api+json",
                "application/csp-report",
            ]
            .map(str::to_owned)
            .to_vec(),
            form_types: vec!["application/x-www-form-urlencoded".to_owned()],
            text_types: vec!["text/plain".to_owned()],
            json_limit: 1024 * 1024,
            form_limit: 56 * 1024,
            text_limit: 1024 * 1024,
            strict: true,
            detect_json: None,
            on_error: None,
        }
    }
}

impl BodyParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the set of body kinds that are decoded.
    pub fn enable_types(mut self, kinds: impl IntoIterator<Item = BodyKind>) -> Self {
        self.enabled = kinds.into_iter().collect();
        self
    }

    /// Adds a content type decoded as `kind`.
    pub fn extend_types(mut self, kind: BodyKind, content_type: impl Into<String>) -> Self {
        self.types_mut(kind).push(content_type.into());
        self
    }

    /// Sets the byte limit for every kind.
    pub fn limit(mut self, bytes: usize) -> Self {
        self.json_limit = bytes;
        self.form_limit = bytes;
        self.text_limit = bytes;
        self
    }

    /// Sets the byte limit for one kind.
    pub fn limit_for(mut self, kind: BodyKind, bytes: usize) -> Self {
        match kind {
            BodyKind::Json => self.json_limit = bytes,
            BodyKind::Form => self.form_limit = bytes,
            BodyKind::Text => self.text_limit = bytes,
        }
        self
    }

    /// Whether JSON bodies must be an object or an array (default `true`).
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Treats a request as JSON whenever `detect` says so, regardless of its
    /// content type.
    pub fn detect_json<F>(mut self, detect: F) -> Self
    where
        F: Fn(&Context) -> bool + Send + Sync + 'static,
    {
        self.detect_json = Some(Arc::new(detect));
        self
    }

    /// Handles decoding failures instead of failing the request. The
    /// pipeline continues after the callback returns.
    pub fn on_error<F>(mut self, on_error: F) -> Self
    where
        F: Fn(&Error, &mut Context) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(on_error));
        self
    }

    fn types_mut(&mut self, kind: BodyKind) -> &mut Vec<String> {
        match kind {
            BodyKind::Json => &mut self.json_types,
            BodyKind::Form => &mut self.form_types,
            BodyKind::Text => &mut self.text_types,
        }
    }

    fn limit_of(&self, kind: BodyKind) -> usize {
        match kind {
            BodyKind::Json => self.json_limit,
            BodyKind::Form => self.form_limit,
            BodyKind::Text => self.text_limit,
        }
    }

    /// The kind this request's body is decoded as, if any.
    fn kind_of(&self, ctx: &Context) -> Option<BodyKind> {
        let accepts = |types: &[String]| {
            let types: Vec<&str> = types.iter().map(String::as_str).collect();
            ctx.is(&types).is_some()
        };
        let enabled = |kind: BodyKind| self.enabled.contains(&kind);

        if enabled(BodyKind::Json)
            && (self.detect_json.as_ref().is_some_and(|detect| detect(ctx)) || accepts(&self.json_types))
        {
            Some(BodyKind::Json)
        } else if enabled(BodyKind::Form) && accepts(&self.form_types) {
            Some(BodyKind::Form)
        } else if enabled(BodyKind::Text) && accepts(&self.text_types) {
            Some(BodyKind::Text)
        } else {
            None
        }
    }

    /// Reads and decodes the body. `None` when the request is of no
    /// enabled kind.
    async fn parse(&self, ctx: &mut Context) -> Result<Option<(Value, String)>> {
        let Some(kind) = self.kind_of(ctx) else {
            return Ok(None);
        };
        let raw = read_text(ctx, self.limit_of(kind)).await?;
        let value = match kind {
            BodyKind::Json => parse_json(&raw, self.strict)?,
            BodyKind::Form => parse_form(&raw)?,
            BodyKind::Text => Value::String(raw.clone()),
        };
        debug!(?kind, bytes = raw.len(), "request body parsed");
        Ok(Some((value, raw)))
    }
}

impl Middleware for BodyParser {
    fn call<'a>(&'a self, ctx: &'a mut Context, next: Next<'a>) -> BoxFuture<'a> {
        Box::pin(async move {
            if ctx.request().body().is_some() || ctx.body_parser_disabled() {
                return next.run(ctx).await;
            }

            match self.parse(ctx).await {
                Ok(Some((value, raw))) => {
                    let request = ctx.request_mut();
                    request.set_parsed(value);
                    if request.raw_body().is_none() {
                        request.set_raw_body(raw);
                    }
                }
                Ok(None) => ctx.request_mut().set_parsed(Value::Object(Map::new())),
                Err(err) => match &self.on_error {
                    Some(on_error) => on_error(&err, ctx),
                    None => return Err(err),
                },
            }
            next.run(ctx).await
        })
    }
}

impl fmt::Debug for BodyParser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BodyParser")
            .field("enabled", &self.enabled)
            .field("json_types", &self.json_types)
            .field("form_types", &self.form_types)
            .field("text_types", &self.text_types)
            .field("json_limit", &self.json_limit)
            .field("form_limit", &self.form_limit)
            .field("text_limit", &self.text_limit)
            .field("strict", &self.strict)
            .finish_non_exhaustive()
    }
}

// ── reading ──────────────────────────────────────────────────────────────────

fn too_large(limit: usize) -> Error {
    HttpError::new(413)
        .with_message(format!("request body exceeds {limit} bytes"))
        .into()
}

async fn read_text(ctx: &mut Context, limit: usize) -> Result<String> {
    if let Some(declared) = ctx.get("content-length")
        && let Ok(declared) = declared.parse::<usize>()
        && declared > limit
    {
        return Err(too_large(limit));
    }
    let Some(mut body) = ctx.request_mut().take_body() else {
        return Ok(String::new());
    };

    let mut bytes = BytesMut::new();
    while let Some(frame) = body.frame().await {
        let Ok(data) = frame.map_err(Error::Body)?.into_data() else {
            continue;
        };
        if bytes.len() + data.len() > limit {
            return Err(too_large(limit));
        }
        bytes.extend_from_slice(&data);
    }

    String::from_utf8(bytes.to_vec())
        .map_err(|_| HttpError::new(400).with_message("request body is not valid UTF-8").into())
}

// ── decoding ─────────────────────────────────────────────────────────────────

fn invalid(kind: &str, detail: impl fmt::Display) -> Error {
    HttpError::new(400)
        .with_message(format!("invalid {kind} body: {detail}"))
        .into()
}

fn parse_json(raw: &str, strict: bool) -> Result<Value> {
    let trimmed = raw.trim_start();
    if trimmed.is_empty() {
        return Ok(Value::Object(Map::new()));
    }
    if strict && !trimmed.starts_with(['{', '[']) {
        return Err(invalid("JSON", "expected an object or an array"));
    }
    serde_json::from_str(raw).map_err(|e| invalid("JSON", e))
}

/// Repeated keys collect into an array in order of appearance.
fn parse_form(raw: &str) -> Result<Value> {
    let pairs: Vec<(String, String)> = serde_urlencoded::from_str(raw).map_err(|e| invalid("form", e))?;
    let mut map = Map::new();
    for (key, value) in pairs {
        let value = Value::String(value);
        match map.get_mut(&key) {
            Some(Value::Array(values)) => values.push(value),
            Some(existing) => {
                let first = existing.take();
                *existing = Value::Array(vec![first, value]);
            }
            None => {
                map.insert(key, value);
            }
        }
    }
    Ok(Value::Object(map))
}
