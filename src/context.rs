//! Per-request context.
//!
//! A [`Context`] owns the [`Request`] and [`Response`] of one exchange and
//! forwards the subset of their methods that handlers reach for most, so
//! `ctx.set_body(..)` and `ctx.path()` read the same as `ctx.response_mut()`
//! and `ctx.request()` would. It is created when the request arrives, handed
//! by `&mut` through every middleware and the handler, and consumed when the
//! response is produced.

use std::net::IpAddr;
use std::sync::Arc;

use bytes::Bytes;
use http::{HeaderMap, StatusCode, Version};
use serde::de::DeserializeOwned;
use tracing::trace;

use crate::application::{self, Shared};
use crate::body::Body;
use crate::config::Options;
use crate::error::{Error, Result};
use crate::request::Request;
use crate::response::Response;
use crate::state::State;
use crate::status;
use crate::trie::Params;

/// Everything a middleware or handler knows about the current request.
pub struct Context {
    pub(crate) request: Request,
    pub(crate) response: Response,
    pub(crate) params: Params,
    pub(crate) respond: bool,
    state: State,
    disable_body_parser: bool,
    app: Arc<Shared>,
}

impl Context {
    pub(crate) fn new(request: Request, app: Arc<Shared>) -> Self {
        Self {
            request,
            response: Response::new(),
            params: Params::default(),
            respond: true,
            state: State::new(),
            disable_body_parser: false,
            app,
        }
    }

    /// A bodiless request context for unit tests.
    #[cfg(test)]
    pub(crate) fn mock(method: http::Method, path: &str) -> Self {
        Self::mock_request(http::Request::builder().method(method).uri(path))
    }

    #[cfg(test)]
    pub(crate) fn mock_request(builder: http::request::Builder) -> Self {
        Self::mock_with(builder, Options::default())
    }

    #[cfg(test)]
    pub(crate) fn mock_with(builder: http::request::Builder, options: Options) -> Self {
        Self::mock_body(builder, Bytes::new(), options)
    }

    #[cfg(test)]
    pub(crate) fn mock_body(builder: http::request::Builder, body: Bytes, options: Options) -> Self {
        use http_body_util::{BodyExt, Full};

        let body = Full::new(body)
            .map_err(|never: std::convert::Infallible| -> crate::error::BoxError { match never {} })
            .boxed_unsync();
        let req = builder.body(body).expect("valid mock request");
        let shared = Shared { options, observers: Vec::new() };
        Self::new(Request::new(req, None), Arc::new(shared))
    }

    // ── components ────────────────────────────────────────────────────────────

    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn request_mut(&mut self) -> &mut Request {
        &mut self.request
    }

    pub fn response(&self) -> &Response {
        &self.response
    }

    pub fn response_mut(&mut self) -> &mut Response {
        &mut self.response
    }

    pub fn state(&self) -> &State {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut State {
        &mut self.state
    }

    pub fn options(&self) -> &Options {
        &self.app.options
    }

    /// Signing secrets configured on the application.
    pub fn keys(&self) -> &[String] {
        &self.app.options.keys
    }

    // ── routing ───────────────────────────────────────────────────────────────

    /// A decoded path parameter of the matched route. Empty until routing
    /// has happened.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name)
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    // ── request forwarding ────────────────────────────────────────────────────

    pub fn method(&self) -> &http::Method {
        self.request.method()
    }

    pub fn path(&self) -> &str {
        self.request.path()
    }

    pub fn url(&self) -> String {
        self.request.url()
    }

    pub fn original_url(&self) -> &str {
        self.request.original_url()
    }

    pub fn querystring(&self) -> &str {
        self.request.querystring()
    }

    pub fn query<T: DeserializeOwned>(&self) -> Result<T> {
        self.request.query()
    }

    pub fn query_pairs(&self) -> Vec<(String, String)> {
        self.request.query_pairs()
    }

    /// A request header.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.request.header(name)
    }

    pub fn headers(&self) -> &HeaderMap {
        self.request.headers()
    }

    pub fn is<'t>(&self, types: &[&'t str]) -> Option<&'t str> {
        self.request.is(types)
    }

    pub fn idempotent(&self) -> bool {
        self.request.idempotent()
    }

    pub fn version(&self) -> Version {
        self.request.version()
    }

    /// `Host` (or `:authority`), or the first `X-Forwarded-Host` when proxy
    /// headers are trusted.
    pub fn host(&self) -> Option<&str> {
        if self.app.options.proxy
            && let Some(forwarded) = first_forwarded(self.request.header("x-forwarded-host"))
        {
            return Some(forwarded);
        }
        if self.request.version() >= Version::HTTP_2
            && let Some(authority) = self.request.uri().authority()
        {
            return Some(authority.as_str());
        }
        self.request
            .header(http::header::HOST.as_str())
            .or_else(|| self.request.uri().authority().map(|a| a.as_str()))
    }

    /// [`host`](Self::host) without the port. IPv6 literals keep their
    /// brackets.
    pub fn hostname(&self) -> Option<&str> {
        let host = self.host()?;
        if host.starts_with('[') {
            return host.find(']').map(|end| &host[..=end]);
        }
        Some(host.split(':').next().unwrap_or(host))
    }

    /// `"https"` or `"http"`; with proxy trust, the first
    /// `X-Forwarded-Proto`.
    pub fn protocol(&self) -> &str {
        if self.app.options.proxy
            && let Some(proto) = first_forwarded(self.request.header("x-forwarded-proto"))
        {
            return proto;
        }
        match self.request.uri().scheme_str() {
            Some("https") => "https",
            _ => "http",
        }
    }

    pub fn secure(&self) -> bool {
        self.protocol() == "https"
    }

    /// Client chain from `X-Forwarded-For`, closest-to-client first. Empty
    /// unless proxy headers are trusted.
    pub fn ips(&self) -> Vec<&str> {
        if !self.app.options.proxy {
            return Vec::new();
        }
        self.request
            .header("x-forwarded-for")
            .map(|v| v.split(',').map(str::trim).filter(|s| !s.is_empty()).collect())
            .unwrap_or_default()
    }

    /// The client address: the first of [`ips`](Self::ips), else the peer
    /// socket address. Empty when neither is known.
    pub fn ip(&self) -> String {
        self.ips()
            .first()
            .map(|ip| (*ip).to_owned())
            .or_else(|| self.request.remote_addr().map(|addr| addr.ip().to_string()))
            .unwrap_or_default()
    }

    /// Hostname labels left of the application's domain, nearest first:
    /// `tobi.ferrets.example.com` with an offset of 2 gives
    /// `["ferrets", "tobi"]`.
    pub fn subdomains(&self) -> Vec<&str> {
        let Some(hostname) = self.hostname() else {
            return Vec::new();
        };
        if hostname.starts_with('[') || hostname.parse::<IpAddr>().is_ok() {
            return Vec::new();
        }
        hostname
            .split('.')
            .rev()
            .skip(self.app.options.subdomain_offset)
            .collect()
    }

    // ── response forwarding ───────────────────────────────────────────────────

    pub fn status(&self) -> StatusCode {
        self.response.status()
    }

    pub fn set_status(&mut self, status: StatusCode) {
        self.response.set_status(status);
    }

    pub fn message(&self) -> String {
        self.response.message()
    }

    pub fn set_message(&mut self, message: impl Into<String>) {
        self.response.set_message(message);
    }

    pub fn body(&self) -> &Body {
        self.response.body()
    }

    pub fn set_body(&mut self, body: impl Into<Body>) {
        self.response.set_body(body);
    }

    pub fn set_header(&mut self, name: &str, value: &str) -> Result<()> {
        self.response.set_header(name, value)
    }

    pub fn append_header(&mut self, name: &str, value: &str) -> Result<()> {
        self.response.append_header(name, value)
    }

    pub fn remove_header(&mut self, name: &str) {
        self.response.remove_header(name);
    }

    pub fn set_type(&mut self, ty: &str) {
        self.response.set_type(ty);
    }

    pub fn set_length(&mut self, len: u64) {
        self.response.set_length(len);
    }

    pub fn redirect(&mut self, url: &str) -> Result<()> {
        self.response.redirect(url)
    }

    pub fn attachment(&mut self, filename: Option<&str>) -> Result<()> {
        self.response.attachment(filename)
    }

    pub fn vary(&mut self, field: &str) -> Result<()> {
        self.response.vary(field)
    }

    pub fn flush_headers(&mut self) {
        self.response.flush_headers();
    }

    pub fn headers_sent(&self) -> bool {
        self.response.headers_sent()
    }

    pub fn writable(&self) -> bool {
        self.response.writable()
    }

    // ── flags ─────────────────────────────────────────────────────────────────

    /// Whether the application writes the response after the pipeline
    /// returns. Middleware that call [`Response::end`] themselves turn this
    /// off.
    pub fn respond(&self) -> bool {
        self.respond
    }

    pub fn set_respond(&mut self, respond: bool) {
        self.respond = respond;
    }

    pub fn body_parser_disabled(&self) -> bool {
        self.disable_body_parser
    }

    /// Makes the body parser leave this request's body untouched.
    pub fn disable_body_parser(&mut self) {
        self.disable_body_parser = true;
    }

    // ── errors ────────────────────────────────────────────────────────────────

    /// Builds an HTTP error to return from a handler:
    ///
    /// ```rust
    /// # use strata::{BoxFuture, Context};
    /// fn admin(ctx: &mut Context) -> BoxFuture<'_> {
    ///     Box::pin(async move {
    ///         if ctx.get("x-admin").is_none() {
    ///             return Err(ctx.throw(403, "admins only"));
    ///         }
    ///         ctx.set_body("welcome");
    ///         Ok(())
    ///     })
    /// }
    /// ```
    pub fn throw(&self, status: u16, message: impl Into<String>) -> Error {
        Error::http(status, message)
    }

    /// `Err(self.throw(status, message))` unless `condition` holds.
    pub fn assert(&self, condition: bool, status: u16, message: impl Into<String>) -> Result<()> {
        if condition { Ok(()) } else { Err(self.throw(status, message)) }
    }

    /// The error sink. Every failure of a request ends up here exactly once.
    ///
    /// Observers are notified first. If the response has already started
    /// nothing else can be done; otherwise it is replaced by a plain-text
    /// error response carrying the error's status and, for exposable errors,
    /// its message.
    pub fn on_error(&mut self, err: Error) {
        if self.app.observers.is_empty() {
            application::log_error(&err, self);
        } else {
            for observer in &self.app.observers {
                observer(&err, self);
            }
        }

        if self.response.headers_sent() || !self.response.writable() {
            trace!(error = %err, "response already started; error not written");
            return;
        }

        let status = err.status();
        self.response.clear_headers();
        if let Some(headers) = err.headers() {
            for (name, value) in headers {
                self.response.headers_mut().append(name.clone(), value.clone());
            }
        }
        self.response.take_body();
        self.response.set_status(status);
        self.response.set_type("text");

        let message = if err.expose() { err.to_string() } else { status::message(status.as_u16()) };
        self.response.set_length(message.len() as u64);
        self.response.end(Some(Bytes::from(message)));
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("request", &self.request)
            .field("response", &self.response)
            .field("params", &self.params)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

fn first_forwarded(value: Option<&str>) -> Option<&str> {
    value?.split(',').next().map(str::trim).filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn ctx(builder: http::request::Builder, proxy: bool) -> Context {
        Context::mock_with(builder, Options::default().proxy(proxy))
    }

    #[test]
    fn host_and_hostname() {
        let c = ctx(http::Request::get("/").header("host", "example.com:8080"), false);
        assert_eq!(c.host(), Some("example.com:8080"));
        assert_eq!(c.hostname(), Some("example.com"));

        let c = ctx(http::Request::get("/").header("host", "[::1]:3000"), false);
        assert_eq!(c.hostname(), Some("[::1]"));
    }

    #[test]
    fn forwarded_headers_need_proxy_trust() {
        let build = || {
            http::Request::get("/")
                .header("host", "internal:80")
                .header("x-forwarded-host", "public.example.com, internal")
                .header("x-forwarded-proto", "https")
                .header("x-forwarded-for", "203.0.113.7, 10.0.0.1")
        };

        let untrusted = ctx(build(), false);
        assert_eq!(untrusted.hostname(), Some("internal"));
        assert_eq!(untrusted.protocol(), "http");
        assert!(untrusted.ips().is_empty());
        assert_eq!(untrusted.ip(), "");

        let trusted = ctx(build(), true);
        assert_eq!(trusted.host(), Some("public.example.com"));
        assert!(trusted.secure());
        assert_eq!(trusted.ips(), ["203.0.113.7", "10.0.0.1"]);
        assert_eq!(trusted.ip(), "203.0.113.7");
    }

    #[rstest]
    #[case("tobi.ferrets.example.com", 2, &["ferrets", "tobi"])]
    #[case("tobi.ferrets.example.com", 3, &["tobi"])]
    #[case("example.com", 2, &[])]
    #[case("127.0.0.1", 2, &[])]
    fn subdomains(#[case] host: &str, #[case] offset: usize, #[case] expected: &[&str]) {
        let c = Context::mock_with(
            http::Request::get("/").header("host", host),
            Options::default().subdomain_offset(offset),
        );
        assert_eq!(c.subdomains(), expected);
    }

    #[test]
    fn params_are_empty_before_routing() {
        let c = Context::mock(http::Method::GET, "/users/1");
        assert!(c.params().is_empty());
        assert_eq!(c.param("id"), None);
    }

    #[test]
    fn error_sink_writes_plain_text() {
        let mut c = Context::mock(http::Method::GET, "/");
        c.set_header("x-stale", "1").unwrap();
        c.set_body("partial");
        c.on_error(Error::http(400, "bad input"));

        let res = c.response();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        assert_eq!(res.header("x-stale"), None);
        assert_eq!(res.content_type(), Some("text/plain; charset=utf-8"));
        assert_eq!(res.header("content-length"), Some("9"));
        assert!(!res.writable());
    }

    #[test]
    fn error_sink_hides_internal_messages() {
        let mut c = Context::mock(http::Method::GET, "/");
        c.on_error(Error::other("database exploded"));
        assert_eq!(c.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(c.response().header("content-length"), Some("21"));
    }

    #[test]
    fn error_sink_keeps_started_responses() {
        let mut c = Context::mock(http::Method::GET, "/");
        c.set_body("done");
        c.response_mut().end(Some(Bytes::from_static(b"done")));
        c.on_error(Error::http(500, "late"));
        assert_eq!(c.status(), StatusCode::OK);
    }

    #[test]
    fn assert_builds_http_errors() {
        let c = Context::mock(http::Method::GET, "/");
        assert!(c.assert(true, 401, "login").is_ok());
        let err = c.assert(false, 401, "login").unwrap_err();
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
        assert!(err.expose());
    }

    #[test]
    fn state_survives_across_layers() {
        let mut c = Context::mock(http::Method::GET, "/");
        c.state_mut().insert(42_u64);
        assert_eq!(c.state().get::<u64>(), Some(&42));
    }
}
