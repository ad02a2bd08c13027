//! The application: global middleware, the route trie, and the per-request
//! dispatch that ties them together.
//!
//! One request goes through these steps, in order and at most once each:
//!
//! 1. a [`Context`] is built around the request;
//! 2. the global middleware run, outermost first;
//! 3. innermost, the path is matched against the trie. On a match the
//!    parameters are bound and the middleware of every node from the root
//!    down to the matched node run, then the handler for the method, if any;
//! 4. the response is finalized from whatever body and status were set;
//! 5. any failure along the way, including a panic or the client going away,
//!    is delivered once to [`Context::on_error`].
//!
//! A request whose path or method matches nothing keeps the default `404`.

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context as TaskContext, Poll, ready};

use bytes::Bytes;
use futures_util::{FutureExt, Stream, StreamExt};
use http::Version;
use http::header::CONTENT_LENGTH;
use http_body_util::BodyExt;
use parking_lot::RwLock;
use tracing::{debug, error, trace};

use crate::body::{Body, BodyStream};
use crate::compose::{BoxFuture, Composed, Middleware, compose};
use crate::config::Options;
use crate::context::Context;
use crate::error::{BoxError, Error, Result};
use crate::handler::ErasedHandler;
use crate::method::Method;
use crate::request::Request;
use crate::response::{self, ResponseBody};
use crate::router::{Router, SharedTrie};
use crate::status;
use crate::trie::Trie;

/// Called with every request failure and the context it happened in.
pub type ErrorObserver = Arc<dyn Fn(&Error, &Context) + Send + Sync>;

/// Application-wide data every context points back to.
#[derive(Clone)]
pub(crate) struct Shared {
    pub(crate) options: Options,
    pub(crate) observers: Vec<ErrorObserver>,
}

/// An HTTP application.
///
/// ```rust
/// use strata::Application;
/// use strata::compose::from_fn;
///
/// # fn main() -> strata::Result<()> {
/// let mut app = Application::new();
/// app.with(from_fn(|ctx, next| Box::pin(async move {
///     next.run(ctx).await?;
///     ctx.set_header("x-powered-by", "strata")
/// })));
///
/// app.router().get("/hello/:name", |ctx| Box::pin(async move {
///     let greeting = format!("hello {}", ctx.param("name").unwrap_or("stranger"));
///     ctx.set_body(greeting);
///     Ok(())
/// }))?;
/// # Ok(())
/// # }
/// ```
pub struct Application {
    shared: Arc<Shared>,
    middleware: Composed,
    routes: RouteEndpoint,
}

impl Application {
    /// An application configured from the environment
    /// (see [`Options::from_env`]).
    pub fn new() -> Self {
        Self::with_options(Options::from_env())
    }

    pub fn with_options(options: Options) -> Self {
        Self {
            shared: Arc::new(Shared { options, observers: Vec::new() }),
            middleware: Composed::default(),
            routes: RouteEndpoint { trie: Arc::new(RwLock::new(Trie::new())) },
        }
    }

    pub fn options(&self) -> &Options {
        &self.shared.options
    }

    /// Appends a global middleware. Global middleware run for every request,
    /// matched or not, and wrap all route-scoped middleware.
    pub fn with(&mut self, middleware: impl Middleware) -> &mut Self {
        self.middleware = std::mem::take(&mut self.middleware).with(middleware);
        self
    }

    /// A router at the root of the path trie.
    pub fn router(&self) -> Router {
        Router::root(Arc::clone(&self.routes.trie))
    }

    /// A router scoped to `prefix`. Routers created from the same
    /// application share one trie, so routes can be added from any of them
    /// at any time, including while the application is serving.
    pub fn create_router(&self, prefix: &str) -> Result<Router> {
        self.router().sub_route(prefix)
    }

    /// Registers an error observer. Without any, failures are logged with
    /// `tracing` unless [`Options::silent`] is set.
    pub fn on_error<F>(&mut self, observer: F) -> &mut Self
    where
        F: Fn(&Error, &Context) + Send + Sync + 'static,
    {
        Arc::make_mut(&mut self.shared).observers.push(Arc::new(observer));
        self
    }

    /// Runs one request through the application.
    ///
    /// Never fails: every error becomes an error response.
    pub async fn handle<B>(&self, req: http::Request<B>) -> http::Response<ResponseBody>
    where
        B: hyper::body::Body<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        self.handle_from(req, None).await
    }

    /// [`handle`](Self::handle) with the peer address the request came from.
    pub async fn handle_from<B>(&self, req: http::Request<B>, peer: Option<SocketAddr>) -> http::Response<ResponseBody>
    where
        B: hyper::body::Body<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        let req = req.map(|body| body.map_err(Into::into).boxed_unsync());
        let ctx = Context::new(Request::new(req, peer), Arc::clone(&self.shared));
        let mut flight = InFlight::new(ctx);

        let outcome = AssertUnwindSafe(self.dispatch(flight.ctx()))
            .catch_unwind()
            .await
            .unwrap_or_else(|payload| Err(Error::from_panic(payload)));

        let ctx = flight.ctx();
        match outcome.and_then(|()| respond(ctx)) {
            Ok(()) => trace!(status = %ctx.status(), "request finalized"),
            Err(err) => ctx.on_error(err),
        }
        flight.finish()
    }

    fn dispatch<'a>(&'a self, ctx: &'a mut Context) -> BoxFuture<'a> {
        self.middleware.run_with(ctx, &self.routes)
    }
}

impl Default for Application {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Application {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Application")
            .field("options", &self.shared.options)
            .field("middleware", &self.middleware.len())
            .field("routes", &self.routes.trie.read().len())
            .finish()
    }
}

// ── routing step ──────────────────────────────────────────────────────────────

/// The innermost step of the global pipeline: match, then run the scoped
/// pipeline of the matched node.
struct RouteEndpoint {
    trie: SharedTrie,
}

impl ErasedHandler for RouteEndpoint {
    fn call<'a>(&'a self, ctx: &'a mut Context) -> BoxFuture<'a> {
        Box::pin(async move {
            let Ok(method) = Method::try_from(ctx.method()) else {
                trace!(method = %ctx.method(), "unsupported method");
                return Ok(());
            };

            // Clone out what the request needs so the lock is released
            // before anything is awaited.
            let found = {
                let trie = self.trie.read();
                trie.matches(ctx.path()).map(|m| {
                    (m.params, trie.middleware_chain(m.node), trie.handler(m.node, method))
                })
            };
            let Some((params, chain, handler)) = found else {
                debug!(path = ctx.path(), "no route matched");
                return Ok(());
            };

            debug!(path = ctx.path(), params = params.len(), scoped = chain.len(), "route matched");
            ctx.params = params;
            let scoped = compose(chain);
            match &handler {
                Some(handler) => scoped.run_with(ctx, &**handler).await,
                None => scoped.run(ctx).await,
            }
        })
    }
}

// ── finalization ──────────────────────────────────────────────────────────────

/// Writes the response out of the context's body and status.
fn respond(ctx: &mut Context) -> Result<()> {
    if !ctx.respond {
        trace!("respond disabled; response left to middleware");
        return Ok(());
    }
    let res = &mut ctx.response;
    if !res.writable() {
        return Ok(());
    }

    let code = res.status();
    if status::is_empty(code) {
        // Dropping the body also strips its entity headers.
        res.set_body(Body::Empty);
        res.end(None);
        return Ok(());
    }

    if *ctx.request.method() == http::Method::HEAD {
        if !res.headers_sent()
            && !res.headers().contains_key(CONTENT_LENGTH)
            && let Some(len) = res.length()
        {
            res.set_length(len);
        }
        res.end(None);
        return Ok(());
    }

    match res.take_body() {
        Body::Empty => {
            let text = if ctx.request.version() >= Version::HTTP_2 {
                code.as_u16().to_string()
            } else {
                res.message()
            };
            if !res.headers_sent() {
                res.set_type("text");
                res.set_length(text.len() as u64);
            }
            res.end(Some(Bytes::from(text)));
        }
        Body::Bytes(bytes) => {
            res.end(Some(bytes));
        }
        Body::Text(text) => {
            res.end(Some(Bytes::from(text)));
        }
        Body::Stream(stream) => {
            res.pipe(stream);
        }
        Body::Json(value) => {
            let bytes = serde_json::to_vec(&value)?;
            if !res.headers_sent() {
                res.set_length(bytes.len() as u64);
            }
            res.end(Some(Bytes::from(bytes)));
        }
    }
    Ok(())
}

// ── early termination ─────────────────────────────────────────────────────────

/// Owns the context while its request is in flight.
///
/// If the request future is dropped before [`finish`](InFlight::finish),
/// typically because the client disconnected, the drop delivers
/// [`Error::Aborted`] to the context's error sink. A piped body keeps the
/// guard armed until the stream ends, so a stream failure or a disconnect
/// mid-stream reaches the sink too.
struct InFlight {
    ctx: Context,
    armed: bool,
}

impl InFlight {
    fn new(ctx: Context) -> Self {
        Self { ctx, armed: true }
    }

    fn ctx(&mut self) -> &mut Context {
        &mut self.ctx
    }

    fn finish(mut self) -> http::Response<ResponseBody> {
        let piped = self.ctx.response.take_piped();
        let res = self.ctx.response.take_http();
        match piped {
            Some(stream) => {
                let watched = WatchedStream { inner: stream, flight: Some(self) };
                res.map(|_| response::stream_body(Box::pin(watched)))
            }
            None => {
                self.armed = false;
                res
            }
        }
    }

    fn complete(mut self) {
        self.armed = false;
    }

    fn fail(mut self, err: Error) {
        self.armed = false;
        self.ctx.on_error(err);
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        if self.armed {
            self.armed = false;
            self.ctx.on_error(Error::Aborted);
        }
    }
}

/// A piped body that settles its request's guard when it finishes.
struct WatchedStream {
    inner: BodyStream,
    flight: Option<InFlight>,
}

impl Stream for WatchedStream {
    type Item = io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Option<Self::Item>> {
        let item = ready!(self.inner.poll_next_unpin(cx));
        match &item {
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                if let Some(flight) = self.flight.take() {
                    flight.fail(Error::Io(io::Error::new(e.kind(), e.to_string())));
                }
            }
            None => {
                if let Some(flight) = self.flight.take() {
                    trace!("piped body finished");
                    flight.complete();
                }
            }
        }
        Poll::Ready(item)
    }
}

// ── default observer ──────────────────────────────────────────────────────────

/// Logs failures that are neither `404`s nor meant for the client.
pub(crate) fn log_error(err: &Error, ctx: &Context) {
    if ctx.options().silent || err.status() == http::StatusCode::NOT_FOUND || err.expose() {
        return;
    }
    error!(
        status = err.status().as_u16(),
        method = %ctx.method(),
        path = ctx.path(),
        error = %err,
        "request failed"
    );
}
