//! Onion-style middleware composition.
//!
//! A middleware receives the request [`Context`] and a [`Next`]
//! continuation. Awaiting `next.run(ctx)` runs everything downstream
//! (further middleware, then the terminal handler if one is chained); code
//! after that await runs on the way back out:
//!
//! ```text
//!   ┌─ mw1 before ─────────────────────────────── mw1 after ─┐
//!   │   ┌─ mw2 before ─────────────── mw2 after ─┐           │
//!   │   │   ┌─ mw3 before ─ mw3 after ─┐         │           │
//!   │   │   │        handler           │         │           │
//! ```
//!
//! A middleware that returns without calling `next` short-circuits the rest
//! of the chain. An `Err` from any layer propagates straight out; outer
//! layers see it as the result of their own `next.run(...)` and, if they
//! use `?`, skip their post-processing.
//!
//! [`Next::run`] consumes the continuation, so each layer can invoke the
//! downstream chain at most once.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::context::Context;
use crate::error::Result;
use crate::handler::ErasedHandler;

/// A heap-allocated future borrowing the context for `'a`.
///
/// `Send` so the whole request task can move between tokio worker threads.
pub type BoxFuture<'a, T = Result<()>> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// One layer of the onion.
///
/// Implement this for stateful middleware; use [`from_fn`] for closures.
pub trait Middleware: Send + Sync + 'static {
    fn call<'a>(&'a self, ctx: &'a mut Context, next: Next<'a>) -> BoxFuture<'a>;
}

/// A middleware shared between the trie, the application and composed stacks.
pub type SharedMiddleware = Arc<dyn Middleware>;

// ── Next ──────────────────────────────────────────────────────────────────────

/// The continuation handed to each middleware: "the rest of the pipeline".
pub struct Next<'a> {
    stack: &'a [SharedMiddleware],
    tail: Tail<'a>,
}

/// What runs once the stack is exhausted.
enum Tail<'a> {
    Stop,
    Endpoint(&'a dyn ErasedHandler),
    Outer(Box<Next<'a>>),
}

impl<'a> Next<'a> {
    pub(crate) fn new(stack: &'a [SharedMiddleware]) -> Self {
        Self { stack, tail: Tail::Stop }
    }

    /// A pipeline over `stack` that finishes by calling `endpoint`.
    pub(crate) fn with_endpoint(stack: &'a [SharedMiddleware], endpoint: &'a dyn ErasedHandler) -> Self {
        Self { stack, tail: Tail::Endpoint(endpoint) }
    }

    /// Runs the remainder of the pipeline.
    pub fn run<'c>(self, ctx: &'c mut Context) -> BoxFuture<'c>
    where
        'a: 'c,
    {
        match self.stack.split_first() {
            Some((head, rest)) => head.call(ctx, Next { stack: rest, tail: self.tail }),
            None => match self.tail {
                Tail::Stop => Box::pin(std::future::ready(Ok(()))),
                Tail::Endpoint(endpoint) => endpoint.call(ctx),
                Tail::Outer(outer) => outer.run(ctx),
            },
        }
    }

    /// Number of middleware left before the tail.
    pub fn remaining(&self) -> usize {
        self.stack.len()
    }
}

// ── Closures ──────────────────────────────────────────────────────────────────

/// Middleware built from a closure. See [`from_fn`].
pub struct FromFn<F>(F);

/// Turns a closure into a [`Middleware`].
///
/// ```rust
/// use strata::compose::from_fn;
///
/// let timing = from_fn(|ctx, next| Box::pin(async move {
///     let started = std::time::Instant::now();
///     next.run(ctx).await?;
///     let elapsed = format!("{}ms", started.elapsed().as_millis());
///     ctx.set_header("x-response-time", &elapsed)?;
///     Ok(())
/// }));
/// # let _ = timing;
/// ```
pub fn from_fn<F>(f: F) -> FromFn<F>
where
    F: for<'a> Fn(&'a mut Context, Next<'a>) -> BoxFuture<'a> + Send + Sync + 'static,
{
    FromFn(f)
}

impl<F> Middleware for FromFn<F>
where
    F: for<'a> Fn(&'a mut Context, Next<'a>) -> BoxFuture<'a> + Send + Sync + 'static,
{
    fn call<'a>(&'a self, ctx: &'a mut Context, next: Next<'a>) -> BoxFuture<'a> {
        (self.0)(ctx, next)
    }
}

// ── Composition ───────────────────────────────────────────────────────────────

/// An ordered middleware stack collapsed into one callable.
///
/// `Composed` is itself a [`Middleware`]: mounted inside another pipeline it
/// runs its own stack and then continues with the outer `next`, so stacks nest.
#[derive(Clone, Default)]
pub struct Composed {
    stack: Arc<[SharedMiddleware]>,
}

/// Composes `middleware`, first element outermost.
pub fn compose<I>(middleware: I) -> Composed
where
    I: IntoIterator<Item = SharedMiddleware>,
{
    Composed { stack: middleware.into_iter().collect() }
}

impl Composed {
    /// Appends a layer, returning the extended stack.
    pub fn with(self, middleware: impl Middleware) -> Self {
        let mut stack = self.stack.to_vec();
        stack.push(Arc::new(middleware));
        Self { stack: stack.into() }
    }

    /// Runs the stack with nothing after the innermost layer.
    pub fn run<'a>(&'a self, ctx: &'a mut Context) -> BoxFuture<'a> {
        Next::new(&self.stack).run(ctx)
    }

    /// Runs the stack and then `endpoint` as the innermost step.
    pub fn run_with<'a>(&'a self, ctx: &'a mut Context, endpoint: &'a dyn ErasedHandler) -> BoxFuture<'a> {
        Next::with_endpoint(&self.stack, endpoint).run(ctx)
    }

    pub fn len(&self) -> usize {
        self.stack.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }
}

impl Middleware for Composed {
    fn call<'a>(&'a self, ctx: &'a mut Context, next: Next<'a>) -> BoxFuture<'a> {
        Next {
            stack: &self.stack,
            tail: Tail::Outer(Box::new(next)),
        }
        .run(ctx)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::error::Error;
    use crate::handler::Handler;

    type Log = Arc<Mutex<Vec<u32>>>;

    /// Pushes `before`, runs downstream, then pushes `after`.
    fn marker(log: &Log, before: u32, after: u32) -> SharedMiddleware {
        let log = Arc::clone(log);
        Arc::new(from_fn(move |ctx, next| {
            let log = Arc::clone(&log);
            Box::pin(async move {
                log.lock().unwrap().push(before);
                next.run(ctx).await?;
                log.lock().unwrap().push(after);
                Ok(())
            })
        }))
    }

    fn failing(log: &Log, mark: u32) -> SharedMiddleware {
        let log = Arc::clone(log);
        Arc::new(from_fn(move |_ctx, _next| {
            let log = Arc::clone(&log);
            Box::pin(async move {
                log.lock().unwrap().push(mark);
                Err(Error::http(409, "nested failure"))
            })
        }))
    }

    fn stopper(log: &Log, mark: u32) -> SharedMiddleware {
        let log = Arc::clone(log);
        Arc::new(from_fn(move |ctx, _next| {
            let log = Arc::clone(&log);
            Box::pin(async move {
                log.lock().unwrap().push(mark);
                ctx.set_status(http::StatusCode::UNAUTHORIZED);
                Ok(())
            })
        }))
    }

    fn log() -> Log {
        Arc::new(Mutex::new(Vec::new()))
    }

    #[tokio::test]
    async fn onion_ordering() {
        let log = log();
        let pipeline = compose([marker(&log, 1, 6), marker(&log, 2, 5), marker(&log, 3, 4)]);

        let mut ctx = Context::mock(http::Method::GET, "/");
        pipeline.run(&mut ctx).await.unwrap();

        assert_eq!(*log.lock().unwrap(), [1, 2, 3, 4, 5, 6]);
    }

    #[tokio::test]
    async fn empty_stack_is_a_no_op() {
        let mut ctx = Context::mock(http::Method::GET, "/");
        compose([]).run(&mut ctx).await.unwrap();
        assert_eq!(ctx.status(), http::StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn endpoint_runs_innermost() {
        fn boxed<F>(f: F) -> crate::handler::BoxedHandler
        where
            F: for<'a> Fn(&'a mut Context) -> BoxFuture<'a> + Send + Sync + 'static,
        {
            f.into_boxed_handler()
        }

        let log = log();
        let endpoint_log = Arc::clone(&log);
        let endpoint = boxed(move |_ctx| {
            endpoint_log.lock().unwrap().push(99);
            Box::pin(async { Ok(()) })
        });

        let pipeline = compose([marker(&log, 1, 3), marker(&log, 2, 4)]);
        let mut ctx = Context::mock(http::Method::GET, "/");
        pipeline.run_with(&mut ctx, &*endpoint).await.unwrap();

        assert_eq!(*log.lock().unwrap(), [1, 2, 99, 4, 3]);
    }

    #[tokio::test]
    async fn short_circuit_skips_downstream() {
        let log = log();
        let pipeline = compose([marker(&log, 1, 4), stopper(&log, 2), marker(&log, 3, 5)]);

        let mut ctx = Context::mock(http::Method::GET, "/");
        pipeline.run(&mut ctx).await.unwrap();

        assert_eq!(*log.lock().unwrap(), [1, 2, 4]);
        assert_eq!(ctx.status(), http::StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn failure_surfaces_once_and_stops_unwinding() {
        let log = log();
        let pipeline = compose([marker(&log, 1, 10), marker(&log, 2, 20), failing(&log, 3), marker(&log, 4, 40)]);

        let mut ctx = Context::mock(http::Method::GET, "/");
        let err = pipeline.run(&mut ctx).await.unwrap_err();

        assert_eq!(err.status(), http::StatusCode::CONFLICT);
        // Layers before the failure ran their "before" half only.
        assert_eq!(*log.lock().unwrap(), [1, 2, 3]);
    }

    #[tokio::test]
    async fn nested_compositions_continue_outward() {
        let log = log();
        let inner = compose([marker(&log, 2, 5), marker(&log, 3, 4)]);
        let outer = compose([marker(&log, 1, 6), Arc::new(inner) as SharedMiddleware]);

        let mut ctx = Context::mock(http::Method::GET, "/");
        outer.run(&mut ctx).await.unwrap();

        assert_eq!(*log.lock().unwrap(), [1, 2, 3, 4, 5, 6]);
    }

    #[tokio::test]
    async fn with_appends_innermost() {
        let log = log();
        let log_a = Arc::clone(&log);
        let pipeline = Composed::default()
            .with(from_fn(move |ctx, next| {
                let log = Arc::clone(&log_a);
                Box::pin(async move {
                    log.lock().unwrap().push(1);
                    next.run(ctx).await
                })
            }))
            .with(from_fn(|ctx, next| Box::pin(async move {
                assert_eq!(next.remaining(), 0);
                next.run(ctx).await
            })));

        assert_eq!(pipeline.len(), 2);
        let mut ctx = Context::mock(http::Method::GET, "/");
        pipeline.run(&mut ctx).await.unwrap();
        assert_eq!(*log.lock().unwrap(), [1]);
    }
}
