//! Request tracing.

use std::time::Instant;

use tracing::field::Empty;
use tracing::{Instrument, info, info_span, warn};

use crate::compose::{BoxFuture, Middleware, Next};
use crate::context::Context;

/// Opens an `info` span per request and logs its outcome.
///
/// The span carries `method` and `path`; `status` and `latency_ms` are
/// recorded once everything downstream has finished. Mount it first so the
/// span covers the whole pipeline.
pub fn trace() -> Trace {
    Trace
}

/// See [`trace`].
#[derive(Clone, Copy, Debug, Default)]
pub struct Trace;

impl Middleware for Trace {
    fn call<'a>(&'a self, ctx: &'a mut Context, next: Next<'a>) -> BoxFuture<'a> {
        let span = info_span!(
            "request",
            method = %ctx.method(),
            path = %ctx.path(),
            status = Empty,
            latency_ms = Empty,
        );
        let recorder = span.clone();

        Box::pin(
            async move {
                let started = Instant::now();
                let result = next.run(ctx).await;
                let status = match &result {
                    Ok(()) => ctx.status(),
                    Err(err) => err.status(),
                };
                recorder.record("status", status.as_u16());
                recorder.record("latency_ms", started.elapsed().as_millis() as u64);
                match &result {
                    Ok(()) => info!("request completed"),
                    Err(err) => warn!(error = %err, "request failed"),
                }
                result
            }
            .instrument(span),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compose::{SharedMiddleware, compose, from_fn};
    use crate::error::Error;
    use std::sync::Arc;

    #[tokio::test]
    async fn passes_results_through() {
        let ok = compose([
            Arc::new(trace()) as SharedMiddleware,
            Arc::new(from_fn(|ctx, _next| Box::pin(async move {
                ctx.set_body("fine");
                Ok(())
            }))) as SharedMiddleware,
        ]);
        let mut ctx = Context::mock(http::Method::GET, "/traced");
        ok.run(&mut ctx).await.unwrap();
        assert_eq!(ctx.status(), http::StatusCode::OK);

        let failing = compose([
            Arc::new(trace()) as SharedMiddleware,
            Arc::new(from_fn(|_ctx, _next| Box::pin(async { Err(Error::http(418, "teapot")) }))) as SharedMiddleware,
        ]);
        let mut ctx = Context::mock(http::Method::GET, "/traced");
        let err = failing.run(&mut ctx).await.unwrap_err();
        assert_eq!(err.status(), http::StatusCode::IM_A_TEAPOT);
    }
}
