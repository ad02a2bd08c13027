//! HTTP server and graceful shutdown.
//!
//! The server accepts connections, hands every request to
//! [`Application::handle_from`], and on **SIGTERM** or Ctrl-C:
//!
//! 1. stops `listener.accept()` immediately, so no new connections are made;
//! 2. lets every in-flight connection task run to completion;
//! 3. returns from [`Server::serve`], which lets `main` exit cleanly.
//!
//! A request whose connection drops mid-flight is cancelled by hyper; the
//! application reports it to its error observers as
//! [`Error::Aborted`](crate::Error::Aborted).

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use crate::application::Application;
use crate::error::{Error, Result};

/// The HTTP server.
#[derive(Debug)]
pub struct Server {
    addr: SocketAddr,
}

impl Server {
    /// Configures the server to bind to `addr` when [`serve`](Server::serve)
    /// is called.
    ///
    /// ```rust,no_run
    /// use strata::{Application, Server};
    ///
    /// # async fn run() -> strata::Result<()> {
    /// Server::bind("0.0.0.0:3000")?.serve(Application::new()).await
    /// # }
    /// ```
    ///
    /// # Errors
    ///
    /// If `addr` is not a valid `host:port` socket address.
    pub fn bind(addr: &str) -> Result<Self> {
        let addr: SocketAddr = addr
            .parse()
            .map_err(|e| Error::other(format!("invalid socket address `{addr}`: {e}")))?;
        Ok(Self { addr })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Binds and serves `app` until a shutdown signal arrives and every
    /// in-flight connection has finished.
    pub async fn serve(self, app: Application) -> Result<()> {
        let listener = TcpListener::bind(self.addr).await?;
        serve_listener(listener, Arc::new(app), shutdown_signal()).await
    }
}

/// Accept loop over an already-bound listener, stopping when `shutdown`
/// resolves.
pub(crate) async fn serve_listener<S>(listener: TcpListener, app: Arc<Application>, shutdown: S) -> Result<()>
where
    S: Future<Output = ()>,
{
    let local = listener.local_addr()?;
    info!(addr = %local, env = %app.options().env, "strata listening");

    // Every connection task, so shutdown can wait for them.
    let mut tasks = tokio::task::JoinSet::new();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            // Check shutdown first so a signal stops accepting even while
            // connections are queued.
            biased;

            () = &mut shutdown => {
                info!(in_flight = tasks.len(), "shutdown signal received, draining connections");
                break;
            }

            res = listener.accept() => {
                let (stream, remote_addr) = match res {
                    Ok(v) => v,
                    Err(e) => {
                        error!("accept error: {e}");
                        continue;
                    }
                };

                let app = Arc::clone(&app);
                let io = TokioIo::new(stream);

                tasks.spawn(async move {
                    // Called once per request on the connection.
                    let svc = service_fn(move |req| {
                        let app = Arc::clone(&app);
                        async move { Ok::<_, Infallible>(app.handle_from(req, Some(remote_addr)).await) }
                    });

                    // HTTP/1.1 and HTTP/2, whichever the client negotiates.
                    if let Err(e) = ConnBuilder::new(TokioExecutor::new())
                        .serve_connection(io, svc)
                        .await
                    {
                        warn!(peer = %remote_addr, "connection error: {e}");
                    }
                });
            }

            // Reap finished tasks so the set does not grow without bound.
            Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
        }
    }

    while tasks.join_next().await.is_some() {}

    info!("strata stopped");
    Ok(())
}

// ── Shutdown signal ───────────────────────────────────────────────────────────

/// Resolves on the first SIGTERM or Ctrl-C. A signal that cannot be
/// installed is logged and never fires.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to install Ctrl-C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let sigterm = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c   => {}
        () = sigterm  => {}
    }
}
