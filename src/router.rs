//! Scoped request router.
//!
//! A [`Router`] is a view of the shared route trie at one prefix. Every
//! router handed out by an [`Application`](crate::Application) aliases the
//! same trie, and each one only defines nodes at or below its own prefix.
//!
//! ```rust
//! use strata::Application;
//! use strata::compose::from_fn;
//!
//! # fn main() -> strata::Result<()> {
//! let app = Application::new();
//! let api = app.create_router("/api")?;
//!
//! // Runs for /api and everything under it.
//! api.with(from_fn(|ctx, next| Box::pin(async move {
//!     ctx.set_header("x-api", "1")?;
//!     next.run(ctx).await
//! })));
//!
//! let users = api.sub_route("/users")?;
//! users
//!     .get("/:id", |ctx| Box::pin(async move {
//!         let id = ctx.param("id").unwrap_or_default().to_owned();
//!         ctx.set_body(format!("user {id}"));
//!         Ok(())
//!     }))?
//!     .delete("/:id", |ctx| Box::pin(async move {
//!         ctx.set_status(http::StatusCode::NO_CONTENT);
//!         Ok(())
//!     }))?;
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::compose::{BoxFuture, Middleware};
use crate::context::Context;
use crate::error::Result;
use crate::handler::Handler;
use crate::method::Method;
use crate::trie::{NodeId, Trie};

/// The trie shared between the application and all of its routers.
pub(crate) type SharedTrie = Arc<RwLock<Trie>>;

/// A route-registration handle scoped to a path prefix.
///
/// Cloning is cheap and yields another handle on the same scope.
#[derive(Clone)]
pub struct Router {
    trie: SharedTrie,
    node: NodeId,
}

impl Router {
    pub(crate) fn root(trie: SharedTrie) -> Self {
        let node = trie.read().root();
        Self { trie, node }
    }

    /// Returns a router for `self.prefix() + prefix`, defining its node so
    /// middleware can be attached before any route exists under it.
    pub fn sub_route(&self, prefix: &str) -> Result<Router> {
        let node = self.trie.write().define_under(self.node, prefix)?;
        let router = Self { trie: Arc::clone(&self.trie), node };
        debug!(prefix = %router.prefix(), "sub-route defined");
        Ok(router)
    }

    /// The full route pattern of this scope, e.g. `/api/users`.
    pub fn prefix(&self) -> String {
        self.trie.read().path_of(self.node)
    }

    /// Attaches `middleware` to this scope. It wraps every request whose
    /// matched route is this node or a descendant, inside the middleware of
    /// enclosing scopes.
    ///
    /// The root scope is never part of a route's chain; middleware for every
    /// request belong on [`Application::with`](crate::Application::with).
    pub fn with(&self, middleware: impl Middleware) -> &Self {
        let mut trie = self.trie.write();
        if self.node == trie.root() {
            warn!("middleware attached to the root scope never run");
        }
        trie.attach(self.node, Arc::new(middleware));
        self
    }

    /// Binds `handler` to `method` at `self.prefix() + path`.
    ///
    /// # Errors
    ///
    /// [`Error::RouteConflict`](crate::Error::RouteConflict) if the method is
    /// already bound there; the earlier handler is kept.
    pub fn on<F>(&self, method: Method, path: &str, handler: F) -> Result<&Self>
    where
        F: for<'a> Fn(&'a mut Context) -> BoxFuture<'a> + Send + Sync + 'static,
    {
        let mut trie = self.trie.write();
        let node = trie.define_under(self.node, path)?;
        trie.bind(node, method, handler.into_boxed_handler())?;
        debug!(%method, route = %trie.path_of(node), "route defined");
        Ok(self)
    }

    pub fn get<F>(&self, path: &str, handler: F) -> Result<&Self>
    where
        F: for<'a> Fn(&'a mut Context) -> BoxFuture<'a> + Send + Sync + 'static,
    {
        self.on(Method::Get, path, handler)
    }

    pub fn post<F>(&self, path: &str, handler: F) -> Result<&Self>
    where
        F: for<'a> Fn(&'a mut Context) -> BoxFuture<'a> + Send + Sync + 'static,
    {
        self.on(Method::Post, path, handler)
    }

    pub fn put<F>(&self, path: &str, handler: F) -> Result<&Self>
    where
        F: for<'a> Fn(&'a mut Context) -> BoxFuture<'a> + Send + Sync + 'static,
    {
        self.on(Method::Put, path, handler)
    }

    pub fn patch<F>(&self, path: &str, handler: F) -> Result<&Self>
    where
        F: for<'a> Fn(&'a mut Context) -> BoxFuture<'a> + Send + Sync + 'static,
    {
        self.on(Method::Patch, path, handler)
    }

    pub fn delete<F>(&self, path: &str, handler: F) -> Result<&Self>
    where
        F: for<'a> Fn(&'a mut Context) -> BoxFuture<'a> + Send + Sync + 'static,
    {
        self.on(Method::Delete, path, handler)
    }

    pub fn head<F>(&self, path: &str, handler: F) -> Result<&Self>
    where
        F: for<'a> Fn(&'a mut Context) -> BoxFuture<'a> + Send + Sync + 'static,
    {
        self.on(Method::Head, path, handler)
    }

    pub fn options<F>(&self, path: &str, handler: F) -> Result<&Self>
    where
        F: for<'a> Fn(&'a mut Context) -> BoxFuture<'a> + Send + Sync + 'static,
    {
        self.on(Method::Options, path, handler)
    }
}

impl fmt::Debug for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Router").field("prefix", &self.prefix()).finish()
    }
}
