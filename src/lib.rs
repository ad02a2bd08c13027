//! # strata
//!
//! An onion-style middleware pipeline and a scoped path-trie router for
//! async HTTP services on hyper and tokio.
//!
//! ## The model
//!
//! - An [`Application`] owns a list of global middleware and one route trie.
//! - Every [`Router`] is a view of that trie at a path prefix. Middleware
//!   attached to a router wrap every route at or below its prefix.
//! - A request runs through the global middleware, is matched against the
//!   trie, then runs through the middleware of each trie node from the root
//!   down to the matched one, and finally the handler for its method.
//! - Middleware see a `&mut` [`Context`] and a [`Next`] continuation. Code
//!   before `next.run(ctx).await` runs on the way in, code after it on the
//!   way out.
//!
//! Whatever body and status the pipeline leaves on the context become the
//! response. Errors, panics and dropped connections all end in one place,
//! [`Context::on_error`].
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use strata::compose::from_fn;
//! use strata::middleware::{body_parser, trace};
//! use strata::{Application, BoxFuture, Context, Server};
//!
//! #[tokio::main]
//! async fn main() -> strata::Result<()> {
//!     let mut app = Application::new();
//!     app.with(trace()).with(body_parser());
//!
//!     let users = app.create_router("/users")?;
//!     users.with(from_fn(|ctx, next| Box::pin(async move {
//!         if ctx.get("authorization").is_none() {
//!             return Err(ctx.throw(401, "login first"));
//!         }
//!         next.run(ctx).await
//!     })));
//!     users.get("/:id(\\d+)", get_user)?.post("/", create_user)?;
//!
//!     Server::bind("0.0.0.0:3000")?.serve(app).await
//! }
//!
//! fn get_user(ctx: &mut Context) -> BoxFuture<'_> {
//!     Box::pin(async move {
//!         let id: u64 = ctx.param("id").unwrap_or_default().parse().unwrap_or_default();
//!         ctx.set_body(serde_json::json!({ "id": id }));
//!         Ok(())
//!     })
//! }
//!
//! fn create_user(ctx: &mut Context) -> BoxFuture<'_> {
//!     Box::pin(async move {
//!         let name = ctx.request().body().and_then(|b| b["name"].as_str()).unwrap_or("anonymous");
//!         let created = serde_json::json!({ "name": name });
//!         ctx.set_status(http::StatusCode::CREATED);
//!         ctx.set_body(created);
//!         Ok(())
//!     })
//! }
//! ```

mod application;
mod body;
mod config;
mod context;
mod error;
mod handler;
mod method;
mod request;
mod response;
mod router;
mod server;
mod state;
mod status;
mod trie;

pub mod compose;
pub mod middleware;

pub use application::{Application, ErrorObserver};
pub use body::{Body, BodyStream};
pub use compose::{BoxFuture, Middleware, Next, compose, from_fn};
pub use config::Options;
pub use context::Context;
pub use error::{BoxError, Error, HttpError, Result};
pub use handler::Handler;
pub use method::{Method, UnknownMethod};
pub use request::{Request, RequestBody};
pub use response::{ContentType, Response, ResponseBody};
pub use router::Router;
pub use server::Server;
pub use state::State;
pub use trie::{Match, NodeId, Params, Trie};

#[doc(hidden)]
pub use handler::{BoxedHandler, ErasedHandler};
