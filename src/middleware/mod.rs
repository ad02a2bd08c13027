//! Built-in middleware.
//!
//! - [`body_parser`]: decodes JSON, form and text request bodies into
//!   [`Request::body`](crate::Request::body)
//! - [`trace`]: per-request span with method, path, status, latency
//!
//! Both are plain [`Middleware`](crate::Middleware) values, mounted with
//! [`Application::with`](crate::Application::with) or
//! [`Router::with`](crate::Router::with) like any other layer.

pub mod body_parser;
pub mod trace;

pub use body_parser::{BodyKind, BodyParser, body_parser};
pub use trace::{Trace, trace};
