//! Route handler trait and type erasure.
//!
//! # How async handlers are stored
//!
//! Every trie node keeps a `HashMap<Method, BoxedHandler>`. Handlers are
//! closures of different concrete types, so they are hidden behind the
//! [`ErasedHandler`] trait object and stored uniformly.
//!
//! ```text
//! |ctx| Box::pin(async move { … })                 ← user writes this
//!        ↓ router.get("/", handler)
//! handler.into_boxed_handler()                     ← Handler blanket impl
//!        ↓
//! Arc::new(FnHandler(handler))                     ← heap-allocated wrapper
//!        ↓  stored as BoxedHandler = Arc<dyn ErasedHandler>
//! handler.call(&mut ctx)  at request time          ← one vtable dispatch
//! ```
//!
//! A handler borrows the [`Context`] mutably for as long as its future runs,
//! which is why it returns a [`BoxFuture`] tied to that borrow instead of an
//! owned `impl Future`.

use std::sync::Arc;

use crate::compose::BoxFuture;
use crate::context::Context;

/// Terminal step of a pipeline: something that can finish a request.
///
/// `#[doc(hidden)] pub` rather than `pub(crate)` because it appears in the
/// return type of the public `Handler` trait's `into_boxed_handler` method.
#[doc(hidden)]
pub trait ErasedHandler: Send + Sync {
    fn call<'a>(&'a self, ctx: &'a mut Context) -> BoxFuture<'a>;
}

/// A type-erased handler shared across concurrent requests.
#[doc(hidden)]
pub type BoxedHandler = Arc<dyn ErasedHandler>;

/// Implemented for every valid route handler.
///
/// You never implement this yourself. It is satisfied by any closure or
/// function with the signature:
///
/// ```text
/// for<'a> Fn(&'a mut Context) -> BoxFuture<'a>
/// ```
///
/// ```rust
/// use strata::{BoxFuture, Context};
///
/// fn hello(ctx: &mut Context) -> BoxFuture<'_> {
///     Box::pin(async move {
///         ctx.set_body("hello");
///         Ok(())
///     })
/// }
/// ```
///
/// The trait is **sealed**: only the blanket impl below can satisfy it.
pub trait Handler: private::Sealed + Send + Sync + 'static {
    #[doc(hidden)]
    fn into_boxed_handler(self) -> BoxedHandler;
}

mod private {
    pub trait Sealed {}
}

impl<F> private::Sealed for F where
    F: for<'a> Fn(&'a mut Context) -> BoxFuture<'a> + Send + Sync + 'static
{
}

impl<F> Handler for F
where
    F: for<'a> Fn(&'a mut Context) -> BoxFuture<'a> + Send + Sync + 'static,
{
    fn into_boxed_handler(self) -> BoxedHandler {
        Arc::new(FnHandler(self))
    }
}

/// Newtype bridging a concrete closure to the trait-object world.
struct FnHandler<F>(F);

impl<F> ErasedHandler for FnHandler<F>
where
    F: for<'a> Fn(&'a mut Context) -> BoxFuture<'a> + Send + Sync,
{
    fn call<'a>(&'a self, ctx: &'a mut Context) -> BoxFuture<'a> {
        (self.0)(ctx)
    }
}
