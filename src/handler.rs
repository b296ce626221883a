//! Handler trait and type erasure.
//!
//! # How handlers are stored
//!
//! The registry holds handlers of *different* types in a single ordered
//! `Vec`. Rust collections hold one concrete type, so every handler is
//! erased behind `Arc<dyn Handler>` and called through one vtable hop.
//!
//! Every handler has the same suspension-capable signature: it borrows the
//! request and the response for the duration of its future and reports how
//! the chain should continue.
//!
//! ```text
//! |req, res| Box::pin(async move { ...; Ok(Flow::Next) })   ← user writes this
//!        ↓ app.get("/", …) / arbor::handler(…)
//! Arc::new(closure)                                          ← BoxedHandler
//!        ↓ at request time
//! handler.call(&mut req, &mut res).await                     ← one vtable call
//! ```
//!
//! Closures are accepted wherever the registration method names the
//! `for<'a> Fn(&'a mut Request, &'a mut Response) -> BoxFuture<'a, _>` bound
//! directly, which lets the compiler infer the higher-ranked signature.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::error::HandlerError;
use crate::request::Request;
use crate::response::Response;

/// A heap-allocated, type-erased future borrowing request state for `'a`.
///
/// `Send` lets tokio move the future across worker threads.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// What a handler reports back to the dispatcher.
pub type HandlerResult = Result<Flow, HandlerError>;

/// How the chain proceeds after a handler returns successfully.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Flow {
    /// Run the next matching entry.
    Next,
    /// Stop here; the response is final.
    Done,
}

/// A middleware or route handler.
///
/// Implemented automatically for closures and `fn` items with the right
/// signature, and by mounted [`Application`](crate::Application)s. Implement
/// it directly for handlers that carry their own state.
pub trait Handler: Send + Sync + 'static {
    fn call<'a>(&'a self, req: &'a mut Request, res: &'a mut Response) -> BoxFuture<'a, HandlerResult>;
}

impl<F> Handler for F
where
    F: for<'a> Fn(&'a mut Request, &'a mut Response) -> BoxFuture<'a, HandlerResult>
        + Send
        + Sync
        + 'static,
{
    fn call<'a>(&'a self, req: &'a mut Request, res: &'a mut Response) -> BoxFuture<'a, HandlerResult> {
        (self)(req, res)
    }
}

/// A type-erased handler shared across concurrent requests.
pub type BoxedHandler = Arc<dyn Handler>;

/// Erases a closure into a [`BoxedHandler`], for APIs such as
/// [`Application::use_`](crate::Application::use_) that take any
/// [`Mountable`](crate::Mountable).
///
/// ```rust
/// use arbor::{handler, Flow};
///
/// let log = handler(|req, _res| Box::pin(async move {
///     tracing::info!(path = req.path(), "incoming");
///     Ok(Flow::Next)
/// }));
/// # let _ = log;
/// ```
pub fn handler<F>(f: F) -> BoxedHandler
where
    F: for<'a> Fn(&'a mut Request, &'a mut Response) -> BoxFuture<'a, HandlerResult>
        + Send
        + Sync
        + 'static,
{
    Arc::new(f)
}

// ── Error handlers ────────────────────────────────────────────────────────────

/// Turns a [`HandlerError`] into a response.
///
/// Error handlers are synchronous: by the time one runs, the chain is over
/// and all that is left is writing the response.
pub trait ErrorHandler: Send + Sync + 'static {
    fn handle(&self, err: HandlerError, req: &Request, res: &mut Response);
}

impl<F> ErrorHandler for F
where
    F: Fn(HandlerError, &Request, &mut Response) + Send + Sync + 'static,
{
    fn handle(&self, err: HandlerError, req: &Request, res: &mut Response) {
        (self)(err, req, res)
    }
}

pub type BoxedErrorHandler = Arc<dyn ErrorHandler>;
