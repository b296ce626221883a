//! Built-in Kubernetes health-check handlers.
//!
//! Kubernetes asks two questions. arbor answers them.
//!
//! | Probe | Path | Question |
//! |---|---|---|
//! | **Liveness** | `/healthz` | Is the process alive? Failure → restart. |
//! | **Readiness** | `/readyz` | Can the pod serve traffic? Failure → pulled from load-balancer. |
//!
//! Register them like any other route:
//!
//! ```rust,no_run
//! use arbor::{Application, health};
//!
//! let app = Application::new()
//!     .get("/healthz", health::liveness)
//!     .get("/readyz", health::readiness);
//! ```
//!
//! Replace `readiness` with your own handler if you need to gate on
//! dependency availability (database connections, downstream services):
//!
//! ```rust,no_run
//! use arbor::{BoxFuture, Flow, HandlerResult, Request, Response, StatusCode};
//!
//! fn readiness<'a>(req: &'a mut Request, res: &'a mut Response) -> BoxFuture<'a, HandlerResult> {
//!     Box::pin(async move {
//!         if dependencies_are_healthy().await {
//!             res.text(req, "ready");
//!         } else {
//!             res.status(StatusCode::SERVICE_UNAVAILABLE).end(req);
//!         }
//!         Ok(Flow::Done)
//!     })
//! }
//!
//! async fn dependencies_are_healthy() -> bool { true }
//! ```

use crate::handler::{BoxFuture, Flow, HandlerResult};
use crate::request::Request;
use crate::response::Response;

/// Kubernetes liveness probe handler.
///
/// Always answers `200 OK` with body `"ok"`. If the process can respond to
/// HTTP at all, it is alive, so this handler has no dependencies.
pub fn liveness<'a>(req: &'a mut Request, res: &'a mut Response) -> BoxFuture<'a, HandlerResult> {
    Box::pin(async move {
        res.text(req, "ok");
        Ok(Flow::Done)
    })
}

/// Kubernetes readiness probe handler (default implementation).
///
/// Answers `200 OK` with body `"ready"`.
pub fn readiness<'a>(req: &'a mut Request, res: &'a mut Response) -> BoxFuture<'a, HandlerResult> {
    Box::pin(async move {
        res.text(req, "ready");
        Ok(Flow::Done)
    })
}
