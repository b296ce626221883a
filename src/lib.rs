//! # arbor
//!
//! Application routing for HTTP services: an ordered middleware chain,
//! mountable sub-applications and a response pipeline that knows about
//! caching and trusted proxies.
//!
//! ## The model
//!
//! An [`Application`] is a registry of entries. Each entry is a path pattern
//! plus a handler; middleware entries match by prefix, route entries match
//! exactly and may be limited to one method. A request walks every matching
//! entry in registration order until one of them ends the chain.
//!
//! Applications are handlers too, so mounting one under a prefix composes:
//!
//! - **Relative paths**: a sub-application at `/api` sees `/users` for
//!   `/api/users`, with [`Request::base_url`] reporting `/api`
//! - **Client identity**: resolved once through the trusted-proxy settings
//!   and exposed as [`Request::ip`], [`Request::protocol`], [`Request::hostname`]
//! - **Response pipeline**: content type, `Content-Length`, weak ETags and
//!   `304 Not Modified` handled by [`Response::send`]
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use arbor::{Application, Flow, Server, StatusCode};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), arbor::Error> {
//!     let api = Application::new()
//!         .get("/users/:id", |req, res| Box::pin(async move {
//!             let id = req.param("id").unwrap_or_default().to_owned();
//!             res.send(req, serde_json::json!({ "id": id }));
//!             Ok(Flow::Done)
//!         }))
//!         .post("/users", |req, res| Box::pin(async move {
//!             if req.body().is_empty() {
//!                 res.status(StatusCode::BAD_REQUEST).end(req);
//!                 return Ok(Flow::Done);
//!             }
//!             res.status(StatusCode::CREATED).text(req, "created");
//!             Ok(Flow::Done)
//!         }));
//!
//!     let app = Application::new().use_("/api", api);
//!
//!     Server::bind("0.0.0.0:3000").serve(app).await
//! }
//! ```

mod app;
mod error;
mod handler;
mod request;
mod response;
mod server;
mod settings;

pub mod etag;
pub mod fresh;
pub mod health;
pub mod middleware;
pub mod pattern;
pub mod proxy;

pub use app::{AppId, Application, Entry, EntryKind, Mountable};
pub use error::{Error, HandlerError};
pub use handler::{BoxFuture, BoxedErrorHandler, BoxedHandler, ErrorHandler, Flow, Handler, HandlerResult, handler};
pub use request::Request;
pub use response::{Body, ContentType, Response};
pub use server::Server;
pub use settings::Settings;
pub use proxy::TrustProxy;

pub use http::{HeaderValue, Method, StatusCode, header};
