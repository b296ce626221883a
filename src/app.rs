//! Applications: an ordered middleware registry plus the dispatcher that
//! runs it.
//!
//! # Dispatch
//!
//! For every request an application builds a chain:
//!
//! ```text
//! [extension step] ++ every matching entry, in registration order ++ [not-found]
//! ```
//!
//! and runs it front to back. Each handler either passes control on
//! ([`Flow::Next`]), ends the chain ([`Flow::Done`]) or fails
//! (`Err(HandlerError)`), which jumps straight to the error handler; nothing
//! registered in between runs. Panics inside handlers count as failures.
//!
//! Before each entry runs, the request's working URL is rewritten relative
//! to the entry's mount point, so an entry at `/api` sees `/users` for
//! `/api/users`.
//!
//! # Mounting
//!
//! An [`Application`] is itself a handler. Mounting one at `/admin` inserts
//! its whole dispatch as a single middleware entry; the child only ever
//! consults its own registry, and recursion gives correct relative routing
//! at any depth. A mounted application that matches nothing hands control
//! back to its parent unless it has its own not-found handler. Client
//! identity and the server header are settled by the top-level application;
//! a mounted application's own trust and header settings are not consulted.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures_util::FutureExt;
use http::header::{HeaderName, HeaderValue};
use http::{Method, StatusCode};
use tracing::{debug, error, warn};

use crate::error::{Error, HandlerError};
use crate::handler::{BoxFuture, BoxedErrorHandler, BoxedHandler, Flow, Handler, HandlerResult};
use crate::middleware;
use crate::pattern::{Match, Mode, Pattern};
use crate::proxy::TrustFn;
use crate::request::{Request, pathname};
use crate::response::Response;
use crate::settings::Settings;

const X_POWERED_BY: HeaderName = HeaderName::from_static("x-powered-by");

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique application identifier, used for the non-owning
/// child → parent link.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct AppId(u64);

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EntryKind {
    /// Matches any path under its prefix.
    Middleware,
    /// Matches its pattern exactly.
    Route,
}

/// One registry entry.
pub struct Entry {
    kind: EntryKind,
    method: Option<Method>,
    pattern: Pattern,
    handler: BoxedHandler,
}

impl Entry {
    fn new(kind: EntryKind, method: Option<Method>, path: &str, handler: BoxedHandler) -> Result<Self, Error> {
        let mode = match kind {
            EntryKind::Middleware => Mode::Prefix,
            EntryKind::Route => Mode::Exact,
        };
        let pattern = Pattern::compile(path, mode)?;
        Ok(Self { kind, method, pattern, handler })
    }

    pub fn kind(&self) -> EntryKind { self.kind }
    pub fn method(&self) -> Option<&Method> { self.method.as_ref() }
    pub fn path(&self) -> &str { self.pattern.source() }

    fn accepts(&self, method: &Method) -> bool {
        match &self.method {
            None => true,
            Some(m) => m == method || (*m == Method::GET && *method == Method::HEAD),
        }
    }
}

/// Anything that can be registered with [`Application::use_`].
pub enum Mountable {
    Handler(BoxedHandler),
    App(Application),
    /// Registered in order, each at the same path.
    Group(Vec<Mountable>),
}

impl From<BoxedHandler> for Mountable {
    fn from(h: BoxedHandler) -> Self { Self::Handler(h) }
}

impl From<Application> for Mountable {
    fn from(app: Application) -> Self { Self::App(app) }
}

impl<T: Into<Mountable>> From<Vec<T>> for Mountable {
    fn from(items: Vec<T>) -> Self {
        Self::Group(items.into_iter().map(Into::into).collect())
    }
}

/// An application: settings, an ordered registry and the handlers for
/// errors and unmatched requests.
///
/// Build it once at startup, then hand it to [`Server::serve`](crate::Server::serve)
/// or call [`dispatch`](Application::dispatch) directly. Every registration
/// method returns `self` so calls chain naturally.
///
/// ```rust
/// use arbor::{Application, Flow, handler};
///
/// let api = Application::new()
///     .get("/users/:id", |req, res| Box::pin(async move {
///         let id = req.param("id").unwrap_or_default().to_owned();
///         res.send(req, serde_json::json!({ "id": id }));
///         Ok(Flow::Done)
///     }));
///
/// let app = Application::new()
///     .use_("/", handler(|req, _res| Box::pin(async move {
///         tracing::info!(path = req.path(), "request");
///         Ok(Flow::Next)
///     })))
///     .use_("/api", api);
/// # let _ = app;
/// ```
pub struct Application {
    id: AppId,
    parent: Option<AppId>,
    mount_path: String,
    settings: Settings,
    trust: TrustFn,
    server_header: HeaderValue,
    entries: Vec<Entry>,
    extensions: Option<BoxedHandler>,
    error_handler: Option<BoxedErrorHandler>,
    not_found: Option<BoxedHandler>,
}

impl Default for Application {
    fn default() -> Self { Self::new() }
}

impl Application {
    pub fn new() -> Self {
        let settings = Settings::default();
        Self {
            id: AppId(NEXT_ID.fetch_add(1, Ordering::Relaxed)),
            parent: None,
            mount_path: "/".to_owned(),
            trust: settings.trust_proxy.compile(),
            server_header: HeaderValue::from_static("arbor"),
            settings,
            entries: Vec::new(),
            extensions: None,
            error_handler: None,
            not_found: None,
        }
    }

    /// Replaces the settings. Fails if the server header is not a valid
    /// header value.
    pub fn with_settings(mut self, settings: Settings) -> Result<Self, Error> {
        self.server_header = HeaderValue::from_str(&settings.server_header)
            .map_err(|_| Error::Config(format!("invalid server_header `{}`", settings.server_header)))?;
        self.trust = settings.trust_proxy.compile();
        self.settings = settings;
        Ok(self)
    }

    pub fn id(&self) -> AppId { self.id }
    pub fn parent(&self) -> Option<AppId> { self.parent }
    pub fn settings(&self) -> &Settings { &self.settings }
    pub fn entries(&self) -> &[Entry] { &self.entries }

    /// Prefix this application was mounted under (`"/"` when not mounted).
    pub fn mount_path(&self) -> &str { &self.mount_path }

    // ── Setup-time configuration ──────────────────────────────────────────────

    /// Replaces the error handler. Without one, errors inside a mounted
    /// application propagate to the parent's chain; at the top level the
    /// default handler answers with the error's status.
    pub fn on_error<F>(mut self, f: F) -> Self
    where
        F: Fn(HandlerError, &Request, &mut Response) + Send + Sync + 'static,
    {
        self.error_handler = Some(Arc::new(f));
        self
    }

    /// Replaces the handler that runs when no entry ends the chain.
    pub fn not_found<F>(mut self, f: F) -> Self
    where
        F: for<'a> Fn(&'a mut Request, &'a mut Response) -> BoxFuture<'a, HandlerResult>
            + Send
            + Sync
            + 'static,
    {
        self.not_found = Some(Arc::new(f));
        self
    }

    /// Replaces the built-in extension step that resolves client identity.
    ///
    /// The built-in step only runs at the top level; mounted applications
    /// inherit the identity their parent resolved. A custom step runs at
    /// every level it is installed on.
    pub fn extensions(mut self, step: BoxedHandler) -> Self {
        self.extensions = Some(step);
        self
    }

    // ── Registration ──────────────────────────────────────────────────────────

    /// Registers middleware, applications or groups under `path`.
    ///
    /// Groups are flattened in order. Each application gets its own entry,
    /// mount path and parent link.
    ///
    /// # Panics
    ///
    /// Panics if `path` is not a valid pattern. Use [`try_use`](Application::try_use)
    /// to handle the error instead.
    pub fn use_(self, path: &str, item: impl Into<Mountable>) -> Self {
        self.try_use(path, item).unwrap_or_else(|e| panic!("{e}"))
    }

    /// [`use_`](Application::use_) at `"/"`.
    pub fn use_root(self, item: impl Into<Mountable>) -> Self {
        self.use_("/", item)
    }

    /// Fallible [`use_`](Application::use_).
    pub fn try_use(mut self, path: &str, item: impl Into<Mountable>) -> Result<Self, Error> {
        self.register(path, item.into())?;
        Ok(self)
    }

    fn register(&mut self, path: &str, item: Mountable) -> Result<(), Error> {
        match item {
            Mountable::Handler(h) => {
                self.entries.push(Entry::new(EntryKind::Middleware, None, path, h)?);
            }
            Mountable::App(mut app) => {
                app.mount_path = path.to_owned();
                app.parent = Some(self.id);
                debug!(parent = self.id.0, child = app.id.0, path, "mounting application");
                let mounted: BoxedHandler = Arc::new(Mounted(Arc::new(app)));
                self.entries.push(Entry::new(EntryKind::Middleware, None, path, mounted)?);
            }
            Mountable::Group(items) => {
                for item in items {
                    self.register(path, item)?;
                }
            }
        }
        Ok(())
    }

    /// Registers each item under `path`, in order.
    pub fn use_all<I>(self, path: &str, items: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<Mountable>,
    {
        self.use_(path, Mountable::Group(items.into_iter().map(Into::into).collect()))
    }

    /// Mounts a sub-application at `path`.
    pub fn mount(self, path: &str, app: Application) -> Self {
        self.use_(path, app)
    }

    /// Builds a sub-application with `build` and mounts it at `path`.
    pub fn route(self, path: &str, build: impl FnOnce(Application) -> Application) -> Self {
        self.use_(path, build(Application::new()))
    }

    /// Registers a route for `method` + `path`.
    ///
    /// # Panics
    ///
    /// Panics if `path` is not a valid pattern.
    pub fn on<F>(self, method: Method, path: &str, f: F) -> Self
    where
        F: for<'a> Fn(&'a mut Request, &'a mut Response) -> BoxFuture<'a, HandlerResult>
            + Send
            + Sync
            + 'static,
    {
        self.try_on(Some(method), path, Arc::new(f)).unwrap_or_else(|e| panic!("{e}"))
    }

    /// Registers a route that matches any method. `method: None` means the
    /// same for [`try_on`](Application::try_on).
    pub fn all<F>(self, path: &str, f: F) -> Self
    where
        F: for<'a> Fn(&'a mut Request, &'a mut Response) -> BoxFuture<'a, HandlerResult>
            + Send
            + Sync
            + 'static,
    {
        self.try_on(None, path, Arc::new(f)).unwrap_or_else(|e| panic!("{e}"))
    }

    /// Fallible route registration taking an already boxed handler.
    pub fn try_on(mut self, method: Option<Method>, path: &str, handler: BoxedHandler) -> Result<Self, Error> {
        self.entries.push(Entry::new(EntryKind::Route, method, path, handler)?);
        Ok(self)
    }
}

macro_rules! method_routes {
    ($($name:ident => $method:ident),* $(,)?) => {
        impl Application {
            $(
                #[doc = concat!("Registers a `", stringify!($method), "` route.")]
                pub fn $name<F>(self, path: &str, f: F) -> Self
                where
                    F: for<'a> Fn(&'a mut Request, &'a mut Response) -> BoxFuture<'a, HandlerResult>
                        + Send
                        + Sync
                        + 'static,
                {
                    self.on(Method::$method, path, f)
                }
            )*
        }
    };
}

method_routes! {
    get => GET,
    post => POST,
    put => PUT,
    patch => PATCH,
    delete => DELETE,
    head => HEAD,
    options => OPTIONS,
}

// ── Dispatch ──────────────────────────────────────────────────────────────────

enum Target<'a> {
    Extensions,
    Entry(&'a Entry),
    NotFound,
}

struct Step<'a> {
    target: Target<'a>,
    matched: Match,
}

impl Application {
    /// Runs the full chain for one request and returns the response.
    ///
    /// Never fails: every handler error ends up as an error-handler response.
    pub async fn dispatch(&self, mut req: Request) -> Response {
        let mut res = Response::new();
        if let Err(err) = self.run(&mut req, &mut res, false).await {
            // only reachable with propagate = true
            default_error_handler(err, &req, &mut res);
        }
        res
    }

    /// Runs this application from inside another handler.
    ///
    /// Behaves like a mounted application: client identity and the server
    /// header are left as the caller resolved them, errors without a custom
    /// error handler are returned to the caller, and an unmatched request
    /// without a custom not-found handler yields [`Flow::Next`].
    pub fn handle<'a>(&'a self, req: &'a mut Request, res: &'a mut Response) -> BoxFuture<'a, HandlerResult> {
        self.run(req, res, true)
    }

    /// Selects every entry that matches, in registration order.
    fn select(&self, path: &str, method: &Method) -> Vec<Step<'_>> {
        self.entries
            .iter()
            .filter(|e| e.accepts(method))
            .filter_map(|e| {
                e.pattern.find(path).map(|matched| Step { target: Target::Entry(e), matched })
            })
            .collect()
    }

    fn run<'a>(&'a self, req: &'a mut Request, res: &'a mut Response, propagate: bool) -> BoxFuture<'a, HandlerResult> {
        Box::pin(async move {
            // nested runs keep what the top-level application decided
            if !propagate && self.settings.expose_server_header {
                res.set_header(X_POWERED_BY, self.server_header.clone());
            }

            let base_url = req.url.clone();
            let base_prefix = req.base_url.clone();
            let path = pathname(&base_url).to_owned();

            let mut chain = Vec::with_capacity(self.entries.len() + 2);
            chain.push(Step { target: Target::Extensions, matched: Match::default() });
            chain.extend(self.select(&path, req.method()));
            chain.push(Step { target: Target::NotFound, matched: Match::default() });

            debug!(app = self.id.0, method = %req.method(), path = %path, matched = chain.len() - 2, "dispatch");

            let mut outcome = Ok(Flow::Next);
            for step in chain {
                req.rewrite(&base_url, &base_prefix, step.matched.consumed);

                let result = match step.target {
                    Target::Extensions => match &self.extensions {
                        Some(custom) => invoke(custom.as_ref(), req, res).await,
                        None if propagate => Ok(Flow::Next),
                        None => {
                            middleware::extend(req, &self.trust, self.settings.subdomain_offset);
                            Ok(Flow::Next)
                        }
                    },
                    Target::Entry(entry) => {
                        if entry.kind == EntryKind::Route {
                            req.params = step.matched.params;
                        }
                        invoke(entry.handler.as_ref(), req, res).await
                    }
                    Target::NotFound => match &self.not_found {
                        Some(custom) => invoke(custom.as_ref(), req, res).await,
                        // mounted: hand control back to the parent chain
                        None if propagate => Ok(Flow::Next),
                        None => {
                            default_not_found(req, res);
                            Ok(Flow::Done)
                        }
                    },
                };

                match result {
                    Ok(Flow::Next) => continue,
                    done => {
                        outcome = done;
                        break;
                    }
                }
            }

            req.restore(base_url, base_prefix);

            match outcome {
                Err(err) => match &self.error_handler {
                    Some(handler) => {
                        handler.handle(err, req, res);
                        Ok(Flow::Done)
                    }
                    None if propagate => Err(err),
                    None => {
                        default_error_handler(err, req, res);
                        Ok(Flow::Done)
                    }
                },
                ok => ok,
            }
        })
    }
}

/// Calls a handler, converting panics into 500 errors.
async fn invoke(handler: &dyn Handler, req: &mut Request, res: &mut Response) -> HandlerResult {
    match AssertUnwindSafe(async { handler.call(req, res).await }).catch_unwind().await {
        Ok(result) => result,
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| (*s).to_owned())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "handler panicked".to_owned());
            warn!(%message, "handler panicked");
            Err(HandlerError::internal(message))
        }
    }
}

/// A mounted child application.
struct Mounted(Arc<Application>);

impl Handler for Mounted {
    fn call<'a>(&'a self, req: &'a mut Request, res: &'a mut Response) -> BoxFuture<'a, HandlerResult> {
        self.0.run(req, res, true)
    }
}

fn default_not_found(req: &Request, res: &mut Response) {
    if res.is_finished() {
        return;
    }
    res.status(StatusCode::NOT_FOUND).send(req, "Not Found");
}

/// Responds with the error's status. The message is only exposed for
/// plain 500s; other statuses get their canonical reason phrase.
pub(crate) fn default_error_handler(err: HandlerError, req: &Request, res: &mut Response) {
    let status = err.status();
    error!(method = %req.method(), url = req.original_url(), status = status.as_u16(), error = %err.message(), "request failed");

    let body = if status == StatusCode::INTERNAL_SERVER_ERROR && !err.message().is_empty() {
        err.message().to_owned()
    } else {
        status.canonical_reason().unwrap_or("Error").to_owned()
    };

    let powered_by = res.headers().get(X_POWERED_BY).cloned();
    res.reset();
    if let Some(value) = powered_by {
        res.set_header(X_POWERED_BY, value);
    }
    res.status(status).send(req, body);
}
