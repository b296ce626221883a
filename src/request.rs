//! Incoming HTTP request type.
//!
//! A `Request` is allocated once per request and is never shared. Besides
//! the raw message it carries the *working* view the dispatcher maintains:
//! every mount level strips its own prefix from [`url`](Request::url) before
//! delegating, so a handler mounted at `/api` sees `/users` for
//! `GET /api/users`. The untouched target stays available as
//! [`original_url`](Request::original_url).

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};

use bytes::Bytes;
use http::header::{HeaderName, HeaderValue};
use http::{HeaderMap, Method, Uri};

use crate::response::Response;

/// An incoming HTTP request.
pub struct Request {
    method: Method,
    original_url: String,
    pub(crate) url: String,
    pub(crate) path: String,
    pub(crate) base_url: String,
    headers: HeaderMap,
    body: Bytes,
    peer: SocketAddr,
    connection_protocol: String,
    uri_host: Option<String>,
    pub(crate) params: HashMap<String, String>,

    // set by the extension step
    pub(crate) protocol: String,
    pub(crate) ip: IpAddr,
    pub(crate) ips: Vec<IpAddr>,
    pub(crate) hostname: Option<String>,
    pub(crate) subdomains: Vec<String>,
}

impl Request {
    /// Builds a request for `target`, which may be origin-form (`/a?b=1`) or
    /// absolute-form (`http://host/a`). The peer defaults to `127.0.0.1:0`;
    /// see [`with_peer`](Request::with_peer).
    pub fn new(method: Method, target: &str) -> Self {
        let (url, scheme, uri_host) = match target.parse::<Uri>() {
            Ok(uri) => (
                uri.path_and_query().map_or_else(|| "/".to_owned(), |pq| pq.as_str().to_owned()),
                uri.scheme_str().map(str::to_owned),
                uri.host().map(str::to_owned),
            ),
            Err(_) => (target.to_owned(), None, None),
        };
        let url = lead(&url);
        let peer = SocketAddr::from(([127, 0, 0, 1], 0));
        let connection_protocol = scheme.unwrap_or_else(|| "http".to_owned());

        Self {
            method,
            original_url: url.clone(),
            path: pathname(&url).to_owned(),
            url,
            base_url: String::new(),
            headers: HeaderMap::new(),
            body: Bytes::new(),
            peer,
            protocol: connection_protocol.clone(),
            connection_protocol,
            uri_host,
            params: HashMap::new(),
            ip: peer.ip(),
            ips: vec![peer.ip()],
            hostname: None,
            subdomains: Vec::new(),
        }
    }

    /// Converts a transport-level request whose body is already collected.
    pub fn from_http(req: http::Request<Bytes>, peer: SocketAddr) -> Self {
        let (parts, body) = req.into_parts();
        let mut out = Self::new(parts.method, &parts.uri.to_string()).with_peer(peer);
        out.headers = parts.headers;
        out.body = body;
        out
    }

    pub fn with_peer(mut self, peer: SocketAddr) -> Self {
        self.peer = peer;
        self.ip = peer.ip().to_canonical();
        self.ips = vec![peer.ip()];
        self
    }

    /// Appends a header. Invalid names or values are dropped with a warning.
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        match (HeaderName::from_bytes(name.as_bytes()), HeaderValue::from_str(value)) {
            (Ok(name), Ok(value)) => {
                self.headers.append(name, value);
            }
            _ => tracing::warn!(name, "dropping invalid request header"),
        }
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn method(&self) -> &Method { &self.method }
    pub fn headers(&self) -> &HeaderMap { &self.headers }
    pub fn headers_mut(&mut self) -> &mut HeaderMap { &mut self.headers }
    pub fn body(&self) -> &[u8] { &self.body }
    pub fn peer(&self) -> SocketAddr { self.peer }

    /// The request target as received, before any prefix stripping.
    pub fn original_url(&self) -> &str { &self.original_url }

    /// Working URL relative to the current mount point, query included.
    pub fn url(&self) -> &str { &self.url }

    /// Pathname of [`url`](Request::url).
    pub fn path(&self) -> &str { &self.path }

    /// Concatenated mount prefixes above the current handler (`""` at root).
    pub fn base_url(&self) -> &str { &self.base_url }

    /// Raw query string, without the `?`.
    pub fn query(&self) -> Option<&str> {
        self.url.split_once('?').map(|(_, q)| q)
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Returns a named path parameter.
    ///
    /// For a route `/users/:id`, `req.param("id")` on `/users/42` returns `Some("42")`.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    pub fn params(&self) -> &HashMap<String, String> { &self.params }
    pub fn params_mut(&mut self) -> &mut HashMap<String, String> { &mut self.params }

    /// Scheme of the connection itself, ignoring forwarding headers.
    pub fn connection_protocol(&self) -> &str { &self.connection_protocol }

    pub(crate) fn uri_host(&self) -> Option<&str> { self.uri_host.as_deref() }

    // ── Client identity (resolved through trusted proxies) ────────────────────

    /// `"http"` or `"https"` as the client saw it.
    pub fn protocol(&self) -> &str { &self.protocol }
    pub fn secure(&self) -> bool { self.protocol == "https" }

    /// Client address.
    pub fn ip(&self) -> IpAddr { self.ip }

    /// Trusted address chain, nearest hop (the TCP peer) first.
    pub fn ips(&self) -> &[IpAddr] { &self.ips }

    pub fn hostname(&self) -> Option<&str> { self.hostname.as_deref() }
    pub fn subdomains(&self) -> &[String] { &self.subdomains }

    // ── Freshness ─────────────────────────────────────────────────────────────

    /// Whether the client's cached copy of `res` is still valid.
    ///
    /// Only `GET`/`HEAD` requests answered with 2xx or 304 can be fresh.
    pub fn fresh(&self, res: &Response) -> bool {
        if self.method != Method::GET && self.method != Method::HEAD {
            return false;
        }
        let status = res.status_code().as_u16();
        if !((200..300).contains(&status) || status == 304) {
            return false;
        }
        crate::fresh::is_fresh(&self.headers, res.headers())
    }

    pub fn stale(&self, res: &Response) -> bool {
        !self.fresh(res)
    }

    // ── Dispatcher plumbing ───────────────────────────────────────────────────

    /// Points the working URL at `pathname[consumed..]` of the dispatch base.
    pub(crate) fn rewrite(&mut self, base_url: &str, base_prefix: &str, consumed: usize) {
        let base_path = pathname(base_url);
        let consumed = consumed.min(base_path.len());
        let (prefix, rest) = base_path.split_at(consumed);

        let mut url = lead(rest);
        if let Some((_, query)) = base_url.split_once('?') {
            url.push('?');
            url.push_str(query);
        }
        self.path = pathname(&url).to_owned();
        self.url = url;
        self.base_url = format!("{base_prefix}{}", prefix.trim_end_matches('/'));
    }

    pub(crate) fn restore(&mut self, url: String, base_prefix: String) {
        self.path = pathname(&url).to_owned();
        self.url = url;
        self.base_url = base_prefix;
    }
}

/// Path component of a URL (query string excluded).
pub(crate) fn pathname(url: &str) -> &str {
    let end = url.find(['?', '#']).unwrap_or(url.len());
    &url[..end]
}

/// Guarantees a leading `/`.
pub(crate) fn lead(s: &str) -> String {
    if s.starts_with('/') { s.to_owned() } else { format!("/{s}") }
}
