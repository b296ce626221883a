//! Outgoing HTTP response type and the send pipeline.
//!
//! Handlers mutate a [`Response`] in place and finish it with
//! [`send`](Response::send) (or one of its shortcuts). `send` is where
//! content negotiation happens:
//!
//! 1. structured bodies become pretty-printed JSON;
//! 2. text gets an HTML default content-type and an explicit UTF-8 charset;
//! 3. binary gets `application/octet-stream` unless a type is already set;
//! 4. a weak ETag is derived from the final bytes;
//! 5. fresh conditional requests turn into `304 Not Modified`;
//! 6. `204` / `304` lose their body and entity headers;
//! 7. `HEAD` keeps every header but sends no body.

use bytes::Bytes;
use http::header::{
    CONTENT_LENGTH, CONTENT_TYPE, ETAG, HeaderValue, IntoHeaderName, LOCATION, TRANSFER_ENCODING,
};
use http::{HeaderMap, Method, StatusCode};
use http_body_util::Full;
use serde::Serialize;
use serde_json::Value;
use tracing::warn;

use crate::request::Request;

// ── ContentType ───────────────────────────────────────────────────────────────

/// Common content-type values for use with [`Response::content_type`].
pub enum ContentType {
    Csv,          // text/csv
    EventStream,  // text/event-stream  (SSE)
    FormData,     // application/x-www-form-urlencoded
    Html,         // text/html; charset=utf-8
    Json,         // application/json
    MsgPack,      // application/msgpack
    OctetStream,  // application/octet-stream  (binary / file download)
    Pdf,          // application/pdf
    Text,         // text/plain; charset=utf-8
    Xml,          // application/xml
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Csv         => "text/csv",
            Self::EventStream => "text/event-stream",
            Self::FormData    => "application/x-www-form-urlencoded",
            Self::Html        => "text/html; charset=utf-8",
            Self::Json        => "application/json",
            Self::MsgPack     => "application/msgpack",
            Self::OctetStream => "application/octet-stream",
            Self::Pdf         => "application/pdf",
            Self::Text        => "text/plain; charset=utf-8",
            Self::Xml         => "application/xml",
        }
    }
}

// ── Body ──────────────────────────────────────────────────────────────────────

/// What a handler hands to [`Response::send`].
#[derive(Debug, Default)]
pub enum Body {
    #[default]
    Empty,
    Text(String),
    Json(Value),
    Binary(Bytes),
}

impl From<()> for Body {
    fn from(_: ()) -> Self { Self::Empty }
}

impl From<&str> for Body {
    fn from(s: &str) -> Self { Self::Text(s.to_owned()) }
}

impl From<String> for Body {
    fn from(s: String) -> Self { Self::Text(s) }
}

impl From<Value> for Body {
    fn from(v: Value) -> Self { Self::Json(v) }
}

impl From<Vec<u8>> for Body {
    fn from(b: Vec<u8>) -> Self { Self::Binary(b.into()) }
}

impl From<Bytes> for Body {
    fn from(b: Bytes) -> Self { Self::Binary(b) }
}

impl From<&'static [u8]> for Body {
    fn from(b: &'static [u8]) -> Self { Self::Binary(Bytes::from_static(b)) }
}

impl<T: Into<Body>> From<Option<T>> for Body {
    fn from(b: Option<T>) -> Self { b.map_or(Self::Empty, Into::into) }
}

// ── Response ──────────────────────────────────────────────────────────────────

/// An outgoing HTTP response, built up by the handler chain.
///
/// ```rust
/// use arbor::{HeaderValue, Method, Request, Response, StatusCode};
///
/// let req = Request::new(Method::GET, "/users/42");
/// let mut res = Response::new();
/// res.status(StatusCode::CREATED)
///     .set_header("location", HeaderValue::from_static("/users/42"))
///     .send(&req, serde_json::json!({ "id": 42 }));
///
/// assert_eq!(res.header("content-type"), Some("application/json"));
/// assert!(res.header("etag").is_some());
/// ```
#[derive(Debug)]
pub struct Response {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
    finished: bool,
}

impl Default for Response {
    fn default() -> Self { Self::new() }
}

impl Response {
    /// `200 OK`, no headers, no body.
    pub fn new() -> Self {
        Self { status: StatusCode::OK, headers: HeaderMap::new(), body: Bytes::new(), finished: false }
    }

    pub fn status(&mut self, code: StatusCode) -> &mut Self {
        self.status = code;
        self
    }

    pub fn status_code(&self) -> StatusCode { self.status }
    pub fn headers(&self) -> &HeaderMap { &self.headers }
    pub fn headers_mut(&mut self) -> &mut HeaderMap { &mut self.headers }
    pub fn body(&self) -> &Bytes { &self.body }

    /// `true` once [`send`](Response::send) has run.
    pub fn is_finished(&self) -> bool { self.finished }

    /// Header value as text, if present and printable.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Sets (replaces) a header.
    pub fn set_header<K: IntoHeaderName>(&mut self, name: K, value: HeaderValue) -> &mut Self {
        self.headers.insert(name, value);
        self
    }

    pub fn content_type(&mut self, content_type: ContentType) -> &mut Self {
        self.set_header(CONTENT_TYPE, HeaderValue::from_static(content_type.as_str()))
    }

    /// Finalizes the response. See the module docs for the full pipeline.
    ///
    /// Calling `send` on an already finished response does nothing.
    pub fn send(&mut self, req: &Request, body: impl Into<Body>) -> &mut Self {
        if self.finished {
            warn!(url = req.original_url(), "response already sent, ignoring");
            return self;
        }

        let mut bytes = match body.into() {
            Body::Empty | Body::Json(Value::Null) => Bytes::new(),
            Body::Json(value) => {
                self.set_header(CONTENT_TYPE, HeaderValue::from_static("application/json"));
                // a Value always serializes
                serde_json::to_vec_pretty(&value).map(Bytes::from).unwrap_or_default()
            }
            Body::Text(text) => {
                let content_type = match self.header(CONTENT_TYPE.as_str()) {
                    Some(existing) => with_utf8_charset(existing),
                    None => "text/html; charset=utf-8".to_owned(),
                };
                if let Ok(value) = HeaderValue::from_str(&content_type) {
                    self.headers.insert(CONTENT_TYPE, value);
                }
                Bytes::from(text)
            }
            Body::Binary(bytes) => {
                if !self.headers.contains_key(CONTENT_TYPE) {
                    self.content_type(ContentType::OctetStream);
                }
                bytes
            }
        };

        if !bytes.is_empty() && !self.headers.contains_key(ETAG) {
            if let Ok(tag) = HeaderValue::from_str(&crate::etag::weak(&bytes)) {
                self.headers.insert(ETAG, tag);
            }
        }

        if req.fresh(self) {
            self.status = StatusCode::NOT_MODIFIED;
        }

        if self.status == StatusCode::NO_CONTENT || self.status == StatusCode::NOT_MODIFIED {
            self.headers.remove(CONTENT_TYPE);
            self.headers.remove(CONTENT_LENGTH);
            self.headers.remove(TRANSFER_ENCODING);
            bytes = Bytes::new();
        } else {
            self.headers.insert(CONTENT_LENGTH, HeaderValue::from(bytes.len()));
        }

        if *req.method() == Method::HEAD {
            bytes = Bytes::new();
        }

        self.body = bytes;
        self.finished = true;
        self
    }

    /// Serializes `value` and sends it as JSON.
    pub fn json<T: Serialize + ?Sized>(&mut self, req: &Request, value: &T) -> Result<&mut Self, serde_json::Error> {
        let value = serde_json::to_value(value)?;
        Ok(self.send(req, Body::Json(value)))
    }

    /// Sends `text/plain; charset=utf-8`.
    pub fn text(&mut self, req: &Request, body: impl Into<String>) -> &mut Self {
        self.content_type(ContentType::Text);
        self.send(req, Body::Text(body.into()))
    }

    /// Finishes with whatever status is set and no body.
    pub fn end(&mut self, req: &Request) -> &mut Self {
        self.send(req, Body::Empty)
    }

    /// `302 Found` to `location`.
    pub fn redirect(&mut self, req: &Request, location: &str) -> &mut Self {
        match HeaderValue::from_str(location) {
            Ok(value) => {
                self.status = StatusCode::FOUND;
                self.headers.insert(LOCATION, value);
                let body = format!("Redirecting to {location}");
                self.content_type(ContentType::Text);
                self.send(req, body)
            }
            Err(_) => {
                warn!(location, "refusing redirect to invalid location");
                self.status = StatusCode::INTERNAL_SERVER_ERROR;
                self.end(req)
            }
        }
    }

    /// Forgets everything written so far. Used before error responses.
    pub(crate) fn reset(&mut self) {
        *self = Self::new();
    }

    pub(crate) fn into_http(self) -> http::Response<Full<Bytes>> {
        let mut out = http::Response::new(Full::new(self.body));
        *out.status_mut() = self.status;
        *out.headers_mut() = self.headers;
        out
    }
}

/// Appends `charset=utf-8` unless the type already names a charset.
fn with_utf8_charset(content_type: &str) -> String {
    let has_charset = content_type
        .split(';')
        .skip(1)
        .any(|p| p.trim().to_ascii_lowercase().starts_with("charset="));
    if has_charset {
        content_type.to_owned()
    } else {
        format!("{content_type}; charset=utf-8")
    }
}
