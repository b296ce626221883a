//! Unified error types.
//!
//! Two families, split by *when* they happen:
//!
//! - [`Error`]: setup and infrastructure failures: a malformed route
//!   pattern, a bad trust specification, an unreadable config file, a
//!   listener that cannot bind. These fail the call that caused them.
//! - [`HandlerError`]: request-time failures raised by handlers. The
//!   dispatcher never lets one escape; it is always routed to an error
//!   handler, which turns it into a response.

use std::fmt;

use http::StatusCode;
use thiserror::Error;

/// The error type returned by arbor's fallible setup operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid route `{pattern}`: {reason}")]
    Pattern { pattern: String, reason: String },

    #[error("invalid trust specification `{0}`")]
    TrustSpec(String),

    #[error("config: {0}")]
    Config(String),

    #[error("config: {0}")]
    Toml(#[from] toml::de::Error),
}

impl Error {
    pub(crate) fn pattern(pattern: &str, reason: impl fmt::Display) -> Self {
        Self::Pattern { pattern: pattern.to_owned(), reason: reason.to_string() }
    }
}

/// A failure raised while handling a request.
///
/// Carries the status the error handler should respond with (500 unless the
/// handler chose otherwise) and a message. Any [`std::error::Error`] converts
/// into it, so handlers can use `?` freely:
///
/// ```rust
/// use arbor::{HandlerError, StatusCode};
///
/// fn parse_id(raw: &str) -> Result<u64, HandlerError> {
///     let id: u64 = raw.parse()?;                 // 500 by default
///     if id == 0 {
///         return Err(HandlerError::new(StatusCode::BAD_REQUEST, "id must be positive"));
///     }
///     Ok(id)
/// }
/// ```
///
/// `HandlerError` deliberately does not implement `std::error::Error`
/// itself; that is what makes the blanket `From` impl coherent.
pub struct HandlerError {
    status: StatusCode,
    message: String,
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl HandlerError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self { status, message: message.into(), source: None }
    }

    /// `500 Internal Server Error` with the given message.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }

    /// Replaces the status code, keeping message and source.
    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    pub fn status(&self) -> StatusCode { self.status }
    pub fn message(&self) -> &str { &self.message }

    /// The underlying error, when this one was converted from another.
    pub fn source(&self) -> Option<&(dyn std::error::Error + Send + Sync + 'static)> {
        self.source.as_deref()
    }
}

impl<E> From<E> for HandlerError
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn from(e: E) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: e.to_string(),
            source: Some(Box::new(e)),
        }
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.status.as_u16(), self.message)
    }
}

impl fmt::Debug for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerError")
            .field("status", &self.status)
            .field("message", &self.message)
            .field("source", &self.source)
            .finish()
    }
}
