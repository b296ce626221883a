//! Built-in middleware.
//!
//! Every dispatch starts with an *extension step* that resolves the
//! client's identity through the trusted-proxy settings and stores it on the
//! request, so later handlers read [`Request::ip`], [`Request::protocol`],
//! [`Request::hostname`] and friends without touching forwarding headers.
//!
//! Applications can swap it for their own step with
//! [`Application::extensions`](crate::Application::extensions).

use crate::proxy::{self, TrustFn};
use crate::request::Request;

/// Resolves protocol, address chain, hostname and subdomains onto `req`.
pub fn extend(req: &mut Request, trust: &TrustFn, subdomain_offset: usize) {
    req.protocol = proxy::protocol(req, trust);
    req.ips = proxy::ips(req, trust);
    req.ip = proxy::ip_from_chain(&req.ips);
    req.hostname = proxy::hostname(req, trust);
    req.subdomains = proxy::subdomains(req.hostname.as_deref(), subdomain_offset);
}
