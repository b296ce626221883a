//! Trusted-proxy resolution.
//!
//! Behind nginx or an ingress controller the TCP peer is the proxy, not the
//! client. The proxy reports the real client through forwarding headers:
//!
//! | Header | Carries |
//! |---|---|
//! | `X-Forwarded-For` | client address, then every proxy it crossed |
//! | `X-Forwarded-Proto` | scheme the client used (`https` behind TLS termination) |
//! | `X-Forwarded-Host` | `Host` the client asked for |
//!
//! Anyone can send these headers, so they are only believed as far as the
//! [`TrustProxy`] setting allows. Resolution starts at the TCP peer and walks
//! outward through `X-Forwarded-For`, stopping at the first hop that is not
//! trusted. An address that does not parse is never trusted and never
//! reported.

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;
use std::sync::Arc;

use http::HeaderMap;
use http::header::HOST;
use ipnet::IpNet;
use serde::{Deserialize, Deserializer};

use crate::error::Error;
use crate::request::Request;

pub const X_FORWARDED_FOR: &str = "x-forwarded-for";
pub const X_FORWARDED_HOST: &str = "x-forwarded-host";
pub const X_FORWARDED_PROTO: &str = "x-forwarded-proto";

/// Normalized trust predicate: `(hop address, hop index) -> trusted?`.
///
/// Hop 0 is the TCP peer, hop 1 the last address in `X-Forwarded-For`, and
/// so on outward.
pub type TrustFn = Arc<dyn Fn(IpAddr, usize) -> bool + Send + Sync>;

/// Which reverse-proxy hops may vouch for the next address out.
#[derive(Clone, Default)]
pub enum TrustProxy {
    /// Ignore forwarding headers entirely.
    #[default]
    None,
    /// Believe every hop.
    All,
    /// Believe the nearest `n` hops.
    Hops(usize),
    /// Believe hops whose address falls in one of these networks.
    List(Vec<IpNet>),
    /// Custom decision.
    Predicate(TrustFn),
}

impl TrustProxy {
    /// Wraps a closure as [`TrustProxy::Predicate`].
    pub fn predicate<F>(f: F) -> Self
    where
        F: Fn(IpAddr, usize) -> bool + Send + Sync + 'static,
    {
        Self::Predicate(Arc::new(f))
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    /// Collapses every shape into a single predicate.
    pub fn compile(&self) -> TrustFn {
        match self {
            Self::None => Arc::new(|_, _| false),
            Self::All => Arc::new(|_, _| true),
            Self::Hops(n) => {
                let n = *n;
                Arc::new(move |_, hop| hop < n)
            }
            Self::List(nets) => {
                let nets = nets.clone();
                Arc::new(move |addr, _| {
                    let addr = addr.to_canonical();
                    nets.iter().any(|net| net.contains(&addr))
                })
            }
            Self::Predicate(f) => Arc::clone(f),
        }
    }
}

impl fmt::Debug for TrustProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::All => f.write_str("All"),
            Self::Hops(n) => f.debug_tuple("Hops").field(n).finish(),
            Self::List(nets) => f.debug_tuple("List").field(nets).finish(),
            Self::Predicate(_) => f.write_str("Predicate(..)"),
        }
    }
}

impl From<bool> for TrustProxy {
    fn from(trust: bool) -> Self {
        if trust { Self::All } else { Self::None }
    }
}

impl From<usize> for TrustProxy {
    fn from(hops: usize) -> Self {
        Self::Hops(hops)
    }
}

/// Parses `"true"`, `"false"`, a hop count, or a comma-separated list of
/// addresses, CIDR blocks and the named ranges `loopback`, `linklocal` and
/// `uniquelocal`.
impl FromStr for TrustProxy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        match s {
            "true" => return Ok(Self::All),
            "false" => return Ok(Self::None),
            _ => {}
        }
        if let Ok(hops) = s.parse::<usize>() {
            return Ok(Self::Hops(hops));
        }
        parse_list(s.split(','))
    }
}

fn parse_list<'a>(items: impl IntoIterator<Item = &'a str>) -> Result<TrustProxy, Error> {
    let mut nets = Vec::new();
    for item in items {
        let item = item.trim();
        if item.is_empty() {
            continue;
        }
        if let Some(range) = named_range(item) {
            nets.extend(range.iter().filter_map(|n| n.parse::<IpNet>().ok()));
        } else if let Ok(net) = item.parse::<IpNet>() {
            nets.push(net.trunc());
        } else if let Ok(addr) = item.parse::<IpAddr>() {
            nets.push(IpNet::from(addr));
        } else {
            return Err(Error::TrustSpec(item.to_owned()));
        }
    }
    Ok(TrustProxy::List(nets))
}

fn named_range(name: &str) -> Option<&'static [&'static str]> {
    match name {
        "loopback" => Some(&["127.0.0.1/8", "::1/128"]),
        "linklocal" => Some(&["169.254.0.0/16", "fe80::/10"]),
        "uniquelocal" => Some(&["10.0.0.0/8", "172.16.0.0/12", "192.168.0.0/16", "fc00::/7"]),
        _ => None,
    }
}

/// Accepts a bool, a hop count, a spec string or a list of spec strings.
impl<'de> Deserialize<'de> for TrustProxy {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Bool(bool),
            Hops(usize),
            Text(String),
            List(Vec<String>),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Bool(b) => Ok(b.into()),
            Raw::Hops(n) => Ok(n.into()),
            Raw::Text(s) => s.parse().map_err(serde::de::Error::custom),
            Raw::List(items) => {
                parse_list(items.iter().map(String::as_str)).map_err(serde::de::Error::custom)
            }
        }
    }
}

// ── Resolution ────────────────────────────────────────────────────────────────

/// Scheme the client used: the connection's own unless the peer is trusted,
/// in which case the first `X-Forwarded-Proto` token wins.
pub fn protocol(req: &Request, trust: &TrustFn) -> String {
    let own = req.connection_protocol();
    if !trust(req.peer().ip(), 0) {
        return own.to_owned();
    }
    first_token(req.headers(), X_FORWARDED_PROTO)
        .map(str::to_owned)
        .unwrap_or_else(|| own.to_owned())
}

/// Host the client asked for, without the port.
///
/// Prefers `X-Forwarded-Host` when the peer is trusted, then `Host`, then the
/// authority of an absolute request URI.
pub fn hostname(req: &Request, trust: &TrustFn) -> Option<String> {
    let forwarded = if trust(req.peer().ip(), 0) {
        first_token(req.headers(), X_FORWARDED_HOST)
    } else {
        None
    };

    let host = forwarded.or_else(|| {
        req.headers()
            .get(HOST)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|h| !h.is_empty())
    });

    match host {
        Some(host) => Some(strip_port(host).to_owned()),
        None => req.uri_host().map(str::to_owned),
    }
}

/// The trusted address chain, nearest first. Always starts with the peer.
pub fn ips(req: &Request, trust: &TrustFn) -> Vec<IpAddr> {
    let peer = req.peer().ip();
    let mut chain = vec![peer];
    if !trust(peer, 0) {
        return chain;
    }

    let forwarded: Vec<&str> = req
        .headers()
        .get_all(X_FORWARDED_FOR)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();

    for (i, raw) in forwarded.iter().rev().enumerate() {
        let Some(addr) = parse_addr(raw) else {
            tracing::debug!(hop = i + 1, value = *raw, "unparsable forwarded address, stopping");
            break;
        };
        chain.push(addr);
        if !trust(addr, i + 1) {
            break;
        }
    }
    chain
}

/// The client address: the furthest trusted hop, with IPv4-mapped IPv6
/// converted back to IPv4.
pub fn ip(req: &Request, trust: &TrustFn) -> IpAddr {
    ip_from_chain(&ips(req, trust))
}

pub(crate) fn ip_from_chain(chain: &[IpAddr]) -> IpAddr {
    chain
        .last()
        .copied()
        .unwrap_or(IpAddr::from([0, 0, 0, 0]))
        .to_canonical()
}

/// Subdomain labels, most significant first, minus the `offset` labels that
/// make up the registrable domain. An IP literal is one opaque label.
pub fn subdomains(hostname: Option<&str>, offset: usize) -> Vec<String> {
    let Some(hostname) = hostname.filter(|h| !h.is_empty()) else {
        return Vec::new();
    };

    let bare = hostname.trim_start_matches('[').trim_end_matches(']');
    let labels: Vec<String> = if bare.parse::<IpAddr>().is_ok() {
        vec![hostname.to_owned()]
    } else {
        hostname.split('.').rev().map(str::to_owned).collect()
    };

    labels.into_iter().skip(offset).collect()
}

fn first_token<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Strips `:port`, searching after the closing bracket of an IPv6 literal.
fn strip_port(host: &str) -> &str {
    let start = if host.starts_with('[') {
        host.find(']').map_or(0, |i| i + 1)
    } else {
        0
    };
    match host[start..].find(':') {
        Some(i) => &host[..start + i],
        None => host,
    }
}

/// Accepts bare addresses as well as the bracketed `[v6]` form.
fn parse_addr(raw: &str) -> Option<IpAddr> {
    raw.trim_start_matches('[')
        .trim_end_matches(']')
        .parse()
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::Method;

    fn request(peer: &str, headers: &[(&'static str, &'static str)]) -> Request {
        let mut req = Request::new(Method::GET, "/").with_peer(peer.parse().unwrap());
        for (k, v) in headers {
            req = req.with_header(*k, v);
        }
        req
    }

    fn addrs(list: &[&str]) -> Vec<IpAddr> {
        list.iter().map(|a| a.parse().unwrap()).collect()
    }

    #[test]
    fn one_trusted_hop_stops_at_nearest_forwarded_address() {
        let req = request("127.0.0.1:5000", &[("x-forwarded-for", "9.9.9.9, 8.8.8.8")]);
        let trust = TrustProxy::Hops(1).compile();
        assert_eq!(ips(&req, &trust), addrs(&["127.0.0.1", "8.8.8.8"]));
        assert_eq!(ip(&req, &trust), "8.8.8.8".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn no_trust_ignores_headers() {
        let req = request("127.0.0.1:5000", &[("x-forwarded-for", "9.9.9.9, 8.8.8.8")]);
        let trust = TrustProxy::None.compile();
        assert_eq!(ip(&req, &trust), "127.0.0.1".parse::<IpAddr>().unwrap());
        assert_eq!(ips(&req, &trust), addrs(&["127.0.0.1"]));
    }

    #[test]
    fn trust_all_walks_the_whole_chain() {
        let req = request("10.0.0.1:80", &[("x-forwarded-for", "1.1.1.1, 2.2.2.2, 3.3.3.3")]);
        let trust = TrustProxy::All.compile();
        assert_eq!(ips(&req, &trust), addrs(&["10.0.0.1", "3.3.3.3", "2.2.2.2", "1.1.1.1"]));
        assert_eq!(ip(&req, &trust), "1.1.1.1".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn multiple_forwarded_headers_are_joined() {
        let req = request(
            "10.0.0.1:80",
            &[("x-forwarded-for", "1.1.1.1"), ("x-forwarded-for", "2.2.2.2")],
        );
        let trust = TrustProxy::All.compile();
        assert_eq!(ips(&req, &trust), addrs(&["10.0.0.1", "2.2.2.2", "1.1.1.1"]));
    }

    #[test]
    fn cidr_list_stops_at_first_untrusted_hop() {
        let req = request(
            "10.0.0.1:80",
            &[("x-forwarded-for", "1.1.1.1, 5.5.5.5, 10.0.0.2")],
        );
        let trust: TrustProxy = "10.0.0.0/8".parse().unwrap();
        let trust = trust.compile();
        assert_eq!(ips(&req, &trust), addrs(&["10.0.0.1", "10.0.0.2", "5.5.5.5"]));
        assert_eq!(ip(&req, &trust), "5.5.5.5".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn malformed_hop_ends_resolution() {
        let req = request("10.0.0.1:80", &[("x-forwarded-for", "1.1.1.1, not-an-ip, 2.2.2.2")]);
        let trust = TrustProxy::All.compile();
        assert_eq!(ips(&req, &trust), addrs(&["10.0.0.1", "2.2.2.2"]));
    }

    #[test]
    fn empty_header_behaves_like_no_hops() {
        let req = request("10.0.0.1:80", &[("x-forwarded-for", " , ")]);
        let trust = TrustProxy::All.compile();
        assert_eq!(ips(&req, &trust), addrs(&["10.0.0.1"]));
    }

    #[test]
    fn ipv4_mapped_peer_is_reported_as_ipv4() {
        let req = request("[::ffff:192.0.2.7]:443", &[]);
        let trust = TrustProxy::None.compile();
        assert_eq!(ip(&req, &trust), "192.0.2.7".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn ipv4_mapped_peer_matches_ipv4_networks() {
        let req = request("[::ffff:127.0.0.1]:443", &[("x-forwarded-for", "8.8.8.8")]);
        let trust: TrustProxy = "loopback".parse().unwrap();
        assert_eq!(ip(&req, &trust.compile()), "8.8.8.8".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn predicate_receives_hop_index() {
        let req = request("10.0.0.1:80", &[("x-forwarded-for", "1.1.1.1, 2.2.2.2, 3.3.3.3")]);
        let trust = TrustProxy::predicate(|_, hop| hop < 2).compile();
        assert_eq!(ips(&req, &trust), addrs(&["10.0.0.1", "3.3.3.3", "2.2.2.2"]));
    }

    #[test]
    fn protocol_prefers_forwarded_proto_only_from_trusted_peers() {
        let req = request("127.0.0.1:1", &[("x-forwarded-proto", "https, http")]);
        assert_eq!(protocol(&req, &TrustProxy::All.compile()), "https");
        assert_eq!(protocol(&req, &TrustProxy::None.compile()), "http");
    }

    #[test]
    fn hostname_strips_port_and_respects_trust() {
        let req = request(
            "127.0.0.1:1",
            &[("host", "internal:8080"), ("x-forwarded-host", "example.com:443")],
        );
        assert_eq!(hostname(&req, &TrustProxy::All.compile()).as_deref(), Some("example.com"));
        assert_eq!(hostname(&req, &TrustProxy::None.compile()).as_deref(), Some("internal"));
    }

    #[test]
    fn hostname_handles_ipv6_literals() {
        let req = request("127.0.0.1:1", &[("host", "[::1]:3000")]);
        assert_eq!(hostname(&req, &TrustProxy::None.compile()).as_deref(), Some("[::1]"));
        let req = request("127.0.0.1:1", &[("host", "[::1]")]);
        assert_eq!(hostname(&req, &TrustProxy::None.compile()).as_deref(), Some("[::1]"));
    }

    #[test]
    fn hostname_falls_back_to_uri_authority() {
        let req = Request::new(Method::GET, "http://example.org:8080/x");
        assert_eq!(hostname(&req, &TrustProxy::None.compile()).as_deref(), Some("example.org"));
    }

    #[test]
    fn subdomains_drop_the_registrable_domain() {
        assert_eq!(subdomains(Some("a.b.example.com"), 2), vec!["b", "a"]);
        assert_eq!(subdomains(Some("example.com"), 2), Vec::<String>::new());
        assert_eq!(subdomains(Some("a.b.example.com"), 3), vec!["a"]);
        assert_eq!(subdomains(None, 2), Vec::<String>::new());
    }

    #[test]
    fn ip_hostnames_are_a_single_label() {
        assert_eq!(subdomains(Some("192.168.0.1"), 2), Vec::<String>::new());
        assert_eq!(subdomains(Some("192.168.0.1"), 0), vec!["192.168.0.1"]);
        assert_eq!(subdomains(Some("[::1]"), 0), vec!["[::1]"]);
    }

    #[test]
    fn spec_strings_parse() {
        assert!(matches!("true".parse::<TrustProxy>(), Ok(TrustProxy::All)));
        assert!(matches!("false".parse::<TrustProxy>(), Ok(TrustProxy::None)));
        assert!(matches!("2".parse::<TrustProxy>(), Ok(TrustProxy::Hops(2))));
        match "loopback, 10.1.2.3, 192.168.0.0/16".parse::<TrustProxy>() {
            Ok(TrustProxy::List(nets)) => assert_eq!(nets.len(), 4),
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!("10.0.0.0/8, nope".parse::<TrustProxy>(), Err(Error::TrustSpec(s)) if s == "nope"));
    }
}
