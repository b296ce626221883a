//! Conditional-GET freshness check.
//!
//! A cached representation is fresh when every validator the client sent
//! still holds: each `If-None-Match` token is compared against the response
//! `ETag` (weak and strong forms are interchangeable), and
//! `If-Modified-Since` must not be older than `Last-Modified`.
//! `Cache-Control: no-cache` on the request always forces a full response.

use http::HeaderMap;
use http::header::{CACHE_CONTROL, ETAG, IF_MODIFIED_SINCE, IF_NONE_MATCH, LAST_MODIFIED};

/// Returns `true` when the client's cached copy can be reused (→ 304).
pub fn is_fresh(req: &HeaderMap, res: &HeaderMap) -> bool {
    let none_match = header(req, IF_NONE_MATCH);
    let modified_since = header(req, IF_MODIFIED_SINCE);

    if none_match.is_none() && modified_since.is_none() {
        return false;
    }

    if header(req, CACHE_CONTROL).is_some_and(has_no_cache) {
        return false;
    }

    if let Some(none_match) = none_match.filter(|v| v.trim() != "*") {
        let Some(etag) = header(res, ETAG) else {
            return false;
        };
        let matched = none_match
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .any(|t| etags_match(t, etag));
        if !matched {
            return false;
        }
    }

    if let Some(since) = modified_since {
        let Some(last_modified) = header(res, LAST_MODIFIED) else {
            return false;
        };
        match (httpdate::parse_http_date(last_modified), httpdate::parse_http_date(since)) {
            (Ok(modified), Ok(since)) if modified <= since => {}
            _ => return false,
        }
    }

    true
}

fn header(map: &HeaderMap, name: http::HeaderName) -> Option<&str> {
    map.get(name).and_then(|v| v.to_str().ok())
}

fn etags_match(token: &str, etag: &str) -> bool {
    token.strip_prefix("W/").unwrap_or(token) == etag.strip_prefix("W/").unwrap_or(etag)
}

fn has_no_cache(cache_control: &str) -> bool {
    cache_control
        .split(',')
        .any(|d| d.trim().eq_ignore_ascii_case("no-cache"))
}
