//! Content-addressed entity tags.
//!
//! Format: `"<length in hex>-<first 27 chars of base64(sha1(body))>"`, the
//! same shape most Node.js frameworks emit, so caches in front of a mixed
//! fleet see stable tags. Same bytes always yield the same tag.

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use sha1::{Digest, Sha1};

/// Strong tag for `body`.
pub fn strong(body: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(body);
    let hash = BASE64.encode(hasher.finalize());
    format!("\"{:x}-{}\"", body.len(), &hash[..27])
}

/// Weak tag for `body` (`W/` prefix). This is what the send pipeline uses.
pub fn weak(body: &[u8]) -> String {
    format!("W/{}", strong(body))
}
