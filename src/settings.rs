//! Application settings.
//!
//! Settings are fixed once the application is built. They can be assembled
//! in code or loaded from TOML:
//!
//! ```toml
//! expose_server_header = true
//! server_header = "arbor"
//! subdomain_offset = 2
//! trust_proxy = "loopback, 10.0.0.0/8"   # or true / false / a hop count / a list
//! ```

use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::error::Error;
use crate::proxy::TrustProxy;

#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Send the server-identification header (`X-Powered-By`).
    pub expose_server_header: bool,
    /// Value of the server-identification header.
    pub server_header: String,
    /// Number of trailing hostname labels that are not subdomains.
    pub subdomain_offset: usize,
    /// Which reverse proxies may vouch for the client.
    pub trust_proxy: TrustProxy,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            expose_server_header: true,
            server_header: "arbor".to_owned(),
            subdomain_offset: 2,
            trust_proxy: TrustProxy::None,
        }
    }
}

impl Settings {
    pub fn from_toml_str(content: &str) -> Result<Self, Error> {
        Ok(toml::from_str(content)?)
    }

    /// Reads and parses a TOML settings file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        let content = fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn trust_proxy(mut self, trust: impl Into<TrustProxy>) -> Self {
        self.trust_proxy = trust.into();
        self
    }

    pub fn subdomain_offset(mut self, offset: usize) -> Self {
        self.subdomain_offset = offset;
        self
    }

    pub fn expose_server_header(mut self, expose: bool) -> Self {
        self.expose_server_header = expose;
        self
    }
}
