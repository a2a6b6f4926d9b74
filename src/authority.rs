//! The authority component of a VFS URI.
//!
//! For object stores the authority names the bucket or container; for
//! transports it is the usual `[user[:password]@]host[:port]` tuple; for
//! the OS backend on Unix it is empty. Whatever was parsed, the raw
//! string form is recoverable verbatim.

use std::fmt;

use crate::errors::{Result, VfsError};
use crate::paths;

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Authority {
    raw: String,
    user: Option<String>,
    password: Option<String>,
    host: String,
    port: Option<u16>,
}

impl Authority {
    /// Parse `[user[:password]@]host[:port]`. Every part is optional;
    /// the empty string is a valid (empty) authority.
    pub fn parse(raw: &str) -> Result<Self> {
        if raw.is_empty() {
            return Ok(Authority::default());
        }

        let (userinfo, hostport) = match raw.rsplit_once('@') {
            Some((u, h)) => (Some(u), h),
            None => (None, raw),
        };

        let (user, password) = match userinfo {
            Some(info) => match info.split_once(':') {
                Some((u, p)) => (Some(u.to_string()), Some(p.to_string())),
                None => (Some(info.to_string()), None),
            },
            None => (None, None),
        };

        let (host, port) = match hostport.rsplit_once(':') {
            Some((h, p)) if !p.is_empty() && p.bytes().all(|b| b.is_ascii_digit()) => {
                let port = p.parse::<u16>().map_err(|_| VfsError::InvalidUri {
                    uri: raw.to_string(),
                    reason: format!("port {p:?} out of range"),
                })?;
                (h.to_string(), Some(port))
            }
            _ => (hostport.to_string(), None),
        };

        Ok(Authority {
            raw: raw.to_string(),
            user,
            password,
            host,
            port,
        })
    }

    /// The raw authority exactly as given to [`Authority::parse`].
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    pub fn password(&self) -> Option<&str> {
        self.password.as_deref()
    }

    /// Host segment; the bucket or container name for object stores.
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> Option<u16> {
        self.port
    }

    /// Percent-encoded form for URI composition (RFC 3986).
    pub fn encoded(&self) -> String {
        paths::encode_authority(&self.raw)
    }
}

impl fmt::Display for Authority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}
