//! SFTP transport.
//!
//! The authority is the usual `[user[:pass]@]host[:port]` tuple; the
//! username falls back to [`SftpOptions`] and then `VFS_SFTP_USERNAME`.
//! Sessions live inside cached operators that are evicted after the
//! idle timeout and reconnected on next use.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use opendal::{services::Sftp, Operator};

use crate::authority::Authority;
use crate::errors::{Op, Result, VfsError};
use crate::options::RetryConfig;

use super::remote::client::{with_retry, OperatorCache, OperatorClient, Provider};
use super::remote::RemoteFileSystem;

pub const ENV_USERNAME: &str = "VFS_SFTP_USERNAME";

const DEFAULT_PORT: u16 = 22;
const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct SftpOptions {
    pub username: Option<String>,
    /// Path to the private key file.
    pub key_file: Option<String>,
    /// Known-hosts handling: `strict`, `accept-new` or `add`.
    pub known_hosts_strategy: Option<String>,
    /// Idle time after which the cached session is dropped.
    pub idle_timeout: Duration,
    pub retry: RetryConfig,
}

impl Default for SftpOptions {
    fn default() -> Self {
        SftpOptions {
            username: None,
            key_file: None,
            known_hosts_strategy: None,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            retry: RetryConfig::default(),
        }
    }
}

impl SftpOptions {
    pub fn from_env() -> Self {
        SftpOptions {
            username: std::env::var(ENV_USERNAME).ok(),
            ..SftpOptions::default()
        }
    }
}

#[derive(Debug)]
pub struct SftpBackend {
    opts: SftpOptions,
    operators: OperatorCache,
}

impl SftpBackend {
    pub fn new(opts: SftpOptions) -> Self {
        let operators = OperatorCache::with_idle_timeout(opts.idle_timeout);
        SftpBackend { opts, operators }
    }

    fn username<'a>(&'a self, authority: &'a Authority) -> Option<&'a str> {
        authority.user().or(self.opts.username.as_deref())
    }

    fn build_operator(&self, authority: &Authority) -> Result<Operator> {
        let endpoint = format!(
            "ssh://{}:{}",
            authority.host(),
            authority.port().unwrap_or(DEFAULT_PORT)
        );
        let mut builder = Sftp::default().endpoint(&endpoint).root("/");
        if let Some(user) = self.username(authority) {
            builder = builder.user(user);
        }
        if let Some(key) = &self.opts.key_file {
            builder = builder.key(key);
        }
        if let Some(strategy) = &self.opts.known_hosts_strategy {
            builder = builder.known_hosts_strategy(strategy);
        }
        let op = Operator::new(builder)
            .map_err(|e| VfsError::from_opendal(Op::Open, e))?
            .finish();
        Ok(with_retry(op, &self.opts.retry))
    }
}

#[async_trait]
impl Provider for SftpBackend {
    fn scheme(&self) -> &'static str {
        "sftp"
    }

    fn fs_name(&self) -> &'static str {
        "Secure File Transfer Protocol"
    }

    fn auth_identity(&self) -> String {
        format!(
            "sftp:{}:{}",
            self.opts.username.as_deref().unwrap_or(""),
            self.opts.key_file.as_deref().unwrap_or("")
        )
    }

    fn operator(&self, authority: &Authority) -> Result<Operator> {
        self.operators
            .get_or_build(authority, |a| self.build_operator(a))
    }
}

/// Default backend: username from `VFS_SFTP_USERNAME`.
pub fn filesystem() -> RemoteFileSystem {
    with_options(SftpOptions::from_env())
}

pub fn with_options(opts: SftpOptions) -> RemoteFileSystem {
    RemoteFileSystem::new(Arc::new(SftpBackend::new(opts)))
}

/// Backend over a pre-built operator, bypassing credential resolution.
/// The injected session is not subject to idle eviction; its lifetime
/// belongs to the caller.
pub fn with_client(client: Operator) -> RemoteFileSystem {
    RemoteFileSystem::new(Arc::new(OperatorClient::new(
        "sftp",
        "Secure File Transfer Protocol",
        client,
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authority_user_outranks_configured_user() {
        let backend = SftpBackend::new(SftpOptions {
            username: Some("configured".into()),
            ..SftpOptions::default()
        });
        let with_user = Authority::parse("deploy@host:2222").unwrap();
        assert_eq!(backend.username(&with_user), Some("deploy"));

        let plain = Authority::parse("host").unwrap();
        assert_eq!(backend.username(&plain), Some("configured"));
    }
}
