//! FTP transport.
//!
//! The authority carries user, password, host and port; the username
//! falls back to [`FtpOptions`], `VFS_FTP_USERNAME`, and finally
//! `anonymous`. Like SFTP, idle sessions are evicted from the operator
//! cache and reconnected on demand.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use opendal::{services::Ftp, Operator};

use crate::authority::Authority;
use crate::errors::{Op, Result, VfsError};
use crate::options::RetryConfig;

use super::remote::client::{with_retry, OperatorCache, OperatorClient, Provider};
use super::remote::RemoteFileSystem;

pub const ENV_USERNAME: &str = "VFS_FTP_USERNAME";

const DEFAULT_PORT: u16 = 21;
const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct FtpOptions {
    pub username: Option<String>,
    pub password: Option<String>,
    /// Idle time after which the cached connection is dropped.
    pub idle_timeout: Duration,
    pub retry: RetryConfig,
}

impl Default for FtpOptions {
    fn default() -> Self {
        FtpOptions {
            username: None,
            password: None,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            retry: RetryConfig::default(),
        }
    }
}

impl FtpOptions {
    pub fn from_env() -> Self {
        FtpOptions {
            username: std::env::var(ENV_USERNAME).ok(),
            ..FtpOptions::default()
        }
    }
}

#[derive(Debug)]
pub struct FtpBackend {
    opts: FtpOptions,
    operators: OperatorCache,
}

impl FtpBackend {
    pub fn new(opts: FtpOptions) -> Self {
        let operators = OperatorCache::with_idle_timeout(opts.idle_timeout);
        FtpBackend { opts, operators }
    }

    fn build_operator(&self, authority: &Authority) -> Result<Operator> {
        let endpoint = format!(
            "ftp://{}:{}",
            authority.host(),
            authority.port().unwrap_or(DEFAULT_PORT)
        );
        let user = authority
            .user()
            .or(self.opts.username.as_deref())
            .unwrap_or("anonymous");
        let mut builder = Ftp::default().endpoint(&endpoint).root("/").user(user);
        if let Some(password) = authority.password().or(self.opts.password.as_deref()) {
            builder = builder.password(password);
        }
        let op = Operator::new(builder)
            .map_err(|e| VfsError::from_opendal(Op::Open, e))?
            .finish();
        Ok(with_retry(op, &self.opts.retry))
    }
}

#[async_trait]
impl Provider for FtpBackend {
    fn scheme(&self) -> &'static str {
        "ftp"
    }

    fn fs_name(&self) -> &'static str {
        "File Transfer Protocol"
    }

    fn auth_identity(&self) -> String {
        format!("ftp:{}", self.opts.username.as_deref().unwrap_or("anonymous"))
    }

    fn operator(&self, authority: &Authority) -> Result<Operator> {
        self.operators
            .get_or_build(authority, |a| self.build_operator(a))
    }
}

/// Default backend: username from `VFS_FTP_USERNAME`.
pub fn filesystem() -> RemoteFileSystem {
    with_options(FtpOptions::from_env())
}

pub fn with_options(opts: FtpOptions) -> RemoteFileSystem {
    RemoteFileSystem::new(Arc::new(FtpBackend::new(opts)))
}

/// Backend over a pre-built operator, bypassing credential resolution.
/// The injected connection is not subject to idle eviction; its
/// lifetime belongs to the caller.
pub fn with_client(client: Operator) -> RemoteFileSystem {
    RemoteFileSystem::new(Arc::new(OperatorClient::new(
        "ftp",
        "File Transfer Protocol",
        client,
    )))
}
