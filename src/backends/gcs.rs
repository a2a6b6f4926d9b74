//! Google Cloud Storage.
//!
//! The authority names the bucket. Credentials come from an explicit
//! service-account JSON (inline or by path) or from the client's
//! application-default chain.

use std::sync::Arc;

use async_trait::async_trait;
use opendal::{services::Gcs, Operator};

use crate::authority::Authority;
use crate::errors::{Op, Result, VfsError};
use crate::options::RetryConfig;

use super::remote::client::{with_retry, OperatorCache, OperatorClient, Provider};
use super::remote::RemoteFileSystem;

#[derive(Debug, Clone, Default)]
pub struct GcsOptions {
    /// Service-account credential JSON.
    pub credential: Option<String>,
    /// Path to a service-account credential file.
    pub credential_path: Option<String>,
    pub endpoint: Option<String>,
    pub retry: RetryConfig,
}

#[derive(Debug)]
pub struct GcsBackend {
    opts: GcsOptions,
    operators: OperatorCache,
}

impl GcsBackend {
    pub fn new(opts: GcsOptions) -> Self {
        GcsBackend {
            opts,
            operators: OperatorCache::new(),
        }
    }

    fn build_operator(&self, authority: &Authority) -> Result<Operator> {
        let mut builder = Gcs::default().bucket(authority.host());
        if let Some(credential) = &self.opts.credential {
            builder = builder.credential(credential);
        }
        if let Some(path) = &self.opts.credential_path {
            builder = builder.credential_path(path);
        }
        if let Some(endpoint) = &self.opts.endpoint {
            builder = builder.endpoint(endpoint);
        }
        let op = Operator::new(builder)
            .map_err(|e| VfsError::from_opendal(Op::Open, e))?
            .finish();
        Ok(with_retry(op, &self.opts.retry))
    }
}

#[async_trait]
impl Provider for GcsBackend {
    fn scheme(&self) -> &'static str {
        "gs"
    }

    fn fs_name(&self) -> &'static str {
        "Google Cloud Storage"
    }

    fn auth_identity(&self) -> String {
        format!(
            "gs:{}",
            self.opts
                .credential_path
                .as_deref()
                .unwrap_or(if self.opts.credential.is_some() {
                    "inline"
                } else {
                    "env"
                })
        )
    }

    fn operator(&self, authority: &Authority) -> Result<Operator> {
        self.operators
            .get_or_build(authority, |a| self.build_operator(a))
    }
}

/// Default backend: application-default credentials.
pub fn filesystem() -> RemoteFileSystem {
    with_options(GcsOptions::default())
}

pub fn with_options(opts: GcsOptions) -> RemoteFileSystem {
    RemoteFileSystem::new(Arc::new(GcsBackend::new(opts)))
}

/// Backend over a pre-built operator, bypassing credential resolution.
pub fn with_client(client: Operator) -> RemoteFileSystem {
    RemoteFileSystem::new(Arc::new(OperatorClient::new(
        "gs",
        "Google Cloud Storage",
        client,
    )))
}
