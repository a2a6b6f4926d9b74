//! Amazon S3 and S3-compatible stores.
//!
//! The authority names the bucket. Credentials are explicit through
//! [`S3Options`] or resolved by the client's standard AWS chain
//! (environment, shared credentials file, instance profile). Large
//! objects are downloaded into the spool in parallel ranged parts.

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use opendal::{services::S3, Operator};
use tokio::io::AsyncWriteExt;

use crate::authority::Authority;
use crate::errors::{Op, Result, VfsError};
use crate::options::RetryConfig;

use super::remote::client::{
    download_object, object_key, with_retry, OperatorCache, OperatorClient, Provider,
};
use super::remote::RemoteFileSystem;

/// Connection settings for an [`S3Backend`].
#[derive(Debug, Clone)]
pub struct S3Options {
    pub region: Option<String>,
    /// Custom endpoint for S3-compatible providers.
    pub endpoint: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub session_token: Option<String>,
    /// Path-style addressing (the default); turn off to use
    /// virtual-host-style URLs.
    pub force_path_style: bool,
    /// Ask S3 to encrypt objects at rest with an S3-managed key.
    pub server_side_encryption: bool,
    pub storage_class: Option<String>,
    /// Objects above this size download as parallel ranged parts.
    pub download_part_size: u64,
    pub download_concurrency: usize,
    pub retry: RetryConfig,
}

impl Default for S3Options {
    fn default() -> Self {
        S3Options {
            region: None,
            endpoint: None,
            access_key_id: None,
            secret_access_key: None,
            session_token: None,
            force_path_style: true,
            server_side_encryption: false,
            storage_class: None,
            download_part_size: 32 * 1024 * 1024,
            download_concurrency: 10,
            retry: RetryConfig::default(),
        }
    }
}

#[derive(Debug)]
pub struct S3Backend {
    opts: S3Options,
    operators: OperatorCache,
}

impl S3Backend {
    pub fn new(opts: S3Options) -> Self {
        S3Backend {
            opts,
            operators: OperatorCache::new(),
        }
    }

    fn build_operator(&self, authority: &Authority) -> Result<Operator> {
        let mut builder = S3::default().bucket(authority.host());
        if let Some(region) = &self.opts.region {
            builder = builder.region(region);
        }
        if let Some(endpoint) = &self.opts.endpoint {
            builder = builder.endpoint(endpoint);
        }
        if let Some(key) = &self.opts.access_key_id {
            builder = builder.access_key_id(key);
        }
        if let Some(secret) = &self.opts.secret_access_key {
            builder = builder.secret_access_key(secret);
        }
        if let Some(token) = &self.opts.session_token {
            builder = builder.session_token(token);
        }
        if !self.opts.force_path_style {
            builder = builder.enable_virtual_host_style();
        }
        if self.opts.server_side_encryption {
            builder = builder.server_side_encryption_with_s3_key();
        }
        if let Some(class) = &self.opts.storage_class {
            builder = builder.default_storage_class(class);
        }
        let op = Operator::new(builder)
            .map_err(|e| VfsError::from_opendal(Op::Open, e))?
            .finish();
        Ok(with_retry(op, &self.opts.retry))
    }
}

#[async_trait]
impl Provider for S3Backend {
    fn scheme(&self) -> &'static str {
        "s3"
    }

    fn fs_name(&self) -> &'static str {
        "Simple Storage Service"
    }

    fn auth_identity(&self) -> String {
        format!(
            "s3:{}:{}:{}",
            self.opts.access_key_id.as_deref().unwrap_or("env"),
            self.opts.endpoint.as_deref().unwrap_or("aws"),
            self.opts.region.as_deref().unwrap_or("")
        )
    }

    fn operator(&self, authority: &Authority) -> Result<Operator> {
        self.operators
            .get_or_build(authority, |a| self.build_operator(a))
    }

    /// Parallel-chunked download: large objects are fetched as ranged
    /// parts, a handful in flight at a time, and written to the spool
    /// in order.
    async fn fetch(&self, op: &Operator, path: &str, spool: &mut tokio::fs::File) -> Result<()> {
        let key = object_key(path);
        let meta = op
            .stat(key)
            .await
            .map_err(|e| VfsError::from_opendal(Op::Download, e))?;
        let size = meta.content_length();
        if size <= self.opts.download_part_size {
            return download_object(op, path, spool).await;
        }

        let part = self.opts.download_part_size;
        let ranges: Vec<(u64, u64)> = (0..size)
            .step_by(part as usize)
            .map(|start| (start, (start + part).min(size)))
            .collect();

        let mut parts = futures::stream::iter(ranges.into_iter().map(|(start, end)| {
            let op = op.clone();
            let key = key.to_string();
            async move {
                op.read_with(&key)
                    .range(start..end)
                    .await
                    .map_err(|e| VfsError::from_opendal(Op::Download, e))
            }
        }))
        .buffered(self.opts.download_concurrency.max(1));

        while let Some(chunk) = parts.next().await {
            spool
                .write_all(&chunk?.to_vec())
                .await
                .map_err(|e| VfsError::from_io(Op::Download, e))?;
        }
        spool
            .flush()
            .await
            .map_err(|e| VfsError::from_io(Op::Download, e))
    }
}

/// Default backend: credentials from the AWS chain.
pub fn filesystem() -> RemoteFileSystem {
    with_options(S3Options::default())
}

/// Backend with explicit connection settings.
pub fn with_options(opts: S3Options) -> RemoteFileSystem {
    RemoteFileSystem::new(Arc::new(S3Backend::new(opts)))
}

/// Backend over a pre-built operator, bypassing credential resolution.
/// Every authority resolves to this operator, so pin it to the right
/// bucket.
pub fn with_client(client: Operator) -> RemoteFileSystem {
    RemoteFileSystem::new(Arc::new(OperatorClient::new(
        "s3",
        "Simple Storage Service",
        client,
    )))
}
