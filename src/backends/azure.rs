//! Azure Blob Storage.
//!
//! URIs use the `az://container/path` shape; the authority names the
//! container. Authentication is selected in priority order: OAuth
//! client credentials, shared account key, then anonymous. The
//! `VFS_AZURE_*` environment variables feed [`AzureOptions::from_env`].

use std::sync::Arc;

use async_trait::async_trait;
use opendal::{services::Azblob, Operator};

use crate::authority::Authority;
use crate::errors::{Op, Result, VfsError};
use crate::options::RetryConfig;

use super::remote::client::{with_retry, OperatorCache, OperatorClient, Provider};
use super::remote::RemoteFileSystem;

pub const ENV_STORAGE_ACCOUNT: &str = "VFS_AZURE_STORAGE_ACCOUNT";
pub const ENV_STORAGE_ACCESS_KEY: &str = "VFS_AZURE_STORAGE_ACCESS_KEY";
pub const ENV_TENANT_ID: &str = "VFS_AZURE_TENANT_ID";
pub const ENV_CLIENT_ID: &str = "VFS_AZURE_CLIENT_ID";
pub const ENV_CLIENT_SECRET: &str = "VFS_AZURE_CLIENT_SECRET";
pub const ENV_NAME: &str = "VFS_AZURE_ENV_NAME";

#[derive(Debug, Clone, Default)]
pub struct AzureOptions {
    pub account_name: Option<String>,
    pub account_key: Option<String>,
    pub tenant_id: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    /// Azure cloud environment, e.g. `AZUREUSGOVERNMENTCLOUD`. Picks
    /// the blob endpoint suffix.
    pub env_name: Option<String>,
    /// Full endpoint override; wins over account + environment.
    pub endpoint: Option<String>,
    pub retry: RetryConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AzureAuth {
    OAuth,
    SharedKey,
    Anonymous,
}

impl AzureOptions {
    /// Read the `VFS_AZURE_*` variables.
    pub fn from_env() -> Self {
        AzureOptions {
            account_name: std::env::var(ENV_STORAGE_ACCOUNT).ok(),
            account_key: std::env::var(ENV_STORAGE_ACCESS_KEY).ok(),
            tenant_id: std::env::var(ENV_TENANT_ID).ok(),
            client_id: std::env::var(ENV_CLIENT_ID).ok(),
            client_secret: std::env::var(ENV_CLIENT_SECRET).ok(),
            env_name: std::env::var(ENV_NAME).ok(),
            endpoint: None,
            retry: RetryConfig::default(),
        }
    }

    fn auth(&self) -> AzureAuth {
        if self.tenant_id.is_some() && self.client_id.is_some() && self.client_secret.is_some() {
            AzureAuth::OAuth
        } else if self.account_key.is_some() {
            AzureAuth::SharedKey
        } else {
            AzureAuth::Anonymous
        }
    }

    fn endpoint_suffix(&self) -> &'static str {
        match self.env_name.as_deref().map(str::to_ascii_uppercase) {
            Some(ref name) if name == "AZUREUSGOVERNMENTCLOUD" => "blob.core.usgovcloudapi.net",
            Some(ref name) if name == "AZURECHINACLOUD" => "blob.core.chinacloudapi.cn",
            _ => "blob.core.windows.net",
        }
    }

    fn endpoint(&self) -> Option<String> {
        if let Some(endpoint) = &self.endpoint {
            return Some(endpoint.clone());
        }
        self.account_name
            .as_ref()
            .map(|account| format!("https://{}.{}", account, self.endpoint_suffix()))
    }
}

#[derive(Debug)]
pub struct AzureBackend {
    opts: AzureOptions,
    operators: OperatorCache,
}

impl AzureBackend {
    pub fn new(opts: AzureOptions) -> Self {
        AzureBackend {
            opts,
            operators: OperatorCache::new(),
        }
    }

    fn build_operator(&self, authority: &Authority) -> Result<Operator> {
        let mut builder = Azblob::default().container(authority.host());
        if let Some(endpoint) = self.opts.endpoint() {
            builder = builder.endpoint(&endpoint);
        }
        if let Some(account) = &self.opts.account_name {
            builder = builder.account_name(account);
        }
        if self.opts.auth() == AzureAuth::SharedKey {
            if let Some(key) = &self.opts.account_key {
                builder = builder.account_key(key);
            }
        }
        // the OAuth path leaves key material unset; the client resolves
        // a token through its Azure credential chain
        let op = Operator::new(builder)
            .map_err(|e| VfsError::from_opendal(Op::Open, e))?
            .finish();
        Ok(with_retry(op, &self.opts.retry))
    }
}

#[async_trait]
impl Provider for AzureBackend {
    fn scheme(&self) -> &'static str {
        "az"
    }

    fn fs_name(&self) -> &'static str {
        "Azure Blob Storage"
    }

    fn auth_identity(&self) -> String {
        let kind = match self.opts.auth() {
            AzureAuth::OAuth => "oauth",
            AzureAuth::SharedKey => "shared-key",
            AzureAuth::Anonymous => "anonymous",
        };
        format!(
            "az:{}:{}",
            self.opts.account_name.as_deref().unwrap_or(""),
            kind
        )
    }

    fn operator(&self, authority: &Authority) -> Result<Operator> {
        self.operators
            .get_or_build(authority, |a| self.build_operator(a))
    }
}

/// Default backend: settings from the `VFS_AZURE_*` environment.
pub fn filesystem() -> RemoteFileSystem {
    with_options(AzureOptions::from_env())
}

pub fn with_options(opts: AzureOptions) -> RemoteFileSystem {
    RemoteFileSystem::new(Arc::new(AzureBackend::new(opts)))
}

/// Backend over a pre-built operator, bypassing credential resolution.
pub fn with_client(client: Operator) -> RemoteFileSystem {
    RemoteFileSystem::new(Arc::new(OperatorClient::new(
        "az",
        "Azure Blob Storage",
        client,
    )))
}
