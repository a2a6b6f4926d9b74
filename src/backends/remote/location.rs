//! Locations on remote object stores.
//!
//! Object stores have no real directories; a location is a key prefix.
//! Listing is best-effort over the client's non-recursive listing, and
//! existence answers for the authority behind the prefix.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::authority::Authority;
use crate::backend::{File, FileSystem, Location};
use crate::errors::{Result, VfsError};
use crate::options::{self, FileOption, LocationOption};
use crate::paths;

use super::client::RemoteClient;
use super::file::RemoteFile;
use super::RemoteFileSystem;

#[derive(Debug)]
pub struct RemoteLocation {
    client: Arc<dyn RemoteClient>,
    authority: Authority,
    path: String,
    copy_buffer: usize,
    cancel: Option<CancellationToken>,
}

impl RemoteLocation {
    pub(crate) fn new(
        client: Arc<dyn RemoteClient>,
        authority: Authority,
        path: String,
        copy_buffer: usize,
    ) -> Self {
        RemoteLocation {
            client,
            authority,
            path,
            copy_buffer,
            cancel: None,
        }
    }

    /// Apply location options; files created here inherit the
    /// cancellation token.
    pub fn with_options(mut self, opts: &[LocationOption]) -> Self {
        if let Some(token) = options::location_cancel_token(opts) {
            self.cancel = Some(token);
        }
        self
    }

    pub(crate) fn inheriting_cancel(mut self, cancel: Option<CancellationToken>) -> Self {
        self.cancel = cancel;
        self
    }
}

#[async_trait]
impl Location for RemoteLocation {
    fn filesystem(&self) -> Arc<dyn FileSystem> {
        Arc::new(RemoteFileSystem::new(self.client.clone()).with_copy_buffer(self.copy_buffer))
    }

    fn authority(&self) -> &Authority {
        &self.authority
    }

    fn path(&self) -> String {
        self.path.clone()
    }

    async fn exists(&self) -> Result<bool> {
        self.client
            .location_exists(&self.authority, &self.path)
            .await
    }

    async fn list(&self) -> Result<Vec<String>> {
        let full_paths = match self.client.list(&self.authority, &self.path).await {
            Ok(paths) => paths,
            Err(VfsError::NotExist) => return Ok(Vec::new()),
            Err(err) => return Err(err),
        };
        Ok(full_paths
            .iter()
            .filter(|p| paths::parent_dir(p) == self.path)
            .map(|p| paths::basename(p).to_string())
            .collect())
    }

    fn new_location(&self, rel_path: &str) -> Result<Box<dyn Location>> {
        paths::validate_relative_location_path(rel_path)?;
        Ok(Box::new(RemoteLocation {
            client: self.client.clone(),
            authority: self.authority.clone(),
            path: paths::ensure_trailing_slash(&paths::join(&self.path, rel_path)),
            copy_buffer: self.copy_buffer,
            cancel: self.cancel.clone(),
        }))
    }

    fn new_file(&self, rel_path: &str, opts: &[FileOption]) -> Result<Box<dyn File>> {
        paths::validate_relative_file_path(rel_path)?;
        Ok(Box::new(RemoteFile::new(
            self.client.clone(),
            self.authority.clone(),
            paths::join(&self.path, rel_path),
            options::content_type(opts),
            options::file_cancel_token(opts).or_else(|| self.cancel.clone()),
            self.copy_buffer,
        )))
    }
}
