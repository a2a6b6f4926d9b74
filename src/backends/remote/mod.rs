//! Shared machinery for remote object-store backends.
//!
//! S3, GCS, Azure Blob, SFTP and FTP differ only in how they build and
//! tune their client; everything else — the spooled file state machine,
//! locations, listing, copy and move — lives here and is written once
//! against the [`client::RemoteClient`] contract.

pub mod client;
pub mod file;
pub mod location;

use std::sync::Arc;

use crate::backend::{File, FileSystem, Location};
use crate::copy::DEFAULT_BUFFER_SIZE;
use crate::errors::Result;
use crate::options::{self, FileOption};
use crate::paths;

use client::RemoteClient;
use file::RemoteFile;
use location::RemoteLocation;

/// A filesystem whose objects live behind a [`RemoteClient`].
#[derive(Debug, Clone)]
pub struct RemoteFileSystem {
    client: Arc<dyn RemoteClient>,
    copy_buffer: usize,
}

impl RemoteFileSystem {
    /// Wrap a client. This is also the injection point for a pre-built
    /// or scripted client.
    pub fn new(client: Arc<dyn RemoteClient>) -> Self {
        RemoteFileSystem {
            client,
            copy_buffer: DEFAULT_BUFFER_SIZE,
        }
    }

    /// Buffer size used for streamed (non-native) copies.
    pub fn with_copy_buffer(mut self, size: usize) -> Self {
        self.copy_buffer = size;
        self
    }

    pub fn client(&self) -> Arc<dyn RemoteClient> {
        self.client.clone()
    }
}

impl FileSystem for RemoteFileSystem {
    fn scheme(&self) -> &'static str {
        self.client.scheme()
    }

    fn name(&self) -> &'static str {
        self.client.fs_name()
    }

    fn auth_identity(&self) -> String {
        self.client.auth_identity()
    }

    fn new_file(
        &self,
        authority: &str,
        abs_path: &str,
        opts: &[FileOption],
    ) -> Result<Box<dyn File>> {
        paths::validate_absolute_file_path(abs_path)?;
        Ok(Box::new(RemoteFile::new(
            self.client.clone(),
            crate::authority::Authority::parse(authority)?,
            paths::clean(abs_path),
            options::content_type(opts),
            options::file_cancel_token(opts),
            self.copy_buffer,
        )))
    }

    fn new_location(&self, authority: &str, abs_path: &str) -> Result<Box<dyn Location>> {
        paths::validate_absolute_location_path(abs_path)?;
        Ok(Box::new(RemoteLocation::new(
            self.client.clone(),
            crate::authority::Authority::parse(authority)?,
            paths::clean(abs_path),
            self.copy_buffer,
        )))
    }
}
