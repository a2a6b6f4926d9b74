//! The polymorphic contract every backend implements.
//!
//! `FileSystem`, `Location` and `File` are the sole polymorphism
//! boundary of the crate: each backend supplies trait objects for all
//! three, and everything above them (URI dispatch, cross-backend copy)
//! is written against these traits alone.

use std::fmt::Debug;
use std::io::SeekFrom;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;

use crate::authority::Authority;
use crate::errors::{Result, VfsError};
use crate::options::{DeleteOption, FileOption};
use crate::paths;

/// Deprecated no-op retry handle.
///
/// Retained for API compatibility only; retry is configured on each
/// backend through its `RetryConfig`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Retry;

/// A handle to one backend, identified by its URI scheme.
///
/// FileSystems are cheap to clone and safe to share; constructing a
/// `File` or `Location` never touches the backing store.
pub trait FileSystem: Send + Sync + Debug {
    /// URI scheme this backend serves, e.g. `s3` or `file`.
    fn scheme(&self) -> &'static str;

    /// Human-readable backend name.
    fn name(&self) -> &'static str;

    /// Fingerprint of the credentials this instance was built with.
    ///
    /// Two filesystems with equal scheme, equal authority and equal
    /// fingerprint address the same store with the same rights, which
    /// is what makes a native server-side copy safe.
    fn auth_identity(&self) -> String;

    /// Build a file handle for an absolute path under an authority.
    fn new_file(
        &self,
        authority: &str,
        abs_path: &str,
        opts: &[FileOption],
    ) -> Result<Box<dyn File>>;

    /// Build a location handle for an absolute path under an authority.
    fn new_location(&self, authority: &str, abs_path: &str) -> Result<Box<dyn Location>>;

    #[deprecated(note = "retry is a backend client concern; configure RetryConfig instead")]
    fn retry(&self) -> Retry {
        Retry
    }
}

/// An absolute directory-like path on one backend.
///
/// Locations are immutable; navigation constructs new values.
#[async_trait]
pub trait Location: Send + Sync + Debug {
    fn filesystem(&self) -> Arc<dyn FileSystem>;

    fn authority(&self) -> &Authority;

    /// Absolute path, starting and ending with `/`.
    fn path(&self) -> String;

    /// `scheme://authority/path/`.
    fn uri(&self) -> String {
        let fs = self.filesystem();
        paths::location_uri(fs.scheme(), self.authority(), &self.path())
    }

    async fn exists(&self) -> Result<bool>;

    /// Basenames of the files directly under this location. An absent
    /// or empty location yields an empty list, not an error.
    async fn list(&self) -> Result<Vec<String>>;

    /// Basenames under this location starting with `prefix`. A prefix
    /// containing `/` is split into a sub-location and a basename
    /// prefix.
    async fn list_by_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let (dir, base) = paths::split_prefix(prefix);
        let names = if dir.is_empty() {
            self.list().await?
        } else {
            self.new_location(&dir)?.list().await?
        };
        Ok(names.into_iter().filter(|n| n.starts_with(&base)).collect())
    }

    /// Basenames under this location matching `re`.
    async fn list_by_regex(&self, re: &Regex) -> Result<Vec<String>> {
        Ok(self
            .list()
            .await?
            .into_iter()
            .filter(|n| re.is_match(n))
            .collect())
    }

    /// Construct a sub-location from a relative location path.
    fn new_location(&self, rel_path: &str) -> Result<Box<dyn Location>>;

    /// Construct a file from a relative file path.
    fn new_file(&self, rel_path: &str, opts: &[FileOption]) -> Result<Box<dyn File>>;

    /// Delete the file at a relative path under this location.
    async fn delete_file(&self, rel_path: &str, opts: &[DeleteOption]) -> Result<()> {
        let mut f = self.new_file(rel_path, &[])?;
        f.delete(opts).await
    }

    /// Open a named child for reading, verifying that it exists.
    async fn open(&self, name: &str) -> Result<Box<dyn File>> {
        let f = self.new_file(name, &[])?;
        if !f.exists().await? {
            return Err(VfsError::NotExist);
        }
        Ok(f)
    }

    #[deprecated(note = "construct a new Location with new_location instead")]
    fn change_dir(&self, rel_path: &str) -> Result<Box<dyn Location>> {
        self.new_location(rel_path)
    }

    #[deprecated(note = "use authority instead")]
    fn volume(&self) -> String {
        self.authority().to_string()
    }
}

/// A single object on one backend, existing or not yet existing.
///
/// A `File` is a stateful byte stream: it is `Send` but not `Sync`, and
/// the stream operations take `&mut self`. Backend resources (spool,
/// network handle) are acquired lazily on first read or write and
/// released by [`File::close`].
#[async_trait]
pub trait File: Send + Debug {
    /// The location holding this file.
    fn location(&self) -> Box<dyn Location>;

    /// Full absolute path, never ending with `/`.
    fn path(&self) -> String;

    /// Base name of the file.
    fn name(&self) -> String {
        paths::basename(&self.path()).to_string()
    }

    /// `scheme://authority/path`.
    fn uri(&self) -> String {
        let loc = self.location();
        let fs = loc.filesystem();
        paths::file_uri(fs.scheme(), loc.authority(), &self.path())
    }

    async fn exists(&self) -> Result<bool>;

    async fn size(&self) -> Result<u64>;

    async fn last_modified(&self) -> Result<Option<DateTime<Utc>>>;

    /// Read into `buf`, returning the number of bytes read; `Ok(0)`
    /// signals end of file.
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Write `buf` at the current position, returning `buf.len()` on
    /// success. The bytes become durable on `close`.
    async fn write(&mut self, buf: &[u8]) -> Result<usize>;

    /// Reposition the stream. Seeking past the end is permitted; reads
    /// there return end of file.
    async fn seek(&mut self, pos: SeekFrom) -> Result<u64>;

    /// Flush and persist pending writes, then release backend
    /// resources. Closing a file that was never touched is a no-op.
    async fn close(&mut self) -> Result<()>;

    /// Create a zero-length object, or bump last-modified if the
    /// object already exists.
    async fn touch(&mut self) -> Result<()>;

    /// Remove the object. The `File` value stays valid and may be
    /// rewritten afterwards.
    async fn delete(&mut self, opts: &[DeleteOption]) -> Result<()>;

    /// Copy this file's content to `target`, which may live on any
    /// backend. Requires the stream position to be at the origin.
    async fn copy_to_file(&mut self, target: &mut dyn File) -> Result<()>;

    /// Copy this file under `target`, keeping its base name.
    async fn copy_to_location(&mut self, target: &dyn Location) -> Result<Box<dyn File>> {
        let name = self.name();
        let mut dst = target.new_file(&name, &[])?;
        self.copy_to_file(dst.as_mut()).await?;
        Ok(dst)
    }

    /// Copy to `target`, then delete this file.
    async fn move_to_file(&mut self, target: &mut dyn File) -> Result<()> {
        self.copy_to_file(target).await?;
        self.delete(&[]).await
    }

    /// Copy under `target` keeping the base name, then delete this
    /// file.
    async fn move_to_location(&mut self, target: &dyn Location) -> Result<Box<dyn File>> {
        let dst = self.copy_to_location(target).await?;
        self.delete(&[]).await?;
        Ok(dst)
    }
}
