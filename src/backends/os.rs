//! OS filesystem backend.
//!
//! A thin adapter over `tokio::fs`. Paths map one-to-one onto host
//! paths; on Windows the authority carries the drive letter. Moves try
//! a native rename first and fall back to copy-then-delete when the
//! rename crosses a device.

use std::io::SeekFrom;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use filetime::FileTime;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::authority::Authority;
use crate::backend::{File, FileSystem, Location};
use crate::copy::{copy_file_buffered, validate_copy_seek_position, DEFAULT_BUFFER_SIZE};
use crate::errors::{Op, Result, VfsError};
use crate::options::{self, DeleteOption, FileOption, LocationOption};
use crate::paths;

fn os_path(authority: &Authority, path: &str) -> PathBuf {
    if cfg!(windows) && !authority.is_empty() {
        PathBuf::from(format!("{}:{}", authority.as_str(), path))
    } else {
        PathBuf::from(path)
    }
}

/// The host filesystem, addressed through the `file` scheme.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsFileSystem;

impl OsFileSystem {
    pub fn new() -> Self {
        OsFileSystem
    }
}

impl FileSystem for OsFileSystem {
    fn scheme(&self) -> &'static str {
        "file"
    }

    fn name(&self) -> &'static str {
        "os"
    }

    fn auth_identity(&self) -> String {
        // every instance addresses the same host filesystem
        "os".to_string()
    }

    fn new_file(
        &self,
        authority: &str,
        abs_path: &str,
        opts: &[FileOption],
    ) -> Result<Box<dyn File>> {
        paths::validate_absolute_file_path(abs_path)?;
        Ok(Box::new(OsFile {
            authority: Authority::parse(authority)?,
            path: paths::clean(abs_path),
            cancel: options::file_cancel_token(opts),
            handle: None,
            mode: Mode::Closed,
        }))
    }

    fn new_location(&self, authority: &str, abs_path: &str) -> Result<Box<dyn Location>> {
        paths::validate_absolute_location_path(abs_path)?;
        Ok(Box::new(OsLocation {
            authority: Authority::parse(authority)?,
            path: paths::clean(abs_path),
            cancel: None,
        }))
    }
}

/// A directory on the host filesystem.
#[derive(Debug)]
pub struct OsLocation {
    authority: Authority,
    path: String,
    cancel: Option<CancellationToken>,
}

impl OsLocation {
    pub fn with_options(mut self, opts: &[LocationOption]) -> Self {
        if let Some(token) = options::location_cancel_token(opts) {
            self.cancel = Some(token);
        }
        self
    }

    fn fs_path(&self) -> PathBuf {
        os_path(&self.authority, &self.path)
    }
}

#[async_trait]
impl Location for OsLocation {
    fn filesystem(&self) -> Arc<dyn FileSystem> {
        Arc::new(OsFileSystem)
    }

    fn authority(&self) -> &Authority {
        &self.authority
    }

    fn path(&self) -> String {
        self.path.clone()
    }

    async fn exists(&self) -> Result<bool> {
        match fs::metadata(self.fs_path()).await {
            Ok(meta) => Ok(meta.is_dir()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(VfsError::from_io(Op::Exists, err)),
        }
    }

    async fn list(&self) -> Result<Vec<String>> {
        let mut read_dir = match fs::read_dir(self.fs_path()).await {
            Ok(rd) => rd,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(VfsError::from_io(Op::List, err)),
        };
        let mut names = Vec::new();
        while let Some(entry) = read_dir
            .next_entry()
            .await
            .map_err(|e| VfsError::from_io(Op::List, e))?
        {
            let file_type = entry
                .file_type()
                .await
                .map_err(|e| VfsError::from_io(Op::List, e))?;
            if file_type.is_file() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }

    fn new_location(&self, rel_path: &str) -> Result<Box<dyn Location>> {
        paths::validate_relative_location_path(rel_path)?;
        Ok(Box::new(OsLocation {
            authority: self.authority.clone(),
            path: paths::ensure_trailing_slash(&paths::join(&self.path, rel_path)),
            cancel: self.cancel.clone(),
        }))
    }

    fn new_file(&self, rel_path: &str, opts: &[FileOption]) -> Result<Box<dyn File>> {
        paths::validate_relative_file_path(rel_path)?;
        Ok(Box::new(OsFile {
            authority: self.authority.clone(),
            path: paths::join(&self.path, rel_path),
            cancel: options::file_cancel_token(opts).or_else(|| self.cancel.clone()),
            handle: None,
            mode: Mode::Closed,
        }))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Closed,
    Read,
    Write,
    ReadWrite,
}

/// A file on the host filesystem.
///
/// The native handle is opened lazily: read-only on first read, with
/// truncation on first write, and promoted to read-write in place when
/// the access pattern mixes.
#[derive(Debug)]
pub struct OsFile {
    authority: Authority,
    path: String,
    cancel: Option<CancellationToken>,
    handle: Option<fs::File>,
    mode: Mode,
}

impl OsFile {
    fn fs_path(&self) -> PathBuf {
        os_path(&self.authority, &self.path)
    }

    fn check_cancel(&self) -> Result<()> {
        match &self.cancel {
            Some(token) if token.is_cancelled() => Err(VfsError::Cancelled),
            _ => Ok(()),
        }
    }

    /// Swap the current handle for a read-write one positioned where
    /// the old handle was.
    async fn promote(&mut self) -> Result<()> {
        let pos = match self.handle.as_mut() {
            Some(h) => {
                h.flush().await.map_err(|e| VfsError::from_io(Op::Write, e))?;
                h.seek(SeekFrom::Current(0))
                    .await
                    .map_err(|e| VfsError::from_io(Op::Seek, e))?
            }
            None => 0,
        };
        self.handle = None;
        let mut file = fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(self.fs_path())
            .await
            .map_err(|e| VfsError::from_io(Op::Open, e))?;
        file.seek(SeekFrom::Start(pos))
            .await
            .map_err(|e| VfsError::from_io(Op::Seek, e))?;
        self.handle = Some(file);
        self.mode = Mode::ReadWrite;
        Ok(())
    }

    async fn for_read(&mut self) -> Result<&mut fs::File> {
        match self.mode {
            Mode::Read | Mode::ReadWrite if self.handle.is_some() => {}
            Mode::Write => self.promote().await?,
            _ => {
                let file = fs::File::open(self.fs_path())
                    .await
                    .map_err(|e| VfsError::from_io(Op::Open, e))?;
                self.handle = Some(file);
                self.mode = Mode::Read;
            }
        }
        self.handle.as_mut().ok_or(VfsError::NotExist)
    }

    async fn for_write(&mut self) -> Result<&mut fs::File> {
        match self.mode {
            Mode::Write | Mode::ReadWrite if self.handle.is_some() => {}
            Mode::Read => self.promote().await?,
            _ => {
                // first write truncates, as open-for-write does
                let file = fs::OpenOptions::new()
                    .write(true)
                    .create(true)
                    .truncate(true)
                    .open(self.fs_path())
                    .await
                    .map_err(|e| VfsError::from_io(Op::Open, e))?;
                self.handle = Some(file);
                self.mode = Mode::Write;
            }
        }
        self.handle.as_mut().ok_or(VfsError::NotExist)
    }

    fn is_os_file(target_loc: &dyn Location) -> bool {
        let fs = target_loc.filesystem();
        fs.scheme() == "file" && fs.auth_identity() == "os"
    }
}

#[async_trait]
impl File for OsFile {
    fn location(&self) -> Box<dyn Location> {
        Box::new(OsLocation {
            authority: self.authority.clone(),
            path: paths::parent_dir(&self.path),
            cancel: self.cancel.clone(),
        })
    }

    fn path(&self) -> String {
        self.path.clone()
    }

    async fn exists(&self) -> Result<bool> {
        match fs::metadata(self.fs_path()).await {
            Ok(meta) => Ok(meta.is_file()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(VfsError::from_io(Op::Exists, err)),
        }
    }

    async fn size(&self) -> Result<u64> {
        let meta = fs::metadata(self.fs_path())
            .await
            .map_err(|e| VfsError::from_io(Op::Size, e))?;
        Ok(meta.len())
    }

    async fn last_modified(&self) -> Result<Option<DateTime<Utc>>> {
        let meta = fs::metadata(self.fs_path())
            .await
            .map_err(|e| VfsError::from_io(Op::LastModified, e))?;
        match meta.modified() {
            Ok(time) => Ok(Some(DateTime::<Utc>::from(time))),
            Err(_) => Ok(None),
        }
    }

    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.check_cancel()?;
        let handle = self.for_read().await?;
        handle
            .read(buf)
            .await
            .map_err(|e| VfsError::from_io(Op::Read, e))
    }

    async fn write(&mut self, buf: &[u8]) -> Result<usize> {
        self.check_cancel()?;
        let handle = self.for_write().await?;
        handle
            .write_all(buf)
            .await
            .map_err(|e| VfsError::from_io(Op::Write, e))?;
        Ok(buf.len())
    }

    async fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        self.check_cancel()?;
        let handle = self.for_read().await?;
        handle
            .seek(pos)
            .await
            .map_err(|e| VfsError::from_io(Op::Seek, e))
    }

    async fn close(&mut self) -> Result<()> {
        self.check_cancel()?;
        if let Some(mut handle) = self.handle.take() {
            if matches!(self.mode, Mode::Write | Mode::ReadWrite) {
                handle
                    .flush()
                    .await
                    .map_err(|e| VfsError::from_io(Op::Close, e))?;
                handle
                    .sync_all()
                    .await
                    .map_err(|e| VfsError::from_io(Op::Close, e))?;
            }
        }
        self.mode = Mode::Closed;
        Ok(())
    }

    async fn touch(&mut self) -> Result<()> {
        self.check_cancel()?;
        if self.exists().await? {
            filetime::set_file_mtime(self.fs_path(), FileTime::now())
                .map_err(|e| VfsError::from_io(Op::Touch, e))
        } else {
            fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(self.fs_path())
                .await
                .map_err(|e| VfsError::from_io(Op::Touch, e))?;
            Ok(())
        }
    }

    async fn delete(&mut self, _opts: &[DeleteOption]) -> Result<()> {
        self.check_cancel()?;
        self.handle = None;
        self.mode = Mode::Closed;
        fs::remove_file(self.fs_path())
            .await
            .map_err(|e| VfsError::from_io(Op::Delete, e))
    }

    async fn copy_to_file(&mut self, target: &mut dyn File) -> Result<()> {
        self.check_cancel()?;
        let target_loc = target.location();
        if Self::is_os_file(target_loc.as_ref()) {
            validate_copy_seek_position(self).await?;
            self.close().await?;
            let dst = os_path(target_loc.authority(), &target.path());
            if let Some(parent) = dst.parent() {
                fs::create_dir_all(parent)
                    .await
                    .map_err(|e| VfsError::from_io(Op::CopyToFile, e))?;
            }
            fs::copy(self.fs_path(), &dst)
                .await
                .map_err(|e| VfsError::from_io(Op::CopyToFile, e))?;
            debug!(src = %self.path, dst = %dst.display(), "native copy");
            target.close().await
        } else {
            copy_file_buffered(self, target, DEFAULT_BUFFER_SIZE).await
        }
    }

    async fn move_to_file(&mut self, target: &mut dyn File) -> Result<()> {
        self.check_cancel()?;
        let target_loc = target.location();
        if !Self::is_os_file(target_loc.as_ref()) {
            self.copy_to_file(target).await?;
            return self.delete(&[]).await;
        }

        validate_copy_seek_position(self).await?;
        self.close().await?;
        let src = self.fs_path();
        let dst = os_path(target_loc.authority(), &target.path());
        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| VfsError::from_io(Op::MoveToFile, e))?;
        }
        match fs::rename(&src, &dst).await {
            Ok(()) => Ok(()),
            Err(err)
                if err.kind() == std::io::ErrorKind::CrossesDevices
                    || err.kind() == std::io::ErrorKind::Other =>
            {
                // rename crossed a device: copy then delete
                fs::copy(&src, &dst)
                    .await
                    .map_err(|e| VfsError::from_io(Op::MoveToFile, e))?;
                fs::remove_file(&src)
                    .await
                    .map_err(|e| VfsError::from_io(Op::MoveToFile, e))
            }
            Err(err) => Err(VfsError::from_io(Op::MoveToFile, err)),
        }
    }

    async fn move_to_location(&mut self, target: &dyn Location) -> Result<Box<dyn File>> {
        if Self::is_os_file(target) {
            fs::create_dir_all(os_path(target.authority(), &target.path()))
                .await
                .map_err(|e| VfsError::from_io(Op::MoveToLocation, e))?;
        }
        let name = self.name();
        let mut dst = target.new_file(&name, &[])?;
        self.move_to_file(dst.as_mut()).await?;
        Ok(dst)
    }
}
