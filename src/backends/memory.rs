//! In-memory backend.
//!
//! The reference implementation of the contract: a map of authority →
//! path → object, fully synchronous under the hood. Each `File` value
//! reads through a private snapshot of the record's bytes and writes
//! into the record's shared write buffer; `close` commits the buffer
//! atomically.

use std::collections::{BTreeMap, HashMap};
use std::io::SeekFrom;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use crate::authority::Authority;
use crate::backend::{File, FileSystem, Location};
use crate::copy::{copy_file_buffered, validate_copy_seek_position, DEFAULT_BUFFER_SIZE};
use crate::errors::{Result, VfsError};
use crate::options::{self, DeleteOption, FileOption, LocationOption};
use crate::paths;

#[derive(Debug)]
struct MemRecord {
    contents: Vec<u8>,
    write_buf: Vec<u8>,
    last_modified: DateTime<Utc>,
    content_type: Option<String>,
    committed: bool,
    // filesystem-wide commit stamp; snapshots resync when it moves
    version: u64,
}

impl MemRecord {
    fn new() -> Self {
        MemRecord {
            contents: Vec::new(),
            write_buf: Vec::new(),
            last_modified: Utc::now(),
            content_type: None,
            committed: false,
            version: 0,
        }
    }
}

type SharedRecord = Arc<Mutex<MemRecord>>;

#[derive(Debug)]
enum MemEntry {
    File(SharedRecord),
    Dir,
}

#[derive(Debug, Default)]
struct MemInner {
    // structural mutex: creations and deletions
    volumes: Mutex<HashMap<String, BTreeMap<String, MemEntry>>>,
    clock: AtomicU64,
}

/// Filesystem of byte slices held in process memory.
///
/// All locations and files created from one instance share its state;
/// separate instances are fully isolated stores.
#[derive(Debug, Clone, Default)]
pub struct MemoryFileSystem {
    inner: Arc<MemInner>,
}

impl MemoryFileSystem {
    pub fn new() -> Self {
        Self::default()
    }

    fn stamp(&self) -> u64 {
        self.inner.clock.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn record(&self, authority: &str, path: &str) -> Option<SharedRecord> {
        let volumes = self.inner.volumes.lock().expect("memory state poisoned");
        match volumes.get(authority)?.get(path)? {
            MemEntry::File(rec) => Some(rec.clone()),
            MemEntry::Dir => None,
        }
    }

    fn committed_record(&self, authority: &str, path: &str) -> Result<SharedRecord> {
        let rec = self.record(authority, path).ok_or(VfsError::NotExist)?;
        if !rec.lock().expect("record poisoned").committed {
            return Err(VfsError::NotExist);
        }
        Ok(rec)
    }

    fn record_for_write(&self, authority: &str, path: &str) -> SharedRecord {
        let mut volumes = self.inner.volumes.lock().expect("memory state poisoned");
        let volume = volumes.entry(authority.to_string()).or_default();
        match volume.get(path) {
            Some(MemEntry::File(rec)) => rec.clone(),
            _ => {
                let rec: SharedRecord = Arc::new(Mutex::new(MemRecord::new()));
                volume.insert(path.to_string(), MemEntry::File(rec.clone()));
                rec
            }
        }
    }

    /// Commit a record's write buffer into its canonical bytes and make
    /// sure the record and its parent markers are present in the map.
    fn commit(&self, authority: &str, path: &str, rec: &SharedRecord, content_type: Option<&str>) {
        {
            let mut volumes = self.inner.volumes.lock().expect("memory state poisoned");
            let volume = volumes.entry(authority.to_string()).or_default();
            volume.insert(path.to_string(), MemEntry::File(rec.clone()));
            let mut dir = paths::parent_dir(path);
            while dir != "/" {
                volume.entry(dir.clone()).or_insert(MemEntry::Dir);
                dir = paths::parent_dir(&dir);
            }
        }

        let mut r = rec.lock().expect("record poisoned");
        if r.committed && r.write_buf.is_empty() {
            return;
        }
        let pending = std::mem::take(&mut r.write_buf);
        r.contents.extend_from_slice(&pending);
        r.committed = true;
        r.last_modified = Utc::now();
        r.version = self.stamp();
        if r.content_type.is_none() {
            r.content_type = content_type.map(str::to_string);
        }
    }

    /// Replace the canonical bytes of a record in place. Used by the
    /// same-backend copy fast path.
    fn set_contents(
        &self,
        authority: &str,
        path: &str,
        bytes: Vec<u8>,
        content_type: Option<&str>,
    ) {
        let rec = self.record_for_write(authority, path);
        {
            let mut r = rec.lock().expect("record poisoned");
            r.contents = bytes;
            r.committed = true;
            r.last_modified = Utc::now();
            r.version = self.stamp();
            if r.content_type.is_none() {
                r.content_type = content_type.map(str::to_string);
            }
        }
        // re-run the marker bookkeeping for fresh parents
        self.commit(authority, path, &rec, content_type);
    }

    fn remove(&self, authority: &str, path: &str) -> Result<()> {
        let mut volumes = self.inner.volumes.lock().expect("memory state poisoned");
        let volume = volumes.get_mut(authority).ok_or(VfsError::NotExist)?;
        match volume.remove(path) {
            Some(MemEntry::File(rec)) => {
                rec.lock().expect("record poisoned").committed = false;
                Ok(())
            }
            Some(MemEntry::Dir) => {
                volume.insert(path.to_string(), MemEntry::Dir);
                Err(VfsError::NotExist)
            }
            None => Err(VfsError::NotExist),
        }
    }

    fn identity(&self) -> String {
        format!("mem:{:p}", Arc::as_ptr(&self.inner))
    }
}

impl FileSystem for MemoryFileSystem {
    fn scheme(&self) -> &'static str {
        "mem"
    }

    fn name(&self) -> &'static str {
        "In-Memory Filesystem"
    }

    fn auth_identity(&self) -> String {
        self.identity()
    }

    fn new_file(
        &self,
        authority: &str,
        abs_path: &str,
        opts: &[FileOption],
    ) -> Result<Box<dyn File>> {
        paths::validate_absolute_file_path(abs_path)?;
        Ok(Box::new(MemoryFile {
            fs: self.clone(),
            authority: Authority::parse(authority)?,
            path: paths::clean(abs_path),
            content_type: options::content_type(opts),
            cancel: options::file_cancel_token(opts),
            pending: None,
            snapshot: Vec::new(),
            snapshot_version: 0,
            cursor: 0,
        }))
    }

    fn new_location(&self, authority: &str, abs_path: &str) -> Result<Box<dyn Location>> {
        paths::validate_absolute_location_path(abs_path)?;
        Ok(Box::new(MemoryLocation {
            fs: self.clone(),
            authority: Authority::parse(authority)?,
            path: paths::clean(abs_path),
            cancel: None,
        }))
    }
}

/// A location inside a [`MemoryFileSystem`] volume.
#[derive(Debug)]
pub struct MemoryLocation {
    fs: MemoryFileSystem,
    authority: Authority,
    path: String,
    cancel: Option<CancellationToken>,
}

impl MemoryLocation {
    /// Apply location options; files created here inherit the
    /// cancellation token.
    pub fn with_options(mut self, opts: &[LocationOption]) -> Self {
        if let Some(token) = options::location_cancel_token(opts) {
            self.cancel = Some(token);
        }
        self
    }
}

#[async_trait]
impl Location for MemoryLocation {
    fn filesystem(&self) -> Arc<dyn FileSystem> {
        Arc::new(self.fs.clone())
    }

    fn authority(&self) -> &Authority {
        &self.authority
    }

    fn path(&self) -> String {
        self.path.clone()
    }

    async fn exists(&self) -> Result<bool> {
        if self.path == "/" {
            return Ok(true);
        }
        let volumes = self.fs.inner.volumes.lock().expect("memory state poisoned");
        let Some(volume) = volumes.get(self.authority.as_str()) else {
            return Ok(false);
        };
        if matches!(volume.get(&self.path), Some(MemEntry::Dir)) {
            return Ok(true);
        }
        Ok(volume.iter().any(|(path, entry)| match entry {
            MemEntry::File(rec) => {
                path.starts_with(&self.path)
                    && rec.lock().expect("record poisoned").committed
            }
            MemEntry::Dir => false,
        }))
    }

    async fn list(&self) -> Result<Vec<String>> {
        let volumes = self.fs.inner.volumes.lock().expect("memory state poisoned");
        let Some(volume) = volumes.get(self.authority.as_str()) else {
            return Ok(Vec::new());
        };
        Ok(volume
            .iter()
            .filter_map(|(path, entry)| match entry {
                MemEntry::File(rec)
                    if paths::parent_dir(path) == self.path
                        && rec.lock().expect("record poisoned").committed =>
                {
                    Some(paths::basename(path).to_string())
                }
                _ => None,
            })
            .collect())
    }

    fn new_location(&self, rel_path: &str) -> Result<Box<dyn Location>> {
        paths::validate_relative_location_path(rel_path)?;
        Ok(Box::new(MemoryLocation {
            fs: self.fs.clone(),
            authority: self.authority.clone(),
            path: paths::ensure_trailing_slash(&paths::join(&self.path, rel_path)),
            cancel: self.cancel.clone(),
        }))
    }

    fn new_file(&self, rel_path: &str, opts: &[FileOption]) -> Result<Box<dyn File>> {
        paths::validate_relative_file_path(rel_path)?;
        Ok(Box::new(MemoryFile {
            fs: self.fs.clone(),
            authority: self.authority.clone(),
            path: paths::join(&self.path, rel_path),
            content_type: options::content_type(opts),
            cancel: options::file_cancel_token(opts).or_else(|| self.cancel.clone()),
            pending: None,
            snapshot: Vec::new(),
            snapshot_version: 0,
            cursor: 0,
        }))
    }
}

/// A byte-slice file inside a [`MemoryFileSystem`].
#[derive(Debug)]
pub struct MemoryFile {
    fs: MemoryFileSystem,
    authority: Authority,
    path: String,
    content_type: Option<String>,
    cancel: Option<CancellationToken>,
    // record this handle has written to and not yet committed
    pending: Option<SharedRecord>,
    snapshot: Vec<u8>,
    snapshot_version: u64,
    cursor: u64,
}

impl MemoryFile {
    fn check_cancel(&self) -> Result<()> {
        match &self.cancel {
            Some(token) if token.is_cancelled() => Err(VfsError::Cancelled),
            _ => Ok(()),
        }
    }

    fn sync_snapshot(&mut self) -> Result<()> {
        let rec = self
            .fs
            .committed_record(self.authority.as_str(), &self.path)?;
        let r = rec.lock().expect("record poisoned");
        if r.version != self.snapshot_version {
            self.snapshot = r.contents.clone();
            self.snapshot_version = r.version;
            self.cursor = 0;
        }
        Ok(())
    }
}

#[async_trait]
impl File for MemoryFile {
    fn location(&self) -> Box<dyn Location> {
        Box::new(MemoryLocation {
            fs: self.fs.clone(),
            authority: self.authority.clone(),
            path: paths::parent_dir(&self.path),
            cancel: self.cancel.clone(),
        })
    }

    fn path(&self) -> String {
        self.path.clone()
    }

    async fn exists(&self) -> Result<bool> {
        Ok(self
            .fs
            .committed_record(self.authority.as_str(), &self.path)
            .is_ok())
    }

    async fn size(&self) -> Result<u64> {
        let rec = self
            .fs
            .committed_record(self.authority.as_str(), &self.path)?;
        let len = rec.lock().expect("record poisoned").contents.len();
        Ok(len as u64)
    }

    async fn last_modified(&self) -> Result<Option<DateTime<Utc>>> {
        let rec = self
            .fs
            .committed_record(self.authority.as_str(), &self.path)?;
        let at = rec.lock().expect("record poisoned").last_modified;
        Ok(Some(at))
    }

    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.check_cancel()?;
        self.sync_snapshot()?;
        let len = self.snapshot.len() as u64;
        if self.cursor > len {
            // past-EOF seeks clamp here, on the next read
            self.cursor = len;
        }
        let start = self.cursor as usize;
        let n = buf.len().min(self.snapshot.len() - start);
        buf[..n].copy_from_slice(&self.snapshot[start..start + n]);
        self.cursor += n as u64;
        Ok(n)
    }

    async fn write(&mut self, buf: &[u8]) -> Result<usize> {
        self.check_cancel()?;
        let rec = self
            .fs
            .record_for_write(self.authority.as_str(), &self.path);
        rec.lock()
            .expect("record poisoned")
            .write_buf
            .extend_from_slice(buf);
        self.pending = Some(rec);
        Ok(buf.len())
    }

    async fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        self.check_cancel()?;
        let rec = self
            .fs
            .committed_record(self.authority.as_str(), &self.path)?;
        let len = rec.lock().expect("record poisoned").contents.len() as i128;
        let target: i128 = match pos {
            SeekFrom::Start(off) => off as i128,
            SeekFrom::Current(off) => self.cursor as i128 + off as i128,
            SeekFrom::End(off) => len + off as i128,
        };
        if target < 0 || target > u64::MAX as i128 {
            return Err(VfsError::SeekInvalidOffset);
        }
        // moving past the end is allowed; reads clamp later
        self.cursor = target as u64;
        Ok(self.cursor)
    }

    async fn close(&mut self) -> Result<()> {
        self.check_cancel()?;
        if let Some(rec) = self.pending.take() {
            self.fs.commit(
                self.authority.as_str(),
                &self.path,
                &rec,
                self.content_type.as_deref(),
            );
        }
        Ok(())
    }

    async fn touch(&mut self) -> Result<()> {
        self.check_cancel()?;
        match self
            .fs
            .committed_record(self.authority.as_str(), &self.path)
        {
            Ok(rec) => {
                rec.lock().expect("record poisoned").last_modified = Utc::now();
                Ok(())
            }
            Err(VfsError::NotExist) => {
                let rec = self
                    .fs
                    .record_for_write(self.authority.as_str(), &self.path);
                self.fs.commit(
                    self.authority.as_str(),
                    &self.path,
                    &rec,
                    self.content_type.as_deref(),
                );
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    async fn delete(&mut self, _opts: &[DeleteOption]) -> Result<()> {
        self.check_cancel()?;
        self.pending = None;
        self.fs.remove(self.authority.as_str(), &self.path)
    }

    async fn copy_to_file(&mut self, target: &mut dyn File) -> Result<()> {
        self.check_cancel()?;
        let target_loc = target.location();
        let target_fs = target_loc.filesystem();
        if target_fs.scheme() == "mem" && target_fs.auth_identity() == self.fs.identity() {
            validate_copy_seek_position(self).await?;
            let rec = self
                .fs
                .committed_record(self.authority.as_str(), &self.path)?;
            let (bytes, content_type) = {
                let r = rec.lock().expect("record poisoned");
                (r.contents.clone(), r.content_type.clone())
            };
            self.fs.set_contents(
                target_loc.authority().as_str(),
                &target.path(),
                bytes,
                content_type.as_deref(),
            );
            target.close().await
        } else {
            copy_file_buffered(self, target, DEFAULT_BUFFER_SIZE).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::copy::read_all;

    fn fs() -> MemoryFileSystem {
        MemoryFileSystem::new()
    }

    #[tokio::test]
    async fn write_close_read_round_trip() {
        let fs = fs();
        let mut f = fs.new_file("", "/a.txt", &[]).unwrap();
        assert!(!f.exists().await.unwrap());

        f.write(b"X").await.unwrap();
        // not visible until close commits the buffer
        assert!(!f.exists().await.unwrap());
        f.close().await.unwrap();

        assert!(f.exists().await.unwrap());
        assert_eq!(f.size().await.unwrap(), 1);

        let mut g = fs.new_file("", "/a.txt", &[]).unwrap();
        assert_eq!(read_all(g.as_mut()).await.unwrap(), b"X");
    }

    #[tokio::test]
    async fn delete_makes_reads_fail() {
        let fs = fs();
        let mut f = fs.new_file("", "/gone.txt", &[]).unwrap();
        f.write(b"bye").await.unwrap();
        f.close().await.unwrap();

        f.delete(&[]).await.unwrap();
        assert!(!f.exists().await.unwrap());
        let mut buf = [0u8; 4];
        assert!(matches!(
            f.read(&mut buf).await.unwrap_err(),
            VfsError::NotExist
        ));
        // deleting twice reports the absence
        assert!(matches!(
            f.delete(&[]).await.unwrap_err(),
            VfsError::NotExist
        ));
    }

    #[tokio::test]
    async fn deleted_file_can_be_rewritten() {
        let fs = fs();
        let mut f = fs.new_file("", "/again.txt", &[]).unwrap();
        f.write(b"one").await.unwrap();
        f.close().await.unwrap();
        f.delete(&[]).await.unwrap();

        f.write(b"two").await.unwrap();
        f.close().await.unwrap();
        assert_eq!(read_all(f.as_mut()).await.unwrap(), b"two");
    }

    #[tokio::test]
    async fn seek_past_eof_clamps_on_read() {
        let fs = fs();
        let mut f = fs.new_file("", "/short.txt", &[]).unwrap();
        f.write(b"abc").await.unwrap();
        f.close().await.unwrap();

        assert_eq!(f.seek(SeekFrom::Start(100)).await.unwrap(), 100);
        let mut buf = [0u8; 8];
        assert_eq!(f.read(&mut buf).await.unwrap(), 0);

        assert_eq!(f.seek(SeekFrom::End(0)).await.unwrap(), 3);
        assert_eq!(f.read(&mut buf).await.unwrap(), 0);

        assert!(matches!(
            f.seek(SeekFrom::Current(-10)).await.unwrap_err(),
            VfsError::SeekInvalidOffset
        ));
    }

    #[tokio::test]
    async fn snapshot_resyncs_when_contents_change() {
        let fs = fs();
        let mut writer = fs.new_file("", "/shared.txt", &[]).unwrap();
        writer.write(b"first").await.unwrap();
        writer.close().await.unwrap();

        let mut reader = fs.new_file("", "/shared.txt", &[]).unwrap();
        let mut buf = [0u8; 2];
        assert_eq!(reader.read(&mut buf).await.unwrap(), 2);

        writer.write(b"-more").await.unwrap();
        writer.close().await.unwrap();

        // underlying bytes changed: snapshot refreshes and cursor resets
        assert_eq!(read_all(reader.as_mut()).await.unwrap(), b"first-more");
    }

    #[tokio::test]
    async fn listing_is_scoped_to_the_location() {
        let fs = fs();
        for path in ["/a/one.txt", "/a/two.txt", "/a/sub/three.txt", "/four.txt"] {
            let mut f = fs.new_file("vol", path, &[]).unwrap();
            f.write(b"x").await.unwrap();
            f.close().await.unwrap();
        }

        let loc = fs.new_location("vol", "/a/").unwrap();
        let mut names = loc.list().await.unwrap();
        names.sort();
        assert_eq!(names, vec!["one.txt".to_string(), "two.txt".to_string()]);

        assert_eq!(
            loc.list_by_prefix("on").await.unwrap(),
            vec!["one.txt".to_string()]
        );
        assert_eq!(
            loc.list_by_prefix("sub/th").await.unwrap(),
            vec!["three.txt".to_string()]
        );

        let re = regex::Regex::new(r"^two").unwrap();
        assert_eq!(loc.list_by_regex(&re).await.unwrap(), vec!["two.txt"]);

        // absent locations list empty without error
        let missing = fs.new_location("vol", "/nope/").unwrap();
        assert!(missing.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn native_copy_replaces_target_in_place() {
        let fs = fs();
        let mut src = fs.new_file("", "/src.txt", &[]).unwrap();
        src.write(b"payload").await.unwrap();
        src.close().await.unwrap();

        let mut dst = fs.new_file("", "/b/dst.txt", &[]).unwrap();
        src.copy_to_file(dst.as_mut()).await.unwrap();

        assert_eq!(read_all(dst.as_mut()).await.unwrap(), b"payload");
        assert!(src.exists().await.unwrap());

        // separate instances do not share state, so the fallback runs
        let other = MemoryFileSystem::new();
        let mut far = other.new_file("", "/far.txt", &[]).unwrap();
        src.seek(SeekFrom::Start(0)).await.unwrap();
        src.copy_to_file(far.as_mut()).await.unwrap();
        let mut reopened = other.new_file("", "/far.txt", &[]).unwrap();
        assert_eq!(read_all(reopened.as_mut()).await.unwrap(), b"payload");
    }

    #[tokio::test]
    async fn move_to_location_relocates_the_bytes() {
        let fs = fs();
        let mut f = fs.new_file("", "/a.txt", &[]).unwrap();
        f.write(b"X").await.unwrap();
        f.close().await.unwrap();

        let dst = fs.new_location("", "/b/").unwrap();
        let mut moved = f.move_to_location(dst.as_ref()).await.unwrap();
        assert!(!f.exists().await.unwrap());
        assert_eq!(moved.path(), "/b/a.txt");
        assert_eq!(read_all(moved.as_mut()).await.unwrap(), b"X");
    }

    #[tokio::test]
    async fn touch_creates_then_bumps() {
        let fs = fs();
        let mut f = fs.new_file("", "/touched.txt", &[]).unwrap();
        f.touch().await.unwrap();
        assert!(f.exists().await.unwrap());
        assert_eq!(f.size().await.unwrap(), 0);

        let first = f.last_modified().await.unwrap().unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        f.touch().await.unwrap();
        let second = f.last_modified().await.unwrap().unwrap();
        assert!(second >= first);
        assert_eq!(f.size().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn cancelled_token_aborts_operations() {
        let fs = fs();
        let token = CancellationToken::new();
        let mut f = fs
            .new_file("", "/c.txt", &[FileOption::Cancel(token.clone())])
            .unwrap();
        f.write(b"x").await.unwrap();
        token.cancel();
        assert!(matches!(
            f.close().await.unwrap_err(),
            VfsError::Cancelled
        ));
    }

    #[tokio::test]
    async fn location_invariants_hold() {
        let fs = fs();
        let f = fs.new_file("vol", "/x/y/z.txt", &[]).unwrap();
        let loc = f.location();
        assert_eq!(loc.path(), "/x/y/");
        assert!(loc.uri().ends_with('/'));
        assert_eq!(f.name(), "z.txt");
        assert_eq!(f.uri(), "mem://vol/x/y/z.txt");

        let sub = loc.new_location("deeper/").unwrap();
        assert_eq!(sub.path(), "/x/y/deeper/");
        assert!(loc.new_location("/abs/").is_err());
        assert!(loc.new_file("trailing/", &[]).is_err());
    }
}
