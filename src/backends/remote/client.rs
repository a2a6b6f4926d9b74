//! The contract between the remote file machinery and a concrete
//! object-store driver, plus the opendal plumbing shared by every
//! driver in this crate.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use opendal::layers::RetryLayer;
use opendal::{Metadata, Operator};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::debug;

use crate::authority::Authority;
use crate::errors::{Op, Result, VfsError};
use crate::options::RetryConfig;
use crate::paths;

/// Size and metadata of one remote object.
#[derive(Debug, Clone, Default)]
pub struct ObjectProperties {
    pub size: u64,
    pub last_modified: Option<DateTime<Utc>>,
    pub content_type: Option<String>,
    pub metadata: HashMap<String, String>,
}

/// The minimum a remote driver must supply.
///
/// Paths are the crate's absolute POSIX paths; each driver maps them
/// onto its own key space. `NotExist` must be reported as
/// [`VfsError::NotExist`] so the state machine above can branch on it.
#[async_trait]
pub trait RemoteClient: Send + Sync + std::fmt::Debug + 'static {
    fn scheme(&self) -> &'static str;

    fn fs_name(&self) -> &'static str;

    /// Credential fingerprint; see
    /// [`FileSystem::auth_identity`](crate::backend::FileSystem::auth_identity).
    fn auth_identity(&self) -> String;

    /// Stat one object. `tag` labels errors with the public operation
    /// that asked.
    async fn properties(
        &self,
        authority: &Authority,
        path: &str,
        tag: Op,
    ) -> Result<ObjectProperties>;

    /// Fetch the whole object into the spool file.
    async fn download(
        &self,
        authority: &Authority,
        path: &str,
        spool: &mut tokio::fs::File,
    ) -> Result<()>;

    /// Store the spool file, which is positioned at its start, as the
    /// object's new content.
    async fn upload(
        &self,
        authority: &Authority,
        path: &str,
        spool: &mut tokio::fs::File,
        content_type: Option<&str>,
    ) -> Result<()>;

    /// Server-side copy within the same authority.
    async fn copy(&self, authority: &Authority, from: &str, to: &str) -> Result<()>;

    async fn delete(&self, authority: &Authority, path: &str) -> Result<()>;

    /// Remove every non-current version. A no-op on unversioned
    /// stores.
    async fn delete_all_versions(&self, authority: &Authority, path: &str) -> Result<()>;

    /// Re-set an object's metadata to refresh its last-modified stamp.
    /// Drivers that cannot do this return [`VfsError::Unsupported`]
    /// and the caller falls back to a move-based refresh.
    async fn set_metadata(
        &self,
        authority: &Authority,
        path: &str,
        props: &ObjectProperties,
    ) -> Result<()>;

    /// Full paths of the files directly under a location path.
    async fn list(&self, authority: &Authority, location_path: &str) -> Result<Vec<String>>;

    /// Whether the location is reachable. Object stores have no real
    /// directories, so this answers for the authority.
    async fn location_exists(&self, authority: &Authority, path: &str) -> Result<bool>;
}

/// What a concrete opendal-backed driver supplies: operator
/// construction and identity. Everything else comes from the blanket
/// [`RemoteClient`] implementation below.
#[async_trait]
pub trait Provider: Send + Sync + std::fmt::Debug + 'static {
    fn scheme(&self) -> &'static str;

    fn fs_name(&self) -> &'static str;

    fn auth_identity(&self) -> String;

    /// Build (or fetch from cache) the operator for one authority.
    fn operator(&self, authority: &Authority) -> Result<Operator>;

    /// Download strategy; drivers override this for parallel fetches.
    async fn fetch(&self, op: &Operator, path: &str, spool: &mut tokio::fs::File) -> Result<()> {
        download_object(op, path, spool).await
    }
}

#[async_trait]
impl<T: Provider> RemoteClient for T {
    fn scheme(&self) -> &'static str {
        Provider::scheme(self)
    }

    fn fs_name(&self) -> &'static str {
        Provider::fs_name(self)
    }

    fn auth_identity(&self) -> String {
        Provider::auth_identity(self)
    }

    async fn properties(
        &self,
        authority: &Authority,
        path: &str,
        tag: Op,
    ) -> Result<ObjectProperties> {
        let op = self.operator(authority)?;
        let meta = op
            .stat(object_key(path))
            .await
            .map_err(|e| VfsError::from_opendal(tag, e))?;
        Ok(props_from_metadata(&meta))
    }

    async fn download(
        &self,
        authority: &Authority,
        path: &str,
        spool: &mut tokio::fs::File,
    ) -> Result<()> {
        let op = self.operator(authority)?;
        debug!(scheme = Provider::scheme(self), authority = %authority, path, "download");
        self.fetch(&op, path, spool).await
    }

    async fn upload(
        &self,
        authority: &Authority,
        path: &str,
        spool: &mut tokio::fs::File,
        content_type: Option<&str>,
    ) -> Result<()> {
        let op = self.operator(authority)?;
        debug!(scheme = Provider::scheme(self), authority = %authority, path, "upload");
        upload_object(&op, path, spool, content_type).await
    }

    async fn copy(&self, authority: &Authority, from: &str, to: &str) -> Result<()> {
        let op = self.operator(authority)?;
        debug!(scheme = Provider::scheme(self), authority = %authority, from, to, "server-side copy");
        copy_object(&op, from, to).await
    }

    async fn delete(&self, authority: &Authority, path: &str) -> Result<()> {
        let op = self.operator(authority)?;
        delete_object(&op, path).await
    }

    async fn delete_all_versions(&self, authority: &Authority, path: &str) -> Result<()> {
        let op = self.operator(authority)?;
        delete_object_versions(&op, path).await
    }

    async fn set_metadata(
        &self,
        authority: &Authority,
        path: &str,
        _props: &ObjectProperties,
    ) -> Result<()> {
        let op = self.operator(authority)?;
        refresh_metadata(&op, path).await
    }

    async fn list(&self, authority: &Authority, location_path: &str) -> Result<Vec<String>> {
        let op = self.operator(authority)?;
        list_location(&op, location_path).await
    }

    async fn location_exists(&self, authority: &Authority, _path: &str) -> Result<bool> {
        let op = self.operator(authority)?;
        match op.check().await {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == opendal::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(VfsError::from_opendal(Op::Exists, err)),
        }
    }
}

static INJECTED_IDS: AtomicU64 = AtomicU64::new(0);

/// Driver over a single pre-built operator, used when the caller
/// injects its own client instead of credentials (the scheme modules'
/// `with_client` constructors).
///
/// The operator serves every authority it is asked for, so the caller
/// pins it to the right bucket or host up front. Each injection gets
/// its own credential fingerprint: two separately injected clients are
/// never treated as same-credential for native copies, while files
/// sharing one injected filesystem still are.
#[derive(Debug)]
pub struct OperatorClient {
    scheme: &'static str,
    name: &'static str,
    op: Operator,
    id: u64,
}

impl OperatorClient {
    pub fn new(scheme: &'static str, name: &'static str, op: Operator) -> Self {
        OperatorClient {
            scheme,
            name,
            op,
            id: INJECTED_IDS.fetch_add(1, Ordering::Relaxed),
        }
    }
}

#[async_trait]
impl Provider for OperatorClient {
    fn scheme(&self) -> &'static str {
        self.scheme
    }

    fn fs_name(&self) -> &'static str {
        self.name
    }

    fn auth_identity(&self) -> String {
        format!("{}:injected:{}", self.scheme, self.id)
    }

    fn operator(&self, _authority: &Authority) -> Result<Operator> {
        Ok(self.op.clone())
    }
}

/// Per-authority operator cache with optional idle eviction.
///
/// Transports such as SFTP hold a live session inside the operator;
/// evicting an idle entry drops that session, and the next use
/// reconnects.
#[derive(Debug, Default)]
pub struct OperatorCache {
    idle_timeout: Option<Duration>,
    inner: Mutex<HashMap<String, (Operator, Instant)>>,
}

impl OperatorCache {
    pub fn new() -> Self {
        OperatorCache::default()
    }

    pub fn with_idle_timeout(idle_timeout: Duration) -> Self {
        OperatorCache {
            idle_timeout: Some(idle_timeout),
            inner: Mutex::new(HashMap::new()),
        }
    }

    pub fn get_or_build<F>(&self, authority: &Authority, build: F) -> Result<Operator>
    where
        F: FnOnce(&Authority) -> Result<Operator>,
    {
        let key = authority.as_str().to_string();
        let mut map = self.inner.lock().expect("operator cache poisoned");
        if let Some((op, last_used)) = map.get_mut(&key) {
            let stale = self
                .idle_timeout
                .is_some_and(|idle| last_used.elapsed() > idle);
            if !stale {
                *last_used = Instant::now();
                return Ok(op.clone());
            }
            map.remove(&key);
        }
        let op = build(authority)?;
        map.insert(key, (op.clone(), Instant::now()));
        Ok(op)
    }
}

/// Attach the retry layer matching a [`RetryConfig`]. Missing objects
/// are terminal and never retried by the layer.
pub(crate) fn with_retry(op: Operator, retry: &RetryConfig) -> Operator {
    op.layer(
        RetryLayer::new()
            .with_max_times(retry.max_retries)
            .with_min_delay(retry.initial_backoff)
            .with_max_delay(retry.max_backoff),
    )
}

/// Strip the leading slash: opendal keys are relative to the bucket
/// root.
pub(crate) fn object_key(path: &str) -> &str {
    paths::remove_leading_slash(path)
}

fn location_key(path: &str) -> String {
    let key = paths::remove_leading_slash(path);
    if key.is_empty() {
        String::new()
    } else {
        paths::ensure_trailing_slash(key)
    }
}

pub(crate) fn props_from_metadata(meta: &Metadata) -> ObjectProperties {
    ObjectProperties {
        size: meta.content_length(),
        last_modified: meta
            .last_modified()
            .map(|ts| chrono::DateTime::<chrono::Utc>::from(std::time::SystemTime::from(ts))),
        content_type: meta.content_type().map(str::to_string),
        metadata: meta.user_metadata().cloned().unwrap_or_default(),
    }
}

pub(crate) async fn download_object(
    op: &Operator,
    path: &str,
    spool: &mut tokio::fs::File,
) -> Result<()> {
    let data = op
        .read(object_key(path))
        .await
        .map_err(|e| VfsError::from_opendal(Op::Download, e))?;
    spool
        .write_all(&data.to_vec())
        .await
        .map_err(|e| VfsError::from_io(Op::Download, e))?;
    spool
        .flush()
        .await
        .map_err(|e| VfsError::from_io(Op::Download, e))
}

pub(crate) async fn upload_object(
    op: &Operator,
    path: &str,
    spool: &mut tokio::fs::File,
    content_type: Option<&str>,
) -> Result<()> {
    let mut data = Vec::new();
    spool
        .read_to_end(&mut data)
        .await
        .map_err(|e| VfsError::from_io(Op::Upload, e))?;
    let mut write = op.write_with(object_key(path), data);
    if let Some(ct) = content_type {
        write = write.content_type(ct);
    }
    write
        .await
        .map_err(|e| VfsError::from_opendal(Op::Upload, e))?;
    Ok(())
}

pub(crate) async fn copy_object(op: &Operator, from: &str, to: &str) -> Result<()> {
    if op.info().full_capability().copy {
        return op
            .copy(object_key(from), object_key(to))
            .await
            .map_err(|e| VfsError::from_opendal(Op::CopyToFile, e));
    }
    // no server-side copy on this service; relay the bytes
    let data = op
        .read(object_key(from))
        .await
        .map_err(|e| VfsError::from_opendal(Op::CopyToFile, e))?;
    op.write(object_key(to), data.to_vec())
        .await
        .map_err(|e| VfsError::from_opendal(Op::CopyToFile, e))?;
    Ok(())
}

pub(crate) async fn delete_object(op: &Operator, path: &str) -> Result<()> {
    let key = object_key(path);
    // opendal's delete is idempotent; stat first so deleting an absent
    // object reports NotExist
    op.stat(key)
        .await
        .map_err(|e| VfsError::from_opendal(Op::Delete, e))?;
    op.delete(key)
        .await
        .map_err(|e| VfsError::from_opendal(Op::Delete, e))
}

pub(crate) async fn delete_object_versions(op: &Operator, path: &str) -> Result<()> {
    let cap = op.info().full_capability();
    if !cap.list_with_versions || !cap.delete_with_version {
        return Ok(());
    }
    let key = object_key(path);
    let entries = op
        .list_with(key)
        .versions(true)
        .await
        .map_err(|e| VfsError::from_opendal(Op::Delete, e))?;
    for entry in entries {
        if entry.path() != key {
            continue;
        }
        if let Some(version) = entry.metadata().version() {
            op.delete_with(key)
                .version(version)
                .await
                .map_err(|e| VfsError::from_opendal(Op::Delete, e))?;
        }
    }
    Ok(())
}

/// Refresh last-modified by hopping the object through a staging key
/// with server-side copies. Services without copy support report
/// `Unsupported`, and the file layer falls back to a move-based
/// refresh.
pub(crate) async fn refresh_metadata(op: &Operator, path: &str) -> Result<()> {
    let key = object_key(path);
    if !op.info().full_capability().copy {
        return Err(VfsError::Unsupported { op: Op::Touch });
    }
    let staged = format!("{}.mtime.{}", key, std::process::id());
    op.copy(key, &staged)
        .await
        .map_err(|e| VfsError::from_opendal(Op::Touch, e))?;
    let restored = op.copy(&staged, key).await;
    let cleanup = op.delete(&staged).await;
    restored.map_err(|e| VfsError::from_opendal(Op::Touch, e))?;
    cleanup.map_err(|e| VfsError::from_opendal(Op::Touch, e))?;
    Ok(())
}

pub(crate) async fn list_location(op: &Operator, location_path: &str) -> Result<Vec<String>> {
    let key = location_key(location_path);
    let entries = match op.list(&key).await {
        Ok(entries) => entries,
        Err(err) if err.kind() == opendal::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(VfsError::from_opendal(Op::List, err)),
    };
    Ok(entries
        .into_iter()
        .filter(|entry| !entry.metadata().mode().is_dir())
        .map(|entry| paths::ensure_leading_slash(entry.path()))
        .collect())
}
