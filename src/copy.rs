//! Cross-backend copy helpers.
//!
//! Whenever two endpoints cannot use a backend-native server-side copy,
//! bytes are streamed through a buffer here. The helpers also carry the
//! shared preconditions: the source stream must sit at its origin, and
//! both endpoints are closed when the transfer ends, with the write
//! side's error taking precedence.

use std::io::SeekFrom;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::debug;

use crate::backend::File;
use crate::errors::{Result, VfsError};

/// Floor for the buffer used by [`touch_copy_buffered`].
pub const MIN_BUFFER_SIZE: usize = 256 * 1024;

/// Default buffer size for streamed copies.
pub const DEFAULT_BUFFER_SIZE: usize = MIN_BUFFER_SIZE;

static MOVE_STAMP: AtomicU64 = AtomicU64::new(0);

/// Fail with [`VfsError::CopyToNotPossible`] unless the source stream
/// is at position zero.
pub async fn validate_copy_seek_position(src: &mut dyn File) -> Result<()> {
    let pos = src.seek(SeekFrom::Current(0)).await?;
    if pos != 0 {
        return Err(VfsError::CopyToNotPossible);
    }
    Ok(())
}

/// Stream `src` into `dst` through a buffer of at least
/// [`MIN_BUFFER_SIZE`] bytes.
///
/// An empty source still creates the destination, the way `touch`
/// would.
pub async fn touch_copy_buffered(
    dst: &mut dyn File,
    src: &mut dyn File,
    buffer_size: usize,
) -> Result<()> {
    let mut buf = vec![0u8; buffer_size.max(MIN_BUFFER_SIZE)];
    let mut total: u64 = 0;
    loop {
        let n = src.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        dst.write(&buf[..n]).await?;
        total += n as u64;
    }
    if total == 0 {
        // an empty write still marks the destination for creation
        dst.write(&[]).await?;
    }
    debug!(bytes = total, dst = %dst.path(), "buffered copy complete");
    Ok(())
}

/// Full streamed copy between two files of any backends: seek-position
/// guard, buffered transfer, then close both ends. The first error wins
/// and the write side outranks the read side.
pub async fn copy_file_buffered(
    src: &mut dyn File,
    dst: &mut dyn File,
    buffer_size: usize,
) -> Result<()> {
    validate_copy_seek_position(src).await?;
    let copied = touch_copy_buffered(dst, src, buffer_size).await;
    let write_close = dst.close().await;
    let read_close = src.close().await;
    copied?;
    write_close?;
    read_close
}

/// Read the remainder of a file into memory.
pub async fn read_all(f: &mut dyn File) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = f.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        out.extend_from_slice(&buf[..n]);
    }
    Ok(out)
}

/// Refresh a file's last-modified by moving it away and back again.
///
/// Used where the backend has no way to stamp last-modified directly;
/// both hops stay on the file's own backend, so a native server-side
/// rename is used when one is available.
pub async fn update_last_modified_by_moving(f: &mut dyn File) -> Result<()> {
    let stamp = MOVE_STAMP.fetch_add(1, Ordering::Relaxed);
    let staged_name = format!("{}.mtime.{}.{}", f.name(), std::process::id(), stamp);
    let loc = f.location();
    let mut staged = loc.new_file(&staged_name, &[])?;
    f.move_to_file(staged.as_mut()).await?;
    staged.move_to_file(f).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::memory::MemoryFileSystem;
    use crate::backend::FileSystem;

    #[tokio::test]
    async fn buffered_copy_round_trips_bytes() {
        let fs = MemoryFileSystem::new();
        let mut src = fs.new_file("", "/src.txt", &[]).unwrap();
        src.write(b"payload").await.unwrap();
        src.close().await.unwrap();

        let mut dst = fs.new_file("", "/dst.txt", &[]).unwrap();
        copy_file_buffered(src.as_mut(), dst.as_mut(), 0).await.unwrap();

        let mut reopened = fs.new_file("", "/dst.txt", &[]).unwrap();
        assert_eq!(read_all(reopened.as_mut()).await.unwrap(), b"payload");
        // the source survives a copy
        assert!(src.exists().await.unwrap());
    }

    #[tokio::test]
    async fn empty_source_still_creates_destination() {
        let fs = MemoryFileSystem::new();
        let mut src = fs.new_file("", "/empty.txt", &[]).unwrap();
        src.write(&[]).await.unwrap();
        src.close().await.unwrap();

        let mut dst = fs.new_file("", "/created.txt", &[]).unwrap();
        copy_file_buffered(src.as_mut(), dst.as_mut(), 0).await.unwrap();
        assert!(dst.exists().await.unwrap());
        assert_eq!(dst.size().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn nonzero_position_refuses_copy() {
        let fs = MemoryFileSystem::new();
        let mut src = fs.new_file("", "/guarded.txt", &[]).unwrap();
        src.write(b"0123456789").await.unwrap();
        src.close().await.unwrap();
        src.seek(SeekFrom::Start(5)).await.unwrap();

        let mut dst = fs.new_file("", "/target.txt", &[]).unwrap();
        let err = copy_file_buffered(src.as_mut(), dst.as_mut(), 0)
            .await
            .unwrap_err();
        assert!(matches!(err, VfsError::CopyToNotPossible));
        assert!(!dst.exists().await.unwrap());
    }

    #[tokio::test]
    async fn mtime_refresh_preserves_contents() {
        let fs = MemoryFileSystem::new();
        let mut f = fs.new_file("", "/stamped.txt", &[]).unwrap();
        f.write(b"stable").await.unwrap();
        f.close().await.unwrap();

        update_last_modified_by_moving(f.as_mut()).await.unwrap();
        assert_eq!(read_all(f.as_mut()).await.unwrap(), b"stable");
    }
}
