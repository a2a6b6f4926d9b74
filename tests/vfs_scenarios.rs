// End-to-end scenarios across backends: round trips, cross-backend
// copies and moves, the seek guard, touch semantics and URI dispatch.

use std::io::SeekFrom;

use unifs::backend::{File, FileSystem, Location};
use unifs::backends::memory::MemoryFileSystem;
use unifs::backends::os::OsFileSystem;
use unifs::copy::read_all;
use unifs::{DeleteOption, VfsError};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn os_file(dir: &tempfile::TempDir, name: &str) -> Box<dyn File> {
    let path = format!("{}/{}", dir.path().display(), name);
    OsFileSystem::new().new_file("", &path, &[]).unwrap()
}

#[tokio::test]
async fn os_round_trip() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let mut f = os_file(&dir, "a.txt");

    f.write(b"hello").await.unwrap();
    f.close().await.unwrap();

    assert!(f.exists().await.unwrap());
    assert_eq!(f.size().await.unwrap(), 5);
    assert_eq!(read_all(f.as_mut()).await.unwrap(), b"hello");

    f.delete(&[]).await.unwrap();
    assert!(!f.exists().await.unwrap());
}

#[tokio::test]
async fn cross_backend_copy_keeps_the_source() {
    let dir = tempfile::tempdir().unwrap();
    let mut src = os_file(&dir, "src.txt");
    src.write(b"hi").await.unwrap();
    src.close().await.unwrap();

    let mem = MemoryFileSystem::new();
    let mut dst = mem.new_file("bucket", "/x/y.txt", &[]).unwrap();
    src.copy_to_file(dst.as_mut()).await.unwrap();

    assert!(dst.exists().await.unwrap());
    assert_eq!(dst.size().await.unwrap(), 2);
    assert_eq!(read_all(dst.as_mut()).await.unwrap(), b"hi");
    assert!(src.exists().await.unwrap());
}

#[tokio::test]
async fn cross_backend_move_deletes_the_source() {
    let mem = MemoryFileSystem::new();
    let mut src = mem.new_file("", "/a.txt", &[]).unwrap();
    src.write(b"X").await.unwrap();
    src.close().await.unwrap();

    let dir = tempfile::tempdir().unwrap();
    let dst_loc = OsFileSystem::new()
        .new_location("", &format!("{}/landing/", dir.path().display()))
        .unwrap();
    let mut moved = src.move_to_location(dst_loc.as_ref()).await.unwrap();

    assert!(!src.exists().await.unwrap());
    assert_eq!(moved.name(), "a.txt");
    assert_eq!(read_all(moved.as_mut()).await.unwrap(), b"X");
}

#[tokio::test]
async fn in_memory_move() {
    let mem = MemoryFileSystem::new();
    let mut src = mem.new_file("", "/a.txt", &[]).unwrap();
    src.write(b"X").await.unwrap();
    src.close().await.unwrap();

    let dst_loc = mem.new_location("", "/b/").unwrap();
    let mut moved = src.move_to_location(dst_loc.as_ref()).await.unwrap();

    assert!(!src.exists().await.unwrap());
    assert_eq!(moved.path(), "/b/a.txt");
    assert_eq!(read_all(moved.as_mut()).await.unwrap(), b"X");
}

#[tokio::test]
async fn seek_guard_blocks_cross_backend_copy() {
    let dir = tempfile::tempdir().unwrap();
    let mut src = os_file(&dir, "ten.bin");
    src.write(b"0123456789").await.unwrap();
    src.close().await.unwrap();
    src.seek(SeekFrom::Start(5)).await.unwrap();

    let mem = MemoryFileSystem::new();
    let mut dst = mem.new_file("bucket", "/target.bin", &[]).unwrap();
    let err = src.copy_to_file(dst.as_mut()).await.unwrap_err();
    assert!(matches!(err, VfsError::CopyToNotPossible));
    assert!(!dst.exists().await.unwrap());
}

#[tokio::test]
async fn touch_is_idempotent_on_both_backends() {
    let dir = tempfile::tempdir().unwrap();
    let mem = MemoryFileSystem::new();
    let mut files: Vec<Box<dyn File>> = vec![
        os_file(&dir, "touched.txt"),
        mem.new_file("", "/touched.txt", &[]).unwrap(),
    ];

    for f in files.iter_mut() {
        f.touch().await.unwrap();
        assert!(f.exists().await.unwrap());
        assert_eq!(f.size().await.unwrap(), 0);

        let first = f.last_modified().await.unwrap().unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        f.touch().await.unwrap();
        let second = f.last_modified().await.unwrap().unwrap();
        assert!(second >= first);
        assert_eq!(f.size().await.unwrap(), 0);
    }
}

#[tokio::test]
async fn write_close_reopen_equals_written_bytes() {
    let payload: Vec<u8> = (0..u8::MAX).cycle().take(300 * 1024).collect();

    let mem = MemoryFileSystem::new();
    let mut m = mem.new_file("vol", "/big.bin", &[]).unwrap();
    m.write(&payload).await.unwrap();
    m.close().await.unwrap();
    let mut m2 = mem.new_file("vol", "/big.bin", &[]).unwrap();
    assert_eq!(read_all(m2.as_mut()).await.unwrap(), payload);

    let dir = tempfile::tempdir().unwrap();
    let mut o = os_file(&dir, "big.bin");
    o.write(&payload).await.unwrap();
    o.close().await.unwrap();
    let mut o2 = os_file(&dir, "big.bin");
    assert_eq!(read_all(o2.as_mut()).await.unwrap(), payload);
}

#[tokio::test]
async fn path_and_location_invariants() {
    let mem = MemoryFileSystem::new();
    let f = mem.new_file("vol", "/a/b/../c/report.csv", &[]).unwrap();

    // paths are cleaned and the file sits inside its location
    assert_eq!(f.path(), "/a/c/report.csv");
    let loc = f.location();
    assert!(loc.path().ends_with('/'));
    assert_eq!(format!("{}{}", loc.path(), f.name()), f.path());
    assert!(loc.uri().ends_with('/'));
    assert!(!f.uri().ends_with('/'));
}

#[tokio::test]
async fn delete_all_versions_behaves_like_delete_on_unversioned_stores() {
    let mem = MemoryFileSystem::new();
    let mut f = mem.new_file("", "/v.txt", &[]).unwrap();
    f.write(b"1").await.unwrap();
    f.close().await.unwrap();

    f.delete(&[DeleteOption::AllVersions]).await.unwrap();
    assert!(!f.exists().await.unwrap());
}

// URI dispatch touches the process-wide registry, so everything that
// registers backends lives in this one test.
#[tokio::test]
async fn uri_dispatch_end_to_end() {
    init_tracing();
    unifs::register_defaults();

    // longest match: the s3 backend wins even though "file" appears in
    // the path
    let f = unifs::file_from_uri("s3://bucket/path/file.txt").unwrap();
    assert_eq!(f.location().filesystem().scheme(), "s3");

    let loc = unifs::location_from_uri("mem://vol/dir/").unwrap();
    assert_eq!(loc.filesystem().scheme(), "mem");

    // a file URI with a trailing slash is rejected, and vice versa
    assert!(matches!(
        unifs::file_from_uri("mem://vol/dir/").unwrap_err(),
        VfsError::BadAbsFilePath { .. }
    ));
    assert!(matches!(
        unifs::location_from_uri("mem://vol/file.txt").unwrap_err(),
        VfsError::BadAbsLocationPath { .. }
    ));

    // full write/read cycle through dispatch on the memory backend
    let mut w = unifs::file_from_uri("mem://scratch/data/out.txt").unwrap();
    w.write(b"dispatched").await.unwrap();
    w.close().await.unwrap();

    match unifs::entity_from_uri("mem://scratch/data/out.txt").unwrap() {
        unifs::Entity::File(mut r) => {
            assert_eq!(read_all(r.as_mut()).await.unwrap(), b"dispatched");
        }
        unifs::Entity::Location(_) => panic!("expected a file"),
    }
}
