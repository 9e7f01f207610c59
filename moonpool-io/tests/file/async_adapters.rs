//! Async adapter tests.

use bytes::Bytes;
use moonpool_io::{
    CloseMode, FileConfig, MemoryProvider, OpenFlags, PosixError, RandomAccessFile, ReadLength,
    StreamFile,
};
use tempfile::TempDir;

#[tokio::test]
async fn test_random_access_round_trip() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .try_init();

    let dir = TempDir::new().unwrap();
    let file = RandomAccessFile::open(FileConfig::new(dir.path().join("async.bin"))).unwrap();

    file.write_at(0, &b"hello async world"[..]).await.unwrap();
    file.write_at(6, &b"ASYNC"[..]).await.unwrap();

    assert_eq!(file.read_at(6, 5usize).await.unwrap(), Bytes::from_static(b"ASYNC"));
    assert_eq!(
        file.read_at(0, ReadLength::ToEnd).await.unwrap(),
        Bytes::from_static(b"hello ASYNC world")
    );
}

#[tokio::test]
async fn test_stream_append_and_fetch() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("journal.log");
    let file = StreamFile::open(FileConfig::new(&path)).unwrap();

    file.append(&b"one\n"[..]).await.unwrap();
    file.append(Bytes::from_static(b"two\n")).await.unwrap();
    assert_eq!(std::fs::read(&path).unwrap(), b"one\ntwo\n");

    // A fresh stream starts its cursor at the beginning.
    let reader = StreamFile::open(FileConfig::new(&path).flags(OpenFlags::READ_ONLY)).unwrap();
    assert_eq!(reader.fetch(4usize).await.unwrap(), Bytes::from_static(b"one\n"));
    assert_eq!(
        reader.fetch(ReadLength::ToEnd).await.unwrap(),
        Bytes::from_static(b"two\n")
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_errors_surface_through_futures() {
    let provider = MemoryProvider::new();
    provider.insert("read-only.bin", b"data".to_vec());
    let file = RandomAccessFile::open_with(
        &provider,
        FileConfig::new("read-only.bin").flags(OpenFlags::READ_ONLY),
    )
    .unwrap();

    let err = file.write_at(0, &b"nope"[..]).await.unwrap_err();
    assert_eq!(err.code(), libc::EBADF);

    file.close_with(CloseMode::Stop);
    let err = file.read_at(0, 4usize).await.unwrap_err();
    assert_eq!(err, PosixError::canceled());
}
