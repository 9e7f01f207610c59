//! Stream file tests.

use bytes::Bytes;
use moonpool_io::{
    FileConfig, ManualQueue, MemoryProvider, OpenFlags, Progress, ReadLength, StreamFile,
};
use std::sync::{mpsc, Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

#[test]
fn test_open_forces_append() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();

    let dir = TempDir::new().unwrap();
    let path = dir.path().join("log.txt");
    std::fs::write(&path, b"abc").unwrap();

    let (tx, rx) = mpsc::channel();
    let file = StreamFile::open(
        FileConfig::new(&path)
            .flags(OpenFlags::READ_WRITE)
            .cleanup(move |result| tx.send(result).unwrap()),
    )
    .unwrap();
    assert!(file.flags().contains(OpenFlags::APPEND));
    assert!(file.channel().queue().label().starts_with("StreamFile."));

    file.write(&b"def"[..], |result| assert_eq!(result, Ok(())));
    file.write(&b"ghi"[..], |result| assert_eq!(result, Ok(())));
    file.close();

    assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), Ok(()));
    assert_eq!(std::fs::read(&path).unwrap(), b"abcdefghi");
}

#[test]
fn test_read_to_end_reports_growing_total() {
    let queue = ManualQueue::new("stream");
    let provider = MemoryProvider::new();
    provider.insert("stream.bin", b"0123456789".to_vec());
    let config = FileConfig::new("stream.bin")
        .queue(queue.clone())
        .channel(moonpool_io::ChannelConfig::new().chunk_size(4));
    let file = StreamFile::open_with(&provider, config).unwrap();

    let updates = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&updates);
    let result = Arc::new(Mutex::new(None));
    let result_sink = Arc::clone(&result);
    file.read_with_progress(
        ReadLength::ToEnd,
        Some(Box::new(move |progress: Progress| {
            sink.lock().unwrap().push(progress)
        })),
        move |outcome| *result_sink.lock().unwrap() = Some(outcome),
    );
    queue.run_until_idle();

    let updates = updates.lock().unwrap();
    let totals: Vec<Option<u64>> = updates.iter().map(|p| p.total).collect();
    assert_eq!(totals, vec![None, None, None, None, Some(10)]);
    assert_eq!(updates.last().unwrap().completed, 10);
    assert_eq!(updates.last().unwrap().fraction(), Some(1.0));
    assert_eq!(
        *result.lock().unwrap(),
        Some(Ok(Bytes::from_static(b"0123456789")))
    );
}

#[test]
fn test_sequential_reads_advance_cursor() {
    let queue = ManualQueue::new("stream");
    let provider = MemoryProvider::new();
    provider.insert("cursor.bin", b"firstsecond".to_vec());
    let file =
        StreamFile::open_with(&provider, FileConfig::new("cursor.bin").queue(queue.clone()))
            .unwrap();

    let reads = Arc::new(Mutex::new(Vec::new()));
    for len in [5usize, 6] {
        let sink = Arc::clone(&reads);
        file.read(len, move |result| sink.lock().unwrap().push(result));
    }
    let sink = Arc::clone(&reads);
    file.read_to_end(move |result| sink.lock().unwrap().push(result));
    queue.run_until_idle();

    assert_eq!(
        *reads.lock().unwrap(),
        vec![
            Ok(Bytes::from_static(b"first")),
            Ok(Bytes::from_static(b"second")),
            Ok(Bytes::new()),
        ]
    );
}

#[test]
fn test_open_failure_returns_error() {
    let provider = MemoryProvider::new();
    let err = StreamFile::open_with(
        &provider,
        FileConfig::new("missing.log")
            .flags(OpenFlags::WRITE_ONLY)
            .queue(ManualQueue::new("stream")),
    )
    .unwrap_err();
    assert_eq!(err.code(), libc::ENOENT);
}
