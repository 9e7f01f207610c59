//! Fault injection tests.
//!
//! Failures injected by the in-memory device at different points of a
//! transfer, and their determinism for a given seed.

use bytes::Bytes;
use moonpool_io::transfer::{self, Progress};
use moonpool_io::{
    noop_cleanup, Channel, ChannelConfig, ChannelResult, FaultConfiguration, IoEvent, ManualQueue,
    MemoryDevice, MemoryProvider, OpenFlags, Permissions, PosixError, ReadLength,
    StreamDiscipline,
};
use std::path::Path;
use std::sync::{Arc, Mutex};

fn open(
    provider: &MemoryProvider,
    queue: &Arc<ManualQueue>,
    cleanup: moonpool_io::CleanupHandler,
    chunk_size: usize,
) -> Channel<MemoryDevice> {
    Channel::open(
        provider,
        StreamDiscipline::Random,
        Path::new("faulty.bin"),
        OpenFlags::default(),
        Permissions::default(),
        queue.clone(),
        cleanup,
        ChannelConfig::new().chunk_size(chunk_size),
    )
    .unwrap()
}

#[test]
fn test_write_fails_after_partial_progress() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();

    let queue = ManualQueue::new("faults");
    let provider = MemoryProvider::with_faults(FaultConfiguration::fail_writes_after(4), 1);
    let channel = open(&provider, &queue, noop_cleanup(), 3);

    let updates = Arc::new(Mutex::new(Vec::new()));
    let outcomes = Arc::new(Mutex::new(Vec::new()));
    let (progress_sink, outcome_sink) = (Arc::clone(&updates), Arc::clone(&outcomes));
    transfer::write(
        &channel,
        0,
        Bytes::from_static(b"0123456789"),
        Some(Box::new(move |progress: Progress| {
            progress_sink.lock().unwrap().push(progress)
        })),
        Box::new(move |result: ChannelResult<()>| outcome_sink.lock().unwrap().push(result)),
    );
    queue.run_until_idle();

    let updates = updates.lock().unwrap();
    let completed: Vec<u64> = updates.iter().map(|p| p.completed).collect();
    assert_eq!(completed, vec![0, 3, 4, 4]);
    assert!(updates.last().unwrap().cancelled);
    assert!(updates[..updates.len() - 1].iter().all(|p| !p.cancelled));
    assert_eq!(*outcomes.lock().unwrap(), vec![Err(PosixError::io())]);
    assert_eq!(provider.contents("faulty.bin"), Some(b"0123".to_vec()));
}

#[test]
fn test_read_failure_uses_configured_error_code() {
    let queue = ManualQueue::new("faults");
    let provider = MemoryProvider::with_faults(
        FaultConfiguration::fail_reads_after(0).with_error_code(libc::EBADMSG),
        1,
    );
    provider.insert("faulty.bin", b"payload".to_vec());
    let channel = open(&provider, &queue, noop_cleanup(), 64);

    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    channel.read(0, ReadLength::Exact(7), move |event| sink.lock().unwrap().push(event));
    queue.run_until_idle();

    let expected = PosixError::new(libc::EBADMSG).unwrap();
    assert_eq!(*events.lock().unwrap(), vec![IoEvent::Failed(expected)]);
}

#[test]
fn test_short_transfers_still_complete() {
    let queue = ManualQueue::new("faults");
    let provider = MemoryProvider::with_faults(FaultConfiguration::short_transfers(2), 1);
    let channel = open(&provider, &queue, noop_cleanup(), 64);

    let writes = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&writes);
    channel.write(0, Bytes::from_static(b"abcde"), move |event| sink.lock().unwrap().push(event));
    queue.run_until_idle();

    assert_eq!(
        *writes.lock().unwrap(),
        vec![IoEvent::Partial(2), IoEvent::Partial(2), IoEvent::Done(Some(1))]
    );
}

#[test]
fn test_close_failure_reaches_last_channel_only() {
    let queue = ManualQueue::new("faults");
    let provider = MemoryProvider::with_faults(FaultConfiguration::failing_close(), 1);
    let results = Arc::new(Mutex::new(Vec::new()));

    let parent_results = Arc::clone(&results);
    let parent = open(
        &provider,
        &queue,
        Box::new(move |result: ChannelResult<()>| {
            parent_results.lock().unwrap().push(("parent", result))
        }),
        64,
    );
    let derived_results = Arc::clone(&results);
    let derived = parent.derive(
        StreamDiscipline::Stream,
        None,
        Some(Box::new(move |result: ChannelResult<()>| {
            derived_results.lock().unwrap().push(("derived", result))
        })),
    );

    derived.close();
    parent.close();
    queue.run_until_idle();

    assert_eq!(
        *results.lock().unwrap(),
        vec![("derived", Ok(())), ("parent", Err(PosixError::io()))]
    );
    assert_eq!(provider.close_count(), 1);
}

/// Run a fixed workload and record every terminal outcome.
fn run_workload(seed: u64) -> Vec<String> {
    let queue = ManualQueue::new("faults");
    let provider = MemoryProvider::with_faults(FaultConfiguration::random_for_seed(seed), seed);
    let channel = open(&provider, &queue, noop_cleanup(), 512);
    let outcomes = Arc::new(Mutex::new(Vec::new()));

    for round in 0..50u64 {
        let data = Bytes::from(vec![round as u8; 4096]);
        let sink = Arc::clone(&outcomes);
        transfer::write(
            &channel,
            round * 4096,
            data,
            None,
            Box::new(move |result: ChannelResult<()>| {
                sink.lock().unwrap().push(format!("write {:?}", result))
            }),
        );
        let sink = Arc::clone(&outcomes);
        transfer::read(
            &channel,
            round * 4096,
            ReadLength::Exact(4096),
            None,
            Box::new(move |result: ChannelResult<Bytes>| {
                sink.lock()
                    .unwrap()
                    .push(format!("read {:?}", result.map(|data| data.len())))
            }),
        );
    }
    queue.run_until_idle();

    let recorded = outcomes.lock().unwrap().clone();
    recorded
}

#[test]
fn test_faults_are_deterministic_per_seed() {
    for seed in [1, 7, 42] {
        let first = run_workload(seed);
        assert_eq!(first.len(), 100);
        assert_eq!(first, run_workload(seed), "seed {}", seed);
    }
}
