//! Derived channel tests.
//!
//! Derived channels share the parent's handle but keep their own discipline,
//! queue and cleanup handler.

use bytes::Bytes;
use moonpool_io::{
    noop_cleanup, Channel, ChannelConfig, ChannelResult, CleanupHandler, IoEvent, ManualQueue,
    MemoryDevice, MemoryProvider, PosixError, QueueRef, ReadLength, SerialQueue,
    StreamDiscipline,
};
use std::sync::{mpsc, Arc, Mutex};
use std::time::Duration;

type Cleanups = Arc<Mutex<Vec<(&'static str, ChannelResult<()>)>>>;

fn cleanup(cleanups: &Cleanups, name: &'static str) -> moonpool_io::CleanupHandler {
    let cleanups = Arc::clone(cleanups);
    Box::new(move |result: ChannelResult<()>| cleanups.lock().unwrap().push((name, result)))
}

#[test]
fn test_closing_derived_runs_only_its_cleanup() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();

    let queue = ManualQueue::new("derive");
    let cleanups: Cleanups = Arc::default();
    let parent = Channel::from_device(
        StreamDiscipline::Random,
        MemoryDevice::new(Vec::new()),
        queue.clone(),
        cleanup(&cleanups, "parent"),
        ChannelConfig::default(),
    );
    let derived = parent.derive(StreamDiscipline::Stream, None, Some(cleanup(&cleanups, "derived")));

    derived.close();
    queue.run_until_idle();
    assert_eq!(*cleanups.lock().unwrap(), vec![("derived", Ok(()))]);
    assert!(!parent.device().is_closed());

    // The parent keeps working on the shared handle.
    let written = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&written);
    parent.write(0, Bytes::from_static(b"still open"), move |event| {
        sink.lock().unwrap().push(event)
    });
    queue.run_until_idle();
    assert_eq!(*written.lock().unwrap(), vec![IoEvent::Done(Some(10))]);

    parent.close();
    queue.run_until_idle();
    assert_eq!(
        *cleanups.lock().unwrap(),
        vec![("derived", Ok(())), ("parent", Ok(()))]
    );
    assert!(parent.device().is_closed());
}

#[test]
fn test_derived_defaults_to_parent_queue_and_noop_cleanup() {
    let queue = ManualQueue::new("derive");
    let parent = Channel::from_device(
        StreamDiscipline::Random,
        MemoryDevice::new(b"abc".to_vec()),
        queue.clone(),
        noop_cleanup(),
        ChannelConfig::default(),
    );
    let derived = parent.derive(StreamDiscipline::Stream, None, None);

    assert_eq!(derived.queue().label(), "derive");
    assert_eq!(derived.discipline(), StreamDiscipline::Stream);
    assert_ne!(derived.id(), parent.id());

    derived.close();
    assert_eq!(queue.run_until_idle(), 2, "one close pump and one cleanup");
}

#[test]
fn test_derived_delivers_on_its_own_queue() {
    let parent_queue = ManualQueue::new("parent");
    let derived_queue = ManualQueue::new("derived");
    let parent = Channel::from_device(
        StreamDiscipline::Random,
        MemoryDevice::new(b"shared bytes".to_vec()),
        parent_queue.clone(),
        noop_cleanup(),
        ChannelConfig::default(),
    );
    let derived_ref: QueueRef = derived_queue.clone();
    let derived = parent.derive(StreamDiscipline::Stream, Some(derived_ref), None);

    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    derived.read(0, ReadLength::Exact(6), move |event| sink.lock().unwrap().push(event));

    // Device I/O runs on the handle's I/O queue, the parent's queue here.
    parent_queue.run_until_idle();
    assert!(events.lock().unwrap().is_empty());
    assert_eq!(derived_queue.pending_job_count(), 1);

    derived_queue.run_until_idle();
    assert_eq!(
        *events.lock().unwrap(),
        vec![IoEvent::Done(Some(Bytes::from_static(b"shared")))]
    );
}

#[test]
fn test_stream_and_random_share_file_contents() {
    let queue = ManualQueue::new("derive");
    let parent = Channel::from_device(
        StreamDiscipline::Random,
        MemoryDevice::new(Vec::new()),
        queue.clone(),
        noop_cleanup(),
        ChannelConfig::default(),
    );
    let stream = parent.derive(StreamDiscipline::Stream, None, None);

    stream.write(0, Bytes::from_static(b"head"), |_| {});
    stream.write(0, Bytes::from_static(b"tail"), |_| {});
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    parent.read(2, ReadLength::Exact(4), move |event| sink.lock().unwrap().push(event));
    queue.run_until_idle();

    assert_eq!(
        *events.lock().unwrap(),
        vec![IoEvent::Done(Some(Bytes::from_static(b"adta")))]
    );
}

#[test]
fn test_derive_after_release_is_born_closed() {
    let queue = ManualQueue::new("derive");
    let provider = MemoryProvider::new();
    let cleanups: Cleanups = Arc::default();
    let parent = Channel::open(
        &provider,
        StreamDiscipline::Random,
        std::path::Path::new("released.bin"),
        moonpool_io::OpenFlags::default(),
        moonpool_io::Permissions::default(),
        queue.clone(),
        cleanup(&cleanups, "parent"),
        ChannelConfig::default(),
    )
    .unwrap();
    parent.close();
    queue.run_until_idle();
    assert_eq!(provider.close_count(), 1);

    let late = parent.derive(StreamDiscipline::Stream, None, Some(cleanup(&cleanups, "late")));
    assert!(!late.is_open());
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    late.read(0, ReadLength::Exact(4), move |event| sink.lock().unwrap().push(event));
    late.close();
    drop(late);
    queue.run_until_idle();

    assert_eq!(
        *events.lock().unwrap(),
        vec![IoEvent::Failed(PosixError::canceled())]
    );
    assert_eq!(
        *cleanups.lock().unwrap(),
        vec![("parent", Ok(())), ("late", Err(PosixError::canceled()))]
    );
    assert_eq!(provider.close_count(), 1);
}

#[test]
fn test_concurrent_operations_on_parent_and_derived() {
    const THREADS: usize = 4;
    const OPS_PER_THREAD: usize = 25;
    const TIMEOUT: Duration = Duration::from_secs(5);

    let (cleanup_tx, cleanup_rx) = mpsc::channel();
    let derived_cleanup_tx = cleanup_tx.clone();
    let parent_cleanup: CleanupHandler =
        Box::new(move |result: ChannelResult<()>| cleanup_tx.send(("parent", result)).unwrap());
    let derived_cleanup: CleanupHandler = Box::new(move |result: ChannelResult<()>| {
        derived_cleanup_tx.send(("derived", result)).unwrap()
    });

    let parent = Channel::from_device(
        StreamDiscipline::Random,
        MemoryDevice::new(Vec::new()),
        SerialQueue::new("concurrent-parent").unwrap(),
        parent_cleanup,
        ChannelConfig::new().chunk_size(3),
    );
    let derived_queue: QueueRef = SerialQueue::new("concurrent-derived").unwrap();
    let derived = parent.derive(
        StreamDiscipline::Random,
        Some(derived_queue),
        Some(derived_cleanup),
    );

    // Each operation reports (id, succeeded) from its terminal event.
    let (done_tx, done_rx) = mpsc::channel::<(usize, bool)>();
    std::thread::scope(|scope| {
        for thread in 0..THREADS {
            let channel = if thread % 2 == 0 { &parent } else { &derived };
            let done_tx = done_tx.clone();
            scope.spawn(move || {
                for i in 0..OPS_PER_THREAD {
                    let op = thread * OPS_PER_THREAD + i;
                    let offset = (op * 8) as u64;
                    let expected = vec![op as u8; 8];

                    let tx = done_tx.clone();
                    channel.write(
                        offset,
                        Bytes::from(expected.clone()),
                        move |event: IoEvent<usize>| match event {
                            IoEvent::Partial(_) => {}
                            IoEvent::Done(_) => tx.send((op * 2, true)).unwrap(),
                            IoEvent::Failed(_) => tx.send((op * 2, false)).unwrap(),
                        },
                    );

                    let tx = done_tx.clone();
                    let mut data = Vec::new();
                    channel.read(offset, ReadLength::Exact(8), move |event: IoEvent<Bytes>| {
                        match event {
                            IoEvent::Partial(chunk) => data.extend_from_slice(&chunk),
                            IoEvent::Done(last) => {
                                if let Some(chunk) = last {
                                    data.extend_from_slice(&chunk);
                                }
                                tx.send((op * 2 + 1, data == expected)).unwrap();
                            }
                            IoEvent::Failed(_) => tx.send((op * 2 + 1, false)).unwrap(),
                        }
                    });
                }
            });
        }
    });
    drop(done_tx);

    let mut terminals = vec![0usize; THREADS * OPS_PER_THREAD * 2];
    for _ in 0..terminals.len() {
        let (id, succeeded) = done_rx.recv_timeout(TIMEOUT).unwrap();
        assert!(succeeded, "operation {} failed", id);
        terminals[id] += 1;
    }
    assert!(terminals.iter().all(|&count| count == 1));

    derived.close();
    parent.close();
    let mut closed = vec![
        cleanup_rx.recv_timeout(TIMEOUT).unwrap(),
        cleanup_rx.recv_timeout(TIMEOUT).unwrap(),
    ];
    closed.sort_by_key(|(name, _)| *name);
    assert_eq!(closed, vec![("derived", Ok(())), ("parent", Ok(()))]);

    drop(derived);
    drop(parent);
    assert!(done_rx.recv_timeout(Duration::from_millis(100)).is_err());
    assert!(cleanup_rx.recv_timeout(Duration::from_millis(100)).is_err());
}
