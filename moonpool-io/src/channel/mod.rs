//! Channels: one device handle bound to one callback queue.
//!
//! A [`Channel`] dispatches reads and writes against a shared device handle
//! and reports each operation through a handler invoked on the channel's
//! queue:
//!
//! ```text
//! read/write ──► Partial(..) ──► Partial(..) ──► Done(..)
//!                                          └───► Failed(err)   (nothing follows)
//! ```
//!
//! ## Handles and derived channels
//!
//! Device I/O runs on the handle's I/O queue, one chunk per job, and
//! operations of every channel sharing the handle are served in submission
//! order. [`Channel::derive`] registers another channel on the same handle
//! with its own discipline, queue and cleanup handler. The device is closed
//! when the last registered channel has closed.
//!
//! ## Closing
//!
//! - [`CloseMode::Drain`]: operations submitted before the close run to
//!   completion, then the cleanup handler fires.
//! - [`CloseMode::Stop`]: operations still in flight stop at their next chunk
//!   and fail with `ECANCELED`.
//!
//! In both modes, operations submitted after the close fail with `ECANCELED`
//! without touching the device, and the cleanup handler fires exactly once.

use crate::device::{Device, DeviceProvider};
use crate::error::{ChannelResult, PosixError};
use crate::options::{OpenFlags, Permissions};
use crate::queue::{submit, QueueRef};
use bytes::Bytes;
use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

mod handle;

use handle::{EventSink, ReadOp, SharedHandle, Work, WriteOp};

/// Default number of bytes moved per partial delivery.
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// How a channel addresses the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamDiscipline {
    /// Explicit offsets (`pread`/`pwrite`).
    Random,
    /// The file cursor; offsets are ignored.
    Stream,
}

/// How [`Channel::close_with`] treats operations already in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CloseMode {
    /// Let submitted operations finish first.
    #[default]
    Drain,
    /// Cancel submitted operations at their next chunk.
    Stop,
}

/// Length of a read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReadLength {
    /// Read exactly this many bytes, or fewer if end of file comes first.
    Exact(usize),
    /// Read until end of file.
    ToEnd,
}

impl ReadLength {
    /// Total units for progress reporting, if known up front.
    pub fn total(self) -> Option<u64> {
        match self {
            ReadLength::Exact(len) => Some(len as u64),
            ReadLength::ToEnd => None,
        }
    }

    fn remaining(self) -> Option<usize> {
        match self {
            ReadLength::Exact(len) => Some(len),
            ReadLength::ToEnd => None,
        }
    }
}

impl From<usize> for ReadLength {
    fn from(len: usize) -> Self {
        ReadLength::Exact(len)
    }
}

/// One invocation of an operation handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IoEvent<T> {
    /// Non-terminal progress: data read, or bytes written, by one call.
    Partial(T),
    /// Successful end of the operation, with the last call's result if any.
    Done(Option<T>),
    /// The operation failed. No further events follow.
    Failed(PosixError),
}

impl<T> IoEvent<T> {
    /// Whether this is the last event of its operation.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, IoEvent::Partial(_))
    }
}

/// Callback invoked once when a channel releases its handle.
pub type CleanupHandler = Box<dyn FnOnce(ChannelResult<()>) + Send + 'static>;

/// A cleanup handler that ignores the result.
pub fn noop_cleanup() -> CleanupHandler {
    Box::new(|_| {})
}

/// Handle-level settings, fixed when a channel is opened.
#[derive(Clone)]
pub struct ChannelConfig {
    /// Bytes moved per device call, and so per partial delivery. At least 1.
    pub chunk_size: usize,
    /// Queue running device I/O. Defaults to the channel's callback queue.
    pub io_queue: Option<QueueRef>,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            io_queue: None,
        }
    }
}

impl ChannelConfig {
    /// Default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the chunk size.
    pub fn chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// Run device I/O on `queue` instead of the callback queue.
    pub fn io_queue(mut self, queue: QueueRef) -> Self {
        self.io_queue = Some(queue);
        self
    }
}

impl fmt::Debug for ChannelConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelConfig")
            .field("chunk_size", &self.chunk_size)
            .field("io_queue", &self.io_queue.as_ref().map(|q| q.label()))
            .finish()
    }
}

const OPEN: u8 = 0;
const CLOSING: u8 = 1;
const CLOSED: u8 = 2;

static NEXT_CHANNEL_ID: AtomicU64 = AtomicU64::new(1);

/// Per-channel lifecycle, shared with the channel's queued work.
pub(crate) struct ChannelState {
    id: u64,
    queue: QueueRef,
    lifecycle: AtomicU8,
    stopped: AtomicBool,
    cleanup: Mutex<Option<CleanupHandler>>,
}

impl ChannelState {
    fn new(queue: QueueRef, cleanup: CleanupHandler) -> Arc<Self> {
        Arc::new(Self {
            id: NEXT_CHANNEL_ID.fetch_add(1, Ordering::Relaxed),
            queue,
            lifecycle: AtomicU8::new(OPEN),
            stopped: AtomicBool::new(false),
            cleanup: Mutex::new(Some(cleanup)),
        })
    }

    fn is_open(&self) -> bool {
        self.lifecycle.load(Ordering::Acquire) == OPEN
    }

    /// Whether queued work of this channel must stop.
    pub(crate) fn is_cancelled(&self) -> bool {
        self.stopped.load(Ordering::Acquire) || self.lifecycle.load(Ordering::Acquire) == CLOSED
    }

    fn begin_close(&self) -> bool {
        self.lifecycle
            .compare_exchange(OPEN, CLOSING, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Mark the channel closed and hand `result` to the cleanup handler.
    pub(crate) fn finish_close(&self, result: ChannelResult<()>) {
        self.lifecycle.store(CLOSED, Ordering::Release);
        let cleanup = self
            .cleanup
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        match cleanup {
            Some(cleanup) => {
                tracing::debug!("Channel {} closed: {:?}", self.id, result);
                submit(self.queue.as_ref(), move || cleanup(result));
            }
            None => tracing::warn!("Channel {} closed twice", self.id),
        }
    }
}

/// An I/O channel over one device handle.
///
/// Dropping a channel closes it with [`CloseMode::Drain`] without waiting
/// for the cleanup handler.
pub struct Channel<D: Device> {
    handle: Arc<SharedHandle<D>>,
    state: Arc<ChannelState>,
    discipline: StreamDiscipline,
}

impl<D: Device> Channel<D> {
    /// Open `path` through `provider`.
    ///
    /// On failure the error is returned and `cleanup` is dropped without
    /// being called.
    #[allow(clippy::too_many_arguments)]
    pub fn open<P>(
        provider: &P,
        discipline: StreamDiscipline,
        path: &Path,
        flags: OpenFlags,
        permissions: Permissions,
        queue: QueueRef,
        cleanup: CleanupHandler,
        config: ChannelConfig,
    ) -> ChannelResult<Self>
    where
        P: DeviceProvider<Device = D>,
    {
        let device = provider.open(path, flags, permissions).map_err(|err| {
            tracing::debug!("Failed to open {}: {}", path.display(), err);
            PosixError::from(err)
        })?;
        Ok(Self::from_device(discipline, device, queue, cleanup, config))
    }

    /// Wrap an already-open device.
    pub fn from_device(
        discipline: StreamDiscipline,
        device: D,
        queue: QueueRef,
        cleanup: CleanupHandler,
        config: ChannelConfig,
    ) -> Self {
        let io_queue = config.io_queue.unwrap_or_else(|| Arc::clone(&queue));
        let handle = SharedHandle::new(device, io_queue, config.chunk_size);
        Self::attach(handle, discipline, queue, cleanup)
    }

    fn attach(
        handle: Arc<SharedHandle<D>>,
        discipline: StreamDiscipline,
        queue: QueueRef,
        cleanup: CleanupHandler,
    ) -> Self {
        handle.register();
        Self::attached(handle, discipline, queue, cleanup)
    }

    /// Build a channel on a handle it is already registered on.
    fn attached(
        handle: Arc<SharedHandle<D>>,
        discipline: StreamDiscipline,
        queue: QueueRef,
        cleanup: CleanupHandler,
    ) -> Self {
        let state = ChannelState::new(queue, cleanup);
        tracing::debug!(
            "Channel {} attached to handle {} ({:?}, queue {})",
            state.id,
            handle.id(),
            discipline,
            state.queue.label()
        );
        Self {
            handle,
            state,
            discipline,
        }
    }

    /// Create a channel sharing this channel's handle.
    ///
    /// `queue` defaults to this channel's queue and `cleanup` to a no-op.
    /// The new channel has its own lifecycle: closing either one leaves the
    /// other usable.
    ///
    /// If this channel has already released the handle and no other channel
    /// holds it, the derived channel is born closed: its operations fail with
    /// `ECANCELED` and its cleanup handler receives `ECANCELED`.
    pub fn derive(
        &self,
        discipline: StreamDiscipline,
        queue: Option<QueueRef>,
        cleanup: Option<CleanupHandler>,
    ) -> Channel<D> {
        let queue = queue.unwrap_or_else(|| Arc::clone(&self.state.queue));
        let cleanup = cleanup.unwrap_or_else(noop_cleanup);
        if self.handle.try_register() {
            return Self::attached(Arc::clone(&self.handle), discipline, queue, cleanup);
        }

        let state = ChannelState::new(queue, cleanup);
        tracing::debug!(
            "Channel {} derived from released handle {}",
            state.id,
            self.handle.id()
        );
        state.finish_close(Err(PosixError::canceled()));
        Self {
            handle: Arc::clone(&self.handle),
            state,
            discipline,
        }
    }

    /// Unique id, used in logs.
    pub fn id(&self) -> u64 {
        self.state.id
    }

    /// The channel's stream discipline.
    pub fn discipline(&self) -> StreamDiscipline {
        self.discipline
    }

    /// The queue callbacks are delivered on.
    pub fn queue(&self) -> &QueueRef {
        &self.state.queue
    }

    /// The underlying device.
    pub fn device(&self) -> &D {
        self.handle.device()
    }

    /// Whether `close` has not been requested yet.
    pub fn is_open(&self) -> bool {
        self.state.is_open()
    }

    /// Read `length` bytes at `offset` (ignored for stream channels).
    pub fn read<H>(&self, offset: u64, length: ReadLength, handler: H)
    where
        H: FnMut(IoEvent<Bytes>) + Send + 'static,
    {
        let sink = EventSink::new(Arc::clone(&self.state), handler);
        if !self.state.is_open() {
            tracing::debug!("Read on closed channel {}", self.state.id);
            sink.deliver(IoEvent::Failed(PosixError::canceled()));
            return;
        }
        self.handle.submit(Work::Read(ReadOp {
            sink,
            discipline: self.discipline,
            offset,
            remaining: length.remaining(),
        }));
    }

    /// Write `data` at `offset` (ignored for stream channels).
    ///
    /// Partial events carry the number of bytes written by each call.
    pub fn write<H>(&self, offset: u64, data: Bytes, handler: H)
    where
        H: FnMut(IoEvent<usize>) + Send + 'static,
    {
        let sink = EventSink::new(Arc::clone(&self.state), handler);
        if !self.state.is_open() {
            tracing::debug!("Write on closed channel {}", self.state.id);
            sink.deliver(IoEvent::Failed(PosixError::canceled()));
            return;
        }
        self.handle.submit(Work::Write(WriteOp {
            sink,
            discipline: self.discipline,
            offset,
            data,
        }));
    }

    /// Close with [`CloseMode::Drain`]. Idempotent.
    pub fn close(&self) {
        self.close_with(CloseMode::Drain);
    }

    /// Request the handle be released.
    ///
    /// The first call schedules the close; later calls only upgrade a drain
    /// to a stop.
    pub fn close_with(&self, mode: CloseMode) {
        if mode == CloseMode::Stop {
            self.state.stopped.store(true, Ordering::Release);
        }
        if self.state.begin_close() {
            tracing::debug!("Closing channel {} ({:?})", self.state.id, mode);
            self.handle.submit(Work::Close(Arc::clone(&self.state)));
        }
    }
}

impl<D: Device> Drop for Channel<D> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<D: Device> fmt::Debug for Channel<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.state.id)
            .field("handle", &self.handle.id())
            .field("discipline", &self.discipline)
            .field("queue", &self.state.queue.label())
            .field("open", &self.state.is_open())
            .finish()
    }
}
