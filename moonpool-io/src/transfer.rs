//! # Transfer Engine
//!
//! Turns the channel's event protocol into progress notifications and one
//! completion callback per operation.
//!
//! Each operation is tracked by a transfer with an explicit state machine:
//!
//! ```text
//! Pending ──first event──► Accumulating ──Done────► Completed
//!                                   └─────Failed──► Failed
//! ```
//!
//! [`read`] and [`write`] queue a progress report at 0 completed on the
//! channel's queue as soon as the operation is issued, ahead of any device
//! I/O. A transfer driven by hand reports it on [`ReadTransfer::start`] or on
//! its first event, whichever comes first. Partial events advance progress. A terminal event reports final progress (skipped
//! when nothing changed) and then calls the completion. Events arriving after
//! a terminal state are logged and dropped.
//!
//! ## Progress totals
//!
//! | Operation | `total` while running | On success |
//! |-----------|-----------------------|------------|
//! | `read(ReadLength::Exact(n))` | `Some(n)` | `completed = n` |
//! | `read(ReadLength::ToEnd)` | `None` | `total = Some(completed)` |
//! | `write(data)` | `Some(data.len())` | `completed = total` |
//!
//! On failure progress is marked `cancelled` and reported once more.

use crate::channel::{Channel, IoEvent, ReadLength};
use crate::device::Device;
use crate::error::{ChannelResult, PosixError};
use bytes::{Bytes, BytesMut};
use crate::queue::submit;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

static NEXT_TRANSFER_ID: AtomicU64 = AtomicU64::new(1);

/// Progress of one transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Progress {
    /// Units the transfer will move, if known.
    pub total: Option<u64>,
    /// Units moved so far.
    pub completed: u64,
    /// Set when the transfer failed.
    pub cancelled: bool,
}

impl Progress {
    fn new(total: Option<u64>) -> Self {
        Self {
            total,
            completed: 0,
            cancelled: false,
        }
    }

    /// Completed fraction in `[0.0, 1.0]`, if the total is known.
    ///
    /// An empty transfer counts as fully complete.
    pub fn fraction(&self) -> Option<f64> {
        match self.total {
            Some(0) => Some(1.0),
            Some(total) => Some((self.completed as f64 / total as f64).min(1.0)),
            None => None,
        }
    }

    /// Whether every expected unit has been moved.
    pub fn is_finished(&self) -> bool {
        !self.cancelled && self.total.is_some_and(|total| self.completed >= total)
    }
}

/// Receives progress updates.
pub type ProgressHandler = Box<dyn FnMut(Progress) + Send + 'static>;

/// Receives the outcome of a read.
pub type ReadCompletion = Box<dyn FnOnce(ChannelResult<Bytes>) + Send + 'static>;

/// Receives the outcome of a write.
pub type WriteCompletion = Box<dyn FnOnce(ChannelResult<()>) + Send + 'static>;

/// Lifecycle of a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferState {
    /// No event received yet.
    Pending,
    /// At least one event received, not finished.
    Accumulating,
    /// Completion called with success.
    Completed,
    /// Completion called with an error.
    Failed,
}

impl TransferState {
    /// Whether the completion has been called.
    pub fn is_terminal(self) -> bool {
        matches!(self, TransferState::Completed | TransferState::Failed)
    }
}

/// State and progress bookkeeping shared by reads and writes.
struct Tracker {
    id: u64,
    kind: &'static str,
    state: TransferState,
    progress: Progress,
    reported: Option<Progress>,
    on_progress: Option<ProgressHandler>,
}

impl Tracker {
    fn new(kind: &'static str, total: Option<u64>, on_progress: Option<ProgressHandler>) -> Self {
        Self {
            id: NEXT_TRANSFER_ID.fetch_add(1, Ordering::Relaxed),
            kind,
            state: TransferState::Pending,
            progress: Progress::new(total),
            reported: None,
            on_progress,
        }
    }

    /// Leave `Pending`, reporting progress at 0.
    fn start(&mut self) {
        if self.state == TransferState::Pending {
            self.state = TransferState::Accumulating;
            self.report();
        }
    }

    /// Accept an event. Returns `false` if the transfer already finished.
    fn accept<T>(&mut self, event: &IoEvent<T>) -> bool {
        match self.state {
            TransferState::Pending => {
                self.start();
                true
            }
            TransferState::Accumulating => true,
            TransferState::Completed | TransferState::Failed => {
                tracing::warn!(
                    "Transfer {} ({}) ignoring {} event after {:?}",
                    self.id,
                    self.kind,
                    event_name(event),
                    self.state
                );
                false
            }
        }
    }

    fn advance(&mut self, units: usize) {
        self.progress.completed = self.progress.completed.saturating_add(units as u64);
    }

    fn report(&mut self) {
        if self.reported == Some(self.progress) {
            return;
        }
        self.reported = Some(self.progress);
        if let Some(on_progress) = self.on_progress.as_mut() {
            on_progress(self.progress);
        }
    }

    fn succeed(&mut self) {
        match self.progress.total {
            Some(total) => self.progress.completed = total,
            None => self.progress.total = Some(self.progress.completed),
        }
        self.report();
        self.state = TransferState::Completed;
        tracing::debug!(
            "Transfer {} ({}) completed: {} units",
            self.id,
            self.kind,
            self.progress.completed
        );
    }

    fn fail(&mut self, error: PosixError) {
        self.progress.cancelled = true;
        self.report();
        self.state = TransferState::Failed;
        tracing::debug!("Transfer {} ({}) failed: {}", self.id, self.kind, error);
    }
}

fn event_name<T>(event: &IoEvent<T>) -> &'static str {
    match event {
        IoEvent::Partial(_) => "partial",
        IoEvent::Done(_) => "done",
        IoEvent::Failed(_) => "failed",
    }
}

/// Bookkeeping for one read.
///
/// Owns the accumulation buffer; the buffer leaves the transfer only by being
/// moved into the completion.
pub struct ReadTransfer {
    tracker: Tracker,
    buffer: BytesMut,
    completion: Option<ReadCompletion>,
}

impl ReadTransfer {
    /// Create a transfer for a read of `length`.
    pub fn new(
        length: ReadLength,
        on_progress: Option<ProgressHandler>,
        completion: ReadCompletion,
    ) -> Self {
        let capacity = match length {
            ReadLength::Exact(len) => len.min(crate::channel::DEFAULT_CHUNK_SIZE),
            ReadLength::ToEnd => 0,
        };
        Self {
            tracker: Tracker::new("read", length.total(), on_progress),
            buffer: BytesMut::with_capacity(capacity),
            completion: Some(completion),
        }
    }

    /// Current state.
    pub fn state(&self) -> TransferState {
        self.tracker.state
    }

    /// Current progress.
    pub fn progress(&self) -> Progress {
        self.tracker.progress
    }

    /// Report progress at 0 if no event has arrived yet.
    pub fn start(&mut self) {
        self.tracker.start();
    }

    /// Feed one channel event.
    pub fn handle(&mut self, event: IoEvent<Bytes>) {
        if !self.tracker.accept(&event) {
            return;
        }
        match event {
            IoEvent::Partial(data) => {
                self.buffer.extend_from_slice(&data);
                self.tracker.advance(data.len());
                self.tracker.report();
            }
            IoEvent::Done(last) => {
                if let Some(data) = last {
                    self.buffer.extend_from_slice(&data);
                    self.tracker.advance(data.len());
                }
                self.tracker.succeed();
                let data = self.buffer.split().freeze();
                if let Some(completion) = self.completion.take() {
                    completion(Ok(data));
                }
            }
            IoEvent::Failed(error) => {
                self.buffer = BytesMut::new();
                self.tracker.fail(error);
                if let Some(completion) = self.completion.take() {
                    completion(Err(error));
                }
            }
        }
    }
}

/// Bookkeeping for one write.
///
/// Holds the pending data until the write finishes.
pub struct WriteTransfer {
    tracker: Tracker,
    pending: Option<Bytes>,
    completion: Option<WriteCompletion>,
}

impl WriteTransfer {
    /// Create a transfer for writing `data`.
    pub fn new(
        data: Bytes,
        on_progress: Option<ProgressHandler>,
        completion: WriteCompletion,
    ) -> Self {
        Self {
            tracker: Tracker::new("write", Some(data.len() as u64), on_progress),
            pending: Some(data),
            completion: Some(completion),
        }
    }

    /// Current state.
    pub fn state(&self) -> TransferState {
        self.tracker.state
    }

    /// Current progress.
    pub fn progress(&self) -> Progress {
        self.tracker.progress
    }

    /// Report progress at 0 if no event has arrived yet.
    pub fn start(&mut self) {
        self.tracker.start();
    }

    /// Whether the data is still held.
    pub fn holds_data(&self) -> bool {
        self.pending.is_some()
    }

    /// Feed one channel event.
    pub fn handle(&mut self, event: IoEvent<usize>) {
        if !self.tracker.accept(&event) {
            return;
        }
        match event {
            IoEvent::Partial(written) => {
                self.tracker.advance(written);
                self.tracker.report();
            }
            IoEvent::Done(last) => {
                self.tracker.advance(last.unwrap_or(0));
                self.tracker.succeed();
                self.pending = None;
                if let Some(completion) = self.completion.take() {
                    completion(Ok(()));
                }
            }
            IoEvent::Failed(error) => {
                self.pending = None;
                self.tracker.fail(error);
                if let Some(completion) = self.completion.take() {
                    completion(Err(error));
                }
            }
        }
    }
}

fn lock<T>(transfer: &Mutex<T>) -> MutexGuard<'_, T> {
    transfer.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Read `length` bytes at `offset` through `channel`.
pub fn read<D: Device>(
    channel: &Channel<D>,
    offset: u64,
    length: ReadLength,
    on_progress: Option<ProgressHandler>,
    completion: ReadCompletion,
) {
    let transfer = Arc::new(Mutex::new(ReadTransfer::new(length, on_progress, completion)));
    let starting = Arc::clone(&transfer);
    submit(channel.queue().as_ref(), move || lock(&starting).start());
    channel.read(offset, length, move |event| lock(&transfer).handle(event));
}

/// Write `data` at `offset` through `channel`.
pub fn write<D: Device>(
    channel: &Channel<D>,
    offset: u64,
    data: Bytes,
    on_progress: Option<ProgressHandler>,
    completion: WriteCompletion,
) {
    let transfer = Arc::new(Mutex::new(WriteTransfer::new(
        data.clone(),
        on_progress,
        completion,
    )));
    let starting = Arc::clone(&transfer);
    submit(channel.queue().as_ref(), move || lock(&starting).start());
    channel.write(offset, data, move |event| lock(&transfer).handle(event));
}
