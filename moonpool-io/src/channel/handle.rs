//! Shared device handle and its operation pipeline.
//!
//! Work from every channel registered on a handle goes through one FIFO.
//! A single pump job at a time is scheduled on the I/O queue; each pump moves
//! one chunk of the front operation, then reschedules itself while work
//! remains. Chunk results are posted to the owning channel's queue.

use super::{ChannelState, IoEvent, StreamDiscipline};
use crate::device::Device;
use crate::error::{ChannelResult, PosixError};
use crate::queue::{submit, QueueRef};
use bytes::{Buf, Bytes};
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

static NEXT_HANDLE_ID: AtomicU64 = AtomicU64::new(1);

type Handler<T> = dyn FnMut(IoEvent<T>) + Send;

/// Delivers the events of one operation to its handler on the channel queue.
pub(crate) struct EventSink<T> {
    channel: Arc<ChannelState>,
    handler: Arc<Mutex<Handler<T>>>,
}

impl<T: Send + 'static> EventSink<T> {
    pub(crate) fn new<H>(channel: Arc<ChannelState>, handler: H) -> Self
    where
        H: FnMut(IoEvent<T>) + Send + 'static,
    {
        let handler: Arc<Mutex<Handler<T>>> = Arc::new(Mutex::new(handler));
        Self { channel, handler }
    }

    pub(crate) fn deliver(&self, event: IoEvent<T>) {
        let handler = Arc::clone(&self.handler);
        submit(self.channel.queue.as_ref(), move || {
            let mut guard = handler.lock().unwrap_or_else(PoisonError::into_inner);
            let handler: &mut Handler<T> = &mut *guard;
            handler(event);
        });
    }

    fn cancelled(&self) -> bool {
        self.channel.is_cancelled()
    }
}

pub(crate) struct ReadOp {
    pub(crate) sink: EventSink<Bytes>,
    pub(crate) discipline: StreamDiscipline,
    pub(crate) offset: u64,
    /// `None` reads until end of file.
    pub(crate) remaining: Option<usize>,
}

pub(crate) struct WriteOp {
    pub(crate) sink: EventSink<usize>,
    pub(crate) discipline: StreamDiscipline,
    pub(crate) offset: u64,
    pub(crate) data: Bytes,
}

pub(crate) enum Work {
    Read(ReadOp),
    Write(WriteOp),
    Close(Arc<ChannelState>),
}

#[derive(Default)]
struct Pipeline {
    work: VecDeque<Work>,
    scheduled: bool,
}

/// A device shared by every channel registered on it.
pub(crate) struct SharedHandle<D> {
    id: u64,
    device: D,
    io_queue: QueueRef,
    chunk_size: usize,
    registrations: AtomicUsize,
    released: AtomicBool,
    pipeline: Mutex<Pipeline>,
}

impl<D: Device> SharedHandle<D> {
    pub(crate) fn new(device: D, io_queue: QueueRef, chunk_size: usize) -> Arc<Self> {
        Arc::new(Self {
            id: NEXT_HANDLE_ID.fetch_add(1, Ordering::Relaxed),
            device,
            io_queue,
            chunk_size: chunk_size.max(1),
            registrations: AtomicUsize::new(0),
            released: AtomicBool::new(false),
            pipeline: Mutex::new(Pipeline::default()),
        })
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn device(&self) -> &D {
        &self.device
    }

    pub(crate) fn register(&self) {
        self.registrations.fetch_add(1, Ordering::AcqRel);
    }

    /// Register another channel unless the last registration is gone.
    pub(crate) fn try_register(&self) -> bool {
        self.registrations
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
                (count > 0).then_some(count + 1)
            })
            .is_ok()
    }

    fn pipeline(&self) -> MutexGuard<'_, Pipeline> {
        self.pipeline.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn submit(self: &Arc<Self>, work: Work) {
        let schedule = {
            let mut pipeline = self.pipeline();
            pipeline.work.push_back(work);
            !std::mem::replace(&mut pipeline.scheduled, true)
        };
        if schedule {
            self.schedule_pump();
        }
    }

    fn schedule_pump(self: &Arc<Self>) {
        let handle = Arc::clone(self);
        submit(self.io_queue.as_ref(), move || handle.pump());
    }

    fn pump(self: &Arc<Self>) {
        let next = {
            let mut pipeline = self.pipeline();
            let next = pipeline.work.pop_front();
            if next.is_none() {
                pipeline.scheduled = false;
            }
            next
        };
        let Some(mut work) = next else {
            return;
        };

        let unfinished = match panic::catch_unwind(AssertUnwindSafe(|| self.step(&mut work))) {
            Ok(true) => None,
            Ok(false) => Some(work),
            Err(_) => {
                tracing::error!("Handle {} panicked during device I/O", self.id);
                self.abort(work);
                None
            }
        };

        let more = {
            let mut pipeline = self.pipeline();
            if let Some(work) = unfinished {
                pipeline.work.push_front(work);
            }
            if pipeline.work.is_empty() {
                pipeline.scheduled = false;
                false
            } else {
                true
            }
        };
        if more {
            self.schedule_pump();
        }
    }

    /// Move one chunk of `work`. Returns `true` once it has delivered its
    /// terminal event.
    fn step(&self, work: &mut Work) -> bool {
        match work {
            Work::Read(op) => self.step_read(op),
            Work::Write(op) => self.step_write(op),
            Work::Close(channel) => {
                let result = self.release();
                channel.finish_close(result);
                true
            }
        }
    }

    /// Deliver `EIO` as the terminal event of work whose step panicked.
    fn abort(&self, work: Work) {
        let error = PosixError::io();
        match work {
            Work::Read(op) => op.sink.deliver(IoEvent::Failed(error)),
            Work::Write(op) => op.sink.deliver(IoEvent::Failed(error)),
            Work::Close(channel) => channel.finish_close(Err(error)),
        }
    }

    fn step_read(&self, op: &mut ReadOp) -> bool {
        if op.sink.cancelled() {
            op.sink.deliver(IoEvent::Failed(PosixError::canceled()));
            return true;
        }
        let want = match op.remaining {
            Some(0) => {
                op.sink.deliver(IoEvent::Done(None));
                return true;
            }
            Some(remaining) => remaining.min(self.chunk_size),
            None => self.chunk_size,
        };

        let mut buf = vec![0u8; want];
        let result = match op.discipline {
            StreamDiscipline::Random => self.device.read_at(op.offset, &mut buf),
            StreamDiscipline::Stream => self.device.read_stream(&mut buf),
        };

        match result {
            Ok(0) => {
                tracing::trace!("Handle {} read reached end of file", self.id);
                op.sink.deliver(IoEvent::Done(None));
                true
            }
            Ok(read) => {
                let read = read.min(want);
                buf.truncate(read);
                op.offset += read as u64;
                if let Some(remaining) = op.remaining.as_mut() {
                    *remaining -= read;
                }
                tracing::trace!("Handle {} read {} bytes", self.id, read);

                let data = Bytes::from(buf);
                if op.remaining == Some(0) {
                    op.sink.deliver(IoEvent::Done(Some(data)));
                    true
                } else {
                    op.sink.deliver(IoEvent::Partial(data));
                    false
                }
            }
            Err(err) => {
                let error = PosixError::from(err);
                tracing::debug!("Handle {} read failed: {}", self.id, error);
                op.sink.deliver(IoEvent::Failed(error));
                true
            }
        }
    }

    fn step_write(&self, op: &mut WriteOp) -> bool {
        if op.sink.cancelled() {
            op.sink.deliver(IoEvent::Failed(PosixError::canceled()));
            return true;
        }
        if op.data.is_empty() {
            op.sink.deliver(IoEvent::Done(None));
            return true;
        }

        let len = op.data.len().min(self.chunk_size);
        let chunk = &op.data[..len];
        let result = match op.discipline {
            StreamDiscipline::Random => self.device.write_at(op.offset, chunk),
            StreamDiscipline::Stream => self.device.write_stream(chunk),
        };

        match result {
            Ok(0) => {
                tracing::debug!("Handle {} wrote nothing, failing write", self.id);
                op.sink.deliver(IoEvent::Failed(PosixError::io()));
                true
            }
            Ok(written) => {
                let written = written.min(len);
                op.data.advance(written);
                op.offset += written as u64;
                tracing::trace!("Handle {} wrote {} bytes", self.id, written);

                if op.data.is_empty() {
                    op.sink.deliver(IoEvent::Done(Some(written)));
                    true
                } else {
                    op.sink.deliver(IoEvent::Partial(written));
                    false
                }
            }
            Err(err) => {
                let error = PosixError::from(err);
                tracing::debug!("Handle {} write failed: {}", self.id, error);
                op.sink.deliver(IoEvent::Failed(error));
                true
            }
        }
    }

    /// Drop one registration, closing the device when it was the last.
    fn release(&self) -> ChannelResult<()> {
        let previous = match self.registrations.fetch_update(
            Ordering::AcqRel,
            Ordering::Acquire,
            |count| Some(count.saturating_sub(1)),
        ) {
            Ok(previous) | Err(previous) => previous,
        };
        if previous > 1 || self.released.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        tracing::debug!("Releasing device of handle {}", self.id);
        self.device.close().map_err(|err| {
            let error = PosixError::from(err);
            tracing::warn!("Closing device of handle {} failed: {}", self.id, error);
            error
        })
    }
}
