use super::{FileConfig, StreamFile};
use crate::channel::{Channel, CloseMode, ReadLength, StreamDiscipline};
use crate::device::{Device, DeviceProvider, OsDevice, OsProvider};
use crate::error::ChannelResult;
use crate::options::{OpenFlags, Permissions};
use crate::queue::QueueRef;
use crate::transfer::{self, ProgressHandler};
use bytes::Bytes;
use std::fmt;
use std::path::{Path, PathBuf};

/// A file read and written at explicit offsets.
///
/// Dropping the file closes its channel without waiting for cleanup.
pub struct RandomAccessFile<D: Device = OsDevice> {
    channel: Channel<D>,
    path: PathBuf,
    flags: OpenFlags,
    permissions: Permissions,
}

impl RandomAccessFile<OsDevice> {
    /// Open a file on the local filesystem.
    pub fn open(config: FileConfig) -> ChannelResult<Self> {
        Self::open_with(&OsProvider::new(), config)
    }
}

impl<D: Device> RandomAccessFile<D> {
    /// Open through `provider`.
    ///
    /// If opening fails the cleanup handler is dropped without being called.
    pub fn open_with<P>(provider: &P, mut config: FileConfig) -> ChannelResult<Self>
    where
        P: DeviceProvider<Device = D>,
    {
        let queue = config.queue_or_default("RandomAccessFile")?;
        let channel = Channel::open(
            provider,
            StreamDiscipline::Random,
            &config.path,
            config.flags,
            config.permissions,
            queue,
            config.cleanup,
            config.channel,
        )?;
        tracing::debug!(
            "Opened random access file {} on channel {}",
            config.path.display(),
            channel.id()
        );
        Ok(Self {
            channel,
            path: config.path,
            flags: config.flags,
            permissions: config.permissions,
        })
    }

    /// Wrap an open random-access channel.
    pub fn from_channel(
        channel: Channel<D>,
        path: impl Into<PathBuf>,
        flags: OpenFlags,
        permissions: Permissions,
    ) -> Self {
        Self {
            channel,
            path: path.into(),
            flags,
            permissions,
        }
    }

    /// Read `length` bytes at `offset`.
    pub fn read<C>(&self, offset: u64, length: impl Into<ReadLength>, completion: C)
    where
        C: FnOnce(ChannelResult<Bytes>) + Send + 'static,
    {
        self.read_with_progress(offset, length, None, completion);
    }

    /// Read `length` bytes at `offset`, reporting progress.
    pub fn read_with_progress<C>(
        &self,
        offset: u64,
        length: impl Into<ReadLength>,
        progress: Option<ProgressHandler>,
        completion: C,
    ) where
        C: FnOnce(ChannelResult<Bytes>) + Send + 'static,
    {
        transfer::read(
            &self.channel,
            offset,
            length.into(),
            progress,
            Box::new(completion),
        );
    }

    /// Write `data` at `offset`.
    pub fn write<C>(&self, offset: u64, data: impl Into<Bytes>, completion: C)
    where
        C: FnOnce(ChannelResult<()>) + Send + 'static,
    {
        self.write_with_progress(offset, data, None, completion);
    }

    /// Write `data` at `offset`, reporting progress.
    pub fn write_with_progress<C>(
        &self,
        offset: u64,
        data: impl Into<Bytes>,
        progress: Option<ProgressHandler>,
        completion: C,
    ) where
        C: FnOnce(ChannelResult<()>) + Send + 'static,
    {
        transfer::write(
            &self.channel,
            offset,
            data.into(),
            progress,
            Box::new(completion),
        );
    }

    /// A stream facade over the same handle, on this file's queue.
    pub fn stream(&self) -> StreamFile<D> {
        self.derive_stream(None)
    }

    /// A stream facade over the same handle, delivering on `queue`.
    pub fn stream_on(&self, queue: QueueRef) -> StreamFile<D> {
        self.derive_stream(Some(queue))
    }

    fn derive_stream(&self, queue: Option<QueueRef>) -> StreamFile<D> {
        let channel = self.channel.derive(StreamDiscipline::Stream, queue, None);
        tracing::debug!(
            "Derived stream channel {} from random access channel {}",
            channel.id(),
            self.channel.id()
        );
        StreamFile::from_channel(channel, self.path.clone(), self.flags, self.permissions)
    }

    /// Close the channel, letting submitted operations finish.
    pub fn close(&self) {
        self.channel.close();
    }

    /// Close the channel with an explicit mode.
    pub fn close_with(&self, mode: CloseMode) {
        self.channel.close_with(mode);
    }

    /// The path this file was opened with.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The flags this file was opened with.
    pub fn flags(&self) -> OpenFlags {
        self.flags
    }

    /// The creation mode this file was opened with.
    pub fn permissions(&self) -> Permissions {
        self.permissions
    }

    /// The underlying channel.
    pub fn channel(&self) -> &Channel<D> {
        &self.channel
    }
}

impl<D: Device> fmt::Debug for RandomAccessFile<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RandomAccessFile")
            .field("path", &self.path)
            .field("flags", &self.flags)
            .field("permissions", &self.permissions)
            .field("channel", &self.channel)
            .finish()
    }
}
