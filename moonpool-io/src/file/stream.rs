use super::FileConfig;
use crate::channel::{Channel, CloseMode, ReadLength, StreamDiscipline};
use crate::device::{Device, DeviceProvider, OsDevice, OsProvider};
use crate::error::ChannelResult;
use crate::options::{OpenFlags, Permissions};
use crate::transfer::{self, ProgressHandler};
use bytes::Bytes;
use std::fmt;
use std::path::{Path, PathBuf};

/// An append-only file read and written at its cursor.
///
/// Opening always adds [`OpenFlags::APPEND`]. Dropping the file closes its
/// channel without waiting for cleanup.
pub struct StreamFile<D: Device = OsDevice> {
    channel: Channel<D>,
    path: PathBuf,
    flags: OpenFlags,
    permissions: Permissions,
}

impl StreamFile<OsDevice> {
    /// Open a file on the local filesystem.
    pub fn open(config: FileConfig) -> ChannelResult<Self> {
        Self::open_with(&OsProvider::new(), config)
    }
}

impl<D: Device> StreamFile<D> {
    /// Open through `provider`.
    ///
    /// If opening fails the cleanup handler is dropped without being called.
    pub fn open_with<P>(provider: &P, mut config: FileConfig) -> ChannelResult<Self>
    where
        P: DeviceProvider<Device = D>,
    {
        let queue = config.queue_or_default("StreamFile")?;
        let flags = config.flags | OpenFlags::APPEND;
        let channel = Channel::open(
            provider,
            StreamDiscipline::Stream,
            &config.path,
            flags,
            config.permissions,
            queue,
            config.cleanup,
            config.channel,
        )?;
        tracing::debug!(
            "Opened stream file {} on channel {}",
            config.path.display(),
            channel.id()
        );
        Ok(Self {
            channel,
            path: config.path,
            flags,
            permissions: config.permissions,
        })
    }

    /// Wrap an open stream channel.
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

    /// Read `length` bytes from the cursor.
    pub fn read<C>(&self, length: impl Into<ReadLength>, completion: C)
    where
        C: FnOnce(ChannelResult<Bytes>) + Send + 'static,
    {
        self.read_with_progress(length, None, completion);
    }

    /// Read everything up to end of file.
    pub fn read_to_end<C>(&self, completion: C)
    where
        C: FnOnce(ChannelResult<Bytes>) + Send + 'static,
    {
        self.read_with_progress(ReadLength::ToEnd, None, completion);
    }

    /// Read `length` bytes from the cursor, reporting progress.
    pub fn read_with_progress<C>(
        &self,
        length: impl Into<ReadLength>,
        progress: Option<ProgressHandler>,
        completion: C,
    ) where
        C: FnOnce(ChannelResult<Bytes>) + Send + 'static,
    {
        transfer::read(&self.channel, 0, length.into(), progress, Box::new(completion));
    }

    /// Append `data`.
    pub fn write<C>(&self, data: impl Into<Bytes>, completion: C)
    where
        C: FnOnce(ChannelResult<()>) + Send + 'static,
    {
        self.write_with_progress(data, None, completion);
    }

    /// Append `data`, reporting progress.
    pub fn write_with_progress<C>(
        &self,
        data: impl Into<Bytes>,
        progress: Option<ProgressHandler>,
        completion: C,
    ) where
        C: FnOnce(ChannelResult<()>) + Send + 'static,
    {
        transfer::write(&self.channel, 0, data.into(), progress, Box::new(completion));
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

    /// The flags the channel was opened with.
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

impl<D: Device> fmt::Debug for StreamFile<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamFile")
            .field("path", &self.path)
            .field("flags", &self.flags)
            .field("permissions", &self.permissions)
            .field("channel", &self.channel)
            .finish()
    }
}
