//! `async` adapters over the callback API.
//!
//! Each adapter submits the operation and awaits its completion through a
//! `tokio::sync::oneshot` channel. If the completion is dropped without being
//! called (its queue shut down, for instance) the future resolves to
//! `ECANCELED`.
//!
//! ```no_run
//! # async fn demo() -> moonpool_io::ChannelResult<()> {
//! use moonpool_io::{FileConfig, RandomAccessFile};
//!
//! let file = RandomAccessFile::open(FileConfig::new("/tmp/data.bin"))?;
//! file.write_at(0, &b"hello"[..]).await?;
//! let data = file.read_at(0, 5usize).await?;
//! assert_eq!(&data[..], b"hello");
//! # Ok(())
//! # }
//! ```

use crate::channel::ReadLength;
use crate::device::Device;
use crate::error::{ChannelResult, PosixError};
use crate::file::{RandomAccessFile, StreamFile};
use bytes::Bytes;
use tokio::sync::oneshot;

fn completion<T: Send + 'static>() -> (
    impl FnOnce(ChannelResult<T>) + Send + 'static,
    oneshot::Receiver<ChannelResult<T>>,
) {
    let (tx, rx) = oneshot::channel();
    let complete = move |result: ChannelResult<T>| {
        if tx.send(result).is_err() {
            tracing::trace!("Completion receiver dropped before the operation finished");
        }
    };
    (complete, rx)
}

async fn outcome<T>(rx: oneshot::Receiver<ChannelResult<T>>) -> ChannelResult<T> {
    rx.await.map_err(|_| PosixError::canceled())?
}

impl<D: Device> RandomAccessFile<D> {
    /// Read `length` bytes at `offset`.
    pub async fn read_at(&self, offset: u64, length: impl Into<ReadLength>) -> ChannelResult<Bytes> {
        let (complete, rx) = completion();
        self.read(offset, length, complete);
        outcome(rx).await
    }

    /// Write `data` at `offset`.
    pub async fn write_at(&self, offset: u64, data: impl Into<Bytes>) -> ChannelResult<()> {
        let (complete, rx) = completion();
        self.write(offset, data, complete);
        outcome(rx).await
    }
}

impl<D: Device> StreamFile<D> {
    /// Read `length` bytes from the cursor.
    pub async fn fetch(&self, length: impl Into<ReadLength>) -> ChannelResult<Bytes> {
        let (complete, rx) = completion();
        self.read(length, complete);
        outcome(rx).await
    }

    /// Append `data`.
    pub async fn append(&self, data: impl Into<Bytes>) -> ChannelResult<()> {
        let (complete, rx) = completion();
        self.write(data, complete);
        outcome(rx).await
    }
}
