//! File handle facades.
//!
//! [`RandomAccessFile`] addresses the file by explicit offsets and can derive
//! a [`StreamFile`] over the same handle. [`StreamFile`] is an append-only
//! stream. Both are opened from a [`FileConfig`]:
//!
//! | Field | Default |
//! |-------|---------|
//! | `flags` | `CREATE \| READ_WRITE` |
//! | `permissions` | `USER_READ \| USER_WRITE` |
//! | `queue` | a new `SerialQueue` labelled `RandomAccessFile.<n>` or `StreamFile.<n>` |
//! | `cleanup` | no-op |
//! | `channel` | [`ChannelConfig::default`] |

use crate::channel::{noop_cleanup, ChannelConfig, CleanupHandler};
use crate::error::{ChannelResult, PosixError};
use crate::options::{OpenFlags, Permissions};
use crate::queue::{QueueRef, SerialQueue};
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

mod random_access;
mod stream;

pub use random_access::RandomAccessFile;
pub use stream::StreamFile;

static NEXT_QUEUE: AtomicU64 = AtomicU64::new(1);

/// Everything needed to open a file facade.
pub struct FileConfig {
    /// Path to open.
    pub path: PathBuf,
    /// Open flags.
    pub flags: OpenFlags,
    /// Mode applied if the file is created.
    pub permissions: Permissions,
    /// Callback queue; `None` creates a dedicated serial queue.
    pub queue: Option<QueueRef>,
    /// Called once when the channel releases its handle.
    pub cleanup: CleanupHandler,
    /// Channel settings.
    pub channel: ChannelConfig,
}

impl FileConfig {
    /// Defaults for `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            flags: OpenFlags::default(),
            permissions: Permissions::default(),
            queue: None,
            cleanup: noop_cleanup(),
            channel: ChannelConfig::default(),
        }
    }

    /// Set the open flags.
    pub fn flags(mut self, flags: OpenFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Set the creation mode.
    pub fn permissions(mut self, permissions: Permissions) -> Self {
        self.permissions = permissions;
        self
    }

    /// Deliver callbacks on `queue`.
    pub fn queue(mut self, queue: QueueRef) -> Self {
        self.queue = Some(queue);
        self
    }

    /// Set the cleanup handler.
    pub fn cleanup<F>(mut self, cleanup: F) -> Self
    where
        F: FnOnce(ChannelResult<()>) + Send + 'static,
    {
        self.cleanup = Box::new(cleanup);
        self
    }

    /// Set the channel settings.
    pub fn channel(mut self, channel: ChannelConfig) -> Self {
        self.channel = channel;
        self
    }

    fn queue_or_default(&mut self, kind: &str) -> ChannelResult<QueueRef> {
        if let Some(queue) = self.queue.take() {
            return Ok(queue);
        }
        let label = format!("{}.{}", kind, NEXT_QUEUE.fetch_add(1, Ordering::Relaxed));
        let queue: QueueRef = SerialQueue::new(label).map_err(PosixError::from)?;
        Ok(queue)
    }
}

impl fmt::Debug for FileConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileConfig")
            .field("path", &self.path)
            .field("flags", &self.flags)
            .field("permissions", &self.permissions)
            .field("queue", &self.queue.as_ref().map(|q| q.label()))
            .field("channel", &self.channel)
            .finish_non_exhaustive()
    }
}
