//! Devices: the OS-level handle a channel performs I/O against.
//!
//! A [`Device`] is the synchronous primitive layer (positioned and sequential
//! read/write, close). A [`DeviceProvider`] opens devices by path. Channels
//! only ever touch a device from their handle's I/O queue.
//!
//! ## Implementations
//!
//! - [`OsProvider`] / [`OsDevice`]: real POSIX files
//! - [`MemoryProvider`] / [`MemoryDevice`]: in-memory files with seeded fault
//!   injection, configured through [`FaultConfiguration`]

use crate::options::{OpenFlags, Permissions};
use std::io;
use std::path::Path;

/// Fault injection settings for in-memory devices
pub mod faults;

/// In-memory devices with deterministic fault injection
pub mod memory;

/// Real file descriptors
pub mod os;

pub use faults::FaultConfiguration;
pub use memory::{MemoryDevice, MemoryProvider};
pub use os::{OsDevice, OsProvider};

/// Synchronous I/O primitives of one open file.
///
/// Each call may transfer fewer bytes than requested; the channel keeps
/// calling until the operation is satisfied, reaches end of file, or fails.
pub trait Device: Send + Sync + 'static {
    /// Read up to `buf.len()` bytes at `offset`. `Ok(0)` means end of file.
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize>;

    /// Write up to `data.len()` bytes at `offset`.
    fn write_at(&self, offset: u64, data: &[u8]) -> io::Result<usize>;

    /// Read up to `buf.len()` bytes at the file cursor, advancing it.
    fn read_stream(&self, buf: &mut [u8]) -> io::Result<usize>;

    /// Write up to `data.len()` bytes at the file cursor, advancing it.
    fn write_stream(&self, data: &[u8]) -> io::Result<usize>;

    /// Release the underlying handle. Called at most once per device.
    fn close(&self) -> io::Result<()>;
}

/// Opens devices by path.
pub trait DeviceProvider: Clone + Send + Sync + 'static {
    /// The device type produced by this provider.
    type Device: Device;

    /// Open `path` with the given flags and creation mode.
    fn open(
        &self,
        path: &Path,
        flags: OpenFlags,
        permissions: Permissions,
    ) -> io::Result<Self::Device>;
}
