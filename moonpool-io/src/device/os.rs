//! Devices backed by real file descriptors.

use super::{Device, DeviceProvider};
use crate::options::{AccessMode, OpenFlags, Permissions};
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::fd::{IntoRawFd, OwnedFd};
use std::os::unix::fs::{FileExt, OpenOptionsExt};
use std::path::Path;
use std::sync::{Mutex, PoisonError};

/// Provider opening real files with `open(2)` semantics.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsProvider;

impl OsProvider {
    /// Create a new OS provider.
    pub fn new() -> Self {
        Self
    }
}

impl DeviceProvider for OsProvider {
    type Device = OsDevice;

    fn open(&self, path: &Path, flags: OpenFlags, permissions: Permissions) -> io::Result<OsDevice> {
        let mut options = OpenOptions::new();
        match flags.access_mode() {
            AccessMode::ReadOnly => {
                options.read(true);
            }
            AccessMode::WriteOnly => {
                options.write(true);
            }
            AccessMode::ReadWrite => {
                options.read(true).write(true);
            }
        }
        // O_CREAT, O_EXCL, O_APPEND and O_NONBLOCK pass through untouched so
        // that e.g. read-only creation keeps POSIX meaning.
        options
            .custom_flags(flags.creation_flags())
            .mode(permissions.mode());

        let file = options.open(path)?;
        tracing::debug!("Opened {} with flags {:?}", path.display(), flags);
        Ok(OsDevice::from(file))
    }
}

/// An open file descriptor.
///
/// Closing goes through `close(2)` directly so that errors reported by the
/// kernel at close time reach the caller instead of being swallowed by drop.
#[derive(Debug)]
pub struct OsDevice {
    file: Mutex<Option<File>>,
}

impl OsDevice {
    fn with_file<T>(&self, mut op: impl FnMut(&File) -> io::Result<T>) -> io::Result<T> {
        let guard = self.file.lock().unwrap_or_else(PoisonError::into_inner);
        match guard.as_ref() {
            Some(file) => retry_interrupted(|| op(file)),
            None => Err(io::Error::from_raw_os_error(libc::EBADF)),
        }
    }
}

fn retry_interrupted<T>(mut op: impl FnMut() -> io::Result<T>) -> io::Result<T> {
    loop {
        match op() {
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            other => return other,
        }
    }
}

impl From<File> for OsDevice {
    fn from(file: File) -> Self {
        Self {
            file: Mutex::new(Some(file)),
        }
    }
}

impl From<OwnedFd> for OsDevice {
    fn from(fd: OwnedFd) -> Self {
        Self::from(File::from(fd))
    }
}

impl Device for OsDevice {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        self.with_file(|file| file.read_at(buf, offset))
    }

    fn write_at(&self, offset: u64, data: &[u8]) -> io::Result<usize> {
        self.with_file(|file| file.write_at(data, offset))
    }

    fn read_stream(&self, buf: &mut [u8]) -> io::Result<usize> {
        self.with_file(|mut file| file.read(buf))
    }

    fn write_stream(&self, data: &[u8]) -> io::Result<usize> {
        self.with_file(|mut file| file.write(data))
    }

    fn close(&self) -> io::Result<()> {
        let file = self
            .file
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(file) = file else {
            return Ok(());
        };

        let fd = file.into_raw_fd();
        // SAFETY: `fd` was just released from an owned `File`; nothing else
        // refers to it, so closing it here is the only close.
        if unsafe { libc::close(fd) } == -1 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}
