//! In-memory files with deterministic fault injection.
//!
//! File contents live in a shared buffer per path, so every device opened on
//! the same path of one [`MemoryProvider`] sees the same bytes. Faults are
//! decided per call from a `ChaCha8Rng` seeded by the provider seed and the
//! order in which devices were opened.

use super::{Device, DeviceProvider, FaultConfiguration};
use crate::options::{AccessMode, OpenFlags, Permissions};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

type Contents = Arc<Mutex<Vec<u8>>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn os_error(code: i32) -> io::Error {
    io::Error::from_raw_os_error(code)
}

/// Provider of in-memory files.
///
/// Clones share the same file table.
#[derive(Debug, Clone)]
pub struct MemoryProvider {
    inner: Arc<ProviderInner>,
}

#[derive(Debug)]
struct ProviderInner {
    files: Mutex<HashMap<PathBuf, Contents>>,
    faults: FaultConfiguration,
    seed: u64,
    opened: AtomicU64,
    closes: Arc<AtomicUsize>,
}

impl MemoryProvider {
    /// Create a fault-free provider.
    pub fn new() -> Self {
        Self::with_faults(FaultConfiguration::none(), 0)
    }

    /// Create a provider whose devices inject faults from `faults`.
    pub fn with_faults(faults: FaultConfiguration, seed: u64) -> Self {
        Self {
            inner: Arc::new(ProviderInner {
                files: Mutex::new(HashMap::new()),
                faults,
                seed,
                opened: AtomicU64::new(0),
                closes: Arc::new(AtomicUsize::new(0)),
            }),
        }
    }

    /// Create or replace a file.
    pub fn insert(&self, path: impl Into<PathBuf>, data: impl Into<Vec<u8>>) {
        lock(&self.inner.files).insert(path.into(), Arc::new(Mutex::new(data.into())));
    }

    /// Snapshot of a file's contents.
    pub fn contents(&self, path: impl AsRef<Path>) -> Option<Vec<u8>> {
        lock(&self.inner.files)
            .get(path.as_ref())
            .map(|contents| lock(contents).clone())
    }

    /// Number of devices of this provider that have been closed.
    pub fn close_count(&self) -> usize {
        self.inner.closes.load(Ordering::SeqCst)
    }
}

impl Default for MemoryProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceProvider for MemoryProvider {
    type Device = MemoryDevice;

    fn open(
        &self,
        path: &Path,
        flags: OpenFlags,
        _permissions: Permissions,
    ) -> io::Result<MemoryDevice> {
        let contents = {
            let mut files = lock(&self.inner.files);
            match files.get(path).cloned() {
                Some(_) if flags.contains(OpenFlags::CREATE | OpenFlags::EXCLUSIVE) => {
                    return Err(os_error(libc::EEXIST));
                }
                Some(existing) => existing,
                None if flags.contains(OpenFlags::CREATE) => {
                    let created: Contents = Arc::new(Mutex::new(Vec::new()));
                    files.insert(path.to_path_buf(), Arc::clone(&created));
                    created
                }
                None => return Err(os_error(libc::ENOENT)),
            }
        };

        let index = self.inner.opened.fetch_add(1, Ordering::SeqCst);
        tracing::debug!("Opened memory file {} as device {}", path.display(), index);

        Ok(MemoryDevice {
            contents,
            access: flags.access_mode(),
            append: flags.contains(OpenFlags::APPEND),
            faults: self.inner.faults.clone(),
            state: Mutex::new(DeviceState::new(self.inner.seed.wrapping_add(index))),
            closes: Some(Arc::clone(&self.inner.closes)),
        })
    }
}

#[derive(Debug)]
struct DeviceState {
    cursor: u64,
    bytes_read: u64,
    bytes_written: u64,
    closed: bool,
    rng: ChaCha8Rng,
}

impl DeviceState {
    fn new(seed: u64) -> Self {
        Self {
            cursor: 0,
            bytes_read: 0,
            bytes_written: 0,
            closed: false,
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    fn roll(&mut self, probability: f64) -> bool {
        probability > 0.0 && self.rng.random_bool(probability.min(1.0))
    }
}

/// An in-memory file.
#[derive(Debug)]
pub struct MemoryDevice {
    contents: Contents,
    access: AccessMode,
    append: bool,
    faults: FaultConfiguration,
    state: Mutex<DeviceState>,
    closes: Option<Arc<AtomicUsize>>,
}

impl MemoryDevice {
    /// A standalone read-write device holding `data`, without faults.
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self {
            contents: Arc::new(Mutex::new(data.into())),
            access: AccessMode::ReadWrite,
            append: false,
            faults: FaultConfiguration::none(),
            state: Mutex::new(DeviceState::new(0)),
            closes: None,
        }
    }

    /// Replace the fault configuration and reseed the fault generator.
    pub fn with_faults(mut self, faults: FaultConfiguration, seed: u64) -> Self {
        self.faults = faults;
        self.state = Mutex::new(DeviceState::new(seed));
        self
    }

    /// Snapshot of the current contents.
    pub fn contents(&self) -> Vec<u8> {
        lock(&self.contents).clone()
    }

    /// Whether [`Device::close`] has been called.
    pub fn is_closed(&self) -> bool {
        lock(&self.state).closed
    }

    fn fault(&self, what: &str) -> io::Error {
        tracing::info!("Injected {} fault (errno {})", what, self.faults.error_code);
        os_error(self.faults.error_code)
    }

    fn read_inner(&self, position: Option<u64>, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = lock(&self.state);
        if state.closed || !self.access.readable() {
            return Err(os_error(libc::EBADF));
        }
        if state.roll(self.faults.read_fault_probability) {
            return Err(self.fault("read"));
        }
        let budget = match self.faults.fail_reads_after {
            Some(limit) if state.bytes_read >= limit => return Err(self.fault("read cutoff")),
            Some(limit) => Some(limit - state.bytes_read),
            None => None,
        };

        let contents = lock(&self.contents);
        let offset = position.unwrap_or(state.cursor);
        let start = usize::try_from(offset)
            .unwrap_or(usize::MAX)
            .min(contents.len());

        let mut len = buf.len().min(contents.len() - start);
        if let Some(max) = self.faults.max_transfer_size {
            len = len.min(max.max(1));
        }
        if let Some(budget) = budget {
            len = len.min(usize::try_from(budget).unwrap_or(usize::MAX));
        }

        buf[..len].copy_from_slice(&contents[start..start + len]);
        state.bytes_read += len as u64;
        if position.is_none() {
            state.cursor = (start + len) as u64;
        }
        Ok(len)
    }

    fn write_inner(&self, position: Option<u64>, data: &[u8]) -> io::Result<usize> {
        let mut state = lock(&self.state);
        if state.closed || !self.access.writable() {
            return Err(os_error(libc::EBADF));
        }
        if state.roll(self.faults.write_fault_probability) {
            return Err(self.fault("write"));
        }
        let budget = match self.faults.fail_writes_after {
            Some(limit) if state.bytes_written >= limit => {
                return Err(self.fault("write cutoff"));
            }
            Some(limit) => Some(limit - state.bytes_written),
            None => None,
        };

        let mut contents = lock(&self.contents);
        let offset = if self.append {
            contents.len() as u64
        } else {
            position.unwrap_or(state.cursor)
        };
        let start = usize::try_from(offset).map_err(|_| os_error(libc::EFBIG))?;

        let mut len = data.len();
        if let Some(max) = self.faults.max_transfer_size {
            len = len.min(max.max(1));
        }
        if let Some(budget) = budget {
            len = len.min(usize::try_from(budget).unwrap_or(usize::MAX));
        }

        let end = start
            .checked_add(len)
            .filter(|&end| end <= isize::MAX as usize)
            .ok_or_else(|| os_error(libc::EFBIG))?;
        if contents.len() < end {
            contents.resize(end, 0);
        }
        contents[start..end].copy_from_slice(&data[..len]);
        state.bytes_written += len as u64;
        if position.is_none() {
            state.cursor = end as u64;
        }
        Ok(len)
    }
}

impl Device for MemoryDevice {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        self.read_inner(Some(offset), buf)
    }

    fn write_at(&self, offset: u64, data: &[u8]) -> io::Result<usize> {
        self.write_inner(Some(offset), data)
    }

    fn read_stream(&self, buf: &mut [u8]) -> io::Result<usize> {
        self.read_inner(None, buf)
    }

    fn write_stream(&self, data: &[u8]) -> io::Result<usize> {
        self.write_inner(None, data)
    }

    fn close(&self) -> io::Result<()> {
        let mut state = lock(&self.state);
        if state.closed {
            return Ok(());
        }
        state.closed = true;
        if let Some(closes) = &self.closes {
            closes.fetch_add(1, Ordering::SeqCst);
        }
        if state.roll(self.faults.close_fault_probability) {
            return Err(self.fault("close"));
        }
        Ok(())
    }
}
