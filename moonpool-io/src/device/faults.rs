//! # Fault Injection Configuration
//!
//! Settings for [`MemoryDevice`](super::MemoryDevice) fault injection. Faults
//! are drawn from a seeded `ChaCha8Rng`, so a given seed and operation
//! sequence always fails the same way.
//!
//! | Fault | Config Field | Default | Real-World Scenario |
//! |-------|--------------|---------|---------------------|
//! | Read fault | `read_fault_probability` | 0% | Media errors, ECC failures |
//! | Write fault | `write_fault_probability` | 0% | Bad sectors, disk full |
//! | Close fault | `close_fault_probability` | 0% | Deferred write-back errors on NFS |
//! | Short transfer | `max_transfer_size` | none | Pipes, sockets, signal interruption |
//! | Read cutoff | `fail_reads_after` | none | Device failure mid-stream |
//! | Write cutoff | `fail_writes_after` | none | Disk filling up mid-write |

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Fault injection settings for in-memory devices.
#[derive(Debug, Clone, PartialEq)]
pub struct FaultConfiguration {
    /// Probability of a read call failing (0.0 - 1.0).
    pub read_fault_probability: f64,

    /// Probability of a write call failing (0.0 - 1.0).
    pub write_fault_probability: f64,

    /// Probability of close failing (0.0 - 1.0).
    ///
    /// The handle is released either way; only the reported result changes.
    pub close_fault_probability: f64,

    /// Upper bound on bytes moved by a single read or write call.
    pub max_transfer_size: Option<usize>,

    /// Reads fail once this many bytes have been read from the device.
    ///
    /// The call that crosses the limit is shortened to end exactly on it.
    pub fail_reads_after: Option<u64>,

    /// Writes fail once this many bytes have been written to the device.
    ///
    /// The call that crosses the limit is shortened to end exactly on it, so
    /// a transfer observes a partial write followed by an error.
    pub fail_writes_after: Option<u64>,

    /// OS error code reported by injected faults.
    pub error_code: i32,
}

impl Default for FaultConfiguration {
    fn default() -> Self {
        Self {
            read_fault_probability: 0.0,
            write_fault_probability: 0.0,
            close_fault_probability: 0.0,
            max_transfer_size: None,
            fail_reads_after: None,
            fail_writes_after: None,
            error_code: libc::EIO,
        }
    }
}

impl FaultConfiguration {
    /// No faults at all.
    pub fn none() -> Self {
        Self::default()
    }

    /// Writes succeed for `bytes` bytes, then fail.
    pub fn fail_writes_after(bytes: u64) -> Self {
        Self {
            fail_writes_after: Some(bytes),
            ..Self::default()
        }
    }

    /// Reads succeed for `bytes` bytes, then fail.
    pub fn fail_reads_after(bytes: u64) -> Self {
        Self {
            fail_reads_after: Some(bytes),
            ..Self::default()
        }
    }

    /// Every close reports an error.
    pub fn failing_close() -> Self {
        Self {
            close_fault_probability: 1.0,
            ..Self::default()
        }
    }

    /// Each call moves at most `max` bytes.
    pub fn short_transfers(max: usize) -> Self {
        Self {
            max_transfer_size: Some(max),
            ..Self::default()
        }
    }

    /// Set the error code reported by injected faults.
    pub fn with_error_code(mut self, code: i32) -> Self {
        self.error_code = code;
        self
    }

    /// Randomized configuration for chaos testing.
    ///
    /// Probabilities stay low (at most 5%) so that most operations complete
    /// and the rare failures land at varied points of a transfer.
    pub fn random_for_seed(seed: u64) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        Self {
            read_fault_probability: rng.random_range(0..50) as f64 / 1_000.0,
            write_fault_probability: rng.random_range(0..50) as f64 / 1_000.0,
            close_fault_probability: rng.random_range(0..50) as f64 / 1_000.0,
            max_transfer_size: Some(rng.random_range(1..4096)),
            fail_reads_after: None,
            fail_writes_after: None,
            error_code: libc::EIO,
        }
    }
}
