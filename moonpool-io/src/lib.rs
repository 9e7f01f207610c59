//! # moonpool-io
//!
//! Asynchronous chunked file I/O over callback-driven channels.
//!
//! The crate is layered, leaves first:
//!
//! - **Channel** ([`Channel`]): one shared device handle bound to a callback
//!   queue. Reads and writes are moved one chunk at a time; each operation
//!   reports zero or more partial events and exactly one terminal event.
//! - **Transfer engine** ([`transfer`]): turns those events into progress
//!   notifications and a single completion, owning the accumulation buffer
//!   until it is handed over.
//! - **File facades** ([`RandomAccessFile`], [`StreamFile`]): open a path
//!   from a [`FileConfig`] and expose read/write with completions, plus
//!   `async` adapters (see [`future`]).
//!
//! ## Collaborators
//!
//! - [`ExecutionQueue`]: where callbacks and device I/O run.
//!   [`SerialQueue`] uses a dedicated thread, [`ManualQueue`] is stepped by
//!   tests.
//! - [`DeviceProvider`]: how paths are opened. [`OsProvider`] opens real
//!   files, [`MemoryProvider`] keeps files in memory with seeded fault
//!   injection.
//!
//! ## Errors
//!
//! Every failure is a [`PosixError`]. Open failures are returned from the
//! constructor, operation failures reach that operation's completion, and
//! teardown failures reach the cleanup handler.

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]

pub mod channel;
pub mod device;
mod error;
mod file;
pub mod future;
mod options;
pub mod queue;
pub mod transfer;

// Channel exports
pub use channel::{
    noop_cleanup, Channel, ChannelConfig, CleanupHandler, CloseMode, IoEvent, ReadLength,
    StreamDiscipline, DEFAULT_CHUNK_SIZE,
};

// Device exports
pub use device::{
    Device, DeviceProvider, FaultConfiguration, MemoryDevice, MemoryProvider, OsDevice, OsProvider,
};

// Error exports
pub use error::{ChannelResult, PosixError};

// File exports
pub use file::{FileConfig, RandomAccessFile, StreamFile};

// Option exports
pub use options::{AccessMode, OpenFlags, Permissions};

// Queue exports
pub use queue::{ExecutionQueue, ManualQueue, QueueRef, SerialQueue};

// Transfer exports
pub use transfer::{
    Progress, ProgressHandler, ReadCompletion, ReadTransfer, TransferState, WriteCompletion,
    WriteTransfer,
};
