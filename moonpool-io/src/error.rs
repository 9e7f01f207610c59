//! Error types for channel and file operations.
//!
//! Every failure surfaced by this crate is a [`PosixError`]: the raw OS error
//! code reported by open, read, write or close. The three places an error can
//! show up never overlap:
//!
//! | Failure | Reported through |
//! |---------|------------------|
//! | Opening a path | `Err` from the constructor (cleanup never runs) |
//! | Read / write | The operation's completion callback |
//! | Closing the handle | The channel's cleanup handler |

use std::io;
use thiserror::Error;

/// A POSIX I/O error carrying the raw OS error code.
///
/// A code of `0` means "no error" and is never represented by this type;
/// use [`PosixError::new`] to map a raw code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
#[error("posix error {code}: {}", describe(.code))]
pub struct PosixError {
    code: i32,
}

fn describe(code: &i32) -> String {
    io::Error::from_raw_os_error(*code).to_string()
}

impl PosixError {
    /// Map a raw OS error code, returning `None` for `0`.
    pub fn new(code: i32) -> Option<Self> {
        (code != 0).then_some(Self { code })
    }

    /// The raw OS error code.
    pub fn code(&self) -> i32 {
        self.code
    }

    /// `ECANCELED`: the operation was abandoned because its channel closed.
    pub fn canceled() -> Self {
        Self {
            code: libc::ECANCELED,
        }
    }

    /// `EIO`: generic I/O failure.
    pub fn io() -> Self {
        Self { code: libc::EIO }
    }

    /// Whether this error is `ECANCELED`.
    pub fn is_canceled(&self) -> bool {
        self.code == libc::ECANCELED
    }

    /// The `std::io::ErrorKind` matching this code.
    pub fn kind(&self) -> io::ErrorKind {
        io::Error::from_raw_os_error(self.code).kind()
    }
}

impl From<io::Error> for PosixError {
    fn from(err: io::Error) -> Self {
        match err.raw_os_error().and_then(PosixError::new) {
            Some(error) => error,
            None => {
                tracing::trace!("io error without os code mapped to EIO: {}", err);
                PosixError::io()
            }
        }
    }
}

impl From<PosixError> for io::Error {
    fn from(err: PosixError) -> Self {
        io::Error::from_raw_os_error(err.code)
    }
}

/// A type alias for `Result<T, PosixError>`.
pub type ChannelResult<T> = Result<T, PosixError>;
