//! Open flags and permission bits.
//!
//! Both sets carry the OS-native numeric values (`O_*` and `S_I*` from
//! `libc`), so they can be handed to the operating system unchanged.

use bitflags::bitflags;

bitflags! {
    /// Flags controlling how a file is opened.
    ///
    /// The access mode flags ([`READ_ONLY`](Self::READ_ONLY),
    /// [`WRITE_ONLY`](Self::WRITE_ONLY), [`READ_WRITE`](Self::READ_WRITE))
    /// are mutually exclusive. The set does not enforce this; callers must
    /// pass a valid combination. `O_RDONLY` is `0` on POSIX systems, so use
    /// [`OpenFlags::access_mode`] rather than `contains` to inspect the mode.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct OpenFlags: libc::c_int {
        /// Writes always land at the end of the file.
        const APPEND = libc::O_APPEND;
        /// Create the file if it does not exist.
        const CREATE = libc::O_CREAT;
        /// With `CREATE`, fail if the file already exists.
        const EXCLUSIVE = libc::O_EXCL;
        /// Open in non-blocking mode.
        const NON_BLOCKING = libc::O_NONBLOCK;
        /// Open for reading only.
        const READ_ONLY = libc::O_RDONLY;
        /// Open for writing only.
        const WRITE_ONLY = libc::O_WRONLY;
        /// Open for reading and writing.
        const READ_WRITE = libc::O_RDWR;
    }
}

/// The access mode encoded in an [`OpenFlags`] value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessMode {
    /// `O_RDONLY`
    ReadOnly,
    /// `O_WRONLY`
    WriteOnly,
    /// `O_RDWR`
    ReadWrite,
}

impl AccessMode {
    /// Whether reads are permitted.
    pub fn readable(self) -> bool {
        matches!(self, AccessMode::ReadOnly | AccessMode::ReadWrite)
    }

    /// Whether writes are permitted.
    pub fn writable(self) -> bool {
        matches!(self, AccessMode::WriteOnly | AccessMode::ReadWrite)
    }
}

impl OpenFlags {
    /// Decode the access mode from the `O_ACCMODE` bits.
    ///
    /// An invalid combination (both `O_WRONLY` and `O_RDWR`) decodes as
    /// read-write.
    pub fn access_mode(self) -> AccessMode {
        match self.bits() & libc::O_ACCMODE {
            libc::O_RDONLY => AccessMode::ReadOnly,
            libc::O_WRONLY => AccessMode::WriteOnly,
            _ => AccessMode::ReadWrite,
        }
    }

    /// Everything except the access mode bits.
    pub fn creation_flags(self) -> libc::c_int {
        self.bits() & !libc::O_ACCMODE
    }
}

impl Default for OpenFlags {
    /// `CREATE | READ_WRITE`
    fn default() -> Self {
        OpenFlags::CREATE | OpenFlags::READ_WRITE
    }
}

bitflags! {
    /// Permission bits applied when a file is created.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Permissions: libc::mode_t {
        /// Owner read, write and execute.
        const USER_RWX = libc::S_IRWXU;
        /// Owner read.
        const USER_READ = libc::S_IRUSR;
        /// Owner write.
        const USER_WRITE = libc::S_IWUSR;
        /// Owner execute.
        const USER_EXEC = libc::S_IXUSR;

        /// Group read, write and execute.
        const GROUP_RWX = libc::S_IRWXG;
        /// Group read.
        const GROUP_READ = libc::S_IRGRP;
        /// Group write.
        const GROUP_WRITE = libc::S_IWGRP;
        /// Group execute.
        const GROUP_EXEC = libc::S_IXGRP;

        /// Others read, write and execute.
        const OTHERS_RWX = libc::S_IRWXO;
        /// Others read.
        const OTHERS_READ = libc::S_IROTH;
        /// Others write.
        const OTHERS_WRITE = libc::S_IWOTH;
        /// Others execute.
        const OTHERS_EXEC = libc::S_IXOTH;
    }
}

impl Permissions {
    /// The mode value as passed to `open(2)`.
    pub fn mode(self) -> u32 {
        u32::from(self.bits())
    }
}

impl Default for Permissions {
    /// `USER_READ | USER_WRITE`
    fn default() -> Self {
        Permissions::USER_READ | Permissions::USER_WRITE
    }
}
