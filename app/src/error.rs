//! error types of this filesystem
//!
//! Failures come in two tiers:
//! - reported failures, which a system call hands back to its caller
//!   (a missing path, a full disk, a name collision ...)
//! - [Invariant] violations, which mean in-memory or on-disk state is no
//!   longer trustworthy. A kernel would halt on these; here they travel as
//!   [FsError::Fatal] so the operation stops immediately and tests can
//!   observe them without crashing the harness.
use thiserror::Error;

pub type Result<T, E = FsError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum FsError {
    #[error("no such file or directory")]
    NotFound,
    #[error("name already exists")]
    Exists,
    #[error("not a directory")]
    NotDirectory,
    #[error("is a directory")]
    IsDirectory,
    #[error("operation not permitted by open mode")]
    PermissionDenied,
    #[error("directory not empty")]
    NotEmpty,
    #[error("no free data blocks")]
    NoSpace,
    #[error("no free inodes")]
    NoInodes,
    #[error("write of {len} bytes at offset {offset} exceeds the maximum file size")]
    FileTooLarge { offset: u32, len: usize },
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
    #[error("too many open files")]
    TooManyOpenFiles,
    #[error("cross-device link")]
    CrossDevice,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("internal consistency error: {0}")]
    Fatal(#[from] Invariant),
}

/// violations that would panic a kernel
#[derive(Debug, Error, PartialEq, Eq)]
pub enum Invariant {
    #[error("inode lock discipline violated: {0}")]
    LockDiscipline(&'static str),
    #[error("freeing free block {0}")]
    DoubleFree(u32),
    #[error("inode cache exhausted ({0} slots in use)")]
    CacheExhausted(usize),
    #[error("short directory record read at offset {0}")]
    ShortDirectoryRead(u32),
    #[error("inode {inum} has unrecognized type {kind}")]
    InvalidInodeType { inum: u32, kind: i16 },
    #[error("logical block {0} out of range")]
    BlockOutOfRange(u32),
    #[error("invalid file system: bad magic {0:#x}")]
    BadMagic(u32),
    #[error("inode {0} link count underflow")]
    NlinkUnderflow(u32),
    #[error("unknown device {0}")]
    UnknownDevice(u32),
    #[error("{0}")]
    Misuse(&'static str),
    #[error("corrupt on-disk record: {0}")]
    Corrupt(String),
}

impl FsError {
    /// whether this error belongs to the fatal tier
    pub fn is_fatal(&self) -> bool {
        matches!(self, FsError::Fatal(_))
    }

    /// the errno a system-call layer would hand back to user space
    pub fn to_errno(&self) -> i32 {
        match self {
            FsError::NotFound => libc::ENOENT,
            FsError::Exists => libc::EEXIST,
            FsError::NotDirectory => libc::ENOTDIR,
            FsError::IsDirectory => libc::EISDIR,
            FsError::PermissionDenied => libc::EBADF,
            FsError::NotEmpty => libc::ENOTEMPTY,
            FsError::NoSpace => libc::ENOSPC,
            FsError::NoInodes => libc::ENOSPC,
            FsError::FileTooLarge { .. } => libc::EFBIG,
            FsError::InvalidArgument(_) => libc::EINVAL,
            FsError::TooManyOpenFiles => libc::EMFILE,
            FsError::CrossDevice => libc::EXDEV,
            FsError::Io(_) => libc::EIO,
            FsError::Fatal(_) => libc::EIO,
        }
    }
}

/// raise an [Invariant] violation, logging it at error level first
pub(crate) fn fatal<T>(violation: Invariant) -> Result<T> {
    log::error!("fatal: {violation}");
    Err(FsError::Fatal(violation))
}

impl From<bincode::error::EncodeError> for FsError {
    fn from(e: bincode::error::EncodeError) -> Self {
        FsError::Fatal(Invariant::Corrupt(e.to_string()))
    }
}

impl From<bincode::error::DecodeError> for FsError {
    fn from(e: bincode::error::DecodeError) -> Self {
        FsError::Fatal(Invariant::Corrupt(e.to_string()))
    }
}
