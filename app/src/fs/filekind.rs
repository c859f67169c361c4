use crate::error::{FsError, Invariant};

/// an enum to describe the type of a file,
/// stored on disk as a 16-bit integer
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub enum FileKind {
    /// free or absent inode
    #[default]
    Free,
    /// a directory
    Directory,
    /// an regular file
    RegularFile,
    /// a device, dispatched by major number
    Device,
}

impl FileKind {
    pub const fn as_raw(self) -> i16 {
        match self {
            FileKind::Free => 0,
            FileKind::Directory => 1,
            FileKind::RegularFile => 2,
            FileKind::Device => 3,
        }
    }

    /// decode the on-disk type of inode `inum`
    pub fn from_raw(inum: u32, kind: i16) -> Result<Self, FsError> {
        match kind {
            0 => Ok(FileKind::Free),
            1 => Ok(FileKind::Directory),
            2 => Ok(FileKind::RegularFile),
            3 => Ok(FileKind::Device),
            _ => Err(Invariant::InvalidInodeType { inum, kind }.into()),
        }
    }
}
