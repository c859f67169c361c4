use std::fmt;

use serde::{Deserialize, Serialize};

use crate::utils::traits::OnDiskRecord;

use super::DIRSIZ;

/// encoded size of a [Dirent]
pub const DIRENT_SIZE: usize = 16;

/// a path component, cut at its first NUL and truncated to [DIRSIZ] bytes
#[derive(Clone, Copy, Default, PartialEq, Eq)]
pub struct FileName {
    bytes: [u8; DIRSIZ],
    len: usize,
}

impl FileName {
    pub fn new(name: &[u8]) -> Self {
        // on disk a NUL ends the name
        let len = name
            .iter()
            .position(|b| *b == 0)
            .unwrap_or(name.len())
            .min(DIRSIZ);
        let mut bytes = [0u8; DIRSIZ];
        bytes[..len].copy_from_slice(&name[..len]);
        FileName { bytes, len }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len]
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// `.` or `..`
    pub fn is_dot_or_dotdot(&self) -> bool {
        matches!(self.as_bytes(), b"." | b"..")
    }
}

impl From<&str> for FileName {
    fn from(name: &str) -> Self {
        FileName::new(name.as_bytes())
    }
}

impl fmt::Display for FileName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(self.as_bytes()))
    }
}

impl fmt::Debug for FileName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", String::from_utf8_lossy(self.as_bytes()))
    }
}

/// a directory is a file containing a sequence of these records;
/// an entry with inum 0 is a hole
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Dirent {
    pub inum: u32,
    /// NUL-padded
    pub name: [u8; DIRSIZ],
}

impl OnDiskRecord for Dirent {
    const ON_DISK_SIZE: usize = DIRENT_SIZE;
}

impl Dirent {
    pub fn new(inum: u32, name: &FileName) -> Self {
        Dirent {
            inum,
            name: name.bytes,
        }
    }

    pub fn is_hole(&self) -> bool {
        self.inum == 0
    }

    pub fn file_name(&self) -> FileName {
        FileName::new(&self.name)
    }
}
