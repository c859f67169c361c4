use serde::{Deserialize, Serialize};

use crate::{error::Result, utils::traits::OnDiskRecord, vfs::InodeInner};

use super::{filekind::FileKind, IPB, NDIRECT};

/// encoded size of a [DiskInode]
pub const INODE_SIZE: usize = 64;

/// on-disk inode structure
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiskInode {
    /// file type, 0 when free
    pub kind: i16,
    /// major device number (devices only)
    pub major: i16,
    /// minor device number (devices only)
    pub minor: i16,
    /// number of directory entries naming this inode
    pub nlink: i16,
    /// size of file (bytes)
    pub size: u32,
    /// data block addresses, the last one is the indirect block
    pub addrs: [u32; NDIRECT + 1],
}

impl OnDiskRecord for DiskInode {
    const ON_DISK_SIZE: usize = INODE_SIZE;
}

impl DiskInode {
    /// byte offset of inode `inum` inside its inode block
    pub fn offset_in_block(inum: u32) -> usize {
        (inum % IPB) as usize * INODE_SIZE
    }

    pub fn is_free(&self) -> bool {
        self.kind == FileKind::Free.as_raw()
    }

    /// copy this record into a cached inode
    pub fn load_into(&self, inum: u32, inner: &mut InodeInner) -> Result<()> {
        inner.kind = FileKind::from_raw(inum, self.kind)?;
        inner.major = self.major;
        inner.minor = self.minor;
        inner.nlink = self.nlink;
        inner.size = self.size;
        inner.addrs = self.addrs;
        Ok(())
    }
}

impl From<&InodeInner> for DiskInode {
    fn from(inner: &InodeInner) -> Self {
        DiskInode {
            kind: inner.kind.as_raw(),
            major: inner.major,
            minor: inner.minor,
            nlink: inner.nlink,
            size: inner.size,
            addrs: inner.addrs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inode_record_layout() -> anyhow::Result<()> {
        let mut dinode = DiskInode {
            kind: FileKind::RegularFile.as_raw(),
            nlink: 1,
            size: 5000,
            ..Default::default()
        };
        dinode.addrs[NDIRECT] = 77;
        let mut buf = [0u8; INODE_SIZE];
        assert_eq!(dinode.encode_into(&mut buf)?, INODE_SIZE);
        assert_eq!(&buf[..2], &2i16.to_le_bytes());
        assert_eq!(&buf[8..12], &5000u32.to_le_bytes());
        assert_eq!(&buf[60..64], &77u32.to_le_bytes());
        assert_eq!(DiskInode::decode_from(&buf)?, dinode);
        Ok(())
    }

    #[test]
    fn test_offsets_within_block() {
        assert_eq!(DiskInode::offset_in_block(1), INODE_SIZE);
        assert_eq!(DiskInode::offset_in_block(IPB), 0);
        assert_eq!(DiskInode::offset_in_block(IPB + 3), 3 * INODE_SIZE);
    }

    #[test]
    fn test_unknown_type_rejected_on_load() {
        let dinode = DiskInode {
            kind: 42,
            ..Default::default()
        };
        let mut inner = InodeInner::default();
        assert!(dinode.load_into(9, &mut inner).unwrap_err().is_fatal());
    }
}
