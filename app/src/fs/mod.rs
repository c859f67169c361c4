//! the on-disk xv6 file system driver
//!
//! Disk layout:
//! [ boot block | super block | log | inode blocks | free bit map | data blocks ]
//!
//! `mkfs` computes the super block and builds an initial file system.
//! The super block describes the disk layout.
pub mod bitmap;
pub mod directory;
pub mod filekind;
pub mod inode;
pub mod superblock;
mod xv6fs;

pub use bitmap::*;
pub use directory::*;
pub use filekind::*;
pub use inode::*;
pub use superblock::*;
pub use xv6fs::*;

/// block size
pub const BSIZE: usize = 1024;
pub const FS_MAGIC: u32 = 0x10203040;
/// root i-number
pub const ROOTINO: u32 = 1;
pub const NDIRECT: usize = 12;
pub const NINDIRECT: usize = BSIZE / std::mem::size_of::<u32>();
pub const MAXFILE: usize = NDIRECT + NINDIRECT;
/// directory entries hold names of at most this many bytes
pub const DIRSIZ: usize = 12;
/// inodes per block
pub const IPB: u32 = (BSIZE / INODE_SIZE) as u32;
/// bitmap bits per block
pub const BPB: u32 = (BSIZE * 8) as u32;
