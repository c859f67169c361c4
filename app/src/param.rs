//! table sizes and tunables of the filesystem core
use crate::fs::BSIZE;

/// maximum number of cached in-memory inodes
pub const NINODE: usize = 50;
/// open files per system
pub const NFILE: usize = 100;
/// open files per process
pub const NOFILE: usize = 16;
/// maximum major device number
pub const NDEV: usize = 10;
/// device number of file system root disk
pub const ROOTDEV: u32 = 1;
/// max # of blocks any FS op writes
pub const MAXOPBLOCKS: usize = 10;
/// max data blocks in on-disk log
pub const LOGSIZE: u32 = (MAXOPBLOCKS * 3) as u32;
/// size of file system in blocks, used by `mkfs` when no size is given
pub const FSSIZE: u32 = 2000;
/// inode count used by `mkfs` when none is given
pub const NINODES: u32 = 200;
/// maximum path length accepted by the system-call layer
pub const MAXPATH: usize = 128;
/// buffers the block cache keeps before evicting idle ones
pub const NBUF: usize = MAXOPBLOCKS * 3;

/// runtime sizing of the global tables
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FsConfig {
    pub inode_cache_capacity: usize,
    pub file_table_capacity: usize,
    pub max_fds_per_process: usize,
    /// block budget of one file-system operation; bounds write chunking
    pub max_op_blocks: usize,
    pub buffer_cache_capacity: usize,
}

impl Default for FsConfig {
    fn default() -> Self {
        FsConfig {
            inode_cache_capacity: NINODE,
            file_table_capacity: NFILE,
            max_fds_per_process: NOFILE,
            max_op_blocks: MAXOPBLOCKS,
            buffer_cache_capacity: NBUF,
        }
    }
}

impl FsConfig {
    /// largest number of bytes a single underlying write may cover:
    /// i-node, indirect block, allocation blocks and 2 blocks of slop for
    /// non-aligned writes, halved because writes straddle blocks
    /// # Example
    /// ```
    /// use xv6fs::param::FsConfig;
    /// assert_eq!(FsConfig::default().max_write_bytes(), 3 * 1024);
    /// ```
    pub fn max_write_bytes(&self) -> usize {
        (self.max_op_blocks.saturating_sub(1 + 1 + 2) / 2).max(1) * BSIZE
    }
}
