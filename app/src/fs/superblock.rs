use serde::{Deserialize, Serialize};

use crate::{
    bio::BlockCache,
    error::{fatal, Invariant, Result},
    utils::{fs_size_calculator, traits::OnDiskRecord},
};

use super::{BPB, FS_MAGIC, IPB};

/// block number of the super block
pub const SUPERBLOCK_NO: u32 = 1;

/// The superblock of this filesystem,
/// describing the disk layout
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SuperBlock {
    /// must be [FS_MAGIC]
    pub magic: u32,
    /// size of file system image (blocks)
    pub size: u32,
    /// number of data blocks
    pub nblocks: u32,
    /// number of inodes
    pub ninodes: u32,
    /// number of log blocks
    pub nlog: u32,
    /// block number of first log block
    pub logstart: u32,
    /// block number of first inode block
    pub inodestart: u32,
    /// block number of first free map block
    pub bmapstart: u32,
}

impl OnDiskRecord for SuperBlock {
    const ON_DISK_SIZE: usize = 8 * std::mem::size_of::<u32>();
}

impl SuperBlock {
    /// lay out a file system of `size` blocks holding `ninodes` inodes
    pub fn new(size: u32, ninodes: u32, nlog: u32) -> Self {
        let nmeta = fs_size_calculator::meta_blocks(size, ninodes, nlog);
        let inodestart = 2 + nlog;
        SuperBlock {
            magic: FS_MAGIC,
            size,
            nblocks: size.saturating_sub(nmeta),
            ninodes,
            nlog,
            logstart: 2,
            inodestart,
            bmapstart: inodestart + fs_size_calculator::inode_blocks(ninodes),
        }
    }

    /// read the super block of device `dev`
    pub fn read(cache: &BlockCache, dev: u32) -> Result<Self> {
        let buf = cache.get(dev, SUPERBLOCK_NO)?;
        let sb = SuperBlock::decode_from(buf.data())?;
        cache.release(buf);
        if sb.magic != FS_MAGIC {
            return fatal(Invariant::BadMagic(sb.magic));
        }
        if sb.nblocks > sb.size || sb.inodestart >= sb.bmapstart || sb.bmapstart >= sb.size {
            return fatal(Invariant::Corrupt(format!(
                "superblock geometry: size {} nblocks {} inodestart {} bmapstart {}",
                sb.size, sb.nblocks, sb.inodestart, sb.bmapstart
            )));
        }
        Ok(sb)
    }

    /// block containing inode `inum`
    pub fn inode_block(&self, inum: u32) -> u32 {
        inum / IPB + self.inodestart
    }

    /// block of free map containing bit for block `b`
    pub fn bitmap_block(&self, b: u32) -> u32 {
        b / BPB + self.bmapstart
    }

    /// first block that may hold file data
    pub fn data_start(&self) -> u32 {
        self.size - self.nblocks
    }
}
