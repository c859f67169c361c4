//! This module contains functions to calculate the size of different fs components

use crate::fs::{BPB, IPB};

/// calculate the number of free-bitmap blocks
/// # Arguments
/// - `fs_size`: file system size in blocks
/// # Example
/// ```
/// use xv6fs::utils::fs_size_calculator::bitmap_blocks;
/// assert_eq!(bitmap_blocks(2000), 1);
/// ```
pub const fn bitmap_blocks(fs_size: u32) -> u32 {
    fs_size / BPB + 1
}

/// calculate the number of blocks holding the inode table
/// # Example
/// ```
/// use xv6fs::utils::fs_size_calculator::inode_blocks;
/// assert_eq!(inode_blocks(200), 13);
/// ```
pub const fn inode_blocks(inode_count: u32) -> u32 {
    inode_count / IPB + 1
}

/// calculate the number of metadata blocks:
/// boot block, super block, log, inode table and bitmap
/// # Example
/// ```
/// use xv6fs::utils::fs_size_calculator::meta_blocks;
/// assert_eq!(meta_blocks(2000, 200, 30), 46);
/// ```
pub const fn meta_blocks(fs_size: u32, inode_count: u32, log_blocks: u32) -> u32 {
    2 + log_blocks + inode_blocks(inode_count) + bitmap_blocks(fs_size)
}
