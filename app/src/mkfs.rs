//! create our filesystem
use std::{path::Path, sync::Arc};

use anyhow::{anyhow, Context};
use byte_unit::Byte;
use log::info;

use crate::{
    bio::{BlockCache, BlockDevice, ImageDisk},
    error::{FsError, Result},
    fs::{
        BlockBitmap, DiskInode, Dirent, FileKind, FileName, SuperBlock, BSIZE, DIRENT_SIZE,
        ROOTINO, SUPERBLOCK_NO,
    },
    param::{LOGSIZE, NBUF, ROOTDEV},
    utils::{fs_size_calculator, traits::OnDiskRecord},
};

/// write an empty file system onto `device`, using all of its blocks
/// # Params
/// - `device`: the block device to format
/// - `ninodes`: the number of inodes
///
/// # Return
/// the super block that was written
pub fn format(device: &Arc<dyn BlockDevice>, ninodes: u32) -> Result<SuperBlock> {
    let size = device.block_count();
    let nmeta = fs_size_calculator::meta_blocks(size, ninodes, LOGSIZE);
    // metadata plus the root directory's block
    if size <= nmeta {
        return Err(FsError::InvalidArgument("device too small for file system"));
    }
    let sb = SuperBlock::new(size, ninodes, LOGSIZE);
    info!(
        "nmeta {nmeta} (boot, super, log blocks {} inode blocks {}, bitmap blocks {}) blocks {} total {size}",
        sb.nlog,
        sb.bmapstart - sb.inodestart,
        sb.data_start() - sb.bmapstart,
        sb.nblocks,
    );

    let zeroes = [0u8; BSIZE];
    for blockno in 0..size {
        device.write_block(blockno, &zeroes)?;
    }
    let mut block = [0u8; BSIZE];
    sb.encode_into(&mut block)?;
    device.write_block(SUPERBLOCK_NO, &block)?;

    let cache = BlockCache::new(ROOTDEV, device.clone(), NBUF);
    let bitmap = BlockBitmap::new(&cache, &sb, ROOTDEV);
    bitmap.mark_used(nmeta)?;

    // root directory: "." and ".." both name inode 1
    let data = bitmap.allocate()?;
    let mut buf = cache.get(ROOTDEV, data)?;
    for (idx, name) in [".", ".."].into_iter().enumerate() {
        Dirent::new(ROOTINO, &FileName::from(name))
            .encode_into(&mut buf.data_mut()[idx * DIRENT_SIZE..])?;
    }
    cache.persist(&buf)?;
    cache.release(buf);

    let mut root = DiskInode {
        kind: FileKind::Directory.as_raw(),
        nlink: 1,
        size: 2 * DIRENT_SIZE as u32,
        ..Default::default()
    };
    root.addrs[0] = data;
    let mut buf = cache.get(ROOTDEV, sb.inode_block(ROOTINO))?;
    root.encode_into(&mut buf.data_mut()[DiskInode::offset_in_block(ROOTINO)..])?;
    cache.persist(&buf)?;
    cache.release(buf);

    cache.flush()?;
    Ok(sb)
}

/// create a new filesystem,given the path of the image file,image size and inode count,
/// # Params
/// - `image_file_path`: the path of the image file, which must not exist yet
/// - `size`: the size of the file system in blocks
/// - `inode_count`: the number of inodes
///
/// # Return
/// an [anyhow::Result] type to indicate whether the operation is successful
pub fn mkfs<P>(image_file_path: P, size: u32, inode_count: u32) -> anyhow::Result<()>
where
    P: AsRef<Path>,
{
    // metadata blocks plus one block for the root directory
    let blocks_needed = fs_size_calculator::meta_blocks(size, inode_count, LOGSIZE) + 1;
    if size < blocks_needed {
        return Err(anyhow!(
            "File system size must be at least {} blocks ({}) for inode count {}",
            blocks_needed,
            Byte::from_bytes(blocks_needed as u128 * BSIZE as u128).get_appropriate_unit(true),
            inode_count
        ));
    }
    let image_file_path = image_file_path.as_ref();
    let device: Arc<dyn BlockDevice> = Arc::new(
        ImageDisk::create(image_file_path, size)
            .with_context(|| format!("creating image {}", image_file_path.display()))?,
    );
    let sb = format(&device, inode_count).context("formatting image")?;
    info!(
        "created {} with {} data blocks and {} inodes",
        image_file_path.display(),
        sb.nblocks,
        sb.ninodes
    );
    Ok(())
}
