//! attach an xv6 file system to the VFS
use std::{path::Path, sync::Arc};

use anyhow::Context;

use crate::{
    bio::{BlockCache, BlockDevice, ImageDisk},
    error::Result,
    fs::Xv6Fs,
    param::{FsConfig, ROOTDEV},
    vfs::{Console, Vfs, CONSOLE},
};

/// mount the xv6 file system on `device` as the root device,
/// with the console registered as a character device
pub fn mount_device(device: Arc<dyn BlockDevice>, config: FsConfig) -> Result<Arc<Vfs>> {
    let cache = Arc::new(BlockCache::new(
        ROOTDEV,
        device,
        config.buffer_cache_capacity,
    ));
    let fs = Arc::new(Xv6Fs::new(cache));
    let vfs = Vfs::mount(&fs.file_system_type(), ROOTDEV, config)?;
    vfs.devices().register(CONSOLE, Arc::new(Console))?;
    Ok(Arc::new(vfs))
}

/// open the image file and mount it
pub fn mount_image<P>(image_path: P, config: FsConfig) -> anyhow::Result<Arc<Vfs>>
where
    P: AsRef<Path>,
{
    let image_path = image_path.as_ref();
    let device = ImageDisk::open(image_path)
        .with_context(|| format!("opening image {}", image_path.display()))?;
    mount_device(Arc::new(device), config)
        .with_context(|| format!("mounting image {}", image_path.display()))
}
