use std::sync::Arc;

use crate::{
    bio::{BlockCache, BlockDevice, MemDisk},
    fs::Xv6Fs,
    mkfs,
    param::{FsConfig, FSSIZE, NINODES, ROOTDEV},
    vfs::Vfs,
};

/// a freshly formatted in-memory file system of the default geometry
pub fn init_test_environment() -> Arc<Vfs> {
    mount_test_image(FSSIZE, NINODES, FsConfig::default()).0
}

/// format an in-memory disk of `size` blocks and mount it,
/// returning the driver as well for block accounting
pub fn mount_test_image(size: u32, ninodes: u32, config: FsConfig) -> (Arc<Vfs>, Arc<Xv6Fs>) {
    let _ = env_logger::builder().is_test(true).try_init();
    let device: Arc<dyn BlockDevice> = Arc::new(MemDisk::new(size));
    mkfs::format(&device, ninodes).expect("Failed to format test disk");
    let cache = Arc::new(BlockCache::new(
        ROOTDEV,
        device,
        config.buffer_cache_capacity,
    ));
    let fs = Arc::new(Xv6Fs::new(cache));
    let vfs = Vfs::mount(&fs.clone().file_system_type(), ROOTDEV, config)
        .expect("Failed to mount test disk");
    (Arc::new(vfs), fs)
}
