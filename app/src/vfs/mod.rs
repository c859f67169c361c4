//! the virtual file system layer
//!
//! Everything above the on-disk format lives here: the inode cache,
//! path resolution, the open-file table, the device switch and the
//! system-call surface. A concrete file system plugs in by implementing
//! [FileSystemOps] and is attached with [Vfs::mount]; every inode,
//! directory and file operation is dispatched through it.
mod device;
mod file;
mod icache;
pub mod path;
mod syscall;

use std::{fmt, sync::Arc};

use log::info;

pub use device::*;
pub use file::*;
pub use icache::*;
pub use syscall::*;

use crate::{
    error::Result,
    fs::{FileKind, FileName, ROOTINO},
    param::FsConfig,
};

/// the result of a directory lookup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirLookup {
    /// the named inode, referenced, and the byte offset of its record
    Hit { ip: InodeRef, offset: u32 },
    Miss,
}

impl DirLookup {
    /// inode number found, 0 on a miss
    pub fn inum(&self) -> u32 {
        match self {
            DirLookup::Hit { ip, .. } => ip.inum(),
            DirLookup::Miss => 0,
        }
    }
}

/// file status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stat {
    /// file system's disk device
    pub dev: u32,
    /// inode number
    pub ino: u32,
    pub kind: FileKind,
    /// number of links to file
    pub nlink: i16,
    /// size of file in bytes
    pub size: u32,
}

/// operations a concrete file system supplies to the VFS
///
/// Methods taking an [InodeGuard] expect the inode locked by the caller
/// and leave it locked. Methods returning an [InodeRef] or [DirLookup::Hit]
/// hand one counted reference to the caller.
pub trait FileSystemOps: Send + Sync + fmt::Debug {
    /// read and check the super block of `dev`
    fn init(&self, dev: u32) -> Result<()>;
    /// copy inode `inum` of `dev` from disk into a cache entry
    fn read_inode(&self, dev: u32, inum: u32, inner: &mut InodeInner) -> Result<()>;
    /// copy a modified in-memory inode to disk
    fn write_inode(&self, ip: &InodeGuard<'_>) -> Result<()>;
    /// allocate an on-disk inode of type `kind`, returned unlocked
    fn alloc_inode(&self, vfs: &Vfs, dev: u32, kind: FileKind) -> Result<InodeRef>;
    /// discard the inode's contents
    fn trunc(&self, ip: &mut InodeGuard<'_>) -> Result<()>;
    fn read(&self, ip: &mut InodeGuard<'_>, dst: &mut [u8], off: u32) -> Result<usize>;
    fn write(&self, ip: &mut InodeGuard<'_>, src: &[u8], off: u32) -> Result<usize>;
    fn dirlookup(&self, vfs: &Vfs, dp: &mut InodeGuard<'_>, name: &FileName)
        -> Result<DirLookup>;
    /// is the directory empty except for "." and ".."
    fn isdirempty(&self, dp: &mut InodeGuard<'_>) -> Result<bool>;
    /// write a new directory entry (name, inum) into `dp`
    fn link(&self, vfs: &Vfs, dp: &mut InodeGuard<'_>, name: &FileName, inum: u32)
        -> Result<()>;
    /// create `name` in directory `dp`, consuming the caller's reference
    /// to `dp`; the new or reused inode comes back locked
    fn create<'v>(
        &self,
        vfs: &'v Vfs,
        dp: InodeRef,
        name: &FileName,
        kind: FileKind,
        major: i16,
        minor: i16,
    ) -> Result<InodeGuard<'v>>;
    /// remove the directory entry `path` names
    fn unlink(&self, vfs: &Vfs, cwd: &InodeRef, path: &str) -> Result<()>;
    /// open the locked inode `ip`; the open file takes over one reference
    fn open(&self, vfs: &Vfs, ip: &InodeGuard<'_>, mode: OpenFlags) -> Result<FileId>;
    /// drop a reference to an open file
    fn close(&self, vfs: &Vfs, f: FileId) -> Result<()>;
    /// make all written state durable
    fn sync(&self) -> Result<()> {
        Ok(())
    }
}

/// a named file system implementation
#[derive(Debug, Clone)]
pub struct FileSystemType {
    pub name: &'static str,
    pub ops: Arc<dyn FileSystemOps>,
}

/// a file system attached to a device. File-system-private state, such as
/// the super block, is owned by the `ops` object
#[derive(Debug)]
pub struct Mount {
    pub fs_type: &'static str,
    pub dev: u32,
    pub ops: Arc<dyn FileSystemOps>,
    /// the mount's root inode, referenced for the lifetime of the mount
    pub root: InodeRef,
}

#[derive(Debug)]
pub struct Vfs {
    mount: Mount,
    icache: InodeCache,
    files: FileTable,
    devices: DeviceTable,
    config: FsConfig,
}

impl Vfs {
    /// mount `fs_type` from device `dev` as the root file system
    pub fn mount(fs_type: &FileSystemType, dev: u32, config: FsConfig) -> Result<Self> {
        info!("mounting {} file system from device {dev}", fs_type.name);
        let ops = fs_type.ops.clone();
        ops.init(dev)?;

        let icache = InodeCache::new(config.inode_cache_capacity);
        let root = icache.get(dev, ROOTINO)?;
        let guard = icache.lock(&root, |inner| ops.read_inode(dev, ROOTINO, inner))?;
        info!(
            "root directory: {} bytes, {} links",
            guard.size, guard.nlink
        );
        drop(guard);

        Ok(Vfs {
            mount: Mount {
                fs_type: fs_type.name,
                dev,
                ops,
                root,
            },
            icache,
            files: FileTable::new(config.file_table_capacity),
            devices: DeviceTable::new(),
            config,
        })
    }

    pub fn ops(&self) -> &dyn FileSystemOps {
        self.mount.ops.as_ref()
    }

    pub fn root(&self) -> InodeRef {
        self.mount.root
    }

    pub fn mount_info(&self) -> &Mount {
        &self.mount
    }

    pub fn config(&self) -> &FsConfig {
        &self.config
    }

    pub fn icache(&self) -> &InodeCache {
        &self.icache
    }

    pub fn files(&self) -> &FileTable {
        &self.files
    }

    pub fn devices(&self) -> &DeviceTable {
        &self.devices
    }

    pub fn iget(&self, dev: u32, inum: u32) -> Result<InodeRef> {
        self.icache.get(dev, inum)
    }

    pub fn idup(&self, ip: &InodeRef) -> Result<InodeRef> {
        self.icache.dup(ip)
    }

    /// lock the inode, reading it from disk if necessary
    pub fn ilock(&self, ip: &InodeRef) -> Result<InodeGuard<'_>> {
        let ops = self.ops();
        self.icache
            .lock(ip, |inner| ops.read_inode(ip.dev(), ip.inum(), inner))
    }

    pub fn iunlock(&self, guard: InodeGuard<'_>) {
        guard.unlock()
    }

    /// drop a reference; the last reference to an inode with no links
    /// frees it and its content on disk
    pub fn iput(&self, ip: InodeRef) -> Result<()> {
        let ops = self.ops();
        self.icache.put(ip, |guard| {
            ops.trunc(guard)?;
            guard.kind = FileKind::Free;
            ops.write_inode(guard)
        })
    }

    /// common idiom: unlock, then put
    pub fn iunlockput(&self, guard: InodeGuard<'_>) -> Result<()> {
        let ip = guard.ip();
        guard.unlock();
        self.iput(ip)
    }

    pub fn sync(&self) -> Result<()> {
        self.ops().sync()
    }
}
