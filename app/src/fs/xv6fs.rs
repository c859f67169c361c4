//! the xv6 file system driver
//!
//! Implements [FileSystemOps] on top of the block cache: inode records,
//! block mapping, file content and directories.
use std::sync::Arc;

use log::{debug, info, warn};
use once_cell::sync::OnceCell;

use crate::{
    bio::BlockCache,
    error::{fatal, FsError, Invariant, Result},
    fs::{
        BlockBitmap, DiskInode, Dirent, FileKind, FileName, SuperBlock, BSIZE, DIRENT_SIZE,
        MAXFILE, NDIRECT, NINDIRECT,
    },
    param::NDEV,
    utils::traits::OnDiskRecord,
    vfs::{
        path::nameiparent, Backing, DirLookup, FileId, FileSystemOps, FileSystemType,
        InodeGuard, InodeInner, InodeRef, OpenFile, OpenFlags, Vfs,
    },
};

pub const XV6FS_NAME: &str = "xv6fs";

#[derive(Debug)]
pub struct Xv6Fs {
    cache: Arc<BlockCache>,
    /// read once by `init`
    superblock: OnceCell<SuperBlock>,
}

impl Xv6Fs {
    pub fn new(cache: Arc<BlockCache>) -> Self {
        Xv6Fs {
            cache,
            superblock: OnceCell::new(),
        }
    }

    /// register this driver as a mountable file system type
    pub fn file_system_type(self: Arc<Self>) -> FileSystemType {
        FileSystemType {
            name: XV6FS_NAME,
            ops: self,
        }
    }

    pub fn cache(&self) -> &Arc<BlockCache> {
        &self.cache
    }

    pub fn superblock(&self) -> Result<&SuperBlock> {
        match self.superblock.get() {
            Some(sb) => Ok(sb),
            None => fatal(Invariant::Misuse("file system used before init")),
        }
    }

    /// number of free data blocks on `dev`
    pub fn free_blocks(&self, dev: u32) -> Result<u32> {
        BlockBitmap::new(&self.cache, self.superblock()?, dev).free_count()
    }

    /// return the disk block address of the `bn`th block in inode `ip`,
    /// allocating it if there is no such block
    pub fn bmap(&self, ip: &mut InodeGuard<'_>, bn: u32) -> Result<u32> {
        let sb = self.superblock()?;
        let bitmap = BlockBitmap::new(&self.cache, sb, ip.dev());
        let mut bn = bn as usize;

        if bn < NDIRECT {
            if ip.addrs[bn] == 0 {
                ip.addrs[bn] = bitmap.allocate()?;
            }
            return Ok(ip.addrs[bn]);
        }
        bn -= NDIRECT;

        if bn < NINDIRECT {
            // load indirect block, allocating if necessary
            if ip.addrs[NDIRECT] == 0 {
                ip.addrs[NDIRECT] = bitmap.allocate()?;
            }
            let mut buf = self.cache.get(ip.dev(), ip.addrs[NDIRECT])?;
            let mut addr = indirect_entry(buf.data(), bn);
            if addr == 0 {
                addr = bitmap.allocate()?;
                set_indirect_entry(buf.data_mut(), bn, addr);
                self.cache.persist(&buf)?;
            }
            return Ok(addr);
        }

        fatal(Invariant::BlockOutOfRange((bn + NDIRECT) as u32))
    }

    fn inode_record_location(&self, inum: u32) -> Result<(u32, usize)> {
        let sb = self.superblock()?;
        if inum == 0 || inum >= sb.ninodes {
            return fatal(Invariant::Corrupt(format!("inode number {inum} out of range")));
        }
        Ok((sb.inode_block(inum), DiskInode::offset_in_block(inum)))
    }
}

fn indirect_entry(block: &[u8], idx: usize) -> u32 {
    let at = idx * 4;
    u32::from_le_bytes([block[at], block[at + 1], block[at + 2], block[at + 3]])
}

fn set_indirect_entry(block: &mut [u8], idx: usize, addr: u32) {
    block[idx * 4..idx * 4 + 4].copy_from_slice(&addr.to_le_bytes());
}

impl FileSystemOps for Xv6Fs {
    fn init(&self, dev: u32) -> Result<()> {
        let sb = self
            .superblock
            .get_or_try_init(|| SuperBlock::read(&self.cache, dev))?;
        info!(
            "sb: size {} nblocks {} ninodes {} nlog {} logstart {} inodestart {} bmap start {}",
            sb.size, sb.nblocks, sb.ninodes, sb.nlog, sb.logstart, sb.inodestart, sb.bmapstart
        );
        Ok(())
    }

    fn read_inode(&self, dev: u32, inum: u32, inner: &mut InodeInner) -> Result<()> {
        let (blockno, off) = self.inode_record_location(inum)?;
        let buf = self.cache.get(dev, blockno)?;
        let dinode = DiskInode::decode_from(&buf.data()[off..])?;
        self.cache.release(buf);
        dinode.load_into(inum, inner)
    }

    fn write_inode(&self, ip: &InodeGuard<'_>) -> Result<()> {
        let (blockno, off) = self.inode_record_location(ip.inum())?;
        let mut buf = self.cache.get(ip.dev(), blockno)?;
        DiskInode::from(&**ip).encode_into(&mut buf.data_mut()[off..])?;
        self.cache.persist(&buf)
    }

    fn alloc_inode(&self, vfs: &Vfs, dev: u32, kind: FileKind) -> Result<InodeRef> {
        let sb = self.superblock()?;
        for inum in 1..sb.ninodes {
            let (blockno, off) = self.inode_record_location(inum)?;
            let mut buf = self.cache.get(dev, blockno)?;
            if !DiskInode::decode_from(&buf.data()[off..])?.is_free() {
                continue;
            }
            // a free inode: claim it on disk while the block is held
            let fresh = DiskInode {
                kind: kind.as_raw(),
                ..Default::default()
            };
            fresh.encode_into(&mut buf.data_mut()[off..])?;
            self.cache.persist(&buf)?;
            self.cache.release(buf);
            debug!("allocated inode {inum} ({kind:?}) on device {dev}");
            return vfs.iget(dev, inum);
        }
        warn!("ialloc: no inodes on device {dev}");
        Err(FsError::NoInodes)
    }

    fn trunc(&self, ip: &mut InodeGuard<'_>) -> Result<()> {
        let sb = self.superblock()?;
        let bitmap = BlockBitmap::new(&self.cache, sb, ip.dev());

        for i in 0..NDIRECT {
            if ip.addrs[i] != 0 {
                bitmap.free(ip.addrs[i])?;
                ip.addrs[i] = 0;
            }
        }

        if ip.addrs[NDIRECT] != 0 {
            let entries: Vec<u32> = {
                let buf = self.cache.get(ip.dev(), ip.addrs[NDIRECT])?;
                (0..NINDIRECT)
                    .map(|j| indirect_entry(buf.data(), j))
                    .filter(|addr| *addr != 0)
                    .collect()
            };
            for addr in entries {
                bitmap.free(addr)?;
            }
            bitmap.free(ip.addrs[NDIRECT])?;
            ip.addrs[NDIRECT] = 0;
        }

        ip.size = 0;
        self.write_inode(ip)
    }

    fn read(&self, ip: &mut InodeGuard<'_>, dst: &mut [u8], off: u32) -> Result<usize> {
        let size = ip.size as usize;
        let off = off as usize;
        if off > size {
            return Ok(0);
        }
        let n = dst.len().min(size - off);

        let mut tot = 0;
        let mut off = off;
        while tot < n {
            let addr = match self.bmap(ip, (off / BSIZE) as u32) {
                Ok(addr) => addr,
                Err(FsError::NoSpace) => break,
                Err(e) => return Err(e),
            };
            let buf = self.cache.get(ip.dev(), addr)?;
            let m = (n - tot).min(BSIZE - off % BSIZE);
            dst[tot..tot + m].copy_from_slice(&buf.data()[off % BSIZE..off % BSIZE + m]);
            tot += m;
            off += m;
        }
        Ok(tot)
    }

    fn write(&self, ip: &mut InodeGuard<'_>, src: &[u8], off: u32) -> Result<usize> {
        let n = src.len();
        if off > ip.size {
            return Err(FsError::InvalidArgument("write offset beyond end of file"));
        }
        if off as usize + n > MAXFILE * BSIZE {
            return Err(FsError::FileTooLarge { offset: off, len: n });
        }

        let mut tot = 0;
        let mut off = off as usize;
        while tot < n {
            let addr = match self.bmap(ip, (off / BSIZE) as u32) {
                Ok(addr) => addr,
                Err(FsError::NoSpace) => break,
                Err(e) => return Err(e),
            };
            let mut buf = self.cache.get(ip.dev(), addr)?;
            let m = (n - tot).min(BSIZE - off % BSIZE);
            buf.data_mut()[off % BSIZE..off % BSIZE + m].copy_from_slice(&src[tot..tot + m]);
            self.cache.persist(&buf)?;
            tot += m;
            off += m;
        }

        if off as u32 > ip.size {
            ip.size = off as u32;
        }
        // write the i-node back to disk even if the size didn't change,
        // because the loop above might have called bmap() and added a new
        // block to ip.addrs[]
        self.write_inode(ip)?;
        Ok(tot)
    }

    fn dirlookup(
        &self,
        vfs: &Vfs,
        dp: &mut InodeGuard<'_>,
        name: &FileName,
    ) -> Result<DirLookup> {
        if dp.kind != FileKind::Directory {
            return fatal(Invariant::Misuse("dirlookup on a non-directory"));
        }
        let mut raw = [0u8; DIRENT_SIZE];
        for off in (0..dp.size).step_by(DIRENT_SIZE) {
            if self.read(dp, &mut raw, off)? != DIRENT_SIZE {
                return fatal(Invariant::ShortDirectoryRead(off));
            }
            let entry = Dirent::decode_from(&raw)?;
            if entry.is_hole() {
                continue;
            }
            if entry.file_name() == *name {
                let ip = vfs.iget(dp.dev(), entry.inum)?;
                return Ok(DirLookup::Hit { ip, offset: off });
            }
        }
        Ok(DirLookup::Miss)
    }

    fn isdirempty(&self, dp: &mut InodeGuard<'_>) -> Result<bool> {
        let mut raw = [0u8; DIRENT_SIZE];
        for off in (2 * DIRENT_SIZE as u32..dp.size).step_by(DIRENT_SIZE) {
            if self.read(dp, &mut raw, off)? != DIRENT_SIZE {
                return fatal(Invariant::ShortDirectoryRead(off));
            }
            if !Dirent::decode_from(&raw)?.is_hole() {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn link(&self, vfs: &Vfs, dp: &mut InodeGuard<'_>, name: &FileName, inum: u32) -> Result<()> {
        // check that name is not present
        if let DirLookup::Hit { ip, .. } = self.dirlookup(vfs, dp, name)? {
            vfs.iput(ip)?;
            return Err(FsError::Exists);
        }

        // look for an empty dirent
        let mut raw = [0u8; DIRENT_SIZE];
        let mut slot = dp.size;
        for off in (0..dp.size).step_by(DIRENT_SIZE) {
            if self.read(dp, &mut raw, off)? != DIRENT_SIZE {
                return fatal(Invariant::ShortDirectoryRead(off));
            }
            if Dirent::decode_from(&raw)?.is_hole() {
                slot = off;
                break;
            }
        }

        Dirent::new(inum, name).encode_into(&mut raw)?;
        if self.write(dp, &raw, slot)? != DIRENT_SIZE {
            return Err(FsError::NoSpace);
        }
        Ok(())
    }

    fn create<'v>(
        &self,
        vfs: &'v Vfs,
        dp: InodeRef,
        name: &FileName,
        kind: FileKind,
        major: i16,
        minor: i16,
    ) -> Result<InodeGuard<'v>> {
        let mut dguard = vfs.ilock(&dp)?;

        if let DirLookup::Hit { ip, .. } = self.dirlookup(vfs, &mut dguard, name)? {
            vfs.iunlockput(dguard)?;
            let guard = vfs.ilock(&ip)?;
            if kind == FileKind::RegularFile
                && matches!(guard.kind, FileKind::RegularFile | FileKind::Device)
            {
                return Ok(guard);
            }
            vfs.iunlockput(guard)?;
            return Err(FsError::Exists);
        }

        let ip = match self.alloc_inode(vfs, dp.dev(), kind) {
            Ok(ip) => ip,
            Err(e) => {
                vfs.iunlockput(dguard)?;
                return Err(e);
            }
        };
        let mut guard = vfs.ilock(&ip)?;
        guard.major = major;
        guard.minor = minor;
        guard.nlink = 1;
        self.write_inode(&guard)?;

        let linked = (|| -> Result<()> {
            if kind == FileKind::Directory {
                // create . and .. entries before the parent can see the directory
                self.link(vfs, &mut guard, &FileName::from("."), ip.inum())?;
                self.link(vfs, &mut guard, &FileName::from(".."), dp.inum())?;
            }
            self.link(vfs, &mut dguard, name, ip.inum())
        })();

        if let Err(e) = linked {
            warn!("create {name}: linking failed ({e}), releasing inode {}", ip.inum());
            guard.nlink = 0;
            self.write_inode(&guard)?;
            vfs.iunlockput(guard)?;
            vfs.iunlockput(dguard)?;
            return Err(e);
        }

        if kind == FileKind::Directory {
            // the new directory's ".." refers to the parent
            dguard.nlink += 1;
            self.write_inode(&dguard)?;
        }
        info!(
            "created {name} ({kind:?}) as inode {} in directory {}",
            ip.inum(),
            dp.inum()
        );
        vfs.iunlockput(dguard)?;
        Ok(guard)
    }

    fn unlink(&self, vfs: &Vfs, cwd: &InodeRef, path: &str) -> Result<()> {
        let mut name = FileName::default();
        let dp = nameiparent(vfs, cwd, path, &mut name)?;
        let mut dguard = vfs.ilock(&dp)?;

        // cannot unlink "." or ".."
        if name.is_dot_or_dotdot() {
            vfs.iunlockput(dguard)?;
            return Err(FsError::InvalidArgument("cannot unlink . or .."));
        }

        let (ip, off) = match self.dirlookup(vfs, &mut dguard, &name)? {
            DirLookup::Hit { ip, offset } => (ip, offset),
            DirLookup::Miss => {
                vfs.iunlockput(dguard)?;
                return Err(FsError::NotFound);
            }
        };
        let mut guard = vfs.ilock(&ip)?;

        if guard.nlink < 1 {
            return fatal(Invariant::NlinkUnderflow(ip.inum()));
        }
        if guard.kind == FileKind::Directory && !self.isdirempty(&mut guard)? {
            vfs.iunlockput(guard)?;
            vfs.iunlockput(dguard)?;
            return Err(FsError::NotEmpty);
        }

        let hole = [0u8; DIRENT_SIZE];
        if self.write(&mut dguard, &hole, off)? != DIRENT_SIZE {
            return fatal(Invariant::Misuse("unlink: short directory write"));
        }
        if guard.kind == FileKind::Directory {
            dguard.nlink -= 1;
            self.write_inode(&dguard)?;
        }
        vfs.iunlockput(dguard)?;

        guard.nlink -= 1;
        self.write_inode(&guard)?;
        info!("unlinked {path:?} (inode {}, {} links left)", ip.inum(), guard.nlink);
        vfs.iunlockput(guard)
    }

    fn open(&self, vfs: &Vfs, ip: &InodeGuard<'_>, mode: OpenFlags) -> Result<FileId> {
        let backing = if ip.kind == FileKind::Device {
            match u16::try_from(ip.major) {
                Ok(major) if (major as usize) < NDEV => Backing::Device { ip: ip.ip(), major },
                _ => return Err(FsError::InvalidArgument("device major out of range")),
            }
        } else {
            Backing::Inode(ip.ip())
        };
        vfs.files().alloc(OpenFile {
            backing,
            readable: !mode.contains(OpenFlags::WRONLY),
            writable: mode.intersects(OpenFlags::WRONLY | OpenFlags::RDWR),
            off: 0,
        })
    }

    fn close(&self, vfs: &Vfs, f: FileId) -> Result<()> {
        match vfs.files().release(f)? {
            Some(file) => vfs.iput(file.backing.inode()),
            None => Ok(()),
        }
    }

    fn sync(&self) -> Result<()> {
        self.cache.flush()
    }
}
