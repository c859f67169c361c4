//! the system-wide open-file table
use std::fmt;

use log::{debug, warn};
use parking_lot::Mutex;

use crate::error::{fatal, FsError, Invariant, Result};

use super::{InodeRef, Stat, Vfs};

/// index of an entry in the open-file table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileId(usize);

/// what an open file reads from and writes to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backing {
    Inode(InodeRef),
    /// a device file: data moves through the device switch
    Device { ip: InodeRef, major: u16 },
}

impl Backing {
    /// the inode reference the open file holds
    pub fn inode(&self) -> InodeRef {
        match self {
            Backing::Inode(ip) | Backing::Device { ip, .. } => *ip,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenFile {
    pub backing: Backing,
    pub readable: bool,
    pub writable: bool,
    /// current offset, meaningful for inode-backed files
    pub off: u32,
}

#[derive(Debug, Default)]
struct FileSlot {
    refcnt: usize,
    file: Option<OpenFile>,
}

pub struct FileTable {
    slots: Mutex<Vec<FileSlot>>,
}

impl fmt::Debug for FileTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slots = self.slots.lock();
        f.debug_struct("FileTable")
            .field("capacity", &slots.len())
            .field("in_use", &slots.iter().filter(|s| s.refcnt > 0).count())
            .finish()
    }
}

impl FileTable {
    pub fn new(capacity: usize) -> Self {
        FileTable {
            slots: Mutex::new((0..capacity).map(|_| FileSlot::default()).collect()),
        }
    }

    /// allocate a file structure with one reference
    pub fn alloc(&self, file: OpenFile) -> Result<FileId> {
        let mut slots = self.slots.lock();
        match slots.iter_mut().enumerate().find(|(_, s)| s.refcnt == 0) {
            Some((idx, slot)) => {
                slot.refcnt = 1;
                slot.file = Some(file);
                Ok(FileId(idx))
            }
            None => {
                warn!("file table full ({} entries)", slots.len());
                Err(FsError::TooManyOpenFiles)
            }
        }
    }

    /// increment the reference count
    pub fn dup(&self, f: FileId) -> Result<FileId> {
        let mut slots = self.slots.lock();
        Self::live(&mut slots, f)?.refcnt += 1;
        Ok(f)
    }

    /// drop a reference; the file is handed back when it was the last one
    pub(crate) fn release(&self, f: FileId) -> Result<Option<OpenFile>> {
        let mut slots = self.slots.lock();
        let slot = Self::live(&mut slots, f)?;
        slot.refcnt -= 1;
        if slot.refcnt > 0 {
            return Ok(None);
        }
        Ok(slot.file.take())
    }

    /// a snapshot of the open file
    pub fn get(&self, f: FileId) -> Result<OpenFile> {
        let mut slots = self.slots.lock();
        let slot = Self::live(&mut slots, f)?;
        match slot.file {
            Some(file) => Ok(file),
            None => fatal(Invariant::Misuse("referenced file slot is empty")),
        }
    }

    pub fn refcnt(&self, f: FileId) -> usize {
        self.slots.lock().get(f.0).map_or(0, |s| s.refcnt)
    }

    fn advance(&self, f: FileId, n: usize) -> Result<()> {
        let mut slots = self.slots.lock();
        if let Some(file) = Self::live(&mut slots, f)?.file.as_mut() {
            file.off += n as u32;
        }
        Ok(())
    }

    fn live(slots: &mut [FileSlot], f: FileId) -> Result<&mut FileSlot> {
        match slots.get_mut(f.0) {
            Some(slot) if slot.refcnt > 0 => Ok(slot),
            _ => fatal(Invariant::Misuse("use of a closed file")),
        }
    }
}

/// file-level operations
impl Vfs {
    /// read from file `f`, advancing its offset for inode-backed files
    pub fn file_read(&self, f: FileId, dst: &mut [u8]) -> Result<usize> {
        let file = self.files().get(f)?;
        if !file.readable {
            return Err(FsError::PermissionDenied);
        }
        match file.backing {
            Backing::Device { major, .. } => self.devices().read(major, dst),
            Backing::Inode(ip) => {
                let mut guard = self.ilock(&ip)?;
                // offset is read under the inode lock so sharers see each other's progress
                let off = self.files().get(f)?.off;
                let n = self.ops().read(&mut guard, dst, off)?;
                self.files().advance(f, n)?;
                Ok(n)
            }
        }
    }

    /// write to file `f`. Inode writes are split into chunks that each fit
    /// one operation's block budget; a short chunk is a failure
    pub fn file_write(&self, f: FileId, src: &[u8]) -> Result<usize> {
        let file = self.files().get(f)?;
        if !file.writable {
            return Err(FsError::PermissionDenied);
        }
        let ip = match file.backing {
            Backing::Device { major, .. } => return self.devices().write(major, src),
            Backing::Inode(ip) => ip,
        };
        let max = self.config().max_write_bytes();
        let mut written = 0;
        while written < src.len() {
            let n1 = (src.len() - written).min(max);
            let r = {
                let mut guard = self.ilock(&ip)?;
                let off = self.files().get(f)?.off;
                let r = self.ops().write(&mut guard, &src[written..written + n1], off)?;
                self.files().advance(f, r)?;
                r
            };
            if r != n1 {
                debug!("short write: {r} of {n1} bytes after {written}");
                return Err(FsError::NoSpace);
            }
            written += r;
        }
        Ok(written)
    }

    /// get metadata about file `f`
    pub fn file_stat(&self, f: FileId) -> Result<Stat> {
        let ip = self.files().get(f)?.backing.inode();
        let guard = self.ilock(&ip)?;
        Ok(guard.stat())
    }

    /// increment the reference count of file `f`
    pub fn file_dup(&self, f: FileId) -> Result<FileId> {
        self.files().dup(f)
    }

    /// drop a reference to file `f`, releasing its inode on the last one
    pub fn file_close(&self, f: FileId) -> Result<()> {
        self.ops().close(self, f)
    }
}
