//! block store underneath the filesystem
//!
//! A [BlockDevice] moves whole blocks between memory and a backing store.
//! [BlockCache] sits on top of it and hands out locked [Buf]s:
//! - `get` returns the buffer for (device, block), reading it if needed;
//!   only one holder may have a given buffer at a time
//! - `release` gives the buffer back (dropping it does the same)
//! - `persist` writes the buffer's content through to the device
//! - `pin`/`unpin` keep a buffer resident regardless of eviction
use std::{
    collections::HashMap,
    fmt,
    fs::OpenOptions,
    io::{Error as IoError, ErrorKind},
    path::Path,
    sync::Arc,
};

use log::debug;
use memmap2::MmapMut;
use parking_lot::{lock_api::ArcMutexGuard, Mutex, RawMutex};

use crate::{
    error::{fatal, Invariant, Result},
    fs::BSIZE,
};

/// a fixed-size block store
pub trait BlockDevice: Send + Sync + fmt::Debug {
    /// number of blocks on this device
    fn block_count(&self) -> u32;
    fn read_block(&self, blockno: u32, buf: &mut [u8]) -> Result<()>;
    fn write_block(&self, blockno: u32, buf: &[u8]) -> Result<()>;
    /// make every written block durable
    fn flush(&self) -> Result<()> {
        Ok(())
    }
}

fn block_range(blockno: u32, block_count: u32) -> Result<std::ops::Range<usize>> {
    if blockno >= block_count {
        return Err(IoError::new(
            ErrorKind::InvalidInput,
            format!("block {blockno} beyond device end ({block_count} blocks)"),
        )
        .into());
    }
    let start = blockno as usize * BSIZE;
    Ok(start..start + BSIZE)
}

/// a disk held entirely in memory
#[derive(Debug)]
pub struct MemDisk {
    bytes: Mutex<Vec<u8>>,
    blocks: u32,
}

impl MemDisk {
    pub fn new(blocks: u32) -> Self {
        MemDisk {
            bytes: Mutex::new(vec![0u8; blocks as usize * BSIZE]),
            blocks,
        }
    }
}

impl BlockDevice for MemDisk {
    fn block_count(&self) -> u32 {
        self.blocks
    }

    fn read_block(&self, blockno: u32, buf: &mut [u8]) -> Result<()> {
        let range = block_range(blockno, self.blocks)?;
        buf[..BSIZE].copy_from_slice(&self.bytes.lock()[range]);
        Ok(())
    }

    fn write_block(&self, blockno: u32, buf: &[u8]) -> Result<()> {
        let range = block_range(blockno, self.blocks)?;
        self.bytes.lock()[range].copy_from_slice(&buf[..BSIZE]);
        Ok(())
    }
}

/// a disk image file mapped into memory,
/// something like `Block Device`,like **/dev/sda1**
pub struct ImageDisk {
    mmap: Mutex<MmapMut>,
    blocks: u32,
}

impl fmt::Debug for ImageDisk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageDisk")
            .field("blocks", &self.blocks)
            .finish()
    }
}

impl ImageDisk {
    /// open an existing image for read and write
    pub fn open<P>(image_path: P) -> Result<Self>
    where
        P: AsRef<Path>,
    {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(image_path.as_ref())?;
        let len = file.metadata()?.len();
        if len == 0 || len % BSIZE as u64 != 0 {
            return Err(IoError::new(
                ErrorKind::InvalidData,
                format!("image size {len} is not a whole number of {BSIZE}-byte blocks"),
            )
            .into());
        }
        // Safety
        // This method returns an error when the underlying system call fails,
        // such as when the file is not open with read and write permissions.
        // from https://docs.rs/memmap2/0.5.10/memmap2/struct.MmapMut.html
        let mmap = unsafe { MmapMut::map_mut(&file)? };
        Ok(ImageDisk {
            mmap: Mutex::new(mmap),
            blocks: (len / BSIZE as u64) as u32,
        })
    }

    /// create a new zero-filled image of `blocks` blocks, failing if it exists
    pub fn create<P>(image_path: P, blocks: u32) -> Result<Self>
    where
        P: AsRef<Path>,
    {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(image_path.as_ref())?;
        // all regions are set to zero by `set_len`
        file.set_len(blocks as u64 * BSIZE as u64)?;
        drop(file);
        Self::open(image_path)
    }
}

impl BlockDevice for ImageDisk {
    fn block_count(&self) -> u32 {
        self.blocks
    }

    fn read_block(&self, blockno: u32, buf: &mut [u8]) -> Result<()> {
        let range = block_range(blockno, self.blocks)?;
        buf[..BSIZE].copy_from_slice(&self.mmap.lock()[range]);
        Ok(())
    }

    fn write_block(&self, blockno: u32, buf: &[u8]) -> Result<()> {
        let range = block_range(blockno, self.blocks)?;
        self.mmap.lock()[range].copy_from_slice(&buf[..BSIZE]);
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        Ok(self.mmap.lock().flush()?)
    }
}

pub struct BufData {
    valid: bool,
    bytes: Box<[u8; BSIZE]>,
}

impl Default for BufData {
    fn default() -> Self {
        BufData {
            valid: false,
            bytes: Box::new([0u8; BSIZE]),
        }
    }
}

struct Slot {
    data: Arc<Mutex<BufData>>,
    pins: u32,
}

/// a locked block buffer; at most one `Buf` exists per block at a time
pub struct Buf {
    dev: u32,
    blockno: u32,
    guard: ArcMutexGuard<RawMutex, BufData>,
}

impl fmt::Debug for Buf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buf")
            .field("dev", &self.dev)
            .field("blockno", &self.blockno)
            .finish()
    }
}

impl Buf {
    pub fn dev(&self) -> u32 {
        self.dev
    }

    pub fn blockno(&self) -> u32 {
        self.blockno
    }

    pub fn data(&self) -> &[u8] {
        &self.guard.bytes[..]
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.guard.bytes[..]
    }
}

pub struct BlockCache {
    dev: u32,
    device: Arc<dyn BlockDevice>,
    capacity: usize,
    bufs: Mutex<HashMap<u32, Slot>>,
}

impl fmt::Debug for BlockCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockCache")
            .field("dev", &self.dev)
            .field("device", &self.device)
            .field("capacity", &self.capacity)
            .finish()
    }
}

impl BlockCache {
    pub fn new(dev: u32, device: Arc<dyn BlockDevice>, capacity: usize) -> Self {
        BlockCache {
            dev,
            device,
            capacity: capacity.max(1),
            bufs: Mutex::new(HashMap::new()),
        }
    }

    pub fn device(&self) -> &Arc<dyn BlockDevice> {
        &self.device
    }

    /// return a locked buffer with the contents of the indicated block,
    /// blocking while another holder has it
    pub fn get(&self, dev: u32, blockno: u32) -> Result<Buf> {
        if dev != self.dev {
            return fatal(Invariant::UnknownDevice(dev));
        }
        let data = {
            let mut bufs = self.bufs.lock();
            match bufs.get(&blockno) {
                Some(slot) => slot.data.clone(),
                None => {
                    if bufs.len() >= self.capacity {
                        Self::evict(&mut bufs);
                    }
                    let data = Arc::new(Mutex::new(BufData::default()));
                    bufs.insert(
                        blockno,
                        Slot {
                            data: data.clone(),
                            pins: 0,
                        },
                    );
                    data
                }
            }
        };
        let mut guard = data.lock_arc();
        if !guard.valid {
            self.device.read_block(blockno, &mut guard.bytes[..])?;
            guard.valid = true;
        }
        Ok(Buf {
            dev,
            blockno,
            guard,
        })
    }

    /// release a locked buffer
    pub fn release(&self, buf: Buf) {
        drop(buf)
    }

    /// write the buffer's contents to disk
    pub fn persist(&self, buf: &Buf) -> Result<()> {
        self.device.write_block(buf.blockno, buf.data())
    }

    pub fn pin(&self, buf: &Buf) {
        if let Some(slot) = self.bufs.lock().get_mut(&buf.blockno) {
            slot.pins += 1;
        }
    }

    pub fn unpin(&self, buf: &Buf) {
        if let Some(slot) = self.bufs.lock().get_mut(&buf.blockno) {
            slot.pins = slot.pins.saturating_sub(1);
        }
    }

    /// number of buffers currently resident
    pub fn resident(&self) -> usize {
        self.bufs.lock().len()
    }

    pub fn flush(&self) -> Result<()> {
        self.device.flush()
    }

    // drop every buffer nobody holds and nobody pinned
    fn evict(bufs: &mut HashMap<u32, Slot>) {
        let before = bufs.len();
        bufs.retain(|_, slot| slot.pins > 0 || Arc::strong_count(&slot.data) > 1);
        debug!("block cache evicted {} idle buffers", before - bufs.len());
    }
}
