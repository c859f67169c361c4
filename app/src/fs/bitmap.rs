use bitvec::prelude::*;
use log::{debug, warn};

use crate::{
    bio::BlockCache,
    error::{fatal, FsError, Invariant, Result},
};

use super::{SuperBlock, BPB, BSIZE};

/// the free-block bitmap of one device: bit `b` is set when block `b` is in use
#[derive(Debug)]
pub struct BlockBitmap<'a> {
    cache: &'a BlockCache,
    sb: &'a SuperBlock,
    dev: u32,
}

impl<'a> BlockBitmap<'a> {
    pub fn new(cache: &'a BlockCache, sb: &'a SuperBlock, dev: u32) -> Self {
        BlockBitmap { cache, sb, dev }
    }

    /// allocate a zeroed disk block
    /// # Return
    /// [FsError::NoSpace] when every data block is in use
    pub fn allocate(&self) -> Result<u32> {
        let data_start = self.sb.data_start();
        for base in (0..self.sb.size).step_by(BPB as usize) {
            let lo = data_start.saturating_sub(base).min(BPB) as usize;
            let hi = (self.sb.size - base).min(BPB) as usize;
            if lo >= hi {
                continue;
            }
            let mut buf = self.cache.get(self.dev, self.sb.bitmap_block(base))?;
            let found = {
                let bits = buf.data_mut().view_bits_mut::<Lsb0>();
                bits[lo..hi].first_zero().map(|bi| {
                    bits.set(lo + bi, true);
                    lo + bi
                })
            };
            if let Some(bi) = found {
                self.cache.persist(&buf)?;
                self.cache.release(buf);
                let blockno = base + bi as u32;
                self.zero(blockno)?;
                debug!("allocated block {blockno} on device {}", self.dev);
                return Ok(blockno);
            }
        }
        warn!("balloc: out of blocks on device {}", self.dev);
        Err(FsError::NoSpace)
    }

    /// free a disk block
    pub fn free(&self, blockno: u32) -> Result<()> {
        if blockno < self.sb.data_start() || blockno >= self.sb.size {
            return fatal(Invariant::Corrupt(format!(
                "freeing block {blockno} outside the data region"
            )));
        }
        let mut buf = self.cache.get(self.dev, self.sb.bitmap_block(blockno))?;
        let bi = (blockno % BPB) as usize;
        {
            let bits = buf.data_mut().view_bits_mut::<Lsb0>();
            if !bits[bi] {
                return fatal(Invariant::DoubleFree(blockno));
            }
            bits.set(bi, false);
        }
        self.cache.persist(&buf)?;
        debug!("freed block {blockno} on device {}", self.dev);
        Ok(())
    }

    pub fn is_allocated(&self, blockno: u32) -> Result<bool> {
        let buf = self.cache.get(self.dev, self.sb.bitmap_block(blockno))?;
        let bits = buf.data().view_bits::<Lsb0>();
        Ok(bits[(blockno % BPB) as usize])
    }

    /// calculate the number of free data blocks
    pub fn free_count(&self) -> Result<u32> {
        let mut free = 0;
        for blockno in self.sb.data_start()..self.sb.size {
            if !self.is_allocated(blockno)? {
                free += 1;
            }
        }
        Ok(free)
    }

    /// mark blocks `[0, end)` in use, for formatting
    pub fn mark_used(&self, end: u32) -> Result<()> {
        for base in (0..end).step_by(BPB as usize) {
            let mut buf = self.cache.get(self.dev, self.sb.bitmap_block(base))?;
            let hi = (end - base).min(BPB) as usize;
            buf.data_mut().view_bits_mut::<Lsb0>()[..hi].fill(true);
            self.cache.persist(&buf)?;
        }
        Ok(())
    }

    fn zero(&self, blockno: u32) -> Result<()> {
        let mut buf = self.cache.get(self.dev, blockno)?;
        buf.data_mut()[..BSIZE].fill(0);
        self.cache.persist(&buf)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::bio::MemDisk;

    fn setup(size: u32) -> (BlockCache, SuperBlock) {
        let sb = SuperBlock::new(size, 16, 2);
        let cache = BlockCache::new(1, Arc::new(MemDisk::new(size)), 8);
        BlockBitmap::new(&cache, &sb, 1)
            .mark_used(sb.data_start())
            .unwrap();
        (cache, sb)
    }

    #[test]
    fn test_allocate_returns_lowest_free_data_block() -> anyhow::Result<()> {
        let (cache, sb) = setup(40);
        let bitmap = BlockBitmap::new(&cache, &sb, 1);
        let first = bitmap.allocate()?;
        assert_eq!(first, sb.data_start());
        assert_eq!(bitmap.allocate()?, first + 1);
        bitmap.free(first)?;
        assert_eq!(bitmap.allocate()?, first);
        Ok(())
    }

    #[test]
    fn test_allocated_block_is_zeroed() -> anyhow::Result<()> {
        let (cache, sb) = setup(40);
        let target = sb.data_start();
        cache.device().write_block(target, &[0x5A; BSIZE])?;
        let bitmap = BlockBitmap::new(&cache, &sb, 1);
        assert_eq!(bitmap.allocate()?, target);
        let buf = cache.get(1, target)?;
        assert!(buf.data().iter().all(|b| *b == 0));
        Ok(())
    }

    #[test]
    fn test_exhaustion_reports_no_space() -> anyhow::Result<()> {
        let (cache, sb) = setup(40);
        let bitmap = BlockBitmap::new(&cache, &sb, 1);
        for _ in 0..sb.nblocks {
            bitmap.allocate()?;
        }
        assert_eq!(bitmap.free_count()?, 0);
        assert!(matches!(bitmap.allocate(), Err(FsError::NoSpace)));
        Ok(())
    }

    #[test]
    fn test_double_free_is_fatal() -> anyhow::Result<()> {
        let (cache, sb) = setup(40);
        let bitmap = BlockBitmap::new(&cache, &sb, 1);
        let b = bitmap.allocate()?;
        bitmap.free(b)?;
        let err = bitmap.free(b).unwrap_err();
        assert!(matches!(err, FsError::Fatal(Invariant::DoubleFree(x)) if x == b));
        Ok(())
    }
}
