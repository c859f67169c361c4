//! the in-memory inode cache
//!
//! An inode describes a single unnamed file. The cache holds at most one
//! entry per (device, inode number) so that concurrent users agree on
//! its state and can synchronize through it.
//!
//! * Allocation: a slot is in use while its reference count is positive;
//!   [InodeCache::get] takes a reference and [InodeCache::put] drops it.
//!   A slot whose count has fallen to zero may be recycled for another inode.
//!
//! * Validity: the content copied from disk is only meaningful once `valid`
//!   is set. [InodeCache::lock] loads it on first use; recycling a slot
//!   clears it.
//!
//! * Locking: a cached inode must be locked before its content is read
//!   or modified. The lock is held by an [InodeGuard] and released when
//!   the guard is dropped. Relocking an inode the current thread already
//!   holds is a lock discipline violation.
//!
//! Reference counts and identities are protected by one table lock, while
//! each slot's content has its own long-term lock, so a thread can keep a
//! long-lived reference (an open file, a working directory) without
//! blocking anyone until it actually locks the inode.
use std::{
    fmt,
    ops::{Deref, DerefMut},
    thread::{self, ThreadId},
};

use log::trace;
use parking_lot::{Mutex, MutexGuard};

use crate::{
    error::{fatal, Invariant, Result},
    fs::{FileKind, NDIRECT},
    vfs::Stat,
};

/// a counted reference to a cached inode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InodeRef {
    slot: usize,
    dev: u32,
    inum: u32,
}

impl InodeRef {
    pub fn dev(&self) -> u32 {
        self.dev
    }

    pub fn inum(&self) -> u32 {
        self.inum
    }
}

/// copy of a disk inode plus its validity flag
#[derive(Debug, Clone, Default)]
pub struct InodeInner {
    /// content has been read from disk
    pub(crate) valid: bool,
    pub kind: FileKind,
    pub major: i16,
    pub minor: i16,
    pub nlink: i16,
    pub size: u32,
    pub addrs: [u32; NDIRECT + 1],
}

#[derive(Debug, Default, Clone, Copy)]
struct SlotMeta {
    dev: u32,
    inum: u32,
    refcnt: usize,
}

#[derive(Default)]
struct InodeSlot {
    /// thread currently holding the content lock
    holder: Mutex<Option<ThreadId>>,
    inner: Mutex<InodeInner>,
}

pub struct InodeCache {
    meta: Mutex<Vec<SlotMeta>>,
    slots: Box<[InodeSlot]>,
}

impl fmt::Debug for InodeCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InodeCache")
            .field("capacity", &self.slots.len())
            .field("in_use", &self.in_use())
            .finish()
    }
}

impl InodeCache {
    pub fn new(capacity: usize) -> Self {
        InodeCache {
            meta: Mutex::new(vec![SlotMeta::default(); capacity]),
            slots: (0..capacity).map(|_| InodeSlot::default()).collect(),
        }
    }

    /// find the inode with number `inum` on device `dev` and return a
    /// reference to it, without locking it or reading it from disk
    pub fn get(&self, dev: u32, inum: u32) -> Result<InodeRef> {
        let mut meta = self.meta.lock();
        let mut empty = None;
        for (slot, m) in meta.iter_mut().enumerate() {
            if m.refcnt > 0 && m.dev == dev && m.inum == inum {
                m.refcnt += 1;
                return Ok(InodeRef { slot, dev, inum });
            }
            if empty.is_none() && m.refcnt == 0 {
                empty = Some(slot);
            }
        }
        let Some(slot) = empty else {
            return fatal(Invariant::CacheExhausted(meta.len()));
        };
        meta[slot] = SlotMeta {
            dev,
            inum,
            refcnt: 1,
        };
        // unreferenced, so nobody holds the content lock
        self.slots[slot].inner.lock().valid = false;
        trace!("inode ({dev}, {inum}) cached in slot {slot}");
        Ok(InodeRef { slot, dev, inum })
    }

    /// increment the reference count
    pub fn dup(&self, ip: &InodeRef) -> Result<InodeRef> {
        let mut meta = self.meta.lock();
        Self::check_identity(&meta, ip)?;
        meta[ip.slot].refcnt += 1;
        Ok(*ip)
    }

    /// lock the given inode, calling `load` to read it from disk if needed
    pub fn lock<F>(&self, ip: &InodeRef, load: F) -> Result<InodeGuard<'_>>
    where
        F: FnOnce(&mut InodeInner) -> Result<()>,
    {
        Self::check_identity(&self.meta.lock(), ip)?;
        let mut guard = self.lock_content(ip)?;
        if !guard.valid {
            load(&mut *guard)?;
            if guard.kind == FileKind::Free {
                return fatal(Invariant::InvalidInodeType {
                    inum: ip.inum,
                    kind: 0,
                });
            }
            guard.valid = true;
        }
        Ok(guard)
    }

    /// drop a reference to an in-memory inode. When it is the last
    /// reference and the inode has no links, `release` runs with the
    /// inode locked to free it on disk; the slot is then invalidated
    pub fn put<F>(&self, ip: InodeRef, release: F) -> Result<()>
    where
        F: FnOnce(&mut InodeGuard<'_>) -> Result<()>,
    {
        {
            let mut meta = self.meta.lock();
            Self::check_identity(&meta, &ip)?;
            // only the put that finds the last reference goes on
            if meta[ip.slot].refcnt > 1 {
                meta[ip.slot].refcnt -= 1;
                return Ok(());
            }
        }
        let mut result = Ok(());
        {
            // no other reference, so the lock is free unless we hold it
            let mut guard = self.lock_content(&ip)?;
            let still_sole = self.meta.lock()[ip.slot].refcnt == 1;
            if still_sole && guard.valid && guard.nlink == 0 {
                trace!("inode ({}, {}) has no links, freeing", ip.dev, ip.inum);
                result = release(&mut guard);
                guard.valid = false;
            }
        }
        self.meta.lock()[ip.slot].refcnt -= 1;
        result
    }

    /// current reference count of `ip`'s slot
    pub fn refcnt(&self, ip: &InodeRef) -> usize {
        self.meta.lock()[ip.slot].refcnt
    }

    /// number of slots with a positive reference count
    pub fn in_use(&self) -> usize {
        self.meta.lock().iter().filter(|m| m.refcnt > 0).count()
    }

    fn check_identity(meta: &[SlotMeta], ip: &InodeRef) -> Result<()> {
        let m = &meta[ip.slot];
        if m.refcnt < 1 || m.dev != ip.dev || m.inum != ip.inum {
            return fatal(Invariant::LockDiscipline(
                "use of an inode reference that was already released",
            ));
        }
        Ok(())
    }

    fn lock_content(&self, ip: &InodeRef) -> Result<InodeGuard<'_>> {
        let slot = &self.slots[ip.slot];
        let me = thread::current().id();
        if *slot.holder.lock() == Some(me) {
            return fatal(Invariant::LockDiscipline("inode locked twice by one thread"));
        }
        let inner = slot.inner.lock();
        *slot.holder.lock() = Some(me);
        Ok(InodeGuard {
            cache: self,
            ip: *ip,
            inner,
        })
    }
}

/// a locked cached inode; dropping it unlocks the inode
pub struct InodeGuard<'a> {
    cache: &'a InodeCache,
    ip: InodeRef,
    inner: MutexGuard<'a, InodeInner>,
}

impl fmt::Debug for InodeGuard<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InodeGuard")
            .field("ip", &self.ip)
            .field("inner", &*self.inner)
            .finish()
    }
}

impl InodeGuard<'_> {
    /// the reference this lock was taken through
    pub fn ip(&self) -> InodeRef {
        self.ip
    }

    pub fn dev(&self) -> u32 {
        self.ip.dev
    }

    pub fn inum(&self) -> u32 {
        self.ip.inum
    }

    pub fn unlock(self) {}

    /// copy stat information from the inode
    pub fn stat(&self) -> Stat {
        Stat {
            dev: self.ip.dev,
            ino: self.ip.inum,
            kind: self.inner.kind,
            nlink: self.inner.nlink,
            size: self.inner.size,
        }
    }
}

impl Deref for InodeGuard<'_> {
    type Target = InodeInner;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl DerefMut for InodeGuard<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.inner
    }
}

impl Drop for InodeGuard<'_> {
    fn drop(&mut self) {
        *self.cache.slots[self.ip.slot].holder.lock() = None;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Barrier,
    };

    use super::*;
    use crate::error::FsError;

    fn load_file(inner: &mut InodeInner) -> Result<()> {
        inner.kind = FileKind::RegularFile;
        inner.nlink = 1;
        Ok(())
    }

    #[test]
    fn test_same_identity_shares_a_slot() -> anyhow::Result<()> {
        let cache = InodeCache::new(4);
        let a = cache.get(1, 5)?;
        let b = cache.get(1, 5)?;
        assert_eq!(a, b);
        assert_eq!(cache.refcnt(&a), 2);
        let c = cache.get(1, 6)?;
        assert_ne!(a, c);
        assert_eq!(cache.in_use(), 2);
        Ok(())
    }

    #[test]
    fn test_exhaustion_is_fatal() -> anyhow::Result<()> {
        let cache = InodeCache::new(2);
        cache.get(1, 1)?;
        cache.get(1, 2)?;
        let err = cache.get(1, 3).unwrap_err();
        assert!(matches!(err, FsError::Fatal(Invariant::CacheExhausted(2))));
        Ok(())
    }

    #[test]
    fn test_lock_loads_once() -> anyhow::Result<()> {
        let cache = InodeCache::new(2);
        let loads = AtomicUsize::new(0);
        let ip = cache.get(1, 3)?;
        for _ in 0..3 {
            let guard = cache.lock(&ip, |inner| {
                loads.fetch_add(1, Ordering::SeqCst);
                load_file(inner)
            })?;
            assert_eq!(guard.kind, FileKind::RegularFile);
        }
        assert_eq!(loads.load(Ordering::SeqCst), 1);
        Ok(())
    }

    #[test]
    fn test_recycled_slot_is_reloaded() -> anyhow::Result<()> {
        let cache = InodeCache::new(1);
        let ip = cache.get(1, 3)?;
        cache.lock(&ip, load_file)?.unlock();
        cache.put(ip, |_| Ok(()))?;

        let other = cache.get(1, 4)?;
        let mut reloaded = false;
        cache.lock(&other, |inner| {
            reloaded = true;
            load_file(inner)
        })?;
        assert!(reloaded);
        Ok(())
    }

    #[test]
    fn test_relock_by_same_thread_is_fatal() -> anyhow::Result<()> {
        let cache = InodeCache::new(2);
        let ip = cache.get(1, 3)?;
        let _guard = cache.lock(&ip, load_file)?;
        let err = cache.lock(&ip, load_file).unwrap_err();
        assert!(matches!(
            err,
            FsError::Fatal(Invariant::LockDiscipline(_))
        ));
        Ok(())
    }

    #[test]
    fn test_released_reference_is_rejected() -> anyhow::Result<()> {
        let cache = InodeCache::new(2);
        let ip = cache.get(1, 3)?;
        cache.put(ip, |_| Ok(()))?;
        assert!(cache.lock(&ip, load_file).unwrap_err().is_fatal());
        assert!(cache.dup(&ip).unwrap_err().is_fatal());
        Ok(())
    }

    #[test]
    fn test_free_type_after_load_is_fatal() -> anyhow::Result<()> {
        let cache = InodeCache::new(2);
        let ip = cache.get(1, 3)?;
        let err = cache.lock(&ip, |_| Ok(())).unwrap_err();
        assert!(err.is_fatal());
        Ok(())
    }

    #[test]
    fn test_last_put_of_unlinked_inode_releases() -> anyhow::Result<()> {
        let cache = InodeCache::new(2);
        let ip = cache.get(1, 3)?;
        let extra = cache.dup(&ip)?;
        {
            let mut guard = cache.lock(&ip, load_file)?;
            guard.nlink = 0;
        }
        let mut released = 0;
        cache.put(extra, |_| {
            released += 1;
            Ok(())
        })?;
        assert_eq!(released, 0);
        cache.put(ip, |guard| {
            released += 1;
            guard.kind = FileKind::Free;
            Ok(())
        })?;
        assert_eq!(released, 1);
        assert_eq!(cache.in_use(), 0);
        Ok(())
    }

    #[test]
    fn test_concurrent_puts_release_exactly_once() -> anyhow::Result<()> {
        for _ in 0..200 {
            let cache = Arc::new(InodeCache::new(2));
            let released = Arc::new(AtomicUsize::new(0));
            let ip = cache.get(1, 3)?;
            let extra = cache.dup(&ip)?;
            {
                let mut guard = cache.lock(&ip, load_file)?;
                guard.nlink = 0;
            }

            let barrier = Arc::new(Barrier::new(2));
            let handles: Vec<_> = [ip, extra]
                .into_iter()
                .map(|r| {
                    let cache = cache.clone();
                    let released = released.clone();
                    let barrier = barrier.clone();
                    thread::spawn(move || -> Result<()> {
                        barrier.wait();
                        cache.put(r, |guard| {
                            released.fetch_add(1, Ordering::SeqCst);
                            guard.kind = FileKind::Free;
                            Ok(())
                        })
                    })
                })
                .collect();
            for handle in handles {
                handle.join().unwrap()?;
            }
            assert_eq!(released.load(Ordering::SeqCst), 1);
            assert_eq!(cache.in_use(), 0);
        }
        Ok(())
    }

    #[test]
    fn test_linked_inode_survives_last_put() -> anyhow::Result<()> {
        let cache = InodeCache::new(2);
        let ip = cache.get(1, 3)?;
        cache.lock(&ip, load_file)?.unlock();
        cache.put(ip, |_| panic!("linked inode must not be released"))?;
        Ok(())
    }

    #[test]
    fn test_lock_blocks_other_threads() -> anyhow::Result<()> {
        let cache = Arc::new(InodeCache::new(2));
        let ip = cache.get(1, 3)?;
        let mut guard = cache.lock(&ip, load_file)?;
        let handle = {
            let cache = cache.clone();
            thread::spawn(move || -> Result<u32> {
                let guard = cache.lock(&ip, load_file)?;
                Ok(guard.size)
            })
        };
        // the other thread can only see the size after we unlock
        guard.size = 42;
        drop(guard);
        assert_eq!(handle.join().unwrap()?, 42);
        Ok(())
    }
}
