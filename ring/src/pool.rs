// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Slab buffer pools.
//!
//! A [`Pool`] carves one memory-mapped region into fixed-size slots and hands
//! them out as [`Token`]s wrapping the 32-bit slot index.  Sibling processes
//! see the same region and exchange the raw indices over rings; a raw index is
//! turned back into a token only at the process boundary, through the unsafe
//! [`Token::from_raw`].  Peers never allocate or free slots themselves.

use core::marker::PhantomData;
use core::sync::atomic::{AtomicU32, Ordering};
use std::fs::OpenOptions;
use std::path::Path;

use memmap2::MmapMut;
use tracing::debug;

use crate::ring::{Ring, RingError, RingParams, SyncModel};

/// A type which can live in a [`Pool`] slot.
///
/// `reset` restores the freshly-allocated state; it is called on every
/// successful [`Pool::alloc`].
pub trait PoolItem: Send {
    /// Restore the slot to its freshly-allocated state.
    fn reset(&mut self);
}

#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("failed to map pool region: {0}")]
    Map(#[from] std::io::Error),
    #[error(transparent)]
    Ring(#[from] RingError),
    #[error("pool slot count may not be zero")]
    Empty,
}

/// Exclusive ownership of one pool slot.
///
/// Deliberately neither `Clone` nor `Copy`: a buffer is owned by exactly one
/// component at a time, and enqueueing it to a ring ([`Token::into_raw`])
/// or freeing it ends that ownership.
#[derive(Debug, PartialEq, Eq)]
#[must_use]
pub struct Token<T> {
    idx: u32,
    marker: PhantomData<fn() -> T>,
}

impl<T> Token<T> {
    /// The raw slot index, surrendering ownership (e.g. to a ring).
    #[must_use]
    pub fn into_raw(self) -> u32 {
        self.idx
    }

    /// The raw slot index without surrendering ownership.
    #[must_use]
    pub fn index(&self) -> u32 {
        self.idx
    }

    /// Re-adopt a raw slot index dequeued from a ring.
    ///
    /// # Safety
    ///
    /// `idx` must have been produced by [`Token::into_raw`] on a token of the
    /// same pool, and no other live token may refer to the same slot.  The
    /// ring discipline (§ ownership transfer is total) guarantees this as
    /// long as every handle crosses at most one ring at a time.
    #[must_use]
    pub unsafe fn from_raw(idx: u32) -> Token<T> {
        Token {
            idx,
            marker: PhantomData,
        }
    }
}

/// A fixed-size slab of `T` slots backed by one mapped region.
///
/// Allocation and free go through an internal MPMC ring of free indices, so
/// any worker may allocate or free concurrently.
pub struct Pool<T> {
    name: String,
    region: MmapMut,
    slots: u32,
    free: Ring,
    low_watermark: AtomicU32,
    marker: PhantomData<T>,
}

// SAFETY: distinct tokens index distinct slots, and `&mut T` access demands
// `&mut Token`, so no two threads can alias one slot through the safe API.
unsafe impl<T: Send> Send for Pool<T> {}
unsafe impl<T: Send> Sync for Pool<T> {}

impl<T: PoolItem + Default> Pool<T> {
    /// Create an anonymous-memory pool of `slots` slots.
    ///
    /// # Errors
    ///
    /// Returns a [`PoolError`] if the region cannot be mapped or the free
    /// ring cannot be created.
    pub fn new(name: &str, slots: u32) -> Result<Pool<T>, PoolError> {
        let region = MmapMut::map_anon(Self::region_len(slots))?;
        Self::with_region(name, slots, region)
    }

    /// Create a file-backed pool at `path` so sibling processes can map the
    /// same slots.
    ///
    /// # Errors
    ///
    /// Returns a [`PoolError`] if the file cannot be created, sized or
    /// mapped, or the free ring cannot be created.
    pub fn with_file(name: &str, slots: u32, path: &Path) -> Result<Pool<T>, PoolError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.set_len(Self::region_len(slots) as u64)?;
        // SAFETY: the file was just created and sized by us; nothing else
        // maps it yet.  Siblings map it read/write later, but only ever
        // touch slots whose handles they were handed over a ring.
        let region = unsafe { MmapMut::map_mut(&file)? };
        Self::with_region(name, slots, region)
    }

    fn region_len(slots: u32) -> usize {
        (slots as usize).max(1) * size_of::<T>()
    }

    fn with_region(name: &str, slots: u32, region: MmapMut) -> Result<Pool<T>, PoolError> {
        if slots == 0 {
            return Err(PoolError::Empty);
        }
        let free = Ring::with_params(&RingParams {
            name: format!("{name}_free"),
            size: slots.next_power_of_two(),
            mode: SyncModel::MPMC,
        })?;
        let pool: Pool<T> = Pool {
            name: name.to_string(),
            region,
            slots,
            free,
            low_watermark: AtomicU32::new(slots),
            marker: PhantomData,
        };
        for idx in 0..slots {
            // SAFETY: slot indices are in bounds and nothing else references
            // the freshly mapped region yet.
            unsafe { pool.slot_ptr(idx).write(T::default()) };
            let _ = pool.free.enqueue(idx);
        }
        debug!(
            "created pool {name} with {slots} slots of {} bytes",
            size_of::<T>()
        );
        Ok(pool)
    }
}

impl<T: PoolItem> Pool<T> {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn capacity(&self) -> u32 {
        self.slots
    }

    /// Number of slots currently free.  Approximate while workers move.
    #[must_use]
    pub fn available(&self) -> u32 {
        self.free.count()
    }

    /// Lowest observed free-slot count since creation or the last
    /// [`Pool::reset_low_watermark`].
    #[must_use]
    pub fn low_watermark(&self) -> u32 {
        self.low_watermark.load(Ordering::Relaxed)
    }

    pub fn reset_low_watermark(&self) {
        self.low_watermark.store(self.available(), Ordering::Relaxed);
    }

    /// Allocate a slot, or `None` when the pool is exhausted.
    #[must_use]
    pub fn alloc(&self) -> Option<Token<T>> {
        let idx = self.free.dequeue()?;
        self.low_watermark
            .fetch_min(self.free.count(), Ordering::Relaxed);
        // SAFETY: the free ring hands out each index to exactly one caller.
        let mut token = unsafe { Token::from_raw(idx) };
        self.get_mut(&mut token).reset();
        Some(token)
    }

    /// Return a slot to the pool.
    pub fn free(&self, token: Token<T>) {
        // The free ring was sized to hold every slot, so this cannot fail
        // unless a foreign index was forged.
        if self.free.enqueue(token.into_raw()).is_err() {
            debug!("pool {}: free ring rejected a handle", self.name);
        }
    }

    /// Shared access to the slot owned by `token`.
    #[must_use]
    pub fn get<'p>(&'p self, token: &'p Token<T>) -> &'p T {
        debug_assert!(token.idx < self.slots);
        // SAFETY: `token` proves ownership of this index; shared access to
        // the owner's slot cannot race with another owner.
        unsafe { &*self.slot_ptr(token.idx) }
    }

    /// Exclusive access to the slot owned by `token`.
    #[must_use]
    #[allow(clippy::mut_from_ref)] // exclusivity is carried by &mut Token
    pub fn get_mut<'p>(&'p self, token: &'p mut Token<T>) -> &'p mut T {
        debug_assert!(token.idx < self.slots);
        // SAFETY: `token` proves exclusive ownership of this index and is
        // itself exclusively borrowed for the lifetime of the reference.
        unsafe { &mut *self.slot_ptr(token.idx) }
    }

    fn slot_ptr(&self, idx: u32) -> *mut T {
        debug_assert!(idx < self.slots);
        // Cast is in-bounds: the region was sized as slots * size_of::<T>().
        unsafe { self.region.as_ptr().cast_mut().cast::<T>().add(idx as usize) }
    }
}

impl<T> core::fmt::Debug for Pool<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Pool")
            .field("name", &self.name)
            .field("slots", &self.slots)
            .field("available", &self.free.count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[derive(Default)]
    struct Item {
        value: u64,
        touched: bool,
    }

    impl PoolItem for Item {
        fn reset(&mut self) {
            self.value = 0;
            self.touched = false;
        }
    }

    #[test]
    fn alloc_free_cycle() {
        let pool: Pool<Item> = Pool::new("test_pool", 4).unwrap();
        assert_eq!(pool.available(), 4);

        let mut tokens = Vec::new();
        for i in 0..4u64 {
            let mut t = pool.alloc().unwrap();
            let item = pool.get_mut(&mut t);
            item.value = i;
            item.touched = true;
            tokens.push(t);
        }
        assert_eq!(pool.available(), 0);
        assert!(pool.alloc().is_none());

        for t in tokens {
            pool.free(t);
        }
        assert_eq!(pool.available(), 4);

        // Slots come back reset.
        let t = pool.alloc().unwrap();
        assert_eq!(pool.get(&t).value, 0);
        assert!(!pool.get(&t).touched);
        pool.free(t);
    }

    #[test]
    fn raw_round_trip() {
        let pool: Pool<Item> = Pool::new("raw_pool", 2).unwrap();
        let mut t = pool.alloc().unwrap();
        pool.get_mut(&mut t).value = 42;
        let raw = t.into_raw();
        // SAFETY: `raw` came from into_raw and the original token is gone.
        let t = unsafe { Token::<Item>::from_raw(raw) };
        assert_eq!(pool.get(&t).value, 42);
        pool.free(t);
    }

    #[test]
    fn low_watermark_tracks_pressure() {
        let pool: Pool<Item> = Pool::new("wm_pool", 8).unwrap();
        let a = pool.alloc().unwrap();
        let b = pool.alloc().unwrap();
        let c = pool.alloc().unwrap();
        assert_eq!(pool.low_watermark(), 5);
        pool.free(a);
        pool.free(b);
        pool.free(c);
        assert_eq!(pool.low_watermark(), 5);
        pool.reset_low_watermark();
        assert_eq!(pool.low_watermark(), 8);
    }
}
