// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicU32, Ordering};

/// How many sides may touch a ring end concurrently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// Exactly one thread uses this end.
    Single,
    /// Any number of threads use this end.
    Multi,
}

/// Producer/consumer synchronisation model of a ring, fixed at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncModel {
    /// Producer-side access model.
    pub producer: Access,
    /// Consumer-side access model.
    pub consumer: Access,
}

impl SyncModel {
    /// Single producer, single consumer.
    pub const SPSC: SyncModel = SyncModel {
        producer: Access::Single,
        consumer: Access::Single,
    };
    /// Multi producer, single consumer.
    pub const MPSC: SyncModel = SyncModel {
        producer: Access::Multi,
        consumer: Access::Single,
    };
    /// Multi producer, multi consumer.
    pub const MPMC: SyncModel = SyncModel {
        producer: Access::Multi,
        consumer: Access::Multi,
    };
}

/// Parameters used to create a [`Ring`].
#[derive(Debug, Clone)]
pub struct RingParams {
    /// Ring name; the cross-process lookup key.
    pub name: String,
    /// Slot count.  Must be a power of two.
    pub size: u32,
    /// Synchronisation model.
    pub mode: SyncModel,
}

impl RingParams {
    /// Longest accepted ring name.
    pub const MAX_NAME_LENGTH: usize = 63;

    #[cold]
    pub(crate) fn validate(&self) -> Result<(), RingError> {
        if !self.size.is_power_of_two() {
            return Err(RingError::SizeNotPowerOfTwo(self.size));
        }
        if !self
            .name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
        {
            return Err(RingError::IllegalCharacters(self.name.clone()));
        }
        if self.name.is_empty() || self.name.len() > Self::MAX_NAME_LENGTH {
            return Err(RingError::NameTooLong(self.name.clone()));
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RingError {
    #[error("ring size must be a power of two ({0} given)")]
    SizeNotPowerOfTwo(u32),
    #[error("only alphanumeric ring names are supported (may contain -, _, and .): {0:?}")]
    IllegalCharacters(String),
    #[error("ring name empty or longer than the 63 byte maximum: {0:?}")]
    NameTooLong(String),
    #[error("a ring named {0:?} already exists")]
    Exists(String),
    #[error("no ring named {0:?}")]
    NotFound(String),
}

/// Returned by [`Ring::enqueue`] when no slot is free.  The value comes back
/// to the caller, which still owns the buffer it refers to.
#[derive(Debug, thiserror::Error)]
#[error("ring full")]
pub struct RingFull(pub u32);

#[repr(align(64))]
struct Pos {
    head: AtomicU32,
    tail: AtomicU32,
}

impl Pos {
    fn new() -> Pos {
        Pos {
            head: AtomicU32::new(0),
            tail: AtomicU32::new(0),
        }
    }
}

/// A bounded lock-free ring of `u32` buffer handles.
///
/// Head and tail indices run freely and wrap mod 2^32; slot positions are the
/// index masked by `size - 1`.  Each end uses the two-stage head/tail
/// protocol: a producer first claims a range by advancing `prod.head`
/// (CAS under [`Access::Multi`]), writes its slots, then publishes them by
/// advancing `prod.tail` once earlier claimants have published theirs.
/// Consumers mirror this against `cons`.
pub struct Ring {
    name: String,
    size: u32,
    mask: u32,
    mode: SyncModel,
    prod: Pos,
    cons: Pos,
    slots: Box<[UnsafeCell<u32>]>,
}

// SAFETY: slot cells are only written inside a claimed [old_head, new_head)
// range and only read after the matching Release store of the opposite tail
// is observed with Acquire, so no two threads touch a slot concurrently.
unsafe impl Send for Ring {}
unsafe impl Sync for Ring {}

impl Ring {
    /// Create a ring from validated parameters.
    ///
    /// # Errors
    ///
    /// Returns a [`RingError`] if the parameters fail validation.
    pub fn with_params(params: &RingParams) -> Result<Ring, RingError> {
        params.validate()?;
        let slots = (0..params.size)
            .map(|_| UnsafeCell::new(0))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Ok(Ring {
            name: params.name.clone(),
            size: params.size,
            mask: params.size - 1,
            mode: params.mode,
            prod: Pos::new(),
            cons: Pos::new(),
            slots,
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn capacity(&self) -> u32 {
        self.size
    }

    /// Number of occupied slots.  Approximate while other threads move.
    #[must_use]
    pub fn count(&self) -> u32 {
        // Free-running indices; their difference never exceeds `size`.
        let prod_tail = self.prod.tail.load(Ordering::Acquire);
        let cons_tail = self.cons.tail.load(Ordering::Acquire);
        prod_tail.wrapping_sub(cons_tail)
    }

    /// Number of free slots.  Approximate while other threads move.
    #[must_use]
    pub fn free_count(&self) -> u32 {
        self.size - self.count()
    }

    /// Enqueue as many of `vals` as fit.  Returns the number enqueued.
    pub fn enqueue_burst(&self, vals: &[u32]) -> usize {
        if vals.is_empty() {
            return 0;
        }
        #[allow(clippy::cast_possible_truncation)] // burst sizes are tiny
        let n = vals.len() as u32;
        let Some((head, new_head, take)) = self.move_prod_head(n) else {
            return 0;
        };
        for (i, val) in vals.iter().take(take as usize).enumerate() {
            #[allow(clippy::cast_possible_truncation)]
            let slot = (head.wrapping_add(i as u32) & self.mask) as usize;
            // SAFETY: slots [head, new_head) are claimed exclusively above.
            unsafe { *self.slots[slot].get() = *val };
        }
        self.publish(&self.prod, self.mode.producer, head, new_head);
        take as usize
    }

    /// Enqueue a single value.
    ///
    /// # Errors
    ///
    /// Returns [`RingFull`] carrying the value back when no slot is free.
    pub fn enqueue(&self, val: u32) -> Result<(), RingFull> {
        if self.enqueue_burst(&[val]) == 1 {
            Ok(())
        } else {
            Err(RingFull(val))
        }
    }

    /// Dequeue up to `out.len()` values.  Returns the number dequeued.
    pub fn dequeue_burst(&self, out: &mut [u32]) -> usize {
        if out.is_empty() {
            return 0;
        }
        #[allow(clippy::cast_possible_truncation)]
        let n = out.len() as u32;
        let Some((head, new_head, take)) = self.move_cons_head(n) else {
            return 0;
        };
        for (i, out_slot) in out.iter_mut().take(take as usize).enumerate() {
            #[allow(clippy::cast_possible_truncation)]
            let slot = (head.wrapping_add(i as u32) & self.mask) as usize;
            // SAFETY: slots [head, new_head) are claimed exclusively above,
            // and the producer published them before we observed prod.tail.
            *out_slot = unsafe { *self.slots[slot].get() };
        }
        self.publish(&self.cons, self.mode.consumer, head, new_head);
        take as usize
    }

    /// Dequeue a single value.
    #[must_use]
    pub fn dequeue(&self) -> Option<u32> {
        let mut out = [0u32];
        if self.dequeue_burst(&mut out) == 1 {
            Some(out[0])
        } else {
            None
        }
    }

    fn move_prod_head(&self, n: u32) -> Option<(u32, u32, u32)> {
        loop {
            let head = self.prod.head.load(Ordering::Relaxed);
            // Acquire pairs with the consumer's tail publication so slot
            // reads by the consumer are complete before we overwrite.
            let cons_tail = self.cons.tail.load(Ordering::Acquire);
            let free = self.size - head.wrapping_sub(cons_tail);
            let take = n.min(free);
            if take == 0 {
                return None;
            }
            let new_head = head.wrapping_add(take);
            match self.mode.producer {
                Access::Single => {
                    self.prod.head.store(new_head, Ordering::Relaxed);
                    return Some((head, new_head, take));
                }
                Access::Multi => {
                    if self
                        .prod
                        .head
                        .compare_exchange_weak(head, new_head, Ordering::Relaxed, Ordering::Relaxed)
                        .is_ok()
                    {
                        return Some((head, new_head, take));
                    }
                }
            }
        }
    }

    fn move_cons_head(&self, n: u32) -> Option<(u32, u32, u32)> {
        loop {
            let head = self.cons.head.load(Ordering::Relaxed);
            // Acquire pairs with the producer's tail publication so the slot
            // contents are visible before we read them.
            let prod_tail = self.prod.tail.load(Ordering::Acquire);
            let avail = prod_tail.wrapping_sub(head);
            let take = n.min(avail);
            if take == 0 {
                return None;
            }
            let new_head = head.wrapping_add(take);
            match self.mode.consumer {
                Access::Single => {
                    self.cons.head.store(new_head, Ordering::Relaxed);
                    return Some((head, new_head, take));
                }
                Access::Multi => {
                    if self
                        .cons
                        .head
                        .compare_exchange_weak(head, new_head, Ordering::Relaxed, Ordering::Relaxed)
                        .is_ok()
                    {
                        return Some((head, new_head, take));
                    }
                }
            }
        }
    }

    fn publish(&self, pos: &Pos, access: Access, old_head: u32, new_head: u32) {
        if access == Access::Multi {
            // Earlier claimants publish first; preserves slot visibility order.
            while pos.tail.load(Ordering::Relaxed) != old_head {
                core::hint::spin_loop();
            }
        }
        pos.tail.store(new_head, Ordering::Release);
    }
}

impl core::fmt::Debug for Ring {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Ring")
            .field("name", &self.name)
            .field("size", &self.size)
            .field("mode", &self.mode)
            .field("count", &self.count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::Arc;

    fn ring(name: &str, size: u32, mode: SyncModel) -> Ring {
        Ring::with_params(&RingParams {
            name: name.to_string(),
            size,
            mode,
        })
        .unwrap()
    }

    #[test]
    fn rejects_bad_params() {
        assert!(matches!(
            Ring::with_params(&RingParams {
                name: "ok".into(),
                size: 24,
                mode: SyncModel::SPSC,
            }),
            Err(RingError::SizeNotPowerOfTwo(24))
        ));
        assert!(matches!(
            Ring::with_params(&RingParams {
                name: "no spaces".into(),
                size: 16,
                mode: SyncModel::SPSC,
            }),
            Err(RingError::IllegalCharacters(_))
        ));
        assert!(matches!(
            Ring::with_params(&RingParams {
                name: "x".repeat(64),
                size: 16,
                mode: SyncModel::SPSC,
            }),
            Err(RingError::NameTooLong(_))
        ));
    }

    #[test]
    fn fifo_order_and_capacity() {
        let r = ring("fifo", 8, SyncModel::SPSC);
        assert_eq!(r.enqueue_burst(&[1, 2, 3, 4, 5, 6, 7, 8, 9]), 8);
        assert_eq!(r.count(), 8);
        assert_eq!(r.free_count(), 0);
        assert!(r.enqueue(10).is_err());

        let mut out = [0u32; 8];
        assert_eq!(r.dequeue_burst(&mut out[..3]), 3);
        assert_eq!(&out[..3], &[1, 2, 3]);
        assert_eq!(r.enqueue_burst(&[10, 11]), 2);
        assert_eq!(r.dequeue_burst(&mut out[..7]), 7);
        assert_eq!(&out[..7], &[4, 5, 6, 7, 8, 10, 11]);
        assert_eq!(r.dequeue(), None);
    }

    #[test]
    fn wraps_many_times() {
        let r = ring("wrap", 4, SyncModel::SPSC);
        for round in 0u32..1000 {
            assert_eq!(r.enqueue_burst(&[round, round + 1]), 2);
            let mut out = [0u32; 2];
            assert_eq!(r.dequeue_burst(&mut out), 2);
            assert_eq!(out, [round, round + 1]);
        }
        assert_eq!(r.count(), 0);
    }

    #[test]
    fn spsc_threaded_transfers_everything() {
        const N: u32 = 100_000;
        let r = Arc::new(ring("spsc-threaded", 256, SyncModel::SPSC));
        let producer = {
            let r = Arc::clone(&r);
            std::thread::spawn(move || {
                let mut next = 0u32;
                while next < N {
                    if r.enqueue(next).is_ok() {
                        next += 1;
                    }
                }
            })
        };
        let mut seen = 0u32;
        let mut out = [0u32; 64];
        while seen < N {
            let n = r.dequeue_burst(&mut out);
            for &v in &out[..n] {
                assert_eq!(v, seen);
                seen += 1;
            }
        }
        producer.join().unwrap();
    }

    #[test]
    fn mpsc_threaded_loses_nothing() {
        const PRODUCERS: u32 = 4;
        const PER_PRODUCER: u32 = 10_000;
        let r = Arc::new(ring("mpsc-threaded", 128, SyncModel::MPSC));
        let handles: Vec<_> = (0..PRODUCERS)
            .map(|p| {
                let r = Arc::clone(&r);
                std::thread::spawn(move || {
                    for i in 0..PER_PRODUCER {
                        let val = p * PER_PRODUCER + i;
                        while r.enqueue(val).is_err() {
                            std::hint::spin_loop();
                        }
                    }
                })
            })
            .collect();

        let mut seen = vec![false; (PRODUCERS * PER_PRODUCER) as usize];
        let mut got = 0;
        let mut out = [0u32; 64];
        while got < seen.len() {
            let n = r.dequeue_burst(&mut out);
            for &v in &out[..n] {
                assert!(!seen[v as usize], "value {v} seen twice");
                seen[v as usize] = true;
                got += 1;
            }
        }
        for h in handles {
            h.join().unwrap();
        }
        assert!(seen.iter().all(|s| *s));
    }
}
