// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The per-worker exact-match flow table.
//!
//! Entries live in a slab so that a [`FlowHandle`] stays valid across
//! unrelated inserts and deletes; the hash map only indexes the slab.  The
//! table belongs to exactly one worker and is mutated only by that worker's
//! control adapter, so no locking is involved.

use hashbrown::HashMap;
use tracing::debug;

use crate::action::ActionList;
use crate::key::{FlowKey, hasher_state};

/// Per-flow statistics.
///
/// `used` is in cycle units internally; it is converted to wall-clock
/// milliseconds only at the table boundary, when building a reply.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlowStats {
    /// Packets that hit the entry.
    pub packet_count: u64,
    /// Bytes carried by those packets.
    pub byte_count: u64,
    /// Cycle stamp of the last hit; zero when never hit.
    pub used: u64,
    /// OR of the masked TCP flags seen by the entry.
    pub tcp_flags: u8,
}

/// A flow entry: key, bounded action list and statistics.
#[derive(Debug, Clone)]
pub struct FlowEntry {
    /// The exact-match key.
    pub key: FlowKey,
    /// Actions executed on each hit, in order.
    pub actions: ActionList,
    /// Hit statistics.
    pub stats: FlowStats,
}

/// Stable, nonzero identifier of a table entry.  Zero is the wire encoding
/// of "no handle" and never names an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowHandle(u64);

impl FlowHandle {
    /// Wire representation.
    #[must_use]
    pub fn as_u64(self) -> u64 {
        self.0
    }

    /// Parse a wire value; zero is the null handle.
    #[must_use]
    pub fn from_u64(raw: u64) -> Option<FlowHandle> {
        (raw != 0).then_some(FlowHandle(raw))
    }

    fn from_slot(slot: usize) -> FlowHandle {
        FlowHandle(slot as u64 + 1)
    }

    fn slot(self) -> usize {
        usize::try_from(self.0 - 1).unwrap_or(usize::MAX)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FlowTableError {
    #[error("flow table full ({0} entries)")]
    Full(usize),
}

/// Exact-match table keyed on the full [`FlowKey`].
#[derive(Debug)]
pub struct FlowTable {
    map: HashMap<FlowKey, usize, ahash::RandomState>,
    slots: Vec<Option<FlowEntry>>,
    free: Vec<usize>,
    capacity: usize,
}

impl FlowTable {
    /// Default entry bound, matching the size the pipeline provisions.
    pub const DEFAULT_CAPACITY: usize = 4096;

    #[must_use]
    pub fn new(capacity: usize) -> FlowTable {
        FlowTable {
            map: HashMap::with_hasher(hasher_state().clone()),
            slots: Vec::new(),
            free: Vec::new(),
            capacity,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Insert an entry for `key`, overwriting in place when the key is
    /// already present (fresh zero statistics either way).  Returns the
    /// stable handle of the resident entry.
    ///
    /// # Errors
    ///
    /// Returns [`FlowTableError::Full`] when the table is at capacity.
    pub fn add(&mut self, key: FlowKey, actions: ActionList) -> Result<FlowHandle, FlowTableError> {
        if let Some(&slot) = self.map.get(&key) {
            debug!("flow table: overwriting entry in slot {slot}");
            self.slots[slot] = Some(FlowEntry {
                key,
                actions,
                stats: FlowStats::default(),
            });
            return Ok(FlowHandle::from_slot(slot));
        }
        if self.map.len() >= self.capacity {
            return Err(FlowTableError::Full(self.capacity));
        }
        let slot = self.free.pop().unwrap_or_else(|| {
            self.slots.push(None);
            self.slots.len() - 1
        });
        self.slots[slot] = Some(FlowEntry {
            key,
            actions,
            stats: FlowStats::default(),
        });
        self.map.insert(key, slot);
        Ok(FlowHandle::from_slot(slot))
    }

    /// Remove the entry matching `key`, returning it when one existed.
    pub fn delete(&mut self, key: &FlowKey) -> Option<FlowEntry> {
        let slot = self.map.remove(key)?;
        let entry = self.slots[slot].take();
        self.free.push(slot);
        entry
    }

    /// Exact-match lookup for the hit path.
    #[must_use]
    pub fn lookup_mut(&mut self, key: &FlowKey) -> Option<&mut FlowEntry> {
        let slot = *self.map.get(key)?;
        self.slots[slot].as_mut()
    }

    /// Resolve a handle to its entry.
    #[must_use]
    pub fn entry(&self, handle: FlowHandle) -> Option<&FlowEntry> {
        self.slots.get(handle.slot())?.as_ref()
    }

    /// Resolve a handle to its entry, mutably.
    #[must_use]
    pub fn entry_mut(&mut self, handle: FlowHandle) -> Option<&mut FlowEntry> {
        self.slots.get_mut(handle.slot())?.as_mut()
    }
}

impl Default for FlowTable {
    fn default() -> FlowTable {
        FlowTable::new(FlowTable::DEFAULT_CAPACITY)
    }
}
