// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The per-worker control channel.
//!
//! Request ring: one controller → this worker, single consumer.  Reply
//! ring: every worker → the controller, multi producer.  The parallel
//! free/alloc pair carries control buffers for the controller's use: the
//! worker drains `free` on every service call and keeps `alloc` above
//! [`ALLOC_THRESHOLD`].
//!
//! Control buffers come from their own slab, distinct from the packet slab,
//! so pressure on one never starves the other.

use std::sync::Arc;

use message::Message;
use message::codec::MESSAGE_WIRE_SIZE;
use pipeline::Pipeline;
use ring::{Ring, RingError, RingParams, RingRegistry, SyncModel};
use stats::StatsTable;
use tracing::{debug, warn};

use crate::adapter::{ControlAdapter, unknown_reply};

/// Capacity of every control-channel ring.
pub const CONTROL_RING_SIZE: u32 = 2048;
/// The worker tops up the controller's alloc ring whenever it holds fewer
/// buffers than this.
pub const ALLOC_THRESHOLD: u32 = CONTROL_RING_SIZE / 4;
/// Most messages handled, freed or allocated per service call.
pub const CONTROL_BURST_SIZE: usize = 32;

/// Data room of one control buffer.
pub const CTRL_DATA_SIZE: usize = 512;
const _: () = assert!(CTRL_DATA_SIZE >= MESSAGE_WIRE_SIZE);

/// A fixed-size control-message buffer.
#[repr(C)]
pub struct CtrlBuf {
    len: u16,
    data: [u8; CTRL_DATA_SIZE],
}

impl Default for CtrlBuf {
    fn default() -> CtrlBuf {
        CtrlBuf {
            len: 0,
            data: [0; CTRL_DATA_SIZE],
        }
    }
}

impl ring::PoolItem for CtrlBuf {
    fn reset(&mut self) {
        self.len = 0;
    }
}

impl CtrlBuf {
    /// The record bytes written into this buffer.
    #[must_use]
    pub fn record(&self) -> &[u8] {
        &self.data[..usize::from(self.len)]
    }

    /// Store a record.
    ///
    /// # Panics
    ///
    /// Panics if `bytes` exceeds the fixed data room; records are
    /// fixed-size and always fit.
    pub fn set_record(&mut self, bytes: &[u8]) {
        assert!(bytes.len() <= CTRL_DATA_SIZE);
        self.data[..bytes.len()].copy_from_slice(bytes);
        #[allow(clippy::cast_possible_truncation)] // bounded just above
        {
            self.len = bytes.len() as u16;
        }
    }

    /// Mutable access to the full data room, for in-place encoding.
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Declare `len` record bytes after in-place encoding.
    ///
    /// # Panics
    ///
    /// Panics if `len` exceeds the fixed data room; records are fixed-size
    /// and always fit.
    pub fn set_len(&mut self, len: u16) {
        assert!(usize::from(len) <= CTRL_DATA_SIZE);
        self.len = len;
    }
}

impl core::fmt::Debug for CtrlBuf {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CtrlBuf").field("len", &self.len).finish()
    }
}

/// A pool of control buffers.
pub type CtrlPool = ring::Pool<CtrlBuf>;
/// Exclusive ownership of one pooled control buffer.
pub type CtrlToken = ring::Token<CtrlBuf>;

/// One worker's four control rings plus the control-buffer pool.
pub struct ControlChannel {
    worker: usize,
    request: Arc<Ring>,
    reply: Arc<Ring>,
    free: Arc<Ring>,
    alloc: Arc<Ring>,
    pool: Arc<CtrlPool>,
    stats: Arc<StatsTable>,
}

impl ControlChannel {
    /// Create this worker's rings (and the shared reply ring on first use).
    ///
    /// # Errors
    ///
    /// Ring creation failures here are fatal bootstrap errors.
    pub fn new(
        worker: usize,
        registry: &RingRegistry,
        pool: Arc<CtrlPool>,
        stats: Arc<StatsTable>,
    ) -> Result<ControlChannel, RingError> {
        let spsc = |name: String| RingParams {
            name,
            size: CONTROL_RING_SIZE,
            mode: SyncModel::SPSC,
        };
        let request = registry.create(&spsc(ring::names::request_ring(worker)))?;
        let free = registry.create(&spsc(ring::names::control_free_ring(worker)))?;
        let alloc = registry.create(&spsc(ring::names::control_alloc_ring(worker)))?;
        // every worker produces into the one reply ring
        let reply = registry.ensure(&RingParams {
            name: ring::names::reply_ring(),
            size: CONTROL_RING_SIZE,
            mode: SyncModel::MPSC,
        })?;
        debug!("created control channel for worker {worker}");
        Ok(ControlChannel {
            worker,
            request,
            reply,
            free,
            alloc,
            pool,
            stats,
        })
    }

    /// Service one batch of control messages, then perform the buffer
    /// obligations (drain `free`, top up `alloc`).
    pub fn service(&mut self, adapter: &mut ControlAdapter, pipeline: &mut Pipeline) {
        let mut handles = [0u32; CONTROL_BURST_SIZE];
        let n = self.request.dequeue_burst(&mut handles);
        self.stats.control(self.worker).rx_add(n as u64);
        for &raw in &handles[..n] {
            // SAFETY: the controller surrendered ownership on enqueue.
            let token = unsafe { CtrlToken::from_raw(raw) };
            let decoded = Message::decode(self.pool.get(&token).record());
            self.pool.free(token);
            let reply = match decoded {
                Ok(request) => adapter.handle(pipeline, request),
                Err(e) => {
                    warn!("worker {}: undecodable control message: {e}", self.worker);
                    unknown_reply()
                }
            };
            self.send_reply(&reply);
        }

        self.drain_free();
        self.top_up_alloc();
    }

    /// Emit one reply on the shared reply ring.
    pub fn send_reply(&self, reply: &Message) {
        let Some(mut token) = self.pool.alloc() else {
            warn!("worker {}: control pool empty, reply lost", self.worker);
            self.stats.control(self.worker).tx_drop_add(1);
            return;
        };
        {
            let buf = self.pool.get_mut(&mut token);
            // fixed-size records always fit the data room
            reply
                .encode(buf.data_mut())
                .unwrap_or_else(|_| unreachable!("control buffer smaller than a record"));
            #[allow(clippy::cast_possible_truncation)] // record is 344 bytes
            buf.set_len(MESSAGE_WIRE_SIZE as u16);
        }
        match self.reply.enqueue(token.into_raw()) {
            Ok(()) => self.stats.control(self.worker).tx_add(1),
            Err(ring::RingFull(raw)) => {
                self.stats.control(self.worker).tx_drop_add(1);
                // SAFETY: the enqueue failed, so the handle never left us.
                let token = unsafe { CtrlToken::from_raw(raw) };
                self.pool.free(token);
            }
        }
    }

    fn drain_free(&self) {
        let mut handles = [0u32; CONTROL_BURST_SIZE];
        loop {
            let n = self.free.dequeue_burst(&mut handles);
            if n == 0 {
                return;
            }
            for &raw in &handles[..n] {
                // SAFETY: the controller surrendered ownership on enqueue.
                let token = unsafe { CtrlToken::from_raw(raw) };
                self.pool.free(token);
            }
        }
    }

    fn top_up_alloc(&self) {
        while self.alloc.count() < ALLOC_THRESHOLD {
            let mut handles = [0u32; CONTROL_BURST_SIZE];
            let mut got = 0;
            for slot in &mut handles {
                match self.pool.alloc() {
                    Some(token) => {
                        *slot = token.into_raw();
                        got += 1;
                    }
                    None => break,
                }
            }
            if got == 0 {
                // control slab exhausted; the next service call retries
                return;
            }
            let pushed = self.alloc.enqueue_burst(&handles[..got]);
            for &raw in &handles[pushed..got] {
                // SAFETY: these handles never reached the controller.
                let token = unsafe { CtrlToken::from_raw(raw) };
                self.pool.free(token);
            }
            if pushed < got {
                return;
            }
        }
    }
}
