// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Kernel tap-style ports.
//!
//! The tap session itself (device creation, interface config) is set up
//! outside the datapath and injected as a [`TapDevice`].  The kernel side is
//! single-reader / multi-writer from the datapath's point of view, so the
//! writer takes a per-port mutex across the kernel submit and retries a few
//! times on transient failure.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use net::{Pkt, PktPool};
use parking_lot::Mutex;
use tracing::warn;

use crate::traits::{PacketReader, PacketWriter, RxBurst, SharedStats, TxSink};

/// Kernel submit retries on transient failure.
pub const TX_RETRIES: u32 = 4;
/// Fixed delay between those retries.
pub const TX_RETRY_DELAY: Duration = Duration::from_micros(10);
/// Writer batch size.
pub const TX_BURST_SIZE: usize = 32;

/// A non-blocking kernel tap endpoint.
///
/// `recv` and `send` follow non-blocking socket conventions: `WouldBlock`
/// when nothing can move right now.
pub trait TapDevice: Send + Sync {
    /// Submit one frame to the kernel.
    ///
    /// # Errors
    ///
    /// `WouldBlock`/`Interrupted` are transient; anything else is a device
    /// failure.
    fn send(&self, frame: &[u8]) -> io::Result<usize>;

    /// Receive one frame from the kernel into `buf`, returning its length.
    ///
    /// # Errors
    ///
    /// `WouldBlock` when no frame is pending.
    fn recv(&self, buf: &mut [u8]) -> io::Result<usize>;
}

/// The per-port pieces every worker's writer shares: the device and the
/// kernel-submit lock.
pub struct TapShared {
    dev: Arc<dyn TapDevice>,
    submit_lock: Mutex<()>,
}

impl TapShared {
    #[must_use]
    pub fn new(dev: Arc<dyn TapDevice>) -> TapShared {
        TapShared {
            dev,
            submit_lock: Mutex::new(()),
        }
    }
}

impl core::fmt::Debug for TapShared {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TapShared").finish_non_exhaustive()
    }
}

/// Reader half of a veth port.  Single consumer per port.
pub struct VethReader {
    shared: Arc<TapShared>,
    pool: Arc<PktPool>,
    stats: SharedStats,
    port: u32,
    worker: usize,
}

impl VethReader {
    #[must_use]
    pub fn new(
        shared: Arc<TapShared>,
        pool: Arc<PktPool>,
        stats: SharedStats,
        port: u32,
        worker: usize,
    ) -> VethReader {
        VethReader {
            shared,
            pool,
            stats,
            port,
            worker,
        }
    }
}

impl PacketReader for VethReader {
    fn rx(&mut self, burst: &mut RxBurst) -> usize {
        let mut got = 0;
        while burst.remaining_capacity() > 0 {
            let Some(mut pkt) = self.pool.alloc() else {
                // Slab exhausted; whatever the kernel holds must wait.
                self.stats.vport(self.port, self.worker).rx_drop_add(1);
                break;
            };
            let buf = self.pool.get_mut(&mut pkt);
            match self.shared.dev.recv(buf.frame_room_mut()) {
                Ok(len) => {
                    #[allow(clippy::cast_possible_truncation)] // room is 2048
                    if buf.set_data_len(len as u16).is_err() {
                        self.stats.vport(self.port, self.worker).rx_drop_add(1);
                        self.pool.free(pkt);
                        continue;
                    }
                    burst.push(pkt);
                    got += 1;
                }
                Err(e) => {
                    if e.kind() != io::ErrorKind::WouldBlock {
                        warn!("veth port {}: recv failed: {e}", self.port);
                    }
                    self.pool.free(pkt);
                    break;
                }
            }
        }
        got
    }
}

/// Writer half of a veth port.  Any worker may hold one; the kernel submit
/// itself is serialised by the shared mutex.
pub struct VethWriter {
    shared: Arc<TapShared>,
    pool: Arc<PktPool>,
    stats: SharedStats,
    sink: TxSink,
    buf: Vec<u32>,
}

impl VethWriter {
    #[must_use]
    pub fn new(
        shared: Arc<TapShared>,
        pool: Arc<PktPool>,
        stats: SharedStats,
        sink: TxSink,
    ) -> VethWriter {
        VethWriter {
            shared,
            pool,
            stats,
            sink,
            buf: Vec::with_capacity(TX_BURST_SIZE),
        }
    }

    fn send_burst(&mut self) {
        if self.buf.is_empty() {
            return;
        }
        let cell = self.sink.cell(&self.stats);
        // One kernel submit section per burst; other workers' writers wait.
        let guard = self.shared.submit_lock.lock();
        for &raw in &self.buf {
            // SAFETY: handles in `buf` were owned by this writer since tx().
            let mut pkt = unsafe { Pkt::from_raw(raw) };
            let frame = self.pool.get_mut(&mut pkt);
            let mut sent = false;
            for retry in 0..=TX_RETRIES {
                match self.shared.dev.send(frame.data()) {
                    Ok(_) => {
                        sent = true;
                        break;
                    }
                    Err(e)
                        if matches!(
                            e.kind(),
                            io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
                        ) =>
                    {
                        if retry < TX_RETRIES {
                            crate::spin_delay(TX_RETRY_DELAY);
                        }
                    }
                    Err(e) => {
                        warn!("veth port: send failed: {e}");
                        break;
                    }
                }
            }
            if sent {
                cell.tx_add(1);
            } else {
                cell.tx_drop_add(1);
            }
            // The kernel copies on submit, so the buffer is ours to free
            // either way.
            self.pool.free(pkt);
        }
        drop(guard);
        self.buf.clear();
    }
}

impl PacketWriter for VethWriter {
    fn tx(&mut self, pkt: Pkt) {
        self.buf.push(pkt.into_raw());
        if self.buf.len() >= TX_BURST_SIZE {
            self.send_burst();
        }
    }

    fn flush(&mut self) {
        self.send_burst();
    }
}

/// An in-memory [`TapDevice`]: frames sent appear on `sent`, frames queued
/// with [`LoopbackTap::inject`] are received.  For tests and bring-up.
#[derive(Default)]
pub struct LoopbackTap {
    queues: Mutex<LoopbackQueues>,
}

#[derive(Default)]
struct LoopbackQueues {
    inbound: std::collections::VecDeque<Vec<u8>>,
    sent: Vec<Vec<u8>>,
}

impl LoopbackTap {
    #[must_use]
    pub fn new() -> LoopbackTap {
        LoopbackTap::default()
    }

    /// Queue a frame for the datapath to receive.
    pub fn inject(&self, frame: &[u8]) {
        self.queues.lock().inbound.push_back(frame.to_vec());
    }

    /// Frames the datapath submitted so far.
    #[must_use]
    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.queues.lock().sent.clone()
    }
}

impl TapDevice for LoopbackTap {
    fn send(&self, frame: &[u8]) -> io::Result<usize> {
        self.queues.lock().sent.push(frame.to_vec());
        Ok(frame.len())
    }

    fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        let mut queues = self.queues.lock();
        match queues.inbound.pop_front() {
            Some(frame) => {
                let len = frame.len().min(buf.len());
                buf[..len].copy_from_slice(&frame[..len]);
                Ok(len)
            }
            None => Err(io::Error::from(io::ErrorKind::WouldBlock)),
        }
    }
}
