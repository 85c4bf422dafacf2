// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

use std::path::PathBuf;
use std::sync::Arc;

use flow::{ActionList, CycleClock, FlowHandle, FlowKey, FlowStats, FlowTable};
use net::PktPool;
use port::client::{ClientReader, ClientWriter};
use port::traits::RxBurst;
use port::{PacketReader, PacketWriter, TxSink, VportTable};
use ring::{RingParams, RingRegistry, SyncModel};
use stats::StatsTable;
use tracing::{debug, warn};

use crate::wakeup::WakeupSocket;

/// Writer bursts are flushed (and a pending wake-up fired) every this many
/// pipeline runs.
pub const FLUSH_INTERVAL: u32 = 32;

/// How many pipeline runs the worker performs per control-message service.
/// Bounds control-plane latency against steady-state throughput.
pub const MAX_PIPELINE_RUNS_PER_CONTROL_RUN: u32 = 10;

/// Per-worker ring capacity for the packet/exception pair.
const WORKER_RING_SIZE: u32 = 2048;
/// Exception writer batch size.
const EXCEPTION_BURST_SIZE: usize = 32;

/// Which table a reader feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableKind {
    /// The exact-match flow table.
    Main,
    /// The stub table terminating the controller's packet-injection port.
    Stub,
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Port(#[from] port::PortError),
    #[error(transparent)]
    Ring(#[from] ring::RingError),
    #[error(transparent)]
    Table(#[from] flow::FlowTableError),
    #[error("wake-up socket: {0}")]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    /// The errno-class value reported in a control reply.
    #[must_use]
    pub fn errno(&self) -> i32 {
        match self {
            PipelineError::Port(port::PortError::BadName(_)) => errno::EINVAL,
            PipelineError::Port(_) | PipelineError::Ring(_) => errno::ENODEV,
            PipelineError::Table(_) => errno::ENOMEM,
            PipelineError::Io(_) => errno::EIO,
        }
    }
}

struct ReaderSlot {
    port: Box<dyn PacketReader>,
    table: TableKind,
    vport: u32,
    enabled: bool,
}

struct WriterSlot {
    port: Box<dyn PacketWriter>,
}

/// One worker's pipeline.
pub struct Pipeline {
    pub(crate) name: String,
    pub(crate) worker: usize,
    table: FlowTable,
    readers: Vec<Option<ReaderSlot>>,
    writers: Vec<Option<WriterSlot>>,
    /// Reader index → external port id, for the upcall translation.
    reader_vport: Vec<u32>,
    exception_writer: usize,
    iteration: u32,
    wakeup_required: bool,
    wakeup: Option<WakeupSocket>,
    pub(crate) pool: Arc<PktPool>,
    registry: Arc<RingRegistry>,
    vports: Arc<VportTable>,
    pub(crate) stats: Arc<StatsTable>,
    keys: Vec<FlowKey>,
}

impl Pipeline {
    /// Build the worker's pipeline: per-worker packet/exception rings, the
    /// controller packet-injection reader wired to the stub table, and the
    /// exception writer the miss path feeds.
    ///
    /// # Errors
    ///
    /// Ring creation or socket failures here are fatal bootstrap errors.
    pub fn new(
        worker: usize,
        pool: Arc<PktPool>,
        registry: Arc<RingRegistry>,
        vports: Arc<VportTable>,
        stats: Arc<StatsTable>,
        wakeup_peer: Option<PathBuf>,
    ) -> Result<Pipeline, PipelineError> {
        let name = format!("swdp_pipeline_{worker:02}");
        let ring_params = |name: String| RingParams {
            name,
            size: WORKER_RING_SIZE,
            mode: SyncModel::SPSC,
        };
        let packet = registry.create(&ring_params(ring::names::packet_ring(worker)))?;
        let exception = registry.create(&ring_params(ring::names::exception_ring(worker)))?;
        let packet_free = registry.create(&ring_params(ring::names::packet_free_ring(worker)))?;
        let packet_alloc = registry.create(&ring_params(ring::names::packet_alloc_ring(worker)))?;

        let exception_port = ClientWriter::with_ring(
            exception,
            Arc::clone(&pool),
            Arc::clone(&stats),
            TxSink::DataPlane { worker },
            EXCEPTION_BURST_SIZE,
        )?;
        let packet_port =
            ClientReader::with_rings(packet, packet_free, packet_alloc, Arc::clone(&pool));

        let wakeup = wakeup_peer.map(WakeupSocket::new).transpose()?;

        debug!("created pipeline {name}");
        Ok(Pipeline {
            name,
            worker,
            table: FlowTable::default(),
            readers: vec![Some(ReaderSlot {
                port: Box::new(packet_port),
                table: TableKind::Stub,
                vport: port::INVALID_INDEX,
                enabled: true,
            })],
            writers: vec![Some(WriterSlot {
                port: Box::new(exception_port),
            })],
            reader_vport: vec![port::INVALID_INDEX],
            exception_writer: 0,
            iteration: 0,
            wakeup_required: false,
            wakeup,
            pool,
            registry,
            vports,
            stats,
            keys: Vec::with_capacity(port::RX_BURST),
        })
    }

    /// The pipeline name, `swdp_pipeline_NN`.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The owning worker id.
    #[must_use]
    pub fn worker(&self) -> usize {
        self.worker
    }

    /// Latch a controller wake-up for the next flush.
    pub fn request_wakeup(&mut self) {
        self.wakeup_required = true;
    }

    /// One framework step: visit every enabled reader round-robin, classify
    /// and dispatch its burst, then flush on the flush interval.
    pub fn run(&mut self) {
        for slot_idx in 0..self.readers.len() {
            let (burst, table, vport) = {
                let Some(slot) = self.readers[slot_idx].as_mut() else {
                    continue;
                };
                if !slot.enabled {
                    continue;
                }
                let mut burst = RxBurst::new();
                slot.port.rx(&mut burst);
                if burst.is_empty() {
                    continue;
                }
                (burst, slot.table, slot.vport)
            };
            match table {
                #[allow(clippy::cast_possible_truncation)] // slot count is tiny
                TableKind::Main => self.process_main(slot_idx as u32, vport, burst),
                TableKind::Stub => self.process_stub(burst),
            }
        }

        self.iteration += 1;
        if self.iteration >= FLUSH_INTERVAL {
            self.flush_writers();
            self.iteration = 0;
            if self.wakeup_required {
                if let Some(wakeup) = &self.wakeup {
                    wakeup.send();
                }
                self.wakeup_required = false;
            }
        }
    }

    fn process_main(&mut self, reader_idx: u32, vport: u32, mut burst: RxBurst) {
        let pool = Arc::clone(&self.pool);
        self.keys.clear();
        flow::extract_burst(&pool, &mut burst, reader_idx, &mut self.keys);
        self.stats
            .vport(vport, self.worker)
            .rx_add(burst.len() as u64);

        // One timestamp per burst, as the stats contract allows.
        let tsc = CycleClock::now_cycles();
        for (i, pkt) in burst.into_iter().enumerate() {
            let key = self.keys[i];
            let hit_actions = match self.table.lookup_mut(&key) {
                Some(entry) => {
                    let (len, tcp_flags) = {
                        let buf = pool.get(&pkt);
                        let flags = if key.ether_type == net::eth::ETHER_TYPE_IPV4
                            && key.ip_proto == net::ipv4::PROTO_TCP
                        {
                            net::tcp::flags_from_frame(buf.data())
                        } else {
                            None
                        };
                        (buf.data_len(), flags)
                    };
                    entry.stats.packet_count += 1;
                    entry.stats.byte_count += u64::from(len);
                    entry.stats.used = tsc;
                    if let Some(flags) = tcp_flags {
                        entry.stats.tcp_flags |= flags;
                    }
                    Some(entry.actions.clone())
                }
                None => None,
            };
            match hit_actions {
                Some(actions) => self.execute_hit_actions(pkt, &actions),
                None => self.miss(pkt, key),
            }
        }
    }

    fn process_stub(&mut self, burst: RxBurst) {
        for pkt in burst {
            self.handle_injected_packet(pkt);
        }
    }

    fn miss(&mut self, pkt: net::Pkt, key: FlowKey) {
        self.send_upcall(pkt, key, message::upcall::UpcallCmd::Miss);
        self.wakeup_required = true;
    }

    pub(crate) fn emit(&mut self, pkt: net::Pkt, port_id: u32) {
        match self.vports.out_index(port_id, self.worker) {
            Ok(index) => {
                if let Some(slot) = self
                    .writers
                    .get_mut(index as usize)
                    .and_then(Option::as_mut)
                {
                    slot.port.tx(pkt);
                    return;
                }
                warn!("{}: writer slot {index} for port {port_id} is gone", self.name);
                self.drop_towards(pkt, port_id);
            }
            Err(_) => {
                warn!("{}: no writer bound for port {port_id}", self.name);
                self.drop_towards(pkt, port_id);
            }
        }
    }

    fn drop_towards(&mut self, pkt: net::Pkt, port_id: u32) {
        if port_id < port::MAX_VPORTS {
            self.stats.vport(port_id, self.worker).tx_drop_add(1);
        } else {
            self.stats.data(self.worker).tx_drop_add(1);
        }
        self.pool.free(pkt);
    }

    /// Prepend an upcall header and queue the buffer on the exception
    /// writer.  On headroom failure the buffer is dropped and the data-plane
    /// tx-drop counter incremented.  Returns whether the upcall was queued.
    pub(crate) fn send_upcall(
        &mut self,
        mut pkt: net::Pkt,
        key: FlowKey,
        cmd: message::upcall::UpcallCmd,
    ) -> bool {
        // Translate the worker-local in-port index back to the external id;
        // worker-local state must not reach the controller.
        let external = self
            .reader_vport
            .get(key.in_port as usize)
            .copied()
            .unwrap_or(port::INVALID_INDEX);
        if external == port::INVALID_INDEX {
            warn!("{}: upcall for unmapped in-port {}", self.name, key.in_port);
            self.stats.data(self.worker).tx_drop_add(1);
            self.pool.free(pkt);
            return false;
        }
        let mut wire_key = key;
        wire_key.in_port = external;

        let prepended = {
            let buf = self.pool.get_mut(&mut pkt);
            // Discard everything except the data of this segment.
            buf.collapse_to_data();
            #[allow(clippy::cast_possible_truncation)] // header is 40 bytes
            match buf.prepend(message::upcall::UPCALL_WIRE_SIZE as u16) {
                Ok(data) => {
                    message::upcall::Upcall { cmd, key: wire_key }.encode(data);
                    true
                }
                Err(_) => false,
            }
        };
        if !prepended {
            warn!("{}: no headroom for upcall, dropping packet", self.name);
            self.stats.data(self.worker).tx_drop_add(1);
            self.pool.free(pkt);
            return false;
        }

        let exception = self.exception_writer;
        if let Some(slot) = self.writers.get_mut(exception).and_then(Option::as_mut) {
            slot.port.tx(pkt);
            true
        } else {
            // the exception writer is created at init and never removed
            unreachable!("exception writer missing")
        }
    }

    /// Flush every writer's pending burst.  Also called on shutdown.
    pub fn flush_writers(&mut self) {
        for slot in self.writers.iter_mut().flatten() {
            slot.port.flush();
        }
    }

    // ---- control-plane mutations -------------------------------------

    /// Attach `id` as an in-port: create the reader, record the name,
    /// connect it to the main table and enable it.
    ///
    /// # Errors
    ///
    /// Propagates registry/device failures and name validation.
    pub fn port_in_add(&mut self, id: u32, name: &str) -> Result<(), PipelineError> {
        // validate before any state changes; the reply must reflect a
        // rejected request against an untouched pipeline
        port::validate_name(name)?;
        let reader = port::create_reader(
            &self.vports,
            &self.registry,
            &self.pool,
            &self.stats,
            id,
            self.worker,
        )?;
        let index = self.alloc_reader_slot();
        self.readers[index] = Some(ReaderSlot {
            port: reader,
            table: TableKind::Main,
            vport: id,
            enabled: true,
        });
        self.reader_vport[index] = id;
        #[allow(clippy::cast_possible_truncation)] // slot count is tiny
        self.vports.set_in_index(id, self.worker, index as u32)?;
        self.vports.set_name(id, name)?;
        debug!("{}: added in-port {id} ({name}) at reader {index}", self.name);
        Ok(())
    }

    /// Detach the in-port side of `id`: disable, unbind, forget the slot.
    ///
    /// # Errors
    ///
    /// Returns [`port::PortError::NotBound`] when `id` has no reader here.
    pub fn port_in_del(&mut self, id: u32) -> Result<(), PipelineError> {
        let index = self.vports.in_index(id)? as usize;
        match self.readers.get_mut(index) {
            Some(slot) if slot.is_some() => *slot = None,
            _ => return Err(port::PortError::NotBound(id).into()),
        }
        self.reader_vport[index] = port::INVALID_INDEX;
        self.vports.clear_in_index(id)?;
        debug!("{}: removed in-port {id} from reader {index}", self.name);
        Ok(())
    }

    /// Attach `id` as an out-port on this worker.
    ///
    /// # Errors
    ///
    /// Propagates registry/device failures.
    pub fn port_out_add(&mut self, id: u32) -> Result<(), PipelineError> {
        let writer = port::create_writer(
            &self.vports,
            &self.registry,
            &self.pool,
            &self.stats,
            id,
            self.worker,
        )?;
        let index = self.alloc_writer_slot();
        self.writers[index] = Some(WriterSlot { port: writer });
        #[allow(clippy::cast_possible_truncation)] // slot count is tiny
        self.vports.set_out_index(id, self.worker, index as u32)?;
        debug!("{}: added out-port {id} at writer {index}", self.name);
        Ok(())
    }

    /// Detach the out-port side of `id`, flushing in-flight buffers first.
    ///
    /// # Errors
    ///
    /// Returns [`port::PortError::NotBound`] when `id` has no writer here.
    pub fn port_out_del(&mut self, id: u32) -> Result<(), PipelineError> {
        let index = self.vports.out_index(id, self.worker)? as usize;
        match self.writers.get_mut(index) {
            Some(slot) if slot.is_some() => {
                if let Some(writer) = slot.as_mut() {
                    writer.port.flush();
                }
                *slot = None;
            }
            _ => return Err(port::PortError::NotBound(id).into()),
        }
        self.vports.clear_out_index(id, self.worker)?;
        debug!("{}: removed out-port {id} from writer {index}", self.name);
        Ok(())
    }

    fn alloc_reader_slot(&mut self) -> usize {
        if let Some(index) = self.readers.iter().position(Option::is_none) {
            return index;
        }
        self.readers.push(None);
        self.reader_vport.push(port::INVALID_INDEX);
        self.readers.len() - 1
    }

    fn alloc_writer_slot(&mut self) -> usize {
        if let Some(index) = self.writers.iter().position(Option::is_none) {
            return index;
        }
        self.writers.push(None);
        self.writers.len() - 1
    }

    /// Insert a flow entry.  `key` carries the external in-port id; it is
    /// translated to this worker's reader index before insertion.
    ///
    /// # Errors
    ///
    /// `ENODEV`-class errors for unknown ports, `ENOMEM` when the table is
    /// full.
    ///
    /// # Panics
    ///
    /// `Drop` or `ToController` inside a multi-action list is an invariant
    /// violation by the controller and panics.
    pub fn flow_add(
        &mut self,
        key: &FlowKey,
        actions: &ActionList,
    ) -> Result<FlowHandle, PipelineError> {
        for action in actions {
            match action {
                flow::Action::Drop => {
                    assert!(actions.len() == 1, "DROP only supported as a single action");
                }
                flow::Action::ToController => {
                    assert!(
                        actions.len() == 1,
                        "TO-CONTROLLER only supported as a single action"
                    );
                }
                flow::Action::Output { port: out } => {
                    if *out >= port::MAX_VPORTS {
                        return Err(port::PortError::InvalidId(*out).into());
                    }
                }
                _ => {}
            }
        }
        let internal = self.translate_key(key)?;
        let handle = self.table.add(internal, actions.clone())?;
        debug!("{}: added flow, handle {:#x}", self.name, handle.as_u64());
        Ok(handle)
    }

    /// Delete the entry matching `key` (external in-port id).  Returns
    /// whether a matching entry existed, and its final statistics.
    ///
    /// # Errors
    ///
    /// Currently infallible for well-formed keys; an unbound in-port simply
    /// matches nothing.
    pub fn flow_del(&mut self, key: &FlowKey) -> Result<(bool, FlowStats), PipelineError> {
        let Ok(internal) = self.translate_key(key) else {
            return Ok((false, FlowStats::default()));
        };
        match self.table.delete(&internal) {
            Some(entry) => Ok((true, entry.stats)),
            None => Ok((false, FlowStats::default())),
        }
    }

    /// Statistics of the entry behind `handle`, in raw cycle units.
    #[must_use]
    pub fn flow_stats(&self, handle: FlowHandle) -> Option<FlowStats> {
        self.table.entry(handle).map(|entry| entry.stats)
    }

    /// Overwrite the statistics of the entry behind `handle`.  Used for the
    /// stats carry-over on replace; values stay in cycle units.
    pub fn flow_set_stats(&mut self, handle: FlowHandle, stats: FlowStats) -> bool {
        match self.table.entry_mut(handle) {
            Some(entry) => {
                entry.stats = stats;
                true
            }
            None => false,
        }
    }

    /// A copy of the action list of the entry behind `handle`.
    #[must_use]
    pub fn flow_actions(&self, handle: FlowHandle) -> Option<ActionList> {
        self.table.entry(handle).map(|entry| entry.actions.clone())
    }

    /// Number of installed flows.
    #[must_use]
    pub fn flow_count(&self) -> usize {
        self.table.len()
    }

    fn translate_key(&self, key: &FlowKey) -> Result<FlowKey, PipelineError> {
        let mut internal = *key;
        internal.in_port = self.vports.in_index(key.in_port)?;
        Ok(internal)
    }
}
