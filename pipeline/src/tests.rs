// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

use std::sync::Arc;

use flow::{Action, ActionList, FlowKey};
use message::upcall::{Upcall, UpcallCmd};
use net::{Pkt, PktBuf, PktPool};
use port::{PortKind, VportTable};
use ring::RingRegistry;
use stats::StatsTable;

use crate::{FLUSH_INTERVAL, Pipeline};

const POOL_SLOTS: u32 = 4096;
const IN_PORT: u32 = 32; // first vhost id
const OUT_A: u32 = 33;
const OUT_B: u32 = 34;

struct Fixture {
    registry: Arc<RingRegistry>,
    pool: Arc<PktPool>,
    vports: Arc<VportTable>,
    stats: Arc<StatsTable>,
    pipeline: Pipeline,
}

impl Fixture {
    fn new() -> Fixture {
        let registry = Arc::new(RingRegistry::new());
        let pool = Arc::new(PktPool::new("pipeline_test_pool", POOL_SLOTS).unwrap());
        let vports = Arc::new(VportTable::new(0x1));
        let stats = Arc::new(StatsTable::new(port::MAX_VPORTS, port::MAX_WORKERS));
        let pipeline = Pipeline::new(
            0,
            Arc::clone(&pool),
            Arc::clone(&registry),
            Arc::clone(&vports),
            Arc::clone(&stats),
            None,
        )
        .unwrap();
        let mut fixture = Fixture {
            registry,
            pool,
            vports,
            stats,
            pipeline,
        };
        for id in [IN_PORT, OUT_A, OUT_B] {
            port::vhost::ensure_rings(&fixture.registry, id).unwrap();
        }
        fixture.pipeline.port_in_add(IN_PORT, "guest0").unwrap();
        fixture.pipeline.port_out_add(IN_PORT).unwrap();
        fixture.pipeline.port_out_add(OUT_A).unwrap();
        fixture.pipeline.port_out_add(OUT_B).unwrap();
        fixture.vports.vhost_up("guest0").unwrap();
        // The other out-ports have no guest; open their gates directly so
        // writers deliver instead of dropping.
        for id in [OUT_A, OUT_B] {
            fixture
                .vports
                .port(id)
                .unwrap()
                .attached_handle()
                .store(true, core::sync::atomic::Ordering::Release);
        }
        fixture.warm_up();
        fixture
    }

    /// Run until the stub reader has filled the packet-alloc ring, so pool
    /// accounting is stable across the tests proper.
    fn warm_up(&mut self) {
        for _ in 0..2 * FLUSH_INTERVAL {
            self.pipeline.run();
        }
        let alloc = self
            .registry
            .lookup(&ring::names::packet_alloc_ring(0))
            .unwrap();
        assert_eq!(alloc.free_count(), 0);
    }

    fn inject(&self, frame: &[u8]) {
        let mut pkt = self.pool.alloc().unwrap();
        self.pool.get_mut(&mut pkt).set_data(frame).unwrap();
        let rx = self
            .registry
            .lookup(&ring::names::vhost_rx_ring(IN_PORT))
            .unwrap();
        rx.enqueue(pkt.into_raw()).unwrap();
    }

    fn drain_tx(&self, id: u32) -> Vec<Pkt> {
        let tx = self
            .registry
            .lookup(&ring::names::vhost_tx_ring(id))
            .unwrap();
        let mut out = Vec::new();
        while let Some(raw) = tx.dequeue() {
            // SAFETY: the writer surrendered ownership on enqueue.
            out.push(unsafe { Pkt::from_raw(raw) });
        }
        out
    }

    fn drain_exception(&self) -> Vec<Pkt> {
        let ring = self
            .registry
            .lookup(&ring::names::exception_ring(0))
            .unwrap();
        let mut out = Vec::new();
        while let Some(raw) = ring.dequeue() {
            // SAFETY: the writer surrendered ownership on enqueue.
            out.push(unsafe { Pkt::from_raw(raw) });
        }
        out
    }

    fn run_and_flush(&mut self) {
        self.pipeline.run();
        self.pipeline.flush_writers();
    }

    fn free_all(&self, pkts: Vec<Pkt>) {
        for pkt in pkts {
            self.pool.free(pkt);
        }
    }
}

fn tcp_frame(tcp_flags: u8) -> Vec<u8> {
    let mut frame = Vec::new();
    frame.extend_from_slice(&[0x01; 6]);
    frame.extend_from_slice(&[0x02; 6]);
    frame.extend_from_slice(&net::eth::ETHER_TYPE_IPV4.to_be_bytes());
    let mut l3 = vec![0u8; 20];
    l3[0] = 0x45;
    l3[8] = 64;
    l3[9] = net::ipv4::PROTO_TCP;
    l3[12..16].copy_from_slice(&0xDEAD_BEEFu32.to_be_bytes());
    l3[16..20].copy_from_slice(&0xBABE_FACEu32.to_be_bytes());
    frame.extend_from_slice(&l3);
    let mut l4 = vec![0u8; 20];
    l4[0..2].copy_from_slice(&0x4000u16.to_be_bytes());
    l4[2..4].copy_from_slice(&0x4001u16.to_be_bytes());
    l4[13] = tcp_flags;
    frame.extend_from_slice(&l4);
    frame.extend_from_slice(&[0xEE; 10]); // payload
    frame
}

fn control_key(frame: &[u8], external_port: u32) -> FlowKey {
    let mut buf = PktBuf::default();
    buf.set_data(frame).unwrap();
    flow::extract(&mut buf, external_port)
}

fn actions(list: &[Action]) -> ActionList {
    let mut out = ActionList::new();
    for action in list {
        out.push(*action);
    }
    out
}

#[test]
fn miss_goes_to_the_exception_path() {
    let mut fixture = Fixture::new();
    let frame = tcp_frame(0x02);
    fixture.inject(&frame);
    fixture.run_and_flush();

    let mut upcalls = fixture.drain_exception();
    assert_eq!(upcalls.len(), 1);
    let buf = fixture.pool.get(&upcalls[0]);
    let upcall = Upcall::decode(buf.data()).unwrap();
    assert_eq!(upcall.cmd, UpcallCmd::Miss);
    // the in-port was translated back to the external id
    assert_eq!(upcall.key.in_port, IN_PORT);
    assert_eq!(upcall.key.ip_src, 0xDEAD_BEEF);
    assert_eq!(
        &buf.data()[message::upcall::UPCALL_WIRE_SIZE..],
        frame.as_slice()
    );

    assert_eq!(fixture.stats.vport(IN_PORT, 0).get().rx, 1);
    assert_eq!(fixture.stats.data_get().tx, 1);

    let pkt = upcalls.pop().unwrap();
    fixture.pool.free(pkt);
}

#[test]
fn hit_emits_and_updates_flow_stats() {
    let mut fixture = Fixture::new();
    let key = control_key(&tcp_frame(0x02), IN_PORT);
    let handle = fixture
        .pipeline
        .flow_add(&key, &actions(&[Action::Output { port: OUT_A }]))
        .unwrap();

    // SYN then FIN; same 5-tuple
    fixture.inject(&tcp_frame(0x02));
    fixture.inject(&tcp_frame(0x01));
    fixture.run_and_flush();

    let emitted = fixture.drain_tx(OUT_A);
    assert_eq!(emitted.len(), 2);
    assert!(fixture.drain_exception().is_empty());

    let stats = fixture.pipeline.flow_stats(handle).unwrap();
    assert_eq!(stats.packet_count, 2);
    assert_eq!(stats.byte_count, 2 * tcp_frame(0).len() as u64);
    assert_eq!(stats.tcp_flags, 0x03);
    assert!(stats.used > 0);

    assert_eq!(fixture.stats.vport(OUT_A, 0).get().tx, 2);
    fixture.free_all(emitted);
}

#[test]
fn output_fanout_clones_per_output() {
    let mut fixture = Fixture::new();
    let frame = tcp_frame(0);
    let key = control_key(&frame, IN_PORT);
    fixture
        .pipeline
        .flow_add(
            &key,
            &actions(&[
                Action::Output { port: OUT_A },
                Action::Output { port: OUT_B },
                Action::Output { port: IN_PORT },
            ]),
        )
        .unwrap();

    fixture.inject(&frame);
    fixture.run_and_flush();

    let a = fixture.drain_tx(OUT_A);
    let b = fixture.drain_tx(OUT_B);
    let c = fixture.drain_tx(IN_PORT);
    assert_eq!((a.len(), b.len(), c.len()), (1, 1, 1));

    // n outputs of an L byte packet transmit n * L bytes total, and no two
    // outputs share a buffer.
    let mut total = 0usize;
    let mut indices = std::collections::HashSet::new();
    for pkt in a.iter().chain(b.iter()).chain(c.iter()) {
        assert_eq!(fixture.pool.get(pkt).data(), frame.as_slice());
        total += fixture.pool.get(pkt).data().len();
        assert!(indices.insert(pkt.index()));
    }
    assert_eq!(total, 3 * frame.len());

    fixture.free_all(a);
    fixture.free_all(b);
    fixture.free_all(c);
}

#[test]
fn drop_action_frees_the_buffer() {
    let mut fixture = Fixture::new();
    let frame = tcp_frame(0);
    let key = control_key(&frame, IN_PORT);
    fixture
        .pipeline
        .flow_add(&key, &actions(&[Action::Drop]))
        .unwrap();

    let before = fixture.pool.available();
    fixture.inject(&frame);
    fixture.run_and_flush();

    assert!(fixture.drain_tx(OUT_A).is_empty());
    assert!(fixture.drain_exception().is_empty());
    assert_eq!(fixture.pool.available(), before);
}

#[test]
fn mutations_apply_before_the_output() {
    let mut fixture = Fixture::new();
    let frame = tcp_frame(0);
    let key = control_key(&frame, IN_PORT);
    fixture
        .pipeline
        .flow_add(
            &key,
            &actions(&[
                Action::SetEthernet {
                    src: [0xAA; 6],
                    dst: [0xBB; 6],
                },
                Action::SetIpv4 {
                    src: 0x0A00_0001,
                    dst: 0x0A00_0002,
                    tos: 0x08,
                    ttl: 9,
                },
                Action::SetTcp {
                    src: 8080,
                    dst: 8443,
                },
                Action::Output { port: OUT_A },
            ]),
        )
        .unwrap();

    fixture.inject(&frame);
    fixture.run_and_flush();

    let mut emitted = fixture.drain_tx(OUT_A);
    assert_eq!(emitted.len(), 1);
    let buf = fixture.pool.get(&emitted[0]);
    let eth = net::eth::Eth::parse(buf.data()).unwrap();
    assert_eq!(eth.source(), [0xAA; 6]);
    assert_eq!(eth.destination(), [0xBB; 6]);
    let (_, l3) = net::eth::payload_offset(buf.data()).unwrap();
    let ip = net::ipv4::Ipv4::parse(&buf.data()[l3..]).unwrap();
    assert_eq!(ip.source(), 0x0A00_0001);
    assert_eq!(ip.destination(), 0x0A00_0002);
    assert_eq!(ip.tos(), 0x08);
    assert_eq!(ip.ttl(), 9);
    let l4 = net::ipv4::l4_offset(buf.data(), l3).unwrap();
    let tcp = net::tcp::Tcp::parse(&buf.data()[l4..]).unwrap();
    assert_eq!(tcp.source(), 8080);
    assert_eq!(tcp.destination(), 8443);

    let pkt = emitted.pop().unwrap();
    fixture.pool.free(pkt);
}

#[test]
fn upcall_without_headroom_is_dropped() {
    let mut fixture = Fixture::new();
    // A buffer whose headroom was already consumed by the peer: the miss
    // path cannot prepend its upcall header.
    let mut pkt = fixture.pool.alloc().unwrap();
    {
        let buf = fixture.pool.get_mut(&mut pkt);
        buf.set_data(&tcp_frame(0)).unwrap();
        buf.prepend(net::pkt::PKT_HEADROOM).unwrap();
    }
    let rx = fixture
        .registry
        .lookup(&ring::names::vhost_rx_ring(IN_PORT))
        .unwrap();
    rx.enqueue(pkt.into_raw()).unwrap();

    let before = fixture.pool.available();
    let drops_before = fixture.stats.data_get().tx_drop;
    fixture.run_and_flush();

    assert!(fixture.drain_exception().is_empty());
    assert_eq!(fixture.stats.data_get().tx_drop, drops_before + 1);
    // the dropped buffer went back to the slab
    assert_eq!(fixture.pool.available(), before + 1);
}

#[test]
fn injected_packet_executes_attached_actions() {
    let mut fixture = Fixture::new();
    let frame = tcp_frame(0);
    let msg = message::Message::request(message::Body::Packet(message::PacketBody {
        command: message::PacketCommand::Action,
        actions: actions(&[Action::Output { port: OUT_B }]),
    }));
    let mut record = vec![0u8; message::codec::MESSAGE_WIRE_SIZE];
    msg.encode(&mut record).unwrap();
    record.extend_from_slice(&frame);

    let mut pkt = fixture.pool.alloc().unwrap();
    fixture.pool.get_mut(&mut pkt).set_data(&record).unwrap();
    let packet_ring = fixture
        .registry
        .lookup(&ring::names::packet_ring(0))
        .unwrap();
    packet_ring.enqueue(pkt.into_raw()).unwrap();

    fixture.run_and_flush();

    let mut emitted = fixture.drain_tx(OUT_B);
    assert_eq!(emitted.len(), 1);
    // the record was stripped; only the frame leaves
    assert_eq!(fixture.pool.get(&emitted[0]).data(), frame.as_slice());
    assert_eq!(fixture.stats.data_get().rx, 1);

    let pkt = emitted.pop().unwrap();
    fixture.pool.free(pkt);
}

#[test]
fn removed_in_port_is_no_longer_polled() {
    let mut fixture = Fixture::new();
    fixture.pipeline.port_in_del(IN_PORT).unwrap();
    assert!(fixture.vports.in_index(IN_PORT).is_err());

    fixture.inject(&tcp_frame(0));
    fixture.run_and_flush();

    // the frame is still sitting in the rx ring
    let rx = fixture
        .registry
        .lookup(&ring::names::vhost_rx_ring(IN_PORT))
        .unwrap();
    assert_eq!(rx.count(), 1);
    assert!(fixture.drain_exception().is_empty());

    // a second delete reports the port as unbound
    assert!(fixture.pipeline.port_in_del(IN_PORT).is_err());
}

#[test]
fn flow_add_requires_a_bound_in_port() {
    let mut fixture = Fixture::new();
    let key = control_key(&tcp_frame(0), OUT_B); // OUT_B has no reader
    let err = fixture
        .pipeline
        .flow_add(&key, &actions(&[Action::Output { port: OUT_A }]))
        .unwrap_err();
    assert_eq!(err.errno(), errno::ENODEV);
}

#[test]
fn wakeup_fires_on_the_flush_interval() {
    let dir = std::env::temp_dir().join(format!("swdp_wakeup_{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let peer = dir.join("controller.sock");
    let _ = std::fs::remove_file(&peer);
    let listener = std::os::unix::net::UnixDatagram::bind(&peer).unwrap();
    listener.set_nonblocking(true).unwrap();

    let registry = Arc::new(RingRegistry::new());
    let pool = Arc::new(PktPool::new("wakeup_test_pool", POOL_SLOTS).unwrap());
    let vports = Arc::new(VportTable::new(0));
    let stats = Arc::new(StatsTable::new(port::MAX_VPORTS, port::MAX_WORKERS));
    let mut pipeline = Pipeline::new(
        0,
        Arc::clone(&pool),
        Arc::clone(&registry),
        vports,
        stats,
        Some(peer.clone()),
    )
    .unwrap();

    let mut buf = [0u8; 16];
    assert!(listener.recv_from(&mut buf).is_err());

    pipeline.request_wakeup();
    for _ in 0..FLUSH_INTERVAL {
        pipeline.run();
    }
    let (len, _) = listener.recv_from(&mut buf).unwrap();
    assert_eq!(len, 4);
    // latch cleared: another interval without a request stays silent
    for _ in 0..FLUSH_INTERVAL {
        pipeline.run();
    }
    assert!(listener.recv_from(&mut buf).is_err());

    let _ = std::fs::remove_file(&peer);
    let _ = std::fs::remove_dir(&dir);
}

#[test]
fn vhost_kind_is_as_expected() {
    // guard against range arithmetic drift in the fixture constants
    assert_eq!(PortKind::of(IN_PORT), Some(PortKind::Vhost));
    assert_eq!(PortKind::of(OUT_B), Some(PortKind::Vhost));
}
