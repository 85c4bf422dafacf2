// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The flow-key extractor.
//!
//! Runs as the reader port's per-burst hook: parses L2/VLAN/IPv4/L4 headers
//! into the fixed-layout key, stores the key and its signature in the packet
//! metadata area, and returns the key for the table lookup.  Non-IPv4
//! traffic simply leaves the unparsed fields zero.

use net::{Pkt, PktBuf, PktPool};

use crate::key::{FlowKey, FragKind, signature};

/// Headers of buffer `i + PREFETCH_OFFSET` are prefetched while buffer `i`
/// is parsed.
pub const PREFETCH_OFFSET: usize = 3;

#[inline]
fn prefetch(ptr: *const u8) {
    #[cfg(target_arch = "x86_64")]
    // SAFETY: prefetch is a hint; any address is allowed.
    unsafe {
        core::arch::x86_64::_mm_prefetch::<{ core::arch::x86_64::_MM_HINT_T0 }>(ptr.cast());
    }
    #[cfg(not(target_arch = "x86_64"))]
    let _ = ptr;
}

/// Extract the flow key of a single buffer received on `in_port` (the
/// worker-local reader index) and record it in the buffer metadata.
pub fn extract(buf: &mut PktBuf, in_port: u32) -> FlowKey {
    let mut key = FlowKey {
        in_port,
        ..FlowKey::default()
    };
    parse_frame(buf.data(), &mut key);

    buf.set_in_port(in_port);
    buf.key_bytes_mut()[..crate::key::KEY_WIRE_SIZE].copy_from_slice(&key.to_bytes());
    let sig = signature(&key);
    buf.set_signature(sig);
    key
}

/// Extract a burst, with lookahead prefetch of headers and metadata.
pub fn extract_burst(pool: &PktPool, pkts: &mut [Pkt], in_port: u32, keys: &mut Vec<FlowKey>) {
    let hint = |buf: &PktBuf| {
        prefetch(buf.key_bytes().as_ptr());
        prefetch(buf.data().as_ptr());
    };
    for i in 0..pkts.len().min(PREFETCH_OFFSET) {
        hint(pool.get(&pkts[i]));
    }
    for i in 0..pkts.len() {
        if let Some(ahead) = pkts.get(i + PREFETCH_OFFSET) {
            hint(pool.get(ahead));
        }
        let key = extract(pool.get_mut(&mut pkts[i]), in_port);
        keys.push(key);
    }
}

fn parse_frame(frame: &[u8], key: &mut FlowKey) {
    let Some(eth) = net::eth::Eth::parse(frame) else {
        return;
    };
    key.eth_dst = eth.destination();
    key.eth_src = eth.source();
    key.ether_type = eth.ether_type();
    let mut offset = net::eth::HEADER_LEN;

    if key.ether_type == net::eth::ETHER_TYPE_VLAN {
        let Some(vlan) = net::vlan::Vlan::parse(&frame[offset..]) else {
            return;
        };
        key.vlan_id = vlan.vlan_id();
        key.vlan_prio = vlan.priority();
        key.ether_type = vlan.inner_ether_type();
        offset += net::vlan::HEADER_LEN;
    }

    if key.ether_type == net::eth::ETHER_TYPE_IPV4 {
        let Some(ip) = net::ipv4::Ipv4::parse(&frame[offset..]) else {
            return;
        };
        key.ip_dst = ip.destination();
        key.ip_src = ip.source();
        key.ip_proto = ip.protocol();
        if ip.fragment_offset() != 0 {
            // A later fragment carries no L4 header of its own.
            key.ip_frag = FragKind::Later;
            return;
        }
        key.ip_frag = if ip.more_fragments() {
            FragKind::First
        } else {
            FragKind::None
        };
        offset += ip.header_len();
    }

    let l4 = &frame[offset.min(frame.len())..];
    match key.ip_proto {
        net::ipv4::PROTO_TCP => {
            if let Some(tcp) = net::tcp::Tcp::parse(l4) {
                key.l4_src = tcp.source();
                key.l4_dst = tcp.destination();
            }
        }
        net::ipv4::PROTO_UDP => {
            if let Some(udp) = net::udp::Udp::parse(l4) {
                key.l4_src = udp.source();
                key.l4_dst = udp.destination();
            }
        }
        net::ipv4::PROTO_ICMP => {
            if let Some(icmp) = net::icmp::Icmp::parse(l4) {
                key.l4_src = u16::from(icmp.icmp_type());
                key.l4_dst = u16::from(icmp.icmp_code());
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::key::KEY_WIRE_SIZE;
    use pretty_assertions::assert_eq;

    const DST_MAC: [u8; 6] = [0x01; 6];
    const SRC_MAC: [u8; 6] = [0x02; 6];

    fn eth_frame(ether_type: u16) -> Vec<u8> {
        let mut frame = Vec::new();
        frame.extend_from_slice(&DST_MAC);
        frame.extend_from_slice(&SRC_MAC);
        frame.extend_from_slice(&ether_type.to_be_bytes());
        frame
    }

    fn ipv4_header(proto: u8, frag_field: u16) -> Vec<u8> {
        let mut l3 = vec![0u8; 20];
        l3[0] = 0x45;
        l3[6..8].copy_from_slice(&frag_field.to_be_bytes());
        l3[8] = 64;
        l3[9] = proto;
        l3[12..16].copy_from_slice(&0xDEAD_BEEFu32.to_be_bytes());
        l3[16..20].copy_from_slice(&0xBABE_FACEu32.to_be_bytes());
        l3
    }

    fn l4_ports(src: u16, dst: u16) -> Vec<u8> {
        let mut l4 = vec![0u8; 20];
        l4[0..2].copy_from_slice(&src.to_be_bytes());
        l4[2..4].copy_from_slice(&dst.to_be_bytes());
        l4
    }

    fn extract_from(frame: &[u8], in_port: u32) -> (FlowKey, net::PktBuf) {
        let mut buf = net::PktBuf::default();
        buf.set_data(frame).unwrap();
        let key = extract(&mut buf, in_port);
        (key, buf)
    }

    #[test]
    fn tcp_five_tuple() {
        let mut frame = eth_frame(net::eth::ETHER_TYPE_IPV4);
        frame.extend_from_slice(&ipv4_header(net::ipv4::PROTO_TCP, 0));
        frame.extend_from_slice(&l4_ports(0x4000, 0x4001));

        let (key, buf) = extract_from(&frame, 1);
        assert_eq!(key.in_port, 1);
        assert_eq!(key.eth_dst, DST_MAC);
        assert_eq!(key.eth_src, SRC_MAC);
        assert_eq!(key.ether_type, 0x0800);
        assert_eq!(key.ip_proto, 6);
        assert_eq!(key.ip_src, 0xDEAD_BEEF);
        assert_eq!(key.ip_dst, 0xBABE_FACE);
        assert_eq!(key.l4_src, 0x4000);
        assert_eq!(key.l4_dst, 0x4001);
        assert_eq!(key.ip_frag, FragKind::None);
        assert_eq!(key.vlan_id, 0);

        // Metadata mirrors the returned key, and the signature is the hash
        // of the key bytes.
        assert_eq!(&buf.key_bytes()[..KEY_WIRE_SIZE], &key.to_bytes());
        assert_eq!(buf.signature(), signature(&key));
        assert_eq!(buf.in_port(), 1);
    }

    #[test]
    fn vlan_udp() {
        let mut frame = eth_frame(net::eth::ETHER_TYPE_VLAN);
        // priority 0, id 0x00F, inner IPv4
        frame.extend_from_slice(&0x000Fu16.to_be_bytes());
        frame.extend_from_slice(&net::eth::ETHER_TYPE_IPV4.to_be_bytes());
        frame.extend_from_slice(&ipv4_header(net::ipv4::PROTO_UDP, 0));
        frame.extend_from_slice(&l4_ports(0x4000, 0x4001));

        let (key, _) = extract_from(&frame, 2);
        assert_eq!(key.ether_type, 0x0800);
        assert_eq!(key.vlan_id, 0x00F);
        assert_eq!(key.vlan_prio, 0);
        assert_eq!(key.ip_proto, 17);
        assert_eq!(key.l4_src, 0x4000);
        assert_eq!(key.l4_dst, 0x4001);
    }

    #[test]
    fn later_fragment_skips_l4() {
        let mut frame = eth_frame(net::eth::ETHER_TYPE_IPV4);
        frame.extend_from_slice(&ipv4_header(net::ipv4::PROTO_TCP, 0x0002));
        frame.extend_from_slice(&l4_ports(0x4000, 0x4001));

        let (key, _) = extract_from(&frame, 1);
        assert_eq!(key.ip_frag, FragKind::Later);
        assert_eq!(key.l4_src, 0);
        assert_eq!(key.l4_dst, 0);
    }

    #[test]
    fn first_fragment_keeps_l4() {
        let mut frame = eth_frame(net::eth::ETHER_TYPE_IPV4);
        frame.extend_from_slice(&ipv4_header(net::ipv4::PROTO_TCP, net::ipv4::MORE_FRAGMENTS));
        frame.extend_from_slice(&l4_ports(0x4000, 0x4001));

        let (key, _) = extract_from(&frame, 1);
        assert_eq!(key.ip_frag, FragKind::First);
        assert_eq!(key.l4_src, 0x4000);
        assert_eq!(key.l4_dst, 0x4001);
    }

    #[test]
    fn icmp_maps_type_and_code_to_l4_slots() {
        let mut frame = eth_frame(net::eth::ETHER_TYPE_IPV4);
        frame.extend_from_slice(&ipv4_header(net::ipv4::PROTO_ICMP, 0));
        frame.extend_from_slice(&[0x40, 0x40, 0, 0, 0, 0, 0, 0]);

        let (key, _) = extract_from(&frame, 1);
        assert_eq!(key.l4_src, 0x40);
        assert_eq!(key.l4_dst, 0x40);
    }

    #[test]
    fn non_ipv4_leaves_l3_zero() {
        let mut frame = eth_frame(0x0806); // ARP
        frame.extend_from_slice(&[0u8; 28]);

        let (key, _) = extract_from(&frame, 4);
        assert_eq!(key.ether_type, 0x0806);
        assert_eq!(key.ip_src, 0);
        assert_eq!(key.ip_dst, 0);
        assert_eq!(key.ip_proto, 0);
        assert_eq!(key.l4_src, 0);
    }

    #[test]
    fn extraction_is_idempotent() {
        let mut frame = eth_frame(net::eth::ETHER_TYPE_IPV4);
        frame.extend_from_slice(&ipv4_header(net::ipv4::PROTO_TCP, 0));
        frame.extend_from_slice(&l4_ports(7, 9));

        let mut buf = net::PktBuf::default();
        buf.set_data(&frame).unwrap();
        let first = extract(&mut buf, 3);
        let first_bytes: Vec<u8> = buf.key_bytes().to_vec();
        let second = extract(&mut buf, 3);
        assert_eq!(first, second);
        assert_eq!(first_bytes, buf.key_bytes().to_vec());
    }
}
