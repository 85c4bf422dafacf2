// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The action interpreter.
//!
//! Actions execute left to right over a packet buffer.  `Output` transfers
//! buffer ownership to the writer port, so whenever actions remain after an
//! `Output` the buffer is first cloned (full data copy, single segment) and
//! execution continues on the clone.  Header mutations work in place and do
//! not re-extract the flow key.

use flow::Action;
use message::codec::MESSAGE_WIRE_SIZE;
use message::upcall::UpcallCmd;
use net::{Pkt, PktBuf};
use tracing::warn;

use crate::driver::Pipeline;

impl Pipeline {
    /// Execute a hit-path action list.  Consumes the buffer: the final
    /// `Output` (or `Drop`/`ToController`) takes it, clones feed any
    /// earlier outputs.
    pub(crate) fn execute_hit_actions(&mut self, pkt: Pkt, actions: &[Action]) {
        debug_assert!(
            actions.last().is_none_or(Action::consumes_buffer),
            "action list must end in a consuming action"
        );
        let mut current = Some(pkt);
        let count = actions.len();
        for (i, action) in actions.iter().enumerate() {
            let remaining = count - i - 1;
            let Some(pkt) = current.take() else {
                // a consuming action appeared mid-list; installation rules
                // make this unreachable
                warn!("{}: action list continues past a consuming action", self.name);
                return;
            };
            match *action {
                Action::Output { port } => {
                    if remaining > 0 {
                        match self.clone_pkt(&pkt) {
                            Some(clone) => current = Some(clone),
                            None => {
                                warn!("{}: packet pool empty, clone failed", self.name);
                                self.emit(pkt, port);
                                return;
                            }
                        }
                    }
                    self.emit(pkt, port);
                }
                Action::Drop => {
                    debug_assert_eq!(count, 1, "DROP only supported as a single action");
                    self.pool.free(pkt);
                }
                Action::ToController => {
                    debug_assert_eq!(
                        count, 1,
                        "TO-CONTROLLER only supported as a single action"
                    );
                    let key = self.meta_key(&pkt);
                    match key {
                        Some(key) => {
                            if self.send_upcall(pkt, key, UpcallCmd::Action) {
                                self.request_wakeup();
                            }
                        }
                        None => {
                            warn!("{}: no flow key in metadata for upcall", self.name);
                            self.stats.data(self.worker).tx_drop_add(1);
                            self.pool.free(pkt);
                        }
                    }
                }
                mutation => {
                    let mut pkt = pkt;
                    self.apply_mutation(&mut pkt, &mutation);
                    current = Some(pkt);
                }
            }
        }
        if let Some(pkt) = current {
            // a trailing mutation left the buffer unconsumed; nothing may
            // reference it past this point
            warn!("{}: action list ended without consuming the packet", self.name);
            self.pool.free(pkt);
        }
    }

    /// Handle one controller-injected buffer from the packet port: a control
    /// record in front of the frame bytes.  The attached actions run with
    /// the clone-before-output discipline; the original is consumed by the
    /// stub table's default drop.
    pub(crate) fn handle_injected_packet(&mut self, mut pkt: Pkt) {
        let decoded = message::Message::decode(self.pool.get(&pkt).data());
        let actions = match decoded {
            Ok(message::Message {
                body: message::Body::Packet(body),
                ..
            }) => body.actions,
            _ => {
                warn!("{}: unexpected message type received in packet port", self.name);
                self.stats.data(self.worker).rx_drop_add(1);
                self.pool.free(pkt);
                return;
            }
        };
        {
            let buf = self.pool.get_mut(&mut pkt);
            #[allow(clippy::cast_possible_truncation)] // record is 344 bytes
            if buf.trim_from_start(MESSAGE_WIRE_SIZE as u16).is_err() {
                warn!("{}: injected packet shorter than its header", self.name);
                self.stats.data(self.worker).rx_drop_add(1);
                self.pool.free(pkt);
                return;
            }
        }
        self.stats.data(self.worker).rx_add(1);

        for action in &actions {
            match *action {
                Action::Output { port } => {
                    // The stub default frees the original, so every output
                    // leaves on a clone.
                    match self.clone_pkt(&pkt) {
                        Some(clone) => self.emit(clone, port),
                        None => warn!("{}: packet pool empty, clone failed", self.name),
                    }
                }
                Action::Drop => {
                    // the stub default drop below is the actual drop
                }
                Action::ToController => {
                    // Injected packets came from the controller; bouncing
                    // them straight back is never meaningful.
                    warn!("{}: to-controller action on injected packet", self.name);
                }
                mutation => self.apply_mutation(&mut pkt, &mutation),
            }
        }
        // stub table default action
        self.pool.free(pkt);
    }

    /// Full-copy clone into a fresh single-segment buffer.  An indirect
    /// reference would race later mutations against the writer's
    /// serialisation of an earlier output.
    pub(crate) fn clone_pkt(&self, src: &Pkt) -> Option<Pkt> {
        let mut dst = self.pool.alloc()?;
        let src_buf = self.pool.get(src);
        self.pool.get_mut(&mut dst).clone_from_pkt(src_buf);
        Some(dst)
    }

    fn meta_key(&self, pkt: &Pkt) -> Option<flow::FlowKey> {
        flow::FlowKey::from_bytes(self.pool.get(pkt).key_bytes())
    }

    fn apply_mutation(&self, pkt: &mut Pkt, action: &Action) {
        let buf = self.pool.get_mut(pkt);
        let applied = apply_mutation_to_buf(buf, action);
        if !applied {
            warn!("{}: {action:?} does not fit this packet, skipped", self.name);
        }
    }
}

fn apply_mutation_to_buf(buf: &mut PktBuf, action: &Action) -> bool {
    match *action {
        Action::PopVlan => net::vlan::pop(buf).is_ok(),
        Action::PushVlan { tci } => net::vlan::push(buf, tci).is_ok(),
        Action::SetEthernet { src, dst } => net::eth::set_addresses(buf.data_mut(), src, dst).is_ok(),
        Action::SetIpv4 { src, dst, tos, ttl } => {
            let Some((ether_type, l3)) = net::eth::payload_offset(buf.data()) else {
                return false;
            };
            ether_type == net::eth::ETHER_TYPE_IPV4
                && net::ipv4::set_fields(&mut buf.data_mut()[l3..], src, dst, tos, ttl).is_ok()
        }
        Action::SetTcp { src, dst } => set_l4_ports(buf, net::ipv4::PROTO_TCP, src, dst),
        Action::SetUdp { src, dst } => set_l4_ports(buf, net::ipv4::PROTO_UDP, src, dst),
        Action::Output { .. } | Action::Drop | Action::ToController => {
            unreachable!("not a mutation")
        }
    }
}

fn set_l4_ports(buf: &mut PktBuf, want_proto: u8, src: u16, dst: u16) -> bool {
    let Some((ether_type, l3)) = net::eth::payload_offset(buf.data()) else {
        return false;
    };
    if ether_type != net::eth::ETHER_TYPE_IPV4 {
        return false;
    }
    let Some(ip) = net::ipv4::Ipv4::parse(&buf.data()[l3..]) else {
        return false;
    };
    if ip.protocol() != want_proto {
        return false;
    }
    let Some(l4) = net::ipv4::l4_offset(buf.data(), l3) else {
        return false;
    };
    if want_proto == net::ipv4::PROTO_TCP {
        net::tcp::set_ports(&mut buf.data_mut()[l4..], src, dst).is_ok()
    } else {
        net::udp::set_ports(&mut buf.data_mut()[l4..], src, dst).is_ok()
    }
}
