// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Byte codec for [`Message`].
//!
//! Record layout (host endian):
//!
//! ```text
//! 0      family
//! 1      command
//! 2..4   reserved
//! 4..8   error (i32)
//! 8..    family body (fixed size, zero padded)
//! ```

use flow::{Action, ActionList, FlowKey, FlowStats, MAX_ACTIONS, key::KEY_WIRE_SIZE};
use port::PortFlags;
use stats::PortStats;

use crate::{
    Body, FAMILY_FLOW, FAMILY_PACKET, FAMILY_UNKNOWN, FAMILY_VPORT, FlowBody, FlowCommand,
    FlowFlags, Message, PacketBody, PacketCommand, VportBody, VportCommand,
};

/// Encoded size of one action.
pub const ACTION_WIRE_SIZE: usize = 16;
/// Offset of the family body.
const BODY_OFFSET: usize = 8;
/// Size of the flow body, the largest of the three.
const FLOW_BODY_SIZE: usize = KEY_WIRE_SIZE + 4 + MAX_ACTIONS * ACTION_WIRE_SIZE + 8 + 32;

/// Encoded size of every control record.
pub const MESSAGE_WIRE_SIZE: usize = BODY_OFFSET + FLOW_BODY_SIZE;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("buffer shorter than the {MESSAGE_WIRE_SIZE} byte record")]
    TooShort,
    #[error("unknown action tag {0}")]
    BadAction(u8),
    #[error("action count {0} exceeds the {MAX_ACTIONS} bound")]
    TooManyActions(u8),
    #[error("malformed flow key")]
    BadKey,
    #[error("port name is not valid UTF-8")]
    BadName,
}

impl Message {
    /// Encode into the first [`MESSAGE_WIRE_SIZE`] bytes of `out`.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::TooShort`] when `out` cannot hold the record.
    pub fn encode(&self, out: &mut [u8]) -> Result<(), CodecError> {
        if out.len() < MESSAGE_WIRE_SIZE {
            return Err(CodecError::TooShort);
        }
        let out = &mut out[..MESSAGE_WIRE_SIZE];
        out.fill(0);
        out[4..8].copy_from_slice(&self.error.to_ne_bytes());
        let (head, body) = out.split_at_mut(BODY_OFFSET);
        match &self.body {
            Body::Vport(vport) => {
                head[0] = FAMILY_VPORT;
                head[1] = vport.command as u8;
                encode_vport(vport, body);
            }
            Body::Flow(flow) => {
                head[0] = FAMILY_FLOW;
                head[1] = flow.command as u8;
                encode_flow(flow, body);
            }
            Body::Packet(packet) => {
                head[0] = FAMILY_PACKET;
                head[1] = packet.command as u8;
                encode_actions(&packet.actions, &mut body[..4 + MAX_ACTIONS * ACTION_WIRE_SIZE]);
            }
            Body::Unknown => {
                head[0] = FAMILY_UNKNOWN;
            }
        }
        Ok(())
    }

    /// Decode a record from the front of `bytes`.
    ///
    /// An unrecognised family or command decodes as [`Body::Unknown`] (the
    /// adapter answers those with `EINVAL`); structurally broken records
    /// are errors.
    ///
    /// # Errors
    ///
    /// Returns a [`CodecError`] for short buffers or malformed bodies.
    pub fn decode(bytes: &[u8]) -> Result<Message, CodecError> {
        if bytes.len() < MESSAGE_WIRE_SIZE {
            return Err(CodecError::TooShort);
        }
        let error = i32::from_ne_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        let command = bytes[1];
        let body_bytes = &bytes[BODY_OFFSET..MESSAGE_WIRE_SIZE];
        let body = match (bytes[0], command) {
            (FAMILY_VPORT, 0..=2) => Body::Vport(decode_vport(command, body_bytes)?),
            (FAMILY_FLOW, 0..=2) => Body::Flow(decode_flow(command, body_bytes)?),
            (FAMILY_PACKET, 0) => Body::Packet(PacketBody {
                command: PacketCommand::Action,
                actions: decode_actions(&body_bytes[..4 + MAX_ACTIONS * ACTION_WIRE_SIZE])?,
            }),
            _ => Body::Unknown,
        };
        Ok(Message { error, body })
    }
}

fn encode_vport(vport: &VportBody, out: &mut [u8]) {
    out[0..4].copy_from_slice(&vport.id.to_ne_bytes());
    out[4..8].copy_from_slice(&vport.flags.bits().to_ne_bytes());
    let name = vport.name.as_bytes();
    let len = name.len().min(port::MAX_NAME_SIZE);
    out[8..8 + len].copy_from_slice(&name[..len]);
    encode_port_stats(&vport.stats, &mut out[40..80]);
    out[80] = u8::from(vport.clear);
}

fn decode_vport(command: u8, bytes: &[u8]) -> Result<VportBody, CodecError> {
    let command = match command {
        0 => VportCommand::New,
        1 => VportCommand::Del,
        _ => VportCommand::Get,
    };
    let id = u32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    let flags = PortFlags::from_bits_truncate(u32::from_ne_bytes([
        bytes[4], bytes[5], bytes[6], bytes[7],
    ]));
    let name_bytes = &bytes[8..8 + port::MAX_NAME_SIZE];
    let name_len = name_bytes.iter().position(|&b| b == 0).unwrap_or(port::MAX_NAME_SIZE);
    let name = core::str::from_utf8(&name_bytes[..name_len])
        .map_err(|_| CodecError::BadName)?
        .to_string();
    Ok(VportBody {
        command,
        id,
        flags,
        name,
        stats: decode_port_stats(&bytes[40..80]),
        clear: bytes[80] != 0,
    })
}

fn encode_flow(flow: &FlowBody, out: &mut [u8]) {
    out[0..KEY_WIRE_SIZE].copy_from_slice(&flow.key.to_bytes());
    #[allow(clippy::cast_possible_truncation)] // bounded by MAX_ACTIONS
    {
        out[36] = flow.actions.len() as u8;
    }
    out[37] = flow.flags.bits();
    out[38] = u8::from(flow.clear);
    out[39] = u8::from(flow.key_found);
    for (i, action) in flow.actions.iter().enumerate() {
        let at = 40 + i * ACTION_WIRE_SIZE;
        encode_action(action, &mut out[at..at + ACTION_WIRE_SIZE]);
    }
    let actions_end = 40 + MAX_ACTIONS * ACTION_WIRE_SIZE;
    out[actions_end..actions_end + 8].copy_from_slice(&flow.handle.to_ne_bytes());
    encode_flow_stats(&flow.stats, &mut out[actions_end + 8..actions_end + 40]);
}

fn decode_flow(command: u8, bytes: &[u8]) -> Result<FlowBody, CodecError> {
    let command = match command {
        0 => FlowCommand::New,
        1 => FlowCommand::Del,
        _ => FlowCommand::Get,
    };
    let key = FlowKey::from_bytes(&bytes[0..KEY_WIRE_SIZE]).ok_or(CodecError::BadKey)?;
    let num_actions = bytes[36];
    let flags = FlowFlags::from_bits_truncate(bytes[37]);
    let clear = bytes[38] != 0;
    let key_found = bytes[39] != 0;
    if usize::from(num_actions) > MAX_ACTIONS {
        return Err(CodecError::TooManyActions(num_actions));
    }
    let mut actions = ActionList::new();
    for i in 0..usize::from(num_actions) {
        let at = 40 + i * ACTION_WIRE_SIZE;
        actions.push(decode_action(&bytes[at..at + ACTION_WIRE_SIZE])?);
    }
    let actions_end = 40 + MAX_ACTIONS * ACTION_WIRE_SIZE;
    let mut handle_raw = [0u8; 8];
    handle_raw.copy_from_slice(&bytes[actions_end..actions_end + 8]);
    Ok(FlowBody {
        command,
        key,
        actions,
        flags,
        clear,
        key_found,
        handle: u64::from_ne_bytes(handle_raw),
        stats: decode_flow_stats(&bytes[actions_end + 8..actions_end + 40]),
    })
}

fn encode_actions(actions: &ActionList, out: &mut [u8]) {
    #[allow(clippy::cast_possible_truncation)] // bounded by MAX_ACTIONS
    {
        out[0] = actions.len() as u8;
    }
    for (i, action) in actions.iter().enumerate() {
        let at = 4 + i * ACTION_WIRE_SIZE;
        encode_action(action, &mut out[at..at + ACTION_WIRE_SIZE]);
    }
}

fn decode_actions(bytes: &[u8]) -> Result<ActionList, CodecError> {
    let num_actions = bytes[0];
    if usize::from(num_actions) > MAX_ACTIONS {
        return Err(CodecError::TooManyActions(num_actions));
    }
    let mut actions = ActionList::new();
    for i in 0..usize::from(num_actions) {
        let at = 4 + i * ACTION_WIRE_SIZE;
        actions.push(decode_action(&bytes[at..at + ACTION_WIRE_SIZE])?);
    }
    Ok(actions)
}

fn encode_action(action: &Action, out: &mut [u8]) {
    out.fill(0);
    match *action {
        Action::Output { port } => {
            out[0] = 1;
            out[4..8].copy_from_slice(&port.to_ne_bytes());
        }
        Action::Drop => out[0] = 2,
        Action::ToController => out[0] = 3,
        Action::PopVlan => out[0] = 4,
        Action::PushVlan { tci } => {
            out[0] = 5;
            out[4..6].copy_from_slice(&tci.to_ne_bytes());
        }
        Action::SetEthernet { src, dst } => {
            out[0] = 6;
            out[4..10].copy_from_slice(&src);
            out[10..16].copy_from_slice(&dst);
        }
        Action::SetIpv4 { src, dst, tos, ttl } => {
            out[0] = 7;
            out[4..8].copy_from_slice(&src.to_ne_bytes());
            out[8..12].copy_from_slice(&dst.to_ne_bytes());
            out[12] = tos;
            out[13] = ttl;
        }
        Action::SetTcp { src, dst } => {
            out[0] = 8;
            out[4..6].copy_from_slice(&src.to_ne_bytes());
            out[6..8].copy_from_slice(&dst.to_ne_bytes());
        }
        Action::SetUdp { src, dst } => {
            out[0] = 9;
            out[4..6].copy_from_slice(&src.to_ne_bytes());
            out[6..8].copy_from_slice(&dst.to_ne_bytes());
        }
    }
}

fn decode_action(bytes: &[u8]) -> Result<Action, CodecError> {
    let half = |at: usize| u16::from_ne_bytes([bytes[at], bytes[at + 1]]);
    let word = |at: usize| u32::from_ne_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]]);
    Ok(match bytes[0] {
        1 => Action::Output { port: word(4) },
        2 => Action::Drop,
        3 => Action::ToController,
        4 => Action::PopVlan,
        5 => Action::PushVlan { tci: half(4) },
        6 => {
            let mut src = [0u8; 6];
            src.copy_from_slice(&bytes[4..10]);
            let mut dst = [0u8; 6];
            dst.copy_from_slice(&bytes[10..16]);
            Action::SetEthernet { src, dst }
        }
        7 => Action::SetIpv4 {
            src: word(4),
            dst: word(8),
            tos: bytes[12],
            ttl: bytes[13],
        },
        8 => Action::SetTcp {
            src: half(4),
            dst: half(6),
        },
        9 => Action::SetUdp {
            src: half(4),
            dst: half(6),
        },
        tag => return Err(CodecError::BadAction(tag)),
    })
}

fn encode_port_stats(stats: &PortStats, out: &mut [u8]) {
    out[0..8].copy_from_slice(&stats.rx.to_ne_bytes());
    out[8..16].copy_from_slice(&stats.tx.to_ne_bytes());
    out[16..24].copy_from_slice(&stats.rx_drop.to_ne_bytes());
    out[24..32].copy_from_slice(&stats.tx_drop.to_ne_bytes());
    out[32..40].copy_from_slice(&stats.overrun.to_ne_bytes());
}

fn decode_port_stats(bytes: &[u8]) -> PortStats {
    let quad = |at: usize| {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&bytes[at..at + 8]);
        u64::from_ne_bytes(raw)
    };
    PortStats {
        rx: quad(0),
        tx: quad(8),
        rx_drop: quad(16),
        tx_drop: quad(24),
        overrun: quad(32),
    }
}

fn encode_flow_stats(stats: &FlowStats, out: &mut [u8]) {
    out[0..8].copy_from_slice(&stats.packet_count.to_ne_bytes());
    out[8..16].copy_from_slice(&stats.byte_count.to_ne_bytes());
    out[16..24].copy_from_slice(&stats.used.to_ne_bytes());
    out[24] = stats.tcp_flags;
}

fn decode_flow_stats(bytes: &[u8]) -> FlowStats {
    let quad = |at: usize| {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&bytes[at..at + 8]);
        u64::from_ne_bytes(raw)
    };
    FlowStats {
        packet_count: quad(0),
        byte_count: quad(8),
        used: quad(16),
        tcp_flags: bytes[24],
    }
}
