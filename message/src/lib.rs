// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The control wire format.
//!
//! Requests and replies are fixed-size records, host endian (the controller
//! is co-located), carried inside control-pool buffers.  Controller-injected
//! packets carry the same record as a header in front of the frame bytes.

#![deny(clippy::all, clippy::pedantic)]

pub mod codec;
pub mod upcall;

use flow::{ActionList, FlowKey, FlowStats};
use port::PortFlags;
use stats::PortStats;

/// Wire value of the VPORT family.
pub const FAMILY_VPORT: u8 = 1;
/// Wire value of the FLOW family.
pub const FAMILY_FLOW: u8 = 2;
/// Wire value of the PACKET family.
pub const FAMILY_PACKET: u8 = 3;
/// Reserved family used in replies to unrecognised requests, distinct from
/// every real family so it cannot be confused with one.
pub const FAMILY_UNKNOWN: u8 = 0xFF;

bitflags::bitflags! {
    /// FLOW NEW semantics flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct FlowFlags: u8 {
        /// Delete a matching entry first, capturing its statistics.
        const REPLACE = 0b01;
        /// Allowed to create when no entry matched.
        const CREATE = 0b10;
    }
}

/// VPORT family commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum VportCommand {
    /// Attach a port (reader and/or writer side).
    New = 0,
    /// Detach a port.
    Del = 1,
    /// Read summed port statistics.
    Get = 2,
}

/// FLOW family commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FlowCommand {
    /// Create-or-replace a flow entry.
    New = 0,
    /// Delete a flow entry by key.
    Del = 1,
    /// Read a flow entry by handle.
    Get = 2,
}

/// PACKET family commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketCommand {
    /// Execute the attached action list on the attached packet.
    Action = 0,
}

/// VPORT request/reply body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VportBody {
    /// Command within the family.
    pub command: VportCommand,
    /// External port id.
    pub id: u32,
    /// Reader/writer side selection.
    pub flags: PortFlags,
    /// Port name (NEW), at most [`port::MAX_NAME_SIZE`] bytes.
    pub name: String,
    /// Summed statistics (GET replies).
    pub stats: PortStats,
    /// Read-and-clear the counters (GET requests).
    pub clear: bool,
}

/// FLOW request/reply body.
///
/// `stats.used` is in wall-clock milliseconds on the wire; the cycles →
/// milliseconds conversion happens when the reply is built, and a zero
/// `used` stays zero.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowBody {
    /// Command within the family.
    pub command: FlowCommand,
    /// The exact-match key, with the *external* in-port id.
    pub key: FlowKey,
    /// Bounded action list.
    pub actions: ActionList,
    /// Create-or-replace semantics.
    pub flags: FlowFlags,
    /// Read-and-clear statistics on replace.
    pub clear: bool,
    /// Whether DEL found (and removed) an entry; reply only.
    pub key_found: bool,
    /// Stable entry handle; zero is the null handle.
    pub handle: u64,
    /// Entry statistics.
    pub stats: FlowStats,
}

/// PACKET request body; the frame bytes follow the record in the buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketBody {
    /// Command within the family.
    pub command: PacketCommand,
    /// Actions to execute on the attached frame.
    pub actions: ActionList,
}

/// A decoded message body, tagged by family.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Body {
    /// VPORT family.
    Vport(VportBody),
    /// FLOW family.
    Flow(FlowBody),
    /// PACKET family.
    Packet(PacketBody),
    /// Unrecognised family or command.
    Unknown,
}

/// One control message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// 0 on success, errno-class value on failure (replies).
    pub error: i32,
    /// Family-specific body.
    pub body: Body,
}

impl Message {
    /// A request with error zero.
    #[must_use]
    pub fn request(body: Body) -> Message {
        Message { error: 0, body }
    }
}
