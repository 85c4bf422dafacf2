// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The upcall header prepended to packets forwarded to the controller.
//!
//! The in-port inside the key is the *external* port id here; the worker
//! translates its local reader index before prepending so that worker-local
//! state never leaks to the controller.

use flow::{FlowKey, key::KEY_WIRE_SIZE};

/// Encoded upcall header size.
pub const UPCALL_WIRE_SIZE: usize = 4 + KEY_WIRE_SIZE;

/// Why a packet was forwarded to the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum UpcallCmd {
    /// Flow-table miss.
    Miss = 1,
    /// Explicit to-controller action.
    Action = 2,
}

impl TryFrom<u8> for UpcallCmd {
    type Error = u8;
    fn try_from(value: u8) -> Result<UpcallCmd, u8> {
        match value {
            1 => Ok(UpcallCmd::Miss),
            2 => Ok(UpcallCmd::Action),
            other => Err(other),
        }
    }
}

/// The upcall header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Upcall {
    /// Miss or explicit action.
    pub cmd: UpcallCmd,
    /// The extracted flow key with the external in-port id.
    pub key: FlowKey,
}

impl Upcall {
    /// Encode into the first [`UPCALL_WIRE_SIZE`] bytes of `out`.
    ///
    /// # Panics
    ///
    /// Panics if `out` is shorter than the header; callers prepend exactly
    /// this many bytes.
    pub fn encode(&self, out: &mut [u8]) {
        out[0] = self.cmd as u8;
        out[1..4].fill(0);
        out[4..UPCALL_WIRE_SIZE].copy_from_slice(&self.key.to_bytes());
    }

    /// Decode from the front of `bytes`.
    #[must_use]
    pub fn decode(bytes: &[u8]) -> Option<Upcall> {
        if bytes.len() < UPCALL_WIRE_SIZE {
            return None;
        }
        Some(Upcall {
            cmd: UpcallCmd::try_from(bytes[0]).ok()?,
            key: FlowKey::from_bytes(&bytes[4..UPCALL_WIRE_SIZE])?,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn round_trip() {
        let upcall = Upcall {
            cmd: UpcallCmd::Miss,
            key: FlowKey {
                in_port: 33,
                ip_proto: 6,
                ..FlowKey::default()
            },
        };
        let mut wire = [0u8; UPCALL_WIRE_SIZE];
        upcall.encode(&mut wire);
        assert_eq!(Upcall::decode(&wire), Some(upcall));
    }

    #[test]
    fn bad_cmd_does_not_decode() {
        let mut wire = [0u8; UPCALL_WIRE_SIZE];
        Upcall {
            cmd: UpcallCmd::Action,
            key: FlowKey::default(),
        }
        .encode(&mut wire);
        wire[0] = 9;
        assert!(Upcall::decode(&wire).is_none());
    }
}
