// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

use std::os::unix::net::UnixDatagram;
use std::path::PathBuf;

/// The controller wake-up socket.
///
/// When the exception path has queued upcalls, the pipeline pokes the
/// controller's well-known datagram socket at the next flush so it polls the
/// exception ring.  Send failures are deliberately ignored: the controller
/// may not be listening yet and the upcalls are sitting in the ring either
/// way.
#[derive(Debug)]
pub struct WakeupSocket {
    sock: UnixDatagram,
    peer: PathBuf,
}

impl WakeupSocket {
    /// Create an unbound, non-blocking datagram socket targeting `peer`.
    ///
    /// # Errors
    ///
    /// Returns an [`std::io::Error`] if the socket cannot be created; that
    /// only happens at init and is fatal to the caller.
    pub fn new(peer: PathBuf) -> std::io::Result<WakeupSocket> {
        let sock = UnixDatagram::unbound()?;
        sock.set_nonblocking(true)?;
        Ok(WakeupSocket { sock, peer })
    }

    /// Fire one wake-up datagram.
    pub fn send(&self) {
        // don't care about the result
        let _ = self.sock.send_to(&1u32.to_ne_bytes(), &self.peer);
    }
}
