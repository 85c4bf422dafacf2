// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The process-wide port descriptor table.
//!
//! One descriptor exists per external port id.  The array is read by every
//! worker but each descriptor field is written only by the worker handling a
//! control request for that port (the controller targets exactly one
//! worker's request ring per port), so plain atomics suffice.

use core::sync::atomic::{AtomicBool, AtomicU8, AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::phy::EthDev;
use crate::veth::TapShared;
use crate::{INVALID_INDEX, MAX_VPORTS, MAX_WORKERS, PortError, PortKind};

bitflags::bitflags! {
    /// Direction flags of VPORT NEW/DEL requests.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PortFlags: u32 {
        /// Attach/detach the reader side.
        const IN = 0b01;
        /// Attach/detach the writer side.
        const OUT = 0b10;
    }
}

const TEARDOWN_NONE: u8 = 0;
const TEARDOWN_REQUESTED: u8 = 1;
const TEARDOWN_ACKED: u8 = 2;

/// One port descriptor.
#[derive(Debug)]
pub struct Vport {
    id: u32,
    kind: PortKind,
    name: Mutex<String>,
    in_index: AtomicU32,
    in_worker: AtomicU32,
    out_index: [AtomicU32; MAX_WORKERS],
    teardown: [AtomicU8; MAX_WORKERS],
    attached: Arc<AtomicBool>,
    tap: Mutex<Option<Arc<TapShared>>>,
    phy: Mutex<Option<Arc<dyn EthDev>>>,
}

impl Vport {
    fn new(id: u32, kind: PortKind) -> Vport {
        Vport {
            id,
            kind,
            name: Mutex::new(String::new()),
            in_index: AtomicU32::new(INVALID_INDEX),
            in_worker: AtomicU32::new(INVALID_INDEX),
            out_index: core::array::from_fn(|_| AtomicU32::new(INVALID_INDEX)),
            teardown: core::array::from_fn(|_| AtomicU8::new(TEARDOWN_NONE)),
            attached: Arc::new(AtomicBool::new(false)),
            tap: Mutex::new(None),
            phy: Mutex::new(None),
        }
    }

    /// External id.
    #[must_use]
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Port kind, fixed by the id range.
    #[must_use]
    pub fn kind(&self) -> PortKind {
        self.kind
    }

    /// The name recorded at VPORT NEW time.
    #[must_use]
    pub fn name(&self) -> String {
        self.name.lock().clone()
    }

    /// Device-attached gate shared with vhost adapters.
    #[must_use]
    pub fn attached_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.attached)
    }

    pub(crate) fn tap_shared(&self) -> Option<Arc<TapShared>> {
        self.tap.lock().clone()
    }

    pub(crate) fn phy_dev(&self) -> Option<Arc<dyn EthDev>> {
        self.phy.lock().clone()
    }
}

/// The descriptor array plus the physical portmask.
#[derive(Debug)]
pub struct VportTable {
    ports: Vec<Vport>,
    phy_portmask: u64,
}

impl VportTable {
    /// Build descriptors for the whole id space.
    #[must_use]
    pub fn new(phy_portmask: u64) -> VportTable {
        let ports = (0..MAX_VPORTS)
            .map(|id| {
                let kind = PortKind::of(id).unwrap_or(PortKind::Bridge);
                Vport::new(id, kind)
            })
            .collect();
        VportTable {
            ports,
            phy_portmask,
        }
    }

    /// The physical portmask this datapath was started with.
    #[must_use]
    pub fn phy_portmask(&self) -> u64 {
        self.phy_portmask
    }

    /// Look up a descriptor.
    ///
    /// # Errors
    ///
    /// Returns [`PortError::InvalidId`] for out-of-range ids.
    pub fn port(&self, id: u32) -> Result<&Vport, PortError> {
        self.ports
            .get(id as usize)
            .ok_or(PortError::InvalidId(id))
    }

    /// Verify an id against the portmask; see [`crate::verify`].
    ///
    /// # Errors
    ///
    /// Returns the error the control adapter reports as `ENODEV`.
    pub fn verify(&self, id: u32) -> Result<(), PortError> {
        crate::verify(id, self.phy_portmask)
    }

    /// Record the name supplied with VPORT NEW.
    ///
    /// # Errors
    ///
    /// Returns [`PortError::InvalidId`] or [`PortError::BadName`].
    pub fn set_name(&self, id: u32, name: &str) -> Result<(), PortError> {
        crate::validate_name(name)?;
        *self.port(id)?.name.lock() = name.to_string();
        Ok(())
    }

    /// The worker-local reader index of a port.
    ///
    /// # Errors
    ///
    /// Returns [`PortError::InvalidId`] for out-of-range ids and
    /// [`PortError::NotBound`] when no reader is attached.
    pub fn in_index(&self, id: u32) -> Result<u32, PortError> {
        let index = self.port(id)?.in_index.load(Ordering::Relaxed);
        if index == INVALID_INDEX {
            return Err(PortError::NotBound(id));
        }
        Ok(index)
    }

    /// Record the reader index assigned by `worker`'s pipeline.
    ///
    /// # Errors
    ///
    /// Returns [`PortError::InvalidId`] for out-of-range ids.
    pub fn set_in_index(&self, id: u32, worker: usize, index: u32) -> Result<(), PortError> {
        let port = self.port(id)?;
        port.in_index.store(index, Ordering::Relaxed);
        #[allow(clippy::cast_possible_truncation)]
        port.in_worker.store(worker as u32, Ordering::Relaxed);
        Ok(())
    }

    /// Unbind the reader side.
    ///
    /// # Errors
    ///
    /// Returns [`PortError::InvalidId`] for out-of-range ids.
    pub fn clear_in_index(&self, id: u32) -> Result<(), PortError> {
        let port = self.port(id)?;
        port.in_index.store(INVALID_INDEX, Ordering::Relaxed);
        port.in_worker.store(INVALID_INDEX, Ordering::Relaxed);
        Ok(())
    }

    /// The writer index of a port on `worker`.
    ///
    /// # Errors
    ///
    /// Returns [`PortError::InvalidId`] or [`PortError::NotBound`].
    pub fn out_index(&self, id: u32, worker: usize) -> Result<u32, PortError> {
        let index = self.port(id)?.out_index[worker].load(Ordering::Relaxed);
        if index == INVALID_INDEX {
            return Err(PortError::NotBound(id));
        }
        Ok(index)
    }

    /// Record the writer index assigned by `worker`'s pipeline.
    ///
    /// # Errors
    ///
    /// Returns [`PortError::InvalidId`] for out-of-range ids.
    pub fn set_out_index(&self, id: u32, worker: usize, index: u32) -> Result<(), PortError> {
        self.port(id)?.out_index[worker].store(index, Ordering::Relaxed);
        Ok(())
    }

    /// Unbind the writer side on `worker`.  The owning worker flushes its
    /// writer before calling this, so no in-flight references remain.
    ///
    /// # Errors
    ///
    /// Returns [`PortError::InvalidId`] for out-of-range ids.
    pub fn clear_out_index(&self, id: u32, worker: usize) -> Result<(), PortError> {
        self.port(id)?.out_index[worker].store(INVALID_INDEX, Ordering::Relaxed);
        Ok(())
    }

    /// Attach a kernel tap device to a veth port.
    ///
    /// # Errors
    ///
    /// Returns [`PortError::InvalidId`] for out-of-range ids.
    pub fn attach_tap(&self, id: u32, shared: Arc<TapShared>) -> Result<(), PortError> {
        *self.port(id)?.tap.lock() = Some(shared);
        Ok(())
    }

    /// Attach a NIC device to a physical port.
    ///
    /// # Errors
    ///
    /// Returns [`PortError::InvalidId`] for out-of-range ids.
    pub fn attach_phy(&self, id: u32, dev: Arc<dyn EthDev>) -> Result<(), PortError> {
        *self.port(id)?.phy.lock() = Some(dev);
        Ok(())
    }

    /// A para-virt guest connected: gate open for the vhost port whose
    /// recorded name matches.
    ///
    /// # Errors
    ///
    /// Returns [`PortError::NoDevice`] when no vhost port carries `name`,
    /// reported as `ENODEV`.
    pub fn vhost_up(&self, name: &str) -> Result<u32, PortError> {
        let id = self.find_vhost(name)?;
        self.ports[id as usize].attached.store(true, Ordering::Release);
        debug!("vhost device {name} up on port {id}");
        Ok(id)
    }

    /// A para-virt guest disconnected: close the gate and ask every worker
    /// to acknowledge before guest memory may be unmapped.
    ///
    /// # Errors
    ///
    /// Returns [`PortError::NoDevice`] when no vhost port carries `name`.
    pub fn vhost_down(&self, name: &str) -> Result<u32, PortError> {
        let id = self.find_vhost(name)?;
        let port = &self.ports[id as usize];
        port.attached.store(false, Ordering::Release);
        for flag in &port.teardown {
            flag.store(TEARDOWN_REQUESTED, Ordering::Release);
        }
        debug!("vhost device {name} down on port {id}, teardown requested");
        Ok(id)
    }

    fn find_vhost(&self, name: &str) -> Result<u32, PortError> {
        let first = PortKind::Vhost.first_id();
        for id in first..first + crate::MAX_VHOSTS {
            let port = &self.ports[id as usize];
            if *port.name.lock() == name {
                return Ok(id);
            }
        }
        warn!("no vhost port named {name}");
        Err(PortError::NoDevice(first))
    }

    /// Worker-side teardown acknowledgement, called at the top of each loop
    /// iteration.  Returns the number of ports acknowledged.
    pub fn ack_teardown(&self, worker: usize) -> usize {
        let first = PortKind::Vhost.first_id() as usize;
        let mut acked = 0;
        for port in &self.ports[first..first + crate::MAX_VHOSTS as usize] {
            let flag = &port.teardown[worker];
            if flag
                .compare_exchange(
                    TEARDOWN_REQUESTED,
                    TEARDOWN_ACKED,
                    Ordering::AcqRel,
                    Ordering::Relaxed,
                )
                .is_ok()
            {
                acked += 1;
            }
        }
        acked
    }

    /// Whether every worker has acknowledged teardown of `id`.
    ///
    /// # Errors
    ///
    /// Returns [`PortError::InvalidId`] for out-of-range ids.
    pub fn teardown_acked(&self, id: u32, workers: usize) -> Result<bool, PortError> {
        let port = self.port(id)?;
        Ok(port.teardown[..workers]
            .iter()
            .all(|flag| flag.load(Ordering::Acquire) != TEARDOWN_REQUESTED))
    }

    /// Busy-wait until every worker acknowledged teardown of `id`.  Called
    /// from the control thread; the host may unmap guest memory afterwards.
    ///
    /// # Errors
    ///
    /// Returns [`PortError::InvalidId`] for out-of-range ids.
    pub fn wait_teardown(&self, id: u32, workers: usize) -> Result<(), PortError> {
        while !self.teardown_acked(id, workers)? {
            core::hint::spin_loop();
        }
        let port = self.port(id)?;
        for flag in &port.teardown {
            flag.store(TEARDOWN_NONE, Ordering::Release);
        }
        Ok(())
    }
}
