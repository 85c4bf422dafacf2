// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Request handlers.
//!
//! Every handler builds its reply as an echo of the request first and
//! mutates second, so exactly one reply leaves even when an operation fails
//! half way.  Errors surface as errno-class values in the reply's `error`
//! field; the fast path never unwinds.

use std::sync::Arc;

use flow::{CycleClock, FlowHandle, FlowStats};
use message::{
    Body, FlowBody, FlowCommand, FlowFlags, Message, PacketCommand, VportBody, VportCommand,
};
use pipeline::Pipeline;
use port::{PortFlags, VportTable};
use stats::StatsTable;
use tracing::{debug, warn};

/// The reply to an unrecognised request: `EINVAL`, with the reserved
/// UNKNOWN family so it cannot collide with a real one.
#[must_use]
pub fn unknown_reply() -> Message {
    Message {
        error: errno::EINVAL,
        body: Body::Unknown,
    }
}

/// Translates controller requests into pipeline mutations.
pub struct ControlAdapter {
    vports: Arc<VportTable>,
    stats: Arc<StatsTable>,
    clock: Arc<CycleClock>,
}

impl ControlAdapter {
    #[must_use]
    pub fn new(
        vports: Arc<VportTable>,
        stats: Arc<StatsTable>,
        clock: Arc<CycleClock>,
    ) -> ControlAdapter {
        ControlAdapter {
            vports,
            stats,
            clock,
        }
    }

    /// Dispatch one request, producing exactly one reply.
    pub fn handle(&mut self, pipeline: &mut Pipeline, request: Message) -> Message {
        match request.body {
            Body::Vport(body) => match body.command {
                VportCommand::New => self.vport_new(pipeline, body),
                VportCommand::Del => self.vport_del(pipeline, body),
                VportCommand::Get => self.vport_get(&body),
            },
            Body::Flow(body) => match body.command {
                FlowCommand::New => self.flow_new(pipeline, body),
                FlowCommand::Del => self.flow_del(pipeline, body),
                FlowCommand::Get => self.flow_get(pipeline, body),
            },
            // PACKET requests arrive on the packet ring, not here
            Body::Packet(body) => {
                debug_assert!(matches!(body.command, PacketCommand::Action));
                warn!("PACKET message on the request ring");
                unknown_reply()
            }
            Body::Unknown => unknown_reply(),
        }
    }

    fn vport_new(&mut self, pipeline: &mut Pipeline, request: VportBody) -> Message {
        let reply = request.clone();
        if let Err(e) = self.vports.verify(request.id) {
            warn!("invalid port id for new port {}: {e}", request.id);
            return vport_reply(errno::ENODEV, reply);
        }
        if request.flags.contains(PortFlags::IN) {
            if let Err(e) = pipeline.port_in_add(request.id, &request.name) {
                warn!("unable to add in-port {}: {e}", request.id);
                return vport_reply(e.errno(), reply);
            }
            debug!(
                "added vport {} ({}) as in-port on worker {}",
                request.id,
                request.name,
                pipeline.worker()
            );
        }
        if request.flags.contains(PortFlags::OUT) {
            if let Err(e) = pipeline.port_out_add(request.id) {
                warn!("unable to add out-port {}: {e}", request.id);
                return vport_reply(e.errno(), reply);
            }
            debug!(
                "added vport {} as out-port on worker {}",
                request.id,
                pipeline.worker()
            );
        }
        vport_reply(0, reply)
    }

    fn vport_del(&mut self, pipeline: &mut Pipeline, request: VportBody) -> Message {
        let reply = request.clone();
        if request.flags.contains(PortFlags::IN) {
            if let Err(e) = pipeline.port_in_del(request.id) {
                warn!("unable to delete in-port {}: {e}", request.id);
                return vport_reply(e.errno(), reply);
            }
        }
        if request.flags.contains(PortFlags::OUT) {
            if let Err(e) = pipeline.port_out_del(request.id) {
                warn!("unable to delete out-port {}: {e}", request.id);
                return vport_reply(e.errno(), reply);
            }
        }
        vport_reply(0, reply)
    }

    fn vport_get(&mut self, request: &VportBody) -> Message {
        let mut reply = request.clone();
        match self.stats.vport_get(request.id) {
            Ok(totals) => {
                reply.stats = totals;
                if request.clear {
                    // read-and-clear; the totals already captured go back
                    let _ = self.stats.vport_clear(request.id);
                }
                vport_reply(0, reply)
            }
            Err(_) => vport_reply(errno::ENODEV, reply),
        }
    }

    /// FLOW NEW: create-or-replace with statistics carry-over.
    fn flow_new(&mut self, pipeline: &mut Pipeline, request: FlowBody) -> Message {
        let mut reply = request.clone();
        let mut old_stats = FlowStats::default();
        let mut found = false;

        if request.flags.contains(FlowFlags::REPLACE) {
            // Delete first, remembering whether anything was displaced and
            // what its statistics were.
            match pipeline.flow_del(&request.key) {
                Ok((del_found, stats)) => {
                    found = del_found;
                    if found {
                        old_stats = stats;
                    } else if !request.flags.contains(FlowFlags::CREATE) {
                        warn!("unable to replace flow: no matching entry");
                        return flow_reply(errno::ENOENT, reply);
                    }
                }
                Err(e) => {
                    warn!("unable to delete flow during replace: {e}");
                    return flow_reply(e.errno(), reply);
                }
            }
        }

        let handle = match pipeline.flow_add(&request.key, &request.actions) {
            Ok(handle) => handle,
            Err(e) => {
                warn!("unable to add flow: {e}");
                return flow_reply(e.errno(), reply);
            }
        };

        let now = CycleClock::now_cycles();
        if found && !request.clear {
            // Carry the displaced entry's statistics over, raw cycles into
            // the table, converted milliseconds into the reply.
            pipeline.flow_set_stats(handle, old_stats);
            reply.stats = converted(&self.clock, now, old_stats);
        } else {
            // stats for a new flow are zero
            reply.stats = FlowStats::default();
        }
        if request.clear {
            // read-and-clear: the resident entry keeps zeros and the reply
            // carries what the displaced entry had accumulated
            reply.stats = converted(&self.clock, now, old_stats);
        }

        reply.key_found = found;
        reply.handle = handle.as_u64();
        debug!("added flow, handle {:#x}", handle.as_u64());
        flow_reply(0, reply)
    }

    fn flow_del(&mut self, pipeline: &mut Pipeline, request: FlowBody) -> Message {
        let mut reply = request.clone();
        match pipeline.flow_del(&request.key) {
            Ok((found, stats)) => {
                reply.key_found = found;
                reply.stats = converted(&self.clock, CycleClock::now_cycles(), stats);
                flow_reply(0, reply)
            }
            Err(e) => {
                warn!("unable to delete flow: {e}");
                flow_reply(e.errno(), reply)
            }
        }
    }

    fn flow_get(&mut self, pipeline: &mut Pipeline, request: FlowBody) -> Message {
        let mut reply = request.clone();
        let Some(handle) = FlowHandle::from_u64(request.handle) else {
            return flow_reply(errno::EINVAL, reply);
        };
        let Some(stats) = pipeline.flow_stats(handle) else {
            return flow_reply(errno::EINVAL, reply);
        };
        reply.stats = converted(&self.clock, CycleClock::now_cycles(), stats);
        reply.actions = pipeline.flow_actions(handle).unwrap_or_default();
        flow_reply(0, reply)
    }
}

fn converted(clock: &CycleClock, now_cycles: u64, stats: FlowStats) -> FlowStats {
    FlowStats {
        used: clock.flow_used_time_ms(now_cycles, stats.used),
        ..stats
    }
}

fn vport_reply(error: i32, body: VportBody) -> Message {
    Message {
        error,
        body: Body::Vport(body),
    }
}

fn flow_reply(error: i32, body: FlowBody) -> Message {
    Message {
        error,
        body: Body::Flow(body),
    }
}
