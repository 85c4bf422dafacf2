// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

use core::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use control::{ControlAdapter, ControlChannel};
use pipeline::{MAX_PIPELINE_RUNS_PER_CONTROL_RUN, Pipeline};
use port::VportTable;
use tracing::info;

/// Everything one worker thread owns.
pub struct Worker {
    pub worker: usize,
    pub pipeline: Pipeline,
    pub channel: ControlChannel,
    pub adapter: ControlAdapter,
    pub vports: Arc<VportTable>,
}

impl Worker {
    /// The worker main loop: run the pipeline several times per control
    /// service, then acknowledge any pending para-virt teardown.  Exits at
    /// the next loop boundary after `stop` is raised, flushing writers
    /// first.
    pub fn run(mut self, stop: &AtomicBool) {
        info!("worker {} entering its loop", self.worker);
        while !stop.load(Ordering::Relaxed) {
            for _ in 0..MAX_PIPELINE_RUNS_PER_CONTROL_RUN {
                self.pipeline.run();
            }
            self.channel.service(&mut self.adapter, &mut self.pipeline);
            self.vports.ack_teardown(self.worker);
        }
        self.pipeline.flush_writers();
        self.vports.ack_teardown(self.worker);
        info!("worker {} stopped", self.worker);
    }
}
