// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The per-worker packet pipeline.
//!
//! One [`Pipeline`] runs on each worker core and owns everything that worker
//! touches on the fast path: reader and writer slots, the exact-match flow
//! table, the exception path to the controller and the iteration/flush
//! bookkeeping.  The control adapter mutates the pipeline between runs; no
//! other thread ever does.

#![deny(clippy::all, clippy::pedantic)]

mod actions;
mod driver;
#[cfg(test)]
mod tests;
mod wakeup;

pub use driver::{
    FLUSH_INTERVAL, MAX_PIPELINE_RUNS_PER_CONTROL_RUN, Pipeline, PipelineError, TableKind,
};
pub use wakeup::WakeupSocket;
