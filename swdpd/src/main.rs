// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

#![deny(clippy::all, clippy::pedantic)]
#![allow(clippy::expect_used)] // bootstrap failures are fatal by design

mod args;
mod worker;

use core::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use control::{ControlAdapter, ControlChannel, CtrlPool};
use flow::CycleClock;
use net::PktPool;
use pipeline::Pipeline;
use port::{PortKind, VportTable};
use ring::RingRegistry;
use stats::StatsTable;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::args::{CmdArgs, Parser};
use crate::worker::Worker;

fn init_logging(filter: &str) {
    tracing_subscriber::fmt()
        .with_target(true)
        .with_thread_names(true)
        .with_env_filter(EnvFilter::new(filter))
        .init();
}

fn main() {
    let args = CmdArgs::parse();
    init_logging(args.log_filter());
    info!("starting datapath...");

    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = Arc::clone(&stop);
        ctrlc::set_handler(move || stop.store(true, Ordering::Relaxed))
            .expect("failed to set signal handler");
    }

    // One-time frequency measurement; flow timestamps depend on it.
    let clock = Arc::new(CycleClock::calibrate());

    let registry = Arc::new(RingRegistry::new());
    let pkt_pool = match args.shm_path() {
        Some(path) => PktPool::with_file(ring::names::PKT_POOL, args.pkt_pool_size(), &path),
        None => PktPool::new(ring::names::PKT_POOL, args.pkt_pool_size()),
    };
    let pkt_pool = Arc::new(match pkt_pool {
        Ok(pool) => pool,
        Err(e) => {
            error!("cannot create the packet pool: {e}");
            panic!("packet pool bootstrap failed, aborting...");
        }
    });
    let ctrl_pool = Arc::new(
        CtrlPool::new(ring::names::CTRL_POOL, args.ctrl_pool_size())
            .expect("cannot create the control pool"),
    );

    let vports = Arc::new(VportTable::new(args.portmask()));
    let stats = Arc::new(StatsTable::new(port::MAX_VPORTS, port::MAX_WORKERS));

    // Pre-create the per-port ring quartets; their names are the ABI that
    // sibling processes look up.
    for id in 0..port::MAX_CLIENTS {
        port::client::ensure_rings(&registry, PortKind::Client.first_id() + id)
            .expect("cannot create client port rings");
    }
    for id in 0..port::MAX_VHOSTS {
        port::vhost::ensure_rings(&registry, PortKind::Vhost.first_id() + id)
            .expect("cannot create vhost port rings");
    }

    let mut workers = Vec::new();
    for worker in 0..args.workers() {
        let pipeline = Pipeline::new(
            worker,
            Arc::clone(&pkt_pool),
            Arc::clone(&registry),
            Arc::clone(&vports),
            Arc::clone(&stats),
            Some(args.controller_socket()),
        );
        let pipeline = match pipeline {
            Ok(pipeline) => pipeline,
            Err(e) => {
                error!("cannot build the pipeline for worker {worker}: {e}");
                panic!("pipeline bootstrap failed, aborting...");
            }
        };
        let channel = ControlChannel::new(
            worker,
            &registry,
            Arc::clone(&ctrl_pool),
            Arc::clone(&stats),
        )
        .expect("cannot create the control channel");
        let adapter = ControlAdapter::new(
            Arc::clone(&vports),
            Arc::clone(&stats),
            Arc::clone(&clock),
        );
        workers.push(Worker {
            worker,
            pipeline,
            channel,
            adapter,
            vports: Arc::clone(&vports),
        });
    }

    let mut handles = Vec::new();
    for unit in workers {
        let stop = Arc::clone(&stop);
        let handle = std::thread::Builder::new()
            .name(format!("swdp-worker-{:02}", unit.worker))
            .spawn(move || unit.run(&stop))
            .expect("failed to spawn worker thread");
        handles.push(handle);
    }

    master_loop(&stop, &stats, args.stats_interval());

    for handle in handles {
        if handle.join().is_err() {
            error!("a worker thread panicked");
        }
    }
    info!("datapath shut down");
}

/// The master core does bookkeeping only: periodic statistics dumps and the
/// shutdown watch.
fn master_loop(stop: &AtomicBool, stats: &StatsTable, interval_secs: u64) {
    let mut last_dump = Instant::now();
    while !stop.load(Ordering::Relaxed) {
        std::thread::sleep(Duration::from_millis(100));
        if interval_secs != 0 && last_dump.elapsed() >= Duration::from_secs(interval_secs) {
            stats.display();
            last_dump = Instant::now();
        }
    }
}
