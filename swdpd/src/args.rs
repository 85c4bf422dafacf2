// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

pub use clap::Parser;
use std::path::PathBuf;

fn parse_portmask(input: &str) -> Result<u64, String> {
    let trimmed = input.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    u64::from_str_radix(digits, 16).map_err(|e| format!("bad portmask {input:?}: {e}"))
}

#[derive(Parser, Debug)]
#[command(name = "swdpd")]
#[command(version = "0.1.0")]
#[command(about = "Software switch datapath daemon", long_about = None)]
pub struct CmdArgs {
    /// Hex bitmask of enabled physical NIC ports.
    #[arg(long, value_name = "HEXMASK", default_value = "0x0", value_parser = parse_portmask)]
    portmask: u64,

    /// Number of pipeline workers.
    #[arg(
        long,
        value_name = "N",
        default_value_t = 1,
        value_parser = clap::value_parser!(u16).range(1..=port::MAX_WORKERS as i64),
        help = "Number of pipeline workers in [1..16]"
    )]
    workers: u16,

    /// Seconds between statistics dumps; 0 disables them.
    #[arg(long, value_name = "SECONDS", default_value_t = 0)]
    stats_interval: u64,

    /// The controller's wake-up datagram socket.
    #[arg(
        long,
        value_name = "PATH",
        default_value = "/var/run/swdp/controller.sock"
    )]
    controller_socket: PathBuf,

    /// File backing the packet-buffer region, so sibling processes can map
    /// it.  Anonymous memory when omitted.
    #[arg(long, value_name = "PATH")]
    shm_path: Option<PathBuf>,

    /// Packet buffer slab size.
    #[arg(long, value_name = "N", default_value_t = 16384)]
    pkt_pool_size: u32,

    /// Control buffer slab size.
    #[arg(long, value_name = "N", default_value_t = 4096)]
    ctrl_pool_size: u32,

    /// Tracing filter, e.g. "info" or "debug,swdp_pipeline=trace".
    #[arg(long, value_name = "FILTER", default_value = "info")]
    log_filter: String,
}

impl CmdArgs {
    pub fn portmask(&self) -> u64 {
        self.portmask
    }

    pub fn workers(&self) -> usize {
        usize::from(self.workers)
    }

    pub fn stats_interval(&self) -> u64 {
        self.stats_interval
    }

    pub fn controller_socket(&self) -> PathBuf {
        self.controller_socket.clone()
    }

    pub fn shm_path(&self) -> Option<PathBuf> {
        self.shm_path.clone()
    }

    pub fn pkt_pool_size(&self) -> u32 {
        self.pkt_pool_size
    }

    pub fn ctrl_pool_size(&self) -> u32 {
        self.ctrl_pool_size
    }

    pub fn log_filter(&self) -> &str {
        &self.log_filter
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn portmask_accepts_hex_with_and_without_prefix() {
        assert_eq!(parse_portmask("0x3").unwrap(), 3);
        assert_eq!(parse_portmask("ff").unwrap(), 255);
        assert!(parse_portmask("0xzz").is_err());
    }

    #[test]
    fn defaults_parse() {
        let args = CmdArgs::parse_from(["swdpd"]);
        assert_eq!(args.portmask(), 0);
        assert_eq!(args.workers(), 1);
        assert_eq!(args.stats_interval(), 0);
        assert_eq!(args.pkt_pool_size(), 16384);
        assert_eq!(args.log_filter(), "info");
    }

    #[test]
    fn worker_bounds_are_enforced() {
        assert!(CmdArgs::try_parse_from(["swdpd", "--workers", "0"]).is_err());
        assert!(CmdArgs::try_parse_from(["swdpd", "--workers", "17"]).is_err());
        let args = CmdArgs::parse_from(["swdpd", "--workers", "4", "--portmask", "0x5"]);
        assert_eq!(args.workers(), 4);
        assert_eq!(args.portmask(), 0x5);
    }
}
