//! Demonstration CLI: builds a Configuration Record (spec §3) from
//! command-line flags and hands it to the orchestrator.
//!
//! Flag set and `#[clap(...)]` style mirror the teacher's `main.rs` `Opts`
//! struct, trimmed to a single command since the core has no OCI-style
//! create/start/kill lifecycle to dispatch between.

use std::path::PathBuf;
use std::str::FromStr;

use anyhow::Result;
use clap::Parser;
use log::LevelFilter;

use droidspace::config::Config;
use droidspace::orchestrator;

#[derive(Parser, Debug)]
#[clap(version = "0.1.0", about = "Linux container bring-up")]
struct Opts {
    /// Short identifier used in logs.
    #[clap(long, default_value = "droidspace")]
    name: String,
    /// Host path to an already-assembled guest root directory.
    #[clap(long)]
    rootfs: Option<PathBuf>,
    /// Loop-mountable filesystem image to use as the guest root instead.
    #[clap(long)]
    image: Option<PathBuf>,
    /// Guest hostname. Empty inherits the host's.
    #[clap(long, default_value = "")]
    hostname: String,
    /// Auxiliary ttys in addition to the console, 0..=6.
    #[clap(long, default_value = "0")]
    tty_count: u8,
    /// Guest init expects systemd-style namespace restrictions.
    #[clap(long)]
    systemd: bool,
    /// Grant host devtmpfs and GPU group membership.
    #[clap(long)]
    hw_access: bool,
    /// Bridge the Termux user-space display sockets.
    #[clap(long)]
    termux_x11: bool,
    /// Enable IPv6 forwarding on the host.
    #[clap(long)]
    enable_ipv6: bool,
    /// Directory used for loop-mount scratch space.
    #[clap(long, default_value = "/var/lib/droidspace")]
    workspace_dir: PathBuf,
    /// Append logs to this file instead of stderr.
    #[clap(short, long)]
    log: Option<PathBuf>,
    /// Log level: error, warn, info, debug, trace.
    #[clap(long, default_value = "warn")]
    log_level: String,
}

fn main() -> Result<()> {
    let opts = Opts::parse();

    let level = LevelFilter::from_str(&opts.log_level).unwrap_or(LevelFilter::Warn);
    droidspace::logger::init(opts.log.clone(), Some(level))?;

    let rootfs_path = opts.rootfs.clone().unwrap_or_else(|| PathBuf::from("/"));

    let cfg = Config {
        container_name: opts.name,
        rootfs_path,
        rootfs_image: opts.image,
        hostname: opts.hostname,
        tty_count: opts.tty_count,
        is_systemd: opts.systemd,
        hw_access: opts.hw_access,
        termux_x11: opts.termux_x11,
        enable_ipv6: opts.enable_ipv6,
        workspace_dir: opts.workspace_dir,
    };

    let exit_code = orchestrator::bring_up(cfg)?;
    std::process::exit(exit_code);
}
