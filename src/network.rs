//! Host Networking (spec §4.8, supplemental) and the Android-only
//! networking/storage/optimization extras (SPEC_FULL §4.8-§4.10).
//!
//! Everything here runs host-side, before the guest namespaces exist, and
//! is Degradable (spec §7): a failure here never aborts bring-up, it just
//! means the guest boots with less connectivity than asked for.

use std::path::Path;
use std::process::Command;

use crate::config::Config;
use crate::error::degraded;
use crate::host_probe::HostProbe;
use crate::utils::write_file;

/// Enable IPv4 (always) and IPv6 (if requested) forwarding, then hand off
/// to Android's iptables NAT setup. Grounded in
/// `original_source/network.c:fix_networking_host`.
pub fn configure_host_networking(cfg: &Config, probe: &HostProbe) {
    if write_file("/proc/sys/net/ipv4/ip_forward", "1").is_err() {
        degraded("network", "failed to enable IPv4 forwarding");
    }

    if cfg.enable_ipv6
        && write_file("/proc/sys/net/ipv6/conf/all/forwarding", "1").is_err()
    {
        degraded("network", "failed to enable IPv6 forwarding");
    }

    if probe.is_android {
        configure_android_iptables();
    }
}

/// NAT + forward policy for the container's private subnet, via the
/// external `iptables` binary. Grounded in
/// `original_source/android.c:android_configure_iptables`. Best-effort:
/// a stock Android kernel may lack `iptables` or the `nat` table.
fn configure_android_iptables() {
    run_best_effort(
        "network",
        "iptables",
        &["-P", "FORWARD", "ACCEPT"],
    );
    run_best_effort(
        "network",
        "iptables",
        &[
            "-t",
            "nat",
            "-A",
            "POSTROUTING",
            "-s",
            "10.0.3.0/24",
            "!",
            "-d",
            "10.0.3.0/24",
            "-j",
            "MASQUERADE",
        ],
    );
}

/// Bind-mount the host's shared storage into the guest rootfs at
/// `/sdcard`, preferring `/storage/emulated/0` and falling back to
/// `/sdcard` itself (spec §4.9). Grounded in
/// `original_source/android.c:android_setup_storage`. No-op off Android.
pub fn bridge_android_storage(rootfs_path: &Path, probe: &HostProbe) {
    if !probe.is_android {
        return;
    }

    let target = rootfs_path.join("sdcard");
    if let Err(e) = crate::utils::create_dir_all(&target) {
        degraded("network", format!("could not create {:?}: {}", target, e));
        return;
    }

    log::info!("mounting Android internal storage to /sdcard");
    if bind_mount("/storage/emulated/0", &target).is_err() && bind_mount("/sdcard", &target).is_err() {
        degraded("network", "no Android storage source available to bridge");
    }
}

fn bind_mount(source: &str, target: &Path) -> nix::Result<()> {
    nix::mount::mount(
        Some(source),
        target,
        None::<&str>,
        nix::mount::MsFlags::MS_BIND | nix::mount::MsFlags::MS_REC,
        None::<&str>,
    )
}

/// Lift the phantom-process killer's cap and whitelist the shell user
/// from Doze (spec §4.10). Grounded in
/// `original_source/android.c:android_optimizations`. Fire-and-forget:
/// absence of `device_config`/`dumpsys` on a locked-down device is normal,
/// not even worth a warning.
pub fn apply_android_optimizations(probe: &HostProbe) {
    if !probe.is_android {
        return;
    }

    log::info!("applying Android system optimizations");
    run_best_effort(
        "network",
        "device_config",
        &[
            "put",
            "activity_manager",
            "max_phantom_processes",
            "2147483647",
        ],
    );
    run_best_effort(
        "network",
        "dumpsys",
        &["deviceidle", "whitelist", "+com.android.shell"],
    );
}

/// Remount `/data` with `suid` so `su`/`sudo`/`ping` work when the rootfs
/// lives there (spec §4.2 supplemental). Grounded in
/// `original_source/android.c:android_remount_data_suid`.
pub fn remount_data_suid(probe: &HostProbe) {
    if !probe.is_android {
        return;
    }
    run_best_effort("network", "mount", &["-o", "remount,suid", "/data"]);
}

fn run_best_effort(component: &str, program: &str, args: &[&str]) {
    match Command::new(program).args(args).status() {
        Ok(status) if status.success() => {}
        Ok(status) => log::debug!("{component}: `{program}` exited with {status}"),
        Err(e) => log::debug!("{component}: `{program}` unavailable: {e}"),
    }
}
