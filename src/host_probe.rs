//! Host Probe (spec §4.1): detects host class, kernel version, SELinux
//! enforcement, GPU device GIDs, and host DNS sources.
//!
//! Design Notes §9 calls for an explicit handle threaded through the
//! pipeline rather than the teacher's process-global cache — `HostProbe`
//! is built once by [`HostProbe::detect`] and passed by reference from
//! there on.

use std::os::unix::fs::MetadataExt;
use std::path::Path;
use std::process::Command;

use crate::utils::read_trimmed;

/// Curated GPU device paths, probed in this fixed order (spec §4.1).
const GPU_DEVICE_PATHS: &[&str] = &[
    "/dev/dri/renderD128",
    "/dev/dri/renderD129",
    "/dev/dri/renderD130",
    "/dev/dri/card0",
    "/dev/dri/card1",
    "/dev/dri/card2",
    "/dev/nvidia0",
    "/dev/nvidia1",
    "/dev/nvidia2",
    "/dev/nvidiactl",
    "/dev/nvidia-uvm",
    "/dev/nvidia-uvm-tools",
    "/dev/nvidia-modeset",
    "/dev/nvidia-caps/nvidia-cap1",
    "/dev/nvidia-caps/nvidia-cap2",
    "/dev/mali0",
    "/dev/mali",
    "/dev/mali1",
    "/dev/kgsl-3d0",
    "/dev/kgsl",
    "/dev/genlock",
    "/dev/kfd",
    "/dev/pvr_sync",
    "/dev/nvhost-ctrl",
    "/dev/nvhost-gpu",
    "/dev/nvmap",
    "/dev/dma_heap/system",
    "/dev/dma_heap/linux,cma",
    "/dev/dma_heap/reserved",
    "/dev/dma_heap/qcom,system",
    "/dev/sw_sync",
];

/// Cap on how many distinct GPU GIDs a single probe will collect.
const MAX_GPU_GIDS: usize = 32;

/// Fallback DNS when the host has no better source (non-Android, or
/// Android property lookup came back empty).
const FALLBACK_DNS_PRIMARY: &str = "8.8.8.8";
const FALLBACK_DNS_SECONDARY: &str = "8.8.4.4";

const ANDROID_DNS_PROPS: &[&str] = &[
    "net.dns1",
    "net.dns2",
    "net.eth0.dns1",
    "net.eth0.dns2",
    "net.wlan0.dns1",
    "net.wlan0.dns2",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelinuxState {
    Enforcing,
    Permissive,
    Unavailable,
}

/// One-shot snapshot of host facts, produced before pivot-root and
/// consumed read-only afterward (spec §3, Host Probe Record).
#[derive(Debug, Clone)]
pub struct HostProbe {
    pub is_android: bool,
    pub kernel_version: (u32, u32),
    pub selinux_enforcing: SelinuxState,
    pub gpu_gids: Vec<u32>,
    pub dns_primary: String,
    pub dns_secondary: String,
}

impl HostProbe {
    /// Run every host-interrogation step once, in the order spec §4.1
    /// describes, and return the resulting record. Must be called before
    /// Mount Builder / pivot-root (invariant I2 for `gpu_gids`).
    pub fn detect() -> Self {
        let is_android = detect_android();
        let kernel_version = parse_kernel_version().unwrap_or_else(|| {
            log::debug!("kernel version parse failed, assuming modern (>=5.0)");
            (5, 0)
        });
        let selinux_enforcing = detect_selinux();
        let gpu_gids = scan_gpu_gids();
        let (dns_primary, dns_secondary) = discover_dns(is_android);

        HostProbe {
            is_android,
            kernel_version,
            selinux_enforcing,
            gpu_gids,
            dns_primary,
            dns_secondary,
        }
    }

    pub fn is_legacy_kernel(&self) -> bool {
        self.kernel_version.0 < 5
    }
}

/// Android iff `ANDROID_ROOT` is set or `/system/bin/app_process` exists
/// (spec §4.1).
fn detect_android() -> bool {
    std::env::var_os("ANDROID_ROOT").is_some() || Path::new("/system/bin/app_process").exists()
}

/// Parse the kernel release string (`uname -r`-shaped, e.g.
/// `5.15.0-foo`). Parse failure is treated as "modern" per spec §4.1's
/// explicit rationale: a false-modern container boots but may fail a
/// systemd guest; a false-legacy container would needlessly block the
/// guest's own unshare calls, which is worse for the common case.
fn parse_kernel_version() -> Option<(u32, u32)> {
    let release = nix::sys::utsname::uname().release().to_string();
    let mut parts = release.split(|c: char| c == '.' || c == '-');
    let major: u32 = parts.next()?.parse().ok()?;
    let minor: u32 = parts.next()?.parse().ok()?;
    Some((major, minor))
}

fn detect_selinux() -> SelinuxState {
    match read_trimmed("/sys/fs/selinux/enforce") {
        Ok(s) if s == "1" => SelinuxState::Enforcing,
        Ok(_) => SelinuxState::Permissive,
        Err(_) => SelinuxState::Unavailable,
    }
}

/// Supplemental operation (SPEC_FULL §4.1): force SELinux to permissive
/// when the orchestrator decides a hardware-access container needs it.
/// Grounded in `original_source/android.c:android_set_selinux_permissive`.
/// Degradable: failure to write the enforce file falls back to invoking
/// `setenforce 0`, and failure of that is only logged.
pub fn lower_selinux_enforcement() {
    if crate::utils::write_file("/sys/fs/selinux/enforce", "0").is_err() {
        let status = Command::new("setenforce").arg("0").status();
        if !matches!(status, Ok(s) if s.success()) {
            crate::error::degraded("host_probe", "failed to set SELinux permissive");
        }
    }
}

/// Scan the curated device list, collecting unique non-root GIDs in
/// first-seen order (spec §4.1). Must run before pivot-root (I2).
fn scan_gpu_gids() -> Vec<u32> {
    let mut gids = Vec::new();
    for device in GPU_DEVICE_PATHS {
        let meta = match std::fs::metadata(device) {
            Ok(m) => m,
            Err(_) => continue,
        };
        let gid = meta.gid();
        if gid == 0 {
            continue;
        }
        if gids.contains(&gid) {
            continue;
        }
        if gids.len() >= MAX_GPU_GIDS {
            log::debug!("GPU GID cap ({}) reached, ignoring {}", MAX_GPU_GIDS, device);
            continue;
        }
        log::debug!("GPU device {} -> GID {}", device, gid);
        gids.push(gid);
    }
    if !gids.is_empty() {
        log::debug!("discovered {} unique GPU group(s) on host", gids.len());
    }
    gids
}

/// DNS discovery (spec §4.1). Non-Android: the configured fallback.
/// Android: scan `net.dns1`/`net.dns2` pairs via system properties.
///
/// Q1 (spec §9, preserved deliberately): the scan advances by property
/// pairs and stops at the *first* pair whose primary entry is non-empty,
/// even if that pair's secondary entry is empty — it does not keep
/// looking for a pair where both are populated.
fn discover_dns(is_android: bool) -> (String, String) {
    if !is_android {
        return (
            FALLBACK_DNS_PRIMARY.to_string(),
            FALLBACK_DNS_SECONDARY.to_string(),
        );
    }

    let mut pairs = ANDROID_DNS_PROPS.chunks(2);
    while let Some([prop1, prop2]) = pairs.next().map(|c| [c[0], c.get(1).copied().unwrap_or("")]) {
        let dns1 = getprop(prop1);
        if !dns1.is_empty() {
            let dns2 = if prop2.is_empty() {
                String::new()
            } else {
                getprop(prop2)
            };
            return (dns1, dns2);
        }
    }

    (String::new(), String::new())
}

/// Query an Android system property via the external `getprop` binary
/// (spec §6: "Android system-property values via `getprop` (external
/// process)"). Empty string on any failure.
fn getprop(name: &str) -> String {
    Command::new("getprop")
        .arg(name)
        .output()
        .ok()
        .filter(|o| o.status.success())
        .map(|o| String::from_utf8_lossy(&o.stdout).trim().to_string())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    // `detect_android` reads the real `ANDROID_ROOT` process environment
    // variable, so this has to run serially with respect to anything
    // else touching it (same concern `env_sealer`'s env-mutating tests
    // guard against).
    #[test]
    #[serial]
    fn detect_android_true_when_android_root_is_set() {
        std::env::set_var("ANDROID_ROOT", "/system");
        assert!(detect_android());
        std::env::remove_var("ANDROID_ROOT");
    }

    #[test]
    #[serial]
    fn detect_android_false_without_android_root_or_app_process() {
        std::env::remove_var("ANDROID_ROOT");
        // Can't fabricate /system/bin/app_process without root; this host
        // is assumed not to be a real Android device under test.
        assert!(!detect_android());
    }

    #[test]
    fn non_android_falls_back_to_public_dns() {
        let (primary, secondary) = discover_dns(false);
        assert_eq!(primary, FALLBACK_DNS_PRIMARY);
        assert_eq!(secondary, FALLBACK_DNS_SECONDARY);
    }

    #[test]
    fn legacy_kernel_detection() {
        let probe = HostProbe {
            is_android: false,
            kernel_version: (4, 14),
            selinux_enforcing: SelinuxState::Unavailable,
            gpu_gids: Vec::new(),
            dns_primary: String::new(),
            dns_secondary: String::new(),
        };
        assert!(probe.is_legacy_kernel());

        let modern = HostProbe {
            kernel_version: (5, 15),
            ..probe
        };
        assert!(!modern.is_legacy_kernel());
    }

    #[test]
    fn gpu_gid_scan_skips_root_group_and_dedupes() {
        // Can't fabricate device nodes without root; this instead checks
        // that the fixed roster is what it claims to be (no duplicates,
        // no accidental root-owned well-known path).
        let mut seen = std::collections::HashSet::new();
        for path in GPU_DEVICE_PATHS {
            assert!(seen.insert(*path), "duplicate device path in roster: {path}");
        }
    }
}
