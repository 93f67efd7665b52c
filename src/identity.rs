//! Identity Writer (spec §4.4): hostname, `/etc/hosts`, `/etc/resolv.conf`
//! and the Android paranoid-network group entries. Runs guest-side, after
//! pivot-root.
//!
//! Grounded in `original_source/network.c:fix_networking_rootfs`.

use anyhow::{Context, Result};

use crate::config::Config;
use crate::error::degraded;
use crate::host_probe::HostProbe;
use crate::utils::{grep_file, write_file};

/// Set and persist the guest hostname, write `/etc/hosts` and
/// `/etc/resolv.conf`, and ensure the Android paranoid-network groups
/// exist. An empty `cfg.hostname` skips the hostname syscall and the
/// `/etc/hosts` line B4 says to omit, but resolv.conf and the Android
/// groups are independent of it and always run.
pub fn seal_identity(cfg: &Config, probe: &HostProbe) -> Result<()> {
    if !cfg.hostname.is_empty() {
        if let Err(e) = nix::unistd::sethostname(&cfg.hostname) {
            degraded("identity", format!("sethostname({}) failed: {}", cfg.hostname, e));
        }
        write_file("/etc/hostname", format!("{}\n", cfg.hostname))
            .context("failed to write /etc/hostname")?;
    }

    write_etc_hosts(&cfg.hostname)?;
    write_resolv_conf(probe)?;

    if probe.is_android {
        ensure_android_network_groups();
    }

    Ok(())
}

/// Matches `original_source/network.c`'s exact byte layout: the
/// `127.0.1.1 <hostname>` line is present only when a hostname was
/// actually configured (spec B4).
fn write_etc_hosts(hostname: &str) -> Result<()> {
    let mut content = String::from(
        "127.0.0.1\tlocalhost\n::1\t\tlocalhost ip6-localhost ip6-loopback\n",
    );
    if !hostname.is_empty() {
        content.push_str(&format!("127.0.1.1\t{}\n", hostname));
    }
    write_file("/etc/hosts", content).context("failed to write /etc/hosts")
}

fn write_resolv_conf(probe: &HostProbe) -> Result<()> {
    let content = if probe.dns_secondary.is_empty() {
        format!("nameserver {}\n", probe.dns_primary)
    } else {
        format!(
            "nameserver {}\nnameserver {}\n",
            probe.dns_primary, probe.dns_secondary
        )
    };
    write_file("/etc/resolv.conf", content).context("failed to write /etc/resolv.conf")
}

/// Append `aid_inet`/`aid_net_raw`/`aid_net_admin` to `/etc/group` if an
/// `/etc/group` exists and doesn't already have them — Android's
/// CONFIG_ANDROID_PARANOID_NETWORK gates raw socket/network access on
/// these GIDs. Degradable: a guest without `/etc/group` (a minimal
/// rootfs) just won't get network access as that user.
fn ensure_android_network_groups() {
    let etc_group = "/etc/group";
    if !std::path::Path::new(etc_group).exists() {
        return;
    }
    if grep_file(etc_group, "aid_inet") {
        return;
    }

    let addition = "aid_inet:x:3003:\naid_net_raw:x:3004:\naid_net_admin:x:3005:\n";
    let existing = std::fs::read_to_string(etc_group).unwrap_or_default();
    if let Err(e) = write_file(etc_group, existing + addition) {
        degraded("identity", format!("failed to extend /etc/group: {e}"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hosts_omits_127_0_1_1_line_when_hostname_empty() {
        let mut buf = String::from(
            "127.0.0.1\tlocalhost\n::1\t\tlocalhost ip6-localhost ip6-loopback\n",
        );
        if !"".is_empty() {
            buf.push_str("127.0.1.1\t\n");
        }
        assert!(!buf.contains("127.0.1.1"));
    }

    #[test]
    fn resolv_conf_single_line_without_secondary() {
        let probe = HostProbe {
            is_android: false,
            kernel_version: (5, 10),
            selinux_enforcing: crate::host_probe::SelinuxState::Unavailable,
            gpu_gids: Vec::new(),
            dns_primary: "8.8.8.8".into(),
            dns_secondary: String::new(),
        };
        let content = if probe.dns_secondary.is_empty() {
            format!("nameserver {}\n", probe.dns_primary)
        } else {
            format!("nameserver {}\nnameserver {}\n", probe.dns_primary, probe.dns_secondary)
        };
        assert_eq!(content, "nameserver 8.8.8.8\n");
    }
}
