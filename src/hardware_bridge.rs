//! Hardware Bridge (spec §4.5): GPU group reconciliation and X11/Termux
//! socket bridging. Runs guest-side, after pivot-root. Every operation
//! here is non-fatal (spec §7, Degradable) — a container without GPU
//! access or GUI sockets still boots.
//!
//! Grounded in `original_source/hardware.c`.

use std::fs;
use std::os::unix::fs::MetadataExt;
use std::path::Path;
use std::process::Command;

use anyhow::{Context, Result};

use crate::config::Config;
use crate::error::degraded;
use crate::host_probe::HostProbe;

const DESKTOP_X11_SOURCE: &str = "/tmp/.X11-unix";
const CONTAINER_X11_DIR: &str = "/tmp/.X11-unix";
const TERMUX_DATA_DIR: &str = "/data/data/com.termux";
const TERMUX_UNIFIED_TMP: &str = "/data/data/com.termux/files/usr/tmp";

/// Entry point called after pivot-root when `hw_access` or `termux_x11`
/// was requested (spec §4.5). Mirrors
/// `original_source/hardware.c:setup_hardware_access`'s gating exactly:
/// GPU groups only under `hw_access`, X11/VirGL bridging under either.
pub fn setup_hardware_access(cfg: &Config, probe: &HostProbe) {
    if !cfg.hw_access && !cfg.termux_x11 {
        return;
    }

    if cfg.hw_access {
        if let Err(e) = reconcile_gpu_groups(&probe.gpu_gids) {
            degraded("hardware_bridge", e);
        }
    }

    if cfg.hw_access || cfg.termux_x11 {
        setup_x11_and_virgl_sockets(probe);
    }
}

/// Add `root` to every group matching a host GPU GID, creating
/// `gpu_<gid>` groups for GIDs with no existing match. Atomic
/// replacement via rename (invariant I4). Grounded in
/// `original_source/hardware.c:setup_gpu_groups`.
pub fn reconcile_gpu_groups(gpu_gids: &[u32]) -> Result<()> {
    if gpu_gids.is_empty() {
        return Ok(());
    }

    let group_path = Path::new("/etc/group");
    if !group_path.exists() {
        log::warn!("no /etc/group found, skipping GPU group setup");
        return Ok(());
    }

    let original = fs::read_to_string(group_path).context("failed to read /etc/group")?;
    let mut found = vec![false; gpu_gids.len()];
    let mut modified = 0usize;
    let mut out_lines: Vec<String> = Vec::new();

    for line in original.lines() {
        let mut fields = line.splitn(4, ':');
        let name = fields.next();
        let _password = fields.next();
        let gid_str = fields.next();
        let users = fields.next();

        let parsed = match (name, gid_str, users) {
            (Some(name), Some(gid_str), Some(users)) => {
                gid_str.parse::<u32>().ok().map(|gid| (name, gid, users))
            }
            _ => None,
        };

        match parsed {
            Some((name, gid, users)) => match gpu_gids.iter().position(|&g| g == gid) {
                Some(idx) => {
                    found[idx] = true;
                    if has_user(users, "root") {
                        out_lines.push(line.to_string());
                    } else {
                        let new_users = if users.is_empty() {
                            "root".to_string()
                        } else {
                            format!("{users},root")
                        };
                        out_lines.push(format!("{name}:x:{gid}:{new_users}"));
                        log::info!("added root to existing group '{name}' (GID {gid})");
                        modified += 1;
                    }
                }
                None => out_lines.push(line.to_string()),
            },
            None => out_lines.push(line.to_string()),
        }
    }

    for (idx, gid) in gpu_gids.iter().enumerate() {
        if !found[idx] {
            out_lines.push(format!("gpu_{gid}:x:{gid}:root"));
            log::info!("created new GPU group gpu_{gid} (GID {gid})");
            modified += 1;
        }
    }

    if modified == 0 {
        return Ok(());
    }

    let tmp_path = Path::new("/etc/group.tmp");
    let mut content = out_lines.join("\n");
    content.push('\n');
    fs::write(tmp_path, content).context("failed to write /etc/group.tmp")?;
    fs::rename(tmp_path, group_path).context("failed to finalize /etc/group")?;
    log::info!("finalized GPU group membership ({modified} entry/entries updated)");
    Ok(())
}

/// Whole-word membership check matching
/// `original_source/hardware.c:has_user`'s comma-delimited scan exactly
/// (a substring match alone would wrongly match e.g. "nonroot").
fn has_user(users: &str, username: &str) -> bool {
    users.split(',').any(|u| u == username)
}

fn setup_x11_and_virgl_sockets(probe: &HostProbe) {
    if !probe.is_android {
        setup_desktop_x11();
        return;
    }
    bridge_termux_tmp();
}

/// Bind-mount only the `.X11-unix` socket directory, never the whole
/// `/tmp` (spec §4.5: binding all of `/tmp` on an encrypted Android
/// device can deadlock on an unavailable FBE keyring, though that
/// specific failure mode is Android-only — this path is desktop-only).
fn setup_desktop_x11() {
    if !Path::new(DESKTOP_X11_SOURCE).exists() {
        log::warn!("X11 support skipped: no host X11 socket detected");
        return;
    }
    log::info!("found desktop X11 socket at {DESKTOP_X11_SOURCE}");

    if let Err(e) = crate::utils::create_dir_all(CONTAINER_X11_DIR) {
        degraded("hardware_bridge", e);
        return;
    }

    let result = nix::mount::mount(
        Some(DESKTOP_X11_SOURCE),
        CONTAINER_X11_DIR,
        None::<&str>,
        nix::mount::MsFlags::MS_BIND | nix::mount::MsFlags::MS_REC,
        None::<&str>,
    );
    match result {
        Ok(()) => log::info!("X11 socket directory bind-mounted successfully"),
        Err(e) => degraded("hardware_bridge", format!("failed to bind mount X11 socket: {e}")),
    }
}

/// Stop Termux first (spec §4.5: a running Termux can hold `/tmp` busy
/// and block the unified-tmpfs mount), set up the unified tmpfs at
/// Termux's tmp directory, then bridge it into the container's `/tmp`.
/// Grounded in `original_source/hardware.c:setup_x11_and_virgl_sockets`'s
/// Android branch plus `setup_unified_tmpfs`.
fn bridge_termux_tmp() {
    if !Path::new(TERMUX_DATA_DIR).exists() {
        log::warn!("Termux not installed - X11/VirGL socket bridge unavailable");
        return;
    }

    stop_termux_if_running();

    if let Err(e) = setup_unified_termux_tmpfs() {
        degraded("hardware_bridge", e);
        return;
    }

    if let Err(e) = crate::utils::create_dir_all("/tmp") {
        degraded("hardware_bridge", e);
        return;
    }

    log::info!("bridging Termux and container for X11/VirGL sockets");
    let result = nix::mount::mount(
        Some(TERMUX_UNIFIED_TMP),
        "/tmp",
        None::<&str>,
        nix::mount::MsFlags::MS_BIND,
        None::<&str>,
    );
    if let Err(e) = result {
        degraded("hardware_bridge", format!("failed to bridge /tmp sockets: {e}"));
        return;
    }
    use std::os::unix::fs::PermissionsExt;
    let _ = fs::set_permissions("/tmp", fs::Permissions::from_mode(0o1777));
}

fn stop_termux_if_running() {
    let running = Command::new("pidof")
        .arg("com.termux")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false);
    if !running {
        return;
    }

    log::info!("stopping Termux to prepare unified /tmp");
    let stopped = Command::new("am")
        .args(["force-stop", "com.termux"])
        .status()
        .map(|s| s.success())
        .unwrap_or(false);
    if !stopped {
        let _ = Command::new("pkill").args(["-9", "com.termux"]).status();
    }
    std::thread::sleep(std::time::Duration::from_millis(500));
}

/// Create or refresh a unified tmpfs at Termux's tmp directory, preserving
/// the owning UID/GID and SELinux context of `/data/data/com.termux` so
/// Termux's own sandboxing keeps working (supplemental,
/// `original_source/hardware.c:setup_unified_tmpfs`). If a tmpfs is
/// already mounted there, only ownership/permissions are reasserted —
/// the mount itself is left alone. Falls back to a generic app-data
/// context when the host context can't be read — never fatal.
pub fn setup_unified_termux_tmpfs() -> Result<()> {
    let owner = match fs::metadata(TERMUX_DATA_DIR) {
        Ok(meta) => meta,
        Err(_) => return Ok(()),
    };
    let uid = nix::unistd::Uid::from_raw(owner.uid());
    let gid = nix::unistd::Gid::from_raw(owner.gid());

    crate::utils::create_dir_all(TERMUX_UNIFIED_TMP)?;

    use std::os::unix::fs::PermissionsExt;
    if nix::sys::statfs::statfs(TERMUX_UNIFIED_TMP)
        .map(|s| s.filesystem_type() == nix::sys::statfs::TMPFS_MAGIC)
        .unwrap_or(false)
    {
        let _ = nix::unistd::chown(TERMUX_UNIFIED_TMP, Some(uid), Some(gid));
        let _ = fs::set_permissions(TERMUX_UNIFIED_TMP, fs::Permissions::from_mode(0o1777));
        return Ok(());
    }

    let context = xattr::get(TERMUX_DATA_DIR, "security.selinux")
        .ok()
        .flatten()
        .unwrap_or_else(|| b"u:object_r:app_data_file:s0".to_vec());

    let mount_opts = format!("size=256M,mode=1777,uid={},gid={}", owner.uid(), owner.gid());
    let result = nix::mount::mount(
        Some("tmpfs"),
        TERMUX_UNIFIED_TMP,
        Some("tmpfs"),
        nix::mount::MsFlags::MS_NOSUID | nix::mount::MsFlags::MS_NODEV,
        Some(mount_opts.as_str()),
    );
    if let Err(e) = result {
        degraded("hardware_bridge", format!("failed to create unified /tmp: {e}"));
        return Ok(());
    }

    if let Err(e) = xattr::set(TERMUX_UNIFIED_TMP, "security.selinux", &context) {
        degraded("hardware_bridge", format!("failed to apply SELinux context to unified /tmp: {e}"));
    }
    Ok(())
}

/// Lazily unmount the unified Termux tmpfs (rollback / shutdown path).
pub fn cleanup_unified_termux_tmpfs() {
    let _ = nix::mount::umount2(TERMUX_UNIFIED_TMP, nix::mount::MntFlags::MNT_DETACH);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn has_user_matches_whole_word_only() {
        assert!(has_user("alice,root,bob", "root"));
        assert!(has_user("root", "root"));
        assert!(!has_user("nonroot,alice", "root"));
        assert!(!has_user("", "root"));
    }

    #[test]
    fn reconcile_gpu_groups_noop_on_empty_gids() {
        assert!(reconcile_gpu_groups(&[]).is_ok());
    }
}
