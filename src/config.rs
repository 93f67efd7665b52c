//! The Configuration Record (spec §3). Constructed by an external caller
//! (the demonstration binary's CLI layer here) and immutable afterward.

use std::path::PathBuf;

/// Maximum auxiliary TTYs spec §3 allows in addition to the console.
pub const MAX_TTY_COUNT: u8 = 6;

#[derive(Debug, Clone)]
pub struct Config {
    /// Short identifier used in logs.
    pub container_name: String,
    /// Absolute host path to the guest's root directory, or the resolved
    /// mount point once `rootfs_image` (if set) has been loop-mounted.
    pub rootfs_path: PathBuf,
    /// Optional loop-mountable filesystem image backing `rootfs_path`.
    pub rootfs_image: Option<PathBuf>,
    /// Up to 64 bytes. Empty means inherit the host's hostname.
    pub hostname: String,
    /// Auxiliary TTYs in addition to the console, 0..=6.
    pub tty_count: u8,
    /// Whether the guest init expects `container_ttys` and restrained
    /// namespace manipulation on legacy kernels.
    pub is_systemd: bool,
    /// Grant host devtmpfs and GPU group membership.
    pub hw_access: bool,
    /// Bridge the Termux user-space display sockets.
    pub termux_x11: bool,
    /// Enable IPv6 forwarding on the host.
    pub enable_ipv6: bool,
    /// Directory under which `mounts/<image-stem>/` is created for
    /// loop-mounted images. Implementation-chosen per spec §6; exposed
    /// here so callers can override it instead of hardcoding a constant.
    pub workspace_dir: PathBuf,
}

impl Config {
    /// Clamp an externally supplied tty count to the spec's bound,
    /// logging if clamping occurred. The core never silently accepts an
    /// out-of-range value without telling the caller why it changed.
    pub fn normalized_tty_count(&self) -> u8 {
        if self.tty_count > MAX_TTY_COUNT {
            log::warn!(
                "tty_count {} exceeds max {}, clamping",
                self.tty_count,
                MAX_TTY_COUNT
            );
            MAX_TTY_COUNT
        } else {
            self.tty_count
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> Config {
        Config {
            container_name: "test".into(),
            rootfs_path: PathBuf::from("/tmp/rootfs"),
            rootfs_image: None,
            hostname: "box".into(),
            tty_count: 2,
            is_systemd: false,
            hw_access: false,
            termux_x11: false,
            enable_ipv6: false,
            workspace_dir: PathBuf::from("/tmp/workspace"),
        }
    }

    #[test]
    fn tty_count_within_bound_is_unchanged() {
        let cfg = base_config();
        assert_eq!(cfg.normalized_tty_count(), 2);
    }

    #[test]
    fn tty_count_above_bound_is_clamped() {
        let mut cfg = base_config();
        cfg.tty_count = 9;
        assert_eq!(cfg.normalized_tty_count(), MAX_TTY_COUNT);
    }
}
