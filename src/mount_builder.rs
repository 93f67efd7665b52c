//! Mount Builder (spec §4.2): rootfs image attachment and the guest
//! filesystem skeleton (`/dev`, `/dev/pts`, `/proc`, `/sys`,
//! `/sys/fs/cgroup`).
//!
//! Grounded in `original_source/mount.c` for exact mount flags/options and
//! in the teacher's `rootfs/rootfs.rs` / `syscall/linux.rs` for the
//! nix-idiomatic wrapping of `mount(2)`/`mknod(2)`.

use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Context, Result};
use nix::mount::MsFlags;
use nix::sys::stat::{mknod, Mode, SFlag};

use crate::config::Config;
use crate::error::{is_idempotent, BringupError};
use crate::utils::{create_dir_all, grep_file, write_file};

/// Minimal device roster mounted into an isolated (non hw-access) `/dev`
/// (spec §4.2). `(name, major, minor, mode)`.
const CHAR_DEVICES: &[(&str, u32, u32, u32)] = &[
    ("null", 1, 3, 0o666),
    ("zero", 1, 5, 0o666),
    ("full", 1, 7, 0o666),
    ("random", 1, 8, 0o666),
    ("urandom", 1, 9, 0o666),
    ("tty", 5, 0, 0o666),
    ("console", 5, 1, 0o600),
    ("ptmx", 5, 2, 0o666),
];

/// Placeholder regular-file mount points for the fixed four PTY slots
/// (spec §9 Q2): always created regardless of `tty_count`, so later
/// terminal provisioning has somewhere to bind-mount even when fewer
/// ttys were requested.
const TTY_PLACEHOLDERS: &[&str] = &["tty1", "tty2", "tty3", "tty4"];

const CGROUP_V1_CONTROLLERS: &[&str] = &[
    "cpu", "cpuacct", "devices", "memory", "freezer", "blkio", "pids", "systemd",
];

/// Loop-mount `cfg.rootfs_image` (if set) under
/// `<workspace_dir>/mounts/<image-stem>/` and return the resolved rootfs
/// path to use for the rest of bring-up. Grounded in
/// `original_source/mount.c:mount_rootfs_img`. Fatal on mount failure —
/// there is nothing to boot without a rootfs.
pub fn attach_rootfs_image(cfg: &Config) -> Result<PathBuf> {
    let image = match &cfg.rootfs_image {
        Some(image) => image,
        None => return Ok(cfg.rootfs_path.clone()),
    };

    let mounts_dir = cfg.workspace_dir.join("mounts");
    create_dir_all(&mounts_dir)?;

    let stem = image
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "image".to_string());
    let mount_point = mounts_dir.join(stem);
    create_dir_all(&mount_point)?;

    log::info!("mounting rootfs image {:?} on {:?}", image, mount_point);

    match Command::new("e2fsck").arg("-f").arg("-y").arg(image).status() {
        Ok(status) if status.success() => log::debug!("image checked and repaired successfully"),
        _ => log::debug!("e2fsck unavailable or reported issues, continuing"),
    }

    let status = Command::new("mount")
        .arg("-v")
        .arg("-o")
        .arg("loop")
        .arg(image)
        .arg(&mount_point)
        .status()
        .with_context(|| "failed to spawn mount(8) for rootfs image")?;
    if !status.success() {
        return Err(BringupError::Mount(format!("loop-mount of {:?} failed", image)).into());
    }

    Ok(mount_point)
}

/// Lazily unmount the loop-mounted rootfs image and rmdir its (now empty)
/// mount point (spec §5 rollback). Best-effort: rollback failures are
/// logged, never propagated, since by this point bring-up has already
/// failed for an unrelated reason.
pub fn detach_rootfs_image(mount_point: &Path) {
    if !mount_point.exists() {
        return;
    }
    log::info!("unmounting rootfs image from {:?}", mount_point);

    if nix::mount::umount2(mount_point, nix::mount::MntFlags::MNT_DETACH).is_err() {
        let _ = Command::new("umount").arg("-l").arg(mount_point).status();
    }
    let _ = crate::utils::rmdir_if_empty(mount_point);
}

/// `mount(2)` that treats `EBUSY`/`EEXIST` as already-satisfied rather
/// than an error (spec §7, Silent-idempotent), matching
/// `original_source/mount.c:domount`.
fn domount(
    source: Option<&str>,
    target: &Path,
    fstype: Option<&str>,
    flags: MsFlags,
    data: Option<&str>,
) -> Result<()> {
    match nix::mount::mount(source, target, fstype, flags, data) {
        Ok(()) => Ok(()),
        Err(e) if is_idempotent(e) => Ok(()),
        Err(e) => Err(BringupError::Mount(format!(
            "{:?} on {:?} ({:?}): {}",
            source, target, fstype, e
        ))
        .into()),
    }
}

/// Bind-mount `source` onto `target`, creating `target` first if it is
/// missing — a directory if `source` is a directory, an empty file
/// otherwise. Grounded in `original_source/mount.c:bind_mount`.
fn bind_mount(source: &Path, target: &Path) -> Result<()> {
    let src_meta = std::fs::metadata(source)
        .with_context(|| format!("bind-mount source {:?} does not exist", source))?;

    if !target.exists() {
        if src_meta.is_dir() {
            create_dir_all(target)?;
        } else {
            write_file(target, "")?;
        }
    }

    domount(
        Some(&source.to_string_lossy()),
        target,
        None,
        MsFlags::MS_BIND | MsFlags::MS_REC,
        None,
    )
}

/// Build `<rootfs>/dev`: either the host's devtmpfs bind (hw_access) or
/// an isolated tmpfs with a minimal device roster (spec §4.2).
pub fn setup_dev(rootfs: &Path, hw_access: bool) -> Result<()> {
    let dev_path = rootfs.join("dev");
    create_dir_all(&dev_path)?;

    if hw_access {
        log::warn!("hw_access enabled: mounting host devtmpfs, this grants full hardware access");
        return domount(
            Some("devtmpfs"),
            &dev_path,
            Some("devtmpfs"),
            MsFlags::MS_NOSUID | MsFlags::MS_NOEXEC,
            None,
        );
    }

    domount(
        Some("none"),
        &dev_path,
        Some("tmpfs"),
        MsFlags::MS_NOSUID | MsFlags::MS_NOEXEC,
        Some("size=4M,mode=755"),
    )?;
    create_devices(&dev_path)
}

/// Populate an isolated `/dev` with the minimal device roster, falling
/// back to a host bind-mount when `mknod` is refused (e.g. under a
/// restrictive seccomp/LSM on the host), and the fixed tty1..tty4
/// placeholder files. Grounded in
/// `original_source/mount.c:create_devices`.
/// Glibc's `makedev(3)` bit layout, reproduced locally the way the
/// teacher does (`rootfs/rootfs.rs::mknod_dev`) rather than depending on
/// a libc-specific export.
fn makedev(major: i64, minor: i64) -> u64 {
    ((minor & 0xff) | ((major & 0xfff) << 8) | ((minor & !0xff) << 12) | ((major & !0xfff) << 32))
        as u64
}

fn create_devices(dev_path: &Path) -> Result<()> {
    for (name, major, minor, mode) in CHAR_DEVICES {
        let path = dev_path.join(name);
        let dev = makedev(*major as i64, *minor as i64);
        let result = mknod(
            &path,
            SFlag::S_IFCHR,
            Mode::from_bits_truncate(*mode),
            dev,
        );
        match result {
            Ok(()) => {}
            Err(nix::Error::EEXIST) => {}
            Err(_) => {
                let host_path = PathBuf::from("/dev").join(name);
                if let Err(e) = bind_mount(&host_path, &path) {
                    crate::error::degraded("mount_builder", format!("could not provide /dev/{name}: {e}"));
                }
            }
        }
    }

    for name in TTY_PLACEHOLDERS {
        let path = dev_path.join(name);
        if !path.exists() {
            write_file(&path, "")?;
        }
    }

    let fd_targets: &[(&str, &str)] = &[
        ("fd", "/proc/self/fd"),
        ("stdin", "/proc/self/fd/0"),
        ("stdout", "/proc/self/fd/1"),
        ("stderr", "/proc/self/fd/2"),
    ];
    for (name, target) in fd_targets {
        let link = dev_path.join(name);
        if std::os::unix::fs::symlink(target, &link).is_err() {
            log::debug!("symlink /dev/{name} -> {target} already present or failed");
        }
    }

    Ok(())
}

/// Mount a private PTY namespace at `<rootfs>/dev/pts` (spec §4.2).
/// Grounded in `original_source/mount.c:setup_devpts`.
pub fn setup_devpts(rootfs: &Path) -> Result<()> {
    let pts_path = rootfs.join("dev/pts");
    create_dir_all(&pts_path)?;
    domount(
        Some("devpts"),
        &pts_path,
        Some("devpts"),
        MsFlags::MS_NOSUID | MsFlags::MS_NOEXEC,
        Some("newinstance,ptmxmode=0666,mode=0620,gid=5"),
    )
}

/// Mount `/proc` and `/sys`, remounting `/data` with `suid` on Android
/// when the rootfs is stored there (spec §4.2). Must run after
/// pivot-root, so paths here are guest-relative (no `rootfs` prefix).
pub fn setup_proc_sys(probe: &crate::host_probe::HostProbe) -> Result<()> {
    create_dir_all("/proc")?;
    domount(Some("proc"), Path::new("/proc"), Some("proc"), MsFlags::empty(), None)?;

    create_dir_all("/sys")?;
    domount(
        Some("sysfs"),
        Path::new("/sys"),
        Some("sysfs"),
        MsFlags::MS_NOSUID | MsFlags::MS_NOEXEC | MsFlags::MS_NODEV,
        None,
    )?;

    crate::network::remount_data_suid(probe);

    Ok(())
}

/// Mount `/sys/fs/cgroup`, preferring the unified (v2) hierarchy and
/// falling back to the per-controller v1 layout (spec §4.2). Grounded in
/// `original_source/mount.c:setup_cgroups`.
pub fn setup_cgroups() -> Result<()> {
    let cgroup_root = Path::new("/sys/fs/cgroup");
    create_dir_all(cgroup_root)?;

    let is_v2 = cgroup_root.join("cgroup.controllers").exists()
        || grep_file("/proc/mounts", "cgroup2");

    if is_v2 {
        return domount(
            Some("cgroup2"),
            cgroup_root,
            Some("cgroup2"),
            MsFlags::MS_NOSUID | MsFlags::MS_NODEV | MsFlags::MS_NOEXEC,
            None,
        );
    }

    domount(
        Some("none"),
        cgroup_root,
        Some("tmpfs"),
        MsFlags::MS_NOSUID | MsFlags::MS_NODEV | MsFlags::MS_NOEXEC,
        Some("mode=755"),
    )?;

    for controller in CGROUP_V1_CONTROLLERS {
        let path = cgroup_root.join(controller);
        create_dir_all(&path)?;
        if let Err(e) = domount(
            Some("cgroup"),
            &path,
            Some("cgroup"),
            MsFlags::MS_NOSUID | MsFlags::MS_NODEV | MsFlags::MS_NOEXEC,
            Some(controller),
        ) {
            crate::error::degraded("mount_builder", format!("cgroup v1 controller {controller}: {e}"));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attach_rootfs_image_is_noop_without_image() {
        let cfg = Config {
            container_name: "t".into(),
            rootfs_path: PathBuf::from("/tmp/some-rootfs"),
            rootfs_image: None,
            hostname: String::new(),
            tty_count: 0,
            is_systemd: false,
            hw_access: false,
            termux_x11: false,
            enable_ipv6: false,
            workspace_dir: PathBuf::from("/tmp/workspace"),
        };
        let resolved = attach_rootfs_image(&cfg).unwrap();
        assert_eq!(resolved, cfg.rootfs_path);
    }

    #[test]
    fn detach_rootfs_image_on_missing_dir_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("does-not-exist");
        detach_rootfs_image(&missing);
    }
}
