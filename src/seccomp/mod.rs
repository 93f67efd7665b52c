//! Syscall Filter (spec §4.6): the Android-compatibility seccomp-BPF
//! filter applied to the guest init immediately before exec.
//!
//! Grounded in `original_source/android_seccomp.c`. Reproduces its filter
//! instruction-for-instruction: reboot(2) always traps, the three keyring
//! syscalls always return ENOSYS, and `unshare`/`clone` with a
//! namespace-creation flag set return EPERM only when both the guest
//! expects systemd semantics and the host kernel predates 5.0 (the
//! combination spec §4.6 ties to the kernel 4.14 `grab_super()` deadlock).

mod filter;

use anyhow::Context;

use crate::error::BringupError;
use crate::host_probe::HostProbe;
use crate::namespaces::NAMESPACE_CLONE_MASK;
use filter::Program;

#[cfg(target_arch = "x86_64")]
const AUDIT_ARCH: u32 = 0xC000_003E;
#[cfg(target_arch = "x86")]
const AUDIT_ARCH: u32 = 0x4000_0003;
#[cfg(target_arch = "arm")]
const AUDIT_ARCH: u32 = 0x4000_0028;
#[cfg(target_arch = "aarch64")]
const AUDIT_ARCH: u32 = 0xC000_00B7;

/// Install the Android-compatibility syscall filter for the current
/// process (spec §4.6). Must run as the last step before exec, after
/// every other bring-up operation that might itself need `unshare`,
/// `mount`, or `reboot`.
pub fn install(is_systemd: bool, probe: &HostProbe) -> anyhow::Result<()> {
    log::info!("applying seccomp filter (reboot trap always active)");

    let legacy_namespace_gate = is_systemd && probe.is_legacy_kernel();

    let mut prog = Program::new();

    // [0] Validate architecture: anything unexpected is allowed through
    // unfiltered rather than killed, matching the teacher's posture of
    // preferring a working container over a maximally locked-down one.
    prog.load_arch();
    prog.jeq(AUDIT_ARCH, 1, 0);
    prog.allow();

    // [1] Load syscall number for every subsequent check.
    prog.load_nr();

    // [2] reboot(2) always traps so the orchestrator's supervisor can
    // turn it into an orderly shutdown (spec §4.6, §7 Trapped).
    prog.jeq(libc::SYS_reboot as u32, 0, 1);
    prog.trap();

    // [3] Keyring syscalls always come back ENOSYS — present on Android
    // kernels but commonly unsupported in ways that crash init scripts
    // expecting a resolute ENOSYS rather than EPERM/EACCES.
    for syscall in [libc::SYS_keyctl, libc::SYS_add_key, libc::SYS_request_key] {
        prog.jeq(syscall as u32, 0, 1);
        prog.errno(libc::ENOSYS);
    }

    // [4] Namespace gate. Skipped entirely unless systemd + legacy
    // kernel; 5 instructions follow below (count kept in sync with the
    // `jump_always` arg: JEQ unshare, JEQ clone, LD args[0], JSET, ERRNO).
    prog.jump_always(if legacy_namespace_gate { 0 } else { 5 });

    prog.jeq(libc::SYS_unshare as u32, 1, 0);
    prog.jeq(libc::SYS_clone as u32, 0, 3);
    prog.load_arg(0);
    prog.jset(NAMESPACE_CLONE_MASK as u32, 0, 1);
    prog.errno(libc::EPERM);

    // [5] Default: allow.
    prog.allow();

    prog.install()
        .map_err(|e| BringupError::Seccomp(e.to_string()))
        .context("prctl(PR_SET_SECCOMP) failed")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_kernel_and_systemd_enables_namespace_gate() {
        let probe = HostProbe {
            is_android: false,
            kernel_version: (4, 14),
            selinux_enforcing: crate::host_probe::SelinuxState::Unavailable,
            gpu_gids: Vec::new(),
            dns_primary: String::new(),
            dns_secondary: String::new(),
        };
        assert!(probe.is_legacy_kernel());
    }
}
