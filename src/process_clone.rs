//! Guest-process creation (spec §5: "the guest is created directly inside
//! its namespaces, not fork()-ed and then unshared").
//!
//! Ported near-verbatim from the teacher's `process::fork::clone` — using
//! `clone(2)` directly lets the guest init enter NEWNS/NEWUTS/NEWPID/NEWIPC
//! atomically, in one syscall, rather than the two-step fork-then-unshare
//! dance (which leaves a window where the child is in the parent's PID
//! namespace and can observe/be observed by host processes).

use std::mem;
use std::ptr;

use anyhow::{Context, Result};
use libc::{c_int, c_void};
use nix::errno::Errno;
use nix::sched::{self, CloneFlags};
use nix::sys::mman;
use nix::unistd::Pid;

/// Run `cb` as a new process inside `clone_flags`' namespaces. The
/// callback runs on a freshly mmap'd, guard-paged stack; its return value
/// becomes the child's exit code.
pub fn clone_into_namespaces(mut cb: sched::CloneCb, clone_flags: CloneFlags) -> Result<Pid> {
    extern "C" fn callback(data: *mut sched::CloneCb) -> c_int {
        let cb: &mut sched::CloneCb = unsafe { &mut *data };
        (*cb)() as c_int
    }

    let page_size: usize = unsafe {
        match libc::sysconf(libc::_SC_PAGE_SIZE) {
            -1 => 4 * 1024,
            x => x as usize,
        }
    };

    let mut rlimit = libc::rlimit {
        rlim_cur: 0,
        rlim_max: 0,
    };
    unsafe { Errno::result(libc::getrlimit(libc::RLIMIT_STACK, &mut rlimit))? };
    let default_stack_size = rlimit.rlim_cur as usize;

    // mmap reserves address space up front; physical pages are faulted in
    // as the stack actually grows, so the full rlimit is cheap to request.
    let child_stack = unsafe {
        mman::mmap(
            ptr::null_mut(),
            default_stack_size,
            mman::ProtFlags::PROT_READ | mman::ProtFlags::PROT_WRITE,
            mman::MapFlags::MAP_PRIVATE | mman::MapFlags::MAP_ANONYMOUS | mman::MapFlags::MAP_STACK,
            -1,
            0,
        )?
    };

    let signal = nix::sys::signal::Signal::SIGCHLD;
    let combined = clone_flags.bits() | signal as c_int;
    let res = unsafe {
        // Stack grows down for clone(2); the guard page sits at the
        // lowest address to catch overflow before it corrupts neighboring
        // mappings.
        mman::mprotect(child_stack, page_size, mman::ProtFlags::PROT_NONE)
            .with_context(|| "failed to create guard page for guest stack")?;

        let child_stack_top = child_stack.add(default_stack_size);

        libc::clone(
            mem::transmute(callback as extern "C" fn(*mut Box<dyn FnMut() -> isize>) -> i32),
            child_stack_top,
            combined,
            &mut cb as *mut _ as *mut c_void,
        )
    };
    let pid = Errno::result(res).map(Pid::from_raw)?;

    Ok(pid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;
    use nix::unistd;

    #[test]
    fn clone_enters_new_pid_namespace() -> Result<()> {
        let flags = CloneFlags::CLONE_NEWPID | CloneFlags::CLONE_NEWUSER;
        let pid = clone_into_namespaces(
            Box::new(|| {
                if unistd::getpid() != Pid::from_raw(1) {
                    return -1;
                }
                0
            }),
            flags,
        )?;

        let status = nix::sys::wait::waitpid(pid, None)?;
        if let nix::sys::wait::WaitStatus::Exited(_, code) = status {
            assert_eq!(0, code);
            return Ok(());
        }
        bail!("child did not exit cleanly")
    }

    #[test]
    fn clone_stack_survives_local_allocation() -> Result<()> {
        let pid = clone_into_namespaces(
            Box::new(|| {
                let mut buf = [0u8; 4096];
                buf.iter_mut().for_each(|b| *b = 0);
                0
            }),
            CloneFlags::empty(),
        )?;

        let status = nix::sys::wait::waitpid(pid, None)?;
        if let nix::sys::wait::WaitStatus::Exited(_, code) = status {
            assert_eq!(0, code);
            return Ok(());
        }
        bail!("child did not exit cleanly")
    }
}
