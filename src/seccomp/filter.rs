//! Raw-BPF instruction helpers (spec §4.6 Design Notes: a typed DSL over
//! `sock_filter`/`sock_fprog` rather than a libseccomp binding).
//!
//! Grounded in the teacher's `seccomp/seccomp.rs` for the
//! `bpf_stmt`/`bpf_jump`/`sock_filter` shapes, values taken from
//! `linux/filter.h` and `linux/seccomp.h`.

use std::mem;

pub const BPF_LD: u16 = 0x00;
pub const BPF_JMP: u16 = 0x05;
pub const BPF_RET: u16 = 0x06;
pub const BPF_W: u16 = 0x00;
pub const BPF_ABS: u16 = 0x20;
pub const BPF_JA: u16 = 0x00;
pub const BPF_JEQ: u16 = 0x10;
pub const BPF_JSET: u16 = 0x40;
pub const BPF_K: u16 = 0x00;

pub const SECCOMP_RET_KILL: u32 = 0x0000_0000;
pub const SECCOMP_RET_TRAP: u32 = 0x0003_0000;
pub const SECCOMP_RET_ERRNO: u32 = 0x0005_0000;
pub const SECCOMP_RET_ALLOW: u32 = 0x7fff_0000;
pub const SECCOMP_RET_DATA_MASK: u32 = 0x0000_ffff;

#[repr(C)]
#[derive(Copy, Clone)]
pub struct SockFilter {
    pub code: u16,
    pub jt: u8,
    pub jf: u8,
    pub k: u32,
}

#[repr(C)]
pub struct SockFprog {
    pub len: u16,
    pub filter: *const SockFilter,
}

/// Field offsets within the kernel's `struct seccomp_data { nr, arch,
/// instruction_pointer, args[6] }`, used by the `BPF_LD | BPF_ABS`
/// instructions to load architecture/syscall-number/argument words into
/// the BPF accumulator.
///
/// `offsetof(struct seccomp_data, arch)` — `nr` is the first field.
fn offset_of_arch() -> u32 {
    mem::size_of::<i32>() as u32
}

fn offset_of_nr() -> u32 {
    0
}

fn offset_of_arg(index: u8) -> u32 {
    let base = mem::size_of::<i32>() + mem::size_of::<u32>() + mem::size_of::<u64>();
    (base + index as usize * mem::size_of::<u64>()) as u32
}

/// A small append-only assembler for `sock_filter` programs. Every
/// `jeq_or_errno`/`jset_or_errno`-style helper here appends a
/// self-contained instruction group whose own jump targets are computed
/// from the surrounding calls, the same forward-jump-counting style
/// `original_source/android_seccomp.c` uses, just spelled out as named
/// operations instead of raw array literals.
pub struct Program {
    insns: Vec<SockFilter>,
}

impl Program {
    pub fn new() -> Self {
        Program { insns: Vec::new() }
    }

    fn stmt(&mut self, code: u16, k: u32) {
        self.insns.push(SockFilter { code, jt: 0, jf: 0, k });
    }

    fn jump(&mut self, code: u16, k: u32, jt: u8, jf: u8) {
        self.insns.push(SockFilter { code, jt, jf, k });
    }

    pub fn load_arch(&mut self) -> &mut Self {
        self.stmt(BPF_LD | BPF_W | BPF_ABS, offset_of_arch());
        self
    }

    pub fn load_nr(&mut self) -> &mut Self {
        self.stmt(BPF_LD | BPF_W | BPF_ABS, offset_of_nr());
        self
    }

    pub fn load_arg(&mut self, index: u8) -> &mut Self {
        self.stmt(BPF_LD | BPF_W | BPF_ABS, offset_of_arg(index));
        self
    }

    /// Jump `jt` instructions forward if the accumulator equals `k`,
    /// `jf` instructions forward otherwise.
    pub fn jeq(&mut self, k: u32, jt: u8, jf: u8) -> &mut Self {
        self.jump(BPF_JMP | BPF_JEQ | BPF_K, k, jt, jf);
        self
    }

    /// Jump `jt` instructions forward if `accumulator & k != 0`.
    pub fn jset(&mut self, k: u32, jt: u8, jf: u8) -> &mut Self {
        self.jump(BPF_JMP | BPF_JSET | BPF_K, k, jt, jf);
        self
    }

    /// Unconditional jump of `k` instructions.
    pub fn jump_always(&mut self, k: u16) -> &mut Self {
        self.jump(BPF_JMP | BPF_JA, k as u32, 0, 0);
        self
    }

    pub fn allow(&mut self) -> &mut Self {
        self.stmt(BPF_RET | BPF_K, SECCOMP_RET_ALLOW);
        self
    }

    pub fn trap(&mut self) -> &mut Self {
        self.stmt(BPF_RET | BPF_K, SECCOMP_RET_TRAP);
        self
    }

    pub fn errno(&mut self, err: i32) -> &mut Self {
        self.stmt(BPF_RET | BPF_K, SECCOMP_RET_ERRNO | (err as u32 & SECCOMP_RET_DATA_MASK));
        self
    }

    pub fn len(&self) -> usize {
        self.insns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.insns.is_empty()
    }

    /// Install the assembled program via `prctl(PR_SET_SECCOMP, ...)`.
    /// Consumes `self` since a loaded filter can't be meaningfully
    /// mutated afterward.
    pub fn install(self) -> nix::Result<()> {
        let prog = SockFprog {
            len: self.insns.len() as u16,
            filter: self.insns.as_ptr(),
        };
        let res = unsafe {
            libc::prctl(
                libc::PR_SET_SECCOMP,
                libc::SECCOMP_MODE_FILTER,
                &prog as *const SockFprog,
            )
        };
        nix::errno::Errno::result(res).map(drop)
    }
}

impl Default for Program {
    fn default() -> Self {
        Self::new()
    }
}
