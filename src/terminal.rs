//! Terminal Provisioner (spec §4.3): PTY allocation on the host side
//! before namespace entry, and the console/tty wiring that happens after
//! pivot-root.
//!
//! Grounded in `original_source/terminal.c` for exact termios flags and
//! mount-target naming, and in the teacher's `tty.rs` for the
//! `nix::pty::openpty` + `stdio::connect_stdio` idiom.

use std::os::unix::io::{AsRawFd, RawFd};
use std::path::Path;

use anyhow::{Context, Result};
use nix::fcntl::{fcntl, FcntlArg, FdFlag};
use nix::sys::termios::{self, LocalFlags, OutputFlags, SetArg, SpecialCharacterIndices};
use nix::unistd::setsid;

use crate::error::BringupError;
use crate::stdio::{self, FileDescriptor};

/// One allocated pseudo-terminal: the host-side master end (kept open for
/// the life of the container so the orchestrator can pump bytes to/from
/// it) and the slave's device path (used as a bind-mount source).
pub struct Pty {
    pub master: FileDescriptor,
    pub slave_path: String,
}

/// Every PTY provisioned for one container: the console plus up to
/// [`crate::config::MAX_TTY_COUNT`] auxiliary ttys. Owning all of them in
/// one struct lets the orchestrator move the whole set across the
/// clone/pivot-root boundary as a unit (invariant I1).
pub struct TerminalSet {
    pub console: Pty,
    pub ttys: Vec<Pty>,
}

impl TerminalSet {
    /// Allocate the console PTY plus `tty_count` auxiliary PTYs (spec §9
    /// Q2: always named `tty1..tty4` regardless of how many were asked
    /// for — requests for 5 or 6 degrade rather than panic, since the
    /// Mount Builder only ever creates four placeholder mount points).
    pub fn allocate(tty_count: u8) -> Result<Self> {
        let console = allocate_one().context("failed to allocate console pty")?;

        let mut ttys = Vec::new();
        for i in 0..tty_count {
            if i >= 4 {
                crate::error::degraded(
                    "terminal",
                    format!("tty{} requested but only 4 mount points exist, skipping", i + 1),
                );
                break;
            }
            ttys.push(allocate_one().with_context(|| format!("failed to allocate tty{}", i + 1))?);
        }

        Ok(TerminalSet { console, ttys })
    }

    /// `container_ttys` environment value: auxiliary PTY slave pathnames,
    /// space-joined (spec §4.7, §9). Grounded in
    /// `original_source/terminal.c:build_container_ttys_string`, which
    /// concatenates `ttys[i].name` — the `openpty`-returned slave path,
    /// never a synthesized `ttyN` label.
    pub fn container_ttys_env(&self) -> String {
        self.ttys
            .iter()
            .map(|t| t.slave_path.clone())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// The slave-path view handed to the guest side of the clone
    /// boundary. Deliberately excludes the master fds: those stay with
    /// the orchestrator (invariant I1), which is the whole reason this
    /// is a separate, smaller type instead of just cloning `Self`.
    pub fn guest_view(&self) -> GuestTerminals {
        GuestTerminals {
            console_slave: self.console.slave_path.clone(),
            tty_slaves: self.ttys.iter().map(|t| t.slave_path.clone()).collect(),
        }
    }
}

/// Everything the guest process needs from the Terminal Provisioner
/// after `clone_into_namespaces` has split host and guest into separate
/// address spaces. Holds slave device paths only.
pub struct GuestTerminals {
    pub console_slave: String,
    pub tty_slaves: Vec<String>,
}

impl GuestTerminals {
    /// Bind-mount each PTY slave onto its guest-relative target. Must run
    /// after pivot-root, since the targets (`/dev/console`, `/dev/ttyN`)
    /// are guest paths. Grounded in
    /// `original_source/terminal.c:ds_terminal_setup_console` /
    /// `ds_terminal_setup_ttys`.
    pub fn bind_into_guest(&self) -> Result<()> {
        bind_pty(&self.console_slave, Path::new("/dev/console"))
            .map_err(|e| BringupError::Terminal(e.to_string()))?;

        for (i, slave) in self.tty_slaves.iter().enumerate() {
            let target = format!("/dev/tty{}", i + 1);
            if let Err(e) = bind_pty(slave, Path::new(&target)) {
                crate::error::degraded("terminal", format!("{target}: {e}"));
            }
        }
        Ok(())
    }

    /// Drop the current controlling terminal and session, open the now
    /// bind-mounted `/dev/console`, make it the new controlling terminal,
    /// and wire it to stdin/stdout/stderr. Grounded in
    /// `original_source/terminal.c:ds_terminal_make_controlling` /
    /// `ds_terminal_set_stdfds`.
    pub fn make_console_controlling(&self) -> Result<()> {
        setsid().context("setsid failed")?;

        let console_fd = nix::fcntl::open(
            "/dev/console",
            nix::fcntl::OFlag::O_RDWR,
            nix::sys::stat::Mode::empty(),
        )
        .context("failed to open bind-mounted /dev/console")?;

        if unsafe { libc::ioctl(console_fd, libc::TIOCSCTTY as _, 0) } < 0 {
            log::warn!("TIOCSCTTY failed on /dev/console");
        }

        let console = FileDescriptor::from(console_fd);
        stdio::connect_stdio(&console, &console, &console)
            .context("failed to dup console onto stdio")?;
        apply_raw_termios(console_fd);
        Ok(())
    }
}

fn allocate_one() -> Result<Pty> {
    let result = nix::pty::openpty(None, None)?;

    fcntl(result.master, FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC))?;
    fcntl(result.slave, FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC))?;

    let slave_path = nix::unistd::ttyname(result.slave)
        .map(|p| p.to_string_lossy().to_string())
        .unwrap_or_else(|_| format!("/proc/self/fd/{}", result.slave));

    // The slave end is only needed by path for the later bind-mount; the
    // fd itself would otherwise leak into the guest across exec.
    let _ = nix::unistd::close(result.slave);

    Ok(Pty {
        master: FileDescriptor::from(result.master),
        slave_path,
    })
}

fn bind_pty(source: &str, target: &Path) -> Result<()> {
    if !target.exists() {
        crate::utils::write_file(target, "")?;
    }
    nix::mount::mount(
        Some(source),
        target,
        None::<&str>,
        nix::mount::MsFlags::MS_BIND,
        None::<&str>,
    )
    .with_context(|| format!("bind mount {} -> {:?}", source, target))
}

/// Raw mode matching LXC/SSH conventions (spec §4.3). Grounded in
/// `original_source/terminal.c:ds_setup_tios`. Ignored if `fd` is not a
/// tty, since the demo binary may run with redirected stdio in tests.
pub fn apply_raw_termios(fd: RawFd) {
    let mut tios = match termios::tcgetattr(fd) {
        Ok(t) => t,
        Err(_) => return,
    };

    tios.input_flags.insert(termios::InputFlags::IGNPAR);
    tios.input_flags.remove(
        termios::InputFlags::ISTRIP
            | termios::InputFlags::INLCR
            | termios::InputFlags::IGNCR
            | termios::InputFlags::ICRNL
            | termios::InputFlags::IXON
            | termios::InputFlags::IXANY
            | termios::InputFlags::IXOFF,
    );
    tios.local_flags.remove(
        LocalFlags::TOSTOP
            | LocalFlags::ISIG
            | LocalFlags::ICANON
            | LocalFlags::ECHO
            | LocalFlags::ECHOE
            | LocalFlags::ECHOK
            | LocalFlags::ECHONL
            | LocalFlags::IEXTEN,
    );
    tios.output_flags.remove(OutputFlags::ONLCR);
    tios.output_flags.insert(OutputFlags::OPOST);
    tios.control_chars[SpecialCharacterIndices::VMIN as usize] = 1;
    tios.control_chars[SpecialCharacterIndices::VTIME as usize] = 0;

    let _ = termios::tcsetattr(fd, SetArg::TCSAFLUSH, &tios);
}

/// Puts a host fd (normally the orchestrator's own stdin) into raw mode
/// for the duration of the guest session and restores the original
/// settings on drop, so a crashed or killed bring-up never leaves the
/// operator's shell in a broken state.
pub struct RawModeGuard {
    fd: RawFd,
    original: termios::Termios,
}

impl RawModeGuard {
    pub fn engage(fd: RawFd) -> Result<Self> {
        let original = termios::tcgetattr(fd).context("tcgetattr failed")?;
        apply_raw_termios(fd);
        Ok(RawModeGuard { fd, original })
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let _ = termios::tcsetattr(self.fd, SetArg::TCSAFLUSH, &self.original);
    }
}

impl AsRawFd for Pty {
    fn as_raw_fd(&self) -> RawFd {
        self.master.as_raw_fd()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn container_ttys_env_joins_slave_paths_space_separated() {
        let tty1 = allocate_one().unwrap();
        let tty2 = allocate_one().unwrap();
        let expected = format!("{} {}", tty1.slave_path, tty2.slave_path);
        let set = TerminalSet {
            console: allocate_one().unwrap(),
            ttys: vec![tty1, tty2],
        };
        assert_eq!(set.container_ttys_env(), expected);
    }

    #[test]
    fn allocate_beyond_four_degrades_instead_of_failing() {
        let set = TerminalSet::allocate(6).unwrap();
        assert_eq!(set.ttys.len(), 4);
    }
}
