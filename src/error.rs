//! The §7 error taxonomy given types instead of just documentation.
//!
//! Fatal-bring-up failures propagate as `anyhow::Error` wrapping a
//! `BringupError` variant the orchestrator can match on to decide whether
//! rollback applies. Degradable failures never reach this type — they are
//! absorbed at the call site via [`degraded`] and turned into a log line.

use std::fmt;

/// A failure that aborts the bring-up pipeline (spec §7, "Fatal-bring-up").
#[derive(Debug, thiserror::Error)]
pub enum BringupError {
    #[error("mount ordering failed: {0}")]
    Mount(String),
    #[error("pty allocation failed: {0}")]
    Terminal(String),
    #[error("pivot_root failed: {0}")]
    PivotRoot(String),
    #[error("seccomp filter install failed: {0}")]
    Seccomp(String),
}

/// Log a recoverable ("Degradable", spec §7) failure and continue. The
/// pipeline proceeds with a safe fallback; nothing is returned because
/// there is nothing left for the caller to decide.
pub fn degraded(component: &str, detail: impl fmt::Display) {
    log::warn!("{component}: {detail}, continuing with fallback");
}

/// True if `err` is the kernel telling us a mount/mkdir is already in
/// place (spec §7, "Silent-idempotent") rather than a real failure.
pub fn is_idempotent(err: nix::Error) -> bool {
    matches!(err, nix::Error::EBUSY | nix::Error::EEXIST)
}
