//! Small filesystem helpers shared across components.

use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};

/// Write `contents` to `path`, replacing it entirely.
pub fn write_file<P: AsRef<Path>, C: AsRef<[u8]>>(path: P, contents: C) -> Result<()> {
    let path = path.as_ref();
    fs::write(path, contents).with_context(|| format!("failed to write to {:?}", path))
}

/// `true` if `haystack` contains `needle` as a substring on any line —
/// used for the `/proc/mounts` cgroup2 scan (spec §4.2) and the
/// `/etc/group` `aid_inet` presence check (spec §4.4).
pub fn grep_file<P: AsRef<Path>>(path: P, needle: &str) -> bool {
    fs::read_to_string(path)
        .map(|content| content.contains(needle))
        .unwrap_or(false)
}

pub fn read_trimmed<P: AsRef<Path>>(path: P) -> Result<String> {
    let path = path.as_ref();
    let content =
        fs::read_to_string(path).with_context(|| format!("failed to read {:?}", path))?;
    Ok(content.trim().to_string())
}

pub fn create_dir_all<P: AsRef<Path>>(path: P) -> Result<()> {
    let path = path.as_ref();
    fs::create_dir_all(path).with_context(|| format!("failed to create directory {:?}", path))
}

/// rmdir, succeeding only when the directory is empty — used so that
/// loop-mount teardown (spec §8, scenario 5) can tell "nested bind-mounts
/// still present" apart from "cleanly detached".
pub fn rmdir_if_empty<P: AsRef<Path>>(path: P) -> Result<()> {
    let path = path.as_ref();
    match fs::remove_dir(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => bail!("failed to remove {:?}: {}", path, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grep_file_matches_substring() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mounts");
        write_file(&path, "cgroup2 /sys/fs/cgroup cgroup2 rw 0 0\n").unwrap();
        assert!(grep_file(&path, "cgroup2"));
        assert!(!grep_file(&path, "btrfs"));
    }

    #[test]
    fn grep_file_missing_file_is_false() {
        assert!(!grep_file("/nonexistent/path/for/test", "anything"));
    }
}
