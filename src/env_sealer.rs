//! Environment Sealer (spec §4.7): scrub-and-default the guest process
//! environment, then layer in `/etc/environment` and the boot-time
//! extras (`container_ttys`, `LANG`). Runs guest-side, immediately before
//! exec.
//!
//! Grounded in `original_source/environment.c`.

use std::env;
use std::fs;
use std::path::Path;

const DEFAULT_PATH: &str = "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";
const DEFAULT_TERM: &str = "xterm-256color";

/// Clear the inherited environment and set the minimal container
/// defaults, preserving the caller's `TERM` if one was set. Grounded in
/// `original_source/environment.c:setup_container_env`.
pub fn scrub_and_default() {
    let term = env::var("TERM").unwrap_or_else(|_| DEFAULT_TERM.to_string());

    for (key, _) in env::vars() {
        env::remove_var(key);
    }

    set_container_defaults(&term);
}

fn set_container_defaults(term: &str) {
    env::set_var("PATH", DEFAULT_PATH);
    env::set_var("TERM", term);
    env::set_var("HOME", "/root");
    env::set_var("container", "droidspaces");
}

/// Merge `/etc/environment` into the process environment (spec §4.7,
/// Q3: quotes are stripped only when they match front and back; no
/// escape processing). No-op if the file doesn't exist.
pub fn merge_etc_environment() {
    merge_environment_file(Path::new("/etc/environment"))
}

fn merge_environment_file(path: &Path) {
    let content = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(_) => return,
    };

    for line in content.lines() {
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        env::set_var(key, strip_matched_quotes(value));
    }
}

fn strip_matched_quotes(value: &str) -> &str {
    let bytes = value.as_bytes();
    if bytes.len() >= 2
        && ((bytes[0] == b'"' && bytes[bytes.len() - 1] == b'"')
            || (bytes[0] == b'\'' && bytes[bytes.len() - 1] == b'\''))
    {
        &value[1..value.len() - 1]
    } else {
        value
    }
}

/// Set `container_ttys` (only if at least one aux tty was provisioned)
/// and default `LANG` if unset. Grounded in
/// `original_source/environment.c:ds_env_boot_setup`.
pub fn apply_boot_extras(container_ttys: &str) {
    if !container_ttys.is_empty() {
        env::set_var("container_ttys", container_ttys);
    }
    if env::var_os("LANG").is_none() {
        env::set_var("LANG", "en_US.UTF-8");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn strip_matched_double_quotes() {
        assert_eq!(strip_matched_quotes("\"hello\""), "hello");
    }

    #[test]
    fn strip_matched_single_quotes() {
        assert_eq!(strip_matched_quotes("'hello'"), "hello");
    }

    #[test]
    fn mismatched_quotes_are_left_alone() {
        assert_eq!(strip_matched_quotes("\"hello'"), "\"hello'");
        assert_eq!(strip_matched_quotes("hello"), "hello");
    }

    #[test]
    fn single_char_value_is_left_alone() {
        assert_eq!(strip_matched_quotes("\""), "\"");
    }

    // The rest of this module mutates the real process environment, so
    // these run serially to avoid clobbering each other (same reason the
    // teacher guards fd/process-global state tests with `#[serial]`).

    #[test]
    #[serial]
    fn scrub_and_default_preserves_term_and_clears_everything_else() {
        env::set_var("TERM", "vt100");
        env::set_var("SOME_LEAKED_HOST_VAR", "leaked");

        scrub_and_default();

        assert_eq!(env::var("TERM").unwrap(), "vt100");
        assert_eq!(env::var("PATH").unwrap(), DEFAULT_PATH);
        assert_eq!(env::var("HOME").unwrap(), "/root");
        assert_eq!(env::var("container").unwrap(), "droidspaces");
        assert!(env::var("SOME_LEAKED_HOST_VAR").is_err());
    }

    #[test]
    #[serial]
    fn scrub_and_default_falls_back_to_default_term_when_unset() {
        env::remove_var("TERM");

        scrub_and_default();

        assert_eq!(env::var("TERM").unwrap(), DEFAULT_TERM);
    }

    #[test]
    #[serial]
    fn merge_environment_file_sets_vars_and_strips_matched_quotes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("environment");
        fs::write(&path, "FOO=\"bar\"\n# a comment\n\nBAZ=qux\n").unwrap();
        env::remove_var("FOO");
        env::remove_var("BAZ");

        merge_environment_file(&path);

        assert_eq!(env::var("FOO").unwrap(), "bar");
        assert_eq!(env::var("BAZ").unwrap(), "qux");
    }

    #[test]
    #[serial]
    fn merge_environment_file_missing_file_is_noop() {
        merge_environment_file(Path::new("/nonexistent/droidspace-test/environment"));
    }

    #[test]
    #[serial]
    fn apply_boot_extras_sets_container_ttys_and_defaults_lang() {
        env::remove_var("container_ttys");
        env::remove_var("LANG");

        apply_boot_extras("/dev/pts/3 /dev/pts/4");

        assert_eq!(env::var("container_ttys").unwrap(), "/dev/pts/3 /dev/pts/4");
        assert_eq!(env::var("LANG").unwrap(), "en_US.UTF-8");
    }

    #[test]
    #[serial]
    fn apply_boot_extras_skips_container_ttys_when_empty_and_keeps_existing_lang() {
        env::remove_var("container_ttys");
        env::set_var("LANG", "fr_FR.UTF-8");

        apply_boot_extras("");

        assert!(env::var("container_ttys").is_err());
        assert_eq!(env::var("LANG").unwrap(), "fr_FR.UTF-8");
    }
}
