//! Leveled logging for the bring-up pipeline.
//!
//! Mirrors the teacher's `YoukiLogger`: a single process-wide logger behind
//! `OnceCell`, writing to an optional log file or stderr. This is the one
//! piece of intentional global state in the crate (Design Notes §9 bans
//! module-global state for domain data such as the Host Probe, not for the
//! logging sink).

use std::env;
use std::fs::{File, OpenOptions};
use std::io::{stderr, Write};
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::Result;
use log::{LevelFilter, Log, Metadata, Record};
use once_cell::sync::OnceCell;

static LOGGER: OnceCell<DroidspaceLogger> = OnceCell::new();
static LOG_FILE: OnceCell<Option<File>> = OnceCell::new();

/// Initialize the global logger. Safe to call more than once; only the
/// first call takes effect.
pub fn init(log_file: Option<PathBuf>, level: Option<LevelFilter>) -> Result<()> {
    LOG_FILE.get_or_init(|| -> Option<File> {
        let level_filter = level.unwrap_or_else(|| {
            env::var("DROIDSPACE_LOG")
                .ok()
                .and_then(|s| LevelFilter::from_str(&s).ok())
                .unwrap_or(LevelFilter::Warn)
        });

        let logger = LOGGER.get_or_init(|| DroidspaceLogger::new(level_filter.to_level()));
        log::set_logger(logger)
            .map(|()| log::set_max_level(level_filter))
            .expect("set logger failed");

        log_file.as_ref().map(|path| {
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .expect("failed opening log file")
        })
    });
    Ok(())
}

pub struct DroidspaceLogger {
    level: Option<log::Level>,
}

impl DroidspaceLogger {
    pub fn new(level: Option<log::Level>) -> Self {
        Self { level }
    }
}

impl Log for DroidspaceLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        match self.level {
            Some(level) => metadata.level() <= level,
            None => false,
        }
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let msg = match (record.file(), record.line()) {
            (Some(file), Some(line)) => {
                format!("[{} {}:{}] {}", record.level(), file, line, record.args())
            }
            _ => format!("[{}] {}", record.level(), record.args()),
        };
        match LOG_FILE.get().and_then(|f| f.as_ref()) {
            Some(mut file) => {
                let _ = writeln!(file, "{}", msg);
            }
            None => {
                let _ = writeln!(stderr(), "{}", msg);
            }
        }
    }

    fn flush(&self) {
        match LOG_FILE.get().and_then(|f| f.as_ref()) {
            Some(mut file) => {
                let _ = file.flush();
            }
            None => {
                let _ = stderr().flush();
            }
        }
    }
}
