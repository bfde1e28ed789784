//! Logging.
//!
//! All diagnostic output goes through the `log` facade, never straight to
//! `stderr`/`stdout`, mirroring rtrtr's own `src/log.rs` note that "all
//! diagnostic output ... is done via logging, never to stderr directly".
//! Unlike rtrtr this crate does not run as a system daemon, so the syslog
//! and log-file targets from the teacher's version are not carried forward
//! (documented in DESIGN.md) -- a single stderr dispatcher with a
//! configurable verbosity is all the CLI needs.

use std::io::Write;
use std::str::FromStr;

use log::{LevelFilter, Log, Metadata, Record};

/// The minimum log level to actually log, controlled by `-v`/`-q` flags.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct LogFilter(LevelFilter);

impl Default for LogFilter {
    fn default() -> Self {
        LogFilter(LevelFilter::Warn)
    }
}

impl LogFilter {
    /// One step more verbose, saturating at `Trace`.
    pub fn increase(&mut self) {
        self.0 = match self.0 {
            LevelFilter::Off => LevelFilter::Error,
            LevelFilter::Error => LevelFilter::Warn,
            LevelFilter::Warn => LevelFilter::Info,
            LevelFilter::Info => LevelFilter::Debug,
            LevelFilter::Debug | LevelFilter::Trace => LevelFilter::Trace,
        }
    }

    /// One step less verbose, saturating at `Off`.
    pub fn decrease(&mut self) {
        self.0 = match self.0 {
            LevelFilter::Off | LevelFilter::Error => LevelFilter::Off,
            LevelFilter::Warn => LevelFilter::Error,
            LevelFilter::Info => LevelFilter::Warn,
            LevelFilter::Debug => LevelFilter::Info,
            LevelFilter::Trace => LevelFilter::Debug,
        }
    }
}

impl FromStr for LogFilter {
    type Err = log::ParseLevelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        LevelFilter::from_str(s).map(LogFilter)
    }
}

/// A minimal `log::Log` implementation that writes leveled lines to stderr.
///
/// Kept deliberately small: no syslog, no file rotation, no structured
/// fields. Good enough for a tool whose main audience watches its own
/// terminal or a container's log collector.
struct StderrLogger {
    level: LevelFilter,
}

impl Log for StderrLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let now = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ");
        let _ = writeln!(
            std::io::stderr(),
            "[{now}] {:<5} {}: {}",
            record.level(),
            record.target(),
            record.args(),
        );
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}

/// Installs the stderr logger at the given filter level.
///
/// Should be called exactly once, as early as possible in `main`, before
/// anything else might want to log.
pub fn init(filter: LogFilter) {
    log::set_max_level(filter.0);
    let _ = log::set_boxed_logger(Box::new(StderrLogger { level: filter.0 }));
}

/// Maps a `-v`/`-q` occurrence count (verbose minus quiet) onto a filter,
/// starting from the default `Warn` level.
pub fn filter_from_verbosity(verbose: u8, quiet: u8) -> LogFilter {
    let mut filter = LogFilter::default();
    for _ in 0..verbose {
        filter.increase();
    }
    for _ in 0..quiet {
        filter.decrease();
    }
    filter
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbosity_increases_and_decreases_saturate() {
        assert_eq!(filter_from_verbosity(0, 0), LogFilter(LevelFilter::Warn));
        assert_eq!(filter_from_verbosity(10, 0), LogFilter(LevelFilter::Trace));
        assert_eq!(filter_from_verbosity(0, 10), LogFilter(LevelFilter::Off));
        assert_eq!(filter_from_verbosity(2, 1), LogFilter(LevelFilter::Debug));
    }

    #[test]
    fn parses_level_names() {
        assert_eq!("debug".parse::<LogFilter>().unwrap(), LogFilter(LevelFilter::Debug));
        assert!("not-a-level".parse::<LogFilter>().is_err());
    }
}
