//! Logging setup shared by the download and extraction pipelines.
//!
//! Headless runs (cron, CI) get plain env_logger output with fixed-width
//! level labels for log shippers. Interactive runs route every record
//! through the active progress display so log lines never tear the bars.

use std::io::Write;

use indicatif::MultiProgress;
use log::Level;

const ANSI_RESET: &str = "\x1b[0m";

/// Log verbosity selected by the embedding host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verbosity {
    /// Warnings and errors only
    Quiet,
    /// One line per downloaded or extracted file
    Normal,
    /// Per-batch and per-retry detail
    Debug,
}

impl Verbosity {
    /// Default filter handed to env_logger; `RUST_LOG` still wins.
    fn default_filter(self) -> &'static str {
        match self {
            Self::Quiet => "warn",
            Self::Normal => "info",
            Self::Debug => "debug",
        }
    }
}

/// Fixed-width label, stable for grep and log shippers.
fn level_label(level: Level) -> &'static str {
    match level {
        Level::Error => "ERROR",
        Level::Warn => "WARN ",
        Level::Info => "INFO ",
        Level::Debug => "DEBUG",
        Level::Trace => "TRACE",
    }
}

fn level_color(level: Level) -> &'static str {
    match level {
        Level::Error => "\x1b[31m",
        Level::Warn => "\x1b[33m",
        Level::Info => "\x1b[32m",
        Level::Debug => "\x1b[36m",
        Level::Trace => "\x1b[35m",
    }
}

/// Logger for interactive runs: each record suspends the progress bars
/// while it prints, then lets them redraw below it.
struct BarSafeLogger {
    filter: env_logger::Logger,
    bars: MultiProgress,
}

impl log::Log for BarSafeLogger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        self.filter.enabled(metadata)
    }

    fn log(&self, record: &log::Record) {
        if !self.filter.enabled(record.metadata()) {
            return;
        }
        let label = level_label(record.level());
        let color = level_color(record.level());
        let line = format!("[{color}{label}{ANSI_RESET}] {}", record.args());
        self.bars.suspend(|| eprintln!("{line}"));
    }

    fn flush(&self) {
        self.filter.flush();
    }
}

/// Install the global logger.
///
/// Pass the progress display's `MultiProgress` for interactive runs; `None`
/// selects the plain headless format. Calling twice is a no-op, not a
/// panic, so hosts and tests may initialize defensively.
pub fn init_logging(verbosity: Verbosity, bars: Option<&MultiProgress>) {
    let env = env_logger::Env::default().default_filter_or(verbosity.default_filter());
    match bars {
        Some(bars) => {
            let filter = env_logger::Builder::from_env(env).build();
            let max_level = filter.filter();
            let logger = BarSafeLogger {
                filter,
                bars: bars.clone(),
            };
            if log::set_boxed_logger(Box::new(logger)).is_ok() {
                log::set_max_level(max_level);
            }
        }
        None => {
            let _ = env_logger::Builder::from_env(env)
                .format(|buf, record| {
                    writeln!(buf, "[{}] {}", level_label(record.level()), record.args())
                })
                .try_init();
        }
    }
}
