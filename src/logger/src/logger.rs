//! Logging setup for engine front ends.
//!
//! The kernel itself only speaks through the [`log`] facade; whichever
//! binary embeds it decides when (and whether) to install this logger.
//! Records render as
//!
//! ```text
//! 2026-08-01 09:15:02.113 INFO  kernel::engine > Engine assembled: ...
//! 2026-08-01 09:15:02.910 ERROR alignment::read > Bad magic number (at src/read/mod.rs:88)
//! ```
//!
//! with the emitting file and line appended to warnings and errors. The
//! `PHYLIK_LOG` environment variable overrides the requested verbosity,
//! with the usual `env_logger` filter syntax.

use std::io::Write;

use env_logger::{Builder, Env};
use env_logger::fmt::{Color, Formatter};
use log::{Level, LevelFilter, Record};

/// Verbosity ladder used by front ends: 0 shows errors only, each step
/// adds a level, 4 and above shows everything.
#[must_use]
pub fn verbosity_filter(verbosity: u8) -> LevelFilter {
    match verbosity {
        0 => LevelFilter::Error,
        1 => LevelFilter::Warn,
        2 => LevelFilter::Info,
        3 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

fn level_color(level: Level) -> Color {
    match level {
        Level::Error => Color::Red,
        Level::Warn  => Color::Yellow,
        Level::Info  => Color::Green,
        Level::Debug => Color::Blue,
        Level::Trace => Color::Cyan,
    }
}

/// Render one record: timestamp, coloured level, target, message, and the
/// source location for anything at warning severity or worse.
fn write_record(buf: &mut Formatter, record: &Record) -> std::io::Result<()> {
    let mut level_style = buf.style();
    level_style.set_color(level_color(record.level())).set_bold(true);

    write!(
        buf,
        "{} {: <5} {} > {}",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
        level_style.value(record.level()),
        record.target(),
        record.args(),
    )?;

    if record.level() <= Level::Warn {
        let mut origin_style = buf.style();
        origin_style.set_dimmed(true);
        let origin = format!(
            "(at {}:{})",
            record.file().unwrap_or("<unknown>"),
            record.line().unwrap_or(0),
        );
        write!(buf, " {}", origin_style.value(origin))?;
    }
    writeln!(buf)
}

/// Installer for the global logger.
#[derive(Debug)]
pub struct Logger;

impl Logger {

    /// Install the global logger at the given verbosity. A second call
    /// (e.g. across tests) leaves the first installation in place.
    pub fn init(verbosity: u8) {
        let env = Env::default().filter("PHYLIK_LOG");
        Builder::new()
            .filter_level(verbosity_filter(verbosity))
            .format(write_record)
            .parse_env(env)
            .try_init()
            .ok();
    }

    /// Raise or lower the ceiling of an already-installed logger.
    pub fn set_level(verbosity: u8) {
        log::set_max_level(verbosity_filter(verbosity));
    }
}
