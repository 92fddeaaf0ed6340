//! Kernel logger
//!
//! `log` backend writing one line per record to the serial console:
//!
//! ```text
//! [ INFO] ps::create: created process 3 'init' (parent 0, Supervisor, priority 3, as#1)
//! ```

use log::{LevelFilter, Log, Metadata, Record};

use crate::serial;

struct SerialLogger;

static LOGGER: SerialLogger = SerialLogger;

impl Log for SerialLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            serial::write_fmt(format_args!(
                "[{:>5}] {}: {}\n",
                record.level(),
                record.target(),
                record.args()
            ));
        }
    }

    fn flush(&self) {}
}

/// Install the serial logger with `level` as the maximum
///
/// A second call keeps the first logger and only adjusts the level.
pub fn init(level: LevelFilter) {
    if log::set_logger(&LOGGER).is_err() {
        serial::write_fmt(format_args!("[ WARN] logger: already installed\n"));
    }
    log::set_max_level(level);
}
