//! Process-wide logging backend for the `log` facade

use env_logger::Builder as LogBuilder;
use log::LevelFilter;

/// Install the env_logger backend at `level`. `RUST_LOG` directives take precedence.
///
/// Safe to call more than once; later calls are ignored.
pub fn init_logging(level: LevelFilter) {
    let _ = LogBuilder::new()
        .filter_level(level)
        .format_timestamp_millis()
        .parse_default_env()
        .try_init();
}
