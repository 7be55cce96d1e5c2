//! Structured, leveled, file-backed diagnostics (§4.10).

use std::path::Path;

use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;

/// Maps the original tool's syslog-style priority cap (0 emergency ..
/// 7 debug) onto a `tracing::Level` (§4.10). The source collapsed all
/// eight syslog priorities into a 3-level `error|info|debug` ladder; we
/// preserve that collapse rather than inventing finer-grained mapping.
pub fn level_for_syslog_cap(cap: u8) -> Level {
    match cap {
        0..=3 => Level::ERROR,
        4..=6 => Level::INFO,
        _ => Level::DEBUG,
    }
}

/// Installs the global subscriber. Returns the worker guard that must be
/// held for the duration of the process so buffered log lines are
/// flushed; `None` if no log path was given (logging disabled, matching
/// the original's null log file descriptor behaviour).
pub fn init(log_path: Option<&str>, level: Level) -> Option<WorkerGuard> {
    let Some(log_path) = log_path else {
        return None;
    };

    let path = Path::new(log_path);
    let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
    let file_name = path.file_name().unwrap_or_default();

    let appender = tracing_appender::rolling::never(dir, file_name);
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let filter = tracing_subscriber::EnvFilter::builder()
        .with_default_directive(tracing_subscriber::filter::LevelFilter::from_level(level).into())
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_writer(writer)
        .with_env_filter(filter)
        .with_ansi(false)
        .init();

    Some(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn syslog_cap_maps_to_three_level_ladder() {
        assert_eq!(level_for_syslog_cap(0), Level::ERROR);
        assert_eq!(level_for_syslog_cap(3), Level::ERROR);
        assert_eq!(level_for_syslog_cap(4), Level::INFO);
        assert_eq!(level_for_syslog_cap(6), Level::INFO);
        assert_eq!(level_for_syslog_cap(7), Level::DEBUG);
    }
}
