//! # vlog.rs
//!
//! Log setup for the binary. Library code logs through the `tracing`
//! macros and never installs a subscriber itself.
//!
//! `RUST_LOG`, when set, wins over the level picked on the command line.

use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    /// `--verbose`
    Debug,
    Warn,
}

impl LogLevel {
    fn directive(self) -> &'static str {
        match self {
            // Keep HTTP internals quiet even in verbose mode.
            LogLevel::Debug => "warn,vosinv=debug",
            LogLevel::Warn => "warn",
        }
    }
}

/// Install the stderr subscriber. Safe to call more than once.
pub fn init(level: LogLevel) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.directive()));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbose_only_raises_this_crate() {
        assert_eq!(LogLevel::Debug.directive(), "warn,vosinv=debug");
        assert_eq!(LogLevel::Warn.directive(), "warn");
        assert!(EnvFilter::try_new(LogLevel::Debug.directive()).is_ok());
    }

    #[test]
    fn init_twice_does_not_panic() {
        init(LogLevel::Warn);
        init(LogLevel::Debug);
    }
}
