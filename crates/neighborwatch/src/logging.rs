//! Logging configuration for neighborwatch.
//!
//! Logs go to stderr so that command output on stdout (tables, JSON, alert
//! text) stays machine-readable.

use tracing::Level;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Verbosity level for logging output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Verbosity {
    /// Suppress all output except errors.
    Quiet,
    /// Warnings and errors only.
    #[default]
    Normal,
    /// Informational messages and above.
    Verbose,
    /// Everything, including per-poll feed traces.
    Trace,
}

impl Verbosity {
    /// Map `-q` and the `-v` count to a verbosity.
    #[must_use]
    pub fn from_flags(quiet: bool, verbose: u8) -> Self {
        if quiet {
            return Self::Quiet;
        }
        match verbose {
            0 => Self::Normal,
            1 => Self::Verbose,
            _ => Self::Trace,
        }
    }

    /// Convert verbosity to tracing level filter.
    #[must_use]
    pub fn to_level_filter(&self) -> Level {
        match self {
            Self::Quiet => Level::ERROR,
            Self::Normal => Level::WARN,
            Self::Verbose => Level::DEBUG,
            Self::Trace => Level::TRACE,
        }
    }

    /// Default `EnvFilter` directive for this verbosity.
    #[must_use]
    pub fn directive(&self) -> String {
        format!("neighborwatch={}", self.to_level_filter())
    }
}

/// Initialize the logging system.
///
/// `RUST_LOG` takes precedence over `verbosity` when set.
///
/// # Examples
///
/// ```no_run
/// use neighborwatch::{init_logging, logging::Verbosity};
///
/// init_logging(Verbosity::Verbose);
/// ```
pub fn init_logging(verbosity: Verbosity) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(verbosity.directive()));

    let subscriber = tracing_subscriber::registry().with(env_filter).with(
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false),
    );

    // Ignore the error if a subscriber is already set.
    let _ = subscriber.try_init();
}

/// Initialize logging for tests.
#[cfg(test)]
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("warn")
        .with_test_writer()
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verbosity_to_level() {
        assert_eq!(Verbosity::Quiet.to_level_filter(), Level::ERROR);
        assert_eq!(Verbosity::Normal.to_level_filter(), Level::WARN);
        assert_eq!(Verbosity::Verbose.to_level_filter(), Level::DEBUG);
        assert_eq!(Verbosity::Trace.to_level_filter(), Level::TRACE);
    }

    #[test]
    fn test_verbosity_from_flags() {
        assert_eq!(Verbosity::from_flags(true, 2), Verbosity::Quiet);
        assert_eq!(Verbosity::from_flags(false, 0), Verbosity::Normal);
        assert_eq!(Verbosity::from_flags(false, 1), Verbosity::Verbose);
        assert_eq!(Verbosity::from_flags(false, 5), Verbosity::Trace);
    }

    #[test]
    fn test_verbosity_directive() {
        assert_eq!(Verbosity::Verbose.directive(), "neighborwatch=DEBUG");
        assert!(EnvFilter::try_new(Verbosity::Trace.directive()).is_ok());
    }

    #[test]
    fn test_verbosity_default() {
        assert_eq!(Verbosity::default(), Verbosity::Normal);
    }

    #[test]
    fn test_init_logging_with_all_verbosity_levels() {
        // Only the first call installs a subscriber.
        init_logging(Verbosity::Quiet);
        init_logging(Verbosity::Normal);
        init_logging(Verbosity::Verbose);
        init_logging(Verbosity::Trace);
    }

    #[test]
    fn test_init_test_logging_does_not_panic() {
        init_test_logging();
    }
}
