//! Progress and error reporting
//!
//! All user-facing reporting funnels through a single [`Reporter`] that is
//! shared process-wide. Progress messages carry a level and are dropped when
//! the configured level is lower; errors are always emitted. Irrecoverable
//! conditions go through [`Reporter::fatal`], which terminates the process
//! with a diagnostic instead of unwinding through transport callbacks.

use tracing::{error, info};

/// Verbosity levels for progress messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ProgressLevel {
    Basic = 1,
    Detailed = 2,
    Noisy = 3,
}

impl ProgressLevel {
    /// Map a numeric configuration value onto a level; out-of-range values
    /// clamp to the nearest bound.
    pub fn from_number(level: u8) -> Self {
        match level {
            0 | 1 => ProgressLevel::Basic,
            2 => ProgressLevel::Detailed,
            _ => ProgressLevel::Noisy,
        }
    }
}

/// Process-wide progress/error reporter.
#[derive(Debug)]
pub struct Reporter {
    level: ProgressLevel,
}

impl Reporter {
    pub fn new(level: ProgressLevel) -> Self {
        Self { level }
    }

    /// Emit a progress message if `level` is within the configured verbosity.
    pub fn progress(&self, level: ProgressLevel, message: impl AsRef<str>) {
        if level <= self.level {
            info!("{}", message.as_ref());
        }
    }

    /// Emit an error message. Errors never propagate up through the
    /// subscription callbacks; reporting them is the whole signal.
    pub fn error(&self, message: impl AsRef<str>) {
        error!("{}", message.as_ref());
    }

    /// Report an irrecoverable condition and terminate the process.
    pub fn fatal(&self, message: impl AsRef<str>) -> ! {
        error!("{} Terminating.", message.as_ref());
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_ordering() {
        assert!(ProgressLevel::Basic < ProgressLevel::Detailed);
        assert!(ProgressLevel::Detailed < ProgressLevel::Noisy);
    }

    #[test]
    fn test_level_from_number_clamps() {
        assert_eq!(ProgressLevel::from_number(0), ProgressLevel::Basic);
        assert_eq!(ProgressLevel::from_number(1), ProgressLevel::Basic);
        assert_eq!(ProgressLevel::from_number(2), ProgressLevel::Detailed);
        assert_eq!(ProgressLevel::from_number(3), ProgressLevel::Noisy);
        assert_eq!(ProgressLevel::from_number(250), ProgressLevel::Noisy);
    }
}
