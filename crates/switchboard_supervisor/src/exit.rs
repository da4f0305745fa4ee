//! Worker exit statuses and their classification.

use std::fmt;

/// How a worker process ended, as reported by the operating system.
///
/// At most one of the two fields is normally set: a process either returns an
/// exit code or is ended by a signal. Both are `None` when the status could
/// not be collected at all.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerExit {
    pub code: Option<i32>,
    pub signal: Option<i32>,
}

impl WorkerExit {
    pub fn with_code(code: i32) -> Self {
        Self {
            code: Some(code),
            signal: None,
        }
    }

    pub fn with_signal(signal: i32) -> Self {
        Self {
            code: None,
            signal: Some(signal),
        }
    }

    pub fn kind(&self) -> ExitKind {
        match (self.code, self.signal) {
            (None, Some(_)) => ExitKind::Killed,
            (Some(0), None) => ExitKind::Clean,
            _ => ExitKind::Crashed,
        }
    }
}

impl From<std::process::ExitStatus> for WorkerExit {
    fn from(status: std::process::ExitStatus) -> Self {
        #[cfg(unix)]
        let signal = {
            use std::os::unix::process::ExitStatusExt;
            status.signal()
        };
        #[cfg(not(unix))]
        let signal = None;

        Self {
            code: status.code(),
            signal,
        }
    }
}

impl fmt::Display for WorkerExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "code {code}"),
            (None, Some(signal)) => write!(f, "signal {signal}"),
            (None, None) => f.write_str("unknown status"),
        }
    }
}

/// Reconciliation class of a worker exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitKind {
    /// Ended by a signal, typically sent by `kill_worker`.
    Killed,
    /// Exited on its own with status 0.
    Clean,
    /// Anything else. The worker entry is kept for inspection.
    Crashed,
}
