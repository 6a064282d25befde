//! Driver runtime options

use std::path::PathBuf;
use std::time::Duration;

/// Timeout configuration for serial operations
#[derive(Debug, Clone)]
pub struct SerialTimeouts {
    /// Time allowed for each chunk of a device reply (default: 3000 ms)
    pub response_timeout_ms: u64,
    /// Open attempts while the port is busy (default: 3)
    pub connect_retries: u32,
    /// Pause between busy open attempts (default: 1000 ms)
    pub connect_backoff_ms: u64,
}

impl Default for SerialTimeouts {
    fn default() -> Self {
        Self {
            response_timeout_ms: 3000,
            connect_retries: 3,
            connect_backoff_ms: 1000,
        }
    }
}

impl SerialTimeouts {
    /// Get the response timeout as a Duration
    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    /// Get the busy back-off as a Duration
    pub fn connect_backoff(&self) -> Duration {
        Duration::from_millis(self.connect_backoff_ms)
    }
}

/// Options shared by every driver process
#[derive(Debug, Clone, Default)]
pub struct DriverOptions {
    /// Number of `-v` flags; anything above zero dumps inbound traffic
    pub verbosity: u8,
    /// Config file to use instead of the per-device default
    pub config_file: Option<PathBuf>,
    pub serial: SerialTimeouts,
}

impl DriverOptions {
    pub fn verbose(&self) -> bool {
        self.verbosity > 0
    }

    /// Log filter implied by the verbosity when `RUST_LOG` is unset.
    pub fn log_level(&self) -> &'static str {
        match self.verbosity {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    }
}
