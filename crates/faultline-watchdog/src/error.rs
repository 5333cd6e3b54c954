//! Watchdog error types

use thiserror::Error;

/// Errors from capture strategies.
///
/// All captures are best-effort: the watched process may be destroyed
/// mid-capture, so these are logged and swallowed, never propagated
/// into the host's lifecycle handlers.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WatchdogError {
    /// A debugger command could not be delivered
    #[error("Debugger command failed: {0}")]
    CommandFailed(String),

    /// The native capture API is unavailable for this process
    #[error("Native stack capture unavailable: {0}")]
    CaptureUnavailable(String),
}
