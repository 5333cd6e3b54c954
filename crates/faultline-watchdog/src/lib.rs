//! Faultline Watchdog - Application-Not-Responding detection
//!
//! Each watched content process reports liveness through the relay;
//! a 20 ms background timer detects when the reports stall past the
//! configured threshold and fires exactly once per stall. On a stall,
//! a capture strategy (native snapshot or remote-debugger pause) grabs
//! a stack trace before the ANR event is emitted through the merge
//! path.

pub mod debugger;
pub mod error;
pub mod header;
pub mod registry;
pub mod timer;

pub use debugger::{CallFrame, DebuggerCapture, DebuggerCommand, DebuggerEvent, DebuggerSession,
    FrameLocation, PauseReason};
pub use error::WatchdogError;
pub use header::{inject_capture_policy_header, NetworkSession, ResponseHeaders};
pub use registry::{CaptureProvider, CaptureStrategy, NativeStackProvider, NoPowerMonitor,
    PowerMonitor, ProcessId, Subscription, WatchdogRegistry};
pub use timer::{WatchdogHandle, WatchdogTimer};
