//! Debugger-based stack capture
//!
//! A small state machine over the remote-debugging protocol. Two
//! inbound message kinds matter: `ScriptParsed` builds the
//! scriptId-to-URL table, and `Paused` yields the call frames, but
//! only when the pause was requested by us, not a breakpoint or
//! exception.
//! The stalled process is resumed immediately after the frames are
//! copied; every command is best-effort because the process may be
//! destroyed mid-capture.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use faultline_core::StackFrame;

use crate::error::WatchdogError;

/// Frames from files matching this marker belong to our own
/// instrumentation and are trimmed from captured stacks.
const SDK_FRAME_MARKER: &str = "faultline";

/// Commands the capture sends to the debugging session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebuggerCommand {
    Enable,
    Pause,
    Resume,
    Detach,
}

/// Outbound command port to an attached debugging session.
///
/// Implementations deliver the command to the stalled process; errors
/// are swallowed by the capture.
pub trait DebuggerSession: Send + Sync {
    fn send_command(&self, command: DebuggerCommand) -> Result<(), WatchdogError>;
}

/// Why the debugger paused
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum PauseReason {
    /// A manual pause command, reported as `other` on the wire. The
    /// only reason a capture acts on.
    Manual,
    Breakpoint,
    Exception,
    /// Any reason this core does not recognize. Decodes losslessly so
    /// an exotic pause never fails the whole message.
    Unrecognized,
}

impl From<String> for PauseReason {
    fn from(reason: String) -> Self {
        match reason.as_str() {
            "other" => PauseReason::Manual,
            "breakpoint" => PauseReason::Breakpoint,
            "exception" => PauseReason::Exception,
            _ => PauseReason::Unrecognized,
        }
    }
}

impl From<PauseReason> for String {
    fn from(reason: PauseReason) -> String {
        match reason {
            PauseReason::Manual => "other",
            PauseReason::Breakpoint => "breakpoint",
            PauseReason::Exception => "exception",
            PauseReason::Unrecognized => "unrecognized",
        }
        .to_string()
    }
}

/// Source location within a parsed script
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameLocation {
    pub script_id: String,
    /// 0-based, per the wire protocol
    pub line_number: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column_number: Option<u32>,
}

/// A call frame reported by a paused debugger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallFrame {
    pub function_name: String,
    pub location: FrameLocation,
}

/// The debugger messages this capture observes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", content = "params")]
pub enum DebuggerEvent {
    #[serde(rename = "Debugger.scriptParsed", rename_all = "camelCase")]
    ScriptParsed { script_id: String, url: String },
    #[serde(rename = "Debugger.paused", rename_all = "camelCase")]
    Paused {
        reason: PauseReason,
        call_frames: Vec<CallFrame>,
    },
}

/// Captures stack frames from a stalled process via its debugger.
pub struct DebuggerCapture {
    session: Box<dyn DebuggerSession>,
    /// scriptId → URL, built up from `ScriptParsed` messages
    scripts: HashMap<String, String>,
    on_frames: Box<dyn Fn(Vec<StackFrame>) + Send + Sync>,
}

impl DebuggerCapture {
    /// Attaches to a session.
    ///
    /// The debugger must be enabled before any stall occurs, so
    /// `Enable` is sent immediately.
    pub fn new(
        session: Box<dyn DebuggerSession>,
        on_frames: Box<dyn Fn(Vec<StackFrame>) + Send + Sync>,
    ) -> Self {
        let capture = Self {
            session,
            scripts: HashMap::new(),
            on_frames,
        };
        capture.send_best_effort(DebuggerCommand::Enable);
        capture
    }

    /// Requests a pause of the stalled process. Best-effort.
    pub fn request_pause(&self) {
        self.send_best_effort(DebuggerCommand::Pause);
    }

    /// Feeds one observed debugger message through the state machine.
    pub fn handle_event(&mut self, event: DebuggerEvent) {
        match event {
            DebuggerEvent::ScriptParsed { script_id, url } => {
                self.scripts.insert(script_id, url);
            }
            DebuggerEvent::Paused {
                reason: PauseReason::Manual,
                call_frames,
            } => {
                // Copy the frames and resume immediately; the process
                // must not stay paused a moment longer than necessary.
                self.send_best_effort(DebuggerCommand::Resume);

                let frames = prepare_frames(&call_frames, &self.scripts);
                (self.on_frames)(frames);
            }
            DebuggerEvent::Paused { reason, .. } => {
                debug!(?reason, "Ignoring pause not requested by the watchdog");
            }
        }
    }

    fn send_best_effort(&self, command: DebuggerCommand) {
        if let Err(e) = self.session.send_command(command) {
            debug!(?command, error = %e, "Debugger command failed");
        }
    }
}

impl Drop for DebuggerCapture {
    fn drop(&mut self) {
        self.send_best_effort(DebuggerCommand::Detach);
    }
}

/// Converts paused call frames into stack frames.
///
/// Wire frames are innermost-first with 0-based locations; stack
/// frames are oldest-first with 1-based locations. Frames from our own
/// instrumentation are trimmed.
fn prepare_frames(call_frames: &[CallFrame], scripts: &HashMap<String, String>) -> Vec<StackFrame> {
    let mut frames: Vec<StackFrame> = call_frames
        .iter()
        .map(|frame| {
            let filename = scripts
                .get(&frame.location.script_id)
                .map(|url| url.trim_start_matches("file://").to_string());

            let function = if frame.function_name.is_empty() {
                "?".to_string()
            } else {
                frame.function_name.clone()
            };

            let module = filename.as_deref().and_then(|f| {
                std::path::Path::new(f)
                    .file_stem()
                    .map(|stem| stem.to_string_lossy().into_owned())
            });

            StackFrame {
                filename,
                function: Some(function),
                module,
                lineno: Some(frame.location.line_number + 1),
                colno: frame.location.column_number.map(|c| c + 1),
                in_app: None,
            }
        })
        .filter(|frame| {
            !frame
                .filename
                .as_deref()
                .is_some_and(|f| f.contains(SDK_FRAME_MARKER))
        })
        .collect();

    frames.reverse();
    frames
}
