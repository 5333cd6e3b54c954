//! Stack frame path normalization
//!
//! Crash reports from different machines should group together, so
//! absolute filesystem paths in stack frames are rewritten relative to
//! the application root under an `app:///` pseudo-scheme before events
//! are emitted or uploaded.

use std::path::Path;

use crate::domain::event::{Event, StackFrame};

/// Rewrites an absolute path relative to `app_root` as `app:///...`.
///
/// Paths outside the application root are returned unchanged.
pub fn normalize_frame_path(filename: &str, app_root: &Path) -> String {
    let path = Path::new(filename);
    match path.strip_prefix(app_root) {
        Ok(relative) => {
            let mut out = String::from("app:///");
            out.push_str(&relative.to_string_lossy().replace('\\', "/"));
            out
        }
        Err(_) => filename.to_string(),
    }
}

/// Normalizes a single frame in place, deriving `in_app` from whether
/// the file lives under the application root.
pub fn normalize_frame(frame: &mut StackFrame, app_root: &Path) {
    if let Some(filename) = &frame.filename {
        let in_app = Path::new(filename).starts_with(app_root);
        frame.filename = Some(normalize_frame_path(filename, app_root));
        if frame.in_app.is_none() {
            frame.in_app = Some(in_app);
        }
    }
}

/// Normalizes every exception stack frame on an event.
pub fn normalize_event_frames(event: &mut Event, app_root: &Path) {
    if let Some(exception) = &mut event.exception {
        for value in &mut exception.values {
            if let Some(stacktrace) = &mut value.stacktrace {
                for frame in &mut stacktrace.frames {
                    normalize_frame(frame, app_root);
                }
            }
        }
    }
}
