//! Per-process watchdog registry
//!
//! One entry per live content process, created on the first liveness
//! status message and destroyed on the process's terminal lifecycle
//! event. Teardown removes the timer and every registered
//! power/visibility subscription in one step; an entry outliving its
//! process would keep a dead 20 ms ticker alive.

use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;

use dashmap::DashMap;
use tracing::{debug, info, warn};

use faultline_core::domain::event::{
    Event, Exception, ExceptionList, Level, Mechanism, Stacktrace,
};
use faultline_core::{ProcessStatus, StackFrame, WatchdogConfig};

pub use faultline_core::ProcessId;

use crate::debugger::{DebuggerCapture, DebuggerEvent, DebuggerSession};
use crate::error::WatchdogError;
use crate::timer::WatchdogTimer;

/// Port for the privileged native call-stack snapshot API.
pub trait NativeStackProvider: Send + Sync {
    fn capture_stack(&self) -> Result<Vec<StackFrame>, WatchdogError>;
}

/// How stack traces are captured for a given process.
pub enum CaptureStrategy {
    /// Emit ANR events without frames
    None,
    /// Snapshot through a privileged API
    Native(Arc<dyn NativeStackProvider>),
    /// Pause through an attached debugging session
    Debugger(Box<dyn DebuggerSession>),
}

/// Supplies per-process capture plumbing to the registry.
pub trait CaptureProvider: Send + Sync {
    /// Strategy for a process that announced `config`.
    fn strategy_for(&self, pid: ProcessId, config: &WatchdogConfig) -> CaptureStrategy;

    /// Display name used in the `event.process` tag.
    fn process_name(&self, pid: ProcessId) -> Option<String> {
        let _ = pid;
        None
    }
}

/// Handle to a registered power/visibility listener.
///
/// Unregisters on drop.
pub struct Subscription {
    unsubscribe: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    pub fn new(unsubscribe: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            unsubscribe: Some(Box::new(unsubscribe)),
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(unsubscribe) = self.unsubscribe.take() {
            unsubscribe();
        }
    }
}

/// Port for OS power/screen-lock notifications.
///
/// `on_change(false)` must be delivered on suspend/lock,
/// `on_change(true)` on resume/unlock.
pub trait PowerMonitor: Send + Sync {
    fn on_power_state(&self, on_change: Box<dyn Fn(bool) + Send + Sync>) -> Subscription;
}

/// No-op monitor for hosts without power notifications.
pub struct NoPowerMonitor;

impl PowerMonitor for NoPowerMonitor {
    fn on_power_state(&self, _on_change: Box<dyn Fn(bool) + Send + Sync>) -> Subscription {
        Subscription::new(|| {})
    }
}

struct ProcessWatchdog {
    timer: WatchdogTimer,
    debugger: Option<Arc<StdMutex<DebuggerCapture>>>,
    _power_subscription: Subscription,
}

/// Liveness watchdogs for every content process.
pub struct WatchdogRegistry {
    entries: DashMap<ProcessId, ProcessWatchdog>,
    provider: Arc<dyn CaptureProvider>,
    power: Arc<dyn PowerMonitor>,
    emit: Arc<dyn Fn(Event) + Send + Sync>,
}

impl WatchdogRegistry {
    /// Creates a registry emitting ANR events through `emit`.
    pub fn new(
        provider: Arc<dyn CaptureProvider>,
        power: Arc<dyn PowerMonitor>,
        emit: Arc<dyn Fn(Event) + Send + Sync>,
    ) -> Self {
        Self {
            entries: DashMap::new(),
            provider,
            power,
            emit,
        }
    }

    /// Handles one liveness status message from a content process.
    ///
    /// The first message creates the watchdog entry using the config
    /// it carries; every message polls the timer; visibility changes
    /// toggle detection.
    pub fn on_status(&self, pid: ProcessId, status: ProcessStatus, config: WatchdogConfig) {
        if let dashmap::mapref::entry::Entry::Vacant(vacant) = self.entries.entry(pid) {
            info!(pid, ?config, "Process sent first status message");
            vacant.insert(self.build_entry(pid, config));
        }

        if let Some(entry) = self.entries.get(&pid) {
            entry.timer.poll();

            if status != ProcessStatus::Alive {
                debug!(pid, ?status, "Process visibility changed");
                entry.timer.set_enabled(status == ProcessStatus::Visible);
            }
        }
    }

    /// Feeds an observed debugger message to the process's capture.
    ///
    /// Messages for processes without a debugger capture are dropped.
    pub fn on_debugger_event(&self, pid: ProcessId, event: DebuggerEvent) {
        let Some(entry) = self.entries.get(&pid) else {
            return;
        };
        if let Some(debugger) = &entry.debugger {
            lock(debugger).handle_event(event);
        }
    }

    /// Terminal lifecycle event: tears down the process's timer and
    /// all of its subscriptions.
    pub fn process_destroyed(&self, pid: ProcessId) {
        if self.entries.remove(&pid).is_some() {
            info!(pid, "Watchdog torn down for destroyed process");
        }
    }

    /// Number of processes currently monitored.
    pub fn watched_count(&self) -> usize {
        self.entries.len()
    }

    fn build_entry(&self, pid: ProcessId, config: WatchdogConfig) -> ProcessWatchdog {
        let process_name = self
            .provider
            .process_name(pid)
            .unwrap_or_else(|| format!("content-{pid}"));
        let blocked_ms = config.anr_threshold_ms;

        let strategy = if config.capture_stack_trace {
            self.provider.strategy_for(pid, &config)
        } else {
            CaptureStrategy::None
        };

        // What the timer does on a stall depends on the strategy: the
        // debugger path emits later, from the paused-event handler.
        let (debugger, on_stall): (
            Option<Arc<StdMutex<DebuggerCapture>>>,
            Box<dyn Fn() + Send + Sync>,
        ) = match strategy {
            CaptureStrategy::None => {
                let emit = Arc::clone(&self.emit);
                let name = process_name.clone();
                (
                    None,
                    Box::new(move || {
                        warn!(process = %name, "Watchdog timeout");
                        emit(anr_event(&name, blocked_ms, None));
                    }),
                )
            }
            CaptureStrategy::Native(native) => {
                let emit = Arc::clone(&self.emit);
                let name = process_name.clone();
                (
                    None,
                    Box::new(move || {
                        warn!(process = %name, "Watchdog timeout, requesting native snapshot");
                        let frames = match native.capture_stack() {
                            Ok(frames) => Some(frames),
                            Err(e) => {
                                debug!(error = %e, "Native stack capture failed");
                                None
                            }
                        };
                        emit(anr_event(&name, blocked_ms, frames));
                    }),
                )
            }
            CaptureStrategy::Debugger(session) => {
                let emit = Arc::clone(&self.emit);
                let name = process_name.clone();
                let capture = Arc::new(StdMutex::new(DebuggerCapture::new(
                    session,
                    Box::new(move |frames| {
                        emit(anr_event(&name, blocked_ms, Some(frames)));
                    }),
                )));

                let pause_target = Arc::clone(&capture);
                let name = process_name.clone();
                (
                    Some(capture),
                    Box::new(move || {
                        warn!(process = %name, "Watchdog timeout, pausing debugger");
                        lock(&pause_target).request_pause();
                    }),
                )
            }
        };

        let timer = WatchdogTimer::spawn(
            Duration::from_millis(config.poll_interval_ms),
            Duration::from_millis(config.anr_threshold_ms),
            move || on_stall(),
        );

        let handle = timer.handle();
        let power_subscription = self
            .power
            .on_power_state(Box::new(move |awake| handle.set_enabled(awake)));

        ProcessWatchdog {
            timer,
            debugger,
            _power_subscription: power_subscription,
        }
    }
}

/// Builds the ApplicationNotResponding event for a stalled process.
fn anr_event(process_name: &str, blocked_ms: u64, frames: Option<Vec<StackFrame>>) -> Event {
    let mut event = Event::new();
    event.level = Some(Level::Error);
    event.exception = Some(ExceptionList {
        values: vec![Exception {
            ty: Some("ApplicationNotResponding".to_string()),
            value: Some(format!(
                "Application Not Responding for at least {blocked_ms} ms"
            )),
            stacktrace: frames.map(|frames| Stacktrace { frames }),
            // Keeps the collector UI from reporting 'Crashed in' for
            // the stack trace.
            mechanism: Some(Mechanism {
                ty: "ANR".to_string(),
                handled: None,
            }),
        }],
    });
    event
        .tags
        .insert("event.process".to_string(), process_name.to_string());
    event
}

fn lock<T>(value: &StdMutex<T>) -> std::sync::MutexGuard<'_, T> {
    value.lock().unwrap_or_else(PoisonError::into_inner)
}
