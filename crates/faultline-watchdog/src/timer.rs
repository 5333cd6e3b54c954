//! The liveness watchdog timer
//!
//! The watched process calls [`poll`](WatchdogTimer::poll) to record
//! "I am alive". A background task ticks every 20 ms and compares the
//! gap since the last poll against `poll_interval + anr_threshold`.
//! Firing is edge-triggered: the callback runs once when the gap first
//! crosses the threshold and cannot run again until liveness resumes
//! and a new stall crosses it.

use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Cadence of the background stall check
const TICK: Duration = Duration::from_millis(20);

struct TimerState {
    last_poll: Instant,
    triggered: bool,
    enabled: bool,
}

/// A per-process watchdog timer.
///
/// Dropping the timer cancels its background task; a leaked 20 ms
/// ticker is a correctness bug.
pub struct WatchdogTimer {
    state: Arc<StdMutex<TimerState>>,
    cancel: CancellationToken,
}

/// Cheap handle for polling and enable toggling from listeners.
#[derive(Clone)]
pub struct WatchdogHandle {
    state: Arc<StdMutex<TimerState>>,
}

impl WatchdogTimer {
    /// Spawns the background stall checker.
    ///
    /// `callback` runs outside the internal lock, at most once per
    /// stall. Must be called from within a tokio runtime.
    pub fn spawn<F>(poll_interval: Duration, anr_threshold: Duration, callback: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        let state = Arc::new(StdMutex::new(TimerState {
            last_poll: Instant::now(),
            triggered: false,
            enabled: true,
        }));
        let cancel = CancellationToken::new();

        let task_state = Arc::clone(&state);
        let task_cancel = cancel.clone();
        let threshold = poll_interval + anr_threshold;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(TICK);
            loop {
                tokio::select! {
                    _ = task_cancel.cancelled() => {
                        debug!("Watchdog timer cancelled");
                        break;
                    }
                    _ = ticker.tick() => {
                        let fire = {
                            let mut state = lock(&task_state);
                            let gap = state.last_poll.elapsed();

                            let mut fire = false;
                            if !state.triggered && gap > threshold {
                                state.triggered = true;
                                fire = state.enabled;
                            }
                            if gap < threshold {
                                state.triggered = false;
                            }
                            fire
                        };

                        if fire {
                            callback();
                        }
                    }
                }
            }
        });

        Self { state, cancel }
    }

    /// Records liveness now.
    pub fn poll(&self) {
        self.handle().poll();
    }

    /// Suppresses or resumes firing.
    ///
    /// Disabling does not clear edge state: a stall that elapsed while
    /// disabled will not fire retroactively on re-enable.
    pub fn set_enabled(&self, enabled: bool) {
        self.handle().set_enabled(enabled);
    }

    /// A clonable handle for power/visibility listeners.
    pub fn handle(&self) -> WatchdogHandle {
        WatchdogHandle {
            state: Arc::clone(&self.state),
        }
    }
}

impl Drop for WatchdogTimer {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl WatchdogHandle {
    pub fn poll(&self) {
        lock(&self.state).last_poll = Instant::now();
    }

    pub fn set_enabled(&self, enabled: bool) {
        lock(&self.state).enabled = enabled;
    }
}

fn lock(state: &StdMutex<TimerState>) -> std::sync::MutexGuard<'_, TimerState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn counting_timer(
        poll_interval_ms: u64,
        anr_threshold_ms: u64,
    ) -> (WatchdogTimer, Arc<AtomicUsize>) {
        let fires = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fires);
        let timer = WatchdogTimer::spawn(
            Duration::from_millis(poll_interval_ms),
            Duration::from_millis(anr_threshold_ms),
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
            },
        );
        (timer, fires)
    }

    #[tokio::test(start_paused = true)]
    async fn fires_exactly_once_per_stall() {
        let (timer, fires) = counting_timer(100, 1000);

        timer.poll();
        tokio::time::sleep(Duration::from_millis(1090)).await;
        assert_eq!(fires.load(Ordering::SeqCst), 0, "below threshold");

        tokio::time::sleep(Duration::from_millis(110)).await;
        assert_eq!(fires.load(Ordering::SeqCst), 1, "first check past 1100ms");

        // Stall continues: no second fire.
        tokio::time::sleep(Duration::from_millis(2000)).await;
        assert_eq!(fires.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn refires_only_after_liveness_resumes() {
        let (timer, fires) = counting_timer(100, 1000);

        timer.poll();
        tokio::time::sleep(Duration::from_millis(1200)).await;
        assert_eq!(fires.load(Ordering::SeqCst), 1);

        // Liveness resumes, then a fresh stall.
        timer.poll();
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(fires.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_millis(700)).await;
        assert_eq!(fires.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn disabled_timer_does_not_fire() {
        let (timer, fires) = counting_timer(100, 1000);

        timer.set_enabled(false);
        timer.poll();
        tokio::time::sleep(Duration::from_millis(2000)).await;
        assert_eq!(fires.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn reenabling_does_not_fire_for_elapsed_gap() {
        let (timer, fires) = counting_timer(100, 1000);

        timer.set_enabled(false);
        timer.poll();
        tokio::time::sleep(Duration::from_millis(2000)).await;
        assert_eq!(fires.load(Ordering::SeqCst), 0);

        // The stalled gap was consumed while disabled; re-enabling must
        // not fire retroactively.
        timer.set_enabled(true);
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(fires.load(Ordering::SeqCst), 0);

        // Detection resumes for a new stall.
        timer.poll();
        tokio::time::sleep(Duration::from_millis(1200)).await;
        assert_eq!(fires.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn drop_cancels_background_task() {
        let (timer, fires) = counting_timer(100, 1000);

        timer.poll();
        drop(timer);

        tokio::time::sleep(Duration::from_millis(5000)).await;
        assert_eq!(fires.load(Ordering::SeqCst), 0);
    }
}
