//! An async mutex that queues up tasks for a shared resource.
//!
//! Waiters are serviced in strict FIFO order from a weighted permit
//! counter. `run_exclusive` acquires a single permit, but the dispatch
//! loop supports arbitrary weights: it grants while the remaining
//! weight covers the head waiter and re-reads the counter after every
//! grant, so a larger acquisition can never be double-granted.
//!
//! Release is guard-based (dropping the [`Releaser`] releases) and
//! idempotent, so a task that returns an error or panics still
//! unblocks the queue, and a caller releasing twice cannot inflate the
//! permit counter.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use tokio::sync::oneshot;

struct Entry {
    weight: usize,
    tx: oneshot::Sender<Releaser>,
}

struct Inner {
    value: usize,
    entries: VecDeque<Entry>,
}

/// A FIFO exclusive-access task queue.
///
/// Cloning is cheap and clones share the same queue.
#[derive(Clone)]
pub struct SerialMutex {
    inner: Arc<StdMutex<Inner>>,
}

impl Default for SerialMutex {
    fn default() -> Self {
        Self::new()
    }
}

impl SerialMutex {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(StdMutex::new(Inner {
                value: 1,
                entries: VecDeque::new(),
            })),
        }
    }

    /// Runs `task` once all previously queued tasks have completed.
    ///
    /// Tasks never overlap. The permit is released on every exit path,
    /// including an early return or panic inside `task`.
    pub async fn run_exclusive<T, F, Fut>(&self, task: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let _permit = self.acquire(1).await;
        task().await
    }

    /// Queues an acquisition of `weight` permits.
    pub(crate) async fn acquire(&self, weight: usize) -> Releaser {
        let rx = {
            let mut inner = self.lock();
            let (tx, rx) = oneshot::channel();
            inner.entries.push_back(Entry { weight, tx });
            self.dispatch(&mut inner);
            rx
        };

        match rx.await {
            Ok(releaser) => releaser,
            // The sender lives in the shared queue we hold an Arc to,
            // so it cannot be dropped before granting.
            Err(_) => Releaser {
                mutex: self.clone(),
                weight: 0,
                released: true,
            },
        }
    }

    fn release_weight(&self, weight: usize) {
        let mut inner = self.lock();
        inner.value += weight;
        self.dispatch(&mut inner);
    }

    /// Grants queued waiters while the remaining weight covers the head
    /// of the queue.
    fn dispatch(&self, inner: &mut Inner) {
        loop {
            match inner.entries.front() {
                Some(entry) if entry.weight <= inner.value => {}
                _ => break,
            }
            let Some(entry) = inner.entries.pop_front() else {
                break;
            };

            inner.value -= entry.weight;
            let releaser = Releaser {
                mutex: self.clone(),
                weight: entry.weight,
                released: false,
            };

            if let Err(mut unclaimed) = entry.tx.send(releaser) {
                // The waiter was cancelled before its turn came up.
                // Restore the weight directly; the lock is already held
                // so the releaser must not run.
                unclaimed.released = true;
                inner.value += unclaimed.weight;
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[cfg(test)]
    fn available(&self) -> usize {
        self.lock().value
    }
}

/// Releases a granted acquisition back to its [`SerialMutex`].
///
/// Released automatically on drop. Releasing more than once has the
/// same effect as releasing once.
pub struct Releaser {
    mutex: SerialMutex,
    weight: usize,
    released: bool,
}

impl Releaser {
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.mutex.release_weight(self.weight);
    }
}

impl Drop for Releaser {
    fn drop(&mut self) {
        self.release();
    }
}
