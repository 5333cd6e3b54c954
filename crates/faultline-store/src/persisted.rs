//! Durable JSON stores
//!
//! A [`PersistedStore`] holds one JSON-serializable value in a single
//! file under the configured cache directory. The file is rewritten
//! whole on every flush, never diffed. [`BufferedStore`] adds write
//! coalescing: rapid sets within the debounce window collapse into one
//! disk write carrying the latest value.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::{Duration, SystemTime};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::warn;

use crate::mutex::SerialMutex;

/// Stores data serialized to a JSON file.
///
/// The value is lazily hydrated from disk on first read, falling back
/// to the initial value if no file exists or it cannot be parsed.
/// Reads and writes are serialized through a [`SerialMutex`] so there
/// are no races between hydration and writes.
pub struct PersistedStore<T> {
    path: PathBuf,
    initial: T,
    data: StdMutex<Option<T>>,
    lock: SerialMutex,
}

impl<T> PersistedStore<T>
where
    T: Serialize + DeserializeOwned + Clone,
{
    /// Creates a new store writing to `<id>.json` under `dir`.
    pub fn new(dir: &Path, id: &str, initial: T) -> Self {
        Self {
            path: dir.join(format!("{id}.json")),
            initial,
            data: StdMutex::new(None),
            lock: SerialMutex::new(),
        }
    }

    /// Returns the current value, hydrating from disk on first access.
    pub async fn get(&self) -> T {
        self.lock
            .run_exclusive(|| async {
                if let Some(data) = self.cached() {
                    return data;
                }

                let data = match tokio::fs::read(&self.path).await {
                    Ok(bytes) => match serde_json::from_slice(&bytes) {
                        Ok(value) => value,
                        Err(e) => {
                            warn!(path = %self.path.display(), error = %e, "Store file corrupt, using initial value");
                            self.initial.clone()
                        }
                    },
                    Err(_) => self.initial.clone(),
                };

                *self.data_slot() = Some(data.clone());
                data
            })
            .await
    }

    /// Replaces the value and rewrites the backing file.
    ///
    /// Write failures (antivirus scanners, filesystem trouble, network
    /// drives) are logged and swallowed; the in-memory value stays
    /// authoritative.
    pub async fn set(&self, data: T) {
        self.lock
            .run_exclusive(|| async {
                *self.data_slot() = Some(data.clone());
                self.write_to_disk(&data).await;
            })
            .await
    }

    /// Updates the value by passing it through `f` (get-then-set).
    pub async fn update<F>(&self, f: F)
    where
        F: FnOnce(T) -> T,
    {
        let current = self.get().await;
        self.set(f(current)).await;
    }

    /// Returns the store to its initial value.
    pub async fn clear(&self) {
        self.set(self.initial.clone()).await;
    }

    /// Last modification time of the backing file, if it exists.
    pub async fn modified_time(&self) -> Option<SystemTime> {
        tokio::fs::metadata(&self.path)
            .await
            .ok()
            .and_then(|m| m.modified().ok())
    }

    async fn write_to_disk(&self, data: &T) {
        let bytes = match serde_json::to_vec(data) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Failed to serialize store value");
                return;
            }
        };

        if let Some(parent) = self.path.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                warn!(path = %parent.display(), error = %e, "Failed to create store directory");
                return;
            }
        }

        if let Err(e) = tokio::fs::write(&self.path, bytes).await {
            warn!(path = %self.path.display(), error = %e, "Failed to write to store");
        }
    }

    fn cached(&self) -> Option<T> {
        self.data_slot().clone()
    }

    fn data_slot(&self) -> std::sync::MutexGuard<'_, Option<T>> {
        self.data.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

struct Pending<T> {
    data: Option<T>,
    flush_scheduled: bool,
}

/// Extends [`PersistedStore`] to coalesce writes.
///
/// `set` replaces the in-memory buffer immediately and schedules one
/// debounced flush; sets landing before the flush fires simply
/// overwrite the buffer (last-write-wins).
pub struct BufferedStore<T> {
    store: Arc<PersistedStore<T>>,
    debounce: Duration,
    pending: Arc<StdMutex<Pending<T>>>,
}

impl<T> BufferedStore<T>
where
    T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    pub fn new(dir: &Path, id: &str, initial: T, debounce: Duration) -> Self {
        Self {
            store: Arc::new(PersistedStore::new(dir, id, initial)),
            debounce,
            pending: Arc::new(StdMutex::new(Pending {
                data: None,
                flush_scheduled: false,
            })),
        }
    }

    /// Replaces the value and schedules a coalesced flush.
    ///
    /// Must be called from within a tokio runtime.
    pub fn set(&self, data: T) {
        let mut pending = lock(&self.pending);
        pending.data = Some(data);

        if !pending.flush_scheduled {
            pending.flush_scheduled = true;
            let store = Arc::clone(&self.store);
            let slot = Arc::clone(&self.pending);
            let debounce = self.debounce;

            tokio::spawn(async move {
                tokio::time::sleep(debounce).await;
                let data = {
                    let mut pending = lock(&slot);
                    pending.flush_scheduled = false;
                    pending.data.take()
                };
                if let Some(data) = data {
                    store.set(data).await;
                }
            });
        }
    }

    /// Returns the latest value: a pending write if one is buffered,
    /// otherwise whatever the underlying store holds.
    pub async fn get(&self) -> T {
        let buffered = lock(&self.pending).data.clone();
        match buffered {
            Some(data) => data,
            None => self.store.get().await,
        }
    }

    /// Flushes any buffered write to disk immediately.
    pub async fn flush(&self) {
        let data = {
            let mut pending = lock(&self.pending);
            pending.data.take()
        };
        if let Some(data) = data {
            self.store.set(data).await;
        }
    }

    pub async fn modified_time(&self) -> Option<SystemTime> {
        self.store.modified_time().await
    }
}

fn lock<T>(slot: &StdMutex<Pending<T>>) -> std::sync::MutexGuard<'_, Pending<T>> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    use super::*;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct State {
        counter: u32,
        label: String,
    }

    fn initial() -> State {
        State {
            counter: 0,
            label: "initial".to_string(),
        }
    }

    #[tokio::test]
    async fn get_returns_initial_when_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = PersistedStore::new(dir.path(), "state", initial());
        assert_eq!(store.get().await, initial());
    }

    #[tokio::test]
    async fn set_then_get_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = PersistedStore::new(dir.path(), "state", initial());

        let value = State {
            counter: 7,
            label: "written".to_string(),
        };
        store.set(value.clone()).await;
        assert_eq!(store.get().await, value);
    }

    #[tokio::test]
    async fn value_survives_across_instances() {
        let dir = tempfile::tempdir().unwrap();

        {
            let store = PersistedStore::new(dir.path(), "state", initial());
            store
                .set(State {
                    counter: 3,
                    label: "persisted".to_string(),
                })
                .await;
        }

        let rehydrated = PersistedStore::new(dir.path(), "state", initial());
        assert_eq!(rehydrated.get().await.counter, 3);
    }

    #[tokio::test]
    async fn corrupt_file_falls_back_to_initial() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("state.json"), b"{not json").unwrap();

        let store = PersistedStore::new(dir.path(), "state", initial());
        assert_eq!(store.get().await, initial());
    }

    #[tokio::test]
    async fn update_is_get_then_set() {
        let dir = tempfile::tempdir().unwrap();
        let store = PersistedStore::new(dir.path(), "state", initial());

        store
            .update(|mut state| {
                state.counter += 1;
                state
            })
            .await;
        store
            .update(|mut state| {
                state.counter += 1;
                state
            })
            .await;

        assert_eq!(store.get().await.counter, 2);
    }

    #[tokio::test]
    async fn clear_resets_to_initial() {
        let dir = tempfile::tempdir().unwrap();
        let store = PersistedStore::new(dir.path(), "state", initial());

        store
            .set(State {
                counter: 9,
                label: "x".to_string(),
            })
            .await;
        store.clear().await;
        assert_eq!(store.get().await, initial());
    }

    #[tokio::test]
    async fn modified_time_reflects_writes() {
        let dir = tempfile::tempdir().unwrap();
        let store = PersistedStore::new(dir.path(), "state", initial());

        assert!(store.modified_time().await.is_none());
        store.set(initial()).await;
        assert!(store.modified_time().await.is_some());
    }

    #[tokio::test]
    async fn buffered_store_coalesces_rapid_sets() {
        let dir = tempfile::tempdir().unwrap();
        let store = BufferedStore::new(
            dir.path(),
            "state",
            initial(),
            Duration::from_millis(50),
        );

        for counter in 1..=5 {
            store.set(State {
                counter,
                label: "buffered".to_string(),
            });
        }

        // Nothing flushed yet, but the buffer already reads back.
        assert!(!dir.path().join("state.json").exists());
        assert_eq!(store.get().await.counter, 5);

        tokio::time::sleep(Duration::from_millis(120)).await;

        // One flush, carrying the last value.
        let on_disk: State =
            serde_json::from_slice(&std::fs::read(dir.path().join("state.json")).unwrap()).unwrap();
        assert_eq!(on_disk.counter, 5);
    }

    #[tokio::test]
    async fn buffered_store_explicit_flush() {
        let dir = tempfile::tempdir().unwrap();
        let store = BufferedStore::new(dir.path(), "state", initial(), Duration::from_secs(60));

        store.set(State {
            counter: 2,
            label: "flushed".to_string(),
        });
        store.flush().await;

        let on_disk: State =
            serde_json::from_slice(&std::fs::read(dir.path().join("state.json")).unwrap()).unwrap();
        assert_eq!(on_disk.counter, 2);
    }
}
