//! Faultline Store - Serialized persistence layer
//!
//! Provides:
//! - `SerialMutex`: strict-FIFO exclusive-access task queue
//! - `PersistedStore`: durable whole-file-rewrite JSON state
//! - `BufferedStore`: debounced write coalescing on top of it
//!
//! Store files are owned exclusively by the host process; content
//! processes never touch the filesystem directly.

pub mod mutex;
pub mod persisted;

pub use mutex::{Releaser, SerialMutex};
pub use persisted::{BufferedStore, PersistedStore};
