//! Faultline Uploader - Crash dump discovery and delivery
//!
//! Scans the crash writer's output directory, dedupes against a
//! known-set, evicts dumps past retention, and delivers the rest to
//! the remote collector as multipart POSTs with an enriching event
//! sidecar. Delivery is at-least-once; the collector dedupes.

pub mod layout;
pub mod uploader;

pub use layout::DumpLayout;
pub use uploader::{MinidumpDescriptor, MinidumpUploader, UploadError};
