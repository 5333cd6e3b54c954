//! Faultline Core - Domain types and configuration
//!
//! Provides:
//! - `Config`: typed configuration with validation and a builder
//! - `domain`: event, breadcrumb, scope, and relay message types
//! - `merge`: event and scope merge semantics
//! - `normalize`: stack frame path normalization

pub mod config;
pub mod domain;
pub mod merge;
pub mod normalize;

pub use config::{Config, ConfigBuilder};
pub use domain::errors::DomainError;
pub use domain::event::{Event, Exception, Level, SdkInfo, StackFrame, Stacktrace};
pub use domain::breadcrumb::Breadcrumb;
pub use domain::message::{ProcessId, ProcessStatus, RelayMessage, WatchdogConfig};
pub use domain::scope::ScopeData;
pub use merge::{merge_events, merge_scope};
