//! Domain model for crash and error telemetry
//!
//! The types in this module are the closed set of payloads the core
//! reads and writes. Everything else an event may carry travels in the
//! opaque passthrough section and is never inspected.

pub mod breadcrumb;
pub mod errors;
pub mod event;
pub mod message;
pub mod scope;

pub use breadcrumb::Breadcrumb;
pub use errors::DomainError;
pub use event::Event;
pub use message::RelayMessage;
pub use scope::ScopeData;
