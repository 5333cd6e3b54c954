//! Faultline Relay - Content-to-host message transport
//!
//! Content processes forward captured events, breadcrumbs, scope
//! updates, and ANR liveness status to the host over one of two
//! transports: a point-to-point channel established by a privileged
//! bridge, or requests against the reserved `faultline-ipc` scheme
//! that the host intercepts. Combined mode prefers the channel and
//! falls back to interception when the bridge was never initialized.
//!
//! Delivery is fire-and-forget. The host treats every message kind as
//! safe to drop: there are no acknowledgements on this internal hop.

pub mod dispatch;
pub mod error;
pub mod scheme;
pub mod transport;

pub use dispatch::{RelayDispatcher, RelayHandler};
pub use error::RelayError;
pub use scheme::{decode_request, encode_request, InterceptedRequest, PROTOCOL_SCHEME};
pub use transport::{ChannelTransport, CombinedTransport, RelayTransport, RequestSink,
    SchemeTransport};

use faultline_core::RelayMessage;

/// The reserved channels, one per message kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Event,
    Breadcrumb,
    Scope,
    Status,
    Envelope,
}

impl Channel {
    pub fn name(&self) -> &'static str {
        match self {
            Channel::Event => "faultline.event",
            Channel::Breadcrumb => "faultline.breadcrumb",
            Channel::Scope => "faultline.scope",
            Channel::Status => "faultline.anr-status",
            Channel::Envelope => "faultline.envelope",
        }
    }

    pub fn from_name(name: &str) -> Option<Channel> {
        match name {
            "faultline.event" => Some(Channel::Event),
            "faultline.breadcrumb" => Some(Channel::Breadcrumb),
            "faultline.scope" => Some(Channel::Scope),
            "faultline.anr-status" => Some(Channel::Status),
            "faultline.envelope" => Some(Channel::Envelope),
            _ => None,
        }
    }

    /// The channel a message travels on.
    pub fn for_message(message: &RelayMessage) -> Channel {
        match message {
            RelayMessage::Event { .. } => Channel::Event,
            RelayMessage::Breadcrumb { .. } => Channel::Breadcrumb,
            RelayMessage::Scope { .. } => Channel::Scope,
            RelayMessage::AnrStatus { .. } => Channel::Status,
            RelayMessage::Opaque { .. } => Channel::Envelope,
        }
    }
}
