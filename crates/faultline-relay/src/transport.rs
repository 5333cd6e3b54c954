//! Content-process transport strategies
//!
//! All transports are fire-and-forget: a failed send is logged and the
//! message dropped. No acknowledgement exists for this internal hop,
//! so nothing here may block or error into the caller.

use std::sync::Arc;

use faultline_core::RelayMessage;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::scheme::{encode_request, InterceptedRequest};

/// A fire-and-forget message transport to the host.
pub trait RelayTransport: Send + Sync {
    fn send(&self, message: &RelayMessage);
}

/// Direct channel mode: typed messages over a point-to-point channel
/// established by the privileged bridge.
///
/// Messages are serialized at the boundary, which both deep-copies the
/// payload and strips non-serializable internal fields.
#[derive(Clone)]
pub struct ChannelTransport {
    tx: mpsc::UnboundedSender<Vec<u8>>,
}

impl ChannelTransport {
    pub fn new(tx: mpsc::UnboundedSender<Vec<u8>>) -> Self {
        Self { tx }
    }
}

impl RelayTransport for ChannelTransport {
    fn send(&self, message: &RelayMessage) {
        let bytes = match serde_json::to_vec(message) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(error = %e, "Dropping unserializable relay message");
                return;
            }
        };
        if self.tx.send(bytes).is_err() {
            debug!("Host end of relay channel is gone, message dropped");
        }
    }
}

/// Issues an intercepted request toward the host.
///
/// Implementations put the request on the wire; they must not block.
pub trait RequestSink: Send + Sync {
    fn issue(&self, request: InterceptedRequest);
}

/// Intercepted-request mode: payloads encoded into reserved-scheme
/// requests the host decodes in its interceptor.
#[derive(Clone)]
pub struct SchemeTransport {
    sink: Arc<dyn RequestSink>,
}

impl SchemeTransport {
    pub fn new(sink: Arc<dyn RequestSink>) -> Self {
        Self { sink }
    }
}

impl RelayTransport for SchemeTransport {
    fn send(&self, message: &RelayMessage) {
        match encode_request(message) {
            Ok(request) => self.sink.issue(request),
            Err(e) => warn!(error = %e, "Dropping unencodable relay message"),
        }
    }
}

/// Combined mode: prefer the direct channel, fall back to intercepted
/// requests when the bridge was never initialized.
pub struct CombinedTransport {
    bridge: Option<ChannelTransport>,
    fallback: SchemeTransport,
}

impl CombinedTransport {
    /// `bridge` is `Some` iff the privileged bridge object was found
    /// in the content process's global scope.
    pub fn new(bridge: Option<ChannelTransport>, fallback: SchemeTransport) -> Self {
        if bridge.is_none() {
            debug!("Bridge not initialized, relaying over the reserved scheme");
        }
        Self { bridge, fallback }
    }
}

impl RelayTransport for CombinedTransport {
    fn send(&self, message: &RelayMessage) {
        match &self.bridge {
            Some(bridge) => bridge.send(message),
            None => self.fallback.send(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use faultline_core::Event;

    use super::*;

    struct CollectingSink(Mutex<Vec<InterceptedRequest>>);

    impl RequestSink for CollectingSink {
        fn issue(&self, request: InterceptedRequest) {
            self.0.lock().unwrap().push(request);
        }
    }

    fn event_message() -> RelayMessage {
        RelayMessage::Event {
            event: Event::new(),
        }
    }

    #[tokio::test]
    async fn channel_transport_delivers_serialized_bytes() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let transport = ChannelTransport::new(tx);

        transport.send(&event_message());

        let bytes = rx.recv().await.unwrap();
        let decoded: RelayMessage = serde_json::from_slice(&bytes).unwrap();
        assert!(matches!(decoded, RelayMessage::Event { .. }));
    }

    #[tokio::test]
    async fn channel_transport_swallows_closed_channel() {
        let (tx, rx) = mpsc::unbounded_channel::<Vec<u8>>();
        drop(rx);
        let transport = ChannelTransport::new(tx);

        // Must not panic or error.
        transport.send(&event_message());
    }

    #[test]
    fn combined_prefers_bridge() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink = Arc::new(CollectingSink(Mutex::new(Vec::new())));
        let transport = CombinedTransport::new(
            Some(ChannelTransport::new(tx)),
            SchemeTransport::new(sink.clone()),
        );

        transport.send(&event_message());

        assert!(rx.try_recv().is_ok());
        assert!(sink.0.lock().unwrap().is_empty());
    }

    #[test]
    fn combined_falls_back_without_bridge() {
        let sink = Arc::new(CollectingSink(Mutex::new(Vec::new())));
        let transport = CombinedTransport::new(None, SchemeTransport::new(sink.clone()));

        transport.send(&event_message());

        let requests = sink.0.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].url, "faultline-ipc://faultline.event");
    }
}
