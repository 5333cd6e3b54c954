//! Host-side message dispatch
//!
//! Decodes inbound messages by kind and routes them to the host's
//! handler. Malformed payloads are logged and dropped; nothing here
//! throws into the host's lifecycle handlers.

use std::sync::Arc;

use faultline_core::domain::breadcrumb::Breadcrumb;
use faultline_core::{Event, ProcessId, ProcessStatus, RelayMessage, ScopeData, WatchdogConfig};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::warn;

use crate::scheme::{decode_request, InterceptedRequest};

/// Receives routed messages from content processes.
///
/// Payloads handed to these methods are already deep copies: they were
/// serialized at the process boundary, so handlers own them outright.
pub trait RelayHandler: Send + Sync {
    fn on_event(&self, source: ProcessId, event: Event);
    fn on_breadcrumb(&self, source: ProcessId, breadcrumb: Breadcrumb);
    fn on_scope(&self, source: ProcessId, scope: ScopeData);
    fn on_anr_status(&self, source: ProcessId, status: ProcessStatus, config: WatchdogConfig);
    fn on_opaque(&self, source: ProcessId, payload: Value);
}

/// Routes decoded messages to a [`RelayHandler`].
pub struct RelayDispatcher {
    handler: Arc<dyn RelayHandler>,
}

impl RelayDispatcher {
    pub fn new(handler: Arc<dyn RelayHandler>) -> Self {
        Self { handler }
    }

    /// Delivery over the direct channel.
    pub fn dispatch_bytes(&self, source: ProcessId, bytes: &[u8]) {
        match serde_json::from_slice::<RelayMessage>(bytes) {
            Ok(message) => self.route(source, message),
            Err(e) => warn!(source, error = %e, "Dropping undecodable relay message"),
        }
    }

    /// Delivery over the reserved-scheme interceptor.
    pub fn dispatch_request(&self, source: ProcessId, request: &InterceptedRequest) {
        match decode_request(request) {
            Ok((_channel, message)) => self.route(source, message),
            Err(e) => warn!(source, error = %e, "Dropping undecodable intercepted request"),
        }
    }

    /// Drains a content process's channel until it closes.
    pub async fn run_channel(&self, source: ProcessId, mut rx: mpsc::UnboundedReceiver<Vec<u8>>) {
        while let Some(bytes) = rx.recv().await {
            self.dispatch_bytes(source, &bytes);
        }
    }

    fn route(&self, source: ProcessId, message: RelayMessage) {
        match message {
            RelayMessage::Event { event } => self.handler.on_event(source, event),
            RelayMessage::Breadcrumb { breadcrumb } => {
                self.handler.on_breadcrumb(source, breadcrumb)
            }
            RelayMessage::Scope { scope } => self.handler.on_scope(source, scope),
            RelayMessage::AnrStatus { status, config } => {
                self.handler.on_anr_status(source, status, config)
            }
            RelayMessage::Opaque { payload } => self.handler.on_opaque(source, payload),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::scheme::encode_request;
    use crate::transport::{ChannelTransport, RelayTransport};

    #[derive(Default)]
    struct Recording {
        events: Mutex<Vec<(ProcessId, Event)>>,
        breadcrumbs: Mutex<Vec<(ProcessId, Breadcrumb)>>,
        scopes: Mutex<Vec<(ProcessId, ScopeData)>>,
        statuses: Mutex<Vec<(ProcessId, ProcessStatus)>>,
        opaques: Mutex<Vec<(ProcessId, Value)>>,
    }

    impl RelayHandler for Recording {
        fn on_event(&self, source: ProcessId, event: Event) {
            self.events.lock().unwrap().push((source, event));
        }
        fn on_breadcrumb(&self, source: ProcessId, breadcrumb: Breadcrumb) {
            self.breadcrumbs.lock().unwrap().push((source, breadcrumb));
        }
        fn on_scope(&self, source: ProcessId, scope: ScopeData) {
            self.scopes.lock().unwrap().push((source, scope));
        }
        fn on_anr_status(&self, source: ProcessId, status: ProcessStatus, _config: WatchdogConfig) {
            self.statuses.lock().unwrap().push((source, status));
        }
        fn on_opaque(&self, source: ProcessId, payload: Value) {
            self.opaques.lock().unwrap().push((source, payload));
        }
    }

    #[test]
    fn routes_each_kind_to_its_handler() {
        let handler = Arc::new(Recording::default());
        let dispatcher = RelayDispatcher::new(handler.clone());

        let messages = [
            RelayMessage::Event {
                event: Event::new(),
            },
            RelayMessage::Breadcrumb {
                breadcrumb: Breadcrumb::new("ui.click", "pressed"),
            },
            RelayMessage::Scope {
                scope: ScopeData::default(),
            },
            RelayMessage::AnrStatus {
                status: ProcessStatus::Hidden,
                config: WatchdogConfig::default(),
            },
            RelayMessage::Opaque {
                payload: serde_json::json!({"replay": true}),
            },
        ];

        for message in &messages {
            dispatcher.dispatch_bytes(12, &serde_json::to_vec(message).unwrap());
        }

        assert_eq!(handler.events.lock().unwrap().len(), 1);
        assert_eq!(handler.breadcrumbs.lock().unwrap().len(), 1);
        assert_eq!(handler.scopes.lock().unwrap().len(), 1);
        assert_eq!(
            handler.statuses.lock().unwrap()[0],
            (12, ProcessStatus::Hidden)
        );
        assert_eq!(handler.opaques.lock().unwrap().len(), 1);
    }

    #[test]
    fn malformed_bytes_are_dropped_silently() {
        let handler = Arc::new(Recording::default());
        let dispatcher = RelayDispatcher::new(handler.clone());

        dispatcher.dispatch_bytes(1, b"garbage");
        dispatcher.dispatch_bytes(1, br#"{"kind":"unknown"}"#);

        assert!(handler.events.lock().unwrap().is_empty());
        assert!(handler.opaques.lock().unwrap().is_empty());
    }

    #[test]
    fn intercepted_request_dispatch() {
        let handler = Arc::new(Recording::default());
        let dispatcher = RelayDispatcher::new(handler.clone());

        let request = encode_request(&RelayMessage::Scope {
            scope: ScopeData::default(),
        })
        .unwrap();
        dispatcher.dispatch_request(4, &request);

        assert_eq!(handler.scopes.lock().unwrap()[0].0, 4);
    }

    #[test]
    fn bad_intercepted_request_is_dropped() {
        let handler = Arc::new(Recording::default());
        let dispatcher = RelayDispatcher::new(handler.clone());

        dispatcher.dispatch_request(
            4,
            &InterceptedRequest {
                url: "faultline-ipc://faultline.event".to_string(),
                body: b"junk".to_vec(),
            },
        );

        assert!(handler.events.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn channel_end_to_end() {
        let handler = Arc::new(Recording::default());
        let dispatcher = RelayDispatcher::new(handler.clone());

        let (tx, rx) = mpsc::unbounded_channel();
        let transport = ChannelTransport::new(tx);

        transport.send(&RelayMessage::Breadcrumb {
            breadcrumb: Breadcrumb::new("navigation", "home -> settings"),
        });
        drop(transport);

        dispatcher.run_channel(8, rx).await;

        let breadcrumbs = handler.breadcrumbs.lock().unwrap();
        assert_eq!(breadcrumbs.len(), 1);
        assert_eq!(breadcrumbs[0].0, 8);
        assert_eq!(
            breadcrumbs[0].1.category.as_deref(),
            Some("navigation")
        );
    }
}
