//! Response-header injection collaborator
//!
//! The privileged native stack capture API is gated behind a document
//! policy. The core does not own any network session; it only
//! registers a response-header mutator on a session port so the
//! policy header is present on every response.

use std::collections::BTreeMap;

/// Response headers as seen by the mutator. A header may carry
/// multiple values.
pub type ResponseHeaders = BTreeMap<String, Vec<String>>;

/// Policy header enabling native call-stack capture
pub const CAPTURE_POLICY_HEADER: &str = "Document-Policy";
pub const CAPTURE_POLICY_VALUE: &str = "include-js-call-stacks-in-crash-reports";

/// Port to a network session that can mutate response headers.
pub trait NetworkSession {
    /// Registers a mutator run on every response's headers.
    fn on_headers_received(&self, mutator: Box<dyn Fn(&mut ResponseHeaders) + Send + Sync>);
}

/// Appends a header value, preserving any existing values.
pub fn add_header(headers: &mut ResponseHeaders, name: &str, value: &str) {
    headers
        .entry(name.to_string())
        .or_default()
        .push(value.to_string());
}

/// Registers the capture policy header on a session.
pub fn inject_capture_policy_header(session: &dyn NetworkSession) {
    session.on_headers_received(Box::new(|headers| {
        add_header(headers, CAPTURE_POLICY_HEADER, CAPTURE_POLICY_VALUE);
    }));
}
