//! Reserved-scheme request encoding
//!
//! When the privileged bridge cannot be established (stricter
//! isolation settings), content processes issue network-like requests
//! against a reserved scheme the host intercepts. The channel rides in
//! the URL host; the JSON payload rides in the request body.

use faultline_core::RelayMessage;
use url::Url;

use crate::error::RelayError;
use crate::Channel;

/// The reserved scheme the host registers an interceptor for
pub const PROTOCOL_SCHEME: &str = "faultline-ipc";

/// A network-like request captured by the host's interceptor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterceptedRequest {
    pub url: String,
    pub body: Vec<u8>,
}

/// Encodes a message as a reserved-scheme request.
pub fn encode_request(message: &RelayMessage) -> Result<InterceptedRequest, RelayError> {
    let channel = Channel::for_message(message);
    Ok(InterceptedRequest {
        url: format!("{PROTOCOL_SCHEME}://{}", channel.name()),
        body: serde_json::to_vec(message)?,
    })
}

/// Decodes an intercepted request back into a message.
///
/// The decoded message kind must belong on the channel named in the
/// URL; a mismatch is a protocol error and the message is dropped.
pub fn decode_request(request: &InterceptedRequest) -> Result<(Channel, RelayMessage), RelayError> {
    let url =
        Url::parse(&request.url).map_err(|e| RelayError::InvalidUrl(e.to_string()))?;

    if url.scheme() != PROTOCOL_SCHEME {
        return Err(RelayError::UnexpectedScheme(url.scheme().to_string()));
    }

    let channel_name = url
        .host_str()
        .ok_or_else(|| RelayError::InvalidUrl(request.url.clone()))?;
    let channel = Channel::from_name(channel_name)
        .ok_or_else(|| RelayError::UnknownChannel(channel_name.to_string()))?;

    let message: RelayMessage = serde_json::from_slice(&request.body)?;

    if Channel::for_message(&message) != channel {
        return Err(RelayError::ChannelMismatch(channel_name.to_string()));
    }

    Ok((channel, message))
}

#[cfg(test)]
mod tests {
    use faultline_core::domain::breadcrumb::Breadcrumb;
    use faultline_core::{Event, ProcessStatus, ScopeData, WatchdogConfig};

    use super::*;

    fn all_kinds() -> Vec<RelayMessage> {
        vec![
            RelayMessage::Event {
                event: Event::new(),
            },
            RelayMessage::Breadcrumb {
                breadcrumb: Breadcrumb::new("ui.click", "button pressed"),
            },
            RelayMessage::Scope {
                scope: ScopeData::default(),
            },
            RelayMessage::AnrStatus {
                status: ProcessStatus::Alive,
                config: WatchdogConfig::default(),
            },
            RelayMessage::Opaque {
                payload: serde_json::json!({"raw": true}),
            },
        ]
    }

    #[test]
    fn every_kind_round_trips() {
        for message in all_kinds() {
            let request = encode_request(&message).unwrap();
            assert!(request.url.starts_with("faultline-ipc://"));

            let (channel, decoded) = decode_request(&request).unwrap();
            assert_eq!(channel, Channel::for_message(&message));
            assert_eq!(
                serde_json::to_value(&decoded).unwrap(),
                serde_json::to_value(&message).unwrap()
            );
        }
    }

    #[test]
    fn wrong_scheme_rejected() {
        let request = InterceptedRequest {
            url: "https://faultline.event".to_string(),
            body: b"{}".to_vec(),
        };
        assert!(matches!(
            decode_request(&request),
            Err(RelayError::UnexpectedScheme(_))
        ));
    }

    #[test]
    fn unknown_channel_rejected() {
        let request = InterceptedRequest {
            url: "faultline-ipc://faultline.metrics".to_string(),
            body: b"{}".to_vec(),
        };
        assert!(matches!(
            decode_request(&request),
            Err(RelayError::UnknownChannel(_))
        ));
    }

    #[test]
    fn malformed_body_rejected() {
        let request = InterceptedRequest {
            url: "faultline-ipc://faultline.event".to_string(),
            body: b"not json".to_vec(),
        };
        assert!(matches!(
            decode_request(&request),
            Err(RelayError::Decode(_))
        ));
    }

    #[test]
    fn kind_must_match_channel() {
        let scope = RelayMessage::Scope {
            scope: ScopeData::default(),
        };
        let mut request = encode_request(&scope).unwrap();
        request.url = "faultline-ipc://faultline.event".to_string();

        assert!(matches!(
            decode_request(&request),
            Err(RelayError::ChannelMismatch(_))
        ));
    }
}
