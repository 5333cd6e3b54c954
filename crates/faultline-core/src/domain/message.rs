//! Relay message kinds
//!
//! The closed set of messages content processes may send the host.
//! Payloads the core never inspects travel in the `Opaque` variant.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::breadcrumb::Breadcrumb;
use super::errors::DomainError;
use super::event::Event;
use super::scope::ScopeData;

/// Identifier of a content process as seen by the host
pub type ProcessId = u32;

/// Liveness status of a watched content process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessStatus {
    /// The process's task queue is responsive
    Alive,
    /// The process became visible (focus / resume)
    Visible,
    /// The process became hidden (blur / suspend)
    Hidden,
}

impl std::str::FromStr for ProcessStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "alive" => Ok(ProcessStatus::Alive),
            "visible" => Ok(ProcessStatus::Visible),
            "hidden" => Ok(ProcessStatus::Hidden),
            other => Err(DomainError::InvalidStatus(other.to_string())),
        }
    }
}

/// Watchdog parameters a content process announces with its first
/// status message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchdogConfig {
    /// Expected liveness poll cadence in milliseconds
    pub poll_interval_ms: u64,
    /// Stall duration beyond the poll cadence that counts as ANR
    pub anr_threshold_ms: u64,
    /// Whether a stack trace should be captured on ANR
    pub capture_stack_trace: bool,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 100,
            anr_threshold_ms: 5000,
            capture_stack_trace: false,
        }
    }
}

/// A message forwarded from a content process to the host.
///
/// Delivery is fire-and-forget; every variant must be safe to drop.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RelayMessage {
    /// A captured event ready for merge and delivery
    Event { event: Event },
    /// A single breadcrumb for the host's bounded ring
    Breadcrumb { breadcrumb: Breadcrumb },
    /// A scope snapshot to merge into persisted context
    Scope { scope: ScopeData },
    /// Liveness/visibility status for the ANR watchdog
    AnrStatus {
        status: ProcessStatus,
        config: WatchdogConfig,
    },
    /// Payload the host forwards without inspection
    Opaque { payload: Value },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_kind_tag_round_trips() {
        let msg = RelayMessage::AnrStatus {
            status: ProcessStatus::Alive,
            config: WatchdogConfig::default(),
        };

        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains(r#""kind":"anr_status""#));

        let back: RelayMessage = serde_json::from_str(&json).unwrap();
        match back {
            RelayMessage::AnrStatus { status, config } => {
                assert_eq!(status, ProcessStatus::Alive);
                assert_eq!(config.poll_interval_ms, 100);
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn unknown_kind_fails_to_decode() {
        let json = r#"{"kind":"telemetry_blob","payload":{}}"#;
        assert!(serde_json::from_str::<RelayMessage>(json).is_err());
    }

    #[test]
    fn status_from_str() {
        assert_eq!("alive".parse::<ProcessStatus>().unwrap(), ProcessStatus::Alive);
        assert!("zombie".parse::<ProcessStatus>().is_err());
    }
}
