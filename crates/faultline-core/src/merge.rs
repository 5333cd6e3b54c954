//! Event and scope merge semantics
//!
//! `merge_events` combines collector defaults with an incoming event.
//! The merge is right-biased: where both sides carry a value, the
//! incoming side wins. Two substructures get special treatment:
//!
//! - the exception/stacktrace substructure is replaced wholesale from
//!   whichever side has it, never field-merged
//! - the SDK identity is shallow-merged per field, with the packages
//!   list replaced rather than concatenated
//!
//! Engine-private fields are stripped from the incoming event before
//! the merge, not after.

use crate::domain::event::Event;
use crate::domain::scope::ScopeData;

/// Merges an incoming event over a set of defaults.
pub fn merge_events(defaults: &Event, mut incoming: Event) -> Event {
    incoming.strip_private();

    let mut merged = defaults.clone();

    if incoming.event_id.is_some() {
        merged.event_id = incoming.event_id;
    }
    if incoming.timestamp.is_some() {
        merged.timestamp = incoming.timestamp;
    }
    if incoming.level.is_some() {
        merged.level = incoming.level;
    }
    if incoming.platform.is_some() {
        merged.platform = incoming.platform;
    }
    if incoming.release.is_some() {
        merged.release = incoming.release;
    }
    if incoming.environment.is_some() {
        merged.environment = incoming.environment;
    }
    if incoming.message.is_some() {
        merged.message = incoming.message;
    }

    // Replaced wholesale, never field-merged.
    if incoming.exception.is_some() {
        merged.exception = incoming.exception;
    }

    merged.tags.extend(incoming.tags);
    merged.extra.extend(incoming.extra);
    merged.contexts.extend(incoming.contexts);
    merged.passthrough.extend(incoming.passthrough);

    merged.user = match (merged.user.take(), incoming.user) {
        (Some(base), Some(inc)) => Some(base.merged_with(&inc)),
        (base, inc) => inc.or(base),
    };

    // Shallow merge so the packages list never accumulates duplicates.
    merged.sdk = match (merged.sdk.take(), incoming.sdk) {
        (Some(base), Some(inc)) => {
            let mut sdk = base;
            if inc.name.is_some() {
                sdk.name = inc.name;
            }
            if inc.version.is_some() {
                sdk.version = inc.version;
            }
            if !inc.packages.is_empty() {
                sdk.packages = inc.packages;
            }
            Some(sdk)
        }
        (base, inc) => inc.or(base),
    };

    merged.breadcrumbs.extend(incoming.breadcrumbs);
    merged.spans.extend(incoming.spans);

    merged
}

/// Merges isolation-level scope data with current-call-level data.
///
/// Current-call-level fields win on key collision. The result is a
/// fresh value sharing no state with either input, so event processors
/// cannot mutate the live scopes through it.
pub fn merge_scope(isolation: &ScopeData, current: &ScopeData) -> ScopeData {
    let mut merged = isolation.clone();

    if let Some(user) = &current.user {
        merged.user = Some(user.clone());
    }
    for (k, v) in &current.tags {
        merged.tags.insert(k.clone(), v.clone());
    }
    for (k, v) in &current.extra {
        merged.extra.insert(k.clone(), v.clone());
    }
    merged.breadcrumbs.extend(current.breadcrumbs.iter().cloned());

    merged
}
