//! Scope/context data attached to reported events

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::breadcrumb::{push_bounded, Breadcrumb};
use super::event::{Event, User};

/// The mapping of user, tags, and extra metadata attached to events.
///
/// Instances are always copied (serde round trip or `Clone`) when
/// handed across a process boundary; no aliasing of live scope state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScopeData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<User>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub breadcrumbs: Vec<Breadcrumb>,
}

impl ScopeData {
    /// Last-writer-wins update from another scope snapshot.
    ///
    /// Only keys present on `incoming` are touched; breadcrumbs are
    /// appended through the bounded ring.
    pub fn apply_update(&mut self, incoming: &ScopeData, max_breadcrumbs: usize) {
        if let Some(user) = &incoming.user {
            self.user = Some(user.clone());
        }
        for (k, v) in &incoming.tags {
            self.tags.insert(k.clone(), v.clone());
        }
        for (k, v) in &incoming.extra {
            self.extra.insert(k.clone(), v.clone());
        }
        for crumb in &incoming.breadcrumbs {
            push_bounded(&mut self.breadcrumbs, crumb.clone(), max_breadcrumbs);
        }
    }

    /// Applies this scope to an event, with the event's own data
    /// winning on collision.
    pub fn apply_to_event(&self, event: &mut Event) {
        if event.user.is_none() {
            event.user = self.user.clone();
        }
        for (k, v) in &self.tags {
            event.tags.entry(k.clone()).or_insert_with(|| v.clone());
        }
        for (k, v) in &self.extra {
            event.extra.entry(k.clone()).or_insert_with(|| v.clone());
        }
        if event.breadcrumbs.is_empty() {
            event.breadcrumbs = self.breadcrumbs.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apply_update_is_last_writer_wins() {
        let mut scope = ScopeData::default();
        scope.tags.insert("x".to_string(), "1".to_string());

        let mut incoming = ScopeData::default();
        incoming.tags.insert("x".to_string(), "2".to_string());
        incoming.tags.insert("y".to_string(), "3".to_string());

        scope.apply_update(&incoming, 100);
        assert_eq!(scope.tags["x"], "2");
        assert_eq!(scope.tags["y"], "3");
    }

    #[test]
    fn apply_update_bounds_breadcrumbs() {
        let mut scope = ScopeData::default();
        let mut incoming = ScopeData::default();
        for n in 0..5 {
            incoming.breadcrumbs.push(Breadcrumb {
                message: Some(format!("{n}")),
                ..Default::default()
            });
        }

        scope.apply_update(&incoming, 2);
        assert_eq!(scope.breadcrumbs.len(), 2);
        assert_eq!(scope.breadcrumbs[0].message.as_deref(), Some("3"));
    }

    #[test]
    fn apply_to_event_does_not_clobber_event_data() {
        let mut scope = ScopeData::default();
        scope.tags.insert("x".to_string(), "scope".to_string());
        scope.tags.insert("y".to_string(), "scope".to_string());

        let mut event = Event::new();
        event.tags.insert("x".to_string(), "event".to_string());

        scope.apply_to_event(&mut event);
        assert_eq!(event.tags["x"], "event");
        assert_eq!(event.tags["y"], "scope");
    }
}
