//! Breadcrumbs and the bounded breadcrumb ring

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::event::Level;

/// Default bound for breadcrumb lists
pub const DEFAULT_MAX_BREADCRUMBS: usize = 100;

/// A single breadcrumb
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Breadcrumb {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub ty: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<Level>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub data: BTreeMap<String, Value>,
}

impl Breadcrumb {
    /// Creates a breadcrumb with the current timestamp.
    pub fn new(category: impl Into<String>, message: impl Into<String>) -> Self {
        Breadcrumb {
            timestamp: Some(Utc::now()),
            category: Some(category.into()),
            message: Some(message.into()),
            ..Default::default()
        }
    }
}

/// Appends to a bounded breadcrumb list with ring-buffer semantics.
///
/// Oldest entries are evicted when the bound is exceeded
/// (slice-and-append, not an actual circular buffer).
pub fn push_bounded(crumbs: &mut Vec<Breadcrumb>, crumb: Breadcrumb, max: usize) {
    crumbs.push(crumb);
    if crumbs.len() > max {
        let excess = crumbs.len() - max;
        crumbs.drain(..excess);
    }
}
