//! Hook subscriptions
//!
//! A subscription is just (event, plugin name). Triggering an event looks up
//! the subscribers and calls `Plugin.HandleHook` on each one.

use indexmap::{IndexMap, IndexSet};
use serde::Serialize;

/// Event a minor-mode plugin subscribes to for buffer edits
pub const BUFFER_CHANGE: &str = "buffer-change";
/// Event a minor-mode plugin subscribes to for cursor moves
pub const CURSOR_MOVE: &str = "cursor-move";

/// One subscriber that failed while an event fired
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HookFailure {
    pub plugin: String,
    pub error: String,
}

/// Subscribers per event, in subscription order
#[derive(Debug, Default)]
pub struct HookTable {
    events: IndexMap<String, IndexSet<String>>,
}

impl HookTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe `plugin` to `event`. Returns false if it already was.
    pub fn add(&mut self, event: &str, plugin: &str) -> bool {
        self.events
            .entry(event.to_string())
            .or_default()
            .insert(plugin.to_string())
    }

    /// Plugins subscribed to `event`
    pub fn subscribers(&self, event: &str) -> Vec<String> {
        self.events
            .get(event)
            .map(|plugins| plugins.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Whether `plugin` subscribed to `event`
    pub fn is_subscribed(&self, event: &str, plugin: &str) -> bool {
        self.events
            .get(event)
            .is_some_and(|plugins| plugins.contains(plugin))
    }

    /// Drop every subscription held by `plugin`
    pub fn remove_plugin(&mut self, plugin: &str) {
        for plugins in self.events.values_mut() {
            plugins.shift_remove(plugin);
        }
        self.events.retain(|_, plugins| !plugins.is_empty());
    }

    /// Events with at least one subscriber
    pub fn events(&self) -> Vec<String> {
        self.events.keys().cloned().collect()
    }
}
