//! Remote handle arena
//!
//! Maps the opaque ids a plugin sees to weak references to live editor
//! objects. The arena never keeps a buffer or window alive; once the editor
//! drops one, its id resolves to `StaleHandle`.

use gmacs_plugin_sdk::HandleId;
use std::collections::HashMap;
use std::sync::{Arc, Weak};

use crate::editor::{Buffer, Window};
use crate::error::{HostError, Result};

enum Slot {
    Buffer(Weak<dyn Buffer>),
    Window(Weak<dyn Window>),
}

impl Slot {
    fn is_live(&self) -> bool {
        match self {
            Slot::Buffer(weak) => weak.strong_count() > 0,
            Slot::Window(weak) => weak.strong_count() > 0,
        }
    }
}

/// Handles issued on one plugin connection
pub struct HandleTable {
    next: u64,
    slots: HashMap<HandleId, Slot>,
}

impl Default for HandleTable {
    fn default() -> Self {
        Self::new()
    }
}

impl HandleTable {
    pub fn new() -> Self {
        Self {
            next: 1,
            slots: HashMap::new(),
        }
    }

    /// Issue a handle for a buffer, reusing the id if one is already live
    pub fn issue_buffer(&mut self, buffer: &Arc<dyn Buffer>) -> HandleId {
        let existing = self.slots.iter().find_map(|(id, slot)| match slot {
            Slot::Buffer(weak)
                if weak.strong_count() > 0
                    && std::ptr::addr_eq(weak.as_ptr(), Arc::as_ptr(buffer)) =>
            {
                Some(*id)
            }
            _ => None,
        });
        if let Some(id) = existing {
            return id;
        }
        self.prune();
        self.insert(Slot::Buffer(Arc::downgrade(buffer)))
    }

    /// Issue a handle for a window, reusing the id if one is already live
    pub fn issue_window(&mut self, window: &Arc<dyn Window>) -> HandleId {
        let existing = self.slots.iter().find_map(|(id, slot)| match slot {
            Slot::Window(weak)
                if weak.strong_count() > 0
                    && std::ptr::addr_eq(weak.as_ptr(), Arc::as_ptr(window)) =>
            {
                Some(*id)
            }
            _ => None,
        });
        if let Some(id) = existing {
            return id;
        }
        self.prune();
        self.insert(Slot::Window(Arc::downgrade(window)))
    }

    /// Resolve a buffer handle to the live buffer
    pub fn buffer(&self, id: HandleId) -> Result<Arc<dyn Buffer>> {
        match self.slots.get(&id) {
            Some(Slot::Buffer(weak)) => weak
                .upgrade()
                .ok_or_else(|| HostError::StaleHandle(format!("buffer {id} was destroyed"))),
            Some(Slot::Window(_)) => Err(HostError::StaleHandle(format!(
                "{id} is a window, not a buffer"
            ))),
            None => Err(HostError::StaleHandle(format!("unknown buffer handle {id}"))),
        }
    }

    /// Resolve a window handle to the live window
    pub fn window(&self, id: HandleId) -> Result<Arc<dyn Window>> {
        match self.slots.get(&id) {
            Some(Slot::Window(weak)) => weak
                .upgrade()
                .ok_or_else(|| HostError::StaleHandle(format!("window {id} was destroyed"))),
            Some(Slot::Buffer(_)) => Err(HostError::StaleHandle(format!(
                "{id} is a buffer, not a window"
            ))),
            None => Err(HostError::StaleHandle(format!("unknown window handle {id}"))),
        }
    }

    /// Number of issued handles, live or stale
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Drop every handle
    pub fn clear(&mut self) {
        self.slots.clear();
    }

    // Ids are never reused, so a pruned id stays stale forever
    fn prune(&mut self) {
        self.slots.retain(|_, slot| slot.is_live());
    }

    fn insert(&mut self, slot: Slot) -> HandleId {
        let id = HandleId(self.next);
        self.next += 1;
        self.slots.insert(id, slot);
        id
    }
}
