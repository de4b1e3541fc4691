use crate::models::PeerKey;
use parking_lot::Mutex;
use std::sync::Arc;

/// Shared cell holding the currently open conversation. Snapshot callbacks
/// read it at fire time through a cloned handle, never through a value
/// captured at subscription setup, so a selection made mid-flight is always
/// visible to them.
#[derive(Clone, Default)]
pub struct SelectionTracker {
    inner: Arc<Mutex<Option<PeerKey>>>,
}

impl SelectionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Synchronous; callers must invoke this before starting any fetch for
    /// the conversation.
    pub fn select(&self, key: PeerKey) {
        *self.inner.lock() = Some(key);
    }

    pub fn deselect(&self) {
        *self.inner.lock() = None;
    }

    pub fn current(&self) -> Option<PeerKey> {
        self.inner.lock().clone()
    }

    pub fn is_selected(&self, key: &PeerKey) -> bool {
        self.inner.lock().as_ref() == Some(key)
    }
}
