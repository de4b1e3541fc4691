pub mod memory;

use crate::error::SyncError;
use crate::models::{ConversationRecord, Message, PeerKey, SenderType, StoreInfo};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// Callback invoked with the full current message set for one conversation
/// on every server-side change. Not deltas: every delivery replaces the
/// previous one.
pub type SnapshotFn = Arc<dyn Fn(Vec<Message>) + Send + Sync>;

/// Request/response system of record for conversations and messages.
#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn fetch_messages(&self, key: &PeerKey, limit: usize)
        -> Result<Vec<Message>, SyncError>;

    async fn send_message(&self, key: &PeerKey, message: &Message)
        -> Result<Message, SyncError>;

    async fn mark_read(&self, key: &PeerKey, reader_id: &str) -> Result<(), SyncError>;

    async fn conversation_list(
        &self,
        customer_id: &str,
    ) -> Result<Vec<ConversationRecord>, SyncError>;

    async fn store_display_info(&self, store_id: &str) -> Result<StoreInfo, SyncError>;
}

/// Push channel carrying full-snapshot deliveries. Advisory freshness only;
/// the message store stays authoritative for history.
#[async_trait]
pub trait RealtimeChannel: Send + Sync {
    /// Open one subscription for one conversation. Dropping the returned
    /// guard tears the subscription down synchronously.
    fn subscribe(&self, key: &PeerKey, on_snapshot: SnapshotFn) -> Subscription;

    async fn append_message(&self, key: &PeerKey, message: &Message) -> Result<(), SyncError>;

    async fn set_read_status(&self, key: &PeerKey, by: SenderType) -> Result<(), SyncError>;
}

/// Drop guard for one channel subscription.
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

/// One subscription per visible conversation. Leaving list mode must clear
/// the whole set, otherwise stale callbacks keep mutating shared state
/// after the user has moved on.
#[derive(Default)]
pub struct SubscriptionSet {
    subscriptions: HashMap<PeerKey, Subscription>,
}

impl SubscriptionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces (and thereby cancels) any existing subscription for the key.
    pub fn insert(&mut self, key: PeerKey, subscription: Subscription) {
        self.subscriptions.insert(key, subscription);
    }

    pub fn contains(&self, key: &PeerKey) -> bool {
        self.subscriptions.contains_key(key)
    }

    pub fn clear(&mut self) {
        self.subscriptions.clear();
    }

    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }
}
