use crate::error::SyncError;
use crate::models::{ConversationRecord, Message, PeerKey, SenderType, StoreInfo};
use crate::transport::{MessageStore, RealtimeChannel, SnapshotFn, Subscription};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

#[derive(Default)]
struct TopicState {
    messages: Vec<Message>,
    subscribers: HashMap<u64, SnapshotFn>,
}

#[derive(Default)]
struct BackendState {
    topics: HashMap<PeerKey, TopicState>,
    stores: HashMap<String, StoreInfo>,
    next_subscriber_id: u64,
    fail_store_sends: bool,
    fail_channel_appends: bool,
    fail_history_fetch: bool,
    fail_display_info: bool,
}

/// In-process implementation of both transport contracts over one shared
/// message map. Every channel-side mutation fans the full message set out
/// to the topic's subscribers, mirroring the replace-on-every-event
/// delivery model of the production push service. Used by the CLI demo and
/// the test suite; carries failure-injection switches for the error-path
/// tests.
#[derive(Clone, Default)]
pub struct InMemoryBackend {
    state: Arc<Mutex<BackendState>>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_store(&self, info: StoreInfo) {
        self.state.lock().stores.insert(info.store_id.clone(), info);
    }

    pub fn seed_messages(&self, key: &PeerKey, messages: Vec<Message>) {
        let mut state = self.state.lock();
        let topic = state.topics.entry(key.clone()).or_default();
        topic.messages = messages;
        topic.messages.sort_by(|a, b| a.created_at.cmp(&b.created_at));
    }

    /// The durable write rejects; the channel append still goes through.
    pub fn set_fail_store_sends(&self, fail: bool) {
        self.state.lock().fail_store_sends = fail;
    }

    /// The channel append rejects; the durable write still goes through.
    pub fn set_fail_channel_appends(&self, fail: bool) {
        self.state.lock().fail_channel_appends = fail;
    }

    pub fn set_fail_history_fetch(&self, fail: bool) {
        self.state.lock().fail_history_fetch = fail;
    }

    pub fn set_fail_display_info(&self, fail: bool) {
        self.state.lock().fail_display_info = fail;
    }

    /// Fan the topic's current message set out to its subscribers. The lock
    /// is released before any callback runs so a callback may call back
    /// into the backend.
    fn broadcast(&self, key: &PeerKey) {
        let (snapshot, callbacks): (Vec<Message>, Vec<SnapshotFn>) = {
            let state = self.state.lock();
            match state.topics.get(key) {
                Some(topic) => (
                    topic.messages.clone(),
                    topic.subscribers.values().cloned().collect(),
                ),
                None => return,
            }
        };
        debug!(key = %key, subscribers = callbacks.len(), "broadcasting snapshot");
        for callback in callbacks {
            callback(snapshot.clone());
        }
    }
}

#[async_trait]
impl MessageStore for InMemoryBackend {
    async fn fetch_messages(
        &self,
        key: &PeerKey,
        limit: usize,
    ) -> Result<Vec<Message>, SyncError> {
        let state = self.state.lock();
        if state.fail_history_fetch {
            return Err(SyncError::Store("simulated history-fetch failure".into()));
        }
        let messages = state
            .topics
            .get(key)
            .map(|t| t.messages.as_slice())
            .unwrap_or(&[]);
        let start = messages.len().saturating_sub(limit);
        Ok(messages[start..].to_vec())
    }

    async fn send_message(&self, key: &PeerKey, message: &Message) -> Result<Message, SyncError> {
        let mut state = self.state.lock();
        if state.fail_store_sends {
            return Err(SyncError::Store("simulated send failure".into()));
        }
        let topic = state.topics.entry(key.clone()).or_default();
        // Fan-out may already have appended this message; the durable write
        // only has to guarantee it is recorded once.
        if !topic.messages.iter().any(|m| m.id == message.id) {
            topic.messages.push(message.clone());
            topic.messages.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        }
        Ok(message.clone())
    }

    async fn mark_read(&self, key: &PeerKey, reader_id: &str) -> Result<(), SyncError> {
        let mut state = self.state.lock();
        if let Some(topic) = state.topics.get_mut(key) {
            for message in topic.messages.iter_mut() {
                if message.sender_id != reader_id {
                    message.read = true;
                }
            }
        }
        Ok(())
    }

    async fn conversation_list(
        &self,
        customer_id: &str,
    ) -> Result<Vec<ConversationRecord>, SyncError> {
        let state = self.state.lock();
        // A topic can exist with no messages when only a subscription
        // created it; the store lists conversations with history only.
        let mut records: Vec<ConversationRecord> = state
            .topics
            .iter()
            .filter(|(key, topic)| key.customer_id == customer_id && !topic.messages.is_empty())
            .map(|(key, topic)| ConversationRecord {
                key: key.clone(),
                unread_count: topic
                    .messages
                    .iter()
                    .filter(|m| m.sender_type == SenderType::Store && !m.read)
                    .count() as u32,
                last_message_time: topic.messages.last().map(|m| m.created_at).unwrap_or(0),
            })
            .collect();
        records.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(records)
    }

    async fn store_display_info(&self, store_id: &str) -> Result<StoreInfo, SyncError> {
        let state = self.state.lock();
        if state.fail_display_info {
            return Err(SyncError::Store("simulated display-info failure".into()));
        }
        state
            .stores
            .get(store_id)
            .cloned()
            .ok_or_else(|| SyncError::Store(format!("unknown store {}", store_id)))
    }
}

#[async_trait]
impl RealtimeChannel for InMemoryBackend {
    fn subscribe(&self, key: &PeerKey, on_snapshot: SnapshotFn) -> Subscription {
        let (subscriber_id, initial) = {
            let mut state = self.state.lock();
            state.next_subscriber_id += 1;
            let id = state.next_subscriber_id;
            let topic = state.topics.entry(key.clone()).or_default();
            topic.subscribers.insert(id, on_snapshot.clone());
            (id, topic.messages.clone())
        };
        // Push services deliver the current set on subscribe; the merge
        // engine is idempotent under it.
        on_snapshot(initial);

        let state = self.state.clone();
        let key = key.clone();
        Subscription::new(move || {
            let mut state = state.lock();
            if let Some(topic) = state.topics.get_mut(&key) {
                topic.subscribers.remove(&subscriber_id);
            }
        })
    }

    async fn append_message(&self, key: &PeerKey, message: &Message) -> Result<(), SyncError> {
        {
            let mut state = self.state.lock();
            if state.fail_channel_appends {
                return Err(SyncError::Channel("simulated append failure".into()));
            }
            let topic = state.topics.entry(key.clone()).or_default();
            if !topic.messages.iter().any(|m| m.id == message.id) {
                topic.messages.push(message.clone());
                topic.messages.sort_by(|a, b| a.created_at.cmp(&b.created_at));
            }
        }
        self.broadcast(key);
        Ok(())
    }

    async fn set_read_status(&self, key: &PeerKey, by: SenderType) -> Result<(), SyncError> {
        {
            let mut state = self.state.lock();
            if let Some(topic) = state.topics.get_mut(key) {
                for message in topic.messages.iter_mut() {
                    if message.sender_type != by {
                        message.read = true;
                    }
                }
            }
        }
        self.broadcast(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Media, MessageType};

    fn message(id: &str, sender_type: SenderType, created_at: u64) -> Message {
        Message {
            id: id.into(),
            sender_id: match sender_type {
                SenderType::Customer => "cust-1".into(),
                SenderType::Store => "store-1".into(),
            },
            sender_type,
            content: format!("message {}", id),
            message_type: MessageType::Text,
            media: Media::default(),
            created_at,
            read: false,
        }
    }

    #[tokio::test]
    async fn test_append_fans_out_full_snapshot() {
        let backend = InMemoryBackend::new();
        let key = PeerKey::new("cust-1", "store-1");
        backend.seed_messages(&key, vec![message("m1", SenderType::Store, 100)]);

        let received: Arc<Mutex<Vec<Vec<Message>>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = received.clone();
        let _subscription = backend.subscribe(
            &key,
            Arc::new(move |messages| {
                sink.lock().push(messages);
            }),
        );

        backend
            .append_message(&key, &message("m2", SenderType::Store, 200))
            .await
            .unwrap();

        let deliveries = received.lock();
        // Initial snapshot on subscribe, then the full set after append
        assert_eq!(deliveries.len(), 2);
        assert_eq!(deliveries[0].len(), 1);
        assert_eq!(deliveries[1].len(), 2);
        assert_eq!(deliveries[1][1].id, "m2");
    }

    #[tokio::test]
    async fn test_dropped_subscription_stops_deliveries() {
        let backend = InMemoryBackend::new();
        let key = PeerKey::new("cust-1", "store-1");

        let received: Arc<Mutex<Vec<Vec<Message>>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = received.clone();
        let subscription = backend.subscribe(
            &key,
            Arc::new(move |messages| {
                sink.lock().push(messages);
            }),
        );
        drop(subscription);

        backend
            .append_message(&key, &message("m1", SenderType::Store, 100))
            .await
            .unwrap();

        // Only the (empty) initial delivery
        assert_eq!(received.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_conversation_list_counts_unread_store_messages() {
        let backend = InMemoryBackend::new();
        let key = PeerKey::new("cust-1", "store-1");
        backend.seed_messages(
            &key,
            vec![
                message("m1", SenderType::Store, 100),
                message("m2", SenderType::Customer, 200),
                message("m3", SenderType::Store, 300),
            ],
        );

        let records = backend.conversation_list("cust-1").await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].unread_count, 2);
        assert_eq!(records[0].last_message_time, 300);

        backend.mark_read(&key, "cust-1").await.unwrap();
        let records = backend.conversation_list("cust-1").await.unwrap();
        assert_eq!(records[0].unread_count, 0);
    }

    #[tokio::test]
    async fn test_conversation_list_skips_subscription_only_topics() {
        let backend = InMemoryBackend::new();
        let key = PeerKey::new("cust-1", "store-1");
        let _subscription = backend.subscribe(&key, Arc::new(|_| {}));

        let records = backend.conversation_list("cust-1").await.unwrap();
        assert!(records.is_empty());
    }

    #[tokio::test]
    async fn test_fetch_messages_respects_limit() {
        let backend = InMemoryBackend::new();
        let key = PeerKey::new("cust-1", "store-1");
        backend.seed_messages(
            &key,
            (0..10)
                .map(|i| message(&format!("m{}", i), SenderType::Store, 100 + i))
                .collect(),
        );

        let messages = backend.fetch_messages(&key, 3).await.unwrap();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].id, "m7");
        assert_eq!(messages[2].id, "m9");
    }

    #[tokio::test]
    async fn test_failure_injection_is_per_write() {
        let backend = InMemoryBackend::new();
        let key = PeerKey::new("cust-1", "store-1");

        backend.set_fail_store_sends(true);
        let result = backend
            .send_message(&key, &message("m1", SenderType::Customer, 100))
            .await;
        assert!(matches!(result, Err(SyncError::Store(_))));
        // The channel side is independent and still accepts
        backend
            .append_message(&key, &message("m1", SenderType::Customer, 100))
            .await
            .unwrap();

        backend.set_fail_store_sends(false);
        backend.set_fail_channel_appends(true);
        let result = backend
            .append_message(&key, &message("m2", SenderType::Customer, 200))
            .await;
        assert!(matches!(result, Err(SyncError::Channel(_))));
        backend
            .send_message(&key, &message("m2", SenderType::Customer, 200))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_dual_write_records_message_once() {
        let backend = InMemoryBackend::new();
        let key = PeerKey::new("cust-1", "store-1");
        let m = message("m1", SenderType::Customer, 100);

        backend.append_message(&key, &m).await.unwrap();
        backend.send_message(&key, &m).await.unwrap();

        let messages = backend.fetch_messages(&key, 10).await.unwrap();
        assert_eq!(messages.len(), 1);
    }
}
