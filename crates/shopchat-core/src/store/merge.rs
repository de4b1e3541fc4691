use crate::models::{fallback_store_name, Conversation, Message, PeerKey, SenderType};
use crate::selection::SelectionTracker;
use crate::store::format_last_message;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::debug;

/// What a realtime snapshot did to the list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotOutcome {
    /// The snapshot carried a strictly newer latest message; preview and
    /// counters were updated.
    Applied,
    /// Duplicate or out-of-order delivery; preview untouched.
    Stale,
    /// Empty message set; nothing to merge.
    Empty,
}

/// The conversation list plus its merge rules. Not shared directly; all
/// access goes through `MergeEngine`, which holds it behind a mutex.
#[derive(Default)]
pub struct ConversationList {
    conversations: Vec<Conversation>,
}

impl ConversationList {
    fn position(&self, key: &PeerKey) -> Option<usize> {
        self.conversations.iter().position(|c| &c.key == key)
    }

    // ===== Getters =====

    pub fn conversations(&self) -> &[Conversation] {
        &self.conversations
    }

    pub fn get(&self, key: &PeerKey) -> Option<&Conversation> {
        self.conversations.iter().find(|c| &c.key == key)
    }

    pub fn total_unread(&self) -> u32 {
        self.conversations.iter().map(|c| c.unread_count).sum()
    }

    // ===== Mutations =====

    pub fn replace_all(&mut self, conversations: Vec<Conversation>) {
        self.conversations = conversations;
    }

    /// Ensure a conversation exists, creating an empty stub if needed.
    pub fn upsert_stub(&mut self, key: PeerKey, store_name: String) -> usize {
        if let Some(idx) = self.position(&key) {
            return idx;
        }
        self.conversations.push(Conversation::stub(key, store_name));
        self.conversations.len() - 1
    }

    /// Merge one full-snapshot delivery. The caller passes the selection
    /// read at callback-fire time. Returns what happened so the session can
    /// decide whether to refresh the thread view.
    pub fn apply_snapshot(
        &mut self,
        key: &PeerKey,
        messages: &[Message],
        is_selected: bool,
    ) -> SnapshotOutcome {
        let latest = match messages.last() {
            Some(m) => m,
            None => return SnapshotOutcome::Empty,
        };

        // A snapshot can arrive for a conversation the list has never seen
        // (store replied before any list reload); synthesize a stub first.
        let idx = self.upsert_stub(key.clone(), fallback_store_name(&key.store_id));
        let convo = &mut self.conversations[idx];

        if latest.created_at > convo.last_message_time {
            convo.last_message = format_last_message(latest);
            convo.last_message_time = latest.created_at;
            convo.last_message_sender = Some(latest.sender_type);
            if is_selected {
                convo.unread_count = 0;
            } else if latest.sender_type == SenderType::Store {
                convo.unread_count += 1;
            }
            // A customer's own message never increments their unread count.
            SnapshotOutcome::Applied
        } else {
            // Duplicate or out-of-order delivery. The preview must not
            // regress, but the selected conversation still re-asserts
            // unread = 0 independent of message freshness.
            if is_selected {
                convo.unread_count = 0;
            }
            SnapshotOutcome::Stale
        }
    }

    /// Optimistic update right after the current user sends a message. Uses
    /// the same formatter as snapshot merges so the two paths cannot drift.
    pub fn note_local_send(&mut self, key: &PeerKey, message: &Message) {
        let idx = self.upsert_stub(key.clone(), fallback_store_name(&key.store_id));
        let convo = &mut self.conversations[idx];
        if message.created_at > convo.last_message_time {
            convo.last_message = format_last_message(message);
            convo.last_message_time = message.created_at;
            convo.last_message_sender = Some(message.sender_type);
        }
        convo.unread_count = 0;
    }

    pub fn zero_unread(&mut self, key: &PeerKey) {
        if let Some(idx) = self.position(key) {
            self.conversations[idx].unread_count = 0;
        }
    }

    /// Sort descending by last message time. Stable, so equal timestamps
    /// keep their relative order.
    pub fn sort(&mut self) {
        self.conversations
            .sort_by(|a, b| b.last_message_time.cmp(&a.last_message_time));
    }

    /// Final sweep: whatever path a snapshot took, the selected
    /// conversation ends with zero unread.
    pub fn assert_selected_read(&mut self, selected: Option<&PeerKey>) {
        if let Some(key) = selected {
            self.zero_unread(key);
        }
    }
}

/// Cloneable handle to the shared conversation list. Every public method is
/// a single lock-held read-modify-write, so interleaved snapshot callbacks
/// can never observe a torn update. This is the only component allowed to
/// write `unread_count` or `last_message`.
#[derive(Clone)]
pub struct MergeEngine {
    selection: SelectionTracker,
    list: Arc<Mutex<ConversationList>>,
}

impl MergeEngine {
    pub fn new(selection: SelectionTracker) -> Self {
        Self {
            selection,
            list: Arc::new(Mutex::new(ConversationList::default())),
        }
    }

    pub fn selection(&self) -> &SelectionTracker {
        &self.selection
    }

    /// Install a freshly fetched conversation list. Fetched data wins for
    /// every entry it carries; entries already in the list that the fetch
    /// does not carry are preserved — conversations are never deleted, and
    /// a client-synthesized stub may not be known to the store yet. Ends
    /// sorted, with unread forced to zero for the selected conversation
    /// (it may have been selected while the fetch was in flight).
    pub fn reconcile_conversations(&self, fetched: Vec<Conversation>) {
        let selected = self.selection.current();
        let mut list = self.list.lock();
        let mut merged = fetched;
        for existing in list.conversations() {
            if merged.iter().all(|c| c.key != existing.key) {
                merged.push(existing.clone());
            }
        }
        list.replace_all(merged);
        list.sort();
        list.assert_selected_read(selected.as_ref());
    }

    /// Apply one realtime snapshot. Selection is read here, at callback
    /// fire time, not from anything captured at subscription setup.
    pub fn apply_realtime_snapshot(&self, key: &PeerKey, messages: &[Message]) -> SnapshotOutcome {
        let selected = self.selection.current();
        let is_selected = selected.as_ref() == Some(key);

        let mut list = self.list.lock();
        let outcome = list.apply_snapshot(key, messages, is_selected);
        if outcome != SnapshotOutcome::Empty {
            list.sort();
        }
        // Defense against interleaved callbacks that raced past step 4.
        list.assert_selected_read(selected.as_ref());

        debug!(
            key = %key,
            ?outcome,
            is_selected,
            "applied realtime snapshot"
        );
        outcome
    }

    /// User clicked a conversation: record the selection and optimistically
    /// zero its unread count, before any network call resolves.
    pub fn select(&self, key: &PeerKey) {
        self.selection.select(key.clone());
        self.list.lock().zero_unread(key);
    }

    pub fn deselect(&self) {
        self.selection.deselect();
    }

    pub fn upsert_stub(&self, key: &PeerKey, store_name: String) {
        let mut list = self.list.lock();
        list.upsert_stub(key.clone(), store_name);
        list.sort();
    }

    pub fn note_local_send(&self, key: &PeerKey, message: &Message) {
        let mut list = self.list.lock();
        list.note_local_send(key, message);
        list.sort();
    }

    /// Undo the optimistic preview after a failed send, unless a newer
    /// snapshot already superseded it.
    pub fn rollback_local_send(
        &self,
        key: &PeerKey,
        failed: &Message,
        previous: Option<Conversation>,
    ) {
        let selected = self.selection.current();
        let mut list = self.list.lock();
        let current_time = match list.get(key) {
            Some(c) => c.last_message_time,
            None => return,
        };
        if current_time != failed.created_at {
            return;
        }
        match previous {
            Some(prev) => {
                if let Some(idx) = list.position(key) {
                    list.conversations[idx] = prev;
                }
            }
            None => {
                // The conversation only existed because of this send; drop
                // it back to an empty stub.
                if let Some(idx) = list.position(key) {
                    let store_name = list.conversations[idx].store_name.clone();
                    list.conversations[idx] = Conversation::stub(key.clone(), store_name);
                }
            }
        }
        list.sort();
        list.assert_selected_read(selected.as_ref());
    }

    // ===== Getters =====

    pub fn conversations(&self) -> Vec<Conversation> {
        self.list.lock().conversations().to_vec()
    }

    pub fn conversation(&self, key: &PeerKey) -> Option<Conversation> {
        self.list.lock().get(key).cloned()
    }

    pub fn total_unread(&self) -> u32 {
        self.list.lock().total_unread()
    }
}
