use crate::constants::FALLBACK_NAME_LEN;
use crate::models::SenderType;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of one customer<->store conversation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerKey {
    pub customer_id: String,
    pub store_id: String,
}

impl PeerKey {
    pub fn new(customer_id: impl Into<String>, store_id: impl Into<String>) -> Self {
        Self {
            customer_id: customer_id.into(),
            store_id: store_id.into(),
        }
    }
}

impl fmt::Display for PeerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.customer_id, self.store_id)
    }
}

/// Display name used when store info cannot be fetched.
pub fn fallback_store_name(store_id: &str) -> String {
    let prefix: String = store_id.chars().take(FALLBACK_NAME_LEN).collect();
    format!("{}...", prefix)
}

/// One entry of the conversation list. `last_message` is already formatted
/// for display; `unread_count` is maintained exclusively by the merge engine.
#[derive(Debug, Clone, PartialEq)]
pub struct Conversation {
    pub key: PeerKey,
    pub store_name: String,
    pub store_avatar: Option<String>,
    pub last_message: String,
    pub last_message_time: u64,
    pub last_message_sender: Option<SenderType>,
    pub unread_count: u32,
}

impl Conversation {
    /// Client-side stub for a chat that has no history yet.
    pub fn stub(key: PeerKey, store_name: String) -> Self {
        Self {
            key,
            store_name,
            store_avatar: None,
            last_message: String::new(),
            last_message_time: 0,
            last_message_sender: None,
            unread_count: 0,
        }
    }
}

/// Raw conversation-list entry as returned by the message store, before
/// display-info and preview enrichment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationRecord {
    #[serde(flatten)]
    pub key: PeerKey,
    #[serde(default)]
    pub unread_count: u32,
    /// Timestamp of the newest message the store has recorded. Seeds the
    /// monotonicity baseline when the preview fetch degrades, so the
    /// initial subscribe snapshot cannot re-count history the record
    /// already accounts for.
    #[serde(default)]
    pub last_message_time: u64,
}

/// Store display info fetched during list enrichment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreInfo {
    pub store_id: String,
    pub name: String,
    #[serde(default)]
    pub avatar_url: Option<String>,
}
