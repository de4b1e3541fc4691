pub mod config;
pub mod constants;
pub mod error;
pub mod models;
pub mod selection;
pub mod session;
pub mod store;
pub mod transport;
pub mod visitor;

pub use config::CoreConfig;
pub use error::SyncError;
pub use models::{
    Conversation, ConversationRecord, Draft, Media, MediaItem, MediaKind, Message, MessageType,
    PeerKey, SenderType, StoreInfo,
};
pub use selection::SelectionTracker;
pub use session::ChatSession;
pub use store::{format_last_message, MergeEngine, SnapshotOutcome};
pub use transport::{MessageStore, RealtimeChannel, Subscription, SubscriptionSet};
