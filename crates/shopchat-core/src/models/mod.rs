pub mod conversation;
pub mod draft;
pub mod message;

pub use conversation::{fallback_store_name, Conversation, ConversationRecord, PeerKey, StoreInfo};
pub use draft::Draft;
pub use message::{now_millis, Media, MediaItem, MediaKind, Message, MessageType, SenderType};
