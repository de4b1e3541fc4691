use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Current Unix timestamp in milliseconds.
pub fn now_millis() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SenderType {
    Customer,
    Store,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    #[default]
    Text,
    Image,
    Video,
    Mixed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    Video,
}

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp", "gif"];
const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mov", "avi", "mkv", "webm", "ogg"];

/// One attachment. The `type` field is optional on the wire and not always
/// trustworthy, so `resolved_kind` falls back to sniffing the URL extension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaItem {
    pub url: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

impl MediaItem {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            kind: None,
        }
    }

    pub fn with_kind(url: impl Into<String>, kind: &str) -> Self {
        Self {
            url: url.into(),
            kind: Some(kind.to_string()),
        }
    }

    pub fn resolved_kind(&self) -> MediaKind {
        if let Some(kind) = self.kind.as_deref() {
            match kind.to_ascii_lowercase().as_str() {
                "image" => return MediaKind::Image,
                "video" => return MediaKind::Video,
                _ => {}
            }
        }
        kind_from_url(&self.url)
    }
}

fn kind_from_url(url: &str) -> MediaKind {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let ext = match path.rsplit_once('.') {
        Some((_, ext)) => ext.to_ascii_lowercase(),
        None => return MediaKind::Image,
    };
    if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
        MediaKind::Video
    } else if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
        MediaKind::Image
    } else {
        MediaKind::Image
    }
}

/// Media payload of a message. Two historical encodings are in circulation:
/// a bare URL string (old single-item messages) and an array of
/// `{url, type}` objects. Both are accepted indefinitely.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Media {
    Items(Vec<MediaItem>),
    Url(String),
}

impl Default for Media {
    fn default() -> Self {
        Media::Items(Vec::new())
    }
}

impl Media {
    pub fn items(&self) -> Vec<MediaItem> {
        match self {
            Media::Items(items) => items.clone(),
            Media::Url(url) => vec![MediaItem::new(url.clone())],
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Media::Items(items) => items.is_empty(),
            Media::Url(url) => url.trim().is_empty(),
        }
    }
}

impl From<Vec<MediaItem>> for Media {
    fn from(items: Vec<MediaItem>) -> Self {
        Media::Items(items)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub sender_id: String,
    pub sender_type: SenderType,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub message_type: MessageType,
    #[serde(default)]
    pub media: Media,
    pub created_at: u64,
    /// The channel's copy of this flag can be stale; it is used for
    /// per-message ticks only, never for unread accounting.
    #[serde(default)]
    pub read: bool,
}

impl Message {
    /// Build an outgoing customer message with a client-generated id.
    pub fn outgoing(
        sender_id: &str,
        content: String,
        message_type: MessageType,
        media: Vec<MediaItem>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            sender_id: sender_id.to_string(),
            sender_type: SenderType::Customer,
            content,
            message_type,
            media: Media::Items(media),
            created_at: now_millis(),
            read: false,
        }
    }
}
