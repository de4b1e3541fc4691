use crate::models::{MediaItem, MediaKind, MessageType};
use serde::{Deserialize, Serialize};

/// Contents of the compose box. Taken out of the session when a send starts
/// and restored verbatim if the send fails, so the user never retypes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Draft {
    pub text: String,
    #[serde(default)]
    pub media: Vec<MediaItem>,
}

impl Draft {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            media: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty() && self.media.is_empty()
    }

    /// Wire message type implied by the draft contents.
    pub fn message_type(&self) -> MessageType {
        if self.media.is_empty() {
            return MessageType::Text;
        }
        let has_image = self
            .media
            .iter()
            .any(|m| m.resolved_kind() == MediaKind::Image);
        let has_video = self
            .media
            .iter()
            .any(|m| m.resolved_kind() == MediaKind::Video);
        if !self.text.trim().is_empty() || (has_image && has_video) {
            MessageType::Mixed
        } else if has_video {
            MessageType::Video
        } else {
            MessageType::Image
        }
    }
}
