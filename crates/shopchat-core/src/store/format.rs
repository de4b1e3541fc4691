use crate::constants::PREVIEW_MAX_CHARS;
use crate::models::{MediaKind, Message, MessageType};

/// The single source of truth for conversation preview text. Used for both
/// list enrichment and the optimistic local update after a send, so the two
/// paths can never drift. Pure and deterministic.
pub fn format_last_message(message: &Message) -> String {
    let content = message.content.trim();
    if !content.is_empty() {
        return truncate_preview(content);
    }

    match message.message_type {
        MessageType::Image => "[Image]".to_string(),
        MessageType::Video => "[Video]".to_string(),
        MessageType::Mixed => describe_media(message),
        MessageType::Text => "[Message]".to_string(),
    }
}

fn truncate_preview(content: &str) -> String {
    let truncated: String = content.chars().take(PREVIEW_MAX_CHARS).collect();
    if content.chars().count() > PREVIEW_MAX_CHARS {
        format!("{}...", truncated)
    } else {
        truncated
    }
}

fn describe_media(message: &Message) -> String {
    let items = message.media.items();
    if items.is_empty() {
        return "[Message]".to_string();
    }

    let images = items
        .iter()
        .filter(|i| i.resolved_kind() == MediaKind::Image)
        .count();
    let videos = items.len() - images;

    match (images, videos) {
        (0, 1) => "[Video]".to_string(),
        (0, n) => format!("[{} videos]", n),
        (1, 0) => "[Image]".to_string(),
        (n, 0) => format!("[{} images]", n),
        _ => "[Image, Video]".to_string(),
    }
}
