/// Maximum number of characters shown in a conversation preview before
/// truncation.
pub const PREVIEW_MAX_CHARS: usize = 50;

/// How many messages to pull when opening a conversation.
pub const HISTORY_FETCH_LIMIT: usize = 100;

/// Shown in an empty thread before the store has said anything.
pub const DEFAULT_GREETING: &str = "Hi! How can we help you today?";

/// Appended to the thread when a send fails on either write path.
pub const SEND_FAILURE_NOTICE: &str =
    "Sorry, your message could not be delivered. Please try again.";

/// Length of the store-id prefix used when display info is unavailable.
pub const FALLBACK_NAME_LEN: usize = 8;
