pub mod format;
pub mod merge;

pub use format::format_last_message;
pub use merge::{ConversationList, MergeEngine, SnapshotOutcome};
