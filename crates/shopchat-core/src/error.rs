use thiserror::Error;

/// Failure taxonomy for the sync core. Transport adapters map their native
/// errors into `Store`/`Channel`; the session layer raises `Upload` and
/// `SendRejected` itself.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("message store request failed: {0}")]
    Store(String),

    #[error("realtime channel request failed: {0}")]
    Channel(String),

    #[error("attachment upload incomplete: {0}")]
    Upload(String),

    #[error("send rejected: {0}")]
    SendRejected(String),
}
