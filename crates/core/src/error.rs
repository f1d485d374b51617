use marquee_program::{ContainerId, EventId, ItemKind, ItemRef};
use thiserror::Error;

/// Rejections produced by the reconciler. These are plain return values; the
/// snapshot they were computed against is never modified.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReconcileError {
    #[error("cannot {operation} item {item_ref}: it is a {kind}")]
    InvalidTransition {
        operation: &'static str,
        item_ref: ItemRef,
        kind: ItemKind,
    },
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("no break is configured for this event")]
    NoBreakConfigured,
    #[error("item {0} not found")]
    NotFound(ItemRef),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("state store unavailable")]
    Unavailable,
    #[error("unknown event {0}")]
    UnknownEvent(EventId),
    #[error("unknown container {0}")]
    UnknownContainer(ContainerId),
    #[error("store i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("store serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors surfaced to console and viewer callers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    #[error("invalid transition: {0}")]
    InvalidTransition(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("no break is configured for this event")]
    NoBreakConfigured,
    #[error("not found: {0}")]
    NotFound(String),
    #[error("store write failed: {0}")]
    StoreWriteFailed(String),
    #[error("change feed disconnected: {0}")]
    FeedDisconnected(String),
    #[error("session closed")]
    SessionClosed,
}

impl From<ReconcileError> for SyncError {
    fn from(err: ReconcileError) -> Self {
        match err {
            ReconcileError::InvalidTransition { .. } => SyncError::InvalidTransition(err.to_string()),
            ReconcileError::InvalidArgument(msg) => SyncError::InvalidArgument(msg),
            ReconcileError::NoBreakConfigured => SyncError::NoBreakConfigured,
            ReconcileError::NotFound(item_ref) => SyncError::NotFound(item_ref.to_string()),
        }
    }
}
