use async_trait::async_trait;
use marquee_program::{Change, EventId, EventSnapshot};

use crate::error::StoreError;
use crate::feed::subscription::Subscription;

/// Durable record of every event and its item containers.
///
/// Writes are whole-document replacements. Every record in one write is
/// committed together and published as a single feed event, after the commit
/// and in commit order.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Full current value of one event.
    async fn read(&self, event_id: &EventId) -> Result<EventSnapshot, StoreError>;

    /// Replace the event record and/or containers of `event_id`, all or none.
    async fn write(&self, event_id: &EventId, changes: Vec<Change>) -> Result<(), StoreError>;

    /// Subscribe to every committed write for `event_id`.
    async fn subscribe(&self, event_id: &EventId) -> Result<Subscription, StoreError>;
}
