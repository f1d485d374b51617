use marquee_program::{Change, EventId};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

use crate::error::SyncError;

/// One committed write, as delivered to subscribers. A write carries every
/// record a single transition replaced, in the order they were written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedEvent {
    pub event_id: EventId,
    pub changes: Vec<Change>,
}

/// A live subscription to the change feed of one event.
///
/// Events arrive in commit order. A lagged receiver has lost events and a
/// closed channel has lost its source; both surface as `FeedDisconnected` so
/// the owner can resynchronize from a fresh snapshot.
pub struct Subscription {
    event_id: EventId,
    receiver: broadcast::Receiver<FeedEvent>,
}

impl Subscription {
    pub fn new(event_id: EventId, receiver: broadcast::Receiver<FeedEvent>) -> Self {
        Self { event_id, receiver }
    }

    pub fn event_id(&self) -> &EventId {
        &self.event_id
    }

    pub async fn next(&mut self) -> Result<FeedEvent, SyncError> {
        loop {
            match self.receiver.recv().await {
                Ok(event) if event.event_id == self.event_id => return Ok(event),
                Ok(_) => continue,
                Err(RecvError::Lagged(missed)) => {
                    return Err(SyncError::FeedDisconnected(format!(
                        "subscription to {} lagged by {} events",
                        self.event_id, missed
                    )));
                }
                Err(RecvError::Closed) => {
                    return Err(SyncError::FeedDisconnected(format!(
                        "change feed for {} closed",
                        self.event_id
                    )));
                }
            }
        }
    }

    /// Releases the subscription.
    pub fn unsubscribe(self) {
        log::debug!("Unsubscribed from change feed of {}", self.event_id);
    }
}
