//! Keeps one change feed subscription per event alive.
//!
//! The protocol carries no sequence numbers, so a reconnect is handled like
//! the initial load: subscribe, fetch a full snapshot, then forward changes.
//! Missed changes are never replayed.

use std::sync::Arc;

use marquee_program::{Change, EventId, EventSnapshot};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::SyncError;
use crate::feed::subscription::Subscription;
use crate::messages::Settings;
use crate::store::traits::StateStore;

/// What a session receives from its feed client, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedMessage {
    /// Full state after the initial subscribe or after a resubscribe.
    Snapshot(EventSnapshot),
    /// One committed write: every record a single transition replaced.
    Changes(Vec<Change>),
    /// The live subscription dropped.
    Disconnected { reason: String },
    /// About to retry; `attempt` counts from 1 since the last live period.
    Reconnecting { attempt: u32 },
    /// Resubscription keeps failing. Sent once; retries continue.
    Lost,
}

pub struct FeedClient {
    store: Arc<dyn StateStore>,
    event_id: EventId,
    settings: Settings,
}

/// Owns the feed task. Dropping or closing it tears the subscription down.
pub struct FeedHandle {
    event_id: EventId,
    task: JoinHandle<()>,
}

impl FeedHandle {
    pub fn event_id(&self) -> &EventId {
        &self.event_id
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub fn close(self) {
        drop(self);
    }
}

impl Drop for FeedHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl FeedClient {
    pub fn new(store: Arc<dyn StateStore>, event_id: EventId, settings: Settings) -> Self {
        Self {
            store,
            event_id,
            settings,
        }
    }

    pub fn spawn(self) -> (FeedHandle, mpsc::Receiver<FeedMessage>) {
        let (tx, rx) = mpsc::channel(self.settings.feed_buffer.max(1));
        let event_id = self.event_id.clone();
        let task = tokio::spawn(self.run(tx));
        (FeedHandle { event_id, task }, rx)
    }

    async fn run(self, tx: mpsc::Sender<FeedMessage>) {
        let mut failures: u32 = 0;
        let mut lost = false;

        loop {
            match self.connect().await {
                Ok((subscription, snapshot)) => {
                    if failures > 0 {
                        log::info!(
                            "Resubscribed to {} after {} failed attempt(s)",
                            self.event_id,
                            failures
                        );
                    } else {
                        log::info!("Subscribed to change feed of {}", self.event_id);
                    }
                    failures = 0;
                    lost = false;

                    if tx.send(FeedMessage::Snapshot(snapshot)).await.is_err() {
                        break;
                    }

                    let reason = match self.forward(subscription, &tx).await {
                        Some(reason) => reason,
                        None => break,
                    };
                    log::warn!("Change feed of {} disconnected: {}", self.event_id, reason);
                    if tx.send(FeedMessage::Disconnected { reason }).await.is_err() {
                        break;
                    }
                }
                Err(err) => {
                    failures += 1;
                    log::warn!(
                        "Subscribing to {} failed (attempt {}): {}",
                        self.event_id,
                        failures,
                        err
                    );
                    if failures >= self.settings.max_reconnect_attempts && !lost {
                        lost = true;
                        log::error!(
                            "Giving up on a quick reconnect to {}, marking it disconnected",
                            self.event_id
                        );
                        if tx.send(FeedMessage::Lost).await.is_err() {
                            break;
                        }
                    }
                }
            }

            let attempt = failures + 1;
            if !lost
                && tx
                    .send(FeedMessage::Reconnecting { attempt })
                    .await
                    .is_err()
            {
                break;
            }

            let backoff = self.settings.reconnect_backoff(attempt);
            log::debug!("Retrying {} in {:?}", self.event_id, backoff);
            tokio::select! {
                _ = tokio::time::sleep(backoff) => {}
                _ = tx.closed() => break,
            }
        }

        log::debug!("Feed client for {} stopped", self.event_id);
    }

    async fn connect(&self) -> Result<(Subscription, EventSnapshot), SyncError> {
        // Subscribe before reading so no commit falls between the two.
        let subscription = self
            .store
            .subscribe(&self.event_id)
            .await
            .map_err(|e| SyncError::FeedDisconnected(e.to_string()))?;
        let snapshot = self
            .store
            .read(&self.event_id)
            .await
            .map_err(|e| SyncError::FeedDisconnected(e.to_string()))?;
        Ok((subscription, snapshot))
    }

    /// Forward changes until the subscription drops (`Some(reason)`) or the
    /// receiving session goes away (`None`).
    async fn forward(
        &self,
        mut subscription: Subscription,
        tx: &mpsc::Sender<FeedMessage>,
    ) -> Option<String> {
        let outcome = loop {
            tokio::select! {
                result = subscription.next() => match result {
                    Ok(event) => {
                        if tx.send(FeedMessage::Changes(event.changes)).await.is_err() {
                            break None;
                        }
                    }
                    Err(err) => break Some(err.to_string()),
                },
                _ = tx.closed() => break None,
            }
        };
        subscription.unsubscribe();
        outcome
    }
}
