//! The single writer for an event's live state.
//!
//! A transition is reconciled against the last known snapshot and rendered at
//! once, then written to the store. A failed write rolls the local state back
//! to the last snapshot confirmed by the change feed and is not retried. Every
//! feed message, echoes of our own writes included, replaces the local state.

use std::sync::Arc;
use std::time::Duration;

use marquee_program::{Change, EventId, EventSnapshot};

use crate::clock::Clock;
use crate::error::SyncError;
use crate::feed::feed_client::FeedMessage;
use crate::messages::{ConnectionState, Settings};
use crate::reconciler::reconciler::{Reconciled, Reconciler};
use crate::reconciler::transition::Transition;
use crate::store::traits::StateStore;

pub struct ConsoleSession {
    event_id: EventId,
    store: Arc<dyn StateStore>,
    reconciler: Reconciler,
    clock: Arc<dyn Clock>,
    write_timeout: Duration,
    confirmed: Option<EventSnapshot>,
    local: Option<EventSnapshot>,
    connection: ConnectionState,
}

impl ConsoleSession {
    pub fn new(
        event_id: EventId,
        store: Arc<dyn StateStore>,
        clock: Arc<dyn Clock>,
        settings: &Settings,
    ) -> Self {
        Self {
            event_id,
            store,
            reconciler: Reconciler::new(settings.break_label_suffix.clone()),
            clock,
            write_timeout: settings.write_timeout(),
            confirmed: None,
            local: None,
            connection: ConnectionState::Connecting,
        }
    }

    pub fn event_id(&self) -> &EventId {
        &self.event_id
    }

    /// What the operator currently sees, optimistic updates included.
    pub fn local(&self) -> Option<&EventSnapshot> {
        self.local.as_ref()
    }

    /// Last snapshot confirmed by the change feed.
    pub fn confirmed(&self) -> Option<&EventSnapshot> {
        self.confirmed.as_ref()
    }

    pub fn connection(&self) -> ConnectionState {
        self.connection
    }

    /// Reconcile `transition` and apply it locally. Nothing is written yet.
    ///
    /// A rejected transition leaves the local state untouched.
    pub fn begin(&mut self, transition: &Transition) -> Result<Reconciled, SyncError> {
        let base = self.local.as_ref().ok_or_else(|| {
            SyncError::FeedDisconnected(format!("no snapshot of {} received yet", self.event_id))
        })?;

        let reconciled = self
            .reconciler
            .apply(base, transition, self.clock.now())
            .map_err(|err| {
                log::warn!("Rejected {}: {}", transition, err);
                SyncError::from(err)
            })?;

        self.local = Some(reconciled.snapshot.clone());
        Ok(reconciled)
    }

    /// Write the changes of a transition started with `begin` as one batch,
    /// so observers never see part of a transition.
    ///
    /// On failure the local state reverts to the confirmed snapshot.
    pub async fn commit(&mut self, reconciled: Reconciled) -> Result<EventSnapshot, SyncError> {
        if reconciled.changes.is_empty() {
            return Ok(reconciled.snapshot);
        }

        let count = reconciled.changes.len();
        if let Err(err) = self.write(reconciled.changes).await {
            log::error!(
                "Writing {} record(s) of {} failed, reverting to confirmed state: {}",
                count,
                self.event_id,
                err
            );
            self.local = self.confirmed.clone();
            return Err(err);
        }
        Ok(reconciled.snapshot)
    }

    pub async fn apply(&mut self, transition: &Transition) -> Result<EventSnapshot, SyncError> {
        let reconciled = self.begin(transition)?;
        self.commit(reconciled).await
    }

    // The write runs on its own task so tearing the session down never
    // cancels it; it completes or fails on its own.
    async fn write(&self, changes: Vec<Change>) -> Result<(), SyncError> {
        let store = Arc::clone(&self.store);
        let event_id = self.event_id.clone();
        let write = tokio::spawn(async move { store.write(&event_id, changes).await });

        match tokio::time::timeout(self.write_timeout, write).await {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(e))) => Err(SyncError::StoreWriteFailed(e.to_string())),
            Ok(Err(e)) => Err(SyncError::StoreWriteFailed(e.to_string())),
            Err(_) => Err(SyncError::StoreWriteFailed(format!(
                "no response within {:?}",
                self.write_timeout
            ))),
        }
    }

    /// Take a feed message as the new authoritative state. Returns the new
    /// local snapshot when it changed.
    pub fn on_feed(&mut self, message: FeedMessage) -> Option<EventSnapshot> {
        match message {
            FeedMessage::Snapshot(snapshot) => {
                self.connection = ConnectionState::Live;
                self.confirm(snapshot)
            }
            FeedMessage::Changes(changes) => {
                let next = self.confirmed.as_ref()?.with_changes(&changes);
                self.confirm(next)
            }
            FeedMessage::Disconnected { reason } => {
                log::warn!("Console for {} lost its feed: {}", self.event_id, reason);
                self.connection = ConnectionState::Reconnecting { attempt: 0 };
                None
            }
            FeedMessage::Reconnecting { attempt } => {
                if self.connection != ConnectionState::Lost {
                    self.connection = ConnectionState::Reconnecting { attempt };
                }
                None
            }
            FeedMessage::Lost => {
                self.connection = ConnectionState::Lost;
                None
            }
        }
    }

    fn confirm(&mut self, snapshot: EventSnapshot) -> Option<EventSnapshot> {
        let changed = self.local.as_ref() != Some(&snapshot);
        self.confirmed = Some(snapshot.clone());
        self.local = Some(snapshot.clone());
        changed.then_some(snapshot)
    }
}
