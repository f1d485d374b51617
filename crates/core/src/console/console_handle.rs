use std::sync::Arc;

use marquee_program::{EventId, EventSnapshot, ItemRef};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::clock::Clock;
use crate::console::console_session::ConsoleSession;
use crate::error::SyncError;
use crate::feed::feed_client::{FeedClient, FeedHandle, FeedMessage};
use crate::messages::{ConnectionState, ConsoleCommand, ConsoleEvent, Settings};
use crate::reconciler::transition::Transition;
use crate::store::traits::StateStore;

/// Operator-facing side of a running console session.
///
/// Commands are processed one at a time in arrival order, so a second
/// transition is reconciled against the state the first one produced.
pub struct ConsoleHandle {
    event_id: EventId,
    command_tx: mpsc::UnboundedSender<ConsoleCommand>,
    task: JoinHandle<()>,
}

impl ConsoleHandle {
    pub fn spawn(
        store: Arc<dyn StateStore>,
        event_id: EventId,
        settings: &Settings,
        clock: Arc<dyn Clock>,
    ) -> (Self, mpsc::UnboundedReceiver<ConsoleEvent>) {
        let (feed, feed_rx) =
            FeedClient::new(Arc::clone(&store), event_id.clone(), settings.clone()).spawn();
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let session = ConsoleSession::new(event_id.clone(), store, clock, settings);
        let task = tokio::spawn(run(session, feed, feed_rx, command_rx, events_tx));

        (
            Self {
                event_id,
                command_tx,
                task,
            },
            events_rx,
        )
    }

    pub fn event_id(&self) -> &EventId {
        &self.event_id
    }

    pub async fn apply(&self, transition: Transition) -> Result<EventSnapshot, SyncError> {
        let (reply, rx) = oneshot::channel();
        self.send(ConsoleCommand::Apply { transition, reply })?;
        rx.await.map_err(|_| SyncError::SessionClosed)?
    }

    pub async fn activate(&self, item_ref: ItemRef) -> Result<EventSnapshot, SyncError> {
        self.apply(Transition::Activate(item_ref)).await
    }

    pub async fn deactivate(&self, item_ref: ItemRef) -> Result<EventSnapshot, SyncError> {
        self.apply(Transition::Deactivate(item_ref)).await
    }

    pub async fn start_break(
        &self,
        item_ref: ItemRef,
        minutes: i64,
    ) -> Result<EventSnapshot, SyncError> {
        self.apply(Transition::StartBreak { item_ref, minutes }).await
    }

    pub async fn stop_break(&self, item_ref: ItemRef) -> Result<EventSnapshot, SyncError> {
        self.apply(Transition::StopBreak(item_ref)).await
    }

    pub async fn set_encore_revealed(&self, revealed: bool) -> Result<EventSnapshot, SyncError> {
        self.apply(Transition::SetEncoreRevealed(revealed)).await
    }

    /// The locally rendered snapshot, if one has been received.
    pub async fn snapshot(&self) -> Result<Option<EventSnapshot>, SyncError> {
        let (reply, rx) = oneshot::channel();
        self.send(ConsoleCommand::QuerySnapshot { reply })?;
        rx.await.map_err(|_| SyncError::SessionClosed)
    }

    pub async fn connection(&self) -> Result<ConnectionState, SyncError> {
        let (reply, rx) = oneshot::channel();
        self.send(ConsoleCommand::QueryConnection { reply })?;
        rx.await.map_err(|_| SyncError::SessionClosed)
    }

    /// Stop the session. Writes already handed to the store still complete.
    pub async fn shutdown(self) {
        let _ = self.command_tx.send(ConsoleCommand::Shutdown);
        if let Err(e) = self.task.await {
            log::error!("Console task ended abnormally: {}", e);
        }
    }

    fn send(&self, command: ConsoleCommand) -> Result<(), SyncError> {
        self.command_tx
            .send(command)
            .map_err(|_| SyncError::SessionClosed)
    }
}

async fn run(
    mut session: ConsoleSession,
    feed: FeedHandle,
    mut feed_rx: mpsc::Receiver<FeedMessage>,
    mut commands: mpsc::UnboundedReceiver<ConsoleCommand>,
    events: mpsc::UnboundedSender<ConsoleEvent>,
) {
    log::info!("Console session for {} started", session.event_id());

    loop {
        tokio::select! {
            command = commands.recv() => {
                match command {
                    Some(ConsoleCommand::Apply { transition, reply }) => {
                        let result = apply(&mut session, &transition, &events).await;
                        let _ = reply.send(result);
                    }
                    Some(ConsoleCommand::QuerySnapshot { reply }) => {
                        let _ = reply.send(session.local().cloned());
                    }
                    Some(ConsoleCommand::QueryConnection { reply }) => {
                        let _ = reply.send(session.connection());
                    }
                    Some(ConsoleCommand::Shutdown) | None => break,
                }
            }
            message = feed_rx.recv() => {
                let Some(message) = message else { break };
                let before = session.connection();
                let changed = session.on_feed(message);

                if session.connection() != before {
                    log::info!("Console for {} is {}", session.event_id(), session.connection());
                    let _ = events.send(ConsoleEvent::ConnectionChanged {
                        state: session.connection(),
                    });
                }
                if let Some(snapshot) = changed {
                    let _ = events.send(ConsoleEvent::SnapshotChanged {
                        snapshot,
                        confirmed: true,
                    });
                }
            }
        }
    }

    feed.close();
    log::info!("Console session for {} closed", session.event_id());
    let _ = events.send(ConsoleEvent::ShutdownComplete);
}

async fn apply(
    session: &mut ConsoleSession,
    transition: &Transition,
    events: &mpsc::UnboundedSender<ConsoleEvent>,
) -> Result<EventSnapshot, SyncError> {
    let reconciled = match session.begin(transition) {
        Ok(reconciled) => reconciled,
        Err(error) => {
            let _ = events.send(ConsoleEvent::Notice {
                transition: transition.clone(),
                error: error.clone(),
            });
            return Err(error);
        }
    };

    if reconciled.is_noop() {
        return Ok(reconciled.snapshot);
    }

    let _ = events.send(ConsoleEvent::SnapshotChanged {
        snapshot: reconciled.snapshot.clone(),
        confirmed: false,
    });
    log::debug!("Applying {} to {}", transition, session.event_id());

    match session.commit(reconciled).await {
        Ok(snapshot) => Ok(snapshot),
        Err(error) => {
            if let Some(snapshot) = session.local().cloned() {
                let _ = events.send(ConsoleEvent::Reverted {
                    snapshot,
                    error: error.clone(),
                });
            }
            Err(error)
        }
    }
}
