use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use marquee_program::{EventId, EventSnapshot, ItemRef};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::clock::Clock;
use crate::feed::feed_client::{FeedClient, FeedHandle, FeedMessage};
use crate::messages::{ConnectionState, Settings, ViewerEvent};
use crate::store::traits::StateStore;
use crate::viewer::countdown::{format_remaining, remaining};

// tokio intervals reject a zero period.
const MIN_TICK: Duration = Duration::from_millis(1);

/// What a viewer displays, derived from one snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShowState {
    pub active_item: Option<ItemRef>,
    pub active_title: Option<String>,
    pub break_info: Option<BreakInfo>,
    pub encore_revealed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakInfo {
    pub item_ref: ItemRef,
    pub title: String,
    pub timer_end: Option<DateTime<Utc>>,
    pub duration: Option<String>,
}

impl ShowState {
    pub fn project(snapshot: &EventSnapshot) -> Self {
        let active_item = snapshot.active_items().into_iter().next();
        let active = active_item
            .as_ref()
            .and_then(|item_ref| snapshot.item(item_ref).map(|item| (item_ref, item)));

        let break_info = active
            .filter(|(_, item)| item.is_break())
            .map(|(item_ref, item)| BreakInfo {
                item_ref: item_ref.clone(),
                title: item.title.clone(),
                timer_end: item.timer_end,
                duration: item.duration.clone(),
            });

        Self {
            active_title: active.map(|(_, item)| item.title.clone()),
            active_item,
            break_info,
            encore_revealed: snapshot.event.encore_revealed,
        }
    }
}

/// Passive projection of one event's live state.
///
/// Every feed message replaces the local snapshot wholesale; the feed's
/// delivery order is authoritative. A viewer never writes.
pub struct ViewerSession {
    event_id: EventId,
    snapshot: Option<EventSnapshot>,
    state: Option<ShowState>,
    connection: ConnectionState,
}

impl ViewerSession {
    pub fn new(event_id: EventId) -> Self {
        Self {
            event_id,
            snapshot: None,
            state: None,
            connection: ConnectionState::Connecting,
        }
    }

    pub fn event_id(&self) -> &EventId {
        &self.event_id
    }

    pub fn snapshot(&self) -> Option<&EventSnapshot> {
        self.snapshot.as_ref()
    }

    pub fn current_state(&self) -> Option<&ShowState> {
        self.state.as_ref()
    }

    pub fn connection(&self) -> ConnectionState {
        self.connection
    }

    /// Apply one feed message. Returns the new projection when a snapshot or
    /// change was applied.
    pub fn apply(&mut self, message: FeedMessage) -> Option<ShowState> {
        match message {
            FeedMessage::Snapshot(snapshot) => {
                self.connection = ConnectionState::Live;
                self.replace(snapshot)
            }
            FeedMessage::Changes(changes) => {
                let next = self.snapshot.as_ref()?.with_changes(&changes);
                self.replace(next)
            }
            FeedMessage::Disconnected { .. } => {
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

    fn replace(&mut self, snapshot: EventSnapshot) -> Option<ShowState> {
        let state = ShowState::project(&snapshot);
        self.snapshot = Some(snapshot);
        self.state = Some(state.clone());
        Some(state)
    }

    /// Remaining time of the running break, frozen at zero once expired.
    /// Expiry never clears the break; only the console does that.
    pub fn countdown(&self, now: DateTime<Utc>) -> Option<(ItemRef, Duration)> {
        let info = self.state.as_ref()?.break_info.as_ref()?;
        let timer_end = info.timer_end?;
        Some((info.item_ref.clone(), remaining(timer_end, now)))
    }

    /// Drive the session from a feed until the feed or the display goes away.
    pub async fn run(
        mut self,
        mut feed: mpsc::Receiver<FeedMessage>,
        events: mpsc::UnboundedSender<ViewerEvent>,
        state_tx: watch::Sender<Option<ShowState>>,
        clock: Arc<dyn Clock>,
        tick: Duration,
    ) {
        let mut ticker = tokio::time::interval(tick.max(MIN_TICK));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                message = feed.recv() => {
                    let Some(message) = message else { break };
                    let before = self.connection;
                    let changed = self.apply(message);

                    if self.connection != before {
                        log::info!("Viewer of {} is {}", self.event_id, self.connection);
                        if events.send(ViewerEvent::ConnectionChanged { state: self.connection }).is_err() {
                            break;
                        }
                    }
                    if let Some(state) = changed {
                        state_tx.send_replace(Some(state.clone()));
                        if events.send(ViewerEvent::StateChanged { state }).is_err() {
                            break;
                        }
                    }
                }
                _ = ticker.tick() => {
                    if let Some((item_ref, remaining)) = self.countdown(clock.now()) {
                        let display = format_remaining(remaining);
                        if events.send(ViewerEvent::Countdown { item_ref, remaining, display }).is_err() {
                            break;
                        }
                    }
                }
            }
        }

        log::debug!("Viewer of {} closed", self.event_id);
        let _ = events.send(ViewerEvent::ShutdownComplete);
    }
}

/// A running viewer: its feed subscription, countdown timer and display state.
pub struct ViewerHandle {
    event_id: EventId,
    feed: FeedHandle,
    task: JoinHandle<()>,
    state_rx: watch::Receiver<Option<ShowState>>,
}

impl ViewerHandle {
    pub fn spawn(
        store: Arc<dyn StateStore>,
        event_id: EventId,
        settings: &Settings,
        clock: Arc<dyn Clock>,
    ) -> (Self, mpsc::UnboundedReceiver<ViewerEvent>) {
        let (feed, feed_rx) =
            FeedClient::new(store, event_id.clone(), settings.clone()).spawn();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(None);

        let session = ViewerSession::new(event_id.clone());
        let task = tokio::spawn(session.run(
            feed_rx,
            events_tx,
            state_tx,
            clock,
            settings.tick_interval(),
        ));

        (
            Self {
                event_id,
                feed,
                task,
                state_rx,
            },
            events_rx,
        )
    }

    pub fn event_id(&self) -> &EventId {
        &self.event_id
    }

    /// Latest projection, recomputed on every feed event.
    pub fn current_state(&self) -> Option<ShowState> {
        self.state_rx.borrow().clone()
    }

    /// Wait until the projection satisfies `predicate`.
    pub async fn wait_for<F>(&mut self, mut predicate: F) -> Option<ShowState>
    where
        F: FnMut(&ShowState) -> bool,
    {
        let state = self
            .state_rx
            .wait_for(|state| state.as_ref().is_some_and(&mut predicate))
            .await
            .ok()?;
        state.clone()
    }

    /// Tear down the subscription and timer. No further side effects.
    pub async fn shutdown(self) {
        let ViewerHandle { feed, task, .. } = self;
        feed.close();
        if let Err(e) = task.await {
            log::error!("Viewer task ended abnormally: {}", e);
        }
    }
}
