use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use marquee_program::{Change, EventId, EventSnapshot};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::error::StoreError;
use crate::feed::subscription::{FeedEvent, Subscription};
use crate::store::file_store::persist;
use crate::store::traits::StateStore;

/// Everything a store holds, in the shape it is persisted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreDocument {
    pub version: String,
    pub events: Vec<EventSnapshot>,
}

// Same shape as `StoreDocument`, borrowing the tables instead of cloning them.
#[derive(Serialize)]
struct DocumentView<'a> {
    version: &'a str,
    events: Vec<&'a EventSnapshot>,
}

#[derive(Debug, Default)]
struct Tables {
    events: BTreeMap<EventId, EventSnapshot>,
}

impl Tables {
    /// The event as it will look once `changes` commit. Only that event is copied.
    fn stage(&self, event_id: &EventId, changes: &[Change]) -> Result<EventSnapshot, StoreError> {
        let mut staged = self
            .events
            .get(event_id)
            .cloned()
            .ok_or_else(|| StoreError::UnknownEvent(event_id.clone()))?;

        for change in changes {
            if change.event_id() != event_id {
                return Err(StoreError::UnknownEvent(change.event_id().clone()));
            }
            match change {
                Change::Event(record) => staged.event = record.clone(),
                Change::Container(container) => {
                    let existing = staged
                        .containers
                        .iter_mut()
                        .find(|c| c.id == container.id)
                        .ok_or_else(|| StoreError::UnknownContainer(container.id.clone()))?;
                    *existing = container.clone();
                }
            }
        }
        Ok(staged)
    }

    /// Pretty JSON of every event, with `staged` standing in for its event.
    fn encode_with(&self, staged: &EventSnapshot) -> Result<Vec<u8>, StoreError> {
        let view = DocumentView {
            version: env!("CARGO_PKG_VERSION"),
            events: self
                .events
                .iter()
                .map(|(id, snapshot)| if id == staged.id() { staged } else { snapshot })
                .collect(),
        };
        Ok(serde_json::to_vec_pretty(&view)?)
    }

    fn document(&self) -> StoreDocument {
        StoreDocument {
            version: env!("CARGO_PKG_VERSION").to_string(),
            events: self.events.values().cloned().collect(),
        }
    }
}

/// In-process state store with a broadcast change feed.
///
/// Availability can be switched off to simulate an outage: reads, writes and
/// subscriptions fail, and every live subscription is disconnected.
pub struct MemoryStore {
    tables: Mutex<Tables>,
    // Held across a whole write so commits and their feed events keep one order.
    writer: tokio::sync::Mutex<()>,
    feed: Mutex<broadcast::Sender<FeedEvent>>,
    feed_capacity: usize,
    available: AtomicBool,
    write_delay: Mutex<Option<Duration>>,
    commits: AtomicUsize,
}

impl MemoryStore {
    pub fn new(feed_capacity: usize) -> Self {
        let feed_capacity = feed_capacity.max(1);
        let (sender, _) = broadcast::channel(feed_capacity);
        Self {
            tables: Mutex::new(Tables::default()),
            writer: tokio::sync::Mutex::new(()),
            feed: Mutex::new(sender),
            feed_capacity,
            available: AtomicBool::new(true),
            write_delay: Mutex::new(None),
            commits: AtomicUsize::new(0),
        }
    }

    pub fn from_document(document: StoreDocument, feed_capacity: usize) -> Self {
        let store = Self::new(feed_capacity);
        for snapshot in document.events {
            store.insert_event(snapshot);
        }
        store
    }

    /// Seed or replace an event outright. Not published on the feed.
    pub fn insert_event(&self, snapshot: EventSnapshot) {
        self.tables
            .lock()
            .events
            .insert(snapshot.id().clone(), snapshot);
    }

    pub fn contains(&self, event_id: &EventId) -> bool {
        self.tables.lock().events.contains_key(event_id)
    }

    pub fn document(&self) -> StoreDocument {
        self.tables.lock().document()
    }

    pub fn set_available(&self, available: bool) {
        let was = self.available.swap(available, Ordering::SeqCst);
        if was && !available {
            // Dropping the old sender closes every outstanding receiver.
            let (sender, _) = broadcast::channel(self.feed_capacity);
            *self.feed.lock() = sender;
            log::warn!("State store went offline, change feed subscribers disconnected");
        } else if !was && available {
            log::info!("State store back online");
        }
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    /// Delay every subsequent write by `delay` before it commits.
    pub fn set_write_delay(&self, delay: Option<Duration>) {
        *self.write_delay.lock() = delay;
    }

    /// Number of writes committed so far.
    pub fn commit_count(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    fn ensure_available(&self) -> Result<(), StoreError> {
        if self.is_available() {
            Ok(())
        } else {
            Err(StoreError::Unavailable)
        }
    }

    /// Stage `changes`, persist the resulting document to `persist_to` when
    /// given, then commit and publish them as one feed event. Nothing is
    /// committed or published when staging or persisting fails.
    ///
    /// The table lock is only held to stage, encode and commit; disk i/o runs
    /// on the blocking pool while reads and subscriptions carry on.
    pub(crate) async fn write_with(
        &self,
        event_id: &EventId,
        changes: Vec<Change>,
        persist_to: Option<&Path>,
    ) -> Result<(), StoreError> {
        let _writer = self.writer.lock().await;
        self.ensure_available()?;

        let delay = *self.write_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
            self.ensure_available()?;
        }

        if changes.is_empty() {
            return Ok(());
        }

        let (staged, encoded) = {
            let tables = self.tables.lock();
            let staged = tables.stage(event_id, &changes)?;
            let encoded = match persist_to {
                Some(_) => Some(tables.encode_with(&staged)?),
                None => None,
            };
            (staged, encoded)
        };

        if let (Some(path), Some(bytes)) = (persist_to, encoded) {
            persist(path.to_path_buf(), bytes).await?;
        }

        self.tables.lock().events.insert(event_id.clone(), staged);
        self.commits.fetch_add(1, Ordering::SeqCst);
        log::debug!("Committed {} record(s) for {}", changes.len(), event_id);

        // No receivers is not an error.
        let _ = self.feed.lock().send(FeedEvent {
            event_id: event_id.clone(),
            changes,
        });
        Ok(())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn read(&self, event_id: &EventId) -> Result<EventSnapshot, StoreError> {
        self.ensure_available()?;
        self.tables
            .lock()
            .events
            .get(event_id)
            .cloned()
            .ok_or_else(|| StoreError::UnknownEvent(event_id.clone()))
    }

    async fn write(&self, event_id: &EventId, changes: Vec<Change>) -> Result<(), StoreError> {
        self.write_with(event_id, changes, None).await
    }

    async fn subscribe(&self, event_id: &EventId) -> Result<Subscription, StoreError> {
        self.ensure_available()?;
        if !self.tables.lock().events.contains_key(event_id) {
            return Err(StoreError::UnknownEvent(event_id.clone()));
        }
        let receiver = self.feed.lock().subscribe();
        log::debug!("New change feed subscription for {}", event_id);
        Ok(Subscription::new(event_id.clone(), receiver))
    }
}
