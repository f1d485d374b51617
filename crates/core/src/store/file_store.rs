use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use marquee_program::{Change, EventId, EventSnapshot};
use serde_json::from_reader;

use crate::error::StoreError;
use crate::feed::subscription::Subscription;
use crate::store::memory_store::{MemoryStore, StoreDocument};
use crate::store::traits::StateStore;

/// A state store persisted as a single JSON document.
///
/// Every write rewrites the file before it is committed in memory and
/// published on the change feed. The file is written off the async workers.
pub struct FileStore {
    path: PathBuf,
    inner: MemoryStore,
}

impl FileStore {
    /// Open the store at `path`, starting empty when the file does not exist.
    pub fn open(path: impl Into<PathBuf>, feed_capacity: usize) -> Result<Self, StoreError> {
        let path = path.into();
        let inner = if path.exists() {
            let file = File::open(&path)?;
            let document: StoreDocument = from_reader(file)?;
            log::info!(
                "Loaded {} event(s) from {}",
                document.events.len(),
                path.display()
            );
            MemoryStore::from_document(document, feed_capacity)
        } else {
            log::info!("Starting empty store at {}", path.display());
            MemoryStore::new(feed_capacity)
        };

        Ok(Self { path, inner })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn contains(&self, event_id: &EventId) -> bool {
        self.inner.contains(event_id)
    }

    /// Seed or replace an event and persist it immediately.
    pub fn insert_event(&self, snapshot: EventSnapshot) -> Result<(), StoreError> {
        self.inner.insert_event(snapshot);
        save(&self.path, &self.inner.document())
    }

    pub fn set_available(&self, available: bool) {
        self.inner.set_available(available);
    }
}

fn save(path: &Path, document: &StoreDocument) -> Result<(), StoreError> {
    write_atomically(path, &serde_json::to_vec_pretty(document)?)
}

/// Write an encoded document on the blocking pool.
pub(crate) async fn persist(path: PathBuf, bytes: Vec<u8>) -> Result<(), StoreError> {
    tokio::task::spawn_blocking(move || write_atomically(&path, &bytes))
        .await
        .map_err(|e| StoreError::Io(io::Error::other(e)))?
}

fn write_atomically(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        if parent != Path::new("") && parent != Path::new(".") {
            fs::create_dir_all(parent)?;
        }
    }

    // Write beside the target and rename so a crash never leaves half a file.
    let staging = path.with_extension("json.tmp");
    fs::write(&staging, bytes)?;
    fs::rename(&staging, path)?;
    Ok(())
}

#[async_trait]
impl StateStore for FileStore {
    async fn read(&self, event_id: &EventId) -> Result<EventSnapshot, StoreError> {
        self.inner.read(event_id).await
    }

    async fn write(&self, event_id: &EventId, changes: Vec<Change>) -> Result<(), StoreError> {
        self.inner
            .write_with(event_id, changes, Some(self.path.as_path()))
            .await
    }

    async fn subscribe(&self, event_id: &EventId) -> Result<Subscription, StoreError> {
        self.inner.subscribe(event_id).await
    }
}

#[cfg(test)]
mod tests {
    use marquee_program::{EventRecord, Item, ItemContainer};
    use tempfile::TempDir;

    use super::*;

    fn gala() -> EventSnapshot {
        let id = EventId::new("gala");
        EventSnapshot::new(
            EventRecord::new(id.clone()),
            vec![ItemContainer::new(
                "main",
                id,
                vec![Item::performance("A"), Item::intermission("Break", "15分")],
            )],
        )
    }

    #[tokio::test]
    async fn test_writes_survive_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("shows").join("store.json");
        let id = EventId::new("gala");

        let store = FileStore::open(&path, 16).unwrap();
        store.insert_event(gala()).unwrap();

        let mut record = EventRecord::new(id.clone());
        record.encore_revealed = true;
        store.write(&id, vec![Change::Event(record)]).await.unwrap();
        drop(store);

        let reopened = FileStore::open(&path, 16).unwrap();
        let snapshot = reopened.read(&id).await.unwrap();
        assert!(snapshot.event.encore_revealed);
        assert_eq!(snapshot.containers[0].items.len(), 2);
    }

    #[tokio::test]
    async fn test_open_missing_file_is_empty() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileStore::open(temp_dir.path().join("none.json"), 16).unwrap();
        assert!(matches!(
            store.read(&EventId::new("gala")).await,
            Err(StoreError::UnknownEvent(_))
        ));
    }

    #[test]
    fn test_open_rejects_corrupt_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("store.json");
        fs::write(&path, "{ not json").unwrap();

        assert!(matches!(
            FileStore::open(&path, 16),
            Err(StoreError::Serialization(_))
        ));
    }
}
