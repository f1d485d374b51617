use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{ContainerId, Item, ItemContainer, ItemRef};

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(pub String);

impl EventId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The per-event record holding visibility flags.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub id: EventId,
    #[serde(default)]
    pub encore_revealed: bool,
}

impl EventRecord {
    pub fn new(id: EventId) -> Self {
        Self {
            id,
            encore_revealed: false,
        }
    }
}

/// Which record a change replaces.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Event,
    Container,
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Table::Event => write!(f, "event"),
            Table::Container => write!(f, "container"),
        }
    }
}

/// A whole-document replacement of one record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "table", content = "new_value", rename_all = "snake_case")]
pub enum Change {
    Event(EventRecord),
    Container(ItemContainer),
}

impl Change {
    pub fn table(&self) -> Table {
        match self {
            Change::Event(_) => Table::Event,
            Change::Container(_) => Table::Container,
        }
    }

    pub fn event_id(&self) -> &EventId {
        match self {
            Change::Event(record) => &record.id,
            Change::Container(container) => &container.event_id,
        }
    }
}

/// Full current value of one event: its record and every container.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EventSnapshot {
    pub event: EventRecord,
    pub containers: Vec<ItemContainer>,
}

impl EventSnapshot {
    pub fn new(event: EventRecord, containers: Vec<ItemContainer>) -> Self {
        Self { event, containers }
    }

    pub fn id(&self) -> &EventId {
        &self.event.id
    }

    pub fn container(&self, id: &ContainerId) -> Option<&ItemContainer> {
        self.containers.iter().find(|c| &c.id == id)
    }

    pub fn item(&self, item_ref: &ItemRef) -> Option<&Item> {
        self.container(&item_ref.container)?
            .items
            .get(item_ref.index)
    }

    /// References to every item currently flagged active, in container order.
    pub fn active_items(&self) -> Vec<ItemRef> {
        self.containers
            .iter()
            .flat_map(|container| {
                container
                    .items
                    .iter()
                    .enumerate()
                    .filter(|(_, item)| item.active)
                    .map(move |(index, _)| ItemRef {
                        container: container.id.clone(),
                        index,
                    })
            })
            .collect()
    }

    pub fn has_break(&self) -> bool {
        self.containers
            .iter()
            .any(|c| c.items.iter().any(Item::is_break))
    }

    /// Returns a new snapshot with the matching record replaced wholesale.
    ///
    /// A container not yet known is appended. Changes for other events are ignored.
    pub fn with_change(&self, change: &Change) -> EventSnapshot {
        self.with_changes(std::slice::from_ref(change))
    }

    /// Applies every change of one committed write in a single pass, so no
    /// state between them is ever produced.
    pub fn with_changes(&self, changes: &[Change]) -> EventSnapshot {
        let mut next = self.clone();
        for change in changes {
            next.replace(change);
        }
        next
    }

    fn replace(&mut self, change: &Change) {
        if change.event_id() != self.id() {
            return;
        }

        match change {
            Change::Event(record) => self.event = record.clone(),
            Change::Container(container) => {
                match self.containers.iter_mut().find(|c| c.id == container.id) {
                    Some(existing) => *existing = container.clone(),
                    None => self.containers.push(container.clone()),
                }
            }
        }
    }
}
