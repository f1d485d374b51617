use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::EventId;

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContainerId(pub String);

impl ContainerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Points at one item by container and position.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ItemRef {
    pub container: ContainerId,
    pub index: usize,
}

impl ItemRef {
    pub fn new(container: impl Into<String>, index: usize) -> Self {
        Self {
            container: ContainerId::new(container),
            index,
        }
    }
}

impl fmt::Display for ItemRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.container, self.index)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    Performance,
    Break,
    SectionMarker,
    Note,
}

impl ItemKind {
    /// Whether items of this kind can ever become the active item.
    pub fn participates(&self) -> bool {
        match self {
            ItemKind::Performance | ItemKind::Break => true,
            ItemKind::SectionMarker | ItemKind::Note => false,
        }
    }
}

impl fmt::Display for ItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ItemKind::Performance => write!(f, "performance"),
            ItemKind::Break => write!(f, "break"),
            ItemKind::SectionMarker => write!(f, "section marker"),
            ItemKind::Note => write!(f, "note"),
        }
    }
}

/// One program entry with its live attributes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub title: String,
    pub kind: ItemKind,
    #[serde(default)]
    pub active: bool,
    /// Only meaningful for breaks. A break is running while this lies in the future.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timer_end: Option<DateTime<Utc>>,
    /// Static label for the configured break length, e.g. "15分".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,
}

impl Item {
    pub fn new(title: impl Into<String>, kind: ItemKind) -> Self {
        Self {
            title: title.into(),
            kind,
            active: false,
            timer_end: None,
            duration: None,
        }
    }

    pub fn performance(title: impl Into<String>) -> Self {
        Self::new(title, ItemKind::Performance)
    }

    pub fn intermission(title: impl Into<String>, duration: impl Into<String>) -> Self {
        Self {
            duration: Some(duration.into()),
            ..Self::new(title, ItemKind::Break)
        }
    }

    pub fn section_marker(title: impl Into<String>) -> Self {
        Self::new(title, ItemKind::SectionMarker)
    }

    pub fn note(title: impl Into<String>) -> Self {
        Self::new(title, ItemKind::Note)
    }

    pub fn is_break(&self) -> bool {
        self.kind == ItemKind::Break
    }
}

/// Ordered list of items belonging to one event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ItemContainer {
    pub id: ContainerId,
    pub event_id: EventId,
    pub items: Vec<Item>,
}

impl ItemContainer {
    pub fn new(id: impl Into<String>, event_id: EventId, items: Vec<Item>) -> Self {
        Self {
            id: ContainerId::new(id),
            event_id,
            items,
        }
    }
}
