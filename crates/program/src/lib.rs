pub use item::{ContainerId, Item, ItemContainer, ItemKind, ItemRef};
pub use snapshot::{Change, EventId, EventRecord, EventSnapshot, Table};

mod item;
mod snapshot;
