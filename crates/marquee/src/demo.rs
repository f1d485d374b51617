use marquee_program::{EventId, EventRecord, EventSnapshot, Item, ItemContainer};

/// A two-act programme used to seed an empty store.
pub fn spring_gala(event_id: &EventId) -> EventSnapshot {
    EventSnapshot::new(
        EventRecord::new(event_id.clone()),
        vec![
            ItemContainer::new(
                "act-1",
                event_id.clone(),
                vec![
                    Item::section_marker("Act I"),
                    Item::performance("Overture"),
                    Item::performance("Nocturne in E-flat"),
                    Item::note("Stage reset, piano moves left"),
                    Item::performance("String Quartet No. 2"),
                    Item::intermission("Intermission", "15分"),
                ],
            ),
            ItemContainer::new(
                "act-2",
                event_id.clone(),
                vec![
                    Item::section_marker("Act II"),
                    Item::performance("Solo Cello Suite"),
                    Item::performance("Finale"),
                ],
            ),
        ],
    )
}
