//! Pure state transitions for the live show.
//!
//! `Reconciler::apply` maps a snapshot and a transition to the next snapshot
//! plus the whole-document replacements that have to be written. At most one
//! item per event is ever active after an apply.

use chrono::{DateTime, TimeDelta, Utc};
use marquee_program::{Change, EventSnapshot, Item, ItemKind, ItemRef};

use crate::error::ReconcileError;
use crate::reconciler::transition::Transition;

pub const DEFAULT_BREAK_LABEL_SUFFIX: &str = "分";

/// Result of a successful transition.
#[derive(Debug, Clone, PartialEq)]
pub struct Reconciled {
    pub snapshot: EventSnapshot,
    /// Records whose value differs from the input snapshot. Containers left
    /// without an active item come before the one gaining it.
    pub changes: Vec<Change>,
}

impl Reconciled {
    pub fn is_noop(&self) -> bool {
        self.changes.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct Reconciler {
    break_label_suffix: String,
}

impl Default for Reconciler {
    fn default() -> Self {
        Self::new(DEFAULT_BREAK_LABEL_SUFFIX)
    }
}

impl Reconciler {
    pub fn new(break_label_suffix: impl Into<String>) -> Self {
        Self {
            break_label_suffix: break_label_suffix.into(),
        }
    }

    pub fn break_label(&self, minutes: i64) -> String {
        break_label(minutes, &self.break_label_suffix)
    }

    pub fn apply(
        &self,
        snapshot: &EventSnapshot,
        transition: &Transition,
        now: DateTime<Utc>,
    ) -> Result<Reconciled, ReconcileError> {
        let mut next = snapshot.clone();

        match transition {
            Transition::Activate(item_ref) => {
                let item = lookup(snapshot, item_ref)?;
                match item.kind {
                    ItemKind::Performance => {}
                    ItemKind::Break | ItemKind::SectionMarker | ItemKind::Note => {
                        return Err(invalid("activate", item_ref, item.kind));
                    }
                }

                deactivate_all(&mut next);
                item_mut(&mut next, item_ref)?.active = true;
            }
            Transition::Deactivate(item_ref) => {
                let item = lookup(snapshot, item_ref)?;
                if item.active {
                    clear(item_mut(&mut next, item_ref)?);
                }
            }
            Transition::StartBreak { item_ref, minutes } => {
                if *minutes <= 0 {
                    return Err(ReconcileError::InvalidArgument(format!(
                        "break minutes must be positive, got {}",
                        minutes
                    )));
                }
                let timer_end = TimeDelta::try_minutes(*minutes)
                    .and_then(|length| now.checked_add_signed(length))
                    .ok_or_else(|| {
                        ReconcileError::InvalidArgument(format!(
                            "break of {} minutes is out of range",
                            minutes
                        ))
                    })?;

                if !snapshot.has_break() {
                    return Err(ReconcileError::NoBreakConfigured);
                }

                let item = lookup(snapshot, item_ref)?;
                match item.kind {
                    ItemKind::Break => {}
                    ItemKind::Performance | ItemKind::SectionMarker | ItemKind::Note => {
                        return Err(invalid("start a break on", item_ref, item.kind));
                    }
                }

                deactivate_all(&mut next);
                let target = item_mut(&mut next, item_ref)?;
                target.active = true;
                target.timer_end = Some(timer_end);
                target.duration = Some(self.break_label(*minutes));
            }
            Transition::StopBreak(item_ref) => {
                let item = lookup(snapshot, item_ref)?;
                match item.kind {
                    ItemKind::Break => {}
                    ItemKind::Performance | ItemKind::SectionMarker | ItemKind::Note => {
                        return Err(invalid("stop", item_ref, item.kind));
                    }
                }

                clear(item_mut(&mut next, item_ref)?);
            }
            Transition::SetEncoreRevealed(revealed) => {
                next.event.encore_revealed = *revealed;
                // always written, even when unchanged
                let changes = vec![Change::Event(next.event.clone())];
                return Ok(Reconciled {
                    snapshot: next,
                    changes,
                });
            }
        }

        let changes = changes_between(snapshot, &next);
        Ok(Reconciled {
            snapshot: next,
            changes,
        })
    }
}

/// Canonical label for a break of `minutes`, e.g. `15分`.
pub fn break_label(minutes: i64, suffix: &str) -> String {
    format!("{}{}", minutes, suffix)
}

fn invalid(operation: &'static str, item_ref: &ItemRef, kind: ItemKind) -> ReconcileError {
    ReconcileError::InvalidTransition {
        operation,
        item_ref: item_ref.clone(),
        kind,
    }
}

fn lookup<'a>(snapshot: &'a EventSnapshot, item_ref: &ItemRef) -> Result<&'a Item, ReconcileError> {
    snapshot
        .item(item_ref)
        .ok_or_else(|| ReconcileError::NotFound(item_ref.clone()))
}

fn item_mut<'a>(
    snapshot: &'a mut EventSnapshot,
    item_ref: &ItemRef,
) -> Result<&'a mut Item, ReconcileError> {
    snapshot
        .containers
        .iter_mut()
        .find(|c| c.id == item_ref.container)
        .and_then(|c| c.items.get_mut(item_ref.index))
        .ok_or_else(|| ReconcileError::NotFound(item_ref.clone()))
}

// A break is never left inactive with a timer still set.
fn clear(item: &mut Item) {
    item.active = false;
    if item.is_break() {
        item.timer_end = None;
    }
}

fn deactivate_all(snapshot: &mut EventSnapshot) {
    for item in snapshot
        .containers
        .iter_mut()
        .flat_map(|c| c.items.iter_mut())
    {
        clear(item);
    }
}

fn changes_between(before: &EventSnapshot, after: &EventSnapshot) -> Vec<Change> {
    let mut changes = Vec::new();
    if before.event != after.event {
        changes.push(Change::Event(after.event.clone()));
    }
    changes.extend(container_changes(before, after));
    changes
}

// Containers left with no active item come first. Written in this order, a
// failure part way through can leave zero active items but never two.
fn container_changes(before: &EventSnapshot, after: &EventSnapshot) -> Vec<Change> {
    let mut changed: Vec<_> = after
        .containers
        .iter()
        .filter(|container| before.container(&container.id) != Some(*container))
        .collect();
    changed.sort_by_key(|container| container.items.iter().any(|item| item.active));
    changed.into_iter().cloned().map(Change::Container).collect()
}

#[cfg(test)]
mod tests {
    use marquee_program::{EventId, EventRecord, ItemContainer};

    use super::*;

    fn at(rfc3339: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(rfc3339)
            .unwrap()
            .with_timezone(&Utc)
    }

    fn now() -> DateTime<Utc> {
        at("2026-05-01T19:00:00Z")
    }

    fn gala() -> EventSnapshot {
        let id = EventId::new("gala");
        EventSnapshot::new(
            EventRecord::new(id.clone()),
            vec![
                ItemContainer::new(
                    "act-1",
                    id.clone(),
                    vec![
                        Item::section_marker("Act I"),
                        Item::performance("A"),
                        Item::performance("B"),
                        Item::intermission("Intermission", "20分"),
                    ],
                ),
                ItemContainer::new(
                    "act-2",
                    id,
                    vec![Item::performance("C"), Item::note("Thanks to our sponsors")],
                ),
            ],
        )
    }

    fn no_breaks() -> EventSnapshot {
        let id = EventId::new("recital");
        EventSnapshot::new(
            EventRecord::new(id.clone()),
            vec![ItemContainer::new(
                "main",
                id,
                vec![Item::performance("A"), Item::performance("B")],
            )],
        )
    }

    fn apply(snapshot: &EventSnapshot, transition: Transition) -> Result<Reconciled, ReconcileError> {
        Reconciler::default().apply(snapshot, &transition, now())
    }

    #[test]
    fn test_activate_switches_between_items() {
        let a = ItemRef::new("act-1", 1);
        let b = ItemRef::new("act-1", 2);

        let first = apply(&gala(), Transition::Activate(a.clone())).unwrap();
        assert!(first.snapshot.item(&a).unwrap().active);
        assert!(!first.snapshot.item(&b).unwrap().active);

        let second = apply(&first.snapshot, Transition::Activate(b.clone())).unwrap();
        assert!(!second.snapshot.item(&a).unwrap().active);
        assert!(second.snapshot.item(&b).unwrap().active);
        assert_eq!(second.snapshot.active_items(), vec![b]);
    }

    #[test]
    fn test_activate_across_containers_writes_both() {
        let a = ItemRef::new("act-1", 1);
        let c = ItemRef::new("act-2", 0);

        let first = apply(&gala(), Transition::Activate(a)).unwrap();
        let second = apply(&first.snapshot, Transition::Activate(c.clone())).unwrap();

        assert_eq!(second.snapshot.active_items(), vec![c]);
        assert_eq!(second.changes.len(), 2);
        assert!(second
            .changes
            .iter()
            .all(|change| matches!(change, Change::Container(_))));
    }

    #[test]
    fn test_deactivations_are_written_first() {
        let first = apply(&gala(), Transition::Activate(ItemRef::new("act-2", 0))).unwrap();
        let second = apply(&first.snapshot, Transition::Activate(ItemRef::new("act-1", 1)))
            .unwrap();

        let order: Vec<_> = second
            .changes
            .iter()
            .map(|change| match change {
                Change::Container(container) => container.id.as_str().to_string(),
                Change::Event(_) => "event".to_string(),
            })
            .collect();
        assert_eq!(order, vec!["act-2", "act-1"]);
    }

    #[test]
    fn test_activate_is_idempotent() {
        let a = ItemRef::new("act-1", 1);
        let once = apply(&gala(), Transition::Activate(a.clone())).unwrap();
        let twice = apply(&once.snapshot, Transition::Activate(a)).unwrap();

        assert_eq!(once.snapshot, twice.snapshot);
        assert!(twice.is_noop());
    }

    #[test]
    fn test_activate_rejects_break_and_inert_items() {
        let snapshot = gala();
        for index in [0, 3] {
            let err = apply(&snapshot, Transition::Activate(ItemRef::new("act-1", index)));
            assert!(matches!(err, Err(ReconcileError::InvalidTransition { .. })));
        }
        let err = apply(&snapshot, Transition::Activate(ItemRef::new("act-2", 1)));
        assert!(matches!(err, Err(ReconcileError::InvalidTransition { .. })));
    }

    #[test]
    fn test_stale_reference_is_not_found() {
        let snapshot = gala();
        assert_eq!(
            apply(&snapshot, Transition::Activate(ItemRef::new("act-1", 42))),
            Err(ReconcileError::NotFound(ItemRef::new("act-1", 42)))
        );
        assert_eq!(
            apply(&snapshot, Transition::Deactivate(ItemRef::new("encore", 0))),
            Err(ReconcileError::NotFound(ItemRef::new("encore", 0)))
        );
    }

    #[test]
    fn test_deactivate() {
        let a = ItemRef::new("act-1", 1);
        let active = apply(&gala(), Transition::Activate(a.clone())).unwrap();

        let cleared = apply(&active.snapshot, Transition::Deactivate(a.clone())).unwrap();
        assert!(cleared.snapshot.active_items().is_empty());
        assert_eq!(cleared.changes.len(), 1);

        let again = apply(&cleared.snapshot, Transition::Deactivate(a)).unwrap();
        assert!(again.is_noop());
    }

    #[test]
    fn test_start_break_sets_timer_and_label() {
        let brk = ItemRef::new("act-1", 3);
        let result = apply(
            &gala(),
            Transition::StartBreak {
                item_ref: brk.clone(),
                minutes: 15,
            },
        )
        .unwrap();

        let item = result.snapshot.item(&brk).unwrap();
        assert!(item.active);
        assert_eq!(item.timer_end, Some(now() + TimeDelta::seconds(900)));
        assert_eq!(item.duration.as_deref(), Some("15分"));
    }

    #[test]
    fn test_restart_break_replaces_timer_and_label() {
        let brk = ItemRef::new("act-1", 3);
        let first = apply(
            &gala(),
            Transition::StartBreak {
                item_ref: brk.clone(),
                minutes: 15,
            },
        )
        .unwrap();
        let second = apply(
            &first.snapshot,
            Transition::StartBreak {
                item_ref: brk.clone(),
                minutes: 10,
            },
        )
        .unwrap();

        let item = second.snapshot.item(&brk).unwrap();
        assert_eq!(item.timer_end, Some(now() + TimeDelta::seconds(600)));
        assert_eq!(item.duration.as_deref(), Some("10分"));
    }

    #[test]
    fn test_start_break_deactivates_performance() {
        let a = ItemRef::new("act-2", 0);
        let brk = ItemRef::new("act-1", 3);
        let playing = apply(&gala(), Transition::Activate(a)).unwrap();
        let on_break = apply(
            &playing.snapshot,
            Transition::StartBreak {
                item_ref: brk.clone(),
                minutes: 20,
            },
        )
        .unwrap();

        assert_eq!(on_break.snapshot.active_items(), vec![brk]);
    }

    #[test]
    fn test_activate_ends_running_break() {
        let brk = ItemRef::new("act-1", 3);
        let on_break = apply(
            &gala(),
            Transition::StartBreak {
                item_ref: brk.clone(),
                minutes: 20,
            },
        )
        .unwrap();
        let resumed = apply(&on_break.snapshot, Transition::Activate(ItemRef::new("act-2", 0)))
            .unwrap();

        let item = resumed.snapshot.item(&brk).unwrap();
        assert!(!item.active);
        assert_eq!(item.timer_end, None);
    }

    #[test]
    fn test_start_break_rejects_non_positive_minutes() {
        let snapshot = gala();
        for minutes in [0, -5] {
            let result = apply(
                &snapshot,
                Transition::StartBreak {
                    item_ref: ItemRef::new("act-1", 3),
                    minutes,
                },
            );
            assert!(matches!(result, Err(ReconcileError::InvalidArgument(_))));
        }
    }

    #[test]
    fn test_start_break_without_break_item() {
        let snapshot = no_breaks();
        let result = apply(
            &snapshot,
            Transition::StartBreak {
                item_ref: ItemRef::new("main", 0),
                minutes: 15,
            },
        );
        assert_eq!(result, Err(ReconcileError::NoBreakConfigured));
    }

    #[test]
    fn test_start_break_on_performance_is_invalid() {
        let result = apply(
            &gala(),
            Transition::StartBreak {
                item_ref: ItemRef::new("act-1", 1),
                minutes: 15,
            },
        );
        assert!(matches!(
            result,
            Err(ReconcileError::InvalidTransition {
                kind: ItemKind::Performance,
                ..
            })
        ));
    }

    #[test]
    fn test_stop_break_clears_pair() {
        let brk = ItemRef::new("act-1", 3);
        let on_break = apply(
            &gala(),
            Transition::StartBreak {
                item_ref: brk.clone(),
                minutes: 15,
            },
        )
        .unwrap();
        let stopped = apply(&on_break.snapshot, Transition::StopBreak(brk.clone())).unwrap();

        let item = stopped.snapshot.item(&brk).unwrap();
        assert!(!item.active);
        assert_eq!(item.timer_end, None);
        // the configured label stays
        assert_eq!(item.duration.as_deref(), Some("15分"));

        let again = apply(&stopped.snapshot, Transition::StopBreak(brk)).unwrap();
        assert!(again.is_noop());
    }

    #[test]
    fn test_stop_break_requires_break() {
        let result = apply(&gala(), Transition::StopBreak(ItemRef::new("act-1", 1)));
        assert!(matches!(result, Err(ReconcileError::InvalidTransition { .. })));
    }

    #[test]
    fn test_deactivate_break_clears_timer() {
        let brk = ItemRef::new("act-1", 3);
        let on_break = apply(
            &gala(),
            Transition::StartBreak {
                item_ref: brk.clone(),
                minutes: 5,
            },
        )
        .unwrap();
        let cleared = apply(&on_break.snapshot, Transition::Deactivate(brk.clone())).unwrap();
        assert_eq!(cleared.snapshot.item(&brk).unwrap().timer_end, None);
    }

    #[test]
    fn test_encore_is_independent_of_activation() {
        let a = ItemRef::new("act-1", 1);
        let playing = apply(&gala(), Transition::Activate(a.clone())).unwrap();
        let revealed = apply(&playing.snapshot, Transition::SetEncoreRevealed(true)).unwrap();

        assert!(revealed.snapshot.event.encore_revealed);
        assert_eq!(revealed.snapshot.active_items(), vec![a]);
        assert_eq!(revealed.changes, vec![Change::Event(revealed.snapshot.event.clone())]);

        // still written when the value does not change
        let again = apply(&revealed.snapshot, Transition::SetEncoreRevealed(true)).unwrap();
        assert_eq!(again.changes.len(), 1);
    }

    #[test]
    fn test_output_is_deterministic() {
        let transition = Transition::StartBreak {
            item_ref: ItemRef::new("act-1", 3),
            minutes: 15,
        };
        let first = apply(&gala(), transition.clone()).unwrap();
        let second = apply(&gala(), transition).unwrap();

        assert_eq!(
            serde_json::to_vec(&first.snapshot).unwrap(),
            serde_json::to_vec(&second.snapshot).unwrap()
        );
    }

    #[test]
    fn test_errors_leave_input_untouched() {
        let snapshot = gala();
        let before = snapshot.clone();
        let _ = apply(&snapshot, Transition::Activate(ItemRef::new("act-1", 3)));
        assert_eq!(snapshot, before);
    }

    #[test]
    fn test_custom_label_suffix() {
        let reconciler = Reconciler::new(" min");
        assert_eq!(reconciler.break_label(15), "15 min");
        assert_eq!(break_label(15, DEFAULT_BREAK_LABEL_SUFFIX), "15分");
    }

    mod properties {
        use proptest::prelude::*;

        use super::*;

        fn item_ref() -> impl Strategy<Value = ItemRef> {
            (
                prop_oneof![Just("act-1"), Just("act-2"), Just("main"), Just("gone")],
                0usize..5,
            )
                .prop_map(|(container, index)| ItemRef::new(container, index))
        }

        fn transition() -> impl Strategy<Value = Transition> {
            prop_oneof![
                item_ref().prop_map(Transition::Activate),
                item_ref().prop_map(Transition::Deactivate),
                (item_ref(), -2i64..180)
                    .prop_map(|(item_ref, minutes)| Transition::StartBreak { item_ref, minutes }),
                item_ref().prop_map(Transition::StopBreak),
                any::<bool>().prop_map(Transition::SetEncoreRevealed),
            ]
        }

        fn program() -> impl Strategy<Value = EventSnapshot> {
            prop_oneof![Just(gala()), Just(no_breaks())]
        }

        fn breaks_are_consistent(snapshot: &EventSnapshot) -> bool {
            snapshot
                .containers
                .iter()
                .flat_map(|c| c.items.iter())
                .all(|item| item.active || item.timer_end.is_none())
        }

        proptest! {
            #[test]
            fn test_at_most_one_active_item(
                start in program(),
                steps in prop::collection::vec(transition(), 1..40),
            ) {
                let reconciler = Reconciler::default();
                let mut snapshot = start;

                for (n, step) in steps.iter().enumerate() {
                    let at = now() + TimeDelta::minutes(n as i64);
                    match reconciler.apply(&snapshot, step, at) {
                        Ok(reconciled) => {
                            prop_assert!(reconciled.snapshot.active_items().len() <= 1);
                            prop_assert!(breaks_are_consistent(&reconciled.snapshot));
                            // the batch alone carries the previous state to the next
                            prop_assert_eq!(
                                snapshot.with_changes(&reconciled.changes),
                                reconciled.snapshot.clone()
                            );
                            snapshot = reconciled.snapshot;
                        }
                        Err(_) => prop_assert!(snapshot.active_items().len() <= 1),
                    }
                }
            }

            #[test]
            fn test_stop_always_clears_the_pair(
                steps in prop::collection::vec(transition(), 0..30),
            ) {
                let reconciler = Reconciler::default();
                let intermission = ItemRef::new("act-1", 3);
                let mut snapshot = gala();

                for step in &steps {
                    if let Ok(reconciled) = reconciler.apply(&snapshot, step, now()) {
                        snapshot = reconciled.snapshot;
                    }
                }

                let stopped = reconciler
                    .apply(&snapshot, &Transition::StopBreak(intermission.clone()), now())
                    .unwrap()
                    .snapshot;
                let item = stopped.item(&intermission).unwrap();
                prop_assert!(!item.active);
                prop_assert!(item.timer_end.is_none());
                prop_assert!(stopped.active_items().iter().all(|r| r != &intermission));
            }
        }
    }
}
