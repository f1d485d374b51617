use std::fmt;

use marquee_program::ItemRef;
use serde::{Deserialize, Serialize};

/// A requested change to the live state of an event. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transition {
    Activate(ItemRef),
    Deactivate(ItemRef),
    StartBreak { item_ref: ItemRef, minutes: i64 },
    StopBreak(ItemRef),
    SetEncoreRevealed(bool),
}

impl Transition {
    pub fn name(&self) -> &'static str {
        match self {
            Transition::Activate(_) => "activate",
            Transition::Deactivate(_) => "deactivate",
            Transition::StartBreak { .. } => "start break",
            Transition::StopBreak(_) => "stop break",
            Transition::SetEncoreRevealed(_) => "set encore revealed",
        }
    }

    pub fn item_ref(&self) -> Option<&ItemRef> {
        match self {
            Transition::Activate(item_ref)
            | Transition::Deactivate(item_ref)
            | Transition::StopBreak(item_ref)
            | Transition::StartBreak { item_ref, .. } => Some(item_ref),
            Transition::SetEncoreRevealed(_) => None,
        }
    }
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transition::StartBreak { item_ref, minutes } => {
                write!(f, "start break {} ({} min)", item_ref, minutes)
            }
            Transition::SetEncoreRevealed(revealed) => {
                write!(f, "set encore revealed = {}", revealed)
            }
            other => match other.item_ref() {
                Some(item_ref) => write!(f, "{} {}", other.name(), item_ref),
                None => write!(f, "{}", other.name()),
            },
        }
    }
}
