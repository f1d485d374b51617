use std::time::Duration;

use marquee_program::{EventSnapshot, ItemRef};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::error::SyncError;
use crate::reconciler::transition::Transition;
use crate::viewer::viewer_session::ShowState;

/// Commands sent from an operator surface to the console session task
#[derive(Debug)]
pub enum ConsoleCommand {
    Apply {
        transition: Transition,
        reply: oneshot::Sender<Result<EventSnapshot, SyncError>>,
    },
    QuerySnapshot {
        reply: oneshot::Sender<Option<EventSnapshot>>,
    },
    QueryConnection {
        reply: oneshot::Sender<ConnectionState>,
    },
    Shutdown,
}

/// Events sent from the console session task to the operator surface
#[derive(Debug, Clone)]
pub enum ConsoleEvent {
    /// The locally rendered snapshot changed. `confirmed` is false for an
    /// optimistic update that has not been echoed by the change feed yet.
    SnapshotChanged {
        snapshot: EventSnapshot,
        confirmed: bool,
    },
    /// A transient notice for the operator; prior confirmed state is intact.
    Notice {
        transition: Transition,
        error: SyncError,
    },
    /// A write failed and the optimistic state was rolled back.
    Reverted {
        snapshot: EventSnapshot,
        error: SyncError,
    },
    ConnectionChanged {
        state: ConnectionState,
    },
    ShutdownComplete,
}

/// Events sent from a viewer session to its display
#[derive(Debug, Clone, PartialEq)]
pub enum ViewerEvent {
    StateChanged {
        state: ShowState,
    },
    Countdown {
        item_ref: ItemRef,
        remaining: Duration,
        display: String,
    },
    ConnectionChanged {
        state: ConnectionState,
    },
    ShutdownComplete,
}

/// Health of a session's change feed subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Connecting,
    Live,
    Reconnecting { attempt: u32 },
    /// Persistent "disconnected" indicator; retries continue in the background.
    Lost,
}

impl ConnectionState {
    pub fn is_live(&self) -> bool {
        matches!(self, ConnectionState::Live)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Live => write!(f, "live"),
            ConnectionState::Reconnecting { attempt } => write!(f, "reconnecting (attempt {})", attempt),
            ConnectionState::Lost => write!(f, "disconnected"),
        }
    }
}

/// Settings configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    // Timing
    pub tick_interval_ms: u64,
    pub write_timeout_ms: u64,

    // Change feed
    pub reconnect_initial_backoff_ms: u64,
    pub reconnect_max_backoff_ms: u64,
    pub max_reconnect_attempts: u32,
    pub feed_buffer: usize,

    // Display
    pub break_label_suffix: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            tick_interval_ms: 1000,
            write_timeout_ms: 5000,

            reconnect_initial_backoff_ms: 250,
            reconnect_max_backoff_ms: 8000,
            max_reconnect_attempts: 5,
            feed_buffer: 256,

            break_label_suffix: crate::reconciler::reconciler::DEFAULT_BREAK_LABEL_SUFFIX
                .to_string(),
        }
    }
}

impl Settings {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    /// Delay before reconnect attempt `attempt` (1-based): doubles from the
    /// initial backoff and is capped at the maximum.
    pub fn reconnect_backoff(&self, attempt: u32) -> Duration {
        let multiplier = 2u64.saturating_pow(attempt.saturating_sub(1).min(16));
        let backoff = self
            .reconnect_initial_backoff_ms
            .saturating_mul(multiplier)
            .min(self.reconnect_max_backoff_ms);
        Duration::from_millis(backoff)
    }
}
