pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigError, ConfigManager, ConfigSchema};
pub use console::console_handle::ConsoleHandle;
pub use console::console_session::ConsoleSession;
pub use error::{ReconcileError, StoreError, SyncError};
pub use feed::feed_client::{FeedClient, FeedHandle, FeedMessage};
pub use feed::subscription::{FeedEvent, Subscription};
pub use messages::{ConnectionState, ConsoleCommand, ConsoleEvent, Settings, ViewerEvent};
pub use reconciler::reconciler::{break_label, Reconciled, Reconciler};
pub use reconciler::transition::Transition;
pub use store::file_store::FileStore;
pub use store::memory_store::{MemoryStore, StoreDocument};
pub use store::traits::StateStore;
pub use viewer::countdown::{format_remaining, remaining};
pub use viewer::viewer_session::{BreakInfo, ShowState, ViewerHandle, ViewerSession};

mod clock;
mod config;
mod console;
mod error;
mod feed;
pub mod messages;
mod reconciler;
mod store;
mod viewer;
