//! Versioned storage tiers for offline serving.
//!
//! Two tiers are live at any time: the shell tier (fixed static assets) and
//! the user tier (a single user-supplied document). Tier names carry a
//! version tag so superseded tiers can be found and reclaimed on activation.

mod entry;
mod registry;
mod storage;

pub use entry::{request_key, Entry, HTML_CONTENT_TYPE};
pub use registry::{TierKind, TierNames, TierRegistry};
pub use storage::{MemoryStorage, SqliteStorage, TierStorage};
