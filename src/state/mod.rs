//! Persistent state storage.
//!
//! The state store records, per resource, what was last applied and the
//! provider's response, so the next run can diff against it. Every commit is
//! guarded by a per-resource version.

mod local;
mod lock;
mod memory;
mod s3;
mod store;
mod types;

pub use local::{LocalStateStore, STATE_DIR};
pub use lock::{LOCK_EXPIRY_SECS, LockInfo, generate_holder_id};
pub use memory::MemoryStateStore;
pub use s3::S3StateStore;
pub use store::StateStore;
pub use types::{
    DeposedObject, FORMAT_VERSION, HistoryEntry, HistoryOperation, MAX_HISTORY, StateEntry,
    StateSnapshot,
};
