mod actor;
mod engine;
mod log_entry;
mod replica;
mod snapshot_store;
mod state_change_listener;

pub use engine::EngineStartError;
pub use engine::LocalEngine;
pub use engine::LocalEngineConfig;
pub use snapshot_store::FileSnapshotStore;
pub use snapshot_store::InMemorySnapshotStore;
pub use snapshot_store::SnapshotStore;
