//! The consensus engine contract the key-value layer is written against, and a local,
//! single-process implementation of it.
mod engine;
mod local;
mod types;

pub use engine::BootstrapError;
pub use engine::ConsensusEngine;
pub use engine::MembershipError;
pub use engine::ProposeError;
pub use local::EngineStartError;
pub use local::FileSnapshotStore;
pub use local::InMemorySnapshotStore;
pub use local::LocalEngine;
pub use local::LocalEngineConfig;
pub use local::SnapshotStore;
pub use types::ClusterConfiguration;
pub use types::CommittedEntry;
pub use types::RaftState;
pub use types::ServerInfo;
pub use types::SnapshotMeta;
pub use types::Term;
