mod api;
mod commitlog;
mod consensus;
mod fsm;
mod membership;
mod server;
#[cfg(test)]
mod test_utils;

pub use api::try_create_node;
pub use api::KvError;
pub use api::KvNode;
pub use api::NodeConfig;
pub use api::NodeCreationError;
pub use api::NodeOptions;
pub use commitlog::Index;
pub use consensus::BootstrapError;
pub use consensus::ClusterConfiguration;
pub use consensus::CommittedEntry;
pub use consensus::ConsensusEngine;
pub use consensus::EngineStartError;
pub use consensus::FileSnapshotStore;
pub use consensus::InMemorySnapshotStore;
pub use consensus::LocalEngine;
pub use consensus::LocalEngineConfig;
pub use consensus::MembershipError;
pub use consensus::ProposeError;
pub use consensus::RaftState;
pub use consensus::ServerInfo;
pub use consensus::SnapshotMeta;
pub use consensus::SnapshotStore;
pub use consensus::Term;
pub use fsm::ApplyError;
pub use fsm::ApplyResult;
pub use fsm::Command;
pub use fsm::DecodeError;
pub use fsm::FsmSnapshot;
pub use fsm::KvSnapshot;
pub use fsm::KvStateMachine;
pub use fsm::Op;
pub use fsm::RestoreError;
pub use fsm::SnapshotError;
pub use fsm::SnapshotSink;
pub use fsm::StateMachine;
pub use membership::MembershipCoordinator;
pub use server::shutdown_signal;
pub use server::HttpServer;
pub use server::ServerShutdownHandle;
pub use server::ServerShutdownSignal;

// `crate::{root_mod}` holds no code, just `mod` and `pub use` statements. No `mod` is `pub`;
// everything public is exported through an individual `use`.
