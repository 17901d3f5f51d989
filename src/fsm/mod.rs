//! The replicated key-value state machine: the command wire protocol, the deterministic apply
//! path, and snapshot/restore for log compaction.
mod command;
mod snapshot;
mod state_machine;

pub use command::Command;
pub use command::DecodeError;
pub use command::Op;
pub use snapshot::FsmSnapshot;
pub use snapshot::KvSnapshot;
pub use snapshot::RestoreError;
pub use snapshot::SnapshotError;
pub use snapshot::SnapshotSink;
pub use state_machine::ApplyError;
pub use state_machine::ApplyResult;
pub use state_machine::KvStateMachine;
pub use state_machine::StateMachine;
