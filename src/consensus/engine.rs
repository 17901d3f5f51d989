use crate::consensus::types::{ClusterConfiguration, CommittedEntry, RaftState, ServerInfo};
use bytes::Bytes;
use std::io;
use tokio::time::Duration;

/// ConsensusEngine is everything the key-value layer needs from consensus. Implementations own
/// the replicated log, its ordering, and cluster membership. They drive a `StateMachine` they are
/// handed at construction: apply is called from a single task, once per committed entry, in
/// commit order.
#[async_trait::async_trait]
pub trait ConsensusEngine: Send + Sync {
    /// Proposes `data` as a new log entry and waits, for at most `timeout`, until it has been
    /// committed and applied. On timeout the entry may still commit later.
    async fn propose_entry(&self, data: Bytes, timeout: Duration) -> Result<CommittedEntry, ProposeError>;

    /// The latest cluster configuration known to this node.
    async fn configuration(&self) -> Result<ClusterConfiguration, MembershipError>;

    /// Adds `server` as a voter and waits until the configuration change has committed.
    async fn add_voter(&self, server: ServerInfo) -> Result<(), MembershipError>;

    /// Seeds the configuration of a brand new cluster. Fails if this node already has state.
    async fn bootstrap_cluster(&self, configuration: ClusterConfiguration) -> Result<(), BootstrapError>;

    /// Address of the current leader, if one is known.
    fn leader(&self) -> Option<String>;

    fn state(&self) -> RaftState;

    /// Stops participating in consensus. Safe to call more than once.
    async fn shutdown(&self);
}

#[derive(Debug, thiserror::Error)]
pub enum ProposeError {
    #[error("this node is not the leader")]
    NotLeader { leader: Option<String> },

    // The entry was accepted but not observed as applied before the deadline. Its outcome is
    // unknown; only idempotent proposals should be retried blindly.
    #[error("entry was not applied within {0:?}")]
    Timeout(Duration),

    #[error("failed to persist log entry")]
    LocalIo(#[source] io::Error),

    #[error("engine is shut down")]
    Shutdown,
}

#[derive(Debug, thiserror::Error)]
pub enum MembershipError {
    #[error("this node is not the leader")]
    NotLeader { leader: Option<String> },

    #[error("a configuration change is already in progress")]
    ConfigChangeInProgress,

    #[error("failed to persist configuration change")]
    LocalIo(#[source] io::Error),

    #[error("engine is shut down")]
    Shutdown,
}

#[derive(Debug, thiserror::Error)]
pub enum BootstrapError {
    // Fatal misconfiguration: bootstrapping must only ever happen on a fresh node.
    #[error("node already has state; refusing to bootstrap")]
    AlreadyBootstrapped,

    #[error("bootstrap configuration has no voters")]
    EmptyConfiguration,

    #[error("failed to persist bootstrap configuration")]
    LocalIo(#[source] io::Error),

    #[error("engine is shut down")]
    Shutdown,
}
