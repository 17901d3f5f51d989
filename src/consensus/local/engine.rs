use crate::commitlog::{DiskLog, InMemoryLog, Index, Log};
use crate::consensus::engine::{BootstrapError, ConsensusEngine, MembershipError, ProposeError};
use crate::consensus::local::actor::{self, ActorClient, ReplicaActor};
use crate::consensus::local::log_entry::LogEntry;
use crate::consensus::local::replica::{LocalReplica, ReplicaConfig};
use crate::consensus::local::snapshot_store::SnapshotStore;
use crate::consensus::local::state_change_listener::{self, EngineStatus, StateChangeListener};
use crate::consensus::types::{ClusterConfiguration, CommittedEntry, RaftState, ServerInfo, SnapshotMeta};
use crate::fsm::{RestoreError, SnapshotError, StateMachine};
use bytes::Bytes;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::time::Duration;

const EVENT_BUFFER_SIZE: usize = 128;

pub struct LocalEngineConfig {
    pub logger: slog::Logger,
    pub local: ServerInfo,
    pub state_machine: Arc<dyn StateMachine>,
    pub snapshot_store: Arc<dyn SnapshotStore>,
    /// File holding the log. None keeps the log in memory, so anything not yet covered by a
    /// snapshot is gone after a restart.
    pub log_path: Option<PathBuf>,
    /// Applied entries since the last snapshot that trigger a new one.
    pub snapshot_threshold: u64,
    /// How often to snapshot whatever was applied since the last snapshot, below the threshold.
    /// Zero turns this off.
    pub snapshot_interval: Duration,
    /// Delay between appending an entry and it counting as committed.
    pub replication_latency: Duration,
    pub snapshot_on_shutdown: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum EngineStartError {
    #[error("failed to open snapshot store")]
    SnapshotStore(#[source] io::Error),
    #[error("failed to restore state machine from snapshot")]
    Restore(#[from] RestoreError),
    #[error("failed to open commit log")]
    Log(#[source] io::Error),
}

/// LocalEngine runs the consensus contract inside a single process. There is no election and no
/// network replication: a bootstrapped (or restored) voter is the leader, and commit happens after
/// a configurable simulated latency.
pub struct LocalEngine {
    client: ActorClient,
    listener: StateChangeListener,
}

impl LocalEngine {
    /// Restores the state machine from the latest snapshot in the store, if there is one, replays
    /// the log past it, then starts the replica actor.
    pub async fn start(config: LocalEngineConfig) -> Result<LocalEngine, EngineStartError> {
        let restored_from = match config.snapshot_store.open_latest().map_err(EngineStartError::SnapshotStore)? {
            Some((meta, mut reader)) => {
                config.state_machine.restore(&mut reader)?;
                slog::info!(config.logger, "Restored from snapshot"; "id" => &meta.id, "index" => meta.index);
                Some(meta)
            }
            None => None,
        };

        match config.log_path.clone() {
            Some(log_path) => {
                let log: DiskLog<LogEntry> = DiskLog::open(&log_path).map_err(EngineStartError::Log)?;
                slog::info!(config.logger, "Opened commit log"; "path" => %log_path.display(), "next_index" => log.next_index().as_u64());
                Self::start_with_log(config, restored_from, log)
            }
            None => {
                let log = match &restored_from {
                    Some(meta) => InMemoryLog::starting_at(meta.last_index().plus(1)),
                    None => InMemoryLog::create(),
                };
                Self::start_with_log(config, restored_from, log)
            }
        }
    }

    fn start_with_log<L>(
        config: LocalEngineConfig,
        restored_from: Option<SnapshotMeta>,
        mut log: L,
    ) -> Result<LocalEngine, EngineStartError>
    where
        L: Log<LogEntry> + Send + 'static,
    {
        // The log may still hold entries the snapshot covers, if we stopped between persisting
        // the snapshot and compacting.
        let expected_first = match &restored_from {
            Some(meta) => {
                log.compact(meta.last_index()).map_err(EngineStartError::Log)?;
                meta.last_index().plus(1)
            }
            None => Index::start_index(),
        };
        if let Some(first_index) = log.first_index() {
            if first_index > expected_first {
                return Err(EngineStartError::Log(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("log starts at index {} but the restored state ends before {}", first_index, expected_first),
                )));
            }
        }

        let (client, mailbox) = actor::create(EVENT_BUFFER_SIZE);
        let (status_notifier, listener) = state_change_listener::new(EngineStatus::follower_without_leader());
        let replica = LocalReplica::new(ReplicaConfig {
            logger: config.logger,
            local: config.local,
            state_machine: config.state_machine,
            snapshot_store: config.snapshot_store,
            log,
            restored_from,
            snapshot_threshold: config.snapshot_threshold,
            snapshot_interval: config.snapshot_interval,
            replication_latency: config.replication_latency,
            snapshot_on_shutdown: config.snapshot_on_shutdown,
            actor_client: client.downgrade(),
            status_notifier,
        })
        .map_err(EngineStartError::Log)?;

        replica.start_snapshot_timer();
        tokio::spawn(ReplicaActor::new(mailbox, replica).run_event_loop());

        Ok(LocalEngine { client, listener })
    }

    /// Snapshots everything applied so far and compacts the log behind it.
    pub async fn snapshot(&self) -> Result<SnapshotMeta, SnapshotError> {
        self.client.take_snapshot().await
    }
}

#[async_trait::async_trait]
impl ConsensusEngine for LocalEngine {
    async fn propose_entry(&self, data: Bytes, timeout: Duration) -> Result<CommittedEntry, ProposeError> {
        match tokio::time::timeout(timeout, self.client.propose(data)).await {
            Ok(result) => result,
            Err(_) => Err(ProposeError::Timeout(timeout)),
        }
    }

    async fn configuration(&self) -> Result<ClusterConfiguration, MembershipError> {
        self.client.configuration().await
    }

    async fn add_voter(&self, server: ServerInfo) -> Result<(), MembershipError> {
        self.client.add_voter(server).await
    }

    async fn bootstrap_cluster(&self, configuration: ClusterConfiguration) -> Result<(), BootstrapError> {
        self.client.bootstrap(configuration).await
    }

    fn leader(&self) -> Option<String> {
        self.listener.current().leader_address
    }

    fn state(&self) -> RaftState {
        self.listener.current().state
    }

    async fn shutdown(&self) {
        self.client.shutdown().await
    }
}
