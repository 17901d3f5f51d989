use crate::api::node::KvNode;
use crate::api::options::{NodeOptions, NodeOptionsValidated};
use crate::consensus::{
    BootstrapError, EngineStartError, FileSnapshotStore, InMemorySnapshotStore, LocalEngine, LocalEngineConfig,
    ServerInfo, SnapshotStore,
};
use crate::fsm::{KvStateMachine, RestoreError};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

const SNAPSHOT_DIRECTORY: &str = "snapshots";
const LOG_FILE: &str = "raft-log.redb";

pub struct NodeConfig {
    pub node_id: String,
    // Address other members use to reach this node's consensus engine.
    pub raft_address: String,
    // Holds the commit log and snapshots under `raft/`. Without one, both only live in memory and
    // nothing survives a restart.
    pub data_directory: Option<PathBuf>,
    // Seed a brand new single node cluster. Fatal if this node already has state.
    pub bootstrap: bool,
    pub logger: slog::Logger,
    pub options: NodeOptions,
}

#[derive(Debug, thiserror::Error)]
pub enum NodeCreationError {
    #[error("Illegal options for configuring node: {0}")]
    IllegalOptions(String),
    #[error("Failed to open snapshot store")]
    SnapshotStore(#[source] io::Error),
    #[error("Failed to restore state from snapshot")]
    Restore(#[source] RestoreError),
    #[error("Failed to open commit log")]
    Log(#[source] io::Error),
    #[error("Failed to bootstrap cluster")]
    Bootstrap(#[source] BootstrapError),
}

impl From<EngineStartError> for NodeCreationError {
    fn from(e: EngineStartError) -> Self {
        match e {
            EngineStartError::SnapshotStore(e) => NodeCreationError::SnapshotStore(e),
            EngineStartError::Restore(e) => NodeCreationError::Restore(e),
            EngineStartError::Log(e) => NodeCreationError::Log(e),
        }
    }
}

pub async fn try_create_node(config: NodeConfig) -> Result<KvNode, NodeCreationError> {
    let root_logger = config.logger.new(slog::o!("node_id" => config.node_id.clone()));

    let options = NodeOptionsValidated::try_from(config.options)
        .map_err(|e| NodeCreationError::IllegalOptions(e.to_string()))?;

    let raft_directory = config.data_directory.as_ref().map(|data_directory| data_directory.join("raft"));
    let snapshot_store: Arc<dyn SnapshotStore> = match &raft_directory {
        Some(raft_directory) => Arc::new(
            FileSnapshotStore::new(
                root_logger.clone(),
                raft_directory.join(SNAPSHOT_DIRECTORY),
                options.snapshot_retain,
            )
            .map_err(NodeCreationError::SnapshotStore)?,
        ),
        None => Arc::new(InMemorySnapshotStore::new()),
    };
    let log_path = raft_directory.map(|raft_directory| raft_directory.join(LOG_FILE));

    let local = ServerInfo::new(config.node_id, config.raft_address);
    let state_machine = Arc::new(KvStateMachine::new(root_logger.clone()));

    let engine = LocalEngine::start(LocalEngineConfig {
        logger: root_logger.clone(),
        local: local.clone(),
        state_machine: state_machine.clone(),
        snapshot_store,
        log_path,
        snapshot_threshold: options.snapshot_threshold,
        snapshot_interval: options.snapshot_interval,
        replication_latency: options.replication_latency,
        snapshot_on_shutdown: options.snapshot_on_shutdown,
    })
    .await?;

    let node = KvNode::new(root_logger, local, state_machine, Arc::new(engine), options.apply_timeout);

    if config.bootstrap {
        node.bootstrap().await.map_err(NodeCreationError::Bootstrap)?;
    }

    Ok(node)
}
