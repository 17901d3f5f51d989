use crate::api::errors::KvError;
use crate::consensus::{BootstrapError, ConsensusEngine, MembershipError, RaftState, ServerInfo};
use crate::fsm::{Command, KvStateMachine};
use crate::membership::MembershipCoordinator;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::time::Duration;

/// KvNode is the client-facing handle of one replica.
///
/// Reads are served from local state without consulting consensus, so they are only as fresh as
/// this replica's last applied entry. Writes go through the replicated log and return once
/// committed and applied.
pub struct KvNode {
    logger: slog::Logger,
    local: ServerInfo,
    state_machine: Arc<KvStateMachine>,
    engine: Arc<dyn ConsensusEngine>,
    membership: MembershipCoordinator,
    apply_timeout: Duration,
    shut_down: AtomicBool,
}

impl KvNode {
    pub fn new(
        logger: slog::Logger,
        local: ServerInfo,
        state_machine: Arc<KvStateMachine>,
        engine: Arc<dyn ConsensusEngine>,
        apply_timeout: Duration,
    ) -> Self {
        let membership = MembershipCoordinator::new(logger.clone(), engine.clone());

        KvNode {
            logger,
            local,
            state_machine,
            engine,
            membership,
            apply_timeout,
            shut_down: AtomicBool::new(false),
        }
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.state_machine.get(key)
    }

    pub async fn set(&self, key: impl Into<String>, value: impl Into<String>) -> Result<(), KvError> {
        self.apply_command(Command::set(key, value)).await
    }

    pub async fn delete(&self, key: impl Into<String>) -> Result<(), KvError> {
        self.apply_command(Command::delete(key)).await
    }

    async fn apply_command(&self, command: Command) -> Result<(), KvError> {
        let committed = self.engine.propose_entry(command.encode(), self.apply_timeout).await?;

        // Committed does not mean it worked. Surface this entry's own result.
        committed.result.into_result()?;
        Ok(())
    }

    pub async fn join(&self, node_id: &str, address: &str) -> Result<(), MembershipError> {
        self.membership.join(node_id, address).await
    }

    /// Seeds a new cluster with this node as the only voter. See `MembershipCoordinator::bootstrap`.
    pub async fn bootstrap(&self) -> Result<(), BootstrapError> {
        self.membership.bootstrap(self.local.clone()).await
    }

    pub fn leader(&self) -> Option<String> {
        self.engine.leader()
    }

    pub fn state(&self) -> RaftState {
        self.engine.state()
    }

    pub async fn shutdown(&self) {
        if !self.shut_down.swap(true, Ordering::SeqCst) {
            slog::info!(self.logger, "Shutting down node");
        }

        self.engine.shutdown().await;
    }
}
