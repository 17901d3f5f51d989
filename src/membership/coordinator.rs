use crate::consensus::{BootstrapError, ClusterConfiguration, ConsensusEngine, MembershipError, ServerInfo};
use std::sync::Arc;

/// MembershipCoordinator turns join requests into configuration changes.
pub struct MembershipCoordinator {
    logger: slog::Logger,
    engine: Arc<dyn ConsensusEngine>,
}

impl MembershipCoordinator {
    pub fn new(logger: slog::Logger, engine: Arc<dyn ConsensusEngine>) -> Self {
        MembershipCoordinator { logger, engine }
    }

    /// Adds `node_id@address` as a voter.
    ///
    /// A node already known under the same id or the same address is left alone and reported as
    /// success, so a client can safely retry a join whose first attempt actually went through.
    /// Engine failures are returned as-is and never retried here.
    pub async fn join(&self, node_id: &str, address: &str) -> Result<(), MembershipError> {
        let configuration = self.engine.configuration().await?;

        if let Some(existing) = configuration.find_by_id_or_address(node_id, address) {
            slog::info!(
                self.logger,
                "Node already member of cluster, ignoring join request";
                "node_id" => node_id,
                "address" => address,
                "existing_id" => &existing.id,
                "existing_address" => &existing.address,
            );
            return Ok(());
        }

        self.engine.add_voter(ServerInfo::new(node_id, address)).await?;
        slog::info!(self.logger, "Node joined cluster"; "node_id" => node_id, "address" => address);

        Ok(())
    }

    /// Seeds a brand new cluster with `local` as its only voter. Only valid at first start; on a
    /// node with existing state this fails with `AlreadyBootstrapped`, which callers must treat as
    /// fatal.
    pub async fn bootstrap(&self, local: ServerInfo) -> Result<(), BootstrapError> {
        slog::info!(self.logger, "Bootstrapping single node cluster"; "node_id" => &local.id, "address" => &local.address);
        self.engine.bootstrap_cluster(ClusterConfiguration::single(local)).await
    }
}
