use tokio::time::Duration;

#[derive(Clone, Default)]
pub struct NodeOptions {
    /// How long a write waits to be committed and applied.
    pub apply_timeout: Option<Duration>,
    /// Number of applied entries since the last snapshot that triggers a new one.
    pub snapshot_threshold: Option<u64>,
    /// How often to snapshot anything applied since the last snapshot. Zero turns this off.
    pub snapshot_interval: Option<Duration>,
    /// Number of snapshots kept on disk.
    pub snapshot_retain: Option<usize>,
    /// Simulated time for an entry to commit.
    pub replication_latency: Option<Duration>,
    pub snapshot_on_shutdown: Option<bool>,
}

#[derive(Debug)]
pub(super) struct NodeOptionsValidated {
    pub apply_timeout: Duration,
    pub snapshot_threshold: u64,
    pub snapshot_interval: Duration,
    pub snapshot_retain: usize,
    pub replication_latency: Duration,
    pub snapshot_on_shutdown: bool,
}

impl NodeOptionsValidated {
    fn validate(&self) -> Result<(), &'static str> {
        if self.apply_timeout.is_zero() {
            return Err("Apply timeout must be greater than zero");
        }
        if self.snapshot_threshold == 0 {
            return Err("Snapshot threshold must be at least 1 entry");
        }
        if self.snapshot_retain == 0 {
            return Err("Must retain at least 1 snapshot");
        }

        Ok(())
    }
}

impl TryFrom<NodeOptions> for NodeOptionsValidated {
    type Error = &'static str;

    fn try_from(options: NodeOptions) -> Result<Self, Self::Error> {
        let values = NodeOptionsValidated {
            apply_timeout: options.apply_timeout.unwrap_or(Duration::from_secs(5)),
            snapshot_threshold: options.snapshot_threshold.unwrap_or(1024),
            snapshot_interval: options.snapshot_interval.unwrap_or(Duration::from_secs(20)),
            snapshot_retain: options.snapshot_retain.unwrap_or(3),
            replication_latency: options.replication_latency.unwrap_or(Duration::ZERO),
            snapshot_on_shutdown: options.snapshot_on_shutdown.unwrap_or(true),
        };

        values.validate()?;
        Ok(values)
    }
}
