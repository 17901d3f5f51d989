use crate::commitlog::{Index, Log};
use crate::consensus::engine::{BootstrapError, MembershipError, ProposeError};
use crate::consensus::local::actor::{Callback, WeakActorClient};
use crate::consensus::local::log_entry::{EntryPayload, LogEntry};
use crate::consensus::local::snapshot_store::SnapshotStore;
use crate::consensus::local::state_change_listener::{EngineStatus, StateChangeNotifier};
use crate::consensus::types::{ClusterConfiguration, CommittedEntry, RaftState, ServerInfo, SnapshotMeta, Term};
use crate::fsm::{FsmSnapshot, SnapshotError, StateMachine};
use bytes::Bytes;
use std::collections::BTreeMap;
use std::io;
use std::sync::Arc;
use tokio::time::Duration;

pub(super) struct ReplicaConfig<L> {
    pub(super) logger: slog::Logger,
    pub(super) local: ServerInfo,
    pub(super) state_machine: Arc<dyn StateMachine>,
    pub(super) snapshot_store: Arc<dyn SnapshotStore>,
    pub(super) log: L,
    // The snapshot the state machine was restored from at startup, if any.
    pub(super) restored_from: Option<SnapshotMeta>,
    pub(super) snapshot_threshold: u64,
    pub(super) snapshot_interval: Duration,
    pub(super) replication_latency: Duration,
    pub(super) snapshot_on_shutdown: bool,
    pub(super) actor_client: WeakActorClient,
    pub(super) status_notifier: StateChangeNotifier,
}

/// LocalReplica is the single-process stand-in for a raft replica: it owns the log, the commit
/// and apply positions, and the cluster configuration. Only the actor task touches it.
///
/// Note: A log entry has 3 states (not modeled directly in code):
/// 1. Persisted - appended to the log, not yet acknowledged
/// 2. Committed - acknowledged after the simulated replication latency
/// 3. Applied - a committed entry that has also been applied to the state machine
pub(super) struct LocalReplica<L>
where
    L: Log<LogEntry>,
{
    logger: slog::Logger,
    local: ServerInfo,
    state_machine: Arc<dyn StateMachine>,
    snapshot_store: Arc<dyn SnapshotStore>,
    log: L,

    state: RaftState,
    term: Term,
    // Latest configuration, including an uncommitted change.
    configuration: ClusterConfiguration,
    // Configuration as of the last applied entry. This is what a snapshot records.
    applied_configuration: ClusterConfiguration,

    // Index of highest log entry known to be committed. None if nothing is committed.
    commit_index: Option<Index>,
    // Index (and its term) of highest log entry applied to state machine.
    last_applied: Option<(Index, Term)>,
    last_snapshot_index: Option<Index>,
    snapshot_in_progress: bool,
    // Set once shutdown starts. No new work is accepted after this.
    stopping: bool,

    pending_proposals: BTreeMap<Index, Callback<CommittedEntry, ProposeError>>,
    pending_configuration: Option<(Index, Callback<(), MembershipError>)>,

    snapshot_threshold: u64,
    snapshot_interval: Duration,
    replication_latency: Duration,
    snapshot_on_shutdown: bool,
    actor_client: WeakActorClient,
    status_notifier: StateChangeNotifier,
}

impl<L> LocalReplica<L>
where
    L: Log<LogEntry>,
{
    /// Resumes from the restored snapshot, if any, then replays whatever the log still holds past
    /// it. Everything in the log was appended by the only voter that could lead, so all of it
    /// counts as committed.
    pub(super) fn new(config: ReplicaConfig<L>) -> Result<Self, io::Error> {
        let mut replica = LocalReplica {
            logger: config.logger,
            local: config.local,
            state_machine: config.state_machine,
            snapshot_store: config.snapshot_store,
            log: config.log,
            state: RaftState::Follower,
            term: Term::default(),
            configuration: ClusterConfiguration::default(),
            applied_configuration: ClusterConfiguration::default(),
            commit_index: None,
            last_applied: None,
            last_snapshot_index: None,
            snapshot_in_progress: false,
            stopping: false,
            pending_proposals: BTreeMap::new(),
            pending_configuration: None,
            snapshot_threshold: config.snapshot_threshold,
            snapshot_interval: config.snapshot_interval,
            replication_latency: config.replication_latency,
            snapshot_on_shutdown: config.snapshot_on_shutdown,
            actor_client: config.actor_client,
            status_notifier: config.status_notifier,
        };

        if let Some(meta) = config.restored_from {
            let index = meta.last_index();
            replica.term = meta.term;
            replica.commit_index = Some(index);
            replica.last_applied = Some((index, meta.term));
            replica.last_snapshot_index = Some(index);
            replica.configuration = meta.configuration.clone();
            replica.applied_configuration = meta.configuration;
        }

        replica.replay_log()?;

        // Nobody else in this process can compete for leadership, so a voter resumes as leader in
        // the next term.
        if replica.configuration.contains_id(&replica.local.id) {
            replica.become_leader(Term::new(replica.term.as_u64() + 1));
        }

        Ok(replica)
    }

    fn replay_log(&mut self) -> Result<(), io::Error> {
        let last_index = match self.log.next_index().checked_minus(1) {
            Some(last_index) => last_index,
            None => return Ok(()),
        };
        let first_index = match self.last_applied {
            Some((index, _)) => index.plus(1),
            None => Index::start_index(),
        };
        if first_index > last_index {
            return Ok(());
        }

        let mut index = first_index;
        while index <= last_index {
            let entry = self.log.read(index)?.ok_or_else(|| {
                io::Error::new(io::ErrorKind::InvalidData, format!("log entry {} is missing", index))
            })?;
            if let EntryPayload::Configuration(configuration) = entry.payload {
                self.configuration = configuration;
            }
            self.term = self.term.max(entry.term);
            index = index.plus(1);
        }

        slog::info!(
            self.logger,
            "Replaying log";
            "from" => first_index.as_u64(),
            "through" => last_index.as_u64(),
        );
        self.commit_index = Some(last_index);
        self.apply_all_committed_entries();

        Ok(())
    }

    fn leader_address(&self) -> Option<String> {
        match self.state {
            RaftState::Leader => Some(self.local.address.clone()),
            _ => None,
        }
    }

    fn publish_status(&self) {
        let status = EngineStatus {
            state: self.state,
            leader_address: self.leader_address(),
        };

        if self.status_notifier.notify_if_changed(status) {
            slog::info!(self.logger, "Role changed"; "state" => %self.state, "term" => self.term.as_u64());
        }
    }

    fn become_leader(&mut self, term: Term) {
        self.term = term;
        self.state = RaftState::Leader;
        self.publish_status();
    }

    fn has_state(&self) -> bool {
        !self.configuration.is_empty()
            || self.last_snapshot_index.is_some()
            || self.log.next_index() > Index::start_index()
    }

    pub(super) fn configuration(&self) -> ClusterConfiguration {
        self.configuration.clone()
    }

    pub(super) fn propose(&mut self, data: Bytes, callback: Callback<CommittedEntry, ProposeError>) {
        if self.stopping {
            callback.send(Err(ProposeError::Shutdown));
            return;
        }
        if self.state != RaftState::Leader {
            callback.send(Err(ProposeError::NotLeader {
                leader: self.leader_address(),
            }));
            return;
        }

        let index = match self.log.append(LogEntry::command(self.term, data)) {
            Ok(index) => index,
            Err(e) => {
                callback.send(Err(ProposeError::LocalIo(e)));
                return;
            }
        };

        self.pending_proposals.insert(index, callback);
        self.replicate(index);
    }

    pub(super) fn add_voter(&mut self, server: ServerInfo, callback: Callback<(), MembershipError>) {
        if self.stopping {
            callback.send(Err(MembershipError::Shutdown));
            return;
        }
        if self.state != RaftState::Leader {
            callback.send(Err(MembershipError::NotLeader {
                leader: self.leader_address(),
            }));
            return;
        }

        if self.pending_configuration.is_some() {
            callback.send(Err(MembershipError::ConfigChangeInProgress));
            return;
        }

        let configuration = self.configuration.with_voter(server.clone());
        let index = match self.log.append(LogEntry::configuration(self.term, configuration.clone())) {
            Ok(index) => index,
            Err(e) => {
                callback.send(Err(MembershipError::LocalIo(e)));
                return;
            }
        };

        slog::info!(
            self.logger,
            "Adding voter";
            "id" => &server.id,
            "address" => &server.address,
            "index" => index.as_u64(),
        );
        self.configuration = configuration;
        self.pending_configuration = Some((index, callback));
        self.replicate(index);
    }

    pub(super) fn bootstrap(&mut self, configuration: ClusterConfiguration) -> Result<(), BootstrapError> {
        if self.stopping {
            return Err(BootstrapError::Shutdown);
        }
        if self.has_state() {
            return Err(BootstrapError::AlreadyBootstrapped);
        }
        if configuration.is_empty() {
            return Err(BootstrapError::EmptyConfiguration);
        }

        let term = Term::new(1);
        let index = self
            .log
            .append(LogEntry::configuration(term, configuration.clone()))
            .map_err(BootstrapError::LocalIo)?;

        slog::info!(self.logger, "Bootstrapped cluster"; "voters" => configuration.servers().len());
        self.term = term;
        self.configuration = configuration;
        // There is nobody to replicate the seed configuration to.
        self.commit_index = Some(index);
        self.apply_all_committed_entries();

        if self.configuration.contains_id(&self.local.id) {
            self.become_leader(term);
        }

        Ok(())
    }

    fn replicate(&self, index: Index) {
        let actor_client = self.actor_client.clone();
        let latency = self.replication_latency;

        tokio::spawn(async move {
            if !latency.is_zero() {
                tokio::time::sleep(latency).await;
            }
            actor_client.replication_acked(index).await;
        });
    }

    pub(super) fn replication_acked(&mut self, index: Index) {
        // Acks may arrive out of order; a later index already committed this one.
        if matches!(self.commit_index, Some(commit_index) if commit_index >= index) {
            return;
        }

        if index >= self.log.next_index() {
            slog::warn!(self.logger, "Ignoring ack past end of log"; "index" => index.as_u64());
            return;
        }

        self.commit_index = Some(index);
        self.apply_all_committed_entries();
    }

    /// apply_all_committed_entries applies all committed but unapplied entries in order.
    fn apply_all_committed_entries(&mut self) {
        let commit_index = match self.commit_index {
            Some(commit_index) => commit_index,
            None => return,
        };

        loop {
            let next_index = match self.last_applied {
                Some((last_applied_index, _)) => last_applied_index.plus(1),
                None => Index::start_index(),
            };
            if next_index > commit_index {
                return;
            }

            // On failure, leave last_applied alone. The next commit retries from here.
            let entry = match self.log.read(next_index) {
                Ok(Some(entry)) => entry,
                Ok(None) => {
                    slog::error!(self.logger, "Committed entry missing from log"; "index" => next_index.as_u64());
                    return;
                }
                Err(e) => {
                    slog::error!(self.logger, "Failed to read committed entry"; "index" => next_index.as_u64(), "error" => %e);
                    return;
                }
            };

            let term = entry.term;
            self.apply_entry(next_index, entry);
            self.last_applied = Some((next_index, term));
        }
    }

    fn apply_entry(&mut self, index: Index, entry: LogEntry) {
        match entry.payload {
            EntryPayload::Command(data) => {
                let result = self.state_machine.apply(index, &data);
                if let Some(callback) = self.pending_proposals.remove(&index) {
                    callback.send(Ok(CommittedEntry {
                        index,
                        term: entry.term,
                        result,
                    }));
                }
            }
            EntryPayload::Configuration(configuration) => {
                self.applied_configuration = configuration;
                if matches!(&self.pending_configuration, Some((pending_index, _)) if *pending_index == index) {
                    if let Some((_, callback)) = self.pending_configuration.take() {
                        slog::info!(self.logger, "Configuration change committed"; "index" => index.as_u64());
                        callback.send(Ok(()));
                    }
                }
            }
        }
    }

    fn entries_since_snapshot(&self) -> u64 {
        let applied = self.last_applied.map_or(0, |(index, _)| index.as_u64());
        let snapshotted = self.last_snapshot_index.map_or(0, |index| index.as_u64());
        applied.saturating_sub(snapshotted)
    }

    /// Starts a snapshot in the background when enough entries were applied since the last one.
    pub(super) fn maybe_snapshot(&mut self) {
        if self.snapshot_in_progress || self.stopping {
            return;
        }

        if self.entries_since_snapshot() >= self.snapshot_threshold {
            self.take_snapshot(None);
        }
    }

    /// Ticks every `snapshot_interval` until the actor stops. A zero interval never ticks.
    pub(super) fn start_snapshot_timer(&self) {
        if self.snapshot_interval.is_zero() {
            return;
        }

        let actor_client = self.actor_client.clone();
        let period = self.snapshot_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                ticker.tick().await;
                if !actor_client.snapshot_interval_elapsed().await {
                    return;
                }
            }
        });
    }

    /// Snapshots anything applied since the last snapshot, however little.
    pub(super) fn snapshot_interval_elapsed(&mut self) {
        if self.snapshot_in_progress || self.stopping {
            return;
        }

        if self.entries_since_snapshot() > 0 {
            self.take_snapshot(None);
        }
    }

    pub(super) fn take_snapshot(&mut self, callback: Option<Callback<SnapshotMeta, SnapshotError>>) {
        if self.stopping {
            if let Some(callback) = callback {
                callback.send(Err(SnapshotError::Shutdown));
            }
            return;
        }

        let job = match self.start_snapshot() {
            Ok(job) => job,
            Err(e) => {
                match callback {
                    Some(callback) => callback.send(Err(e)),
                    None => {
                        slog::warn!(self.logger, "Failed to start snapshot"; "error" => %e);
                    }
                }
                return;
            }
        };

        let actor_client = self.actor_client.clone();
        tokio::spawn(async move {
            let result = job.run().await;
            actor_client.snapshot_persisted(result, callback).await;
        });
    }

    fn start_snapshot(&mut self) -> Result<SnapshotJob, SnapshotError> {
        if self.snapshot_in_progress {
            return Err(SnapshotError::InProgress);
        }

        let (index, term) = match self.last_applied {
            Some((index, term)) if Some(index) != self.last_snapshot_index => (index, term),
            _ => return Err(SnapshotError::NothingNew),
        };

        // Taken on the actor task, so no apply can interleave with the copy.
        let snapshot = self.state_machine.snapshot()?;
        let meta = SnapshotMeta::new(index, term, self.applied_configuration.clone());
        slog::info!(self.logger, "Taking snapshot"; "id" => &meta.id, "index" => index.as_u64());

        self.snapshot_in_progress = true;
        Ok(SnapshotJob {
            meta,
            snapshot,
            store: self.snapshot_store.clone(),
        })
    }

    pub(super) fn snapshot_persisted(
        &mut self,
        result: Result<SnapshotMeta, SnapshotError>,
        callback: Option<Callback<SnapshotMeta, SnapshotError>>,
    ) {
        self.snapshot_in_progress = false;

        let result = match result {
            Ok(meta) => {
                let through = meta.last_index();
                if self.last_snapshot_index.map_or(true, |index| through > index) {
                    self.last_snapshot_index = Some(through);
                    // Entries left behind are compacted again along with the next snapshot.
                    match self.log.compact(through) {
                        Ok(()) => {
                            slog::info!(self.logger, "Compacted log"; "through" => through.as_u64(), "snapshot" => &meta.id);
                        }
                        Err(e) => {
                            slog::warn!(self.logger, "Failed to compact log"; "through" => through.as_u64(), "error" => %e);
                        }
                    }
                }
                Ok(meta)
            }
            Err(e) => {
                slog::error!(self.logger, "Snapshot failed"; "error" => %e);
                Err(e)
            }
        };

        if let Some(callback) = callback {
            callback.send(result);
        }
    }

    pub(super) fn snapshot_in_progress(&self) -> bool {
        self.snapshot_in_progress
    }

    /// Stops accepting proposals, membership changes and new snapshots. Entries already in flight
    /// still commit and apply.
    pub(super) fn begin_shutdown(&mut self) {
        self.stopping = true;
    }

    /// The snapshot to take before stopping, if one is configured and there is something new.
    /// Must only be called once no other snapshot is in progress.
    pub(super) fn prepare_final_snapshot(&mut self) -> Option<SnapshotJob> {
        if !self.snapshot_on_shutdown {
            return None;
        }

        match self.start_snapshot() {
            Ok(job) => Some(job),
            Err(SnapshotError::NothingNew) => None,
            Err(e) => {
                slog::warn!(self.logger, "Skipping final snapshot"; "error" => %e);
                None
            }
        }
    }

    pub(super) fn shutdown(&mut self) {
        for (_, callback) in std::mem::take(&mut self.pending_proposals) {
            callback.send(Err(ProposeError::Shutdown));
        }
        if let Some((_, callback)) = self.pending_configuration.take() {
            callback.send(Err(MembershipError::Shutdown));
        }

        self.state = RaftState::Shutdown;
        self.publish_status();
        slog::info!(
            self.logger,
            "Replica shut down";
            "last_applied" => self.last_applied.map(|(index, _)| index.as_u64()),
        );
    }
}

/// SnapshotJob is a snapshot copy waiting to be written to the store.
pub(super) struct SnapshotJob {
    meta: SnapshotMeta,
    snapshot: Box<dyn FsmSnapshot>,
    store: Arc<dyn SnapshotStore>,
}

impl SnapshotJob {
    /// Persists on the blocking pool, off the actor task.
    pub(super) async fn run(self) -> Result<SnapshotMeta, SnapshotError> {
        match tokio::task::spawn_blocking(move || self.persist()).await {
            Ok(result) => result,
            Err(e) => Err(SnapshotError::Aborted(e.to_string())),
        }
    }

    fn persist(mut self) -> Result<SnapshotMeta, SnapshotError> {
        let result = self
            .store
            .create(&self.meta)
            .map_err(SnapshotError::Store)
            .and_then(|mut sink| self.snapshot.persist(&mut *sink));
        self.snapshot.release();

        result.map(|_| self.meta)
    }
}
