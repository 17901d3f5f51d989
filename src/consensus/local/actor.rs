use crate::commitlog::{Index, Log};
use crate::consensus::engine::{BootstrapError, MembershipError, ProposeError};
use crate::consensus::local::log_entry::LogEntry;
use crate::consensus::local::replica::LocalReplica;
use crate::consensus::types::{ClusterConfiguration, CommittedEntry, ServerInfo, SnapshotMeta};
use crate::fsm::SnapshotError;
use bytes::Bytes;
use std::error::Error;
use std::fmt::Debug;
use tokio::sync::{mpsc, oneshot};

/// Creates the actor's channel. The replica needs a `WeakActorClient` before the actor exists, so
/// the receiving half is handed out separately and bound later with `ReplicaActor::new`.
pub(super) fn create(buffer_size: usize) -> (ActorClient, ActorMailbox) {
    let (tx, rx) = mpsc::channel(buffer_size);

    (ActorClient { sender: tx }, ActorMailbox { receiver: rx })
}

#[derive(Debug)]
pub(super) enum Event {
    // Leader: append to log, schedule the replication ack, hold the callback until applied.
    // Otherwise: reject with NotLeader.
    Propose(Bytes, Callback<CommittedEntry, ProposeError>),

    // Everything up to and including this index is now "replicated". Commit and apply it.
    ReplicationAcked(Index),

    GetConfiguration(Callback<ClusterConfiguration, MembershipError>),

    // Leader: append a configuration entry unless one is still uncommitted.
    AddVoter(ServerInfo, Callback<(), MembershipError>),

    // Fresh node only: seed the configuration and take leadership.
    Bootstrap(ClusterConfiguration, Callback<(), BootstrapError>),

    // Operator triggered snapshot.
    TakeSnapshot(Callback<SnapshotMeta, SnapshotError>),

    // Periodic snapshot check, independent of the entry count threshold.
    SnapshotIntervalElapsed,

    // A snapshot finished persisting off the actor task. Compact on success.
    SnapshotPersisted(
        Result<SnapshotMeta, SnapshotError>,
        Option<Callback<SnapshotMeta, SnapshotError>>,
    ),

    Shutdown(oneshot::Sender<()>),
}

#[derive(Debug)]
pub(super) struct Callback<O: Debug, E: Error>(oneshot::Sender<Result<O, E>>);

impl<O: Debug, E: Error> Callback<O, E> {
    pub(super) fn send(self, message: Result<O, E>) {
        // The caller may have stopped waiting (e.g. timed out). That's fine.
        let _ = self.0.send(message);
    }
}

#[derive(Clone)]
pub(super) struct ActorClient {
    sender: mpsc::Sender<Event>,
}

impl ActorClient {
    pub(super) fn downgrade(&self) -> WeakActorClient {
        WeakActorClient {
            sender: self.sender.downgrade(),
        }
    }

    pub(super) async fn propose(&self, data: Bytes) -> Result<CommittedEntry, ProposeError> {
        let (tx, rx) = oneshot::channel();
        self.send(Event::Propose(data, Callback(tx)))
            .await
            .map_err(|_| ProposeError::Shutdown)?;

        rx.await.unwrap_or(Err(ProposeError::Shutdown))
    }

    pub(super) async fn configuration(&self) -> Result<ClusterConfiguration, MembershipError> {
        let (tx, rx) = oneshot::channel();
        self.send(Event::GetConfiguration(Callback(tx)))
            .await
            .map_err(|_| MembershipError::Shutdown)?;

        rx.await.unwrap_or(Err(MembershipError::Shutdown))
    }

    pub(super) async fn add_voter(&self, server: ServerInfo) -> Result<(), MembershipError> {
        let (tx, rx) = oneshot::channel();
        self.send(Event::AddVoter(server, Callback(tx)))
            .await
            .map_err(|_| MembershipError::Shutdown)?;

        rx.await.unwrap_or(Err(MembershipError::Shutdown))
    }

    pub(super) async fn bootstrap(&self, configuration: ClusterConfiguration) -> Result<(), BootstrapError> {
        let (tx, rx) = oneshot::channel();
        self.send(Event::Bootstrap(configuration, Callback(tx)))
            .await
            .map_err(|_| BootstrapError::Shutdown)?;

        rx.await.unwrap_or(Err(BootstrapError::Shutdown))
    }

    pub(super) async fn take_snapshot(&self) -> Result<SnapshotMeta, SnapshotError> {
        let (tx, rx) = oneshot::channel();
        self.send(Event::TakeSnapshot(Callback(tx)))
            .await
            .map_err(|_| SnapshotError::Shutdown)?;

        rx.await.unwrap_or(Err(SnapshotError::Shutdown))
    }

    /// Returns once the actor has stopped. Returns immediately if it already had.
    pub(super) async fn shutdown(&self) {
        let (tx, rx) = oneshot::channel();
        if self.send(Event::Shutdown(tx)).await.is_ok() {
            let _ = rx.await;
        }
    }

    async fn send(&self, event: Event) -> Result<(), mpsc::error::SendError<Event>> {
        self.sender.send(event).await
    }
}

/// WeakActorClient lets tasks spawned by the replica message it back without keeping the actor
/// alive.
#[derive(Clone)]
pub(super) struct WeakActorClient {
    sender: mpsc::WeakSender<Event>,
}

impl WeakActorClient {
    fn upgrade(&self) -> Option<ActorClient> {
        self.sender.upgrade().map(|sender| ActorClient { sender })
    }

    pub(super) async fn replication_acked(&self, index: Index) {
        if let Some(client) = self.upgrade() {
            let _ = client.send(Event::ReplicationAcked(index)).await;
        }
    }

    /// Returns false once the actor is gone, so the timer can stop.
    pub(super) async fn snapshot_interval_elapsed(&self) -> bool {
        match self.upgrade() {
            Some(client) => client.send(Event::SnapshotIntervalElapsed).await.is_ok(),
            None => false,
        }
    }

    pub(super) async fn snapshot_persisted(
        &self,
        result: Result<SnapshotMeta, SnapshotError>,
        callback: Option<Callback<SnapshotMeta, SnapshotError>>,
    ) {
        let client = match self.upgrade() {
            Some(client) => client,
            None => {
                if let Some(callback) = callback {
                    callback.send(Err(SnapshotError::Shutdown));
                }
                return;
            }
        };

        // If the actor stopped in the meantime, the callback is dropped with the event and the
        // waiter sees Shutdown.
        let _ = client.send(Event::SnapshotPersisted(result, callback)).await;
    }
}

pub(super) struct ActorMailbox {
    receiver: mpsc::Receiver<Event>,
}

/// ReplicaActor is the local replica logic in actor model.
pub(super) struct ReplicaActor<L>
where
    L: Log<LogEntry> + Send + 'static,
{
    receiver: mpsc::Receiver<Event>,
    replica: LocalReplica<L>,
}

impl<L> ReplicaActor<L>
where
    L: Log<LogEntry> + Send + 'static,
{
    pub(super) fn new(mailbox: ActorMailbox, replica: LocalReplica<L>) -> Self {
        ReplicaActor {
            receiver: mailbox.receiver,
            replica,
        }
    }

    pub(super) async fn run_event_loop(mut self) {
        let mut stopped = Vec::new();
        while let Some(event) = self.receiver.recv().await {
            match event {
                Event::Shutdown(done) => {
                    stopped.push(done);
                    self.stop(&mut stopped).await;
                    break;
                }
                event => self.handle_event(event),
            }
        }

        // Release the replica (and with it the log) before anyone is told we stopped. Events still
        // queued are dropped, which fails their callers with Shutdown.
        drop(self);
        for done in stopped {
            let _ = done.send(());
        }
    }

    // The only place allowed to wait: snapshots must land before we stop.
    async fn stop(&mut self, stopped: &mut Vec<oneshot::Sender<()>>) {
        self.replica.begin_shutdown();

        // A snapshot still being written covers an older index than the final one would, and
        // starting the final one now would fail. Let it finish first.
        while self.replica.snapshot_in_progress() {
            match self.receiver.recv().await {
                Some(Event::Shutdown(done)) => stopped.push(done),
                Some(event) => self.handle_event(event),
                None => break,
            }
        }

        if let Some(job) = self.replica.prepare_final_snapshot() {
            let result = job.run().await;
            self.replica.snapshot_persisted(result, None);
        }
        self.replica.shutdown();
    }

    // This must NOT be async. Any long running work must be spawned on another task and come
    // back as an event to this actor.
    fn handle_event(&mut self, event: Event) {
        match event {
            Event::Propose(data, callback) => {
                self.replica.propose(data, callback);
            }
            Event::ReplicationAcked(index) => {
                self.replica.replication_acked(index);
                self.replica.maybe_snapshot();
            }
            Event::GetConfiguration(callback) => {
                callback.send(Ok(self.replica.configuration()));
            }
            Event::AddVoter(server, callback) => {
                self.replica.add_voter(server, callback);
            }
            Event::Bootstrap(configuration, callback) => {
                callback.send(self.replica.bootstrap(configuration));
            }
            Event::TakeSnapshot(callback) => {
                self.replica.take_snapshot(Some(callback));
            }
            Event::SnapshotIntervalElapsed => {
                self.replica.snapshot_interval_elapsed();
            }
            Event::SnapshotPersisted(result, callback) => {
                self.replica.snapshot_persisted(result, callback);
                self.replica.maybe_snapshot();
            }
            Event::Shutdown(done) => {
                // Handled by the event loop.
                let _ = done.send(());
            }
        }
    }
}
