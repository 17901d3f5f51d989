use crate::consensus::types::RaftState;
use tokio::sync::watch;

/// What the replica last published about its role, as seen from outside the actor.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(super) struct EngineStatus {
    pub(super) state: RaftState,
    pub(super) leader_address: Option<String>,
}

impl EngineStatus {
    pub(super) fn follower_without_leader() -> Self {
        EngineStatus {
            state: RaftState::Follower,
            leader_address: None,
        }
    }
}

pub(super) fn new(initial_status: EngineStatus) -> (StateChangeNotifier, StateChangeListener) {
    let (snd, rcv) = watch::channel(initial_status);

    (StateChangeNotifier { snd }, StateChangeListener { rcv })
}

pub(super) struct StateChangeNotifier {
    snd: watch::Sender<EngineStatus>,
}

impl StateChangeNotifier {
    /// Publishes `new_status`, returning true if it differs from what was last published.
    pub(super) fn notify_if_changed(&self, new_status: EngineStatus) -> bool {
        self.snd.send_if_modified(|current| {
            if *current == new_status {
                false
            } else {
                *current = new_status;
                true
            }
        })
    }
}

#[derive(Clone)]
pub(super) struct StateChangeListener {
    rcv: watch::Receiver<EngineStatus>,
}

impl StateChangeListener {
    pub(super) fn current(&self) -> EngineStatus {
        self.rcv.borrow().clone()
    }
}
