use crate::consensus::ProposeError;
use crate::fsm::ApplyError;
use std::io;
use tokio::time::Duration;

/// KvError is what a write through the node can fail with.
#[derive(Debug, thiserror::Error)]
pub enum KvError {
    // `leader` is the leader's address, when one is known. Redirect there.
    #[error("this node is not the leader")]
    NotLeader { leader: Option<String> },

    // Outcome unknown; the command may still be applied later.
    #[error("command was not applied within {0:?}")]
    Timeout(Duration),

    // Replicated and committed, but the state machine refused it.
    #[error("command was committed but failed to apply")]
    Apply(#[from] ApplyError),

    #[error("node is shut down")]
    Shutdown,

    #[error("failed to persist command")]
    LocalIo(#[source] io::Error),
}

impl From<ProposeError> for KvError {
    fn from(e: ProposeError) -> Self {
        match e {
            ProposeError::NotLeader { leader } => KvError::NotLeader { leader },
            ProposeError::Timeout(timeout) => KvError::Timeout(timeout),
            ProposeError::LocalIo(e) => KvError::LocalIo(e),
            ProposeError::Shutdown => KvError::Shutdown,
        }
    }
}
