use crate::commitlog::Index;
use crate::fsm::ApplyResult;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Copy, Clone, PartialOrd, Ord, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Term(u64);

impl Term {
    pub fn new(term: u64) -> Self {
        Term(term)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Debug for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// ServerInfo describes one voting member of the cluster.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct ServerInfo {
    pub id: String,
    pub address: String,
}

impl ServerInfo {
    pub fn new(id: impl Into<String>, address: impl Into<String>) -> Self {
        ServerInfo {
            id: id.into(),
            address: address.into(),
        }
    }
}

/// ClusterConfiguration is the ordered set of voters. It is owned and persisted by the consensus
/// engine; everyone else only reads it.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct ClusterConfiguration {
    servers: Vec<ServerInfo>,
}

impl ClusterConfiguration {
    pub fn new(servers: Vec<ServerInfo>) -> Self {
        ClusterConfiguration { servers }
    }

    pub fn single(server: ServerInfo) -> Self {
        Self::new(vec![server])
    }

    pub fn servers(&self) -> &[ServerInfo] {
        &self.servers
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    pub fn contains_id(&self, id: &str) -> bool {
        self.servers.iter().any(|s| s.id == id)
    }

    /// Returns the first member bound to `id` or to `address`.
    pub fn find_by_id_or_address(&self, id: &str, address: &str) -> Option<&ServerInfo> {
        self.servers.iter().find(|s| s.id == id || s.address == address)
    }

    /// Returns a copy with `server` added as a voter. A server already present under the same id
    /// keeps its position and takes the new address.
    pub fn with_voter(&self, server: ServerInfo) -> Self {
        let mut servers = self.servers.clone();
        match servers.iter_mut().find(|s| s.id == server.id) {
            Some(existing) => existing.address = server.address,
            None => servers.push(server),
        }

        ClusterConfiguration { servers }
    }
}

/// RaftState is the role this node currently plays in consensus.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RaftState {
    Leader,
    Follower,
    Candidate,
    Shutdown,
}

impl fmt::Display for RaftState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RaftState::Leader => "Leader",
            RaftState::Follower => "Follower",
            RaftState::Candidate => "Candidate",
            RaftState::Shutdown => "Shutdown",
        };
        f.write_str(name)
    }
}

/// CommittedEntry is what a proposer gets back once its entry has been committed and applied.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommittedEntry {
    pub index: Index,
    pub term: Term,
    /// The state machine's result for exactly this entry.
    pub result: ApplyResult,
}

/// SnapshotMeta describes a persisted snapshot: the last log position it covers and the
/// configuration in effect at that position.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct SnapshotMeta {
    pub id: String,
    pub index: u64,
    pub term: Term,
    pub configuration: ClusterConfiguration,
}

impl SnapshotMeta {
    pub fn new(index: Index, term: Term, configuration: ClusterConfiguration) -> Self {
        let id = format!(
            "{}-{}-{}",
            term.as_u64(),
            index.as_u64(),
            chrono::Utc::now().timestamp_millis()
        );

        SnapshotMeta {
            id,
            index: index.as_u64(),
            term,
            configuration,
        }
    }

    pub fn last_index(&self) -> Index {
        Index::new(self.index)
    }
}
