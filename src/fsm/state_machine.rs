use crate::commitlog::Index;
use crate::fsm::command::{Command, Op};
use crate::fsm::snapshot::{self, FsmSnapshot, KvSnapshot, RestoreError, SnapshotError};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::io::Read;

/// StateMachine is the application specific view of applying the replicated logs in sequential
/// consistent order. The consensus engine is handed an implementation of this trait and is the
/// only caller of `apply`, `snapshot` and `restore`.
pub trait StateMachine: Send + Sync {
    /// apply is called only when its guaranteed that the provided entry has been committed (i.e.
    /// replicated to a majority). Because of this guarantee, you will never need to reverse an
    /// entry once you've been asked to apply it, so your impl of applying an entry need not be
    /// reversible.
    ///
    /// Calls arrive one at a time, in ascending index order, exactly once per committed entry.
    /// The result is returned to whichever client proposed the entry.
    fn apply(&self, index: Index, entry: &[u8]) -> ApplyResult;

    /// snapshot returns a point-in-time copy of the state. Never called concurrently with `apply`.
    fn snapshot(&self) -> Result<Box<dyn FsmSnapshot>, SnapshotError>;

    /// restore replaces the entire state with the one read from `source`.
    fn restore(&self, source: &mut dyn Read) -> Result<(), RestoreError>;
}

/// The outcome of applying one committed entry.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ApplyResult {
    Ok,
    /// The entry could not be decoded. It was consumed without touching state.
    DecodeFailed(String),
    /// The entry decoded, but the application rejected it.
    AppError(String),
}

#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum ApplyError {
    #[error("entry could not be decoded: {0}")]
    DecodeFailed(String),
    #[error("entry was rejected by the state machine: {0}")]
    AppError(String),
}

impl ApplyResult {
    pub fn into_result(self) -> Result<(), ApplyError> {
        match self {
            ApplyResult::Ok => Ok(()),
            ApplyResult::DecodeFailed(reason) => Err(ApplyError::DecodeFailed(reason)),
            ApplyResult::AppError(reason) => Err(ApplyError::AppError(reason)),
        }
    }
}

/// StoreState is the authoritative key-value mapping. Only `KvStateMachine` holds one.
///
/// `BTreeMap` keeps iteration order fixed so two replicas at the same index serialize to the same
/// bytes.
#[derive(Debug, Default)]
pub(super) struct StoreState {
    data: BTreeMap<String, String>,
}

impl StoreState {
    pub(super) fn from_mapping(data: BTreeMap<String, String>) -> Self {
        StoreState { data }
    }

    pub(super) fn mapping(&self) -> &BTreeMap<String, String> {
        &self.data
    }

    fn read(&self, key: &str) -> Option<&str> {
        self.data.get(key).map(String::as_str)
    }

    // Must stay a pure function of (state, command).
    fn apply_command(&mut self, command: &Command) {
        match command.op() {
            Op::Set => {
                let value = command.value().unwrap_or_default().to_string();
                self.data.insert(command.key().to_string(), value);
            }
            Op::Delete => {
                self.data.remove(command.key());
            }
            Op::Other(_) => {}
        }
    }
}

/// KvStateMachine applies key-value commands to a `StoreState`.
///
/// Writes take the exclusive lock for one command at a time. Reads and snapshot copies take the
/// shared lock, so they never observe a half-applied command.
pub struct KvStateMachine {
    logger: slog::Logger,
    state: RwLock<StoreState>,
}

impl KvStateMachine {
    pub fn new(logger: slog::Logger) -> Self {
        KvStateMachine {
            logger,
            state: RwLock::new(StoreState::default()),
        }
    }

    /// Returns the locally applied value for `key`. This does not consult the consensus log, so a
    /// lagging replica may return stale data.
    pub fn get(&self, key: &str) -> Option<String> {
        self.state.read().read(key).map(str::to_string)
    }

    pub fn take_snapshot(&self) -> KvSnapshot {
        snapshot::take(&self.logger, &self.state)
    }

    pub fn restore_from(&self, source: &mut dyn Read) -> Result<(), RestoreError> {
        let restored_keys = snapshot::restore(&self.state, source)?;
        slog::info!(self.logger, "Restored state machine from snapshot"; "keys" => restored_keys);
        Ok(())
    }
}

impl StateMachine for KvStateMachine {
    fn apply(&self, index: Index, entry: &[u8]) -> ApplyResult {
        // Decode outside the lock. A poison entry is consumed and never retried; it can't become
        // well-formed on replay.
        let command = match Command::decode(entry) {
            Ok(command) => command,
            Err(e) => {
                slog::warn!(self.logger, "Skipping undecodable log entry"; "index" => index.as_u64(), "error" => %e);
                return ApplyResult::DecodeFailed(e.to_string());
            }
        };

        if let Op::Other(name) = command.op() {
            slog::debug!(self.logger, "Ignoring unknown op"; "index" => index.as_u64(), "op" => name.as_str());
        }

        self.state.write().apply_command(&command);
        ApplyResult::Ok
    }

    fn snapshot(&self) -> Result<Box<dyn FsmSnapshot>, SnapshotError> {
        Ok(Box::new(self.take_snapshot()))
    }

    fn restore(&self, source: &mut dyn Read) -> Result<(), RestoreError> {
        self.restore_from(source)
    }
}
