use crate::fsm::state_machine::StoreState;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::io::{self, Read, Write};

/// SnapshotSink is where a snapshot gets written to. It is supplied by the consensus engine's
/// snapshot store.
///
/// A sink either ends with `close()`, after which the snapshot is valid, or with `cancel()`,
/// after which whatever was written must never be treated as a snapshot.
pub trait SnapshotSink: Write + Send {
    fn id(&self) -> &str;

    fn cancel(&mut self) -> io::Result<()>;

    fn close(&mut self) -> io::Result<()>;
}

/// FsmSnapshot is a point-in-time copy of a state machine, handed to the consensus engine.
pub trait FsmSnapshot: Send {
    /// Writes the full snapshot into `sink` and closes it. On any failure the sink is cancelled
    /// and the error returned.
    fn persist(&self, sink: &mut dyn SnapshotSink) -> Result<(), SnapshotError>;

    /// Frees the copied state. Safe to call at any time, including more than once.
    fn release(&mut self);
}

#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("failed to write snapshot to sink")]
    Persist(#[source] io::Error),
    #[error("snapshot was released before it was persisted")]
    Released,
    #[error("snapshot store failure")]
    Store(#[source] io::Error),
    #[error("no new entries have been applied since the last snapshot")]
    NothingNew,
    #[error("another snapshot is already being taken")]
    InProgress,
    #[error("snapshot task died: {0}")]
    Aborted(String),
    #[error("engine is shut down")]
    Shutdown,
}

#[derive(Debug, thiserror::Error)]
pub enum RestoreError {
    #[error("snapshot is malformed or truncated")]
    Malformed(#[from] serde_json::Error),
    #[error("failed to read snapshot")]
    Io(#[source] io::Error),
}

/// KvSnapshot owns a deep copy of the key-value mapping taken at one instant. Later writes to the
/// state machine do not affect it.
pub struct KvSnapshot {
    logger: slog::Logger,
    data: Option<BTreeMap<String, String>>,
}

impl KvSnapshot {
    fn abandon(&self, sink: &mut dyn SnapshotSink) {
        slog::error!(self.logger, "Abandoning snapshot"; "sink" => sink.id());
        if let Err(e) = sink.cancel() {
            slog::error!(self.logger, "Failed to cancel snapshot sink"; "sink" => sink.id(), "error" => %e);
        }
    }
}

impl FsmSnapshot for KvSnapshot {
    fn persist(&self, sink: &mut dyn SnapshotSink) -> Result<(), SnapshotError> {
        let data = match &self.data {
            Some(data) => data,
            None => {
                self.abandon(sink);
                return Err(SnapshotError::Released);
            }
        };

        if let Err(e) = write_mapping(data, sink) {
            self.abandon(sink);
            return Err(SnapshotError::Persist(e));
        }

        if let Err(e) = sink.close() {
            self.abandon(sink);
            return Err(SnapshotError::Persist(e));
        }

        slog::info!(self.logger, "Persisted snapshot"; "sink" => sink.id(), "keys" => data.len());
        Ok(())
    }

    fn release(&mut self) {
        self.data = None;
    }
}

fn write_mapping(data: &BTreeMap<String, String>, sink: &mut dyn SnapshotSink) -> io::Result<()> {
    serde_json::to_writer(&mut *sink, data)?;
    sink.flush()
}

/// Copies the mapping under the shared lock. The copy is complete before the guard drops, so no
/// apply can interleave with it.
pub(super) fn take(logger: &slog::Logger, state: &RwLock<StoreState>) -> KvSnapshot {
    let data = state.read().mapping().clone();

    KvSnapshot {
        logger: logger.clone(),
        data: Some(data),
    }
}

/// Reads a complete mapping from `source`, then swaps it in under the exclusive lock. Nothing is
/// replaced unless the whole source decodes. Returns the number of restored keys.
pub(super) fn restore(state: &RwLock<StoreState>, source: &mut dyn Read) -> Result<usize, RestoreError> {
    let data: BTreeMap<String, String> = serde_json::from_reader(source).map_err(|e| {
        if e.is_io() {
            RestoreError::Io(io::Error::from(e))
        } else {
            RestoreError::Malformed(e)
        }
    })?;
    let restored_keys = data.len();

    *state.write() = StoreState::from_mapping(data);

    Ok(restored_keys)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::commitlog::Index;
    use crate::fsm::{Command, KvStateMachine, StateMachine};
    use crate::test_utils::test_logger;
    use proptest::prelude::*;

    /// BufferSink collects a snapshot in memory and records how it ended.
    #[derive(Default)]
    pub(crate) struct BufferSink {
        pub(crate) bytes: Vec<u8>,
        pub(crate) closed: bool,
        pub(crate) cancelled: bool,
        pub(crate) fail_writes_after: Option<usize>,
    }

    impl BufferSink {
        pub(crate) fn failing_after(bytes: usize) -> Self {
            BufferSink {
                fail_writes_after: Some(bytes),
                ..BufferSink::default()
            }
        }

        pub(crate) fn into_bytes(self) -> Vec<u8> {
            assert!(self.closed, "Snapshot sink was never closed");
            self.bytes
        }
    }

    impl Write for BufferSink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if let Some(limit) = self.fail_writes_after {
                if self.bytes.len() + buf.len() > limit {
                    return Err(io::Error::new(io::ErrorKind::Other, "disk full"));
                }
            }
            self.bytes.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl SnapshotSink for BufferSink {
        fn id(&self) -> &str {
            "buffer"
        }

        fn cancel(&mut self) -> io::Result<()> {
            self.cancelled = true;
            Ok(())
        }

        fn close(&mut self) -> io::Result<()> {
            self.closed = true;
            Ok(())
        }
    }

    fn fsm_with(pairs: &[(&str, &str)]) -> KvStateMachine {
        let fsm = KvStateMachine::new(test_logger());
        for (i, (k, v)) in pairs.iter().enumerate() {
            fsm.apply(Index::new(i as u64 + 1), &Command::set(*k, *v).encode());
        }
        fsm
    }

    #[test]
    fn snapshot_is_unaffected_by_later_writes() {
        let fsm = fsm_with(&[("a", "1")]);
        let snapshot = fsm.take_snapshot();

        fsm.apply(Index::new(2), &Command::set("a", "2").encode());
        fsm.apply(Index::new(3), &Command::set("b", "3").encode());

        let mut sink = BufferSink::default();
        snapshot.persist(&mut sink).unwrap();
        let restored = KvStateMachine::new(test_logger());
        restored.restore_from(&mut sink.into_bytes().as_slice()).unwrap();

        assert_eq!(restored.get("a"), Some("1".to_string()));
        assert_eq!(restored.get("b"), None);
    }

    #[test]
    fn restore_replaces_instead_of_merging() {
        let source = fsm_with(&[("a", "1")]);
        let mut sink = BufferSink::default();
        source.take_snapshot().persist(&mut sink).unwrap();

        let target = fsm_with(&[("stale", "x"), ("a", "old")]);
        target.restore_from(&mut sink.into_bytes().as_slice()).unwrap();

        assert_eq!(target.get("a"), Some("1".to_string()));
        assert_eq!(target.get("stale"), None);
    }

    #[test]
    fn failed_write_cancels_sink() {
        let fsm = fsm_with(&[("key", "a fairly long value that will not fit")]);
        let mut sink = BufferSink::failing_after(8);

        let result = fsm.take_snapshot().persist(&mut sink);

        assert!(matches!(result, Err(SnapshotError::Persist(_))));
        assert!(sink.cancelled);
        assert!(!sink.closed);
    }

    #[test]
    fn released_snapshot_refuses_to_persist() {
        let fsm = fsm_with(&[("a", "1")]);
        let mut snapshot = fsm.take_snapshot();
        snapshot.release();
        snapshot.release();

        let mut sink = BufferSink::default();
        let result = snapshot.persist(&mut sink);

        assert!(matches!(result, Err(SnapshotError::Released)));
        assert!(sink.cancelled);
        assert!(snapshot.data.is_none());
    }

    #[test]
    fn truncated_source_fails_restore_and_keeps_state() {
        let source = fsm_with(&[("a", "1"), ("b", "2")]);
        let mut sink = BufferSink::default();
        source.take_snapshot().persist(&mut sink).unwrap();
        let mut bytes = sink.into_bytes();
        bytes.truncate(bytes.len() - 3);

        let target = fsm_with(&[("kept", "yes")]);
        let result = target.restore_from(&mut bytes.as_slice());

        assert!(matches!(result, Err(RestoreError::Malformed(_))));
        assert_eq!(target.get("kept"), Some("yes".to_string()));
    }

    proptest! {
        #[test]
        fn restore_of_persisted_snapshot_matches_source(
            pairs in prop::collection::btree_map("[a-h]{1,2}", "[a-z]{0,3}", 0..32),
            lookups in prop::collection::vec("[a-h]{1,2}", 0..16),
        ) {
            let source = KvStateMachine::new(test_logger());
            for (i, (k, v)) in pairs.iter().enumerate() {
                source.apply(Index::new(i as u64 + 1), &Command::set(k.as_str(), v.as_str()).encode());
            }

            let mut sink = BufferSink::default();
            source.take_snapshot().persist(&mut sink).unwrap();
            let restored = KvStateMachine::new(test_logger());
            restored.restore_from(&mut sink.into_bytes().as_slice()).unwrap();

            for key in pairs.keys().chain(lookups.iter()) {
                prop_assert_eq!(restored.get(key), source.get(key));
            }
        }
    }
}
