use crate::commitlog::{Entry, Index, Log};
use std::collections::VecDeque;
use std::io;
use std::marker::PhantomData;

// Only lives as long as the process does. Use `DiskLog` for a log that survives a restart.
pub struct InMemoryLog<E: Entry> {
    // We don't *need* to convert these to bytes. We could just hold the original entry in memory,
    // but we want to exercise the conversion logic.
    log: VecDeque<Vec<u8>>,
    // Index of `log[0]`.
    offset: Index,
    _pd: PhantomData<E>,
}

impl<E: Entry> InMemoryLog<E> {
    pub fn create() -> Self {
        Self::starting_at(Index::start_index())
    }

    /// Creates an empty log whose first appended entry will land at `next_index`.
    pub fn starting_at(next_index: Index) -> Self {
        InMemoryLog {
            log: VecDeque::new(),
            offset: next_index,
            _pd: PhantomData,
        }
    }

    fn vec_index(&self, index: Index) -> Option<usize> {
        if index < self.offset {
            return None;
        }

        Some((index.as_u64() - self.offset.as_u64()) as usize)
    }
}

impl<E: Entry> Log<E> for InMemoryLog<E> {
    fn append(&mut self, entry: E) -> Result<Index, io::Error> {
        let appended_index = self.next_index();
        self.log.push_back(entry.into());

        Ok(appended_index)
    }

    fn read(&self, index: Index) -> Result<Option<E>, io::Error> {
        let bytes = match self.vec_index(index).and_then(|i| self.log.get(i)) {
            Some(bytes) => bytes.clone(),
            None => return Ok(None),
        };

        E::try_from(bytes).map(Some)
    }

    fn compact(&mut self, through: Index) -> Result<(), io::Error> {
        if through < self.offset {
            return Ok(());
        }

        let wanted = (through.as_u64() - self.offset.as_u64() + 1) as usize;
        let drained = wanted.min(self.log.len());
        self.log.drain(..drained);
        self.offset = through.plus(1);

        Ok(())
    }

    fn first_index(&self) -> Option<Index> {
        if self.log.is_empty() {
            None
        } else {
            Some(self.offset)
        }
    }

    fn next_index(&self) -> Index {
        self.offset.plus(self.log.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commitlog::test_entry::{entry, TestEntry};

    #[test]
    fn append_assigns_sequential_indexes_from_one() {
        let mut log: InMemoryLog<TestEntry> = InMemoryLog::create();

        assert_eq!(log.next_index(), Index::start_index());
        assert_eq!(log.append(entry(1)).unwrap(), Index::new(1));
        assert_eq!(log.append(entry(2)).unwrap(), Index::new(2));
        assert_eq!(log.next_index(), Index::new(3));

        assert_eq!(log.read(Index::new(2)).unwrap(), Some(entry(2)));
        assert_eq!(log.read(Index::new(3)).unwrap(), None);
    }

    #[test]
    fn compact_discards_prefix_and_keeps_indexes() {
        let mut log: InMemoryLog<TestEntry> = InMemoryLog::create();
        for b in 1..=5 {
            log.append(entry(b)).unwrap();
        }

        log.compact(Index::new(3)).unwrap();

        assert_eq!(log.next_index(), Index::new(6));
        assert_eq!(log.first_index(), Some(Index::new(4)));
        assert_eq!(log.read(Index::new(3)).unwrap(), None);
        assert_eq!(log.read(Index::new(4)).unwrap(), Some(entry(4)));
        assert_eq!(log.append(entry(6)).unwrap(), Index::new(6));

        // Compacting an already-compacted range is a no-op.
        log.compact(Index::new(2)).unwrap();
        assert_eq!(log.first_index(), Some(Index::new(4)));
    }

    #[test]
    fn compact_past_end_restarts_log() {
        let mut log: InMemoryLog<TestEntry> = InMemoryLog::create();
        log.append(entry(1)).unwrap();

        log.compact(Index::new(10)).unwrap();

        assert_eq!(log.first_index(), None);
        assert_eq!(log.next_index(), Index::new(11));
    }

    #[test]
    fn starting_at_offsets_first_append() {
        let mut log: InMemoryLog<TestEntry> = InMemoryLog::starting_at(Index::new(42));

        assert_eq!(log.append(entry(9)).unwrap(), Index::new(42));
        assert_eq!(log.read(Index::new(41)).unwrap(), None);
    }

    #[test]
    fn index_checked_minus_never_reaches_zero() {
        assert_eq!(Index::new(3).checked_minus(2), Some(Index::new(1)));
        assert_eq!(Index::new(3).checked_minus(3), None);
        assert_eq!(Index::new(3).checked_minus(4), None);
    }
}
