use std::{fmt, io};

/// Index is an index of an entry in the log; i.e. a log entry's index.
///
/// Indexes start from 1. A value of 0 is never a valid index; use `Option<Index>` to model
/// "no entry".
#[derive(Copy, Clone, PartialOrd, PartialEq, Ord, Eq, Hash)]
pub struct Index(u64);

impl Index {
    pub fn new(index: u64) -> Self {
        assert_ne!(index, 0, "Log indexes start from 1");
        Index(index)
    }

    pub fn start_index() -> Self {
        Self::new(1)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }

    pub fn plus(&self, delta: u64) -> Index {
        Index::new(self.0 + delta)
    }

    pub fn checked_minus(&self, delta: u64) -> Option<Index> {
        match self.0.checked_sub(delta) {
            Some(new_value) if new_value > 0 => Some(Index::new(new_value)),
            _ => None,
        }
    }
}

impl fmt::Debug for Index {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for Index {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Log is an append only log intended for use as a replicated commit log in a database.
///
/// Log indexes entries starting from 1. There will be no entry existing at index 0. A log may
/// begin at a later index if its prefix was compacted away (e.g. after a snapshot).
pub trait Log<E: Entry> {
    /// append() appends a log entry to the log at the next log entry index, then returns
    /// the log entry index that was just used to append the entry.
    fn append(&mut self, entry: E) -> Result<Index, io::Error>;

    /// Read log entry at specified index. Returns `None` if the index was never written or has
    /// been compacted.
    fn read(&self, index: Index) -> Result<Option<E>, io::Error>;

    /// Discards every entry up to and including `through`. The next index is unaffected unless
    /// `through` lies past the end of the log, in which case the log restarts at `through + 1`.
    fn compact(&mut self, through: Index) -> Result<(), io::Error>;

    /// first_index returns the lowest index still held by the log, if any.
    fn first_index(&self) -> Option<Index>;

    /// next_index returns the next index that will be used to append an entry.
    fn next_index(&self) -> Index;
}

// Choice of Vec<u8> vs Bytes will depend on whats easier for disk to use.
pub trait Entry: Clone + Into<Vec<u8>> + TryFrom<Vec<u8>, Error = io::Error> {}
