use crate::commitlog::{Entry, Index, Log};
use redb::{Database, ReadableTable, TableDefinition};
use std::io;
use std::marker::PhantomData;
use std::path::Path;

// One row per entry: log index -> the entry's serialized bytes.
const LOG_TABLE: TableDefinition<u64, &[u8]> = TableDefinition::new("raft_log");

/// DiskLog keeps the log in a redb database file. Each append commits its own write transaction,
/// so an entry is on disk by the time `append` returns its index.
pub struct DiskLog<E: Entry> {
    db: Database,
    // Lowest index the log may still hold. Everything below it was compacted.
    offset: Index,
    next_index: Index,
    _pd: PhantomData<E>,
}

impl<E: Entry> DiskLog<E> {
    /// Opens the log at `path`, creating the file if it doesn't exist yet.
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let db = Database::create(path.as_ref()).map_err(storage_error)?;

        let write_txn = db.begin_write().map_err(storage_error)?;
        {
            let _ = write_txn.open_table(LOG_TABLE).map_err(storage_error)?;
        }
        write_txn.commit().map_err(storage_error)?;

        let (first, last) = {
            let read_txn = db.begin_read().map_err(storage_error)?;
            let table = read_txn.open_table(LOG_TABLE).map_err(storage_error)?;
            let first = table.first().map_err(storage_error)?.map(|(index, _)| index.value());
            let last = table.last().map_err(storage_error)?.map(|(index, _)| index.value());
            (first, last)
        };

        let (offset, next_index) = match (first, last) {
            (Some(0), _) => return Err(io::Error::new(io::ErrorKind::InvalidData, "log holds an entry at index 0")),
            (Some(first), Some(last)) => (Index::new(first), Index::new(last + 1)),
            _ => (Index::start_index(), Index::start_index()),
        };

        Ok(DiskLog {
            db,
            offset,
            next_index,
            _pd: PhantomData,
        })
    }
}

impl<E: Entry> Log<E> for DiskLog<E> {
    fn append(&mut self, entry: E) -> Result<Index, io::Error> {
        let index = self.next_index;
        let bytes: Vec<u8> = entry.into();

        let write_txn = self.db.begin_write().map_err(storage_error)?;
        {
            let mut table = write_txn.open_table(LOG_TABLE).map_err(storage_error)?;
            table.insert(index.as_u64(), bytes.as_slice()).map_err(storage_error)?;
        }
        write_txn.commit().map_err(storage_error)?;

        self.next_index = index.plus(1);
        Ok(index)
    }

    fn read(&self, index: Index) -> Result<Option<E>, io::Error> {
        if index < self.offset || index >= self.next_index {
            return Ok(None);
        }

        let read_txn = self.db.begin_read().map_err(storage_error)?;
        let table = read_txn.open_table(LOG_TABLE).map_err(storage_error)?;
        let bytes = match table.get(index.as_u64()).map_err(storage_error)? {
            Some(bytes) => bytes.value().to_vec(),
            None => return Ok(None),
        };

        E::try_from(bytes).map(Some)
    }

    fn compact(&mut self, through: Index) -> Result<(), io::Error> {
        if through < self.offset {
            return Ok(());
        }

        let write_txn = self.db.begin_write().map_err(storage_error)?;
        {
            let mut table = write_txn.open_table(LOG_TABLE).map_err(storage_error)?;
            let compacted: Vec<u64> = table
                .range(..=through.as_u64())
                .map_err(storage_error)?
                .map(|row| row.map(|(index, _)| index.value()))
                .collect::<Result<_, _>>()
                .map_err(storage_error)?;

            for index in compacted {
                table.remove(index).map_err(storage_error)?;
            }
        }
        write_txn.commit().map_err(storage_error)?;

        self.offset = through.plus(1);
        if self.next_index < self.offset {
            self.next_index = self.offset;
        }

        Ok(())
    }

    fn first_index(&self) -> Option<Index> {
        if self.next_index > self.offset {
            Some(self.offset)
        } else {
            None
        }
    }

    fn next_index(&self) -> Index {
        self.next_index
    }
}

fn storage_error(e: impl Into<redb::Error>) -> io::Error {
    io::Error::new(io::ErrorKind::Other, e.into())
}
