use crate::consensus::types::SnapshotMeta;
use crate::fsm::SnapshotSink;
use bytes::Bytes;
use parking_lot::Mutex;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// SnapshotStore is the engine's durable home for snapshots.
pub trait SnapshotStore: Send + Sync {
    /// Starts a new snapshot. Nothing becomes visible to `open_latest` until the sink is closed.
    fn create(&self, meta: &SnapshotMeta) -> io::Result<Box<dyn SnapshotSink>>;

    /// Opens the most recent complete snapshot, if there is one.
    fn open_latest(&self) -> io::Result<Option<(SnapshotMeta, Box<dyn Read + Send>)>>;
}

const META_FILE: &str = "meta.json";
const STATE_FILE: &str = "state.bin";
const TMP_SUFFIX: &str = ".tmp";

/// FileSnapshotStore keeps one directory per snapshot:
///
/// ```text
/// {root}/{snapshot id}/meta.json
/// {root}/{snapshot id}/state.bin
/// ```
///
/// A snapshot is written under `{id}.tmp` and renamed into place on close, so a crash mid-write
/// never leaves something that looks complete. Only the newest `retain` snapshots are kept.
pub struct FileSnapshotStore {
    logger: slog::Logger,
    root: PathBuf,
    retain: usize,
}

impl FileSnapshotStore {
    pub fn new(logger: slog::Logger, root: impl Into<PathBuf>, retain: usize) -> io::Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;

        Ok(FileSnapshotStore { logger, root, retain })
    }

    fn list(root: &Path, logger: &slog::Logger) -> io::Result<Vec<(SnapshotMeta, PathBuf)>> {
        let mut snapshots = Vec::new();
        for dir_entry in fs::read_dir(root)? {
            let path = dir_entry?.path();
            let is_tmp = path
                .file_name()
                .and_then(|name| name.to_str())
                .map_or(true, |name| name.ends_with(TMP_SUFFIX));
            if !path.is_dir() || is_tmp {
                continue;
            }

            match read_meta(&path) {
                Ok(meta) => snapshots.push((meta, path)),
                Err(e) => slog::warn!(logger, "Ignoring unreadable snapshot"; "path" => %path.display(), "error" => %e),
            }
        }

        // Oldest first.
        snapshots.sort_by(|(a, _), (b, _)| (a.term, a.index, &a.id).cmp(&(b.term, b.index, &b.id)));
        Ok(snapshots)
    }

    fn reap(root: &Path, retain: usize, logger: &slog::Logger) -> io::Result<()> {
        let snapshots = Self::list(root, logger)?;
        let excess = snapshots.len().saturating_sub(retain);
        for (meta, path) in snapshots.into_iter().take(excess) {
            slog::info!(logger, "Reaping old snapshot"; "id" => &meta.id);
            fs::remove_dir_all(path)?;
        }

        Ok(())
    }
}

impl SnapshotStore for FileSnapshotStore {
    fn create(&self, meta: &SnapshotMeta) -> io::Result<Box<dyn SnapshotSink>> {
        let tmp_dir = self.root.join(format!("{}{}", meta.id, TMP_SUFFIX));
        fs::create_dir_all(&tmp_dir)?;

        let meta_file = File::create(tmp_dir.join(META_FILE))?;
        serde_json::to_writer(meta_file, meta)?;
        let state_file = File::create(tmp_dir.join(STATE_FILE))?;

        Ok(Box::new(FileSnapshotSink {
            logger: self.logger.clone(),
            id: meta.id.clone(),
            root: self.root.clone(),
            retain: self.retain,
            final_dir: self.root.join(&meta.id),
            tmp_dir,
            writer: Some(BufWriter::new(state_file)),
        }))
    }

    fn open_latest(&self) -> io::Result<Option<(SnapshotMeta, Box<dyn Read + Send>)>> {
        let latest = match Self::list(&self.root, &self.logger)?.pop() {
            Some(latest) => latest,
            None => return Ok(None),
        };

        let (meta, path) = latest;
        let state_file = File::open(path.join(STATE_FILE))?;
        Ok(Some((meta, Box::new(BufReader::new(state_file)))))
    }
}

fn read_meta(dir: &Path) -> io::Result<SnapshotMeta> {
    let file = File::open(dir.join(META_FILE))?;
    Ok(serde_json::from_reader(BufReader::new(file))?)
}

struct FileSnapshotSink {
    logger: slog::Logger,
    id: String,
    root: PathBuf,
    retain: usize,
    tmp_dir: PathBuf,
    final_dir: PathBuf,
    // None once closed or cancelled.
    writer: Option<BufWriter<File>>,
}

impl FileSnapshotSink {
    fn writer(&mut self) -> io::Result<&mut BufWriter<File>> {
        self.writer
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "snapshot sink is already finished"))
    }

    fn remove_tmp_dir(&self) -> io::Result<()> {
        match fs::remove_dir_all(&self.tmp_dir) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }
}

impl Write for FileSnapshotSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.writer()?.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer()?.flush()
    }
}

impl SnapshotSink for FileSnapshotSink {
    fn id(&self) -> &str {
        &self.id
    }

    fn cancel(&mut self) -> io::Result<()> {
        self.writer = None;
        self.remove_tmp_dir()
    }

    fn close(&mut self) -> io::Result<()> {
        let writer = match self.writer.take() {
            Some(writer) => writer,
            None => return Err(io::Error::new(io::ErrorKind::Other, "snapshot sink is already finished")),
        };

        let file = writer.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;
        fs::rename(&self.tmp_dir, &self.final_dir)?;

        // The snapshot is in place from here on. Failing to prune older ones doesn't undo that.
        if let Err(e) = FileSnapshotStore::reap(&self.root, self.retain, &self.logger) {
            slog::warn!(self.logger, "Failed to reap old snapshots"; "id" => &self.id, "error" => %e);
        }

        Ok(())
    }
}

impl Drop for FileSnapshotSink {
    fn drop(&mut self) {
        // Neither closed nor cancelled: treat as abandoned.
        if self.writer.is_some() {
            if let Err(e) = self.cancel() {
                slog::warn!(self.logger, "Failed to clean up abandoned snapshot"; "id" => &self.id, "error" => %e);
            }
        }
    }
}

/// InMemorySnapshotStore keeps only the latest snapshot. Clones share the same storage, so a test
/// can hand one clone to an engine and inspect or reuse it after that engine is gone.
#[derive(Clone, Default)]
pub struct InMemorySnapshotStore {
    latest: Arc<Mutex<Option<(SnapshotMeta, Bytes)>>>,
}

impl InMemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn latest_meta(&self) -> Option<SnapshotMeta> {
        self.latest.lock().as_ref().map(|(meta, _)| meta.clone())
    }
}

impl SnapshotStore for InMemorySnapshotStore {
    fn create(&self, meta: &SnapshotMeta) -> io::Result<Box<dyn SnapshotSink>> {
        Ok(Box::new(InMemorySnapshotSink {
            meta: meta.clone(),
            buffer: Some(Vec::new()),
            latest: self.latest.clone(),
        }))
    }

    fn open_latest(&self) -> io::Result<Option<(SnapshotMeta, Box<dyn Read + Send>)>> {
        let latest = self.latest.lock().clone();

        Ok(latest.map(|(meta, bytes)| {
            let reader: Box<dyn Read + Send> = Box::new(io::Cursor::new(bytes));
            (meta, reader)
        }))
    }
}

struct InMemorySnapshotSink {
    meta: SnapshotMeta,
    buffer: Option<Vec<u8>>,
    latest: Arc<Mutex<Option<(SnapshotMeta, Bytes)>>>,
}

impl Write for InMemorySnapshotSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.buffer.as_mut() {
            Some(buffer) => buffer.write(buf),
            None => Err(io::Error::new(io::ErrorKind::Other, "snapshot sink is already finished")),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl SnapshotSink for InMemorySnapshotSink {
    fn id(&self) -> &str {
        &self.meta.id
    }

    fn cancel(&mut self) -> io::Result<()> {
        self.buffer = None;
        Ok(())
    }

    fn close(&mut self) -> io::Result<()> {
        match self.buffer.take() {
            Some(buffer) => {
                *self.latest.lock() = Some((self.meta.clone(), Bytes::from(buffer)));
                Ok(())
            }
            None => Err(io::Error::new(io::ErrorKind::Other, "snapshot sink is already finished")),
        }
    }
}
