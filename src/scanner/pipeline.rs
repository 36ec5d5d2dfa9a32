use crate::error::{Error, LoadError};
use crate::loader::{TensorLoader, TensorMap};
use crate::progress::ProgressReporter;
use crate::signature::structural_signature;
use crate::storage::{CheckpointStore, CoarseGroups, FileRecord, FileRecordTable, Table};
use chrono::Utc;
use crossbeam_channel::{Receiver, Sender};
use dashmap::DashMap;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace, warn};

#[derive(Debug, Clone)]
pub struct ScanOptions {
    pub workers: usize,
    pub flush_interval: usize,
    /// 0 for an unbounded queue.
    pub queue_capacity: usize,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            workers: 4,
            flush_interval: 2,
            queue_capacity: 8,
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ScanOutcome {
    pub candidates: usize,
    pub already_recorded: usize,
    /// Candidates skipped because their path is not valid UTF-8.
    pub unsupported_paths: usize,
    pub queued: usize,
    pub load_failures: usize,
    pub processed: usize,
}

/// A loaded file on its way from the producer to a worker.
pub struct ScanItem {
    pub path: String,
    pub tensors: TensorMap,
    pub load_time: Duration,
    pub size_bytes: u64,
}

enum WorkItem {
    File(ScanItem),
    Shutdown,
}

struct RecordState {
    table: FileRecordTable,
    completed: usize,
}

/// The two tables mutated by scan workers. Records sit behind a mutex, groups
/// in a sharded map; neither lock is taken while holding the other.
pub struct ScanState {
    records: Mutex<RecordState>,
    groups: DashMap<String, BTreeSet<String>>,
    checkpoint_guard: Mutex<()>,
}

impl ScanState {
    pub fn new(files: FileRecordTable, groups: CoarseGroups) -> Self {
        let live_groups = DashMap::new();
        for (signature, members) in groups.iter() {
            live_groups.insert(signature.clone(), members.clone());
        }
        Self {
            records: Mutex::new(RecordState {
                table: files,
                completed: 0,
            }),
            groups: live_groups,
            checkpoint_guard: Mutex::new(()),
        }
    }

    fn lock_records(&self) -> Result<MutexGuard<'_, RecordState>, Error> {
        self.records
            .lock()
            .map_err(|e| Error::Other(format!("Failed to lock file records: {}", e)))
    }

    pub fn is_recorded(&self, path: &str) -> Result<bool, Error> {
        Ok(self.lock_records()?.table.contains_key(path))
    }

    pub fn add_to_group(&self, signature: String, path: &str) {
        self.groups
            .entry(signature)
            .or_default()
            .insert(path.to_string());
    }

    /// Inserts the record and returns how many files this run has completed.
    pub fn record(&self, path: String, record: FileRecord) -> Result<usize, Error> {
        let mut records = self.lock_records()?;
        records.table.insert(path, record);
        records.completed += 1;
        Ok(records.completed)
    }

    pub fn groups_snapshot(&self) -> CoarseGroups {
        self.groups
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    /// Persists both tables. Records are snapshotted before groups and every
    /// path reaches its group before its record, so the saved groups always
    /// cover the saved records.
    pub fn flush(&self, store: &CheckpointStore) -> Result<(), Error> {
        let _guard = self
            .checkpoint_guard
            .lock()
            .map_err(|e| Error::Other(format!("Failed to lock checkpoint: {}", e)))?;
        let records = self.lock_records()?.table.clone();
        let groups = self.groups_snapshot();
        store.save(Table::CoarseGroups, &groups)?;
        store.save(Table::Files, &records)?;
        debug!(
            "Flushed {} file records and {} groups to checkpoint",
            records.len(),
            groups.len()
        );
        Ok(())
    }

    pub fn into_tables(self) -> Result<(FileRecordTable, CoarseGroups), Error> {
        let records = self
            .records
            .into_inner()
            .map_err(|e| Error::Other(format!("File records poisoned: {}", e)))?;
        let groups = self.groups.into_iter().collect();
        Ok((records.table, groups))
    }
}

/// Table key for `path`. Paths that are not valid UTF-8 have no key: a lossy
/// conversion could map two distinct files onto one entry.
pub fn path_key(path: &Path) -> Option<&str> {
    path.to_str()
}

/// Loads every candidate not already recorded and classifies it by
/// structural signature. Returns once the producer has finished and every
/// queued file has been processed.
pub fn run_scan(
    candidates: &[PathBuf],
    state: &ScanState,
    loader: &dyn TensorLoader,
    store: &CheckpointStore,
    options: &ScanOptions,
    reporter: &dyn ProgressReporter,
) -> Result<ScanOutcome, Error> {
    let workers = options.workers.max(1);
    let flush_interval = options.flush_interval.max(1);

    let mut pending: Vec<(&Path, &str)> = Vec::with_capacity(candidates.len());
    let mut already_recorded = 0;
    let mut unsupported_paths = 0;
    for path in candidates {
        let Some(key) = path_key(path) else {
            warn!("Skipping file with a non UTF-8 path: {}", path.display());
            unsupported_paths += 1;
            continue;
        };
        if state.is_recorded(key)? {
            trace!("Skipping already processed file: {}", path.display());
            already_recorded += 1;
        } else {
            pending.push((path.as_path(), key));
        }
    }
    info!(
        "{} candidate files, {} already processed, {} to load",
        candidates.len(),
        already_recorded,
        pending.len()
    );
    reporter.on_scan_start(pending.len());

    let (tx, rx) = if options.queue_capacity == 0 {
        crossbeam_channel::unbounded::<WorkItem>()
    } else {
        crossbeam_channel::bounded::<WorkItem>(options.queue_capacity)
    };
    let abort = AtomicBool::new(false);
    let to_load = pending.len();

    let (producer_stats, worker_results) = thread::scope(|scope| {
        let mut handles = Vec::with_capacity(workers);
        for worker_idx in 0..workers {
            let rx = rx.clone();
            let abort = &abort;
            let handle = thread::Builder::new()
                .name(format!("scan-worker-{}", worker_idx))
                .spawn_scoped(scope, move || {
                    consume(
                        worker_idx,
                        rx,
                        state,
                        store,
                        flush_interval,
                        to_load,
                        reporter,
                        abort,
                    )
                });
            match handle {
                Ok(h) => handles.push(h),
                Err(e) => {
                    error!("Unable to spawn scan worker {}: {}", worker_idx, e);
                    abort.store(true, Ordering::SeqCst);
                }
            }
        }
        // Channel disconnection must be driven by worker exits only.
        drop(rx);

        let spawned = handles.len();
        let abort_ref = &abort;
        let pending_ref = &pending;
        let producer = scope.spawn(move || produce(pending_ref, loader, tx, spawned, abort_ref));

        let producer_stats = producer.join();
        debug!("Producer finished, waiting for workers to drain the queue");
        let worker_results: Vec<_> = handles.into_iter().map(|h| h.join()).collect();
        (producer_stats, worker_results)
    });

    let (queued, load_failures) =
        producer_stats.map_err(|_| Error::Other("Scan producer panicked".to_string()))?;

    let mut processed = 0;
    let mut first_error = None;
    for result in worker_results {
        match result {
            Ok(Ok(count)) => processed += count,
            Ok(Err(e)) => {
                first_error.get_or_insert(e);
            }
            Err(_) => {
                first_error.get_or_insert(Error::Other("Scan worker panicked".to_string()));
            }
        }
    }
    if let Some(e) = first_error {
        return Err(e);
    }
    if abort.load(Ordering::SeqCst) {
        return Err(Error::Other("Scan aborted before completion".to_string()));
    }

    Ok(ScanOutcome {
        candidates: candidates.len(),
        already_recorded,
        unsupported_paths,
        queued,
        load_failures,
        processed,
    })
}

fn load_item(path: &Path, key: &str, loader: &dyn TensorLoader) -> Result<ScanItem, LoadError> {
    let size_bytes = fs::metadata(path)
        .map_err(|source| LoadError::Io {
            path: path.to_path_buf(),
            source,
        })?
        .len();
    let start = Instant::now();
    let tensors = loader.load(path)?;
    Ok(ScanItem {
        path: key.to_string(),
        tensors,
        load_time: start.elapsed(),
        size_bytes,
    })
}

/// Returns (queued, failed).
fn produce(
    pending: &[(&Path, &str)],
    loader: &dyn TensorLoader,
    tx: Sender<WorkItem>,
    workers: usize,
    abort: &AtomicBool,
) -> (usize, usize) {
    let mut queued = 0;
    let mut failed = 0;

    for &(path, key) in pending {
        if abort.load(Ordering::SeqCst) {
            warn!("Scan aborted, producer stopping early");
            break;
        }
        debug!("Loading file: {}", path.display());
        match load_item(path, key, loader) {
            Ok(item) => {
                let load_time = item.load_time;
                if tx.send(WorkItem::File(item)).is_err() {
                    warn!("All scan workers have exited, producer stopping early");
                    break;
                }
                queued += 1;
                trace!(
                    "Queued file: {} (load time: {:.2}s)",
                    path.display(),
                    load_time.as_secs_f64()
                );
            }
            Err(e) => {
                warn!("Skipping file, will retry next run: {}", e);
                failed += 1;
            }
        }
    }

    for _ in 0..workers {
        if tx.send(WorkItem::Shutdown).is_err() {
            break;
        }
    }
    (queued, failed)
}

#[allow(clippy::too_many_arguments)]
fn consume(
    worker_idx: usize,
    rx: Receiver<WorkItem>,
    state: &ScanState,
    store: &CheckpointStore,
    flush_interval: usize,
    to_load: usize,
    reporter: &dyn ProgressReporter,
    abort: &AtomicBool,
) -> Result<usize, Error> {
    let mut processed = 0;

    for work in rx.iter() {
        let item = match work {
            WorkItem::File(item) => item,
            WorkItem::Shutdown => {
                trace!("Worker {} received shutdown", worker_idx);
                break;
            }
        };
        if abort.load(Ordering::SeqCst) {
            break;
        }

        let ScanItem {
            path,
            tensors,
            load_time,
            size_bytes,
        } = item;
        let signature = structural_signature(&tensors);
        drop(tensors);

        state.add_to_group(signature, &path);
        let record = FileRecord {
            load_time_secs: load_time.as_secs_f64(),
            size_bytes,
            recorded_at: Utc::now(),
        };
        trace!("Worker {} completed {}", worker_idx, path);
        let completed = match state.record(path, record) {
            Ok(completed) => completed,
            Err(e) => {
                abort.store(true, Ordering::SeqCst);
                return Err(e);
            }
        };
        processed += 1;
        reporter.on_file_processed(completed, to_load);

        if completed % flush_interval == 0 {
            if let Err(e) = state.flush(store) {
                error!("Checkpoint flush failed, aborting scan: {}", e);
                abort.store(true, Ordering::SeqCst);
                return Err(e);
            }
        }
    }

    Ok(processed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::Tensor;
    use crate::progress::SilentReporter;
    use std::sync::atomic::AtomicUsize;
    use tempfile::tempdir;

    /// Decodes the file body as a list of dimensions: "2x3,4" → shapes [2,3] and [4].
    struct ShapeTextLoader {
        loads: AtomicUsize,
    }

    impl TensorLoader for ShapeTextLoader {
        fn load(&self, path: &Path) -> Result<TensorMap, LoadError> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            let body = fs::read_to_string(path).map_err(|source| LoadError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            if body.starts_with("corrupt") {
                return Err(LoadError::Format {
                    path: path.to_path_buf(),
                    reason: "bad header".to_string(),
                });
            }
            let mut map = TensorMap::new();
            for (i, dims) in body.trim().split(',').enumerate() {
                let shape: Vec<usize> = dims.split('x').map(|d| d.parse().unwrap()).collect();
                map.insert(
                    format!("t{}", i),
                    Tensor {
                        dtype: "U8".to_string(),
                        data: vec![0; shape.iter().product()],
                        shape,
                    },
                );
            }
            Ok(map)
        }
    }

    fn write_files(dir: &Path, files: &[(&str, &str)]) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = files
            .iter()
            .map(|(name, body)| {
                let path = dir.join(name);
                fs::write(&path, body).unwrap();
                path
            })
            .collect();
        paths.sort();
        paths
    }

    #[test]
    fn test_scan_groups_by_shape_and_skips_failures() {
        let dir = tempdir().unwrap();
        let checkpoint = tempdir().unwrap();
        let store = CheckpointStore::open(checkpoint.path()).unwrap();
        let candidates = write_files(
            dir.path(),
            &[
                ("a", "2x3,4"),
                ("b", "2x3,4"),
                ("c", "3x2,4"),
                ("d", "corrupt"),
                ("e", "2x3,4"),
            ],
        );

        let loader = ShapeTextLoader {
            loads: AtomicUsize::new(0),
        };
        let state = ScanState::new(FileRecordTable::new(), CoarseGroups::default());
        let outcome = run_scan(
            &candidates,
            &state,
            &loader,
            &store,
            &ScanOptions {
                workers: 3,
                flush_interval: 2,
                queue_capacity: 1,
            },
            &SilentReporter,
        )
        .unwrap();

        assert_eq!(outcome.candidates, 5);
        assert_eq!(outcome.queued, 4);
        assert_eq!(outcome.load_failures, 1);
        assert_eq!(outcome.processed, 4);

        let (records, groups) = state.into_tables().unwrap();
        assert_eq!(records.len(), 4);
        assert!(!records.contains_key(path_key(&candidates[3]).unwrap()));
        assert_eq!(groups.len(), 2);
        assert_eq!(groups.file_count(), 4);
        let big: Vec<_> = groups.multi_member().collect();
        assert_eq!(big.len(), 1);
        assert_eq!(big[0].1.len(), 3);

        // Four completions with an interval of two: at least one flush landed.
        let flushed: FileRecordTable = store.load(Table::Files).unwrap();
        assert!(!flushed.is_empty());
        let flushed_groups: CoarseGroups = store.load(Table::CoarseGroups).unwrap();
        for path in flushed.keys() {
            assert!(flushed_groups.iter().any(|(_, m)| m.contains(path)));
        }
    }

    #[test]
    fn test_recorded_paths_are_never_loaded() {
        let dir = tempdir().unwrap();
        let checkpoint = tempdir().unwrap();
        let store = CheckpointStore::open(checkpoint.path()).unwrap();
        let candidates = write_files(dir.path(), &[("a", "4"), ("b", "4"), ("c", "5")]);

        let mut records = FileRecordTable::new();
        let mut groups = CoarseGroups::default();
        for path in &candidates[..2] {
            records.insert(
                path_key(path).unwrap().to_string(),
                FileRecord {
                    load_time_secs: 0.0,
                    size_bytes: 1,
                    recorded_at: Utc::now(),
                },
            );
            groups.insert("previous", path_key(path).unwrap());
        }

        let loader = ShapeTextLoader {
            loads: AtomicUsize::new(0),
        };
        let state = ScanState::new(records, groups);
        let outcome = run_scan(
            &candidates,
            &state,
            &loader,
            &store,
            &ScanOptions::default(),
            &SilentReporter,
        )
        .unwrap();

        assert_eq!(outcome.already_recorded, 2);
        assert_eq!(outcome.processed, 1);
        assert_eq!(loader.loads.load(Ordering::SeqCst), 1);

        let (records, groups) = state.into_tables().unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(groups.get("previous").map(|m| m.len()), Some(2));
    }

    #[cfg(unix)]
    #[test]
    fn test_non_utf8_paths_are_skipped_not_merged() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let dir = tempdir().unwrap();
        let checkpoint = tempdir().unwrap();
        let store = CheckpointStore::open(checkpoint.path()).unwrap();
        let mut candidates = write_files(dir.path(), &[("plain", "4")]);
        // Both names would collapse to "bad\u{FFFD}" under a lossy conversion.
        for raw in [&b"bad\xff"[..], &b"bad\xfe"[..]] {
            let path = dir.path().join(OsStr::from_bytes(raw));
            if fs::write(&path, "4").is_err() {
                // Filesystem refuses non UTF-8 names.
                return;
            }
            candidates.push(path);
        }

        let loader = ShapeTextLoader {
            loads: AtomicUsize::new(0),
        };
        let state = ScanState::new(FileRecordTable::new(), CoarseGroups::default());
        let outcome = run_scan(
            &candidates,
            &state,
            &loader,
            &store,
            &ScanOptions::default(),
            &SilentReporter,
        )
        .unwrap();

        assert_eq!(outcome.unsupported_paths, 2);
        assert_eq!(outcome.already_recorded, 0);
        assert_eq!(outcome.processed, 1);
        assert_eq!(loader.loads.load(Ordering::SeqCst), 1);
        let (records, _) = state.into_tables().unwrap();
        assert_eq!(records.len(), 1);
    }
}
