//! Concurrent inode/space exhaustion worker pool
//!
//! Inject fans out W blocking workers per round. Each worker claims a unique
//! directory index, creates the directory and fills it with empty files until
//! the per-directory cap or ENOSPC. The round closes once all W outcomes have
//! arrived on a bounded channel; the free-inode count of the mount then
//! decides whether another round starts.
//!
//! Teardown mirrors it: created directories are deleted in batches of W and
//! the test root is removed last.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use nix::sys::statvfs::statvfs;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::error::{FaultError, FaultResult};
use crate::traits::ExhaustionTarget;

/// Directory created under the mount point to hold all test data
pub const TEST_ROOT_NAME: &str = "arsenal_test_dir";
const DIR_PREFIX: &str = "arsenal_dir_";
const FILE_PREFIX: &str = "test_";

pub fn test_root(mount: &Path) -> PathBuf {
    mount.join(TEST_ROOT_NAME)
}

/// Out of space, as opposed to any other creation failure
pub fn is_no_space(err: &io::Error) -> bool {
    err.raw_os_error() == Some(libc::ENOSPC)
}

/// Shared record of directories claimed and created by the workers
#[derive(Debug, Default)]
pub struct DirectoryLedger {
    next_index: AtomicUsize,
    created: Mutex<Vec<PathBuf>>,
}

impl DirectoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Unique, monotonically increasing directory index
    pub fn claim_index(&self) -> usize {
        self.next_index.fetch_add(1, Ordering::SeqCst)
    }

    pub fn record(&self, path: PathBuf) {
        self.created.lock().push(path);
    }

    pub fn created(&self) -> Vec<PathBuf> {
        self.created.lock().clone()
    }

    pub fn created_count(&self) -> usize {
        self.created.lock().len()
    }
}

/// What one worker reports at the end of its directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerOutcome {
    /// A create call hit ENOSPC
    Exhausted,
    /// Reached the per-directory cap
    Completed { files: usize },
    Failed { error: String },
}

/// Aggregated outcomes of one round
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoundReport {
    pub round: usize,
    pub exhausted: usize,
    pub completed: usize,
    pub files: usize,
    pub failures: Vec<String>,
}

impl RoundReport {
    fn absorb(&mut self, outcome: WorkerOutcome) {
        match outcome {
            WorkerOutcome::Exhausted => self.exhausted += 1,
            WorkerOutcome::Completed { files } => {
                self.completed += 1;
                self.files += files;
            }
            WorkerOutcome::Failed { error } => self.failures.push(error),
        }
    }
}

/// Result of a full inject run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExhaustionSummary {
    pub rounds: usize,
    pub directories: usize,
    pub cancelled: bool,
    pub reports: Vec<RoundReport>,
}

/// One exhaustion run against a mount point
pub struct ExhaustionJob {
    mount: PathBuf,
    root: PathBuf,
    workers: usize,
    files_per_dir: usize,
    ledger: Arc<DirectoryLedger>,
    cancel: Option<Arc<AtomicBool>>,
}

impl ExhaustionJob {
    pub fn new(mount: impl Into<PathBuf>, workers: usize, files_per_dir: usize) -> Self {
        let mount = mount.into();
        Self {
            root: test_root(&mount),
            mount,
            workers: workers.max(1),
            files_per_dir,
            ledger: Arc::new(DirectoryLedger::new()),
            cancel: None,
        }
    }

    /// Stop between rounds once the flag is raised (fluent API)
    pub fn with_cancellation(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    pub fn mount(&self) -> &Path {
        &self.mount
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn ledger(&self) -> &Arc<DirectoryLedger> {
        &self.ledger
    }

    fn cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .map_or(false, |flag| flag.load(Ordering::SeqCst))
    }

    /// Run rounds until the target reports zero free inodes or a round
    /// creates no directory
    pub async fn run(&self, target: Arc<dyn ExhaustionTarget>) -> FaultResult<ExhaustionSummary> {
        let mut summary = ExhaustionSummary::default();

        loop {
            if self.cancelled() {
                info!("Exhaustion cancelled after {} round(s)", summary.rounds);
                summary.cancelled = true;
                break;
            }

            let round = summary.rounds + 1;
            let created_before = self.ledger.created_count();
            let report = self.run_round(round, target.clone()).await?;
            summary.rounds = round;

            debug!(
                "Round {}: {} exhausted, {} completed, {} failed, {} files",
                round,
                report.exhausted,
                report.completed,
                report.failures.len(),
                report.files
            );
            for failure in &report.failures {
                warn!("Round {} worker failed: {}", round, failure);
            }

            let free = target
                .free_inodes()
                .map_err(|e| FaultError::io("read free inodes", &self.mount, e))?;
            let all_failed = report.failures.len() == self.workers;
            let progressed = self.ledger.created_count() > created_before;
            let first_failure = report.failures.first().cloned();
            summary.reports.push(report);

            if free == 0 {
                info!("Mount {} has no free inodes after {} round(s)", self.mount.display(), round);
                break;
            }
            if all_failed || (!progressed && first_failure.is_some()) {
                return Err(FaultError::Exhaustion {
                    round,
                    reason: first_failure.unwrap_or_default(),
                });
            }
            if !progressed {
                // Blocks ran out while inodes remain
                info!(
                    "Mount {} out of space with {} inode(s) free after {} round(s)",
                    self.mount.display(),
                    free,
                    round
                );
                break;
            }
        }

        summary.directories = self.ledger.created_count();
        Ok(summary)
    }

    async fn run_round(&self, round: usize, target: Arc<dyn ExhaustionTarget>) -> FaultResult<RoundReport> {
        let (tx, mut rx) = mpsc::channel::<WorkerOutcome>(self.workers);
        let mut handles = Vec::with_capacity(self.workers);

        for _ in 0..self.workers {
            let tx = tx.clone();
            let target = target.clone();
            let ledger = self.ledger.clone();
            let root = self.root.clone();
            let files_per_dir = self.files_per_dir;

            handles.push(tokio::task::spawn_blocking(move || {
                let outcome = fill_directory(target.as_ref(), &ledger, &root, files_per_dir);
                // Receiver only goes away if the round was abandoned
                let _ = tx.blocking_send(outcome);
            }));
        }
        drop(tx);

        let mut report = RoundReport {
            round,
            ..RoundReport::default()
        };
        for _ in 0..self.workers {
            match rx.recv().await {
                Some(outcome) => report.absorb(outcome),
                None => break,
            }
        }
        for handle in handles {
            handle.await?;
        }

        Ok(report)
    }
}

/// Body of one exhaustion worker
pub fn fill_directory(
    target: &dyn ExhaustionTarget,
    ledger: &DirectoryLedger,
    root: &Path,
    files_per_dir: usize,
) -> WorkerOutcome {
    let index = ledger.claim_index();
    let dir = root.join(format!("{DIR_PREFIX}{index}"));

    match target.create_dir(&dir) {
        Ok(()) => ledger.record(dir.clone()),
        Err(e) if is_no_space(&e) => return WorkerOutcome::Exhausted,
        Err(e) => {
            return WorkerOutcome::Failed {
                error: format!("create {}: {}", dir.display(), e),
            }
        }
    }

    for j in 0..files_per_dir {
        let file = dir.join(format!("{FILE_PREFIX}{j}"));
        match target.create_file(&file) {
            Ok(()) => {}
            Err(e) if is_no_space(&e) => return WorkerOutcome::Exhausted,
            Err(e) => {
                return WorkerOutcome::Failed {
                    error: format!("create {}: {}", file.display(), e),
                }
            }
        }
    }

    WorkerOutcome::Completed { files: files_per_dir }
}

/// Batch sizes for deleting `total` directories with `workers` at a time:
/// `total / workers` full batches, then the remainder if non-zero.
pub fn plan_batches(total: usize, workers: usize) -> Vec<usize> {
    let workers = workers.max(1);
    let mut batches = vec![workers; total / workers];
    if total % workers != 0 {
        batches.push(total % workers);
    }
    batches
}

/// Result of deleting the test directories
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TeardownReport {
    pub batches: Vec<usize>,
    pub removed: usize,
    pub failures: Vec<(PathBuf, String)>,
}

/// Test directories currently present under `root`, in index order
pub fn list_test_dirs(root: &Path) -> FaultResult<Vec<PathBuf>> {
    let entries = std::fs::read_dir(root).map_err(|e| FaultError::io("list test directories", root, e))?;

    let mut dirs: Vec<(usize, PathBuf)> = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| FaultError::io("list test directories", root, e))?;
        let name = entry.file_name();
        let Some(index) = name
            .to_str()
            .and_then(|n| n.strip_prefix(DIR_PREFIX))
            .and_then(|n| n.parse::<usize>().ok())
        else {
            continue;
        };
        if entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
            dirs.push((index, entry.path()));
        }
    }

    dirs.sort_by_key(|(index, _)| *index);
    Ok(dirs.into_iter().map(|(_, path)| path).collect())
}

/// Delete every test directory under `root` in batches of `workers`
pub async fn teardown(root: &Path, workers: usize) -> FaultResult<TeardownReport> {
    let dirs = list_test_dirs(root)?;
    let workers = workers.max(1);
    let batches = plan_batches(dirs.len(), workers);
    info!(
        "Removing {} test directories under {} in {} batch(es)",
        dirs.len(),
        root.display(),
        batches.len()
    );

    let mut report = TeardownReport::default();
    let mut remaining = dirs.into_iter();
    for &size in &batches {
        let (tx, mut rx) = mpsc::channel::<(PathBuf, io::Result<()>)>(workers);
        let mut handles = Vec::with_capacity(size);

        for dir in remaining.by_ref().take(size) {
            let tx = tx.clone();
            handles.push(tokio::task::spawn_blocking(move || {
                let result = empty_and_remove(&dir);
                let _ = tx.blocking_send((dir, result));
            }));
        }
        drop(tx);

        for _ in 0..size {
            match rx.recv().await {
                Some((_, Ok(()))) => report.removed += 1,
                Some((dir, Err(e))) => {
                    warn!("Failed to remove {}: {}", dir.display(), e);
                    report.failures.push((dir, e.to_string()));
                }
                None => break,
            }
        }
        for handle in handles {
            handle.await?;
        }
    }

    report.batches = batches;
    Ok(report)
}

/// Remove all files in `dir`, then `dir` itself
fn empty_and_remove(dir: &Path) -> io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            std::fs::remove_dir_all(&path)?;
        } else {
            std::fs::remove_file(&path)?;
        }
    }
    std::fs::remove_dir(dir)
}

/// Remove the test root, terminating the process if that fails.
///
/// A half-cleaned, nearly full filesystem must not be left behind silently.
pub fn remove_test_root_or_exit(root: &Path) {
    if let Err(e) = std::fs::remove_dir_all(root) {
        error!(
            "Failed to remove exhaustion test root {}: {}. Remove it manually.",
            root.display(),
            e
        );
        std::process::exit(1);
    }
    info!("Removed exhaustion test root {}", root.display());
}

/// Real filesystem under a mount point
#[derive(Debug, Clone)]
pub struct HostFilesystem {
    mount: PathBuf,
}

impl HostFilesystem {
    pub fn new(mount: impl Into<PathBuf>) -> Self {
        Self { mount: mount.into() }
    }
}

impl ExhaustionTarget for HostFilesystem {
    fn create_dir(&self, path: &Path) -> io::Result<()> {
        std::fs::create_dir(path)
    }

    fn create_file(&self, path: &Path) -> io::Result<()> {
        std::fs::File::create(path).map(|_| ())
    }

    fn free_inodes(&self) -> io::Result<u64> {
        let stats = statvfs(&self.mount).map_err(io::Error::from)?;
        Ok(stats.files_available() as u64)
    }
}
