//! Two-phase parallel directory walker.
//!
//! Phase 1 counts every directory below the root on the calling thread so
//! progress has a denominator. Phase 2 visits the tree again on a fixed pool of
//! worker threads fed by a shared work queue, recording each subdirectory and
//! reporting `processed / total` as it goes.
//!
//! The two phases walk the filesystem independently. Directories created or
//! removed in between make `processed` undershoot or overshoot `total`; the
//! percentage is clamped to 100 but is not guaranteed to reach it.

#![allow(missing_docs)]
#![allow(clippy::cast_possible_truncation)]

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use crossbeam_channel as channel;
use parking_lot::Mutex;

use crate::core::paths::absolute_path;
use crate::indexer::cancel::CancellationToken;

/// How long an idle worker waits for work before re-checking for termination.
const IDLE_POLL: Duration = Duration::from_millis(50);

/// Walker configuration derived from the `[walker]` config section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalkerConfig {
    /// Worker threads used by the visit phase.
    pub parallelism: usize,
    /// Descend into symlinked directories. Each link target is entered at most
    /// once per phase so link cycles terminate.
    pub follow_symlinks: bool,
}

impl Default for WalkerConfig {
    fn default() -> Self {
        Self {
            parallelism: default_parallelism(),
            follow_symlinks: false,
        }
    }
}

/// Host parallelism, or 1 when it cannot be determined.
#[must_use]
pub fn default_parallelism() -> usize {
    thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get)
}

/// One visited subdirectory.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DirectoryRecord {
    /// Final path component, lossily converted to UTF-8.
    pub name: String,
    /// Absolute path of the directory.
    pub full_path: PathBuf,
}

impl DirectoryRecord {
    /// `full_path` as stored in the database.
    #[must_use]
    pub fn path_string(&self) -> String {
        self.full_path.to_string_lossy().into_owned()
    }
}

/// Result of a full two-phase walk.
#[derive(Debug, Default)]
pub struct WalkReport {
    /// Directories counted in phase 1.
    pub total: u64,
    /// Records emitted in phase 2, in no particular order.
    pub records: Vec<DirectoryRecord>,
    /// The token was set before the walk finished.
    pub cancelled: bool,
}

/// Parallel directory walker.
///
/// Guarantees, for a tree that does not change during the walk:
/// - every directory below the root is recorded exactly once
/// - the root itself is not recorded
/// - unreadable directories are treated as having no children
pub struct DirectoryWalker {
    config: WalkerConfig,
}

impl DirectoryWalker {
    pub fn new(config: WalkerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &WalkerConfig {
        &self.config
    }

    /// Count then visit. A zero count ends the walk with an empty report.
    pub fn walk(
        &self,
        root: &Path,
        token: &CancellationToken,
        on_progress: &(dyn Fn(u8) + Sync),
    ) -> WalkReport {
        let Some(total) = self.count(root, token) else {
            return WalkReport {
                cancelled: true,
                ..WalkReport::default()
            };
        };
        if total == 0 {
            return WalkReport::default();
        }
        let records = self.visit(root, total, token, on_progress);
        WalkReport {
            total,
            records,
            cancelled: token.is_cancelled(),
        }
    }

    /// Phase 1: count every directory below `root`, sequentially.
    ///
    /// Returns `None` when cancelled; the partial count is discarded.
    pub fn count(&self, root: &Path, token: &CancellationToken) -> Option<u64> {
        let guard = LinkGuard::default();
        let mut stack = vec![root.to_path_buf()];
        let mut total = 0u64;

        while let Some(dir) = stack.pop() {
            if token.is_cancelled() {
                return None;
            }
            let Ok(entries) = fs::read_dir(&dir) else {
                continue;
            };
            for entry in entries.flatten() {
                if self.descends_into(&entry, &guard) {
                    total += 1;
                    stack.push(entry.path());
                }
            }
        }

        if token.is_cancelled() {
            return None;
        }
        Some(total)
    }

    /// Phase 2: visit the tree on the worker pool and collect records.
    ///
    /// Returns after every worker has exited, so the returned records are
    /// final. When cancelled, the records are whatever was collected before
    /// workers noticed the token.
    pub fn visit(
        &self,
        root: &Path,
        total: u64,
        token: &CancellationToken,
        on_progress: &(dyn Fn(u8) + Sync),
    ) -> Vec<DirectoryRecord> {
        let parallelism = self.config.parallelism.max(1);
        let root = absolute_path(root);

        // Unbounded: workers both produce and consume the queue, so a bounded
        // queue with blocking sends can deadlock once every worker is waiting
        // to enqueue children.
        let (work_tx, work_rx) = channel::unbounded::<PathBuf>();

        let ctx = VisitContext {
            walker: self,
            total,
            token,
            on_progress,
            records: Mutex::new(Vec::with_capacity(usize::try_from(total).unwrap_or(0))),
            processed: AtomicU64::new(0),
            in_flight: AtomicUsize::new(1),
            guard: LinkGuard::default(),
        };
        if work_tx.send(root).is_err() {
            return Vec::new();
        }

        thread::scope(|scope| {
            let mut spawned = 0usize;
            for idx in 0..parallelism {
                let work_rx = work_rx.clone();
                let work_tx = work_tx.clone();
                let ctx = &ctx;
                let spawn = thread::Builder::new()
                    .name(format!("nebby-walk-{idx}"))
                    .spawn_scoped(scope, move || visit_worker(&work_rx, &work_tx, ctx));
                match spawn {
                    Ok(_) => spawned += 1,
                    Err(e) => eprintln!("[NEBBY-WALKER] failed to spawn worker {idx}: {e}"),
                }
            }
            if spawned == 0 {
                visit_worker(&work_rx, &work_tx, &ctx);
            }
        });

        ctx.records.into_inner()
    }

    /// Whether a listing entry is a directory the walk should enter.
    fn descends_into(&self, entry: &fs::DirEntry, guard: &LinkGuard) -> bool {
        let Ok(ft) = entry.file_type() else {
            return false;
        };
        if ft.is_dir() {
            return true;
        }
        if !(self.config.follow_symlinks && ft.is_symlink()) {
            return false;
        }
        let path = entry.path();
        match fs::metadata(&path) {
            Ok(meta) if meta.is_dir() => fs::canonicalize(&path)
                .map(|target| guard.first_visit(target))
                .unwrap_or(false),
            _ => false,
        }
    }
}

/// Symlink targets already entered during one phase.
#[derive(Default)]
struct LinkGuard {
    seen: Mutex<HashSet<PathBuf>>,
}

impl LinkGuard {
    fn first_visit(&self, target: PathBuf) -> bool {
        self.seen.lock().insert(target)
    }
}

/// State shared by every worker of one visit phase.
struct VisitContext<'a> {
    walker: &'a DirectoryWalker,
    total: u64,
    token: &'a CancellationToken,
    on_progress: &'a (dyn Fn(u8) + Sync),
    records: Mutex<Vec<DirectoryRecord>>,
    processed: AtomicU64,
    /// Directories queued or being listed. Zero means the walk is done.
    in_flight: AtomicUsize,
    guard: LinkGuard,
}

/// Worker loop: pull directories until the queue drains or the walk is
/// cancelled.
fn visit_worker(
    work_rx: &channel::Receiver<PathBuf>,
    work_tx: &channel::Sender<PathBuf>,
    ctx: &VisitContext<'_>,
) {
    loop {
        match work_rx.recv_timeout(IDLE_POLL) {
            Ok(dir) => {
                visit_directory(&dir, work_tx, ctx);
                ctx.in_flight.fetch_sub(1, Ordering::AcqRel);
            }
            Err(channel::RecvTimeoutError::Timeout) => {
                if ctx.in_flight.load(Ordering::Acquire) == 0 || ctx.token.is_cancelled() {
                    return;
                }
            }
            Err(channel::RecvTimeoutError::Disconnected) => return,
        }
    }
}

/// List one directory: record each child directory, report progress, and queue
/// the child for its own visit.
fn visit_directory(dir: &Path, work_tx: &channel::Sender<PathBuf>, ctx: &VisitContext<'_>) {
    if ctx.token.is_cancelled() {
        return;
    }

    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };

    for entry in entries.flatten() {
        if ctx.token.is_cancelled() {
            return;
        }
        if !ctx.walker.descends_into(&entry, &ctx.guard) {
            continue;
        }

        let full_path = entry.path();
        let name = entry.file_name().to_string_lossy().into_owned();
        ctx.records.lock().push(DirectoryRecord {
            name,
            full_path: full_path.clone(),
        });

        let processed = ctx.processed.fetch_add(1, Ordering::AcqRel) + 1;
        (ctx.on_progress)(progress_percent(processed, ctx.total));

        ctx.in_flight.fetch_add(1, Ordering::AcqRel);
        if work_tx.send(full_path).is_err() {
            ctx.in_flight.fetch_sub(1, Ordering::AcqRel);
        }
    }
}

/// `floor(processed / total * 100)`, clamped to `[0, 100]`.
#[must_use]
pub fn progress_percent(processed: u64, total: u64) -> u8 {
    if total == 0 {
        return 100;
    }
    (processed.saturating_mul(100) / total).min(100) as u8
}
