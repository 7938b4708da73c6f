//! One indexing run: count, visit, write, report once.
//!
//! ```text
//! Idle → Counting → Visiting → Writing → Completed
//! Idle | Counting | Visiting → Cancelled
//! ```
//!
//! The run executes on its own thread. `start` returns a [`CompletionHandle`]
//! whose `wait` consumes it, so the terminal outcome is observed exactly once.
//! State changes and cancellation requests are serialized by one lock, which
//! makes "cancelled before writing began" and "writing began" mutually
//! exclusive.

#![allow(missing_docs)]

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel as channel;
use parking_lot::Mutex;
use serde::Serialize;

use crate::core::errors::{NebbyError, Result};
use crate::indexer::cancel::CancellationToken;
use crate::indexer::walker::{DirectoryWalker, WalkerConfig};
use crate::logger::jsonl::{EventType, JsonlWriter, LogEntry, Severity};
use crate::store::writer::{DatabaseWriter, WriteOptions, WriteSummary};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Counting,
    Visiting,
    Writing,
    Completed,
    Cancelled,
}

impl SessionState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Counting => "counting",
            Self::Visiting => "visiting",
            Self::Writing => "writing",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }

    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }
}

/// Terminal result of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SessionOutcome {
    Completed(WriteSummary),
    Failed { code: String, message: String },
    /// The walk found no subdirectories; no database was written.
    NothingToIndex,
    Cancelled,
}

impl SessionOutcome {
    fn from_error(err: &NebbyError) -> Self {
        Self::Failed {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

/// What to index and where.
#[derive(Debug, Clone)]
pub struct IndexRequest {
    pub root: PathBuf,
    pub database: PathBuf,
    pub options: WriteOptions,
}

type ProgressHook = Arc<dyn Fn(u8) + Send + Sync>;

struct Shared {
    state: Mutex<SessionState>,
    token: CancellationToken,
}

impl Shared {
    /// Move from `from` to `to` unless cancellation was requested first, in
    /// which case the session becomes `Cancelled`.
    fn advance(&self, from: SessionState, to: SessionState) -> bool {
        let mut state = self.state.lock();
        debug_assert_eq!(*state, from);
        if self.token.is_cancelled() {
            *state = SessionState::Cancelled;
            return false;
        }
        *state = to;
        true
    }

    fn finish(&self, to: SessionState) {
        *self.state.lock() = to;
    }
}

pub struct IndexingSession {
    request: IndexRequest,
    walker: WalkerConfig,
    shared: Arc<Shared>,
    progress_tx: channel::Sender<u8>,
    progress_rx: channel::Receiver<u8>,
    progress_hook: Option<ProgressHook>,
    activity: Option<Arc<Mutex<JsonlWriter>>>,
}

impl IndexingSession {
    pub fn new(request: IndexRequest, walker: WalkerConfig) -> Self {
        let (progress_tx, progress_rx) = channel::unbounded();
        Self {
            request,
            walker,
            shared: Arc::new(Shared {
                state: Mutex::new(SessionState::Idle),
                token: CancellationToken::new(),
            }),
            progress_tx,
            progress_rx,
            progress_hook: None,
            activity: None,
        }
    }

    /// Record session milestones in `log`.
    #[must_use]
    pub fn with_activity_log(mut self, log: Arc<Mutex<JsonlWriter>>) -> Self {
        self.activity = Some(log);
        self
    }

    /// Call `hook` with every progress change, on the walker thread that
    /// produced it. `hook` must not block.
    #[must_use]
    pub fn with_progress_hook(mut self, hook: impl Fn(u8) + Send + Sync + 'static) -> Self {
        self.progress_hook = Some(Arc::new(hook));
        self
    }

    pub fn request(&self) -> &IndexRequest {
        &self.request
    }

    pub fn state(&self) -> SessionState {
        *self.shared.state.lock()
    }

    /// The session's token, for wiring external cancellation sources such as
    /// signal handlers.
    pub fn token(&self) -> CancellationToken {
        self.shared.token.clone()
    }

    /// Progress percentages in `[0, 100]`, in the order they were produced.
    /// Consecutive duplicates are suppressed.
    pub fn progress(&self) -> channel::Receiver<u8> {
        self.progress_rx.clone()
    }

    /// Launch the run on a background thread and return immediately.
    pub fn start(&self) -> Result<CompletionHandle> {
        {
            let mut state = self.shared.state.lock();
            if *state != SessionState::Idle {
                return Err(NebbyError::InvalidState {
                    action: "start",
                    state: state.as_str(),
                });
            }
            *state = SessionState::Counting;
        }

        let (done_tx, done_rx) = channel::bounded(1);
        let run = Run {
            request: self.request.clone(),
            walker: DirectoryWalker::new(self.walker.clone()),
            shared: Arc::clone(&self.shared),
            progress_tx: self.progress_tx.clone(),
            progress_hook: self.progress_hook.clone(),
            activity: self.activity.clone(),
        };

        let spawned = thread::Builder::new()
            .name("nebby-session".to_string())
            .spawn(move || {
                let outcome = run.execute();
                let _ = done_tx.send(outcome);
            });

        match spawned {
            Ok(thread) => Ok(CompletionHandle {
                outcome: done_rx,
                thread: Some(thread),
                shared: Arc::clone(&self.shared),
            }),
            Err(e) => {
                self.shared.finish(SessionState::Idle);
                Err(NebbyError::Runtime {
                    details: format!("failed to spawn indexing thread: {e}"),
                })
            }
        }
    }

    /// Request cancellation.
    ///
    /// Before `start` the session goes straight to `Cancelled`. While counting
    /// or visiting, the run stops at its next check and skips writing. Once
    /// writing has begun the request is ignored and the write completes.
    pub fn cancel(&self) {
        let mut state = self.shared.state.lock();
        match *state {
            SessionState::Idle => {
                self.shared.token.request_cancel();
                *state = SessionState::Cancelled;
            }
            SessionState::Counting | SessionState::Visiting => self.shared.token.request_cancel(),
            SessionState::Writing | SessionState::Completed | SessionState::Cancelled => {}
        }
    }
}

/// Receives the single terminal outcome of a started session.
pub struct CompletionHandle {
    outcome: channel::Receiver<SessionOutcome>,
    thread: Option<JoinHandle<()>>,
    shared: Arc<Shared>,
}

impl CompletionHandle {
    /// Block until the run ends.
    pub fn wait(mut self) -> SessionOutcome {
        let outcome = self.outcome.recv().unwrap_or_else(|_| self.abandoned());
        self.join();
        outcome
    }

    /// Wait at most `timeout`; on timeout the handle is returned so the caller
    /// can keep waiting.
    pub fn wait_timeout(mut self, timeout: Duration) -> std::result::Result<SessionOutcome, Self> {
        match self.outcome.recv_timeout(timeout) {
            Ok(outcome) => {
                self.join();
                Ok(outcome)
            }
            Err(channel::RecvTimeoutError::Timeout) => Err(self),
            Err(channel::RecvTimeoutError::Disconnected) => {
                let outcome = self.abandoned();
                self.join();
                Ok(outcome)
            }
        }
    }

    fn abandoned(&self) -> SessionOutcome {
        eprintln!("[NEBBY-SESSION] indexing thread exited without reporting an outcome");
        self.shared.finish(SessionState::Completed);
        SessionOutcome::Failed {
            code: "NEBBY-3900".to_string(),
            message: "indexing thread exited without reporting an outcome".to_string(),
        }
    }

    fn join(&mut self) {
        if let Some(thread) = self.thread.take()
            && thread.join().is_err()
        {
            eprintln!("[NEBBY-SESSION] indexing thread panicked");
        }
    }
}

/// Everything the background thread owns.
struct Run {
    request: IndexRequest,
    walker: DirectoryWalker,
    shared: Arc<Shared>,
    progress_tx: channel::Sender<u8>,
    progress_hook: Option<ProgressHook>,
    activity: Option<Arc<Mutex<JsonlWriter>>>,
}

impl Run {
    fn execute(&self) -> SessionOutcome {
        let started = Instant::now();
        let root = &self.request.root;
        let token = &self.shared.token;
        self.log(LogEntry::new(EventType::IndexStarted, Severity::Info).with_root(root));

        let Some(total) = self.walker.count(root, token) else {
            return self.cancelled(started);
        };
        if !self.shared.advance(SessionState::Counting, SessionState::Visiting) {
            return self.cancelled(started);
        }

        let records = if total == 0 {
            Vec::new()
        } else {
            let last = AtomicU8::new(u8::MAX);
            let on_progress = |pct: u8| {
                if last.swap(pct, Ordering::AcqRel) != pct {
                    self.publish(pct);
                }
            };
            self.walker.visit(root, total, token, &on_progress)
        };

        if records.is_empty() {
            if token.is_cancelled() {
                return self.cancelled(started);
            }
            self.shared.finish(SessionState::Completed);
            self.log(
                LogEntry::new(EventType::NothingToIndex, Severity::Warning)
                    .with_root(root)
                    .with_duration_ms(elapsed_ms(started)),
            );
            return SessionOutcome::NothingToIndex;
        }

        if !self.shared.advance(SessionState::Visiting, SessionState::Writing) {
            return self.cancelled(started);
        }

        let writer = DatabaseWriter::new(&self.request.database, self.request.options.clone());
        let result = writer.write(&records);
        self.shared.finish(SessionState::Completed);

        match result {
            Ok(summary) => {
                self.publish(100);
                let mut entry = LogEntry::new(EventType::IndexCompleted, Severity::Info)
                    .with_root(root)
                    .with_database(&summary.database)
                    .with_duration_ms(elapsed_ms(started));
                entry.records = Some(records.len() as u64);
                entry.valid_rows = Some(summary.valid_rows);
                entry.invalid_rows = Some(summary.invalid_rows);
                entry.dropped_rows = Some(summary.dropped_rows);
                entry.ok = Some(true);
                self.log(entry);
                SessionOutcome::Completed(summary)
            }
            Err(err) => {
                let mut entry = LogEntry::new(EventType::IndexFailed, Severity::Error)
                    .with_root(root)
                    .with_database(&self.request.database)
                    .with_duration_ms(elapsed_ms(started));
                entry.records = Some(records.len() as u64);
                entry.ok = Some(false);
                entry.error_code = Some(err.code().to_string());
                entry.error_message = Some(err.to_string());
                self.log(entry);
                SessionOutcome::from_error(&err)
            }
        }
    }

    fn cancelled(&self, started: Instant) -> SessionOutcome {
        self.shared.finish(SessionState::Cancelled);
        self.publish(0);
        self.log(
            LogEntry::new(EventType::IndexCancelled, Severity::Warning)
                .with_root(&self.request.root)
                .with_duration_ms(elapsed_ms(started)),
        );
        SessionOutcome::Cancelled
    }

    fn publish(&self, pct: u8) {
        let _ = self.progress_tx.send(pct);
        if let Some(hook) = &self.progress_hook {
            hook(pct);
        }
    }

    fn log(&self, entry: LogEntry) {
        if let Some(activity) = &self.activity {
            activity.lock().write_entry(&entry);
        }
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
