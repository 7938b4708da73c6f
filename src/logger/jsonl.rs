//! Activity log: one JSON object per line, appended to a file.
//!
//! Lines are serialized in full before being written with a single
//! `write_all`, so a reader tailing the file never sees half a record.
//!
//! When the log file cannot be opened or written, the writer steps down:
//! primary file, then the fallback file, then stderr (prefixed with
//! `[NEBBY-JSONL]`), then nothing. Logging never fails an indexing run.

#![allow(missing_docs)]

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::errors::{NebbyError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// Session milestones recorded in the activity log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    IndexStarted,
    IndexCompleted,
    IndexFailed,
    IndexCancelled,
    NothingToIndex,
}

/// One activity log line. Only `ts`, `event` and `severity` are always present.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    /// RFC 3339 UTC timestamp with millisecond precision.
    pub ts: String,
    pub event: EventType,
    pub severity: Severity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    /// Directories recorded by the walk.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub records: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub valid_rows: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invalid_rows: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dropped_rows: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ok: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl LogEntry {
    pub fn new(event: EventType, severity: Severity) -> Self {
        Self {
            ts: format_utc_now(),
            event,
            severity,
            root: None,
            database: None,
            records: None,
            valid_rows: None,
            invalid_rows: None,
            dropped_rows: None,
            duration_ms: None,
            ok: None,
            error_code: None,
            error_message: None,
            details: None,
        }
    }

    #[must_use]
    pub fn with_root(mut self, root: &Path) -> Self {
        self.root = Some(root.to_string_lossy().into_owned());
        self
    }

    #[must_use]
    pub fn with_database(mut self, database: &Path) -> Self {
        self.database = Some(database.to_string_lossy().into_owned());
        self
    }

    #[must_use]
    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }
}

#[derive(Debug, Clone)]
pub struct JsonlConfig {
    pub path: PathBuf,
    /// Tried when `path` cannot be opened or written.
    pub fallback_path: Option<PathBuf>,
    /// Rotate once the current file would exceed this size. Default: 10 MiB.
    pub max_size_bytes: u64,
    /// Rotated generations kept (`activity.jsonl.1` ..). Default: 3.
    pub max_rotated_files: u32,
}

impl JsonlConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            fallback_path: None,
            max_size_bytes: 10 * 1024 * 1024,
            max_rotated_files: 3,
        }
    }
}

/// Where lines currently go.
enum Sink {
    File {
        writer: BufWriter<File>,
        path: PathBuf,
        fallback: bool,
        size: u64,
    },
    Stderr,
    Discard,
}

pub struct JsonlWriter {
    config: JsonlConfig,
    sink: Sink,
}

impl JsonlWriter {
    /// Open the primary file, stepping down the chain when that fails.
    pub fn open(config: JsonlConfig) -> Self {
        let mut writer = Self {
            config,
            sink: Sink::Discard,
        };
        writer.sink = writer.open_primary().unwrap_or_else(|| writer.open_fallback());
        writer
    }

    /// Append one entry and flush it.
    pub fn write_entry(&mut self, entry: &LogEntry) {
        match serde_json::to_string(entry) {
            Ok(json) => self.write_line(&format!("{json}\n")),
            Err(e) => eprintln!("[NEBBY-JSONL] serialize error: {e}"),
        }
    }

    /// `normal`, `fallback`, `stderr` or `discard`.
    pub fn state(&self) -> &'static str {
        match &self.sink {
            Sink::File {
                fallback: false, ..
            } => "normal",
            Sink::File { fallback: true, .. } => "fallback",
            Sink::Stderr => "stderr",
            Sink::Discard => "discard",
        }
    }

    // ──────────────────────── internals ────────────────────────

    fn write_line(&mut self, line: &str) {
        let len = line.len() as u64;
        if let Sink::File { size, .. } = &self.sink
            && *size > 0
            && *size + len > self.config.max_size_bytes
        {
            self.rotate();
        }

        match &mut self.sink {
            Sink::File { writer, size, .. } => {
                let written = writer
                    .write_all(line.as_bytes())
                    .and_then(|()| writer.flush());
                if written.is_ok() {
                    *size += len;
                } else {
                    self.step_down();
                    self.write_line(line);
                }
            }
            Sink::Stderr => {
                if write!(io::stderr(), "[NEBBY-JSONL] {line}").is_err() {
                    self.sink = Sink::Discard;
                }
            }
            Sink::Discard => {}
        }
    }

    fn open_primary(&self) -> Option<Sink> {
        open_append(&self.config.path)
            .ok()
            .map(|(file, size)| Sink::File {
                writer: BufWriter::new(file),
                path: self.config.path.clone(),
                fallback: false,
                size,
            })
    }

    fn open_fallback(&self) -> Sink {
        let Some(fallback) = &self.config.fallback_path else {
            eprintln!(
                "[NEBBY-JSONL] cannot open {}, logging to stderr",
                self.config.path.display()
            );
            return Sink::Stderr;
        };
        match open_append(fallback) {
            Ok((file, size)) => {
                eprintln!(
                    "[NEBBY-JSONL] cannot open {}, using fallback {}",
                    self.config.path.display(),
                    fallback.display()
                );
                Sink::File {
                    writer: BufWriter::new(file),
                    path: fallback.clone(),
                    fallback: true,
                    size,
                }
            }
            Err(_) => {
                eprintln!("[NEBBY-JSONL] primary and fallback logs unavailable, logging to stderr");
                Sink::Stderr
            }
        }
    }

    fn step_down(&mut self) {
        let next = match &self.sink {
            Sink::File {
                fallback: false, ..
            } => self.open_fallback(),
            Sink::File { fallback: true, .. } => {
                eprintln!("[NEBBY-JSONL] fallback log failed, logging to stderr");
                Sink::Stderr
            }
            Sink::Stderr | Sink::Discard => Sink::Discard,
        };
        self.sink = next;
    }

    /// Shift `log.N` to `log.N+1`, drop the oldest, move the live file to
    /// `log.1` and reopen.
    fn rotate(&mut self) {
        let Sink::File { path, fallback, .. } = &self.sink else {
            return;
        };
        let (base, fallback) = (path.clone(), *fallback);
        // Closes the current handle before renaming it.
        self.sink = Sink::Discard;

        let keep = self.config.max_rotated_files;
        let _ = fs::remove_file(rotated_name(&base, keep));
        for generation in (1..keep).rev() {
            let _ = fs::rename(rotated_name(&base, generation), rotated_name(&base, generation + 1));
        }
        if keep > 0 {
            let _ = fs::rename(&base, rotated_name(&base, 1));
        } else {
            let _ = fs::remove_file(&base);
        }

        self.sink = match open_append(&base) {
            Ok((file, size)) => Sink::File {
                writer: BufWriter::new(file),
                path: base,
                fallback,
                size,
            },
            Err(_) if fallback => Sink::Stderr,
            Err(_) => self.open_fallback(),
        };
    }
}

// ──────────────────────── helpers ────────────────────────

/// Open or create `path` for appending, creating parent directories. Returns
/// the file and its current size.
fn open_append(path: &Path) -> Result<(File, u64)> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|source| NebbyError::io(parent, source))?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| NebbyError::io(path, source))?;
    let size = file.metadata().map_or(0, |m| m.len());
    Ok((file, size))
}

/// `activity.jsonl` → `activity.jsonl.2`.
fn rotated_name(base: &Path, generation: u32) -> PathBuf {
    let mut name = base.as_os_str().to_owned();
    name.push(format!(".{generation}"));
    PathBuf::from(name)
}

fn format_utc_now() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}
