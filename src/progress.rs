//! Sync progress reporting.
//!
//! Reports observable progress during `mem sync` so users see which files
//! are being indexed and how many are left. Progress is emitted on
//! **stderr** so stdout remains parseable for scripts.
//!
//! The reporter is passed explicitly to
//! [`MemoryIndex::sync_with_progress`](crate::index::MemoryIndex::sync_with_progress);
//! there is no global progress state.

use std::io::{IsTerminal, Write};

/// A single progress event for sync.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SyncProgressEvent {
    /// Walking the workspace for memory files. Total unknown.
    Discovering { workspace: String },
    /// About to index file `n` of `total` (1-based).
    Indexing { path: String, n: u64, total: u64 },
    /// A tracked file disappeared from disk and was removed.
    Removed { path: String },
}

/// Reports sync progress. Implementations write to stderr (human or JSON).
pub trait SyncProgressReporter: Send + Sync {
    /// Emit a progress event. Called from the sync pipeline.
    fn report(&self, event: SyncProgressEvent);
}

/// Human-friendly progress on stderr: "sync  indexing  3 / 12 files  memory/a.md".
pub struct StderrProgress;

impl SyncProgressReporter for StderrProgress {
    fn report(&self, event: SyncProgressEvent) {
        let line = match &event {
            SyncProgressEvent::Discovering { workspace } => {
                format!("sync {}  discovering...\n", workspace)
            }
            SyncProgressEvent::Indexing { path, n, total } => format!(
                "sync  indexing  {} / {} files  {}\n",
                format_number(*n),
                format_number(*total),
                path
            ),
            SyncProgressEvent::Removed { path } => format!("sync  removed  {}\n", path),
        };
        let mut stderr = std::io::stderr().lock();
        let _ = stderr.write_all(line.as_bytes());
        let _ = stderr.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl JsonProgress {
    fn to_json(event: &SyncProgressEvent) -> serde_json::Value {
        match event {
            SyncProgressEvent::Discovering { workspace } => serde_json::json!({
                "event": "progress",
                "phase": "discovering",
                "workspace": workspace
            }),
            SyncProgressEvent::Indexing { path, n, total } => serde_json::json!({
                "event": "progress",
                "phase": "indexing",
                "path": path,
                "n": n,
                "total": total
            }),
            SyncProgressEvent::Removed { path } => serde_json::json!({
                "event": "progress",
                "phase": "removed",
                "path": path
            }),
        }
    }
}

impl SyncProgressReporter for JsonProgress {
    fn report(&self, event: SyncProgressEvent) {
        if let Ok(line) = serde_json::to_string(&Self::to_json(&event)) {
            let mut stderr = std::io::stderr().lock();
            let _ = writeln!(stderr, "{}", line);
            let _ = stderr.flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl SyncProgressReporter for NoProgress {
    fn report(&self, _event: SyncProgressEvent) {}
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    for (i, c) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if std::io::stderr().is_terminal() {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn SyncProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
