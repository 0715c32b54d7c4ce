pub mod archive;
pub mod batch;
pub mod gateway;
pub mod gemini;
pub mod naming;
pub mod record;
pub mod report;
pub mod selection;
pub mod session;

use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

pub use archive::{archive_file_name, write_archive, DESCRIPTIONS_FILENAME};
pub use batch::{BatchError, BatchProgress, DEFAULT_BATCH_SIZE};
pub use gateway::{ClassificationResult, Classifier, GatewayError, ImagePayload};
pub use gemini::{GeminiClient, GeminiConfig};
pub use record::{FileRecord, FileStatus, SourceFile};
pub use report::write_report;
pub use selection::{select_files, SelectionError, MAX_FILES};
pub use session::{CycleSummary, Session};

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

fn default_max_files() -> usize {
    MAX_FILES
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenameOptions {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_files")]
    pub max_files: usize,
}

impl Default for RenameOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            max_files: MAX_FILES,
        }
    }
}

/// Progress callback: stage, current, total, message
pub type ProgressCallback = dyn Fn(&str, u64, u64, &str) + Send + Sync;

/// Shortest gap between two forwarded progress updates.
pub const PROGRESS_INTERVAL: Duration = Duration::from_millis(200);

/// Rate-limits a [`ProgressCallback`]. The first update and the final one
/// (`current >= total`) are always forwarded.
pub struct ThrottledProgress<'a> {
    inner: &'a ProgressCallback,
    interval: Duration,
    last_emit: Mutex<Option<Instant>>,
}

impl<'a> ThrottledProgress<'a> {
    pub fn new(inner: &'a ProgressCallback) -> Self {
        Self::with_interval(inner, PROGRESS_INTERVAL)
    }

    pub fn with_interval(inner: &'a ProgressCallback, interval: Duration) -> Self {
        Self {
            inner,
            interval,
            last_emit: Mutex::new(None),
        }
    }

    pub fn report(&self, stage: &str, current: u64, total: u64, message: &str) {
        if current < total {
            let mut last = self.last_emit.lock().unwrap_or_else(|e| e.into_inner());
            if last.is_some_and(|at| at.elapsed() < self.interval) {
                return;
            }
            *last = Some(Instant::now());
        }
        (self.inner)(stage, current, total, message);
    }
}
