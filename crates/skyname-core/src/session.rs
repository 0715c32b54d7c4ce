use std::sync::Mutex;

use tracing::{info, warn};

use crate::batch::{self, BatchError};
use crate::gateway::Classifier;
use crate::naming;
use crate::record::{FileRecord, FileStatus};
use crate::{ProgressCallback, RenameOptions};

pub const BATCH_FAULT: &str = "An API error occurred during batch processing.";
pub const CLASSIFICATION_FAILED: &str = "Classification failed.";

/// Counts for one finished rename cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleSummary {
    pub images: usize,
    pub renamed: usize,
    pub failed: usize,
}

/// The current file selection and the state of its rename cycle.
///
/// Records change only at two points of a cycle: all images go to `loading`
/// when it starts and all outcomes are applied together when it ends.
///
/// `rename` borrows the session mutably for the whole cycle, so
/// `is_renaming`, `progress_message` and `can_export` only ever report the
/// idle state to other code. A running cycle is observed through its
/// progress callback, which receives every message the session records.
#[derive(Debug, Default)]
pub struct Session {
    records: Vec<FileRecord>,
    is_renaming: bool,
    // Written from the batch callback, which must be `Sync`
    progress_message: Mutex<String>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole selection.
    pub fn load(&mut self, records: Vec<FileRecord>) {
        info!(files = records.len(), "Loaded selection");
        self.records = records;
    }

    pub fn records(&self) -> &[FileRecord] {
        &self.records
    }

    pub fn is_renaming(&self) -> bool {
        self.is_renaming
    }

    pub fn progress_message(&self) -> String {
        self.progress_message.lock().map(|m| m.clone()).unwrap_or_default()
    }

    pub fn image_count(&self) -> usize {
        self.records.iter().filter(|r| r.is_image()).count()
    }

    /// Whether the selection is ready to be archived.
    pub fn can_export(&self) -> bool {
        !self.records.is_empty() && !self.is_renaming && self.records.iter().all(|r| !r.new_name.is_empty())
    }

    fn set_progress(&self, message: &str) {
        if let Ok(mut m) = self.progress_message.lock() {
            *m = message.to_string();
        }
    }

    /// Record `message` and pass it on to the caller's callback.
    fn announce(&self, progress: &ProgressCallback, stage: &str, current: u64, total: u64, message: &str) {
        self.set_progress(message);
        progress(stage, current, total, message);
    }

    /// Run one full rename cycle over the current selection.
    ///
    /// Never leaves a record in `loading`: every failure ends up as an
    /// `error` status with a message on the affected records.
    pub async fn rename(
        &mut self,
        classifier: &dyn Classifier,
        options: &RenameOptions,
        progress: &ProgressCallback,
    ) -> CycleSummary {
        self.is_renaming = true;
        self.announce(progress, "start", 0, self.image_count() as u64, "Starting analysis...");

        let summary = self.run_cycle(classifier, options, progress).await;

        self.is_renaming = false;
        self.set_progress("");
        summary
    }

    async fn run_cycle(
        &mut self,
        classifier: &dyn Classifier,
        options: &RenameOptions,
        progress: &ProgressCallback,
    ) -> CycleSummary {
        for record in self.records.iter_mut().filter(|r| r.is_image()) {
            record.begin();
        }

        let outcome = {
            let progress_message = &self.progress_message;
            let on_batch = |p: &batch::BatchProgress| {
                let message = p.message();
                if let Ok(mut m) = progress_message.lock() {
                    *m = message.clone();
                }
                progress("classify", p.processed as u64, p.total as u64, &message);
            };
            batch::run(&self.records, classifier, options.batch_size, &on_batch).await
        };

        let results = match outcome {
            Ok(results) => results,
            Err(BatchError::NoImages) => {
                warn!("No images in selection");
                let message = BatchError::NoImages.to_string();
                for record in self.records.iter_mut() {
                    record.fail(message.clone());
                }
                return CycleSummary::default();
            }
            Err(BatchError::Gateway(e)) => {
                warn!(error = %e, "Rename cycle aborted");
                let mut summary = CycleSummary::default();
                for record in self.records.iter_mut().filter(|r| r.is_image()) {
                    record.fail(BATCH_FAULT);
                    summary.images += 1;
                    summary.failed += 1;
                }
                return summary;
            }
        };

        let total = results.len() as u64;
        self.announce(progress, "finalize", total, total, "Finalizing names...");
        let labels = naming::resolve(&results);

        let mut summary = CycleSummary::default();
        let images = self.records.iter_mut().filter(|r| r.is_image());
        for ((record, result), label) in images.zip(results).zip(labels) {
            summary.images += 1;
            if result.success {
                let name = naming::final_file_name(&label, record.stem(), &record.extension);
                record.complete(name, result.description);
                summary.renamed += 1;
            } else {
                record.fail(result.error.unwrap_or_else(|| CLASSIFICATION_FAILED.to_string()));
                summary.failed += 1;
            }
        }

        info!(
            images = summary.images,
            renamed = summary.renamed,
            failed = summary.failed,
            "Rename cycle finished"
        );
        summary
    }

    pub fn count_status(&self, status: FileStatus) -> usize {
        self.records.iter().filter(|r| r.status == status).count()
    }
}
