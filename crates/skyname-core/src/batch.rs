//! Sequential batch classification.
//!
//! Images go to the classifier in fixed-size batches, one call at a time.
//! The next batch is not started until the previous call resolves, which keeps
//! at most one batch of inlined payloads alive and progress monotonic.

use rayon::prelude::*;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::gateway::{ClassificationResult, Classifier, GatewayError, ImagePayload};
use crate::record::FileRecord;

pub const DEFAULT_BATCH_SIZE: usize = 20;
pub const UNEXPECTED_FORMAT: &str = "AI returned unexpected format.";

#[derive(Debug, Error)]
pub enum BatchError {
    #[error("No images found for AI processing.")]
    NoImages,

    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

/// Emitted before each classifier call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchProgress {
    /// 1-based
    pub batch: usize,
    pub batches: usize,
    /// Images submitted so far, including this batch
    pub processed: usize,
    pub total: usize,
}

impl BatchProgress {
    pub fn message(&self) -> String {
        format!(
            "Processing batch {} of {}... ({}/{} files)",
            self.batch, self.batches, self.processed, self.total
        )
    }
}

/// Classify the image records of `records`, in order, `batch_size` at a time.
///
/// Returns one result per image record, aligned with their relative order.
/// A batch whose result count does not match its size becomes a full batch
/// of failures. Any classifier fault aborts the run and drops earlier results.
pub async fn run(
    records: &[FileRecord],
    classifier: &dyn Classifier,
    batch_size: usize,
    on_batch: &(dyn Fn(&BatchProgress) + Send + Sync),
) -> Result<Vec<ClassificationResult>, BatchError> {
    let images: Vec<&FileRecord> = records.iter().filter(|r| r.is_image()).collect();
    if images.is_empty() {
        return Err(BatchError::NoImages);
    }

    let batch_size = batch_size.max(1);
    let total = images.len();
    let batches = total.div_ceil(batch_size);
    info!(images = total, batches, batch_size, "Classifying images");

    let mut results: Vec<ClassificationResult> = Vec::with_capacity(total);
    for (i, batch) in images.chunks(batch_size).enumerate() {
        on_batch(&BatchProgress {
            batch: i + 1,
            batches,
            processed: i * batch_size + batch.len(),
            total,
        });

        let payloads = load_payloads(batch)?;
        let batch_results = classifier.classify(&payloads).await?;

        if batch_results.len() == batch.len() {
            debug!(batch = i + 1, size = batch.len(), "Batch classified");
            results.extend(batch_results);
        } else {
            warn!(
                batch = i + 1,
                expected = batch.len(),
                received = batch_results.len(),
                "Classifier returned wrong number of results"
            );
            results.extend(ClassificationResult::failed_batch(batch.len(), UNEXPECTED_FORMAT));
        }
    }

    Ok(results)
}

/// Read one batch worth of image bytes, preserving order.
fn load_payloads(batch: &[&FileRecord]) -> Result<Vec<ImagePayload>, GatewayError> {
    batch
        .par_iter()
        .map(|r| {
            let data = r.source.read().map_err(|source| GatewayError::Io {
                name: r.original_name.clone(),
                source,
            })?;
            Ok(ImagePayload {
                file_name: r.original_name.clone(),
                mime_type: r.mime_type.clone(),
                data,
            })
        })
        .collect()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::record::SourceFile;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::path::PathBuf;
    use std::sync::{Arc, Mutex};

    /// Answers from a name table keyed by file name; records batch sizes.
    #[derive(Default)]
    pub(crate) struct FakeClassifier {
        pub answers: HashMap<String, ClassificationResult>,
        pub calls: Mutex<Vec<usize>>,
        /// Drop one result from the batch with this 1-based index
        pub short_batch: Option<usize>,
        /// Fault on the batch with this 1-based index
        pub fault_batch: Option<usize>,
    }

    impl FakeClassifier {
        pub fn with_answers(answers: &[(&str, &str)]) -> Self {
            Self {
                answers: answers
                    .iter()
                    .map(|(file, name)| {
                        (file.to_string(), ClassificationResult::identified(*name, format!("A photo of {}", name)))
                    })
                    .collect(),
                ..Default::default()
            }
        }

        pub fn calls(&self) -> Vec<usize> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Classifier for FakeClassifier {
        async fn classify(&self, images: &[ImagePayload]) -> Result<Vec<ClassificationResult>, GatewayError> {
            let call = {
                let mut calls = self.calls.lock().unwrap();
                calls.push(images.len());
                calls.len()
            };
            if self.fault_batch == Some(call) {
                return Err(GatewayError::Io {
                    name: "connection".into(),
                    source: std::io::Error::other("connection reset"),
                });
            }
            let mut out: Vec<ClassificationResult> = images
                .iter()
                .map(|img| {
                    self.answers
                        .get(&img.file_name)
                        .cloned()
                        .unwrap_or_else(|| ClassificationResult::identified("unknown", "Nothing recognisable."))
                })
                .collect();
            if self.short_batch == Some(call) {
                out.pop();
            }
            Ok(out)
        }
    }

    pub(crate) fn mem_record(index: usize, name: &str) -> FileRecord {
        FileRecord::new(index, name.to_string(), None, SourceFile::Memory(Arc::from(&b"img"[..])))
    }

    pub(crate) fn images(count: usize) -> Vec<FileRecord> {
        (0..count).map(|i| mem_record(i, &format!("img{}.jpg", i))).collect()
    }

    #[tokio::test]
    async fn test_batches_are_sequential_and_sized() {
        let records = images(45);
        let fake = FakeClassifier::default();
        let seen = Mutex::new(Vec::new());
        let results = run(&records, &fake, 20, &|p: &BatchProgress| seen.lock().unwrap().push(*p)).await.unwrap();

        assert_eq!(results.len(), 45);
        assert_eq!(fake.calls(), vec![20, 20, 5]);
        let seen = seen.into_inner().unwrap();
        let counts: Vec<(usize, usize, usize)> = seen.iter().map(|p| (p.batch, p.processed, p.total)).collect();
        assert_eq!(counts, vec![(1, 20, 45), (2, 40, 45), (3, 45, 45)]);
        assert!(seen.iter().all(|p| p.batches == 3));
        assert_eq!(seen[0].message(), "Processing batch 1 of 3... (20/45 files)");
    }

    #[tokio::test]
    async fn test_non_images_are_skipped() {
        let records = vec![
            mem_record(0, "a.jpg"),
            mem_record(1, "notes.txt"),
            mem_record(2, "b.png"),
        ];
        let fake = FakeClassifier::with_answers(&[("a.jpg", "Boeing 747"), ("b.png", "Cessna 172")]);
        let results = run(&records, &fake, 20, &|_: &BatchProgress| {}).await.unwrap();
        assert_eq!(fake.calls(), vec![2]);
        assert_eq!(results[0].name, "Boeing 747");
        assert_eq!(results[1].name, "Cessna 172");
    }

    #[tokio::test]
    async fn test_no_images_makes_no_call() {
        let records = vec![mem_record(0, "a.txt"), mem_record(1, "b.pdf")];
        let fake = FakeClassifier::default();
        let err = run(&records, &fake, 20, &|_: &BatchProgress| {}).await.unwrap_err();
        assert!(matches!(err, BatchError::NoImages));
        assert!(fake.calls().is_empty());
    }

    #[tokio::test]
    async fn test_short_batch_fails_whole_batch() {
        let records = images(25);
        let fake = FakeClassifier {
            short_batch: Some(1),
            ..Default::default()
        };
        let results = run(&records, &fake, 20, &|_: &BatchProgress| {}).await.unwrap();
        assert_eq!(results.len(), 25);
        assert!(results[..20]
            .iter()
            .all(|r| !r.success && r.error.as_deref() == Some(UNEXPECTED_FORMAT)));
        assert!(results[20..].iter().all(|r| r.success));
    }

    #[tokio::test]
    async fn test_fault_aborts_run() {
        let records = images(45);
        let fake = FakeClassifier {
            fault_batch: Some(2),
            ..Default::default()
        };
        let err = run(&records, &fake, 20, &|_: &BatchProgress| {}).await.unwrap_err();
        assert!(matches!(err, BatchError::Gateway(_)));
        assert_eq!(fake.calls(), vec![20, 20]);
    }

    #[tokio::test]
    async fn test_unreadable_payload_is_a_fault() {
        let records = vec![FileRecord::new(
            0,
            "gone.jpg".into(),
            None,
            SourceFile::Path(PathBuf::from("/definitely/not/here/gone.jpg")),
        )];
        let fake = FakeClassifier::default();
        let err = run(&records, &fake, 20, &|_: &BatchProgress| {}).await.unwrap_err();
        assert!(matches!(err, BatchError::Gateway(GatewayError::Io { .. })));
        assert!(fake.calls().is_empty());
    }

    #[tokio::test]
    async fn test_zero_batch_size_is_clamped() {
        let records = images(3);
        let fake = FakeClassifier::default();
        run(&records, &fake, 0, &|_: &BatchProgress| {}).await.unwrap();
        assert_eq!(fake.calls(), vec![1, 1, 1]);
    }
}
