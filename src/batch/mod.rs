//! Processing a batch of uploaded files.
//!
//! A batch is processed strictly in order, one file at a time. Every file
//! produces exactly one [`DocumentRecord`], even if we couldn't extract any
//! text from it. Only a hard failure aborts the batch, and then no records are
//! returned at all. Either way, the batch's staged files are deleted.

use std::sync::Arc;

use indicatif::ProgressBar;
use schemars::JsonSchema;
use thiserror::Error;

use crate::{
    async_utils::spawn_blocking_propagating_panics,
    classify::{DocumentType, classify},
    extract::{ExtractionError, FormatRouter},
    prelude::*,
};

pub mod staging;

use self::staging::{StagedBatch, Staging, Upload};

/// A staged upload, ready to process.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct UploadedItem {
    /// Where we staged the file. This has a random name.
    pub storage_path: PathBuf,
    /// The client-supplied file name. Untrusted.
    pub original_name: String,
}

/// The result of processing a single file.
#[derive(Clone, Debug, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub struct DocumentRecord {
    /// Where the file was staged while we processed it.
    pub file_path: String,
    /// The client-supplied file name.
    pub file_name: String,
    /// Our best guess at the kind of document.
    pub document_type: DocumentType,
    /// The OCRed text, with surrounding whitespace removed. Empty if we
    /// couldn't extract anything.
    pub extracted_text: String,
}

/// A failure of an entire batch.
#[derive(Debug, Error)]
pub enum BatchError {
    /// There was nothing to process.
    #[error("no files provided")]
    EmptyBatch,

    /// We could not stage one of the uploads.
    #[error("failed to stage {name:?}")]
    Staging {
        name: String,
        #[source]
        source: anyhow::Error,
    },

    /// Text extraction failed in a way that isn't specific to the file.
    #[error("failed to extract text from {name:?}")]
    Extraction {
        name: String,
        #[source]
        source: ExtractionError,
    },

    /// We could not delete our staged files.
    #[error("failed to clean up staged files")]
    Cleanup(#[source] anyhow::Error),
}

/// Extracts and classifies batches of uploads.
#[derive(Clone)]
pub struct BatchProcessor {
    router: FormatRouter,
    staging: Arc<dyn Staging>,
}

impl BatchProcessor {
    /// Create a new batch processor.
    pub fn new(router: FormatRouter, staging: Arc<dyn Staging>) -> Self {
        Self { router, staging }
    }

    /// Stage and process a batch of uploads.
    #[instrument(level = "debug", skip_all, fields(count = uploads.len()))]
    pub async fn process_uploads(
        &self,
        uploads: Vec<Upload>,
        progress: &ProgressBar,
    ) -> Result<Vec<DocumentRecord>, BatchError> {
        if uploads.is_empty() {
            return Err(BatchError::EmptyBatch);
        }
        let staging = self.staging.clone();
        let batch =
            spawn_blocking_propagating_panics(move || StagedBatch::stage_all(staging, &uploads))
                .await?;
        self.process_batch(batch, progress).await
    }

    /// Process a batch of staged files, in order, and then delete them.
    pub async fn process_batch(
        &self,
        batch: StagedBatch,
        progress: &ProgressBar,
    ) -> Result<Vec<DocumentRecord>, BatchError> {
        let result = self.process_items(batch.items(), progress).await;
        let released = spawn_blocking_propagating_panics(move || batch.release()).await;
        match (result, released) {
            (Ok(records), released) => released.map(|()| records),
            (Err(err), released) => {
                // Report the original failure, not any cleanup trouble.
                if let Err(cleanup_err) = released {
                    warn!("{:#}", anyhow::Error::from(cleanup_err));
                }
                Err(err)
            }
        }
    }

    /// Process each item, stopping at the first hard failure.
    async fn process_items(
        &self,
        items: &[UploadedItem],
        progress: &ProgressBar,
    ) -> Result<Vec<DocumentRecord>, BatchError> {
        progress.set_length(items.len() as u64);
        let mut records = Vec::with_capacity(items.len());
        for item in items {
            records.push(self.process_item(item).await?);
            progress.inc(1);
        }
        Ok(records)
    }

    /// Extract and classify a single staged file.
    #[instrument(level = "debug", skip_all, fields(name = %item.original_name))]
    pub async fn process_item(
        &self,
        item: &UploadedItem,
    ) -> Result<DocumentRecord, BatchError> {
        let text = self
            .router
            .extract_text(&item.storage_path)
            .await
            .map_err(|source| BatchError::Extraction {
                name: item.original_name.clone(),
                source,
            })?;
        let file_path = item.storage_path.to_string_lossy().into_owned();
        let document_type = classify(&file_path, &item.original_name);
        debug!(%document_type, chars = text.len(), "Processed file");
        Ok(DocumentRecord {
            file_path,
            file_name: item.original_name.clone(),
            document_type,
            extracted_text: text.trim().to_owned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use image::ImageFormat;

    use super::{
        staging::{DirStaging, tests::FakeStaging},
        *,
    };
    use crate::{
        classify::classify_name,
        extract::{page::tests::tiny_image, tests::fake_router},
    };

    fn upload(name: &str, contents: &[u8]) -> Upload {
        Upload {
            original_name: name.to_owned(),
            contents: contents.to_vec(),
        }
    }

    fn pdf_upload(name: &str) -> Upload {
        upload(name, b"%PDF-1.4\n")
    }

    /// A temporary directory whose path contains no document keywords, so
    /// that storage paths inside it never decide a document's type.
    fn keyword_free_tempdir() -> Result<tempfile::TempDir> {
        for _ in 0..100 {
            let dir = tempfile::tempdir()?;
            if classify_name(&dir.path().to_string_lossy()).is_none() {
                return Ok(dir);
            }
        }
        Err(anyhow!("every temporary directory path contained a keyword"))
    }

    #[tokio::test]
    async fn processes_mixed_batch_in_order() -> Result<()> {
        let dir = keyword_free_tempdir()?;
        let staging = Arc::new(DirStaging::new(dir.path().join("staging")));
        let (router, _ocr) = fake_router(2);
        let processor = BatchProcessor::new(router, staging.clone());

        let uploads = vec![
            upload("passport.png", &tiny_image(ImageFormat::Png)),
            upload("broken_scan.jpg", b"not really a jpeg"),
            pdf_upload("citizenship_cert.pdf"),
            upload("notes.txt", b"plain text"),
            pdf_upload("id_pan_card.PDF"),
            upload("random_doc.jpeg", &tiny_image(ImageFormat::Jpeg)),
        ];
        let records = processor
            .process_uploads(uploads.clone(), &ProgressBar::hidden())
            .await?;

        assert_eq!(records.len(), uploads.len());
        let names = records.iter().map(|r| r.file_name.as_str()).collect::<Vec<_>>();
        assert_eq!(
            names,
            uploads
                .iter()
                .map(|u| u.original_name.as_str())
                .collect::<Vec<_>>()
        );
        let types = records.iter().map(|r| r.document_type).collect::<Vec<_>>();
        assert_eq!(
            types,
            vec![
                DocumentType::Passport,
                DocumentType::Unknown,
                DocumentType::Citizenship,
                DocumentType::Unknown,
                DocumentType::PanCard,
                DocumentType::Unknown,
            ]
        );

        // Text is trimmed, and failures are empty.
        assert!(records[0].extracted_text.starts_with("text of "));
        assert!(records[0].extracted_text.ends_with(".png"));
        assert_eq!(records[1].extracted_text, "");
        assert!(records[2].extracted_text.contains("#page=1  \n  text of "));
        assert!(records[2].extracted_text.ends_with("#page=2"));
        assert_eq!(records[3].extracted_text, "");
        assert!(!records[5].extracted_text.is_empty());

        // Staged paths are random, and gone afterwards.
        for record in &records {
            let path = Path::new(&record.file_path);
            assert_eq!(path.parent(), Some(staging.root()));
            assert!(!record.file_path.contains(&record.file_name));
            assert!(!path.exists());
        }
        assert_eq!(fs::read_dir(staging.root())?.count(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn fallback_name_classifies_random_storage_paths() -> Result<()> {
        let dir = keyword_free_tempdir()?;
        let staging = Arc::new(DirStaging::new(dir.path()));
        let (router, _ocr) = fake_router(1);
        let processor = BatchProcessor::new(router, staging);

        let records = processor
            .process_uploads(
                vec![upload("passport.jpg", &tiny_image(ImageFormat::Jpeg))],
                &ProgressBar::hidden(),
            )
            .await?;
        assert_eq!(records[0].document_type, DocumentType::Passport);
        assert!(records[0].file_path.ends_with(".jpg"));
        Ok(())
    }

    #[tokio::test]
    async fn empty_batch_is_rejected() {
        let (router, _ocr) = fake_router(1);
        let staging = Arc::new(FakeStaging::default());
        let processor = BatchProcessor::new(router, staging.clone());
        let err = processor
            .process_uploads(vec![], &ProgressBar::hidden())
            .await
            .unwrap_err();
        assert!(matches!(err, BatchError::EmptyBatch));
        assert_eq!(*staging.staged_count.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn hard_failure_aborts_and_cleans_up() {
        let (router, ocr) = fake_router(1);
        let staging = Arc::new(FakeStaging::default());
        let processor = BatchProcessor::new(router, staging.clone());

        let uploads = vec![
            pdf_upload("first.pdf"),
            pdf_upload("no_scratch.pdf"),
            pdf_upload("never_reached.pdf"),
        ];
        let err = processor
            .process_uploads(uploads, &ProgressBar::hidden())
            .await
            .unwrap_err();
        assert!(
            matches!(err, BatchError::Extraction { ref name, .. } if name == "no_scratch.pdf")
        );
        // We stopped at the failing item.
        assert_eq!(ocr.calls.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert_eq!(*staging.staged_count.lock().unwrap(), 3);
        assert!(staging.live_paths().is_empty());
    }

    #[tokio::test]
    async fn soft_failures_do_not_stop_the_batch() -> Result<()> {
        let (router, _ocr) = fake_router(1);
        let staging = Arc::new(FakeStaging::default());
        let processor = BatchProcessor::new(router, staging.clone());

        let uploads = vec![
            pdf_upload("corrupt.pdf"),
            upload("slides.pptx", b""),
            pdf_upload("after.pdf"),
        ];
        let records = processor
            .process_uploads(uploads, &ProgressBar::hidden())
            .await?;
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].extracted_text, "");
        assert_eq!(records[1].extracted_text, "");
        assert_eq!(records[2].extracted_text, "text of 00000003-after.pdf#page=1");
        assert!(staging.live_paths().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn identical_inputs_give_identical_records() -> Result<()> {
        let uploads = vec![
            pdf_upload("passport.pdf"),
            pdf_upload("companion.pdf"),
            upload("scan.tiff", b"II*\0"),
        ];
        let mut runs = vec![];
        for _ in 0..2 {
            let (router, _ocr) = fake_router(2);
            let processor = BatchProcessor::new(router, Arc::new(FakeStaging::default()));
            runs.push(
                processor
                    .process_uploads(uploads.clone(), &ProgressBar::hidden())
                    .await?,
            );
        }
        assert_eq!(runs[0], runs[1]);
        assert_eq!(runs[0][1].document_type, DocumentType::PanCard);
        Ok(())
    }

    #[tokio::test]
    async fn staging_runs_off_the_async_runtime() -> Result<()> {
        let (router, _ocr) = fake_router(1);
        let staging = Arc::new(FakeStaging::default());
        let processor = BatchProcessor::new(router, staging.clone());

        processor
            .process_uploads(
                vec![pdf_upload("a.pdf"), pdf_upload("b.pdf")],
                &ProgressBar::hidden(),
            )
            .await?;

        // Two stages and two discards, none on the runtime's own thread.
        let threads = staging.threads.lock().unwrap();
        assert_eq!(threads.len(), 4);
        let runtime_thread = std::thread::current().id();
        assert!(threads.iter().all(|&id| id != runtime_thread));
        Ok(())
    }

    #[test]
    fn records_serialize_with_snake_case_keys() -> Result<()> {
        let record = DocumentRecord {
            file_path: "staging/x.png".to_owned(),
            file_name: "pan.png".to_owned(),
            document_type: DocumentType::PanCard,
            extracted_text: "".to_owned(),
        };
        assert_eq!(
            serde_json::to_value(&record)?,
            serde_json::json!({
                "file_path": "staging/x.png",
                "file_name": "pan.png",
                "document_type": "PAN Card",
                "extracted_text": "",
            })
        );
        Ok(())
    }
}
