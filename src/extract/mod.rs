//! Turning uploaded files into text.
//!
//! We pick a path through the pipeline based on the file's extension. PDFs are
//! rasterized and OCRed page by page; images are OCRed directly; anything else
//! is skipped.
//!
//! Extraction fails soft. A corrupt or unsupported file must not abort the rest
//! of the batch, so [`FormatRouter::extract_text`] turns most errors into empty
//! text. The exception is a failure of our own environment (for example, we
//! can't create scratch directories), which the batch has to hear about.

use std::{sync::Arc, time::Duration};

use thiserror::Error;

use crate::prelude::*;

pub mod ocr;
pub mod page;
pub mod rasterize;

use self::{
    ocr::{OcrEngine, OcrError},
    page::PageImage,
    rasterize::{RasterizationError, Rasterizer},
};

/// The kinds of file we know how to handle, based on extension.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FileKind {
    /// A PDF, which must be rasterized before OCR.
    Pdf,
    /// A JPEG or PNG image.
    Image,
    /// Anything else.
    Unsupported,
}

impl FileKind {
    /// Classify a path by its extension, ignoring case.
    pub fn from_path(path: &Path) -> Self {
        let ext = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase());
        match ext.as_deref() {
            Some("pdf") => FileKind::Pdf,
            Some("jpg" | "jpeg" | "png") => FileKind::Image,
            _ => FileKind::Unsupported,
        }
    }
}

/// Errors which can occur while extracting text from a file.
#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error(transparent)]
    Rasterization(#[from] RasterizationError),

    #[error(transparent)]
    Ocr(#[from] OcrError),

    /// We don't know how to extract text from this kind of file.
    #[error("unsupported file type: {path:?}")]
    UnsupportedFileType { path: PathBuf },
}

impl ExtractionError {
    /// Should this error be absorbed, leaving the file with empty text?
    ///
    /// Problems with the file itself (or with the OCR tools' opinion of it) are
    /// soft. Problems with our own scratch space are not.
    pub fn is_soft(&self) -> bool {
        !matches!(
            self,
            ExtractionError::Rasterization(RasterizationError::Scratch(_))
                | ExtractionError::Ocr(OcrError::Scratch(_))
        )
    }
}

/// Dispatches files to the right extraction path.
#[derive(Clone)]
pub struct FormatRouter {
    rasterizer: Arc<dyn Rasterizer>,
    ocr: Arc<dyn OcrEngine>,
    /// How long we allow for a single file, if limited.
    item_timeout: Option<Duration>,
}

impl FormatRouter {
    /// Create a new router.
    pub fn new(
        rasterizer: Arc<dyn Rasterizer>,
        ocr: Arc<dyn OcrEngine>,
        item_timeout: Option<Duration>,
    ) -> Self {
        Self {
            rasterizer,
            ocr,
            item_timeout,
        }
    }

    /// Extract text from a file, applying our fail-soft policy.
    ///
    /// Soft failures are logged and returned as an empty string. Only hard
    /// failures are returned as errors.
    #[instrument(level = "debug", skip_all, fields(path = %path.display()))]
    pub async fn extract_text(&self, path: &Path) -> Result<String, ExtractionError> {
        match self.try_extract_text(path).await {
            Ok(text) => Ok(text),
            Err(err @ ExtractionError::UnsupportedFileType { .. }) => {
                info!("Skipping text extraction: {}", err);
                Ok(String::new())
            }
            Err(err) if err.is_soft() => {
                warn!("Could not extract text from {:?}: {}", path.display(), err);
                Ok(String::new())
            }
            Err(err) => Err(err),
        }
    }

    /// Extract text from a file, returning every failure as an error.
    ///
    /// PDF pages are OCRed in order, and each page's text is followed by a
    /// newline. If any page fails, the whole PDF fails.
    pub async fn try_extract_text(&self, path: &Path) -> Result<String, ExtractionError> {
        match self.item_timeout {
            Some(limit) => tokio::time::timeout(limit, self.extract_by_kind(path))
                .await
                .unwrap_or(Err(ExtractionError::Ocr(OcrError::Timeout(limit)))),
            None => self.extract_by_kind(path).await,
        }
    }

    /// Run the extraction path for this kind of file, with no time limit.
    async fn extract_by_kind(&self, path: &Path) -> Result<String, ExtractionError> {
        match FileKind::from_path(path) {
            FileKind::Pdf => {
                let pages = self.rasterizer.rasterize(path).await?;
                let mut text = String::new();
                for page in pages {
                    text.push_str(&self.ocr.recognize(page).await?);
                    text.push('\n');
                }
                Ok(text)
            }
            FileKind::Image => {
                let image = PageImage::from_image_file(path).await?;
                Ok(self.ocr.recognize(image).await?)
            }
            FileKind::Unsupported => Err(ExtractionError::UnsupportedFileType {
                path: path.to_owned(),
            }),
        }
    }
}
