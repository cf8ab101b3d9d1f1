//! OCR engine interface, and a `tesseract`-based implementation.

use std::{io, time::Duration};

use thiserror::Error;
use tokio::process::Command;

use crate::{async_utils::check_for_command_failure, prelude::*};

use super::page::PageImage;

/// Errors which can occur while OCRing a single image.
#[derive(Debug, Error)]
pub enum OcrError {
    /// The image could not be read or decoded.
    #[error("cannot read image {label}: {reason}")]
    UnreadableImage { label: String, reason: String },

    /// The OCR engine itself failed.
    #[error("OCR engine failed on {label}: {source:#}")]
    Engine {
        label: String,
        #[source]
        source: anyhow::Error,
    },

    /// OCR took longer than we were willing to wait.
    #[error("OCR timed out after {0:?}")]
    Timeout(Duration),

    /// We could not set up a scratch directory for the engine.
    #[error("cannot create OCR scratch space")]
    Scratch(#[source] io::Error),
}

/// Interface to an OCR engine.
///
/// Engines make exactly one attempt per image. Retries and fallbacks, if any,
/// are up to the caller.
#[async_trait]
pub trait OcrEngine: Send + Sync + 'static {
    /// Extract the text from a single image.
    async fn recognize(&self, image: PageImage) -> Result<String, OcrError>;
}

/// OCR engine wrapping the `tesseract` CLI tool.
#[derive(Clone, Debug)]
pub struct TesseractOcrEngine {
    /// The `tesseract` language code(s) to use, like `eng` or `eng+hin`.
    language: String,
}

impl TesseractOcrEngine {
    /// Create a new `tesseract` engine.
    pub fn new(language: impl Into<String>) -> Self {
        Self {
            language: language.into(),
        }
    }
}

#[async_trait]
impl OcrEngine for TesseractOcrEngine {
    #[instrument(level = "debug", skip_all, fields(page = %image.label))]
    async fn recognize(&self, image: PageImage) -> Result<String, OcrError> {
        let label = image.label.clone();
        let engine_err = |source: anyhow::Error| OcrError::Engine {
            label: label.clone(),
            source,
        };

        let extension = mime_guess::get_mime_extensions_str(&image.mime_type)
            .and_then(|o| o.first())
            .ok_or_else(|| {
                engine_err(anyhow!("cannot determine extension for {}", image.mime_type))
            })?;

        // Write our input to a temporary file.
        let tmpdir = tempfile::TempDir::with_prefix("tesseract").map_err(OcrError::Scratch)?;
        let input_path = tmpdir.path().join(format!("input.{}", extension));
        let output_base = tmpdir.path().join("output");
        tokio::fs::write(&input_path, &image.data)
            .await
            .map_err(OcrError::Scratch)?;

        // Run tesseract on the input file. It appends `.txt` to the output
        // base name.
        let output = Command::new("tesseract")
            .arg(&input_path)
            .arg(&output_base)
            .arg("-l")
            .arg(&self.language)
            .kill_on_drop(true)
            .output()
            .await
            .context("cannot run tesseract")
            .map_err(engine_err)?;
        check_for_command_failure("tesseract", &output, None).map_err(engine_err)?;

        // Read the output file.
        let text = tokio::fs::read_to_string(output_base.with_extension("txt"))
            .await
            .context("cannot read tesseract output file")
            .map_err(engine_err)?;
        debug!(chars = text.len(), "Recognized text");
        Ok(text)
    }
}
