//! In-memory page images.

use crate::{async_utils::spawn_blocking_propagating_panics, prelude::*};

use super::ocr::OcrError;

/// Image types we accept as direct uploads, and which we can verify by
/// decoding them.
const SUPPORTED_IMAGE_TYPES: &[&str] = &["image/png", "image/jpeg"];

/// A single raster image, either one page of a rasterized PDF or an image
/// uploaded directly.
///
/// Each [`PageImage`] is consumed by exactly one OCR call.
#[derive(Clone, Debug)]
pub struct PageImage {
    /// A human-readable description of where this page came from, for logs.
    pub label: String,
    /// The MIME type of our data. One of [`SUPPORTED_IMAGE_TYPES`].
    pub mime_type: String,
    /// The encoded image data.
    pub data: Vec<u8>,
}

impl PageImage {
    /// Load an image file that was uploaded directly.
    ///
    /// We sniff the actual content rather than trusting the extension, and we
    /// decode the image once to make sure it's readable before handing it to
    /// an OCR engine.
    #[instrument(level = "debug", skip_all, fields(path = %path.display()))]
    pub async fn from_image_file(path: &Path) -> Result<Self, OcrError> {
        let label = path.display().to_string();
        let data = tokio::fs::read(path).await.map_err(|err| {
            OcrError::UnreadableImage {
                label: label.clone(),
                reason: err.to_string(),
            }
        })?;
        Self::from_encoded(label, data).await
    }

    /// Build a page from encoded image bytes, verifying that they decode.
    pub async fn from_encoded(label: String, data: Vec<u8>) -> Result<Self, OcrError> {
        let mime_type = match infer::get(&data) {
            Some(kind) if SUPPORTED_IMAGE_TYPES.contains(&kind.mime_type()) => {
                kind.mime_type().to_owned()
            }
            Some(kind) => {
                return Err(OcrError::UnreadableImage {
                    label,
                    reason: format!("unsupported image type {}", kind.mime_type()),
                });
            }
            None => {
                return Err(OcrError::UnreadableImage {
                    label,
                    reason: "not a recognizable image".to_owned(),
                });
            }
        };

        // Decoding is CPU-bound, so keep it off the executor.
        let (data, decoded) = spawn_blocking_propagating_panics(move || {
            let decoded = image::load_from_memory(&data).map(|_| ());
            (data, decoded)
        })
        .await;
        if let Err(err) = decoded {
            return Err(OcrError::UnreadableImage {
                label,
                reason: err.to_string(),
            });
        }

        Ok(Self {
            label,
            mime_type,
            data,
        })
    }
}
