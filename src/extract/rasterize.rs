//! Rasterizing PDFs into page images, using Poppler's CLI tools.

use std::{collections::BTreeMap, io, sync::LazyLock};

use regex::Regex;
use thiserror::Error;
use tokio::process::Command;

use crate::{async_utils::check_for_command_failure, prelude::*};

use super::page::PageImage;

/// A default error regex for checking command output.
static ERROR_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)error").expect("failed to compile regex"));

static DOWNGRADE_TO_WARNING_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)error: xref num").expect("failed to compile regex")
});

/// Does this line contain an error?
fn is_error_line(line: &str) -> bool {
    ERROR_REGEX.is_match(line) && !DOWNGRADE_TO_WARNING_REGEX.is_match(line)
}

/// Errors which can occur while rasterizing a PDF.
#[derive(Debug, Error)]
pub enum RasterizationError {
    /// The file isn't a PDF at all.
    #[error("{0:?} is not a PDF file")]
    NotAPdf(PathBuf),

    /// The rasterization engine reported a fatal error.
    #[error("cannot rasterize {path:?}: {source:#}")]
    Engine {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    /// We could not set up a scratch directory for rendered pages.
    #[error("cannot create rasterization scratch space")]
    Scratch(#[source] io::Error),
}

/// Interface to a PDF rasterizer.
#[async_trait]
pub trait Rasterizer: Send + Sync + 'static {
    /// Render every page of a PDF, in document order.
    async fn rasterize(&self, pdf_path: &Path) -> Result<Vec<PageImage>, RasterizationError>;
}

/// Rasterizer which uses `pdfinfo` and `pdftocairo`.
#[derive(Clone, Debug)]
pub struct PopplerRasterizer {
    /// The DPI to use for rasterization.
    dpi: u32,
    /// The maximum number of pages to render, if any.
    max_pages: Option<usize>,
}

impl PopplerRasterizer {
    /// Create a new rasterizer.
    pub fn new(dpi: u32, max_pages: Option<usize>) -> Self {
        Self { dpi, max_pages }
    }
}

#[async_trait]
impl Rasterizer for PopplerRasterizer {
    #[instrument(level = "debug", skip_all, fields(path = %pdf_path.display(), dpi = self.dpi))]
    async fn rasterize(&self, pdf_path: &Path) -> Result<Vec<PageImage>, RasterizationError> {
        let engine_err = |source: anyhow::Error| RasterizationError::Engine {
            path: pdf_path.to_owned(),
            source,
        };

        // Refuse to feed anything but a PDF to Poppler.
        let is_pdf = infer::get_from_path(pdf_path)
            .with_context(|| format!("failed to read {:?}", pdf_path.display()))
            .map_err(engine_err)?
            .is_some_and(|kind| kind.mime_type() == "application/pdf");
        if !is_pdf {
            return Err(RasterizationError::NotAPdf(pdf_path.to_owned()));
        }

        // Count the number of pages in the PDF.
        let total_pages = get_pdf_page_count(pdf_path).await.map_err(engine_err)?;

        // Create a temporary directory to hold the PNG files.
        let tmpdir = tempfile::TempDir::with_prefix("pages").map_err(RasterizationError::Scratch)?;

        // Run pdftocairo to convert the PDF to PNG files. pdftocairo will add
        // zero-padded page numbers to this name.
        let out_path = tmpdir.path().join("page");
        let mut cmd = Command::new("pdftocairo");
        cmd.arg("-png").arg("-r").arg(self.dpi.to_string());
        if let Some(max_pages) = self.max_pages
            && total_pages > max_pages
        {
            // The command-line tools use 1-based, inclusive page numbers.
            warn!(
                total_pages,
                max_pages, "Only rasterizing the first {} pages", max_pages
            );
            cmd.arg("-l").arg(max_pages.to_string());
        }
        let output = cmd
            .arg(pdf_path)
            .arg(&out_path)
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("failed to run pdftocairo on {:?}", pdf_path.display()))
            .map_err(engine_err)?;
        check_for_command_failure("pdftocairo", &output, Some(&is_error_line))
            .map_err(engine_err)?;

        // Read the rendered pages back, in page order.
        let mut page_paths = tmpdir
            .path()
            .read_dir()
            .map_err(RasterizationError::Scratch)?
            .map(|entry| entry.map(|entry| entry.path()))
            .collect::<Result<Vec<_>, _>>()
            .map_err(RasterizationError::Scratch)?;
        page_paths.sort();

        let mut pages = Vec::with_capacity(page_paths.len());
        for (page_idx, path) in page_paths.into_iter().enumerate() {
            let data = tokio::fs::read(&path)
                .await
                .map_err(RasterizationError::Scratch)?;
            pages.push(PageImage {
                label: format!("{}#page={}", pdf_path.display(), page_idx + 1),
                mime_type: "image/png".to_owned(),
                data,
            });
        }
        debug!(page_count = pages.len(), "Rasterized PDF");
        Ok(pages)
    }
}

/// Get the number of pages in a PDF file.
#[instrument(level = "debug", skip_all, fields(path = %path.display()))]
pub async fn get_pdf_page_count(path: &Path) -> Result<usize> {
    // Run pdfinfo to get the number of pages.
    let output = Command::new("pdfinfo")
        .arg(path)
        .kill_on_drop(true)
        .output()
        .await
        .with_context(|| format!("failed to run pdfinfo on {:?}", path.display()))?;
    check_for_command_failure("pdfinfo", &output, None)?;

    // Parse the output of pdfinfo into properties.
    let output =
        String::from_utf8(output.stdout).context("pdfinfo output was not valid UTF-8")?;
    let mut properties = BTreeMap::new();
    for line in output.lines() {
        let mut parts = line.splitn(2, ':');
        let key = parts.next().unwrap_or("").trim();
        let value = parts.next().unwrap_or("").trim();
        properties.insert(key.to_string(), value.to_string());
    }

    // Get the number of pages from the properties.
    let page_count_str = properties
        .get("Pages")
        .ok_or_else(|| anyhow!("failed to find page count in pdfinfo output"))?;
    page_count_str.parse::<usize>().with_context(|| {
        format!(
            "failed to parse page count for {:?} from pdfinfo output",
            path.display()
        )
    })
}
