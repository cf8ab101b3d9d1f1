//! The `process` subcommand.

use std::sync::Arc;

use clap::Args;

use crate::{
    async_utils::io::write_json_output,
    batch::{
        BatchProcessor,
        staging::{DirStaging, Upload},
    },
    config::{Config, PipelineOpts},
    extract::{FormatRouter, ocr::TesseractOcrEngine, rasterize::PopplerRasterizer},
    prelude::*,
    ui::{ProgressConfig, Ui},
};

/// Command-line options for the `process` subcommand.
#[derive(Debug, Args)]
pub struct ProcessOpts {
    /// PDF, JPEG or PNG files to OCR and classify. Other files are included in
    /// the output with no text.
    #[clap(required = true, value_name = "FILE")]
    pub input_paths: Vec<PathBuf>,

    /// Output file. Defaults to standard output.
    #[clap(short = 'o', long = "out")]
    pub output_path: Option<PathBuf>,

    #[clap(flatten)]
    pub pipeline: PipelineOpts,
}

/// Build a [`BatchProcessor`] using our real OCR tools.
pub fn batch_processor_for_config(config: &Config) -> BatchProcessor {
    let router = FormatRouter::new(
        Arc::new(PopplerRasterizer::new(
            config.rasterize.dpi,
            config.rasterize.max_pages,
        )),
        Arc::new(TesseractOcrEngine::new(config.ocr.language.clone())),
        config.item_timeout(),
    );
    let staging = DirStaging::new(config.staging_dir());
    debug!(staging_dir = %staging.root().display(), "Staging uploads");
    BatchProcessor::new(router, Arc::new(staging))
}

/// Read our input files as uploads, named after their file names.
async fn read_uploads(paths: &[PathBuf]) -> Result<Vec<Upload>> {
    let mut uploads = Vec::with_capacity(paths.len());
    for path in paths {
        let contents = tokio::fs::read(path)
            .await
            .with_context(|| format!("failed to read {:?}", path.display()))?;
        let original_name = path
            .file_name()
            .with_context(|| format!("no file name in {:?}", path.display()))?
            .to_string_lossy()
            .into_owned();
        uploads.push(Upload {
            original_name,
            contents,
        });
    }
    Ok(uploads)
}

/// The `process` subcommand.
#[instrument(level = "debug", skip_all)]
pub async fn cmd_process(ui: Ui, opts: &ProcessOpts) -> Result<()> {
    let config = opts.pipeline.load_config().await?;
    let uploads = read_uploads(&opts.input_paths).await?;

    let processor = batch_processor_for_config(&config);
    let pb = ui.new_progress_bar(
        &ProgressConfig {
            emoji: "📄",
            msg: "Processing documents",
            done_msg: "Processed documents",
        },
        uploads.len() as u64,
    );
    let records = processor
        .process_uploads(uploads, &pb)
        .await
        .context("error processing documents")?;
    pb.finish_using_style();

    let without_text = records
        .iter()
        .filter(|r| r.extracted_text.is_empty())
        .count();
    info!(
        count = records.len(),
        without_text, "Processed {} documents", records.len()
    );

    write_json_output(opts.output_path.as_deref(), &records).await
}
