//! Pipeline configuration.
//!
//! Settings come from an optional TOML or JSON file, and can be overridden on
//! the command line.

use std::{env, time::Duration};

use clap::Args;
use schemars::JsonSchema;

use crate::{async_utils::io::read_json_or_toml, prelude::*};

/// Default name of our staging directory, inside the system temp directory.
const DEFAULT_STAGING_DIR_NAME: &str = "doc-classifier-staging";

/// Our configuration file.
#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Where to stage uploads while we process them. Defaults to a directory
    /// inside the system temp directory.
    pub staging_dir: Option<PathBuf>,

    /// PDF rasterization settings.
    pub rasterize: RasterizeConfig,

    /// OCR settings.
    pub ocr: OcrConfig,
}

/// PDF rasterization settings.
#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct RasterizeConfig {
    /// The DPI to use when rendering PDF pages.
    pub dpi: u32,

    /// Only OCR this many pages of each PDF.
    pub max_pages: Option<usize>,
}

impl Default for RasterizeConfig {
    fn default() -> Self {
        Self {
            dpi: 300,
            max_pages: None,
        }
    }
}

/// OCR settings.
#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct OcrConfig {
    /// The `tesseract` language code(s).
    pub language: String,

    /// How many seconds to allow for each file. 0 means no limit.
    pub timeout_secs: u64,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            language: "eng".to_owned(),
            timeout_secs: 120,
        }
    }
}

impl Config {
    /// The staging directory to use.
    pub fn staging_dir(&self) -> PathBuf {
        self.staging_dir
            .clone()
            .unwrap_or_else(|| env::temp_dir().join(DEFAULT_STAGING_DIR_NAME))
    }

    /// The per-file time limit, if any.
    pub fn item_timeout(&self) -> Option<Duration> {
        match self.ocr.timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}

/// Command-line options which control the pipeline.
#[derive(Args, Clone, Debug, Default)]
pub struct PipelineOpts {
    /// A TOML or JSON configuration file.
    #[clap(long = "config", value_name = "PATH")]
    pub config_path: Option<PathBuf>,

    /// Where to stage uploads while we process them.
    #[clap(long)]
    pub staging_dir: Option<PathBuf>,

    /// The DPI to use when rendering PDF pages.
    #[clap(long)]
    pub dpi: Option<u32>,

    /// Only OCR this many pages of each PDF.
    #[clap(long)]
    pub max_pages: Option<usize>,

    /// The `tesseract` language code(s), like `eng` or `eng+hin`.
    #[clap(long)]
    pub language: Option<String>,

    /// How many seconds to allow for each file. 0 means no limit.
    #[clap(long = "item-timeout", value_name = "SECS")]
    pub item_timeout_secs: Option<u64>,
}

impl PipelineOpts {
    /// Load our config file, if any, and apply our overrides.
    pub async fn load_config(&self) -> Result<Config> {
        let config = match &self.config_path {
            Some(path) => read_json_or_toml::<Config>(path).await?,
            None => Config::default(),
        };
        let config = self.apply_overrides(config);
        debug!(?config, "Loaded configuration");
        Ok(config)
    }

    /// Override config file values with anything passed on the command line.
    fn apply_overrides(&self, mut config: Config) -> Config {
        if let Some(staging_dir) = &self.staging_dir {
            config.staging_dir = Some(staging_dir.clone());
        }
        if let Some(dpi) = self.dpi {
            config.rasterize.dpi = dpi;
        }
        if let Some(max_pages) = self.max_pages {
            config.rasterize.max_pages = Some(max_pages);
        }
        if let Some(language) = &self.language {
            config.ocr.language = language.clone();
        }
        if let Some(secs) = self.item_timeout_secs {
            config.ocr.timeout_secs = secs;
        }
        config
    }
}
