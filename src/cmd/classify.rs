//! The `classify` subcommand.

use clap::Args;
use schemars::JsonSchema;

use crate::{
    async_utils::io::write_json_output,
    classify::{DocumentType, classify_name},
    prelude::*,
};

/// Command-line options for the `classify` subcommand.
#[derive(Debug, Args)]
pub struct ClassifyOpts {
    /// File names to classify. The files don't need to exist.
    #[clap(required = true, value_name = "NAME")]
    pub names: Vec<String>,
}

/// A classified name.
#[derive(Debug, Deserialize, JsonSchema, Serialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub struct ClassifiedName {
    /// The name, exactly as given.
    pub file_name: String,
    /// The document type suggested by the name.
    pub document_type: DocumentType,
}

/// The `classify` subcommand.
#[instrument(level = "debug", skip_all)]
pub async fn cmd_classify(opts: &ClassifyOpts) -> Result<()> {
    let classified = opts
        .names
        .iter()
        .map(|name| ClassifiedName {
            file_name: name.clone(),
            document_type: classify_name(name).unwrap_or(DocumentType::Unknown),
        })
        .collect::<Vec<_>>();
    write_json_output(None, &classified).await
}
