//! Filename-based document classification.
//!
//! This is a purely lexical heuristic: we look for keywords inside file names,
//! and we never look at the extracted text.

use std::fmt;

use schemars::JsonSchema;

use crate::prelude::*;

/// The kinds of document we know how to recognize.
#[derive(
    Clone, Copy, Debug, Deserialize, Eq, Hash, JsonSchema, PartialEq, Serialize,
)]
pub enum DocumentType {
    /// A passport.
    #[serde(rename = "Passport")]
    Passport,

    /// A citizenship certificate.
    #[serde(rename = "Citizenship")]
    Citizenship,

    /// A PAN (Permanent Account Number) card.
    #[serde(rename = "PAN Card")]
    PanCard,

    /// None of our keywords matched.
    #[serde(rename = "Unknown Document Type")]
    Unknown,
}

impl DocumentType {
    /// The human-readable label, exactly as it appears in our JSON output.
    pub fn label(self) -> &'static str {
        match self {
            DocumentType::Passport => "Passport",
            DocumentType::Citizenship => "Citizenship",
            DocumentType::PanCard => "PAN Card",
            DocumentType::Unknown => "Unknown Document Type",
        }
    }
}

impl fmt::Display for DocumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Keywords to look for, in priority order. When a name contains more than one
/// keyword, the earliest rule wins.
///
/// Matching is a plain substring test, so `"pan"` also matches names like
/// `"companion.pdf"`.
pub const KEYWORD_RULES: &[(&str, DocumentType)] = &[
    ("passport", DocumentType::Passport),
    ("citizenship", DocumentType::Citizenship),
    ("pan", DocumentType::PanCard),
];

/// Classify a single name, returning `None` if no keyword matches.
pub fn classify_name(name: &str) -> Option<DocumentType> {
    let name = name.to_lowercase();
    KEYWORD_RULES
        .iter()
        .find(|(keyword, _)| name.contains(keyword))
        .map(|&(_, document_type)| document_type)
}

/// Classify a document by name.
///
/// We try `primary_name` first. If that's inconclusive, we try
/// `fallback_name`, and if that's inconclusive too, we return
/// [`DocumentType::Unknown`].
///
/// In practice, `primary_name` is the path of a staged upload, which has a
/// random name, so most of the real work is done by `fallback_name`.
pub fn classify(primary_name: &str, fallback_name: &str) -> DocumentType {
    classify_name(primary_name)
        .or_else(|| classify_name(fallback_name))
        .unwrap_or(DocumentType::Unknown)
}
