//! Core data models used throughout the gazette pipeline.
//!
//! These types represent the requests, archives, documents, and matches
//! that flow from the portal through extraction and term matching.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Portal login credentials. Process-wide and read-only.
///
/// `Debug` never prints the secret.
#[derive(Clone)]
pub struct Credentials {
    pub principal: String,
    secret: String,
}

impl Credentials {
    pub fn new(principal: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            principal: principal.into(),
            secret: secret.into(),
        }
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("principal", &self.principal)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// One independently downloadable subdivision of a day's gazette.
///
/// Declaration order is the portal's canonical section order and is the
/// order archives are extracted in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String")]
pub enum SectionCode {
    #[serde(rename = "DO1")]
    Do1,
    #[serde(rename = "DO1E")]
    Do1E,
    #[serde(rename = "DO2")]
    Do2,
    #[serde(rename = "DO3")]
    Do3,
    #[serde(rename = "DO2E")]
    Do2E,
    #[serde(rename = "DO3E")]
    Do3E,
}

impl SectionCode {
    pub const ALL: [SectionCode; 6] = [
        SectionCode::Do1,
        SectionCode::Do1E,
        SectionCode::Do2,
        SectionCode::Do3,
        SectionCode::Do2E,
        SectionCode::Do3E,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SectionCode::Do1 => "DO1",
            SectionCode::Do1E => "DO1E",
            SectionCode::Do2 => "DO2",
            SectionCode::Do3 => "DO3",
            SectionCode::Do2E => "DO2E",
            SectionCode::Do3E => "DO3E",
        }
    }
}

impl fmt::Display for SectionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SectionCode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        SectionCode::ALL
            .iter()
            .copied()
            .find(|code| code.as_str() == upper)
            .ok_or_else(|| format!("unknown section code: '{}'", s))
    }
}

impl TryFrom<String> for SectionCode {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

/// A single (date, section) download request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectionRequest {
    pub date: NaiveDate,
    pub section: SectionCode,
}

impl SectionRequest {
    pub fn new(date: NaiveDate, section: SectionCode) -> Self {
        Self { date, section }
    }

    /// Portal file name, e.g. `2024-05-02-DO1.zip`.
    pub fn file_name(&self) -> String {
        format!("{}-{}.zip", self.date.format("%Y-%m-%d"), self.section)
    }
}

/// Raw ZIP bytes for one [`SectionRequest`].
///
/// Only constructed for byte sequences that passed the signature check.
#[derive(Debug, Clone)]
pub struct Archive {
    pub request: SectionRequest,
    pub bytes: Vec<u8>,
}

/// One legal-act document extracted from a markup entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Document {
    pub section: SectionCode,
    pub filename: String,
    pub category: String,
    pub text: String,
}

/// A document that contains at least one watch term.
#[derive(Debug, Clone, Serialize)]
pub struct Match {
    pub document: Document,
    /// Original-cased terms, in first-seen order. Never empty.
    pub matched_terms: Vec<String>,
    /// At most three distinct context windows.
    pub snippets: Vec<String>,
    /// Filled in by a [`Summarizer`](crate::summarize::Summarizer), if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

/// Volume and timing statistics for one pipeline run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PipelineStats {
    /// Sections that yielded an archive on the selected day. At most one
    /// archive is kept per section, so this always equals
    /// `archives_downloaded`; both are reported to keep the stats format
    /// stable for existing consumers.
    pub sections_downloaded: usize,
    pub archives_downloaded: usize,
    pub markup_files_processed: usize,
    pub documents_extracted: usize,
    pub documents_searched: usize,
    pub matches_found: usize,
    pub download_secs: f64,
    pub extract_secs: f64,
    pub search_secs: f64,
}
