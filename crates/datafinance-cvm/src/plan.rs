//! Download plan and outcome value objects

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::catalog;
use crate::catalog::CvmValidationError;

/// One file to fetch: a document/year pair with its resolved URL.
#[derive(Debug, Clone)]
pub struct PlannedFile {
    pub year: u16,
    pub url: String,
    pub filename: String,
}

/// Immutable mapping from document type to the ordered files to fetch.
/// Built once per download invocation, after validation.
#[derive(Debug, Clone)]
pub struct DownloadPlan {
    entries: BTreeMap<String, Vec<PlannedFile>>,
}

impl DownloadPlan {
    /// Validate the request and resolve every `(doc, year)` into a URL.
    ///
    /// The range is checked against the general CVM bounds; each document
    /// then contributes only the years at or above its own floor (an ITR
    /// request starting in 2010 yields 2011 onward).
    pub fn build(
        doc_types: &[String],
        first_year: u16,
        last_year: u16,
    ) -> Result<Self, CvmValidationError> {
        if doc_types.is_empty() {
            return Err(CvmValidationError::EmptyDocumentList);
        }
        catalog::validate_years(first_year, last_year)?;

        let mut entries = BTreeMap::new();
        for name in doc_types {
            let doc = catalog::validate_doc_name(name)?;
            let floor = catalog::min_year_for(doc);
            if floor > first_year {
                log::info!("{doc}: datasets start in {floor}, clamping requested {first_year}");
            }
            let files: Vec<PlannedFile> = (first_year.max(floor)..=last_year)
                .map(|year| PlannedFile {
                    year,
                    url: catalog::doc_url(doc, year),
                    filename: catalog::doc_filename(doc, year),
                })
                .collect();
            entries.insert(doc.to_string(), files);
        }
        Ok(Self { entries })
    }

    /// Assemble a plan from pre-resolved files (mirrors, tests). The normal
    /// path is [`DownloadPlan::build`], which validates and resolves URLs.
    pub fn from_entries(entries: BTreeMap<String, Vec<PlannedFile>>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &BTreeMap<String, Vec<PlannedFile>> {
        &self.entries
    }

    pub fn total_urls(&self) -> usize {
        self.entries.values().map(|files| files.len()).sum()
    }
}

/// Aggregate result of a download batch. Per-URL failures land in `failed`
/// keyed by `{doc}_{year}`; the batch itself still succeeds.
#[derive(Debug, Default, Clone, Serialize)]
pub struct DownloadOutcome {
    successful: BTreeMap<String, BTreeSet<u16>>,
    failed: BTreeMap<String, String>,
}

impl DownloadOutcome {
    pub fn add_success(&mut self, doc: &str, year: u16) {
        self.successful.entry(doc.to_string()).or_default().insert(year);
    }

    pub fn add_error(&mut self, doc: &str, year: u16, error: String) {
        self.failed.insert(format!("{doc}_{year}"), error);
    }

    pub fn success_count(&self) -> usize {
        self.successful.values().map(|years| years.len()).sum()
    }

    pub fn error_count(&self) -> usize {
        self.failed.len()
    }

    pub fn successful(&self) -> &BTreeMap<String, BTreeSet<u16>> {
        &self.successful
    }

    pub fn failed(&self) -> &BTreeMap<String, String> {
        &self.failed
    }
}

impl std::fmt::Display for DownloadOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "DownloadOutcome(success={}, errors={})",
            self.success_count(),
            self.error_count()
        )
    }
}
