//! Extraction request construction: validation, market-code derivation, and
//! archive discovery

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use crate::asset::{self, B3ValidationError};

/// Two points on the (concurrency, memory) curve, fixed at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingMode {
    /// Up to 10 archives in flight, CPU-parallel parsing
    Fast,
    /// Up to 2 archives in flight, inline parsing
    Slow,
}

impl ProcessingMode {
    pub fn max_concurrent_zips(self) -> usize {
        match self {
            Self::Fast => 10,
            Self::Slow => 2,
        }
    }

    pub fn parallel_parsing(self) -> bool {
        matches!(self, Self::Fast)
    }
}

impl std::fmt::Display for ProcessingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fast => f.write_str("fast"),
            Self::Slow => f.write_str("slow"),
        }
    }
}

/// Validated parameters for one COTAHIST extraction run.
#[derive(Debug, Clone)]
pub struct ExtractionRequest {
    pub source_directory: PathBuf,
    pub destination_directory: PathBuf,
    pub asset_classes: BTreeSet<String>,
    pub first_year: u16,
    pub last_year: u16,
    pub target_market_codes: BTreeSet<String>,
    pub discovered_zip_files: Vec<PathBuf>,
    pub output_filename: String,
    pub processing_mode: ProcessingMode,
}

impl ExtractionRequest {
    /// Validate inputs, derive market codes, and discover the
    /// `COTAHIST_A{yyyy}.ZIP` files present for the requested range.
    ///
    /// Years without a matching archive are simply absent from the
    /// discovery list; an entirely empty list only fails at execution time.
    #[allow(clippy::too_many_arguments)]
    pub fn build(
        source_directory: &Path,
        destination_directory: &Path,
        asset_classes: &[String],
        first_year: u16,
        last_year: u16,
        output_filename: &str,
        processing_mode: ProcessingMode,
    ) -> Result<Self, B3ValidationError> {
        asset::validate_years(first_year, last_year)?;
        let target_market_codes = asset::market_codes_for(asset_classes)?;

        let output_filename = output_filename
            .trim()
            .trim_end_matches(".parquet")
            .to_string();
        if output_filename.is_empty() {
            return Err(B3ValidationError::EmptyOutputFilename);
        }

        let discovered_zip_files = discover_archives(source_directory, first_year, last_year);
        log::info!(
            "discovered {} COTAHIST archives in {} for {first_year}-{last_year}",
            discovered_zip_files.len(),
            source_directory.display()
        );

        Ok(Self {
            source_directory: source_directory.to_path_buf(),
            destination_directory: destination_directory.to_path_buf(),
            asset_classes: asset_classes
                .iter()
                .map(|a| a.trim().to_lowercase())
                .collect(),
            first_year,
            last_year,
            target_market_codes,
            discovered_zip_files,
            output_filename,
            processing_mode,
        })
    }

    /// Final consolidated output path.
    pub fn output_path(&self) -> PathBuf {
        self.destination_directory
            .join(format!("{}.parquet", self.output_filename))
    }
}

/// `COTAHIST_A{yyyy}.ZIP` files present for the range, year order.
fn discover_archives(source: &Path, first_year: u16, last_year: u16) -> Vec<PathBuf> {
    (first_year..=last_year)
        .filter_map(|year| {
            let path = source.join(format!("COTAHIST_A{year}.ZIP"));
            path.is_file().then_some(path)
        })
        .collect()
}
