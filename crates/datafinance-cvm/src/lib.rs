//! Datafinance CVM - fundamental stock documents from the CVM open-data portal
//!
//! Downloads per-document-type, per-year ZIP archives in parallel with
//! bounded concurrency, retries, and integrity checks, then converts every
//! inner CSV into a sibling Parquet file under all-or-nothing semantics.

pub mod catalog;
pub mod download;
pub mod extract;
pub mod plan;

pub use catalog::{CvmValidationError, available_docs, doc_url, validate_doc_name};
pub use download::{DEFAULT_MAX_WORKERS, DownloadEngine};
pub use extract::extract;
pub use plan::{DownloadOutcome, DownloadPlan, PlannedFile};
