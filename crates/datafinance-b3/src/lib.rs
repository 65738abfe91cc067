//! Datafinance B3 - historical quotes from COTAHIST archives
//!
//! Streams fixed-width 245-byte quote lines out of `COTAHIST_A{yyyy}.ZIP`
//! files, filters them by asset-class market codes, decodes implied-decimal
//! prices exactly, and consolidates everything into a single Parquet file
//! under a resource-adaptive concurrency policy.

pub mod asset;
pub mod orchestrator;
pub mod parser;
pub mod record;
pub mod request;
pub mod schema;

#[cfg(test)]
pub(crate) mod testlines;

pub use asset::{B3ValidationError, asset_names, market_codes_for};
pub use orchestrator::{ExtractionReport, execute};
pub use parser::{CotahistParser, ParseCounters, ParseOutcome, SkipReason};
pub use record::{QuoteAccumulator, QuoteRecord};
pub use request::{ExtractionRequest, ProcessingMode};
