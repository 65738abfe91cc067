//! Streaming COTAHIST line parser with market-type filtering.
//!
//! The parser is stateless apart from a detailed-log budget and is safe to
//! call from multiple workers; callers aggregate the per-batch counters.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};

use rayon::prelude::*;

use crate::record::{DecodeError, QuoteRecord};

/// Lines longer than this are rejected outright (memory-bomb defense)
pub const MAX_LINE_LEN: usize = 1000;

/// Decode failures logged in detail per parser instance; the rest are
/// only counted
const DETAILED_ERROR_LOG_BUDGET: usize = 10;

/// Result of parsing one raw line.
#[derive(Debug)]
pub enum ParseOutcome {
    Record(QuoteRecord),
    Skip(SkipReason),
}

/// Why a line produced no record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// Type 00/99 header or trailer
    HeaderTrailer,
    /// Record tag other than 00/01/99
    UnknownTag,
    /// Valid quote line outside the requested market codes
    Filtered,
    /// Longer than [`MAX_LINE_LEN`]
    TooLong,
    /// Field-level decode failure
    Malformed(DecodeError),
}

/// Per-batch parse statistics; merged by the caller across batches.
#[derive(Debug, Default, Clone)]
pub struct ParseCounters {
    pub scanned: usize,
    pub emitted: usize,
    pub header_trailer: usize,
    pub unknown_tag: usize,
    pub filtered: usize,
    pub too_long: usize,
    pub malformed: usize,
}

impl ParseCounters {
    pub fn record(&mut self, outcome: &ParseOutcome) {
        self.scanned += 1;
        match outcome {
            ParseOutcome::Record(_) => self.emitted += 1,
            ParseOutcome::Skip(SkipReason::HeaderTrailer) => self.header_trailer += 1,
            ParseOutcome::Skip(SkipReason::UnknownTag) => self.unknown_tag += 1,
            ParseOutcome::Skip(SkipReason::Filtered) => self.filtered += 1,
            ParseOutcome::Skip(SkipReason::TooLong) => self.too_long += 1,
            ParseOutcome::Skip(SkipReason::Malformed(_)) => self.malformed += 1,
        }
    }

    pub fn merge(&mut self, other: &ParseCounters) {
        self.scanned += other.scanned;
        self.emitted += other.emitted;
        self.header_trailer += other.header_trailer;
        self.unknown_tag += other.unknown_tag;
        self.filtered += other.filtered;
        self.too_long += other.too_long;
        self.malformed += other.malformed;
    }
}

/// Records plus counters from one batch of lines.
pub struct BatchOutput {
    pub records: Vec<QuoteRecord>,
    pub counters: ParseCounters,
}

/// Parser for one COTAHIST file, configured with the target TPMERC codes.
pub struct CotahistParser<'a> {
    targets: &'a BTreeSet<String>,
    detailed_errors_logged: AtomicUsize,
}

impl<'a> CotahistParser<'a> {
    pub fn new(targets: &'a BTreeSet<String>) -> Self {
        Self {
            targets,
            detailed_errors_logged: AtomicUsize::new(0),
        }
    }

    /// Parse one raw Latin-1 line.
    ///
    /// The tag and market type live in positions 1–27, so filtered-out
    /// lines never pay for decoding the remainder.
    pub fn parse_line(&self, raw: &[u8]) -> ParseOutcome {
        if raw.len() > MAX_LINE_LEN {
            return ParseOutcome::Skip(SkipReason::TooLong);
        }
        match raw.get(0..2) {
            Some(b"00") | Some(b"99") => return ParseOutcome::Skip(SkipReason::HeaderTrailer),
            Some(b"01") => {}
            _ => return ParseOutcome::Skip(SkipReason::UnknownTag),
        }
        let market_type = QuoteRecord::peek_market_type(raw);
        if !self.targets.contains(&market_type) {
            return ParseOutcome::Skip(SkipReason::Filtered);
        }

        match QuoteRecord::decode(raw) {
            Ok(record) => ParseOutcome::Record(record),
            Err(e) => {
                let logged = self.detailed_errors_logged.fetch_add(1, Ordering::Relaxed);
                if logged < DETAILED_ERROR_LOG_BUDGET {
                    log::warn!("skipping malformed quote line: {e}");
                }
                ParseOutcome::Skip(SkipReason::Malformed(e))
            }
        }
    }

    /// Parse a batch sequentially, preserving input order.
    pub fn parse_batch(&self, lines: &[Vec<u8>]) -> BatchOutput {
        let mut records = Vec::with_capacity(lines.len());
        let mut counters = ParseCounters::default();
        for line in lines {
            let outcome = self.parse_line(line);
            counters.record(&outcome);
            if let ParseOutcome::Record(record) = outcome {
                records.push(record);
            }
        }
        BatchOutput { records, counters }
    }

    /// Parse a batch on the rayon pool, preserving input order.
    pub fn parse_batch_parallel(&self, lines: &[Vec<u8>]) -> BatchOutput {
        let outcomes: Vec<ParseOutcome> =
            lines.par_iter().map(|line| self.parse_line(line)).collect();

        let mut records = Vec::with_capacity(outcomes.len());
        let mut counters = ParseCounters::default();
        for outcome in outcomes {
            counters.record(&outcome);
            if let ParseOutcome::Record(record) = outcome {
                records.push(record);
            }
        }
        BatchOutput { records, counters }
    }
}
