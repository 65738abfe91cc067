//! Typed COTAHIST quote records and their Arrow accumulator.
//!
//! Field positions follow the official B3 layout (1-indexed in B3's
//! documentation, 0-indexed slices here). Slicing is bounded: a field beyond the
//! end of a short line decodes as empty and takes its default value.
//! Implied-decimal fields are parsed as integers (the raw digit string is
//! the value in cents), so no float rounding can occur.

use std::sync::Arc;

use arrow::array::{
    ArrayRef, Date32Array, Decimal128Array, Int16Array, Int32Array, Int64Array, RecordBatch,
    StringArray,
};
use chrono::NaiveDate;

use datafinance_core::ziputil::latin1_to_string;

use crate::schema::{self, PRICE_PRECISION, V99_SCALE, VOLUME_PRECISION};

/// One decoded type-01 quote line. Prices and volume are cents (scale 2).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuoteRecord {
    pub trading_date: NaiveDate,
    pub bdi_code: String,
    pub ticker: String,
    pub market_type: String,
    pub short_name: String,
    pub specification: String,
    pub opening_price: i64,
    pub high_price: i64,
    pub low_price: i64,
    pub avg_price: i64,
    pub closing_price: i64,
    pub best_bid_price: i64,
    pub best_ask_price: i64,
    pub trade_count: i32,
    pub total_quantity: i64,
    pub total_volume: i64,
    pub expiration_date: Option<NaiveDate>,
    pub quote_factor: i32,
    pub isin_code: String,
    pub distribution_number: i16,
}

/// Why a line could not be decoded into a [`QuoteRecord`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeError {
    pub field: &'static str,
    pub reason: String,
}

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.reason)
    }
}

/// Bounded slice: out-of-range positions yield an empty field.
fn bounded(line: &[u8], start: usize, end: usize) -> &[u8] {
    let len = line.len();
    let start = start.min(len);
    let end = end.min(len);
    &line[start..end]
}

fn trimmed(field: &[u8]) -> &[u8] {
    let start = field.iter().position(|b| !b.is_ascii_whitespace());
    let end = field.iter().rposition(|b| !b.is_ascii_whitespace());
    match (start, end) {
        (Some(s), Some(e)) => &field[s..=e],
        _ => &[],
    }
}

fn text(line: &[u8], start: usize, end: usize) -> String {
    latin1_to_string(trimmed(bounded(line, start, end)))
}

/// Integer field: empty decodes to zero, garbage is a decode error.
fn int_field<T>(line: &[u8], start: usize, end: usize, name: &'static str) -> Result<T, DecodeError>
where
    T: std::str::FromStr + Default,
    T::Err: std::fmt::Display,
{
    let field = trimmed(bounded(line, start, end));
    if field.is_empty() {
        return Ok(T::default());
    }
    std::str::from_utf8(field)
        .map_err(|e| DecodeError {
            field: name,
            reason: e.to_string(),
        })?
        .parse()
        .map_err(|e: T::Err| DecodeError {
            field: name,
            reason: e.to_string(),
        })
}

/// Implied-decimal V99 field: the raw digits are the value in cents.
fn cents_field(
    line: &[u8],
    start: usize,
    end: usize,
    name: &'static str,
) -> Result<i64, DecodeError> {
    int_field(line, start, end, name)
}

/// Required `YYYYMMDD` date; empty or all-zero is a decode error.
fn required_date(
    line: &[u8],
    start: usize,
    end: usize,
    name: &'static str,
) -> Result<NaiveDate, DecodeError> {
    match optional_date(line, start, end, name)? {
        Some(date) => Ok(date),
        None => Err(DecodeError {
            field: name,
            reason: "missing required date".to_string(),
        }),
    }
}

/// Optional `YYYYMMDD` date; empty or `00000000` decodes to `None`.
fn optional_date(
    line: &[u8],
    start: usize,
    end: usize,
    name: &'static str,
) -> Result<Option<NaiveDate>, DecodeError> {
    let field = trimmed(bounded(line, start, end));
    if field.is_empty() || field == b"00000000" {
        return Ok(None);
    }
    let s = std::str::from_utf8(field).map_err(|e| DecodeError {
        field: name,
        reason: e.to_string(),
    })?;
    NaiveDate::parse_from_str(s, "%Y%m%d")
        .map(Some)
        .map_err(|e| DecodeError {
            field: name,
            reason: format!("invalid date '{s}': {e}"),
        })
}

impl QuoteRecord {
    /// Decode a type-01 line. The caller has already checked the record tag
    /// and applied the market-type filter on positions 1–27.
    pub fn decode(line: &[u8]) -> Result<Self, DecodeError> {
        Ok(Self {
            trading_date: required_date(line, 2, 10, "trading_date")?,
            bdi_code: text(line, 10, 12),
            ticker: text(line, 12, 24),
            market_type: text(line, 24, 27),
            short_name: text(line, 27, 39),
            specification: text(line, 39, 49),
            opening_price: cents_field(line, 56, 69, "opening_price")?,
            high_price: cents_field(line, 69, 82, "high_price")?,
            low_price: cents_field(line, 82, 95, "low_price")?,
            avg_price: cents_field(line, 95, 108, "avg_price")?,
            closing_price: cents_field(line, 108, 121, "closing_price")?,
            best_bid_price: cents_field(line, 121, 134, "best_bid_price")?,
            best_ask_price: cents_field(line, 134, 147, "best_ask_price")?,
            trade_count: int_field(line, 147, 152, "trade_count")?,
            total_quantity: int_field(line, 152, 170, "total_quantity")?,
            total_volume: cents_field(line, 170, 188, "total_volume")?,
            expiration_date: optional_date(line, 202, 210, "expiration_date")?,
            quote_factor: int_field(line, 210, 217, "quote_factor")?,
            isin_code: text(line, 230, 242),
            distribution_number: int_field(line, 242, 245, "distribution_number")?,
        })
    }

    /// Market type read before full decoding, for the early filter.
    pub fn peek_market_type(line: &[u8]) -> String {
        text(line, 24, 27)
    }
}

fn date_to_days(date: NaiveDate) -> i32 {
    let epoch = NaiveDate::from_ymd_opt(1970, 1, 1).expect("valid epoch");
    (date - epoch).num_days() as i32
}

/// Column-oriented buffer collecting records into Arrow batches.
pub struct QuoteAccumulator {
    trading_date: Vec<i32>,
    bdi_code: Vec<String>,
    ticker: Vec<String>,
    market_type: Vec<String>,
    short_name: Vec<String>,
    specification: Vec<String>,
    opening_price: Vec<i128>,
    high_price: Vec<i128>,
    low_price: Vec<i128>,
    avg_price: Vec<i128>,
    closing_price: Vec<i128>,
    best_bid_price: Vec<i128>,
    best_ask_price: Vec<i128>,
    trade_count: Vec<i32>,
    total_quantity: Vec<i64>,
    total_volume: Vec<i128>,
    expiration_date: Vec<Option<i32>>,
    quote_factor: Vec<i32>,
    isin_code: Vec<String>,
    distribution_number: Vec<i16>,
}

impl QuoteAccumulator {
    pub fn new() -> Self {
        Self {
            trading_date: Vec::new(),
            bdi_code: Vec::new(),
            ticker: Vec::new(),
            market_type: Vec::new(),
            short_name: Vec::new(),
            specification: Vec::new(),
            opening_price: Vec::new(),
            high_price: Vec::new(),
            low_price: Vec::new(),
            avg_price: Vec::new(),
            closing_price: Vec::new(),
            best_bid_price: Vec::new(),
            best_ask_price: Vec::new(),
            trade_count: Vec::new(),
            total_quantity: Vec::new(),
            total_volume: Vec::new(),
            expiration_date: Vec::new(),
            quote_factor: Vec::new(),
            isin_code: Vec::new(),
            distribution_number: Vec::new(),
        }
    }

    pub fn push(&mut self, record: QuoteRecord) {
        self.trading_date.push(date_to_days(record.trading_date));
        self.bdi_code.push(record.bdi_code);
        self.ticker.push(record.ticker);
        self.market_type.push(record.market_type);
        self.short_name.push(record.short_name);
        self.specification.push(record.specification);
        self.opening_price.push(record.opening_price.into());
        self.high_price.push(record.high_price.into());
        self.low_price.push(record.low_price.into());
        self.avg_price.push(record.avg_price.into());
        self.closing_price.push(record.closing_price.into());
        self.best_bid_price.push(record.best_bid_price.into());
        self.best_ask_price.push(record.best_ask_price.into());
        self.trade_count.push(record.trade_count);
        self.total_quantity.push(record.total_quantity);
        self.total_volume.push(record.total_volume.into());
        self.expiration_date
            .push(record.expiration_date.map(date_to_days));
        self.quote_factor.push(record.quote_factor);
        self.isin_code.push(record.isin_code);
        self.distribution_number.push(record.distribution_number);
    }

    pub fn len(&self) -> usize {
        self.trading_date.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn price_array(values: Vec<i128>) -> ArrayRef {
        let array = Decimal128Array::from_iter_values(values)
            .with_precision_and_scale(PRICE_PRECISION, V99_SCALE)
            .expect("price precision/scale");
        Arc::new(array)
    }

    /// Drain buffered rows into a `RecordBatch` against the quotes schema.
    pub fn take_batch(&mut self) -> RecordBatch {
        let volume = Decimal128Array::from_iter_values(std::mem::take(&mut self.total_volume))
            .with_precision_and_scale(VOLUME_PRECISION, V99_SCALE)
            .expect("volume precision/scale");

        let arrays: Vec<ArrayRef> = vec![
            Arc::new(Date32Array::from(std::mem::take(&mut self.trading_date))),
            Arc::new(StringArray::from(std::mem::take(&mut self.bdi_code))),
            Arc::new(StringArray::from(std::mem::take(&mut self.ticker))),
            Arc::new(StringArray::from(std::mem::take(&mut self.market_type))),
            Arc::new(StringArray::from(std::mem::take(&mut self.short_name))),
            Arc::new(StringArray::from(std::mem::take(&mut self.specification))),
            Self::price_array(std::mem::take(&mut self.opening_price)),
            Self::price_array(std::mem::take(&mut self.high_price)),
            Self::price_array(std::mem::take(&mut self.low_price)),
            Self::price_array(std::mem::take(&mut self.avg_price)),
            Self::price_array(std::mem::take(&mut self.closing_price)),
            Self::price_array(std::mem::take(&mut self.best_bid_price)),
            Self::price_array(std::mem::take(&mut self.best_ask_price)),
            Arc::new(Int32Array::from(std::mem::take(&mut self.trade_count))),
            Arc::new(Int64Array::from(std::mem::take(&mut self.total_quantity))),
            Arc::new(volume),
            Arc::new(Date32Array::from(std::mem::take(&mut self.expiration_date))),
            Arc::new(Int32Array::from(std::mem::take(&mut self.quote_factor))),
            Arc::new(StringArray::from(std::mem::take(&mut self.isin_code))),
            Arc::new(Int16Array::from(std::mem::take(
                &mut self.distribution_number,
            ))),
        ];
        RecordBatch::try_new(schema::quotes().clone(), arrays).expect("quotes schema mismatch")
    }
}

impl Default for QuoteAccumulator {
    fn default() -> Self {
        Self::new()
    }
}
