//! Atomic ZIP→Parquet extraction for CVM document archives.
//!
//! Every inner CSV converts to a sibling Parquet, or none do: any per-entry
//! failure rolls back the files created by this call and surfaces a single
//! aggregate error. CSVs follow the CVM convention of semicolon delimiters
//! and Latin-1 encoding; the column schema is inferred per file from a
//! leading sample, preserving source column order.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::array::{ArrayRef, Date32Array, Float64Array, Int64Array, RecordBatch, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use chrono::NaiveDate;

use datafinance_core::error::ExtractError;
use datafinance_core::monitor::monitor;
use datafinance_core::sink::ParquetSink;
use datafinance_core::ziputil::{self, Latin1Reader};

/// Rows read to infer each file's column types
const SAMPLE_ROWS: usize = 100;

/// Desired rows per flushed batch; the monitor may lower it
const DESIRED_BATCH_ROWS: usize = 50_000;

/// Inferred column type for CVM CSV data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColType {
    Int,
    Float,
    Date,
    Text,
}

impl ColType {
    fn arrow_type(self) -> DataType {
        match self {
            Self::Int => DataType::Int64,
            Self::Float => DataType::Float64,
            Self::Date => DataType::Date32,
            Self::Text => DataType::Utf8,
        }
    }
}

/// Convert every `.csv` entry of `zip_path` into
/// `output_dir/<name>.parquet`, transactionally.
///
/// Returns the created Parquet paths in archive order. An archive without
/// CSV entries yields an empty list. On any entry failure every file
/// created by this call is removed and a single aggregate error is raised;
/// disk-full failures propagate immediately with the same rollback.
pub fn extract(zip_path: &Path, output_dir: &Path) -> Result<Vec<PathBuf>, ExtractError> {
    std::fs::create_dir_all(output_dir).map_err(|e| ExtractError::from_io(e, output_dir))?;

    let csv_names = ziputil::entries_with_suffix(zip_path, ".csv")?;
    if csv_names.is_empty() {
        log::warn!("no CSV entries in {}", zip_path.display());
        return Ok(Vec::new());
    }

    let mut created: Vec<PathBuf> = Vec::new();
    let mut failures: Vec<(String, String)> = Vec::new();

    for csv_name in &csv_names {
        let parquet_path = output_dir.join(parquet_name(csv_name));
        match convert_entry(zip_path, csv_name, &parquet_path) {
            Ok(stats) => {
                log::info!(
                    "{csv_name}: {} rows written ({} skipped)",
                    stats.rows_written,
                    stats.rows_skipped
                );
                created.push(parquet_path);
            }
            Err(e) if e.is_batch_fatal() => {
                rollback(&created);
                return Err(e);
            }
            Err(e) => {
                log::error!("failed to convert {csv_name}: {e}");
                failures.push((csv_name.clone(), e.to_string()));
                break;
            }
        }
    }

    if !failures.is_empty() {
        log::warn!(
            "partial extraction detected, rolling back {} files",
            created.len()
        );
        rollback(&created);
        let detail: Vec<String> = failures
            .iter()
            .map(|(name, reason)| format!("{name}: {reason}"))
            .collect();
        return Err(ExtractError::Extraction {
            path: zip_path.to_path_buf(),
            message: format!(
                "atomic extraction failed, all partial data rolled back: {}",
                detail.join("; ")
            ),
        });
    }

    log::info!(
        "extracted {} CSV files from {}",
        created.len(),
        zip_path.display()
    );
    Ok(created)
}

/// Delete rolled-back outputs, logging (not raising) per-delete errors.
fn rollback(created: &[PathBuf]) {
    for path in created {
        if let Err(e) = std::fs::remove_file(path) {
            log::error!("rollback could not remove {}: {e}", path.display());
        } else {
            log::debug!("rolled back {}", path.display());
        }
    }
}

fn parquet_name(csv_name: &str) -> String {
    let base = Path::new(csv_name)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(csv_name);
    format!("{base}.parquet")
}

#[derive(Debug)]
struct ConvertStats {
    rows_written: usize,
    rows_skipped: usize,
}

/// Stream one CSV entry into a typed Parquet file.
fn convert_entry(
    zip_path: &Path,
    csv_name: &str,
    parquet_path: &Path,
) -> Result<ConvertStats, ExtractError> {
    let (headers, types) = infer_entry_schema(zip_path, csv_name)?;

    let fields: Vec<Field> = headers
        .iter()
        .zip(&types)
        .map(|(name, ty)| Field::new(name, ty.arrow_type(), true))
        .collect();
    let schema = Arc::new(Schema::new(fields));

    let mut archive = ziputil::open_archive(zip_path)?;
    let entry = archive
        .by_name(csv_name)
        .map_err(|e| ExtractError::CorruptedZip {
            path: zip_path.to_path_buf(),
            message: format!("{csv_name}: {e}"),
        })?;
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b';')
        .flexible(true)
        .from_reader(Latin1Reader::new(entry));

    let mut sink = ParquetSink::create(parquet_path, &schema)
        .map_err(|e| ExtractError::from_io(e, parquet_path))?;
    let batch_rows = monitor().safe_batch_size(DESIRED_BATCH_ROWS);
    let mut columns = ColumnBuffers::new(&types);
    let mut rows_written = 0usize;
    let mut rows_skipped = 0usize;
    let mut rows_seen = 0usize;

    let result = (|| -> Result<(), ExtractError> {
        for record in reader.records() {
            let record = record.map_err(|e| ExtractError::Extraction {
                path: parquet_path.to_path_buf(),
                message: format!("{csv_name}: malformed CSV row: {e}"),
            })?;
            rows_seen += 1;

            if record.len() != headers.len() || !columns.push_row(&record) {
                rows_skipped += 1;
                if rows_skipped <= 10 {
                    log::debug!("{csv_name}: skipped row {rows_seen} (type conversion)");
                }
                continue;
            }
            if columns.len() >= batch_rows {
                let batch = columns.take_batch(&schema)?;
                rows_written += batch.num_rows();
                sink.write_batch(&batch)
                    .map_err(|e| ExtractError::from_io(e, parquet_path))?;
            }
        }
        if columns.len() > 0 {
            let batch = columns.take_batch(&schema)?;
            rows_written += batch.num_rows();
            sink.write_batch(&batch)
                .map_err(|e| ExtractError::from_io(e, parquet_path))?;
        }
        Ok(())
    })();

    if let Err(e) = result {
        sink.abort();
        return Err(e);
    }

    // A file with rows but none convertible is a failure, not an empty output
    if rows_written == 0 && rows_seen > 0 {
        sink.abort();
        return Err(ExtractError::Extraction {
            path: parquet_path.to_path_buf(),
            message: format!("{csv_name}: no rows survived type conversion ({rows_seen} read)"),
        });
    }

    sink.finalize()
        .map_err(|e| ExtractError::from_io(e, parquet_path))?;
    Ok(ConvertStats {
        rows_written,
        rows_skipped,
    })
}

/// Read headers plus a leading sample and infer per-column types.
fn infer_entry_schema(
    zip_path: &Path,
    csv_name: &str,
) -> Result<(Vec<String>, Vec<ColType>), ExtractError> {
    let mut archive = ziputil::open_archive(zip_path)?;
    let entry = archive
        .by_name(csv_name)
        .map_err(|e| ExtractError::CorruptedZip {
            path: zip_path.to_path_buf(),
            message: format!("{csv_name}: {e}"),
        })?;
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b';')
        .flexible(true)
        .from_reader(Latin1Reader::new(entry));

    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| ExtractError::Extraction {
            path: zip_path.to_path_buf(),
            message: format!("{csv_name}: cannot read CSV header: {e}"),
        })?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();
    if headers.is_empty() {
        return Err(ExtractError::Extraction {
            path: zip_path.to_path_buf(),
            message: format!("{csv_name}: empty CSV header"),
        });
    }

    let mut samples: Vec<Vec<String>> = vec![Vec::new(); headers.len()];
    for record in reader.records().take(SAMPLE_ROWS) {
        let record = record.map_err(|e| ExtractError::Extraction {
            path: zip_path.to_path_buf(),
            message: format!("{csv_name}: cannot sample CSV: {e}"),
        })?;
        if record.len() != headers.len() {
            continue;
        }
        for (column, value) in samples.iter_mut().zip(record.iter()) {
            if !value.trim().is_empty() {
                column.push(value.trim().to_string());
            }
        }
    }

    let types = samples.iter().map(|column| infer_column(column)).collect();
    Ok((headers, types))
}

/// Most specific type every sampled value fits: Int64, then Date32
/// (`%Y-%m-%d`), then Float64, else Utf8. All-empty columns stay Utf8.
fn infer_column(values: &[String]) -> ColType {
    if values.is_empty() {
        return ColType::Text;
    }
    if values.iter().all(|v| v.parse::<i64>().is_ok()) {
        return ColType::Int;
    }
    if values.iter().all(|v| parse_date(v).is_some()) {
        return ColType::Date;
    }
    if values.iter().all(|v| v.parse::<f64>().is_ok()) {
        return ColType::Float;
    }
    ColType::Text
}

fn parse_date(value: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d").ok()
}

fn date_to_days(date: NaiveDate) -> i32 {
    let epoch = NaiveDate::from_ymd_opt(1970, 1, 1).expect("valid epoch");
    (date - epoch).num_days() as i32
}

/// Typed column accumulators matching the inferred schema.
enum ColBuffer {
    Int(Vec<Option<i64>>),
    Float(Vec<Option<f64>>),
    Date(Vec<Option<i32>>),
    Text(Vec<Option<String>>),
}

struct ColumnBuffers {
    buffers: Vec<ColBuffer>,
    rows: usize,
}

impl ColumnBuffers {
    fn new(types: &[ColType]) -> Self {
        let buffers = types
            .iter()
            .map(|ty| match ty {
                ColType::Int => ColBuffer::Int(Vec::new()),
                ColType::Float => ColBuffer::Float(Vec::new()),
                ColType::Date => ColBuffer::Date(Vec::new()),
                ColType::Text => ColBuffer::Text(Vec::new()),
            })
            .collect();
        Self { buffers, rows: 0 }
    }

    fn len(&self) -> usize {
        self.rows
    }

    /// Convert one CSV record; a failed conversion leaves the buffers
    /// unchanged and the row is skipped by the caller.
    fn push_row(&mut self, record: &csv::StringRecord) -> bool {
        let mut staged: Vec<StagedValue> = Vec::with_capacity(self.buffers.len());
        for (buffer, raw) in self.buffers.iter().zip(record.iter()) {
            let value = raw.trim();
            let staged_value = match buffer {
                ColBuffer::Int(_) => {
                    if value.is_empty() {
                        StagedValue::Int(None)
                    } else {
                        match value.parse::<i64>() {
                            Ok(v) => StagedValue::Int(Some(v)),
                            Err(_) => return false,
                        }
                    }
                }
                ColBuffer::Float(_) => {
                    if value.is_empty() {
                        StagedValue::Float(None)
                    } else {
                        match value.parse::<f64>() {
                            Ok(v) => StagedValue::Float(Some(v)),
                            Err(_) => return false,
                        }
                    }
                }
                ColBuffer::Date(_) => {
                    if value.is_empty() {
                        StagedValue::Date(None)
                    } else {
                        match parse_date(value) {
                            Some(d) => StagedValue::Date(Some(date_to_days(d))),
                            None => return false,
                        }
                    }
                }
                ColBuffer::Text(_) => StagedValue::Text(if value.is_empty() {
                    None
                } else {
                    Some(value.to_string())
                }),
            };
            staged.push(staged_value);
        }

        for (buffer, value) in self.buffers.iter_mut().zip(staged) {
            match (buffer, value) {
                (ColBuffer::Int(col), StagedValue::Int(v)) => col.push(v),
                (ColBuffer::Float(col), StagedValue::Float(v)) => col.push(v),
                (ColBuffer::Date(col), StagedValue::Date(v)) => col.push(v),
                (ColBuffer::Text(col), StagedValue::Text(v)) => col.push(v),
                _ => unreachable!("staged value kind matches buffer kind"),
            }
        }
        self.rows += 1;
        true
    }

    fn take_batch(&mut self, schema: &Arc<Schema>) -> Result<RecordBatch, ExtractError> {
        let arrays: Vec<ArrayRef> = self
            .buffers
            .iter_mut()
            .map(|buffer| -> ArrayRef {
                match buffer {
                    ColBuffer::Int(col) => Arc::new(Int64Array::from(std::mem::take(col))),
                    ColBuffer::Float(col) => Arc::new(Float64Array::from(std::mem::take(col))),
                    ColBuffer::Date(col) => Arc::new(Date32Array::from(std::mem::take(col))),
                    ColBuffer::Text(col) => Arc::new(StringArray::from(std::mem::take(col))),
                }
            })
            .collect();
        self.rows = 0;
        RecordBatch::try_new(schema.clone(), arrays).map_err(|e| ExtractError::Extraction {
            path: PathBuf::new(),
            message: format!("schema mismatch building batch: {e}"),
        })
    }
}

enum StagedValue {
    Int(Option<i64>),
    Float(Option<f64>),
    Date(Option<i32>),
    Text(Option<String>),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn infer_int_column() {
        assert_eq!(infer_column(&strings(&["1", "42", "-7"])), ColType::Int);
    }

    #[test]
    fn infer_float_column() {
        assert_eq!(
            infer_column(&strings(&["1.5", "2", "-0.25"])),
            ColType::Float
        );
    }

    #[test]
    fn infer_date_column() {
        assert_eq!(
            infer_column(&strings(&["2023-01-02", "2023-12-31"])),
            ColType::Date
        );
    }

    #[test]
    fn infer_text_column() {
        assert_eq!(
            infer_column(&strings(&["PETR4", "2023-01-02"])),
            ColType::Text
        );
    }

    #[test]
    fn infer_empty_column_is_text() {
        assert_eq!(infer_column(&[]), ColType::Text);
    }

    #[test]
    fn parquet_name_strips_csv_suffix() {
        assert_eq!(parquet_name("dfp_cia_aberta_2023.csv"), "dfp_cia_aberta_2023.parquet");
        assert_eq!(parquet_name("dir/inner.csv"), "inner.parquet");
    }

    #[test]
    fn date_to_days_epoch() {
        let epoch = NaiveDate::from_ymd_opt(1970, 1, 1).unwrap();
        assert_eq!(date_to_days(epoch), 0);
        let next = NaiveDate::from_ymd_opt(1970, 1, 2).unwrap();
        assert_eq!(date_to_days(next), 1);
    }

    #[test]
    fn push_row_rejects_unparsable_typed_value() {
        let types = vec![ColType::Int, ColType::Text];
        let mut buffers = ColumnBuffers::new(&types);

        let good = csv::StringRecord::from(vec!["42", "hello"]);
        assert!(buffers.push_row(&good));
        assert_eq!(buffers.len(), 1);

        let bad = csv::StringRecord::from(vec!["not-a-number", "world"]);
        assert!(!buffers.push_row(&bad));
        // Failed rows leave the buffers unchanged
        assert_eq!(buffers.len(), 1);
    }

    #[test]
    fn push_row_empty_values_become_null() {
        let types = vec![ColType::Int, ColType::Float, ColType::Date];
        let mut buffers = ColumnBuffers::new(&types);
        let record = csv::StringRecord::from(vec!["", "", ""]);
        assert!(buffers.push_row(&record));
        assert_eq!(buffers.len(), 1);
    }
}
