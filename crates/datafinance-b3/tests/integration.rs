//! End-to-end extraction tests over synthetic COTAHIST archives.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::array::{Date32Array, Decimal128Array, StringArray};
use chrono::NaiveDate;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use tempfile::TempDir;
use zip::write::{SimpleFileOptions, ZipWriter};

use datafinance_b3::{ExtractionRequest, ProcessingMode, execute};
use datafinance_core::progress::PipelineProgress;

/// A type-01 quote line with the given trading date, ticker, TPMERC code,
/// and raw 13-character closing price.
fn quote_line(date: &str, ticker: &str, market_type: &str, closing_raw: &str) -> String {
    let mut line = String::with_capacity(245);
    line.push_str("01");
    line.push_str(date);
    line.push_str("02");
    line.push_str(&format!("{ticker:<12}"));
    line.push_str(market_type);
    line.push_str(&format!("{:<12}", "PETROBRAS"));
    line.push_str(&format!("{:<10}", "PN"));
    line.push_str(&" ".repeat(7));
    line.push_str("0000000027500");
    line.push_str("0000000028000");
    line.push_str("0000000027300");
    line.push_str("0000000027700");
    line.push_str(&format!("{closing_raw:>13}"));
    line.push_str("0000000027750");
    line.push_str("0000000027800");
    line.push_str("00150");
    line.push_str("000000000000012300");
    line.push_str("000000000341550000");
    line.push_str(&"0".repeat(13));
    line.push('0');
    line.push_str("00000000");
    line.push_str("0000001");
    line.push_str(&"0".repeat(13));
    line.push_str("BRPETRACNPR6");
    line.push_str("144");
    assert_eq!(line.len(), 245);
    line
}

fn header_line() -> String {
    format!("{:<245}", "00COTAHIST.2023BOVESPA 20230102")
}

fn trailer_line() -> String {
    format!("{:<245}", "99COTAHIST.2023BOVESPA 2023010200000000003")
}

fn write_archive(dir: &Path, year: u16, lines: &[String]) -> PathBuf {
    let path = dir.join(format!("COTAHIST_A{year}.ZIP"));
    let file = File::create(&path).unwrap();
    let mut writer = ZipWriter::new(file);
    writer
        .start_file(
            format!("COTAHIST_A{year}.TXT"),
            SimpleFileOptions::default(),
        )
        .unwrap();
    for line in lines {
        writer.write_all(line.as_bytes()).unwrap();
        writer.write_all(b"\n").unwrap();
    }
    writer.finish().unwrap();
    path
}

fn assets(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

fn read_batches(path: &Path) -> Vec<arrow::array::RecordBatch> {
    let file = File::open(path).unwrap();
    ParquetRecordBatchReaderBuilder::try_new(file)
        .unwrap()
        .build()
        .unwrap()
        .collect::<Result<Vec<_>, _>>()
        .unwrap()
}

fn progress() -> Arc<PipelineProgress> {
    Arc::new(PipelineProgress::hidden())
}

#[test]
fn single_archive_happy_path() {
    let src = TempDir::new().unwrap();
    let dst = TempDir::new().unwrap();
    write_archive(
        src.path(),
        2023,
        &[
            header_line(),
            quote_line("20230102", "PETR4", "010", "0000000002776"),
            trailer_line(),
        ],
    );

    let request = ExtractionRequest::build(
        src.path(),
        dst.path(),
        &assets(&["ações"]),
        2023,
        2023,
        "quotes",
        ProcessingMode::Fast,
    )
    .unwrap();

    let report = execute(&request, &progress()).unwrap();
    assert_eq!(report.total_files, 1);
    assert_eq!(report.success_count, 1);
    assert_eq!(report.error_count, 0);
    assert_eq!(report.total_records, 1);

    let batches = read_batches(&report.output_file);
    let batch = &batches[0];
    assert_eq!(batch.num_rows(), 1);

    let tickers = batch
        .column_by_name("ticker")
        .unwrap()
        .as_any()
        .downcast_ref::<StringArray>()
        .unwrap();
    assert_eq!(tickers.value(0), "PETR4");

    let markets = batch
        .column_by_name("market_type")
        .unwrap()
        .as_any()
        .downcast_ref::<StringArray>()
        .unwrap();
    assert_eq!(markets.value(0), "010");

    // 2776 cents at scale 2 = 27.76 exactly
    let closing = batch
        .column_by_name("closing_price")
        .unwrap()
        .as_any()
        .downcast_ref::<Decimal128Array>()
        .unwrap();
    assert_eq!(closing.value(0), 2776);
    assert_eq!(closing.scale(), 2);

    let dates = batch
        .column_by_name("trading_date")
        .unwrap()
        .as_any()
        .downcast_ref::<Date32Array>()
        .unwrap();
    let epoch = NaiveDate::from_ymd_opt(1970, 1, 1).unwrap();
    let expected = NaiveDate::from_ymd_opt(2023, 1, 2).unwrap();
    assert_eq!(dates.value(0), (expected - epoch).num_days() as i32);
}

#[test]
fn filtered_out_rows_produce_empty_parquet() {
    let src = TempDir::new().unwrap();
    let dst = TempDir::new().unwrap();
    write_archive(
        src.path(),
        2023,
        &[
            header_line(),
            // An options line while the request asks for spot stocks
            quote_line("20230102", "PETRJ110", "070", "0000000000150"),
            trailer_line(),
        ],
    );

    let request = ExtractionRequest::build(
        src.path(),
        dst.path(),
        &assets(&["ações"]),
        2023,
        2023,
        "quotes",
        ProcessingMode::Fast,
    )
    .unwrap();

    let report = execute(&request, &progress()).unwrap();
    assert_eq!(report.total_records, 0);
    assert_eq!(report.success_count, 1);

    // The file exists, is valid, and carries the full schema
    assert!(report.output_file.exists());
    let file = File::open(&report.output_file).unwrap();
    let builder = ParquetRecordBatchReaderBuilder::try_new(file).unwrap();
    assert_eq!(builder.metadata().file_metadata().num_rows(), 0);
    assert_eq!(builder.schema().fields().len(), 20);
}

#[test]
fn multiple_archives_consolidate() {
    let src = TempDir::new().unwrap();
    let dst = TempDir::new().unwrap();
    write_archive(
        src.path(),
        2022,
        &[
            header_line(),
            quote_line("20220103", "PETR4", "010", "0000000002950"),
            quote_line("20220103", "VALE3", "010", "0000000007810"),
            trailer_line(),
        ],
    );
    write_archive(
        src.path(),
        2023,
        &[
            header_line(),
            quote_line("20230102", "PETR4", "010", "0000000002776"),
            trailer_line(),
        ],
    );

    let request = ExtractionRequest::build(
        src.path(),
        dst.path(),
        &assets(&["ações"]),
        2022,
        2023,
        "quotes",
        ProcessingMode::Fast,
    )
    .unwrap();

    let report = execute(&request, &progress()).unwrap();
    assert_eq!(report.total_files, 2);
    assert_eq!(report.success_count, 2);
    assert_eq!(report.total_records, 3);

    let rows: usize = read_batches(&report.output_file)
        .iter()
        .map(|b| b.num_rows())
        .sum();
    assert_eq!(rows, report.total_records);
}

#[test]
fn slow_mode_produces_identical_counts() {
    let src = TempDir::new().unwrap();
    let dst = TempDir::new().unwrap();
    let lines: Vec<String> = std::iter::once(header_line())
        .chain((0..25).map(|i| {
            quote_line(
                "20230102",
                &format!("TICK{i}"),
                "010",
                "0000000001000",
            )
        }))
        .chain(std::iter::once(trailer_line()))
        .collect();
    write_archive(src.path(), 2023, &lines);

    let request = ExtractionRequest::build(
        src.path(),
        dst.path(),
        &assets(&["ações"]),
        2023,
        2023,
        "quotes",
        ProcessingMode::Slow,
    )
    .unwrap();

    let report = execute(&request, &progress()).unwrap();
    assert_eq!(report.total_records, 25);
}

#[test]
fn per_archive_failure_does_not_abort_batch() {
    let src = TempDir::new().unwrap();
    let dst = TempDir::new().unwrap();
    write_archive(
        src.path(),
        2022,
        &[
            header_line(),
            quote_line("20220103", "PETR4", "010", "0000000002950"),
            trailer_line(),
        ],
    );
    // Not a ZIP at all
    std::fs::write(src.path().join("COTAHIST_A2023.ZIP"), b"garbage").unwrap();

    let request = ExtractionRequest::build(
        src.path(),
        dst.path(),
        &assets(&["ações"]),
        2022,
        2023,
        "quotes",
        ProcessingMode::Fast,
    )
    .unwrap();

    let report = execute(&request, &progress()).unwrap();
    assert_eq!(report.total_files, 2);
    assert_eq!(report.success_count, 1);
    assert_eq!(report.error_count, 1);
    assert_eq!(report.total_records, 1);
    assert!(report.errors.keys().any(|k| k.contains("2023")));
}

#[test]
fn all_archives_failing_raises_and_leaves_no_output() {
    let src = TempDir::new().unwrap();
    let dst = TempDir::new().unwrap();
    std::fs::write(src.path().join("COTAHIST_A2022.ZIP"), b"junk").unwrap();
    std::fs::write(src.path().join("COTAHIST_A2023.ZIP"), b"junk").unwrap();

    let request = ExtractionRequest::build(
        src.path(),
        dst.path(),
        &assets(&["ações"]),
        2022,
        2023,
        "quotes",
        ProcessingMode::Fast,
    )
    .unwrap();

    let result = execute(&request, &progress());
    assert!(result.is_err());
    assert!(!dst.path().join("quotes.parquet").exists());
    // No temp leftovers either
    let leftovers: Vec<_> = std::fs::read_dir(dst.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .collect();
    assert!(leftovers.is_empty(), "leftovers: {leftovers:?}");
}

#[test]
fn no_archives_discovered_raises() {
    let src = TempDir::new().unwrap();
    let dst = TempDir::new().unwrap();

    let request = ExtractionRequest::build(
        src.path(),
        dst.path(),
        &assets(&["ações"]),
        2020,
        2021,
        "quotes",
        ProcessingMode::Fast,
    )
    .unwrap();

    assert!(execute(&request, &progress()).is_err());
}

#[test]
fn multi_entry_archive_is_a_per_file_failure() {
    let src = TempDir::new().unwrap();
    let dst = TempDir::new().unwrap();

    let path = src.path().join("COTAHIST_A2023.ZIP");
    let file = File::create(&path).unwrap();
    let mut writer = ZipWriter::new(file);
    for name in ["COTAHIST_A2023.TXT", "EXTRA.TXT"] {
        writer.start_file(name, SimpleFileOptions::default()).unwrap();
        writer
            .write_all(quote_line("20230102", "PETR4", "010", "0000000002776").as_bytes())
            .unwrap();
    }
    writer.finish().unwrap();

    let request = ExtractionRequest::build(
        src.path(),
        dst.path(),
        &assets(&["ações"]),
        2023,
        2023,
        "quotes",
        ProcessingMode::Fast,
    )
    .unwrap();

    let result = execute(&request, &progress());
    assert!(result.is_err(), "single failing archive with zero rows raises");
}

#[test]
fn malformed_lines_are_counted_not_fatal() {
    let src = TempDir::new().unwrap();
    let dst = TempDir::new().unwrap();
    write_archive(
        src.path(),
        2023,
        &[
            header_line(),
            quote_line("20230102", "PETR4", "010", "0000000002776"),
            // Missing required trading date
            quote_line("00000000", "VALE3", "010", "0000000007810"),
            trailer_line(),
        ],
    );

    let request = ExtractionRequest::build(
        src.path(),
        dst.path(),
        &assets(&["ações"]),
        2023,
        2023,
        "quotes",
        ProcessingMode::Fast,
    )
    .unwrap();

    let report = execute(&request, &progress()).unwrap();
    assert_eq!(report.success_count, 1);
    assert_eq!(report.total_records, 1);
}
