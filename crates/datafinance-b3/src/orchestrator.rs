//! COTAHIST extraction orchestration.
//!
//! Discovered archives are processed by semaphore-gated tasks on the rayon
//! pool. Each task streams its single inner TXT through the parser into a
//! per-archive temporary Parquet; only when the archive completes is that
//! file replayed, batch by batch, into a bounded channel drained by a
//! dedicated writer thread holding the consolidated sink. A failed archive
//! therefore contributes no rows, and the output file either is a complete
//! Parquet holding exactly the successful archives' rows or does not exist.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{SyncSender, sync_channel};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use arrow::array::RecordBatch;
use indicatif::ProgressBar;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use serde::Serialize;

use datafinance_core::error::ExtractError;
use datafinance_core::monitor::{ResourceState, monitor};
use datafinance_core::progress::{SharedProgress, fmt_count};
use datafinance_core::semaphore::Semaphore;
use datafinance_core::shutdown::cancellation;
use datafinance_core::sink::{ErrorFlag, ParquetSink, ROW_GROUP_SIZE};
use datafinance_core::ziputil;

use crate::parser::{CotahistParser, ParseCounters, ParseOutcome};
use crate::record::QuoteAccumulator;
use crate::request::ExtractionRequest;
use crate::schema;

/// Lines handed to the parser pool per dispatch in fast mode
pub const PARSE_BATCH_SIZE: usize = 10_000;

/// Desired rows per batch flushed to the per-archive sink; the monitor may
/// lower it
pub const DESIRED_FLUSH_ROWS: usize = 10_000;

/// Outcome of one extraction run.
#[derive(Debug, Serialize)]
pub struct ExtractionReport {
    pub total_files: usize,
    pub success_count: usize,
    pub error_count: usize,
    pub total_records: usize,
    pub batches_written: usize,
    pub errors: BTreeMap<String, String>,
    pub output_file: PathBuf,
    pub elapsed: Duration,
}

impl ExtractionReport {
    pub fn log(&self) {
        log::info!("=== Extraction Summary ===");
        log::info!(
            "Archives: {}/{} completed ({} failed)",
            self.success_count,
            self.total_files,
            self.error_count
        );
        log::info!(
            "Records: {} in {} batches -> {}",
            fmt_count(self.total_records),
            self.batches_written,
            self.output_file.display()
        );
        log::info!("Time: {:.1}s", self.elapsed.as_secs_f64());
        if self.total_records > 0 && self.elapsed.as_secs_f64() > 0.0 {
            let rate = self.total_records as f64 / self.elapsed.as_secs_f64();
            log::info!("Throughput: {rate:.0} rows/sec");
        }
    }
}

/// Run one extraction request to completion.
///
/// Per-archive failures are recorded in the report; only batch-fatal
/// writer failures and the everything-failed case raise.
pub fn execute(
    request: &ExtractionRequest,
    progress: &SharedProgress,
) -> Result<ExtractionReport, ExtractError> {
    let start = Instant::now();
    std::fs::create_dir_all(&request.destination_directory)
        .map_err(|e| ExtractError::from_io(e, &request.destination_directory))?;
    let output = request.output_path();

    if request.discovered_zip_files.is_empty() {
        return Err(ExtractError::Extraction {
            path: request.source_directory.clone(),
            message: format!(
                "no COTAHIST archives found for {}-{}",
                request.first_year, request.last_year
            ),
        });
    }

    let mode = request.processing_mode;
    let host_cpus = std::thread::available_parallelism().map_or(4, |n| n.get());
    let parser_pool = if mode.parallel_parsing() {
        monitor().safe_worker_count(host_cpus)
    } else {
        1
    };
    let zip_permits = monitor()
        .safe_worker_count(mode.max_concurrent_zips())
        .min(request.discovered_zip_files.len())
        .max(1);
    let flush_rows = monitor().safe_batch_size(DESIRED_FLUSH_ROWS);

    log::info!(
        "extraction started: {} archives, mode {mode}, {zip_permits} concurrent, \
         parser pool {parser_pool}, flush at {flush_rows} rows",
        request.discovered_zip_files.len(),
    );

    // Dedicated CPU pool for fast-mode parsing, sized by the monitor
    let parse_pool = if mode.parallel_parsing() {
        match rayon::ThreadPoolBuilder::new()
            .num_threads(parser_pool)
            .build()
        {
            Ok(pool) => Some(Arc::new(pool)),
            Err(e) => {
                log::warn!("falling back to the global rayon pool: {e}");
                None
            }
        }
    } else {
        None
    };

    // Backpressure: replay of completed archives blocks once the writer
    // falls this far behind
    let (tx, rx) = sync_channel::<RecordBatch>(parser_pool * 2);
    let error_flag: ErrorFlag = Arc::new(AtomicBool::new(false));
    let abort_flag = Arc::new(AtomicBool::new(false));

    // Single writer drains the ordered channel into the consolidated sink
    let writer = {
        let output = output.clone();
        let error_flag = error_flag.clone();
        let abort_flag = abort_flag.clone();
        std::thread::spawn(move || -> Result<(usize, usize), io::Error> {
            let mut sink = match ParquetSink::create(&output, schema::quotes()) {
                Ok(sink) => sink,
                Err(e) => {
                    error_flag.store(true, Ordering::Relaxed);
                    return Err(e);
                }
            };
            let mut batches = 0usize;
            for batch in rx.iter() {
                if let Err(e) = sink.write_batch(&batch) {
                    error_flag.store(true, Ordering::Relaxed);
                    sink.abort();
                    return Err(e);
                }
                batches += 1;
            }
            // Channel closed: the orchestrator has decided the run's fate
            if abort_flag.load(Ordering::Relaxed) {
                sink.abort();
                return Ok((0, 0));
            }
            let rows = sink.finalize()?;
            Ok((rows, batches))
        })
    };

    let semaphore = Semaphore::new(zip_permits);
    let successes: Mutex<Vec<(String, usize)>> = Mutex::new(Vec::new());
    let errors: Mutex<BTreeMap<String, String>> = Mutex::new(BTreeMap::new());

    rayon::scope(|s| {
        for zip_path in &request.discovered_zip_files {
            let tx = tx.clone();
            let parse_pool = parse_pool.clone();
            let error_flag = &error_flag;
            let semaphore = &semaphore;
            let successes = &successes;
            let errors = &errors;
            let output = &output;
            s.spawn(move |_| {
                let name = archive_name(zip_path);
                if cancellation().is_requested() {
                    log::info!("{name}: skipped, cancellation requested");
                    return;
                }
                let _permit = semaphore.acquire();
                // Exhausted resources pause dispatch for the breaker cooldown
                if monitor().state() == ResourceState::Exhausted {
                    let cooldown = monitor().limits().circuit_breaker_cooldown;
                    monitor().wait_for(ResourceState::Critical, cooldown);
                }

                let temp_path = per_archive_temp(output, zip_path);
                let pb = progress.file_bar(&name);
                pb.set_message("reading...");
                let started = Instant::now();
                match process_zip(
                    zip_path,
                    &request.target_market_codes,
                    parse_pool.as_deref(),
                    mode.parallel_parsing(),
                    flush_rows,
                    &temp_path,
                    &tx,
                    error_flag,
                    &pb,
                ) {
                    Ok((rows, counters)) => {
                        pb.finish_and_clear();
                        log::info!(
                            "{name}: {} rows from {} lines ({} filtered, {} malformed) in {:.1}s",
                            fmt_count(rows),
                            fmt_count(counters.scanned),
                            counters.filtered,
                            counters.malformed,
                            started.elapsed().as_secs_f64()
                        );
                        successes.lock().unwrap().push((name, rows));
                    }
                    Err(e) => {
                        pb.finish_and_clear();
                        log::error!("{name}: {e}");
                        errors.lock().unwrap().insert(name, e.to_string());
                    }
                }
            });
        }
    });

    let successes = successes.into_inner().unwrap();
    let errors = errors.into_inner().unwrap();
    let total_files = request.discovered_zip_files.len();

    // Nothing extracted anywhere: no output file, aggregate failure
    let all_failed = errors.len() == total_files;
    if all_failed {
        abort_flag.store(true, Ordering::Relaxed);
    }
    drop(tx);

    let writer_result = writer
        .join()
        .map_err(|_| ExtractError::Io(io::Error::other("writer thread panicked")))?;
    let (total_records, batches_written) =
        writer_result.map_err(|e| ExtractError::from_io(e, &output))?;

    if all_failed {
        let detail: Vec<String> = errors
            .iter()
            .map(|(name, message)| format!("{name}: {message}"))
            .collect();
        return Err(ExtractError::Extraction {
            path: request.source_directory.clone(),
            message: format!("all {total_files} archives failed: {}", detail.join("; ")),
        });
    }

    let report = ExtractionReport {
        total_files,
        success_count: successes.len(),
        error_count: errors.len(),
        total_records,
        batches_written,
        errors,
        output_file: output,
        elapsed: start.elapsed(),
    };
    report.log();
    Ok(report)
}

fn archive_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}

/// Temporary per-archive output next to the final file,
/// `<output stem>_<archive stem>_temp.parquet`.
fn per_archive_temp(output: &Path, zip_path: &Path) -> PathBuf {
    let out_stem = output
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "quotes".to_string());
    let zip_stem = zip_path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "archive".to_string());
    output.with_file_name(format!("{out_stem}_{zip_stem}_temp.parquet"))
}

/// Stream one archive into its own temporary Parquet, then replay the
/// completed file into the writer channel. Input order is preserved end to
/// end; a failure leaves neither the temp file nor any rows behind.
#[allow(clippy::too_many_arguments)]
fn process_zip(
    zip_path: &Path,
    targets: &BTreeSet<String>,
    parse_pool: Option<&rayon::ThreadPool>,
    parallel_parsing: bool,
    flush_rows: usize,
    temp_path: &Path,
    tx: &SyncSender<RecordBatch>,
    error_flag: &ErrorFlag,
    pb: &ProgressBar,
) -> Result<(usize, ParseCounters), ExtractError> {
    // Stale temp from a crashed run
    if temp_path.exists() {
        fs::remove_file(temp_path).map_err(|e| ExtractError::from_io(e, temp_path))?;
    }

    let parser = CotahistParser::new(targets);
    let parse_parallel = |lines: &[Vec<u8>]| match parse_pool {
        Some(pool) => pool.install(|| parser.parse_batch_parallel(lines)),
        None => parser.parse_batch_parallel(lines),
    };

    let mut sink = ParquetSink::create(temp_path, schema::quotes())
        .map_err(|e| ExtractError::from_io(e, temp_path))?;
    let mut acc = QuoteAccumulator::new();
    let mut line_buf: Vec<Vec<u8>> = Vec::new();
    let mut counters = ParseCounters::default();
    let mut rows = 0usize;

    let parse_result = (|| -> Result<(), ExtractError> {
        ziputil::read_data_entry_lines(zip_path, |line| {
            if parallel_parsing {
                line_buf.push(line.to_vec());
                if line_buf.len() >= PARSE_BATCH_SIZE {
                    let out = parse_parallel(&line_buf);
                    line_buf.clear();
                    counters.merge(&out.counters);
                    for record in out.records {
                        acc.push(record);
                        rows += 1;
                        if acc.len() >= flush_rows {
                            sink.write_batch(&acc.take_batch())
                                .map_err(|e| ExtractError::from_io(e, temp_path))?;
                        }
                    }
                    pb.set_message(format!("{} rows", fmt_count(rows)));
                }
            } else {
                let outcome = parser.parse_line(line);
                counters.record(&outcome);
                if let ParseOutcome::Record(record) = outcome {
                    acc.push(record);
                    rows += 1;
                    if acc.len() >= flush_rows {
                        sink.write_batch(&acc.take_batch())
                            .map_err(|e| ExtractError::from_io(e, temp_path))?;
                        pb.set_message(format!("{} rows", fmt_count(rows)));
                    }
                }
            }
            Ok(())
        })?;

        // Tail: remaining buffered lines, then the final partial batch
        if !line_buf.is_empty() {
            let out = parse_parallel(&line_buf);
            counters.merge(&out.counters);
            for record in out.records {
                acc.push(record);
                rows += 1;
            }
        }
        if !acc.is_empty() {
            sink.write_batch(&acc.take_batch())
                .map_err(|e| ExtractError::from_io(e, temp_path))?;
        }
        Ok(())
    })();

    if let Err(e) = parse_result {
        sink.abort();
        return Err(e);
    }
    sink.finalize()
        .map_err(|e| ExtractError::from_io(e, temp_path))?;

    // Replay the completed archive into the consolidated writer
    pb.set_message("consolidating...");
    let replayed = replay_into_channel(temp_path, tx, error_flag);
    if let Err(e) = fs::remove_file(temp_path) {
        log::warn!("could not remove temp file {}: {e}", temp_path.display());
    }
    replayed?;

    Ok((rows, counters))
}

/// Send every batch of a completed per-archive file through the bounded
/// channel, fast-failing if the writer already errored.
fn replay_into_channel(
    temp_path: &Path,
    tx: &SyncSender<RecordBatch>,
    error_flag: &ErrorFlag,
) -> Result<(), ExtractError> {
    let file = File::open(temp_path).map_err(|e| ExtractError::from_io(e, temp_path))?;
    let reader = ParquetRecordBatchReaderBuilder::try_new(file)
        .and_then(|b| b.with_batch_size(ROW_GROUP_SIZE).build())
        .map_err(|e| ExtractError::Extraction {
            path: temp_path.to_path_buf(),
            message: format!("cannot re-read archive output: {e}"),
        })?;

    for batch in reader {
        let batch = batch.map_err(|e| ExtractError::Extraction {
            path: temp_path.to_path_buf(),
            message: format!("corrupt batch in archive output: {e}"),
        })?;
        if error_flag.load(Ordering::Relaxed) {
            return Err(ExtractError::Io(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "writer thread failed",
            )));
        }
        tx.send(batch).map_err(|_| {
            ExtractError::Io(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "writer channel closed",
            ))
        })?;
    }
    Ok(())
}
