//! Append-capable Parquet writing with memory-adaptive strategy.
//!
//! Appending rewrites the file through a temp sibling so the final name is
//! only ever a complete Parquet. Under healthy memory the existing file is
//! read in full before rewriting (bulk); under pressure it is copied batch
//! by batch (streaming, bounded memory regardless of file size).

use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use arrow::array::RecordBatch;
use arrow::datatypes::Schema;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;

use crate::error::ExtractError;
use crate::monitor::{ResourceState, monitor};
use crate::sink::{ParquetSink, ROW_GROUP_SIZE};

/// Safety factor over the estimated write size for the free-space check
const FREE_SPACE_FACTOR_PERCENT: u64 = 130;

/// Write `batches` to `path`, appending to any existing content.
///
/// Returns the total row count of the resulting file. The strategy (bulk vs
/// streaming re-read of the existing file) follows the current memory state.
pub fn append_batches(
    path: &Path,
    schema: &Arc<Schema>,
    batches: &[RecordBatch],
) -> Result<usize, ExtractError> {
    let estimate: u64 = batches
        .iter()
        .map(|b| b.get_array_memory_size() as u64)
        .sum();
    ensure_free_space(path, estimate)?;

    let bulk = monitor().state() == ResourceState::Healthy;
    let mut sink =
        ParquetSink::create(path, schema).map_err(|e| ExtractError::from_io(e, path))?;

    let result = copy_existing_then_new(path, batches, &mut sink, bulk);
    match result {
        Ok(()) => sink.finalize().map_err(|e| ExtractError::from_io(e, path)),
        Err(e) => {
            sink.abort();
            Err(e)
        }
    }
}

fn copy_existing_then_new(
    path: &Path,
    batches: &[RecordBatch],
    sink: &mut ParquetSink,
    bulk: bool,
) -> Result<(), ExtractError> {
    if path.exists() {
        let file = File::open(path).map_err(|e| ExtractError::from_io(e, path))?;
        let reader = ParquetRecordBatchReaderBuilder::try_new(file)
            .and_then(|b| b.with_batch_size(ROW_GROUP_SIZE).build())
            .map_err(|e| ExtractError::Extraction {
                path: path.to_path_buf(),
                message: format!("cannot re-read existing parquet: {e}"),
            })?;

        if bulk {
            // Bulk: materialize the existing file, then write everything
            let existing: Vec<RecordBatch> =
                reader
                    .collect::<Result<_, _>>()
                    .map_err(|e| ExtractError::Extraction {
                        path: path.to_path_buf(),
                        message: format!("corrupt batch in existing parquet: {e}"),
                    })?;
            for batch in &existing {
                sink.write_batch(batch)
                    .map_err(|e| ExtractError::from_io(e, path))?;
            }
        } else {
            // Streaming: copy one bounded batch at a time
            for batch in reader {
                let batch = batch.map_err(|e| ExtractError::Extraction {
                    path: path.to_path_buf(),
                    message: format!("corrupt batch in existing parquet: {e}"),
                })?;
                sink.write_batch(&batch)
                    .map_err(|e| ExtractError::from_io(e, path))?;
            }
        }
    }

    for batch in batches {
        sink.write_batch(batch)
            .map_err(|e| ExtractError::from_io(e, path))?;
    }
    Ok(())
}

/// Row count from the Parquet footer, without reading data pages.
pub fn count_rows(path: &Path) -> Result<usize, ExtractError> {
    let file = File::open(path).map_err(|e| ExtractError::from_io(e, path))?;
    let builder =
        ParquetRecordBatchReaderBuilder::try_new(file).map_err(|e| ExtractError::Extraction {
            path: path.to_path_buf(),
            message: format!("cannot read parquet footer: {e}"),
        })?;
    Ok(builder.metadata().file_metadata().num_rows() as usize)
}

/// Refuse the write when the destination filesystem cannot hold the
/// estimated output with a 30% margin. Skipped when the free-space probe is
/// unavailable (non-unix, or statvfs failure).
fn ensure_free_space(path: &Path, estimate: u64) -> Result<(), ExtractError> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let Some(free) = free_bytes(dir) else {
        return Ok(());
    };
    let required = estimate * FREE_SPACE_FACTOR_PERCENT / 100;
    if free < required {
        log::error!(
            "refusing write to {}: {free} bytes free, {required} required",
            path.display()
        );
        return Err(ExtractError::DiskFull {
            path: path.to_path_buf(),
        });
    }
    Ok(())
}

#[cfg(unix)]
fn free_bytes(dir: &Path) -> Option<u64> {
    use std::os::unix::ffi::OsStrExt;

    let cpath = std::ffi::CString::new(dir.as_os_str().as_bytes()).ok()?;
    let mut vfs = std::mem::MaybeUninit::<libc::statvfs>::uninit();
    let rc = unsafe { libc::statvfs(cpath.as_ptr(), vfs.as_mut_ptr()) };
    if rc != 0 {
        return None;
    }
    let vfs = unsafe { vfs.assume_init() };
    Some(vfs.f_bavail as u64 * vfs.f_frsize as u64)
}

#[cfg(not(unix))]
fn free_bytes(_dir: &Path) -> Option<u64> {
    None
}
