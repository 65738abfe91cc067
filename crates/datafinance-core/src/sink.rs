//! Buffered Parquet writer with atomic tmp→rename placement

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use arrow::array::RecordBatch;
use arrow::datatypes::Schema;
use parquet::arrow::ArrowWriter;
use parquet::basic::{Compression, ZstdLevel};
use parquet::file::properties::WriterProperties;

/// Row-group size matching the pipeline batching
pub const ROW_GROUP_SIZE: usize = 50_000;

/// Zstd compression level for all Parquet output
pub const ZSTD_LEVEL: i32 = 3;

/// Shared error flag — the writer thread sets it on failure so senders
/// fast-fail instead of queueing into a dead channel.
pub type ErrorFlag = Arc<AtomicBool>;

/// Streaming Parquet writer targeting `<final>.tmp`; [`finalize`] renames
/// into place, [`abort`] removes the temp file. The final path never names
/// an incomplete file.
///
/// [`finalize`]: ParquetSink::finalize
/// [`abort`]: ParquetSink::abort
pub struct ParquetSink {
    writer: ArrowWriter<File>,
    tmp_path: PathBuf,
    final_path: PathBuf,
    row_count: usize,
}

impl std::fmt::Debug for ParquetSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParquetSink")
            .field("final_path", &self.final_path)
            .field("row_count", &self.row_count)
            .finish_non_exhaustive()
    }
}

impl ParquetSink {
    /// Open a sink for `final_path`, writing to a temporary sibling.
    pub fn create(final_path: &Path, schema: &Arc<Schema>) -> Result<Self, std::io::Error> {
        let tmp_path = crate::http::tmp_sibling(final_path);

        // Clean up stale tmp file
        if tmp_path.exists() {
            fs::remove_file(&tmp_path)?;
        }

        let file = File::create(&tmp_path)?;
        let level = ZstdLevel::try_new(ZSTD_LEVEL)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
        let props = WriterProperties::builder()
            .set_compression(Compression::ZSTD(level))
            .set_max_row_group_size(ROW_GROUP_SIZE)
            .build();

        let writer = ArrowWriter::try_new(file, schema.clone(), Some(props))
            .map_err(std::io::Error::other)?;

        Ok(Self {
            writer,
            tmp_path,
            final_path: final_path.to_path_buf(),
            row_count: 0,
        })
    }

    /// Write a record batch
    pub fn write_batch(&mut self, batch: &RecordBatch) -> Result<(), std::io::Error> {
        self.row_count += batch.num_rows();
        self.writer.write(batch).map_err(std::io::Error::other)
    }

    pub fn row_count(&self) -> usize {
        self.row_count
    }

    /// Finalize: flush footer, fsync, atomically rename tmp → final.
    pub fn finalize(self) -> Result<usize, std::io::Error> {
        let row_count = self.row_count;
        let file = self.writer.into_inner().map_err(std::io::Error::other)?;
        file.sync_all()?;
        drop(file);
        fs::rename(&self.tmp_path, &self.final_path)?;
        Ok(row_count)
    }

    /// Drop the writer and remove the temp file; the final path is untouched.
    pub fn abort(self) {
        let tmp = self.tmp_path.clone();
        drop(self.writer);
        if let Err(e) = fs::remove_file(&tmp) {
            log::warn!("failed to remove aborted tmp file {}: {e}", tmp.display());
        }
    }
}

/// Check if a completed parquet file exists and has a valid footer
pub fn is_valid_parquet(path: &Path) -> bool {
    if !path.exists() {
        return false;
    }
    let file = match File::open(path) {
        Ok(f) => f,
        Err(_) => return false,
    };
    parquet::file::reader::SerializedFileReader::new(file).is_ok()
}

/// Remove stale `.tmp` files in a directory
pub fn cleanup_tmp_files(output_dir: &Path) -> std::io::Result<()> {
    for entry in fs::read_dir(output_dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.extension().is_some_and(|ext| ext == "tmp") {
            log::warn!("Removing stale tmp file: {}", path.display());
            fs::remove_file(&path)?;
        }
    }
    Ok(())
}
