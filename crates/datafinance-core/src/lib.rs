//! Datafinance Core - Shared infrastructure for Brazilian market data pipelines
//!
//! This crate provides the building blocks used by the CVM document and B3
//! historical-quote pipelines: resource monitoring with adaptive concurrency,
//! retry with exponential backoff, streaming HTTP downloads with integrity
//! verification, atomic Parquet sinks, and ZIP line readers.

pub mod config;
pub mod error;
pub mod http;
pub mod logging;
pub mod monitor;
pub mod progress;
pub mod retry;
pub mod semaphore;
pub mod shutdown;
pub mod sink;
pub mod task_queue;
pub mod writer;
pub mod ziputil;

// Re-exports for convenience
pub use config::{NetConfig, net_config};
pub use error::{ExtractError, FetchError};
pub use http::{Downloaded, download_to_file, fetch_content_length, fetch_sidecar_md5};
pub use logging::{Verbosity, init_logging};
pub use monitor::{ResourceLimits, ResourceMonitor, ResourceSnapshot, ResourceState, monitor};
pub use progress::{PipelineProgress, SharedProgress};
pub use retry::{RetryPolicy, retry_with_backoff};
pub use semaphore::{Permit, Semaphore};
pub use shutdown::{Cancellation, cancellation};
pub use sink::{ErrorFlag, ParquetSink, cleanup_tmp_files, is_valid_parquet};
pub use task_queue::TaskQueue;
pub use writer::{append_batches, count_rows};
pub use ziputil::{entries_with_suffix, latin1_to_string, read_data_entry_lines};
