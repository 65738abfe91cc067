//! Parallel download engine for CVM document archives.
//!
//! A rayon scope of monitor-scaled workers pulls `(doc, year, url)` items
//! from a shared queue. Each file is fetched with streaming, integrity
//! verification, and atomic placement; retryable failures back off
//! exponentially, per-URL failures are aggregated without aborting the
//! batch, and disk-full/permission failures abort the whole call.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use datafinance_core::monitor::{ResourceState, monitor};
use datafinance_core::progress::SharedProgress;
use datafinance_core::retry::{RetryPolicy, retry_with_backoff};
use datafinance_core::shutdown::cancellation;
use datafinance_core::task_queue::TaskQueue;
use datafinance_core::{FetchError, http};

use crate::plan::{DownloadOutcome, DownloadPlan};

/// Default worker-pool ceiling; the resource monitor may lower it.
pub const DEFAULT_MAX_WORKERS: usize = 8;

/// One unit of work for the pool.
#[derive(Debug)]
struct DownloadTask {
    doc: String,
    year: u16,
    url: String,
    target: PathBuf,
}

/// Parallel downloader for a validated [`DownloadPlan`].
pub struct DownloadEngine {
    max_workers: usize,
    policy: RetryPolicy,
}

impl Default for DownloadEngine {
    fn default() -> Self {
        Self {
            max_workers: DEFAULT_MAX_WORKERS,
            policy: RetryPolicy::from_env(),
        }
    }
}

impl DownloadEngine {
    pub fn new(max_workers: usize, policy: RetryPolicy) -> Self {
        Self {
            max_workers: max_workers.max(1),
            policy,
        }
    }

    /// Fetch every URL in the plan into `destination_dir/<doc_type>/`.
    ///
    /// Returns the aggregate outcome; only batch-fatal conditions
    /// (destination not writable, disk full) surface as `Err`.
    pub fn download(
        &self,
        plan: &DownloadPlan,
        destination_dir: &Path,
        progress: &SharedProgress,
    ) -> Result<DownloadOutcome, FetchError> {
        let mut tasks = Vec::with_capacity(plan.total_urls());
        for (doc, files) in plan.entries() {
            if files.is_empty() {
                continue;
            }
            let doc_dir = destination_dir.join(doc);
            fs::create_dir_all(&doc_dir).map_err(FetchError::Io)?;
            for file in files {
                tasks.push(DownloadTask {
                    doc: doc.clone(),
                    year: file.year,
                    url: file.url.clone(),
                    target: doc_dir.join(&file.filename),
                });
            }
        }

        let queue = TaskQueue::new(tasks);
        if queue.is_empty() {
            log::warn!("no files to download");
            return Ok(DownloadOutcome::default());
        }

        let workers = monitor()
            .safe_worker_count(self.max_workers)
            .min(queue.len());
        log::info!(
            "starting parallel download of {} files using {workers} workers",
            queue.len()
        );

        let outcome = Mutex::new(DownloadOutcome::default());
        let fatal: Mutex<Option<FetchError>> = Mutex::new(None);

        rayon::scope(|s| {
            for _ in 0..workers {
                s.spawn(|_| {
                    while let Some(task) = queue.claim() {
                        if cancellation().is_requested() || fatal.lock().unwrap().is_some() {
                            break;
                        }
                        // Exhausted resources pause dispatch for the cooldown
                        if monitor().state() == ResourceState::Exhausted {
                            let cooldown = monitor().limits().circuit_breaker_cooldown;
                            monitor().wait_for(ResourceState::Critical, cooldown);
                        }

                        let label = format!("{}_{}", task.doc, task.year);
                        let pb = progress.file_bar(&label);
                        pb.set_message("connecting...");
                        match self.fetch_one(task, &pb) {
                            Ok(()) => {
                                pb.finish_and_clear();
                                outcome.lock().unwrap().add_success(&task.doc, task.year);
                            }
                            Err(e) if e.is_batch_fatal() => {
                                pb.finish_and_clear();
                                log::error!("{label}: fatal for the whole batch: {e}");
                                *fatal.lock().unwrap() = Some(e);
                                break;
                            }
                            Err(e) => {
                                pb.finish_and_clear();
                                outcome
                                    .lock()
                                    .unwrap()
                                    .add_error(&task.doc, task.year, e.to_string());
                            }
                        }
                    }
                });
            }
        });

        if let Some(e) = fatal.into_inner().unwrap() {
            return Err(e);
        }

        let outcome = outcome.into_inner().unwrap();
        log::info!(
            "download completed: {} successful, {} errors",
            outcome.success_count(),
            outcome.error_count()
        );
        Ok(outcome)
    }

    /// Per-file protocol: skip-as-success, else download with retries.
    fn fetch_one(
        &self,
        task: &DownloadTask,
        pb: &indicatif::ProgressBar,
    ) -> Result<(), FetchError> {
        let sidecar_md5 = http::fetch_sidecar_md5(&task.url);

        if can_skip(&task.target, &task.url, sidecar_md5.as_deref()) {
            log::debug!(
                "{}_{}: already present and verified, skipping",
                task.doc,
                task.year
            );
            return Ok(());
        }

        let label = format!("{}_{}", task.doc, task.year);
        let expected = sidecar_md5.as_deref();
        retry_with_backoff(&self.policy, &label, || {
            pb.set_message("downloading...");
            let downloaded = http::download_to_file(&task.url, &task.target, expected)?;
            log::info!(
                "{label}: downloaded {} bytes (md5 {})",
                downloaded.bytes_written,
                downloaded.md5_hex
            );
            Ok(())
        })
    }
}

/// Resume check: an existing non-empty file is kept when it matches the
/// advertised digest or size; with nothing advertised it is trusted.
fn can_skip(target: &Path, url: &str, sidecar_md5: Option<&str>) -> bool {
    let Ok(meta) = fs::metadata(target) else {
        return false;
    };
    if meta.len() == 0 {
        return false;
    }
    if let Some(expected) = sidecar_md5 {
        return match http::file_md5_hex(target) {
            Ok(actual) => actual.eq_ignore_ascii_case(expected),
            Err(_) => false,
        };
    }
    match http::fetch_content_length(url) {
        Some(expected) => meta.len() == expected,
        None => true,
    }
}
