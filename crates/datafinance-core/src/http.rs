//! HTTP streaming downloads with read-stall detection and atomic placement.
//!
//! Uses async reqwest internally with `tokio::time::timeout` per read, but
//! presents a sync interface for rayon workers. Files are written to a
//! `.tmp` sibling, fsynced, verified against the advertised size/digest,
//! and renamed into place; no partial file ever carries the final name.

use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::Path;
use std::pin::Pin;
use std::sync::LazyLock;
use std::task::Context;
use std::time::{Duration, Instant};

use futures_util::StreamExt;
use md5::{Digest, Md5};
use tokio::io::{AsyncRead, ReadBuf};

use crate::config::net_config;
use crate::error::FetchError;

/// Read timeout for stall detection (no data within the window = stall)
const READ_TIMEOUT: Duration = Duration::from_secs(60);

/// Connect timeout
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Copy chunk size for file writes
const CHUNK_SIZE: usize = 64 * 1024;

/// Shared async HTTP client with connection pooling.
static SHARED_CLIENT: LazyLock<reqwest::Client> = LazyLock::new(|| {
    reqwest::Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .pool_max_idle_per_host(8)
        .build()
        .expect("failed to build HTTP client")
});

/// Get shared HTTP client.
pub fn http_client() -> &'static reqwest::Client {
    &SHARED_CLIENT
}

/// Shared tokio runtime for HTTP operations.
pub static SHARED_RUNTIME: LazyLock<tokio::runtime::Runtime> = LazyLock::new(|| {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .expect("failed to build tokio runtime")
});

/// Result of a completed, verified download.
#[derive(Debug)]
pub struct Downloaded {
    pub bytes_written: u64,
    pub md5_hex: String,
}

/// HTTP GET → streamed response body as a sync reader.
///
/// Returns the reader and the advertised `Content-Length`, if any.
fn open_byte_stream(url: &str) -> Result<(TimeoutReader, Option<u64>), FetchError> {
    let url = url.to_string();
    SHARED_RUNTIME.handle().block_on(async {
        let response = SHARED_CLIENT
            .get(&url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| FetchError::from_reqwest(&e))?;

        let total_bytes = response
            .headers()
            .get(reqwest::header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse().ok());

        let stream = response.bytes_stream();
        let async_reader =
            tokio_util::io::StreamReader::new(stream.map(|result| result.map_err(io::Error::other)));

        Ok((TimeoutReader::new(Box::pin(async_reader)), total_bytes))
    })
}

/// Download `url` to `final_path` with streaming, integrity checks, and
/// atomic rename. `expected_md5` is a lowercase hex digest from a sidecar
/// endpoint when the source advertises one.
pub fn download_to_file(
    url: &str,
    final_path: &Path,
    expected_md5: Option<&str>,
) -> Result<Downloaded, FetchError> {
    let tmp_path = tmp_sibling(final_path);
    // Stale tmp from a previous failed run
    if tmp_path.exists() {
        fs::remove_file(&tmp_path)?;
    }

    let result = stream_to_tmp(url, &tmp_path, expected_md5);
    if result.is_err() {
        let _ = fs::remove_file(&tmp_path);
        return result;
    }

    fs::rename(&tmp_path, final_path).map_err(|e| {
        let _ = fs::remove_file(&tmp_path);
        FetchError::Io(e)
    })?;
    result
}

fn stream_to_tmp(
    url: &str,
    tmp_path: &Path,
    expected_md5: Option<&str>,
) -> Result<Downloaded, FetchError> {
    let (mut reader, content_length) = open_byte_stream(url)?;
    let mut file = File::create(tmp_path)?;
    let mut hasher = Md5::new();
    let mut written = 0u64;
    let deadline = Instant::now() + net_config().total_timeout;
    let mut buf = [0u8; CHUNK_SIZE];

    loop {
        if Instant::now() >= deadline {
            return Err(FetchError::Timeout {
                message: format!(
                    "download exceeded total timeout of {}s: {url}",
                    net_config().total_timeout.as_secs()
                ),
            });
        }
        let n = reader.read(&mut buf).map_err(|e| {
            if e.kind() == io::ErrorKind::TimedOut {
                FetchError::Timeout {
                    message: e.to_string(),
                }
            } else {
                FetchError::Io(e)
            }
        })?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        file.write_all(&buf[..n])?;
        written += n as u64;
    }

    file.flush()?;
    file.sync_all()?;
    drop(file);

    if let Some(expected) = content_length {
        if written != expected {
            return Err(FetchError::Integrity {
                message: format!("size mismatch: got {written} bytes, expected {expected}: {url}"),
            });
        }
    }

    let md5_hex = hex_digest(hasher);
    if let Some(expected) = expected_md5 {
        if !md5_hex.eq_ignore_ascii_case(expected) {
            return Err(FetchError::Integrity {
                message: format!("md5 mismatch: got {md5_hex}, expected {expected}: {url}"),
            });
        }
    }

    Ok(Downloaded {
        bytes_written: written,
        md5_hex,
    })
}

/// Fetch the sidecar digest for `url` from `{url}.md5`, when published.
///
/// Absence (any HTTP error) or an unparsable body yields `None`.
pub fn fetch_sidecar_md5(url: &str) -> Option<String> {
    let sidecar_url = format!("{url}.md5");
    let body = SHARED_RUNTIME.handle().block_on(async {
        let response = SHARED_CLIENT
            .get(&sidecar_url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .ok()?;
        response.text().await.ok()
    })?;
    parse_md5_body(&body)
}

/// Advertised `Content-Length` from a HEAD request, when the server answers.
pub fn fetch_content_length(url: &str) -> Option<u64> {
    let url = url.to_string();
    SHARED_RUNTIME.handle().block_on(async {
        let response = SHARED_CLIENT
            .head(&url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .ok()?;
        response
            .headers()
            .get(reqwest::header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse().ok())
    })
}

/// Compute the MD5 of a local file (for skip-as-success verification).
pub fn file_md5_hex(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Md5::new();
    let mut buf = [0u8; CHUNK_SIZE];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex_digest(hasher))
}

fn hex_digest(hasher: Md5) -> String {
    let digest = hasher.finalize();
    let mut out = String::with_capacity(32);
    for byte in digest {
        use std::fmt::Write as _;
        let _ = write!(out, "{byte:02x}");
    }
    out
}

/// First token of an `.md5` sidecar body, if it looks like an MD5 digest.
fn parse_md5_body(body: &str) -> Option<String> {
    let token = body.split_whitespace().next()?;
    if token.len() == 32 && token.bytes().all(|b| b.is_ascii_hexdigit()) {
        Some(token.to_ascii_lowercase())
    } else {
        None
    }
}

/// Sibling path with `.tmp` appended to the file name.
pub fn tmp_sibling(path: &Path) -> std::path::PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Async-to-sync bridge with a per-read stall timeout.
pub struct TimeoutReader {
    inner: Pin<Box<dyn AsyncRead + Send + Sync>>,
}

impl TimeoutReader {
    fn new(inner: Pin<Box<dyn AsyncRead + Send + Sync>>) -> Self {
        Self { inner }
    }
}

impl Read for TimeoutReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        SHARED_RUNTIME.handle().block_on(async {
            let read_future = async {
                let mut read_buf = ReadBuf::new(buf);
                std::future::poll_fn(|cx: &mut Context<'_>| {
                    Pin::as_mut(&mut self.inner).poll_read(cx, &mut read_buf)
                })
                .await?;
                Ok::<_, io::Error>(read_buf.filled().len())
            };

            match tokio::time::timeout(READ_TIMEOUT, read_future).await {
                Ok(result) => result,
                Err(_) => Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("read stalled for {}s with no data", READ_TIMEOUT.as_secs()),
                )),
            }
        })
    }
}
