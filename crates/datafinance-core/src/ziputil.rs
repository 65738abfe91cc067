//! ZIP archive access: entry listing and streaming line reads.
//!
//! B3 and CVM archives are Latin-1 encoded; decoding helpers here are exact
//! (Latin-1 bytes map 1:1 onto Unicode code points).

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use zip::ZipArchive;

use crate::error::ExtractError;

/// Read buffer size for streaming an inner entry
const READ_BUF_SIZE: usize = 8 * 1024;

/// Decode a Latin-1 byte slice into an owned string.
pub fn latin1_to_string(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}

/// Open an archive, mapping open/enumeration failures to `CorruptedZip`.
pub fn open_archive(zip_path: &Path) -> Result<ZipArchive<File>, ExtractError> {
    let file = File::open(zip_path).map_err(|e| ExtractError::from_io(e, zip_path))?;
    ZipArchive::new(file).map_err(|e| ExtractError::CorruptedZip {
        path: zip_path.to_path_buf(),
        message: e.to_string(),
    })
}

/// Names of non-directory entries whose lowercased name ends with `suffix`,
/// in archive order.
pub fn entries_with_suffix(zip_path: &Path, suffix: &str) -> Result<Vec<String>, ExtractError> {
    let mut archive = open_archive(zip_path)?;
    let mut names = Vec::new();
    for i in 0..archive.len() {
        let entry = archive.by_index(i).map_err(|e| ExtractError::CorruptedZip {
            path: zip_path.to_path_buf(),
            message: format!("entry {i}: {e}"),
        })?;
        if entry.is_dir() {
            continue;
        }
        if entry.name().to_lowercase().ends_with(suffix) {
            names.push(entry.name().to_string());
        }
    }
    Ok(names)
}

/// Stream the lines of the single data entry of a quote archive.
///
/// The archive must hold exactly one non-directory entry; zero or several is
/// a per-file failure. Lines are split on `\n` through an 8 KiB buffer with
/// a remainder carried across reads; a trailing `\r` is stripped; empty
/// lines are dropped. Returns the number of lines fed to the callback.
pub fn read_data_entry_lines<F>(zip_path: &Path, mut on_line: F) -> Result<u64, ExtractError>
where
    F: FnMut(&[u8]) -> Result<(), ExtractError>,
{
    let mut archive = open_archive(zip_path)?;

    let data_entries: Vec<usize> = (0..archive.len())
        .filter(|&i| {
            archive
                .by_index(i)
                .map(|e| !e.is_dir())
                .unwrap_or(false)
        })
        .collect();
    let index = match data_entries.as_slice() {
        [only] => *only,
        [] => {
            return Err(ExtractError::Extraction {
                path: zip_path.to_path_buf(),
                message: "no data entry in archive".to_string(),
            });
        }
        many => {
            return Err(ExtractError::Extraction {
                path: zip_path.to_path_buf(),
                message: format!("expected exactly one data entry, found {}", many.len()),
            });
        }
    };

    let mut entry = archive.by_index(index).map_err(|e| ExtractError::CorruptedZip {
        path: zip_path.to_path_buf(),
        message: e.to_string(),
    })?;

    let mut lines = 0u64;
    let mut remainder: Vec<u8> = Vec::new();
    let mut buf = [0u8; READ_BUF_SIZE];

    loop {
        let n = entry
            .read(&mut buf)
            .map_err(|e| ExtractError::from_io(e, zip_path))?;
        if n == 0 {
            break;
        }
        remainder.extend_from_slice(&buf[..n]);

        // Emit every complete line in the buffer, keep the tail
        let mut start = 0;
        while let Some(pos) = find_newline(&remainder[start..]) {
            let end = start + pos;
            let line = trim_line(&remainder[start..end]);
            if !line.is_empty() {
                on_line(line)?;
                lines += 1;
            }
            start = end + 1;
        }
        remainder.drain(..start);
    }

    let line = trim_line(&remainder);
    if !line.is_empty() {
        on_line(line)?;
        lines += 1;
    }

    Ok(lines)
}

fn find_newline(bytes: &[u8]) -> Option<usize> {
    bytes.iter().position(|&b| b == b'\n')
}

fn trim_line(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    // Whitespace-only lines count as empty
    if line.iter().all(|b| b.is_ascii_whitespace()) {
        &[]
    } else {
        line
    }
}

/// Sync reader adapter transcoding Latin-1 bytes into UTF-8 on the fly.
///
/// Bytes ≥ 0x80 widen to two UTF-8 bytes; when the output buffer can only
/// hold the first, the second is held over to the next read.
pub struct Latin1Reader<R: Read> {
    inner: R,
    carry: Option<u8>,
    eof: bool,
}

impl<R: Read> Latin1Reader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            carry: None,
            eof: false,
        }
    }
}

impl<R: Read> Read for Latin1Reader<R> {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        if out.is_empty() {
            return Ok(0);
        }
        let mut written = 0;
        if let Some(b) = self.carry.take() {
            out[written] = b;
            written += 1;
        }
        if self.eof {
            return Ok(written);
        }

        // Each input byte expands to at most two output bytes
        let want = ((out.len() - written) / 2).max(1);
        let mut raw = vec![0u8; want.min(READ_BUF_SIZE)];
        let n = self.inner.read(&mut raw)?;
        if n == 0 {
            self.eof = true;
            return Ok(written);
        }

        for &b in &raw[..n] {
            if b < 0x80 {
                if written < out.len() {
                    out[written] = b;
                    written += 1;
                } else {
                    self.carry = Some(b);
                    break;
                }
            } else {
                let first = 0xC0 | (b >> 6);
                let second = 0x80 | (b & 0x3F);
                if written < out.len() {
                    out[written] = first;
                    written += 1;
                } else {
                    // Cannot happen for the first byte given want >= 1, but
                    // keep the carry path total
                    self.carry = Some(first);
                    break;
                }
                if written < out.len() {
                    out[written] = second;
                    written += 1;
                } else {
                    self.carry = Some(second);
                    break;
                }
            }
        }
        Ok(written)
    }
}
