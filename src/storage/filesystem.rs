// Copyright 2025 flightlog authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

// Filesystem backend: one active `log.bin` plus rotated siblings in a
// single output directory.

use std::fs::{File, OpenOptions};
use std::io::{IoSlice, Write};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, error, info, warn};

use super::backend::LogBackend;
use crate::reader::read_log_header;

const ACTIVE_FILE_NAME: &str = "log.bin";

/// One rotated sibling considered for deletion.
struct LogFile {
    path: PathBuf,
    idx: u32,
    size: u64,
    takeoff: Option<String>,
}

impl LogFile {
    /// Deletion preference: logs without takeoff go first, then by
    /// ascending index (oldest first).
    fn sort_key(&self) -> (bool, u32) {
        (self.takeoff.as_deref() == Some("1"), self.idx)
    }

    fn flight_str(&self) -> &'static str {
        match self.takeoff.as_deref() {
            Some("1") => "true",
            Some(_) => "false",
            None => "unknown",
        }
    }
}

/// Parse the rotation index out of `log-<idx>.bin` or
/// `log-<idx>-<uuid5>-<date>.bin`.
fn parse_log_idx(file_name: &str) -> Option<u32> {
    let rest = file_name.strip_prefix("log-")?;
    if !file_name.ends_with(".bin") {
        return None;
    }
    let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return None;
    }
    digits.parse().ok()
}

pub struct FileBackend {
    output_dir: PathBuf,
    path: PathBuf,
    file: Option<File>,
    written: u64,
    min_log_id: u32,
}

impl FileBackend {
    pub fn new<P: AsRef<Path>>(output_dir: P) -> Self {
        let output_dir = output_dir.as_ref().to_path_buf();
        let path = output_dir.join(ACTIVE_FILE_NAME);
        Self {
            output_dir,
            path,
            file: None,
            written: 0,
            min_log_id: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Collect rotated siblings with their size and takeoff flag, and
    /// the highest index seen. Also counts the active file.
    fn scan_siblings(&self) -> (Vec<LogFile>, u32, u32) {
        let mut files = Vec::new();
        let mut highest = 0u32;
        let mut count = 1u32; // the active file itself

        let entries = match std::fs::read_dir(&self.output_dir) {
            Ok(entries) => entries,
            Err(err) => {
                error!("read_dir('{}'): {}", self.output_dir.display(), err);
                return (files, highest, count);
            }
        };

        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(idx) = name.to_str().and_then(parse_log_idx) else {
                continue;
            };
            highest = highest.max(idx);
            count += 1;

            let path = self.output_dir.join(&name);
            let size = match std::fs::symlink_metadata(&path) {
                Ok(meta) => meta.len(),
                Err(err) => {
                    debug!("stat '{}' error: {}", path.display(), err);
                    continue;
                }
            };
            let takeoff = read_log_header(&path)
                .ok()
                .and_then(|fields| fields.get("takeoff").map(str::to_string));
            files.push(LogFile {
                path,
                idx,
                size,
                takeoff,
            });
        }

        (files, highest, count)
    }

    fn unlink(&self, log: &LogFile, remove_size: &mut u64) -> bool {
        info!(
            "EVT:LOGS;event='remove';reason='ROTATE';flight='{}';path='{}'",
            log.flight_str(),
            log.path.display()
        );
        match std::fs::remove_file(&log.path) {
            Ok(()) => {
                *remove_size = remove_size.saturating_sub(log.size);
                true
            }
            Err(err) => {
                error!("unlink('{}'): {}", log.path.display(), err);
                false
            }
        }
    }
}

impl LogBackend for FileBackend {
    fn open(&mut self) -> Result<()> {
        if self.file.is_some() {
            anyhow::bail!("'{}' already opened", self.path.display());
        }

        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&self.path)
            .with_context(|| format!("open('{}')", self.path.display()))?;
        self.file = Some(file);
        self.written = 0;

        // sync file creation in directory, errors are non fatal
        match File::open(&self.output_dir) {
            Ok(dir) => {
                if let Err(err) = dir.sync_all() {
                    error!("fsync('{}'): {}", self.output_dir.display(), err);
                }
            }
            Err(err) => error!("open('{}'): {}", self.output_dir.display(), err),
        }

        info!("'{}' opened", self.path.display());
        Ok(())
    }

    fn close(&mut self) {
        if self.file.take().is_some() {
            info!("'{}' closed", self.path.display());
        }
    }

    fn is_opened(&self) -> bool {
        self.file.is_some()
    }

    fn sync(&mut self) {
        if let Some(file) = &self.file {
            if let Err(err) = file.sync_all() {
                error!("fsync('{}'): {}", self.path.display(), err);
            }
        }
    }

    fn size(&self) -> u64 {
        if self.file.is_some() {
            self.written
        } else {
            0
        }
    }

    fn writev(&mut self, bufs: &[&[u8]], quiet: bool) {
        let Some(file) = &mut self.file else {
            return;
        };

        let total: usize = bufs.iter().map(|b| b.len()).sum();
        let slices: Vec<IoSlice<'_>> = bufs.iter().map(|b| IoSlice::new(b)).collect();

        match file.write_vectored(&slices) {
            Err(err) => {
                // 'quiet' flag ignored, we are closing the file
                error!("backend write: {}", err);
                self.close();
            }
            Ok(res) if res < total => {
                // Treat a short write as the device being full
                warn!("backend partial write: {}({})", res, total);
                self.written += res as u64;
                self.close();
            }
            Ok(res) => {
                self.written += res as u64;
                if !quiet {
                    debug!("wrote {} bytes", res);
                }
            }
        }
    }

    fn write_at(&mut self, buf: &[u8], offset: u64) {
        let Some(file) = &self.file else {
            return;
        };

        let mut done = 0usize;
        while done < buf.len() {
            match file.write_at(&buf[done..], offset + done as u64) {
                Ok(0) | Err(_) => {
                    error!("backend pwrite at offset {}", offset);
                    self.close();
                    return;
                }
                Ok(n) => done += n,
            }
        }
    }

    fn rotate(&mut self, remove_size: u64, max_file_count: u32) {
        // If the active file does not exist, rotation is not needed
        if !self.path.exists() {
            return;
        }

        let (mut files, mut highest, mut count) = self.scan_siblings();

        // Delete non-flight logs first, then the others; within a group
        // the oldest (lowest index) goes first.
        files.sort_by_key(LogFile::sort_key);

        let mut remove_size = remove_size;
        let mut it = files.iter();
        while (remove_size > 0 || (max_file_count > 0 && count >= max_file_count)) && count > 1
        {
            match it.next() {
                Some(log) => {
                    if self.unlink(log, &mut remove_size) {
                        count -= 1;
                    }
                }
                None => break,
            }
        }

        if highest > self.min_log_id {
            self.min_log_id = highest;
        } else {
            highest = self.min_log_id;
        }

        // Prefer the uuid+date name when the current header carries both
        let header = read_log_header(&self.path).ok();
        let new_name = match header.as_ref().and_then(|h| {
            let uuid = h.get("ro.boot.uuid").filter(|v| !v.is_empty())?;
            let date = h.get("date").filter(|v| !v.is_empty())?;
            Some((uuid, date))
        }) {
            Some((uuid, date)) => {
                let prefix: String = uuid.chars().take(5).collect();
                format!("log-{}-{}-{}.bin", highest + 1, prefix, date)
            }
            None => format!("log-{}.bin", highest + 1),
        };

        let new_path = self.output_dir.join(new_name);
        info!(
            "Renaming '{}' -> '{}'",
            self.path.display(),
            new_path.display()
        );
        if let Err(err) = std::fs::rename(&self.path, &new_path) {
            if err.kind() != std::io::ErrorKind::NotFound {
                error!(
                    "rename('{}', '{}'): {}",
                    self.path.display(),
                    new_path.display(),
                    err
                );
            }
        }
    }

    fn min_log_id(&self) -> u32 {
        self.min_log_id
    }

    fn set_min_log_id(&mut self, min_log_id: u32) {
        self.min_log_id = min_log_id;
    }

    fn backend_type(&self) -> &str {
        "filesystem"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_log_idx() {
        assert_eq!(parse_log_idx("log-7.bin"), Some(7));
        assert_eq!(parse_log_idx("log-12-abcde-20240102T030405+0000.bin"), Some(12));
        assert_eq!(parse_log_idx("log.bin"), None);
        assert_eq!(parse_log_idx("log-.bin"), None);
        assert_eq!(parse_log_idx("other-3.bin"), None);
        assert_eq!(parse_log_idx("log-3.txt"), None);
    }

    #[test]
    fn test_sort_key_prefers_non_flight() {
        let mk = |idx, takeoff: Option<&str>| LogFile {
            path: PathBuf::from("x"),
            idx,
            size: 0,
            takeoff: takeoff.map(str::to_string),
        };
        let mut files = vec![mk(1, Some("1")), mk(3, Some("0")), mk(2, None)];
        files.sort_by_key(LogFile::sort_key);
        let order: Vec<u32> = files.iter().map(|f| f.idx).collect();
        assert_eq!(order, vec![2, 3, 1]);
    }
}
