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

// Recorder facade: owns the sources, the buffer and the frontend, and
// drives the cooperative polling loop. Everything runs on one task;
// source callbacks must not block.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::Result;
use tracing::{error, info, warn};

use crate::buffer::LogBuffer;
use crate::format::{EntryHeader, LogData, ENTRY_HEADER_SIZE, ID_BASE};
use crate::frontend::{CloseReason, LogFrontend};
use crate::source::{DirectWriter, LogSource, Source};
use crate::storage::FileBackend;

/// Default and maximum polling period.
pub const DEFAULT_PERIOD_MS: u32 = 200;
/// Largest single entry a source may produce per poll.
pub const BLOCKSIZE_ENTRY: usize = 512 * 1024;
/// Buffer threshold that triggers compression.
pub const BLOCKSIZE_COMPRESSION: usize = 2 * 1024 * 1024;
/// Period of the time-based buffer flush.
const FLUSH_PERIOD_MS: u64 = 1000;

/// Persists a lifetime-monotone file index counter across process runs.
pub trait LogIdxManager {
    fn get_index(&self) -> u32;
    fn set_index(&mut self, index: u32);
    fn index_str(&self) -> String;
}

/// Read access to system properties mirrored into the file header.
pub trait PropertyStore {
    /// Value for `key`, empty string when unset.
    fn get(&self, key: &str) -> String;
}

/// One operator-supplied header property, rewritable unless read-only.
pub struct ExtraProperty {
    pub key: String,
    pub reserved: usize,
    pub value: String,
    pub read_only: bool,
    pub(crate) offset: u64,
    pub(crate) size: usize,
}

impl ExtraProperty {
    pub fn new(key: &str, reserved: usize, value: &str, read_only: bool) -> Self {
        Self {
            key: key.to_string(),
            reserved,
            value: value.to_string(),
            read_only,
            offset: 0,
            size: 0,
        }
    }
}

/// Recorder configuration, resolved from the config file by the daemon.
/// Sizes are in bytes; 0 disables the corresponding check.
pub struct RecorderOptions {
    pub output_dir: PathBuf,
    pub encrypted: bool,
    pub pub_key_path: PathBuf,
    pub min_free_space: u64,
    pub max_used_space: u64,
    pub max_log_size: u64,
    pub min_log_size: u64,
    pub max_log_count: u32,
    pub extra_props: Vec<ExtraProperty>,
    pub log_idx_manager: Option<Box<dyn LogIdxManager>>,
    pub properties: Option<Box<dyn PropertyStore>>,
}

impl RecorderOptions {
    pub fn new<P: AsRef<Path>>(output_dir: P) -> Self {
        Self {
            output_dir: output_dir.as_ref().to_path_buf(),
            encrypted: false,
            pub_key_path: PathBuf::new(),
            min_free_space: 0,
            max_used_space: 0,
            max_log_size: 0,
            min_log_size: 0,
            max_log_count: 0,
            extra_props: Vec::new(),
            log_idx_manager: None,
            properties: None,
        }
    }

    pub(crate) fn property(&self, key: &str) -> String {
        self.properties
            .as_ref()
            .map(|store| store.get(key))
            .unwrap_or_default()
    }
}

/// Handle to a registered direct writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirectWriterId(usize);

/// Control surface consumed by plugins and the daemon.
pub trait LogManager {
    /// Register a source; its description is emitted before its first
    /// data entry of every file. Returns the assigned source id.
    fn add_log_source(
        &mut self,
        source: Box<dyn LogSource>,
        plugin: &str,
        name: &str,
        version: u32,
    ) -> u32;

    /// Mark a source for removal at the next safe point.
    fn remove_log_source(&mut self, id: u32);

    /// Get or create the uncompressed side channel for `(plugin,
    /// version)`.
    fn direct_writer(&mut self, plugin: &str, version: u32) -> DirectWriterId;

    /// Write one chunk through a direct writer.
    fn direct_write(&mut self, id: DirectWriterId, buf: &[u8]);

    /// Immediate flush and fsync.
    fn flush(&mut self, reason: &str);

    /// Close with ROTATE and reopen.
    fn rotate(&mut self);

    /// Enable payload MD5 computation for subsequent files.
    fn enable_md5(&mut self);

    /// Open or close based on the flag.
    fn set_enabled(&mut self, enabled: bool);

    /// Poll all due sources; `force` polls everything regardless of
    /// deadlines.
    fn poll_sources(&mut self, force: bool);

    fn update_date(&mut self);
    fn update_flight_id(&mut self, flight_id: &str);
    fn update_gcs_name(&mut self, message: &str);
    fn update_gcs_type(&mut self, message: &str);
    fn update_ref_time(&mut self, message: &str, tv_sec: i64, tv_nsec: i64);
    fn update_takeoff(&mut self, takeoff: bool);
    fn update_extra_property(&mut self, key: &str, value: &str);
}

pub struct Recorder {
    sources: Vec<Source>,
    direct_writers: Vec<DirectWriter>,
    buffer: LogBuffer,
    frontend: LogFrontend,
    id_counter: u32,
    period: u32,
    epoch: Instant,
    now: u64,
    last_flush: u64,
    encrypted: bool,
    pub_key_path: PathBuf,
    enabled: bool,
}

impl Recorder {
    pub fn new(opt: RecorderOptions) -> Self {
        let encrypted = opt.encrypted;
        let pub_key_path = opt.pub_key_path.clone();
        let backend = Box::new(FileBackend::new(&opt.output_dir));

        let mut id_counter = ID_BASE;
        let header_id = id_counter;
        id_counter += 1;
        let footer_id = id_counter;
        id_counter += 1;

        Self {
            sources: Vec::new(),
            direct_writers: Vec::new(),
            buffer: LogBuffer::new(BLOCKSIZE_COMPRESSION, BLOCKSIZE_ENTRY),
            frontend: LogFrontend::new(opt, backend, header_id, footer_id),
            id_counter,
            period: DEFAULT_PERIOD_MS,
            epoch: Instant::now(),
            now: 0,
            last_flush: 0,
            encrypted,
            pub_key_path,
            enabled: true,
        }
    }

    pub fn is_opened(&self) -> bool {
        self.frontend.is_opened()
    }

    pub fn frontend(&self) -> &LogFrontend {
        &self.frontend
    }

    /// Open the log if enabled; called once at daemon startup.
    pub fn start(&mut self) {
        if self.enabled {
            self.open();
        }
    }

    /// Final forced poll, then close with EXITING.
    pub fn stop(&mut self) {
        if self.frontend.is_opened() {
            self.poll_sources(true);
            self.close(CloseReason::Exiting);
        }
    }

    /// Drive the recorder until interrupted: periodic source polling,
    /// SIGUSR1 flushes, SIGUSR2 rotates, ctrl-c/SIGTERM stops.
    pub async fn run(&mut self) -> Result<()> {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigusr1 = signal(SignalKind::user_defined1())?;
        let mut sigusr2 = signal(SignalKind::user_defined2())?;
        let mut sigterm = signal(SignalKind::terminate())?;

        self.start();
        loop {
            let period = Duration::from_millis(self.period as u64);
            tokio::select! {
                _ = tokio::time::sleep(period) => self.poll_sources(false),
                _ = sigusr1.recv() => self.flush("SIGUSR1"),
                _ = sigusr2.recv() => self.rotate(),
                _ = sigterm.recv() => break,
                _ = tokio::signal::ctrl_c() => break,
            }
        }
        self.stop();
        Ok(())
    }

    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    fn open(&mut self) {
        if self.frontend.is_opened() {
            return;
        }

        if let Err(err) = self.frontend.open() {
            error!("failed to open log: {}", err);
            if self.frontend.is_opened() {
                self.frontend.close(CloseReason::Unknown);
            }
            self.buffer.reset();
            return;
        }

        let _ = self.frontend.take_session_restart();
        self.start_session();
    }

    fn close(&mut self, reason: CloseReason) {
        if !self.frontend.is_opened() {
            return;
        }
        self.buffer.flush(&mut self.frontend);
        self.frontend.close(reason);
        self.buffer.reset();
    }

    /// Per-file setup: reset the pipeline, notify every source, and
    /// install a fresh seal context when encryption is on.
    fn start_session(&mut self) {
        self.buffer.reset();

        for source in &mut self.sources {
            source.start_session();
        }
        for writer in &mut self.direct_writers {
            writer.base.start_session();
        }

        if self.encrypted {
            if let Err(err) = self
                .buffer
                .enable_encryption(&self.pub_key_path.clone(), &mut self.frontend)
            {
                error!("failed to enable encryption: {}", err);
                if self.frontend.is_opened() {
                    self.frontend.close(CloseReason::Unknown);
                }
                self.buffer.reset();
            }
        }
    }

    /// Run session start for files the frontend reopened on its own
    /// after a space-triggered close.
    fn check_session_restart(&mut self) {
        if self.frontend.take_session_restart() {
            self.start_session();
        }
    }

    /// Shortest declared period wins, capped at the default.
    fn update_period(&mut self) {
        let mut period = DEFAULT_PERIOD_MS;
        for source in &self.sources {
            if !source.base.pending_remove {
                period = period.min(source.inner.period_ms());
            }
        }
        self.period = period;
    }

    fn push_source_description(&mut self, idx: usize) -> bool {
        let used = {
            let head = self.buffer.write_head();
            let mut data = LogData::new(head);
            if !self.sources[idx].base.fill_description(&mut data) {
                return false;
            }
            data.used()
        };
        self.buffer.push(used, &mut self.frontend);
        self.sources[idx].base.pending_description = false;
        true
    }

    /// Poll one source into the buffer head, in chunks of at most one
    /// entry block, each chunk framed with the source's id.
    fn push_source_data(&mut self, idx: usize) {
        let mut written = 0usize;
        {
            let head = self.buffer.write_head();
            let source = &mut self.sources[idx];

            while head.len() - written > ENTRY_HEADER_SIZE {
                let count = (head.len() - written).min(BLOCKSIZE_ENTRY);
                let chunk = &mut head[written..written + count];
                let (hdr_buf, data_buf) = chunk.split_at_mut(ENTRY_HEADER_SIZE);

                let mut data = LogData::new(data_buf);
                let len = source.inner.read_data(&mut data);
                if len == 0 {
                    break;
                }

                hdr_buf.copy_from_slice(&EntryHeader::new(source.base.id, len as u32).to_bytes());
                written += ENTRY_HEADER_SIZE + len;
            }
        }

        if written > 0 {
            self.buffer.push(written, &mut self.frontend);
        }

        // schedule next poll
        let period = self.sources[idx].inner.period_ms() as u64;
        self.sources[idx].deadline = self.now + period;
    }

    /// Reap sources marked for removal; only called when neither the
    /// source list nor any source is in use.
    fn check_pending_remove(&mut self) {
        self.sources.retain(|source| !source.base.pending_remove);
    }
}

impl LogManager for Recorder {
    fn add_log_source(
        &mut self,
        source: Box<dyn LogSource>,
        plugin: &str,
        name: &str,
        version: u32,
    ) -> u32 {
        let id = self.id_counter;
        self.id_counter += 1;
        let mut src = Source::new(source, id, plugin, name, version);

        // A source added while the file is already open still needs its
        // session start; otherwise open() will do it.
        if self.frontend.is_opened() {
            src.start_session();
        }
        self.sources.push(src);
        id
    }

    fn remove_log_source(&mut self, id: u32) {
        if let Some(source) = self.sources.iter_mut().find(|s| s.base.id == id) {
            source.base.pending_remove = true;
        }
    }

    fn direct_writer(&mut self, plugin: &str, version: u32) -> DirectWriterId {
        if let Some(idx) = self
            .direct_writers
            .iter()
            .position(|w| w.base.plugin == plugin && w.base.version == version)
        {
            return DirectWriterId(idx);
        }

        let id = self.id_counter;
        self.id_counter += 1;
        self.direct_writers.push(DirectWriter::new(id, plugin, version));
        DirectWriterId(self.direct_writers.len() - 1)
    }

    fn direct_write(&mut self, id: DirectWriterId, buf: &[u8]) {
        if let Some(writer) = self.direct_writers.get_mut(id.0) {
            writer.write(&mut self.frontend, buf);
        }
    }

    fn flush(&mut self, reason: &str) {
        if self.frontend.is_opened() {
            info!("flushing and syncing, reason: {}", reason);
            self.buffer.flush(&mut self.frontend);
            self.frontend.sync();
            self.check_session_restart();
        }
    }

    fn rotate(&mut self) {
        self.close(CloseReason::Rotate);
        self.open();
    }

    fn enable_md5(&mut self) {
        self.frontend.enable_md5();
    }

    fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
        if enabled {
            self.open();
        } else {
            self.close(CloseReason::Disabled);
        }
    }

    fn poll_sources(&mut self, force: bool) {
        self.check_session_restart();

        // Early exit if the log is not opened
        if !self.frontend.is_opened() {
            return;
        }
        self.now = self.now_ms();

        // Source periods may have changed
        self.update_period();

        for idx in 0..self.sources.len() {
            if self.sources[idx].base.pending_remove {
                continue;
            }
            if self.now >= self.sources[idx].deadline || force {
                // The description must precede the data in the file
                if self.sources[idx].base.pending_description
                    && !self.push_source_description(idx)
                {
                    continue;
                }

                let t0 = self.now_ms();
                self.push_source_data(idx);
                let t1 = self.now_ms();

                if t1 - t0 > 2 * self.period as u64 {
                    warn!(
                        "polling source {}.{} took {} ms",
                        self.sources[idx].base.plugin,
                        self.sources[idx].base.name,
                        t1 - t0
                    );
                }
            }
        }

        if self.now >= self.last_flush + FLUSH_PERIOD_MS {
            self.buffer.flush(&mut self.frontend);
            self.last_flush = self.now;
        }

        self.check_pending_remove();
        self.check_session_restart();
    }

    fn update_date(&mut self) {
        self.frontend.update_date();
    }

    fn update_flight_id(&mut self, flight_id: &str) {
        self.frontend.update_flight_id(flight_id);
    }

    fn update_gcs_name(&mut self, message: &str) {
        self.frontend.update_gcs_name(message);
    }

    fn update_gcs_type(&mut self, message: &str) {
        self.frontend.update_gcs_type(message);
    }

    fn update_ref_time(&mut self, message: &str, tv_sec: i64, tv_nsec: i64) {
        self.frontend.update_ref_time(message, tv_sec, tv_nsec);
    }

    fn update_takeoff(&mut self, takeoff: bool) {
        self.frontend.update_takeoff(takeoff);
    }

    fn update_extra_property(&mut self, key: &str, value: &str) {
        self.frontend.update_extra_property(key, value);
    }
}
