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

// Session frontend: sits between the recorder and the backend to handle
// the file header/footer, in-place rewritable header fields, payload
// MD5, and the space/quota/size policy with automatic re-open.

use std::fmt;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

use anyhow::Result;
use md5::{Digest, Md5};
use tracing::{error, info, warn};

use crate::format::{
    string_wire_size, EntryHeader, LogData, SourceDesc, ENTRY_HEADER_SIZE, FILE_HEADER_SIZE,
    FILE_MAGIC, FILE_VERSION,
};
use crate::recorder::RecorderOptions;
use crate::storage::LogBackend;

/// Reason written in the footer when a file is closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Unknown reason
    Unknown,
    /// Default value at init and while the file has not been closed
    NotClosed,
    /// Normal close, the daemon is exiting
    Exiting,
    /// Logging is temporarily disabled
    Disabled,
    /// No space left on storage
    NoSpaceLeft,
    /// File is too big
    FileTooBig,
    /// Max space reserved for logs has been reached
    QuotaReached,
    /// Rotation of files will be done
    Rotate,
}

impl CloseReason {
    pub fn as_str(self) -> &'static str {
        match self {
            CloseReason::Unknown => "UNKNOWN",
            CloseReason::NotClosed => "NOT_CLOSED",
            CloseReason::Exiting => "EXITING",
            CloseReason::Disabled => "DISABLED",
            CloseReason::NoSpaceLeft => "NO_SPACE_LEFT",
            CloseReason::FileTooBig => "FILE_TOO_BIG",
            CloseReason::QuotaReached => "QUOTA_REACHED",
            CloseReason::Rotate => "ROTATE",
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Initial value of `reftime.monotonic`, rewritten once the reference
/// time is actually known.
pub const DEFAULT_REFTIME_MSG: &str = "EVT:TIME;date='1970-01-01';time='T000000+0200'";
/// Initial value of `reftime.absolute`, twenty zeros.
pub const TIME_ZERO: &str = "00000000000000000000";

/// Reserved value sizes of the rewritable header fields.
const FLIGHT_ID_SIZE: usize = 32;
const GCS_FIELD_SIZE: usize = 128;
const MD5_HEX_SIZE: usize = 32;
const DATE_FIELD_SIZE: usize = 25;
const MONOTONIC_FIELD_SIZE: usize = 64;
const ABSOLUTE_FIELD_SIZE: usize = 20;
const TAKEOFF_FIELD_SIZE: usize = 1;

/// System property keys copied verbatim into each file header, in order.
const SYS_PROPS: &[&str] = &[
    "ro.hardware",
    "ro.product.model",
    "ro.product.model.id",
    "ro.product.manufacturer",
    "ro.build.date",
    "ro.build.version",
    "ro.boot.uuid",
    "ro.factory.serial",
    "ro.revision",
    "ro.mech.revision",
    "ro.smartbattery.version",
    "ro.smartbattery.hw_version",
    "ro.smartbattery.serial",
    "ro.smartbattery.design_cap",
    "ro.smartbattery.device_name",
    "ro.smartbattery.cycle_count",
    "ro.smartbattery.soh",
    "ro.esc.fw_version",
    "ro.esc.hw_version",
];

/// Cached location of a rewritable header field in the current file.
/// An offset of zero means the field cannot (or can no longer) be
/// rewritten.
#[derive(Debug, Clone, Copy, Default)]
struct FieldState {
    off: u64,
    size: usize,
}

#[derive(Debug, Clone, Copy)]
enum Rewritable {
    FlightId,
    Takeoff,
    Date,
    Md5,
    Monotonic,
    Absolute,
    GcsName,
    GcsType,
}

pub struct LogFrontend {
    opt: RecorderOptions,
    backend: Box<dyn LogBackend>,
    header_desc: SourceDesc,
    footer_desc: SourceDesc,

    monotonic: String,
    absolute: String,
    gcs_name: String,
    gcs_type: String,
    takeoff: bool,

    flight_id_field: FieldState,
    takeoff_field: FieldState,
    date_field: FieldState,
    md5_field: FieldState,
    monotonic_field: FieldState,
    absolute_field: FieldState,
    gcs_name_field: FieldState,
    gcs_type_field: FieldState,

    md5_enabled: bool,
    md5: Option<Md5>,

    index: u32,
    used_space: u64,
    remove_size: u64,
    close_reason: CloseReason,
    closing: bool,
    check_space: bool,
    pending_session_start: bool,
}

impl LogFrontend {
    pub fn new(
        opt: RecorderOptions,
        backend: Box<dyn LogBackend>,
        header_id: u32,
        footer_id: u32,
    ) -> Self {
        info!(
            "minFreeSpace={} maxUsedSpace={} maxLogSize={} minLogSize={} maxLogCount={}",
            opt.min_free_space, opt.max_used_space, opt.max_log_size, opt.min_log_size,
            opt.max_log_count
        );
        Self {
            header_desc: SourceDesc::new(header_id, "internal", "header", FILE_VERSION),
            footer_desc: SourceDesc::new(footer_id, "internal", "footer", FILE_VERSION),
            opt,
            backend,
            monotonic: DEFAULT_REFTIME_MSG.to_string(),
            absolute: TIME_ZERO.to_string(),
            gcs_name: String::new(),
            gcs_type: String::new(),
            takeoff: false,
            flight_id_field: FieldState::default(),
            takeoff_field: FieldState::default(),
            date_field: FieldState::default(),
            md5_field: FieldState::default(),
            monotonic_field: FieldState::default(),
            absolute_field: FieldState::default(),
            gcs_name_field: FieldState::default(),
            gcs_type_field: FieldState::default(),
            md5_enabled: false,
            md5: None,
            index: 0,
            used_space: 0,
            remove_size: 0,
            close_reason: CloseReason::NotClosed,
            closing: false,
            check_space: false,
            pending_session_start: false,
        }
    }

    pub fn enable_md5(&mut self) {
        self.md5_enabled = true;
    }

    pub fn is_opened(&self) -> bool {
        self.backend.is_opened()
    }

    pub fn close_reason(&self) -> CloseReason {
        self.close_reason
    }

    /// True once after each successful open; the recorder uses this to
    /// run its session-start work (buffer reset, source notification,
    /// re-keying) for files the frontend reopened on its own.
    pub fn take_session_restart(&mut self) -> bool {
        std::mem::take(&mut self.pending_session_start)
    }

    /// Open the backend and write the file header. Illegal while open.
    pub fn open(&mut self) -> Result<()> {
        if self.is_opened() {
            anyhow::bail!("log already opened");
        }

        // Compute the size to reclaim from the previous session
        if self.close_reason == CloseReason::NotClosed {
            self.update_remove_size();
        }

        // Forward the lifetime dependent index to the backend, rotate
        // away the previous file, then read the updated floor back so
        // the persisted counter keeps up with preexisting siblings.
        if let Some(mgr) = &self.opt.log_idx_manager {
            self.backend.set_min_log_id(mgr.get_index());
        }
        self.backend.rotate(self.remove_size, self.opt.max_log_count);
        if let Some(mgr) = &mut self.opt.log_idx_manager {
            mgr.set_index(self.backend.min_log_id());
        }

        self.backend.open()?;

        if self.md5_enabled {
            self.md5 = Some(Md5::new());
        }

        self.used_space = dir_size(&self.opt.output_dir);
        self.close_reason = CloseReason::NotClosed;
        self.write_header();
        self.pending_session_start = true;
        Ok(())
    }

    /// Write the footer with the given reason, finalize MD5, sync and
    /// close. Idempotent while closing or already closed.
    pub fn close(&mut self, reason: CloseReason) {
        if !self.is_opened() || self.closing {
            return;
        }

        self.closing = true;
        self.close_reason = reason;
        self.write_footer(reason);
        info!(
            "closing log, reason: {} ({} bytes written)",
            reason,
            self.backend.size()
        );

        if let Some(ctx) = self.md5.take() {
            let digest = ctx.finalize();
            let hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
            self.patch(Rewritable::Md5, &hex, "md5");
        }

        self.backend.sync();

        // Keep usedSpace accurate without re-measuring the directory
        self.used_space += self.backend.size();

        self.backend.close();
        self.closing = false;
    }

    pub fn sync(&mut self) {
        self.backend.sync();
    }

    /// Append payload bytes, then enforce the space policy.
    pub fn write(&mut self, buf: &[u8], quiet: bool) {
        self.writev(&[buf], quiet, false);
    }

    /// Append bytes straight to the backend, bypassing MD5 and the
    /// space checks. Used by direct writers to avoid feedback loops.
    pub fn direct_write(&mut self, bufs: &[&[u8]]) {
        self.backend.writev(bufs, true);
    }

    pub(crate) fn writev(&mut self, bufs: &[&[u8]], quiet: bool, is_header: bool) {
        if !self.is_opened() {
            return;
        }

        if !is_header {
            if let Some(ctx) = &mut self.md5 {
                for buf in bufs {
                    ctx.update(buf);
                }
            }
        }

        // Always write this buffer, check limits after
        self.backend.writev(bufs, quiet);

        if !self.check_space {
            return;
        }

        self.remove_size = 0;

        // If the log got too big, close right away so that the space
        // checks below account for the room needed by the next file.
        if self.log_size_exceeded() {
            self.close(CloseReason::FileTooBig);
        }

        let mut reason = None;
        if self.update_remove_size_for_free_space(quiet) {
            reason = Some(CloseReason::NoSpaceLeft);
        }
        if self.update_remove_size_for_used_space(quiet) {
            reason = Some(CloseReason::QuotaReached);
        }
        if let Some(reason) = reason {
            if self.is_opened() {
                self.close(reason);
            }
        }

        // Open a new file if the current one has been closed
        if !self.is_opened() {
            if let Err(err) = self.open() {
                error!("failed to reopen log: {}", err);
            }
        }
    }

    fn write_header(&mut self) {
        let mut ok = true;

        let mut file_hdr = [0u8; FILE_HEADER_SIZE];
        file_hdr[0..4].copy_from_slice(&FILE_MAGIC.to_le_bytes());
        file_hdr[4..8].copy_from_slice(&FILE_VERSION.to_le_bytes());

        let desc_entry = self.header_desc.to_entry_bytes();

        // Absolute file offset where the header entry payload starts
        let prev = (FILE_HEADER_SIZE + desc_entry.len() + ENTRY_HEADER_SIZE) as u64;

        let mut payload = vec![0u8; 4096];
        let mut data = LogData::new(&mut payload);

        // Ever-incrementing in-process file index
        ok &= data.push_str("index") && data.push_str(&self.index.to_string());
        self.index += 1;

        // System properties included in the file header
        for key in SYS_PROPS {
            let value = self.opt.property(key);
            ok &= data.push_str(key) && data.push_str(&value);
        }

        let mut flight_id = truncate(&self.opt.property("control.flight.uuid"), FLIGHT_ID_SIZE);
        if flight_id.is_empty() {
            flight_id = "F".repeat(FLIGHT_ID_SIZE);
        }
        self.flight_id_field = push_tracked(
            &mut data,
            "control.flight.uuid",
            &flight_id,
            FLIGHT_ID_SIZE,
            prev,
            &mut ok,
        );

        for prop in &mut self.opt.extra_props {
            let reserved = prop.reserved.max(prop.value.len());
            let state = push_tracked(&mut data, &prop.key, &prop.value, reserved, prev, &mut ok);
            if !prop.read_only {
                prop.offset = state.off;
                prop.size = state.size;
            }
        }

        if let Some(mgr) = &self.opt.log_idx_manager {
            ok &= data.push_str("lifetime.index") && data.push_str(&mgr.index_str());
        }

        // Current date/time; remembered so it can be rewritten once the
        // system clock is known to be valid
        let date = current_date();
        self.date_field = push_tracked(&mut data, "date", &date, DATE_FIELD_SIZE, prev, &mut ok);

        let gcs_name = self.gcs_name.clone();
        self.gcs_name_field =
            push_tracked(&mut data, "gcs.name", &gcs_name, GCS_FIELD_SIZE, prev, &mut ok);
        let gcs_type = self.gcs_type.clone();
        self.gcs_type_field =
            push_tracked(&mut data, "gcs.type", &gcs_type, GCS_FIELD_SIZE, prev, &mut ok);

        // Sentinel md5, rewritten in place when the file is closed
        let md5_init = "f".repeat(MD5_HEX_SIZE);
        self.md5_field = push_tracked(&mut data, "md5", &md5_init, MD5_HEX_SIZE, prev, &mut ok);

        let monotonic = self.monotonic.clone();
        self.monotonic_field = push_tracked(
            &mut data,
            "reftime.monotonic",
            &monotonic,
            MONOTONIC_FIELD_SIZE.max(monotonic.len()),
            prev,
            &mut ok,
        );
        if self.monotonic != DEFAULT_REFTIME_MSG {
            self.monotonic_field = FieldState::default();
        }

        let absolute = self.absolute.clone();
        self.absolute_field = push_tracked(
            &mut data,
            "reftime.absolute",
            &absolute,
            ABSOLUTE_FIELD_SIZE,
            prev,
            &mut ok,
        );
        if self.absolute != TIME_ZERO {
            self.absolute_field = FieldState::default();
        }

        // Whether the aircraft lifted off during this session
        let takeoff = if self.takeoff { "1" } else { "0" };
        self.takeoff_field =
            push_tracked(&mut data, "takeoff", takeoff, TAKEOFF_FIELD_SIZE, prev, &mut ok);

        let used = if ok { data.used() } else { 0 };
        let entry_hdr = EntryHeader::new(self.header_desc.source_id, used as u32).to_bytes();

        // Written uncompressed, in one vectored write, with the space
        // check parked so a tight quota cannot recurse into open()
        self.check_space = false;
        self.writev(
            &[&file_hdr[..], &desc_entry, &entry_hdr[..], &payload[..used]],
            false,
            true,
        );
        self.check_space = true;
    }

    fn write_footer(&mut self, reason: CloseReason) {
        let desc_entry = self.footer_desc.to_entry_bytes();

        let mut payload = vec![0u8; 128];
        let mut data = LogData::new(&mut payload);
        let ok = data.push_str("reason") && data.push_str(reason.as_str());

        let used = if ok { data.used() } else { 0 };
        let entry_hdr = EntryHeader::new(self.footer_desc.source_id, used as u32).to_bytes();

        self.check_space = false;
        self.writev(&[&desc_entry[..], &entry_hdr[..], &payload[..used]], false, true);
        self.check_space = true;
    }

    /// Rewrite the date once the system clock has been validated.
    pub fn update_date(&mut self) {
        let date = current_date();
        self.patch(Rewritable::Date, &date, "date");
    }

    pub fn update_flight_id(&mut self, flight_id: &str) {
        self.patch(Rewritable::FlightId, flight_id, "flight_id");
    }

    pub fn update_gcs_name(&mut self, message: &str) {
        self.gcs_name = truncate(message, GCS_FIELD_SIZE);
        let value = self.gcs_name.clone();
        self.patch(Rewritable::GcsName, &value, "gcs_name");
    }

    pub fn update_gcs_type(&mut self, message: &str) {
        self.gcs_type = truncate(message, GCS_FIELD_SIZE);
        let value = self.gcs_type.clone();
        self.patch(Rewritable::GcsType, &value, "gcs_type");
    }

    /// Rewrite the reference time pair once the wall clock offset of the
    /// monotonic timeline is known.
    pub fn update_ref_time(&mut self, message: &str, tv_sec: i64, tv_nsec: i64) {
        if self.absolute_field.off == 0 || self.monotonic_field.off == 0 {
            return;
        }

        self.monotonic = message.to_string();
        let us = tv_sec as u64 * 1_000_000 + tv_nsec as u64 / 1000;
        self.absolute = format!("{:020}", us);

        let monotonic = self.monotonic.clone();
        self.patch(Rewritable::Monotonic, &monotonic, "monotonic");
        let absolute = self.absolute.clone();
        self.patch(Rewritable::Absolute, &absolute, "absolute");
    }

    pub fn update_takeoff(&mut self, takeoff: bool) {
        if takeoff == self.takeoff || self.takeoff_field.off == 0 {
            return;
        }
        self.takeoff = takeoff;
        self.patch(Rewritable::Takeoff, if takeoff { "1" } else { "0" }, "takeoff");
    }

    pub fn update_extra_property(&mut self, key: &str, value: &str) {
        let Some(i) = self.opt.extra_props.iter().position(|p| p.key == key) else {
            return;
        };
        self.opt.extra_props[i].value = value.to_string();

        let (off, size) = (self.opt.extra_props[i].offset, self.opt.extra_props[i].size);
        if off == 0 || size == 0 {
            return;
        }
        if let Some(buf) = encode_rewrite(value, size, key) {
            info!("Update {} @{}:{} -> {}", key, off, size, value);
            self.backend.write_at(&buf, off);
            self.opt.extra_props[i].offset = 0;
            self.opt.extra_props[i].size = 0;
        }
    }

    pub fn options(&self) -> &RecorderOptions {
        &self.opt
    }

    fn field(&self, which: Rewritable) -> FieldState {
        match which {
            Rewritable::FlightId => self.flight_id_field,
            Rewritable::Takeoff => self.takeoff_field,
            Rewritable::Date => self.date_field,
            Rewritable::Md5 => self.md5_field,
            Rewritable::Monotonic => self.monotonic_field,
            Rewritable::Absolute => self.absolute_field,
            Rewritable::GcsName => self.gcs_name_field,
            Rewritable::GcsType => self.gcs_type_field,
        }
    }

    fn field_mut(&mut self, which: Rewritable) -> &mut FieldState {
        match which {
            Rewritable::FlightId => &mut self.flight_id_field,
            Rewritable::Takeoff => &mut self.takeoff_field,
            Rewritable::Date => &mut self.date_field,
            Rewritable::Md5 => &mut self.md5_field,
            Rewritable::Monotonic => &mut self.monotonic_field,
            Rewritable::Absolute => &mut self.absolute_field,
            Rewritable::GcsName => &mut self.gcs_name_field,
            Rewritable::GcsType => &mut self.gcs_type_field,
        }
    }

    /// Overwrite one rewritable field in place, then invalidate its
    /// cached location so the rewrite stays idempotent.
    fn patch(&mut self, which: Rewritable, value: &str, desc: &str) {
        let state = self.field(which);
        if state.off == 0 || state.size == 0 {
            return;
        }
        if let Some(buf) = encode_rewrite(value, state.size, desc) {
            info!("Update {} @{}:{} -> {}", desc, state.off, state.size, value);
            self.backend.write_at(&buf, state.off);
            let state = self.field_mut(which);
            state.off = 0;
            state.size = 0;
        }
    }

    fn update_remove_size(&mut self) {
        self.remove_size = 0;
        self.used_space = dir_size(&self.opt.output_dir);
        self.update_remove_size_for_free_space(false);
        self.update_remove_size_for_used_space(false);
    }

    /// Check the free-space floor; schedule a removal when below it.
    fn update_remove_size_for_free_space(&mut self, quiet: bool) -> bool {
        // An open file already has its room; a closed one needs a
        // reserve for the next file on top of the floor.
        let reserved = if self.is_opened() {
            0
        } else {
            self.opt.min_log_size
        };

        // 0 means no limit
        if self.opt.min_free_space == 0 && reserved == 0 {
            return false;
        }

        let free = match free_space(&self.opt.output_dir) {
            Some(free) => free,
            None => {
                if !quiet {
                    error!("statvfs('{}') failed", self.opt.output_dir.display());
                }
                return false;
            }
        };

        if free < self.opt.min_free_space + reserved {
            // Whatever the open state, the removal must leave room for
            // the next file, so minLogSize goes into the amount.
            let remove_size = (self.opt.min_free_space + self.opt.min_log_size)
                .saturating_sub(free);
            if self.remove_size < remove_size {
                self.remove_size = remove_size;
                return true;
            }
        }
        false
    }

    /// Check the used-space quota; schedule a removal when above it.
    fn update_remove_size_for_used_space(&mut self, _quiet: bool) -> bool {
        // 0 means no limit
        if self.opt.max_used_space == 0 {
            return false;
        }

        let used_space = self.used_space + self.backend.size();
        let reserved = if self.is_opened() {
            0
        } else {
            self.opt.min_log_size
        };

        if used_space + reserved > self.opt.max_used_space {
            let remove_size =
                used_space.saturating_sub(self.opt.max_used_space) + self.opt.min_log_size;
            if self.remove_size < remove_size {
                self.remove_size = remove_size;
                return true;
            }
        }
        false
    }

    fn log_size_exceeded(&self) -> bool {
        self.opt.max_log_size != 0 && self.backend.size() > self.opt.max_log_size
    }
}

/// Push `key` then a reserved-size `value`, recording the absolute file
/// offset and wire size of the value for later in-place rewrites.
fn push_tracked(
    data: &mut LogData<'_>,
    key: &str,
    value: &str,
    reserved: usize,
    prev: u64,
    ok: &mut bool,
) -> FieldState {
    *ok &= data.push_str(key);
    let off = prev + data.used() as u64;
    *ok &= data.push_str_reserved(value, reserved);
    if *ok {
        FieldState {
            off,
            size: string_wire_size(reserved),
        }
    } else {
        FieldState::default()
    }
}

/// Encode a rewrite buffer matching a reserved wire size exactly, or
/// refuse when the value no longer fits.
fn encode_rewrite(value: &str, wire_size: usize, desc: &str) -> Option<Vec<u8>> {
    let reserved = wire_size.checked_sub(string_wire_size(0))?;
    if value.len() > reserved {
        warn!(
            "Failed to rewrite {}, size mismatch: {}({})",
            desc,
            value.len(),
            reserved
        );
        return None;
    }
    let mut buf = vec![0u8; wire_size];
    let mut data = LogData::new(&mut buf);
    if !data.push_str_reserved(value, reserved) {
        warn!("Failed to rewrite {}", desc);
        return None;
    }
    Some(buf)
}

fn truncate(value: &str, max: usize) -> String {
    if value.len() <= max {
        value.to_string()
    } else {
        let mut end = max;
        while !value.is_char_boundary(end) {
            end -= 1;
        }
        value[..end].to_string()
    }
}

/// System date formatted as ISO short format with offset.
fn current_date() -> String {
    chrono::Local::now().format("%Y%m%dT%H%M%S%z").to_string()
}

/// Bytes used by regular files directly inside `dir`.
fn dir_size(dir: &Path) -> u64 {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return 0;
    };
    entries
        .flatten()
        .filter_map(|entry| entry.metadata().ok())
        .filter(|meta| meta.is_file())
        .map(|meta| meta.len())
        .sum()
}

/// Bytes available to unprivileged users on the filesystem holding
/// `path`, via statvfs.
fn free_space(path: &Path) -> Option<u64> {
    let c_path = std::ffi::CString::new(path.as_os_str().as_bytes()).ok()?;
    let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
    let ret = unsafe { libc::statvfs(c_path.as_ptr(), &mut stat) };
    if ret != 0 {
        return None;
    }
    Some(stat.f_bavail as u64 * stat.f_bsize as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_close_reason_strings() {
        assert_eq!(CloseReason::NoSpaceLeft.as_str(), "NO_SPACE_LEFT");
        assert_eq!(CloseReason::Exiting.as_str(), "EXITING");
        assert_eq!(CloseReason::Rotate.to_string(), "ROTATE");
    }

    #[test]
    fn test_encode_rewrite_pads_to_wire_size() {
        let buf = encode_rewrite("abc", string_wire_size(10), "test").unwrap();
        assert_eq!(buf.len(), string_wire_size(10));
        assert_eq!(&buf[2..5], b"abc");
        assert_eq!(buf[5], 0);
    }

    #[test]
    fn test_encode_rewrite_rejects_oversize() {
        assert!(encode_rewrite("abcdef", string_wire_size(3), "test").is_none());
    }

    #[test]
    fn test_current_date_shape() {
        let date = current_date();
        // 20240102T030405+0000
        assert_eq!(date.len(), 20);
        assert_eq!(&date[8..9], "T");
    }
}
