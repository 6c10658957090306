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

// Storage backend trait for the write side of the recorder.

use anyhow::Result;

/// Byte-level storage the frontend writes through.
///
/// The contract is append-oriented: `writev` appends at the current end,
/// `write_at` patches bytes that were already appended (used for the
/// in-place rewritable header fields) without moving the append position.
/// Write errors close the backend; the caller observes this through
/// `is_opened` and may reopen on a later tick.
pub trait LogBackend {
    /// Create/truncate the active file and sync its directory entry.
    fn open(&mut self) -> Result<()>;

    /// Close the active file. Idempotent.
    fn close(&mut self);

    fn is_opened(&self) -> bool;

    /// fsync the active file.
    fn sync(&mut self);

    /// Bytes appended to the active file so far.
    fn size(&self) -> u64;

    /// Append a single buffer. The `quiet` flag suppresses the backend's
    /// own logging to avoid an avalanche when the recorder records its
    /// own log stream.
    fn write(&mut self, buf: &[u8], quiet: bool) {
        self.writev(&[buf], quiet);
    }

    /// Append several buffers as one write.
    fn writev(&mut self, bufs: &[&[u8]], quiet: bool);

    /// Overwrite `buf.len()` bytes at `offset`.
    fn write_at(&mut self, buf: &[u8], offset: u64);

    /// Make room: delete eligible rotated siblings until `remove_size`
    /// bytes are reclaimed or the file count drops below
    /// `max_file_count`, then rename the active file out of the way.
    fn rotate(&mut self, remove_size: u64, max_file_count: u32);

    /// Highest rotation index observed so far.
    fn min_log_id(&self) -> u32;

    /// Seed the rotation index floor, typically from a persisted
    /// lifetime counter.
    fn set_min_log_id(&mut self, min_log_id: u32);

    /// Backend type identifier, for logs.
    fn backend_type(&self) -> &str;
}
