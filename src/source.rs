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

// Data sources feeding the recorder.

use crate::format::{EntryHeader, LogData, SourceDesc, ENTRY_HEADER_SIZE};
use crate::frontend::LogFrontend;

/// A producer of log entries, polled periodically by the recorder.
///
/// Callbacks run on the recorder's loop and must not block; a source
/// with nothing ready simply returns 0 from `read_data`.
pub trait LogSource {
    /// Produce at most one entry worth of bytes into `data`; the number
    /// of bytes used is returned, zero meaning nothing was ready.
    fn read_data(&mut self, data: &mut LogData<'_>) -> usize;

    /// Minimum polling period for this source, in milliseconds.
    fn period_ms(&self) -> u32;

    /// Called on every file open.
    fn start_session(&mut self) {}
}

/// Registered identity of a source within one recorder, shared by polled
/// sources, direct writers and the synthetic header/footer sources.
pub struct BaseSource {
    pub id: u32,
    pub plugin: String,
    pub name: String,
    pub version: u32,
    pub pending_description: bool,
    pub pending_remove: bool,
}

impl BaseSource {
    pub fn new(id: u32, plugin: &str, name: &str, version: u32) -> Self {
        Self {
            id,
            plugin: plugin.to_string(),
            name: name.to_string(),
            version,
            pending_description: true,
            pending_remove: false,
        }
    }

    pub fn desc(&self) -> SourceDesc {
        SourceDesc::new(self.id, &self.plugin, &self.name, self.version)
    }

    /// Encode the SOURCE_DESC entry for this source into `data`.
    pub fn fill_description(&self, data: &mut LogData<'_>) -> bool {
        self.desc().encode_entry(data)
    }

    pub fn start_session(&mut self) {
        // will need to push the description again in the new file
        self.pending_description = true;
    }
}

/// A polled source together with its registration and next deadline.
pub struct Source {
    pub base: BaseSource,
    pub inner: Box<dyn LogSource>,
    pub deadline: u64,
}

impl Source {
    pub fn new(
        inner: Box<dyn LogSource>,
        id: u32,
        plugin: &str,
        name: &str,
        version: u32,
    ) -> Self {
        Self {
            base: BaseSource::new(id, plugin, name, version),
            inner,
            deadline: 0,
        }
    }

    pub fn start_session(&mut self) {
        self.base.start_session();
        self.inner.start_session();
    }
}

/// Uncompressed side channel for sources whose output must not loop
/// through the recorder's own pipeline (e.g. the system log stream,
/// which would otherwise feed back every block the recorder writes).
///
/// The description and every chunk go straight to the backend, framed
/// but neither compressed nor encrypted; both streams coexist in the
/// same file.
pub struct DirectWriter {
    pub base: BaseSource,
}

impl DirectWriter {
    pub fn new(id: u32, plugin: &str, version: u32) -> Self {
        Self {
            base: BaseSource::new(id, plugin, "flightlogd", version),
        }
    }

    pub fn write(&mut self, frontend: &mut LogFrontend, buf: &[u8]) {
        if self.base.pending_description {
            frontend.direct_write(&[&self.base.desc().to_entry_bytes()]);
            self.base.pending_description = false;
        }

        let hdr = EntryHeader::new(self.base.id, buf.len() as u32).to_bytes();
        frontend.direct_write(&[&hdr, buf]);
    }
}
