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

// Read side: parse a log file back into typed data sources.

pub mod data;
mod file;
pub mod merge;

pub use data::{
    DataSample, DataSetDesc, DataSource, Event, EventDataSource, EventParam,
    InternalDataSource, LogDataSource, TelemetryDataSource,
};
pub use merge::TlmView;

use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::warn;

use crate::format::{ByteReader, FILE_MAGIC, FILE_VERSION};
use file::FileDecoder;

/// The header record must live within this prefix of the file.
const MAX_HEADER_SCAN: usize = 64 * 1024;

/// Parses one log file into a set of typed data sources. Sources are
/// addressable by their position and by full name
/// (`<plugin>-<name>`, suffixed `-N` for repeated registrations).
pub struct FileReader {
    path: PathBuf,
    data_sources: Vec<DataSource>,
    encrypted: bool,
}

impl FileReader {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            data_sources: Vec::new(),
            encrypted: false,
        }
    }

    /// Decode the whole file.
    pub fn load_contents(&mut self) -> Result<()> {
        self.load(false)
    }

    /// Short read that stops as soon as the header record is complete.
    pub fn load_info(&mut self) -> Result<()> {
        self.load(true)
    }

    fn load(&mut self, header_only: bool) -> Result<()> {
        let bytes = if header_only {
            let file = std::fs::File::open(&self.path)
                .with_context(|| format!("open('{}')", self.path.display()))?;
            let mut buf = Vec::with_capacity(MAX_HEADER_SCAN);
            file.take(MAX_HEADER_SCAN as u64)
                .read_to_end(&mut buf)
                .with_context(|| format!("read('{}')", self.path.display()))?;
            buf
        } else {
            std::fs::read(&self.path)
                .with_context(|| format!("read('{}')", self.path.display()))?
        };

        let mut reader = ByteReader::new(&bytes);
        let magic = reader.read_u32().context("truncated file header")?;
        let version = reader.read_u32().context("truncated file header")?;
        if magic != FILE_MAGIC {
            anyhow::bail!("bad magic: {:#010x}({:#010x})", magic, FILE_MAGIC);
        }
        if version > FILE_VERSION {
            anyhow::bail!("bad version: {}({})", version, FILE_VERSION);
        }

        let mut decoder = FileDecoder::new(&mut self.data_sources, header_only);
        let status = decoder.read_entries(&mut reader);
        let header_found = decoder.header_found();
        self.encrypted = decoder.encrypted();

        if let Err(err) = status {
            warn!("'{}': decoding stopped: {}", self.path.display(), err);
        }
        if header_only && !header_found {
            anyhow::bail!("'{}': no header record found", self.path.display());
        }
        Ok(())
    }

    pub fn data_sources(&self) -> &[DataSource] {
        &self.data_sources
    }

    pub fn get(&self, name: &str) -> Option<&DataSource> {
        self.data_sources.iter().find(|ds| ds.name() == name)
    }

    /// The internal header record of the file, when present.
    pub fn header(&self) -> Option<&InternalDataSource> {
        self.get("internal-header").and_then(DataSource::as_internal)
    }

    pub fn is_encrypted(&self) -> bool {
        self.encrypted
    }
}

/// Header key/value pairs of a log file, without decoding the payload.
pub struct HeaderFields {
    fields: Vec<(String, String)>,
}

impl HeaderFields {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// Read only the header record of a log file. Used by the rotation
/// logic to order siblings without paying for a full decode.
pub fn read_log_header<P: AsRef<Path>>(path: P) -> Result<HeaderFields> {
    let mut reader = FileReader::new(path);
    reader.load_info()?;
    let header = reader
        .header()
        .context("no header record found")?;
    Ok(HeaderFields {
        fields: header.fields().to_vec(),
    })
}
