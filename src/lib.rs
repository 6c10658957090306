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

// Flight data logging toolkit:
// - Records telemetry, events, settings and system data from pluggable
//   sources into compact, LZ4-compressed, optionally RSA/AES-sealed
//   binary log files, with rotation and quota enforcement
// - Parses such files back into structured data sets
// - Converts a recorded session into a GUTMA flight logging exchange
//   document

pub mod buffer;
pub mod config;
pub mod crypto;
pub mod format;
pub mod frontend;
pub mod gutma;
pub mod plugin;
pub mod reader;
pub mod recorder;
pub mod source;
pub mod storage;

// Re-export main types
pub use buffer::LogBuffer;
pub use config::{load_config, RecorderConfig};
pub use frontend::{CloseReason, LogFrontend};
pub use gutma::{convert, ConvertStatus};
pub use plugin::{LogPlugin, PluginSet};
pub use reader::{DataSource, FileReader, TlmView};
pub use recorder::{
    LogIdxManager, LogManager, PropertyStore, Recorder, RecorderOptions,
};
pub use source::{LogSource, Source};
pub use storage::{FileBackend, LogBackend};
