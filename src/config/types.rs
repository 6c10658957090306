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

// Configuration types for the recorder daemon.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::recorder::{ExtraProperty, RecorderOptions};

/// Main configuration structure.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RecorderConfig {
    pub storage: StorageConfig,
    #[serde(default)]
    pub recorder: RecorderSettings,
    /// Opaque settings blob per plugin name; the grammar belongs to the
    /// plugin.
    #[serde(default)]
    pub plugins: HashMap<String, String>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            storage: StorageConfig::default(),
            recorder: RecorderSettings::default(),
            plugins: HashMap::new(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Where log files go and how much room they may take.
/// All sizes are bytes; 0 disables the corresponding check.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    pub output_dir: String,

    #[serde(default)]
    pub max_log_count: u32,

    #[serde(default)]
    pub min_free_space: u64,

    #[serde(default)]
    pub max_used_space: u64,

    #[serde(default)]
    pub max_log_size: u64,

    #[serde(default)]
    pub min_log_size: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            output_dir: ".".to_string(),
            max_log_count: 0,
            min_free_space: 0,
            max_used_space: 0,
            max_log_size: 0,
            min_log_size: 0,
        }
    }
}

/// Recorder-specific settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RecorderSettings {
    #[serde(default)]
    pub encrypted: bool,

    #[serde(default = "default_pub_key_path")]
    pub pub_key_path: String,

    #[serde(default)]
    pub enable_md5: bool,

    #[serde(default)]
    pub extra_properties: Vec<ExtraPropertyConfig>,
}

impl Default for RecorderSettings {
    fn default() -> Self {
        Self {
            encrypted: false,
            pub_key_path: default_pub_key_path(),
            enable_md5: false,
            extra_properties: Vec::new(),
        }
    }
}

/// One operator-supplied header property.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExtraPropertyConfig {
    pub key: String,
    #[serde(default)]
    pub value: String,
    /// Reserved value size for in-place rewrites; defaults to the
    /// initial value length.
    #[serde(default)]
    pub reserved: usize,
    #[serde(default)]
    pub read_only: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String, // "trace", "debug", "info", "warn", "error"
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl RecorderConfig {
    /// Resolve into the runtime options handed to the recorder. The
    /// lifetime index manager and property store are attached by the
    /// caller.
    pub fn to_options(&self) -> RecorderOptions {
        let mut opt = RecorderOptions::new(&self.storage.output_dir);
        opt.encrypted = self.recorder.encrypted;
        opt.pub_key_path = self.recorder.pub_key_path.clone().into();
        opt.max_log_count = self.storage.max_log_count;
        opt.min_free_space = self.storage.min_free_space;
        opt.max_used_space = self.storage.max_used_space;
        opt.max_log_size = self.storage.max_log_size;
        opt.min_log_size = self.storage.min_log_size;
        opt.extra_props = self
            .recorder
            .extra_properties
            .iter()
            .map(|p| {
                let reserved = if p.reserved == 0 {
                    p.value.len()
                } else {
                    p.reserved
                };
                ExtraProperty::new(&p.key, reserved, &p.value, p.read_only)
            })
            .collect();
        opt
    }
}

// Default value functions
fn default_pub_key_path() -> String {
    "/etc/flightlog.pub.pem".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}
