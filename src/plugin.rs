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

// Plugin registration and lifecycle.
//
// Plugins are statically registered trait objects: each one creates its
// sources against the manager in `init`, may receive an opaque settings
// blob whose grammar it defines, and tears its sources down in
// `shutdown`. One plugin failing is never fatal to the others.

use std::collections::HashMap;

use anyhow::Result;
use tracing::{error, info, warn};

use crate::recorder::LogManager;

/// A provider of log sources.
pub trait LogPlugin {
    /// Stable name, also the key of the plugin's settings blob.
    fn name(&self) -> &str;

    /// Create sources and register them with the manager.
    fn init(&mut self, manager: &mut dyn LogManager) -> Result<()>;

    /// Remove this plugin's sources from the manager.
    fn shutdown(&mut self, manager: &mut dyn LogManager);

    /// Reconfigure from an opaque settings string; idempotent.
    fn set_settings(&mut self, _settings: &str) {}
}

/// The set of loaded plugins, with settings routing.
#[derive(Default)]
pub struct PluginSet {
    plugins: Vec<Box<dyn LogPlugin>>,
}

impl PluginSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, plugin: Box<dyn LogPlugin>) {
        self.plugins.push(plugin);
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    /// Initialize every plugin against the manager and feed it its
    /// settings blob. A failing plugin is dropped, the others proceed.
    pub fn init_all(
        &mut self,
        manager: &mut dyn LogManager,
        settings: &HashMap<String, String>,
    ) {
        info!("initializing {} plugins", self.plugins.len());
        if self.plugins.is_empty() {
            warn!("no plugins registered");
        }

        let mut alive = Vec::with_capacity(self.plugins.len());
        for mut plugin in self.plugins.drain(..) {
            match plugin.init(manager) {
                Ok(()) => {
                    if let Some(blob) = settings.get(plugin.name()) {
                        plugin.set_settings(blob);
                    }
                    alive.push(plugin);
                }
                Err(err) => {
                    error!("plugin '{}' failed to initialize: {}", plugin.name(), err);
                }
            }
        }
        self.plugins = alive;
    }

    /// Forward a settings blob to the named plugin.
    pub fn set_settings(&mut self, name: &str, blob: &str) {
        match self.plugins.iter_mut().find(|p| p.name() == name) {
            Some(plugin) => plugin.set_settings(blob),
            None => warn!("no plugin named '{}'", name),
        }
    }

    pub fn shutdown_all(&mut self, manager: &mut dyn LogManager) {
        for plugin in &mut self.plugins {
            plugin.shutdown(manager);
        }
        self.plugins.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recorder::{Recorder, RecorderOptions};

    struct BrokenPlugin;

    impl LogPlugin for BrokenPlugin {
        fn name(&self) -> &str {
            "broken"
        }

        fn init(&mut self, _manager: &mut dyn LogManager) -> Result<()> {
            anyhow::bail!("resource unavailable")
        }

        fn shutdown(&mut self, _manager: &mut dyn LogManager) {}
    }

    struct NopPlugin {
        settings: Option<String>,
    }

    impl LogPlugin for NopPlugin {
        fn name(&self) -> &str {
            "nop"
        }

        fn init(&mut self, _manager: &mut dyn LogManager) -> Result<()> {
            Ok(())
        }

        fn shutdown(&mut self, _manager: &mut dyn LogManager) {}

        fn set_settings(&mut self, settings: &str) {
            self.settings = Some(settings.to_string());
        }
    }

    #[test]
    fn test_broken_plugin_is_not_fatal() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut recorder = Recorder::new(RecorderOptions::new(dir.path()));

        let mut plugins = PluginSet::new();
        plugins.register(Box::new(BrokenPlugin));
        plugins.register(Box::new(NopPlugin { settings: None }));

        let mut settings = HashMap::new();
        settings.insert("nop".to_string(), "filter=*".to_string());
        plugins.init_all(&mut recorder, &settings);

        assert_eq!(plugins.len(), 1);
    }
}
