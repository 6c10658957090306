// YAML configuration loading and validation.

use super::types::*;
use anyhow::{bail, Context, Result};
use regex::Regex;
use std::path::Path;

pub struct ConfigLoader;

impl ConfigLoader {
    /// Read a YAML configuration file, expand environment references
    /// and validate the result.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<RecorderConfig> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file '{}'", path.display()))?;

        let config: RecorderConfig = serde_yaml::from_str(&Self::expand_env(&raw))
            .with_context(|| format!("Failed to parse '{}'", path.display()))?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Expand `${VAR}` and `${VAR:-default}` references from the
    /// environment. A reference that resolves to nothing is left
    /// verbatim, so a later parse error points at it.
    fn expand_env(raw: &str) -> String {
        let reference = Regex::new(r"\$\{([^}]+)\}").unwrap();

        let mut out = String::with_capacity(raw.len());
        let mut last = 0;
        for caps in reference.captures_iter(raw) {
            let span = caps.get(0).map(|m| m.range()).unwrap_or_default();
            out.push_str(&raw[last..span.start]);

            let (name, fallback) = match caps[1].split_once(":-") {
                Some((name, fallback)) => (name, Some(fallback)),
                None => (&caps[1], None),
            };
            match std::env::var(name).ok() {
                Some(value) => out.push_str(&value),
                None => match fallback {
                    Some(fallback) => out.push_str(fallback),
                    None => out.push_str(&raw[span.clone()]),
                },
            }

            last = span.end;
        }
        out.push_str(&raw[last..]);
        out
    }

    /// Validate configuration
    fn validate(config: &RecorderConfig) -> Result<()> {
        if config.storage.output_dir.is_empty() {
            bail!("storage.output_dir cannot be empty");
        }

        if config.recorder.encrypted && config.recorder.pub_key_path.is_empty() {
            bail!("recorder.encrypted requires recorder.pub_key_path");
        }

        // A quota below the reserve would close every file immediately
        if config.storage.max_used_space != 0
            && config.storage.max_used_space < config.storage.min_log_size
        {
            bail!("storage.max_used_space is smaller than storage.min_log_size");
        }

        match config.logging.level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            unknown => bail!(
                "Unknown logging.level: '{}'. Supported: trace, debug, info, warn, error",
                unknown
            ),
        }

        Ok(())
    }
}
