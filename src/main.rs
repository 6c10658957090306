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

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use flightlog::config::load_config;
use flightlog::plugin::PluginSet;
use flightlog::recorder::{LogManager, Recorder};

/// Flight data recorder daemon
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/default.yaml")]
    config: PathBuf,

    /// Output directory (overrides config file)
    #[arg(short, long)]
    output_dir: Option<String>,

    /// Enable encryption (overrides config file)
    #[arg(short, long)]
    secure: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let args = Args::parse();

    // Load configuration from file
    let mut config = load_config(&args.config)?;

    // Apply CLI overrides
    if let Some(output_dir) = args.output_dir {
        config.storage.output_dir = output_dir;
    }
    if args.secure {
        config.recorder.encrypted = true;
    }

    // Initialize tracing with configured level
    let log_level = match config.logging.level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting flightlog recorder");
    info!("Loaded configuration from: {:?}", args.config);
    info!("Output directory: {}", config.storage.output_dir);

    let mut recorder = Recorder::new(config.to_options());
    if config.recorder.enable_md5 {
        recorder.enable_md5();
    }

    // Static plugin registration point: deployments add their source
    // plugins here before startup.
    let mut plugins = PluginSet::new();
    plugins.init_all(&mut recorder, &config.plugins);

    // Run until Ctrl+C / SIGTERM
    recorder.run().await?;

    plugins.shutdown_all(&mut recorder);
    info!("flightlog recorder shut down successfully");

    Ok(())
}
