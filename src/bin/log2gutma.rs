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

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use flightlog::gutma::{convert, ConvertStatus};

/// Convert a flight log into a GUTMA exchange document
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Input log file
    #[arg(short, long)]
    input_file: PathBuf,

    /// Output JSON file
    #[arg(short, long)]
    output_file: PathBuf,

    /// Skip sessions without a takeoff
    #[arg(long)]
    only_flight: bool,

    /// Verbose decoding logs
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();

    let level = if args.verbose {
        Level::DEBUG
    } else {
        Level::WARN
    };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    let _ = tracing::subscriber::set_global_default(subscriber);

    let status = convert(&args.input_file, &args.output_file, args.only_flight);
    match status {
        ConvertStatus::Ok => {}
        ConvertStatus::NoFlight => {
            println!("No need to convert this log file: no takeoff");
        }
        ConvertStatus::UnsupportedVersion => {
            eprintln!("Unsupported firmware version for gutma export");
        }
        ConvertStatus::Error => {
            eprintln!("Impossible to convert log file");
        }
    }
    ExitCode::from(status.exit_code() as u8)
}
