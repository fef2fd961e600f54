// Copyright (c) 2026 MCU-Debug Authors.
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
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info};

use jtag_bridge::commands::CommandPlan;
use jtag_bridge::debug::init_logging;
use jtag_bridge::engine::Engine;
use jtag_bridge::native::{NativeEngine, DEFAULT_LIBRARY};
use jtag_bridge::sim::SimEngine;
use jtag_bridge::{Config, DebugBridge};

#[derive(Parser, Debug)]
#[command(name = "jtag-bridge")]
#[command(about = "Load programs onto a JTAG target and serve GDB", long_about = None)]
#[command(version)]
struct Cli {
    /// JSON system configuration
    #[arg(short = 'c', long = "config")]
    config: PathBuf,

    /// ELF binary to load (repeat for several, the first one is the exec-file)
    #[arg(short = 'b', long = "binary")]
    binaries: Vec<PathBuf>,

    /// Engine shared library
    #[arg(long = "engine", default_value = DEFAULT_LIBRARY)]
    engine: PathBuf,

    /// Run against an in-process simulated target instead of the engine library
    #[arg(long = "dry-run", default_value_t = false)]
    dry_run: bool,

    /// TCP port for the GDB server
    #[arg(short = 'p', long = "port", default_value_t = 1234)]
    port: u16,

    /// Extra qSupported capabilities advertised to GDB
    #[arg(long = "capabilities")]
    capabilities: Option<String>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    verbose: u8,

    /// Steps: reset load start stop ioloop reqloop gdb flash wait
    /// delay=<ms> repeat=<count>[,<ms>] end
    #[arg(value_name = "STEP")]
    steps: Vec<String>,
}

fn run(cli: Cli) -> Result<i32> {
    let config = Config::from_file(&cli.config)
        .with_context(|| format!("Failed to read configuration {}", cli.config.display()))?;
    let plan = CommandPlan::parse(cli.steps.as_slice(), cli.port).context("Invalid step list")?;

    let engine: Arc<dyn Engine> = if cli.dry_run {
        info!("Dry run: using simulated target");
        Arc::new(SimEngine::new())
    } else {
        let engine = NativeEngine::load(&cli.engine, &config.dump(), cli.verbose)
            .with_context(|| format!("Failed to load engine {}", cli.engine.display()))?;
        Arc::new(engine)
    };

    let mut bridge = DebugBridge::new(engine, config, &cli.binaries)
        .context("Failed to create debug bridge")?;
    if let Some(extra) = &cli.capabilities {
        bridge.set_capabilities(extra);
    }

    let status = plan.run(&mut bridge)?;
    info!("Finished with status {}", status);
    Ok(status)
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let _logger = match init_logging(cli.verbose) {
        Ok(handle) => Some(handle),
        Err(e) => {
            eprintln!("Failed to initialize logging: {}", e);
            None
        }
    };

    match run(cli) {
        Ok(0) => ExitCode::SUCCESS,
        Ok(status) => ExitCode::from(u8::try_from(status).unwrap_or(1)),
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}
