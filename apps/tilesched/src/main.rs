// Copyright 2023 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use anyhow::Context;
use env_logger::Target;
use std::path::PathBuf;
use structopt::StructOpt;

use commsched::{NetworkMode, ProgramDescription, SchedulerConfiguration};

#[derive(StructOpt)]
#[structopt(
    name = "tilesched",
    about = "Static communication scheduler for placed stream programs"
)]
struct Arguments {
    /// YAML description of the placed program
    #[structopt(parse(from_os_str))]
    program: PathBuf,
    /// YAML scheduler configuration
    #[structopt(short, long, parse(from_os_str))]
    config: Option<PathBuf>,
    /// supported networks: Switch, Magic
    #[structopt(short, long)]
    network: Option<NetworkMode>,
    /// fire every filter once per phase with all its items
    #[structopt(short, long)]
    rate_match: bool,
    /// print the stream graph in dot format and exit
    #[structopt(short, long)]
    graphviz: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Arguments::from_args();

    env_logger::builder()
        .filter(Some("commsched"), log::LevelFilter::Info)
        .target(Target::Stderr)
        .parse_default_env()
        .init();

    let program = ProgramDescription::from_file(&args.program)?
        .build()
        .with_context(|| format!("Invalid program {}", args.program.display()))?;
    if args.graphviz {
        println!("{}", program.graph.to_graphviz());
        return Ok(());
    }

    let mut config = match &args.config {
        Some(path) => SchedulerConfiguration::from_file(path)?,
        None => SchedulerConfiguration::default(),
    };
    if let Some(network) = args.network {
        config.network = network;
    }
    config.rate_match |= args.rate_match;
    log::info!("scheduling {} with {:?}", args.program.display(), config);

    let schedule = commsched::schedule(
        &program.graph,
        &program.layout,
        &program.router,
        &program.rates,
        &config,
    )
    .with_context(|| format!("Failed to schedule {}", args.program.display()))?;
    print!("{}", schedule);
    Ok(())
}
