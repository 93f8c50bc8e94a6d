// Copyright 2025 RISC Zero, Inc.
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

use std::{path::PathBuf, time::Duration};

use alloy::primitives::Address;
use anyhow::{bail, Result};
use clap::Parser;
use smartnode_treegen::{
    is_fatal, TargetSnapshot, TreeGenOutcome, TreeGenService, TreeGenServiceConfig,
};
use url::Url;

/// Arguments for the rewards tree generator.
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct TreeGenArgs {
    /// URL of the Ethereum RPC endpoint.
    #[clap(short, long, env)]
    rpc_url: Url,

    /// URL of the beacon node HTTP API.
    #[clap(short, long, env)]
    beacon_url: Url,

    /// Address of the rewards pool contract.
    #[clap(long, env)]
    rewards_pool_address: Address,

    /// Address of the network settings contract.
    #[clap(long, env)]
    network_settings_address: Address,

    /// Directory holding `state-<block>.json` network state snapshots.
    #[clap(long, env)]
    state_dir: PathBuf,

    /// Directory the artifacts are written to.
    #[clap(long, env, default_value = ".")]
    output_dir: PathBuf,

    /// Name of the network recorded in the artifacts.
    #[clap(long, env, default_value = "mainnet")]
    network: String,

    /// Interval to generate. Defaults to the reward index of the network state.
    #[clap(long)]
    interval: Option<u64>,

    /// Slot the interval ends at.
    #[clap(long)]
    target_slot: u64,

    /// Last consensus block of the interval, if different from the target slot.
    #[clap(long)]
    target_consensus_block: Option<u64>,

    /// Execution block of the last consensus block. Looked up on the beacon node if not set.
    #[clap(long)]
    target_execution_block: Option<u64>,

    /// Number of intervals covered by this submission.
    #[clap(long, default_value = "1")]
    intervals_passed: u64,

    /// First block searched for rewards events.
    #[clap(long, env, default_value = "0")]
    events_from_block: u64,

    /// Also write the binary rewards file.
    #[clap(long, default_value_t = false)]
    trusted: bool,

    /// Only estimate the pool stakers' share of the Smoothing Pool. Nothing is written.
    #[clap(long, default_value_t = false)]
    approximate: bool,

    /// Number of retries before quitting after an error.
    #[clap(long, default_value = "3")]
    retries: u32,

    /// Seconds to wait between retries.
    #[clap(long, default_value = "30")]
    retry_delay: u64,

    /// Whether to log in JSON format.
    #[clap(long, env, default_value_t = false)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = TreeGenArgs::parse();

    let filter = tracing_subscriber::EnvFilter::builder()
        .with_default_directive(tracing_subscriber::filter::LevelFilter::INFO.into())
        .from_env_lossy();

    if args.log_json {
        tracing_subscriber::fmt().with_ansi(false).json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_ansi(false).with_env_filter(filter).init();
    }

    let config = TreeGenServiceConfig {
        network: args.network,
        interval: args.interval,
        target: TargetSnapshot {
            slot: args.target_slot,
            consensus_block: args.target_consensus_block,
            execution_block: args.target_execution_block,
        },
        intervals_passed: args.intervals_passed,
        output_dir: args.output_dir,
        trusted: args.trusted,
        approximate: args.approximate,
    };

    let service = TreeGenService::new(
        args.rpc_url,
        args.beacon_url,
        args.rewards_pool_address,
        args.network_settings_address,
        args.events_from_block,
        args.state_dir,
        config,
    )
    .await?;

    let mut failures = 0u32;
    loop {
        match service.run().await {
            Ok(TreeGenOutcome::Generated { index, artifacts }) => {
                tracing::info!("Interval {index} complete ({})", artifacts.content_id);
                return Ok(());
            }
            Ok(TreeGenOutcome::Approximated { index, pool_staker_eth }) => {
                println!("{index} {pool_staker_eth}");
                return Ok(());
            }
            Err(e) if is_fatal(&e) => {
                tracing::error!("Rewards tree generation failed: {:?}", e);
                return Err(e);
            }
            Err(e) => {
                failures += 1;
                tracing::error!("Error generating rewards tree: {:?}", e);
                if failures >= args.retries {
                    bail!("Maximum retries reached");
                }
                tracing::info!("Retrying in {} seconds", args.retry_delay);
                tokio::time::sleep(Duration::from_secs(args.retry_delay)).await;
            }
        }
    }
}
