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

use std::{path::PathBuf, sync::Arc};

use alloy::primitives::{Address, U256};
use anyhow::{Context, Result};
use smartnode_rewards::{
    ArtifactSink, BeaconConfig, ConsensusClient, ExecutionClient, GeneratorError,
    LocalArtifactSink, PersistedArtifacts, SnapshotEnd, TreeGenerator,
};
use thiserror::Error;
use url::Url;

use crate::{beacon::BeaconHttpClient, execution::RpcExecutionClient};

/// Where the interval being generated ends.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TargetSnapshot {
    /// Slot the interval end time is taken from.
    pub slot: u64,
    /// Last consensus block of the interval. Defaults to `slot`.
    pub consensus_block: Option<u64>,
    /// Execution block bound to the last consensus block. Looked up when not set.
    pub execution_block: Option<u64>,
}

#[derive(Clone, Debug)]
pub struct TreeGenServiceConfig {
    /// Network name recorded in the artifacts.
    pub network: String,
    /// Interval to generate. Defaults to the reward index of the network state.
    pub interval: Option<u64>,
    pub target: TargetSnapshot,
    pub intervals_passed: u64,
    pub output_dir: PathBuf,
    /// Trusted nodes also write the binary rewards file.
    pub trusted: bool,
    /// Only estimate the pool stakers' share of the smoothing pool.
    pub approximate: bool,
}

#[derive(Error, Debug)]
pub enum TreeGenError {
    #[error(
        "network state at block {block} was taken with beacon config {state:?}, but the beacon \
         node reports {chain:?}"
    )]
    BeaconConfigMismatch { block: u64, state: BeaconConfig, chain: BeaconConfig },
}

/// Outcome of a single run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TreeGenOutcome {
    Generated { index: u64, artifacts: PersistedArtifacts },
    Approximated { index: u64, pool_staker_eth: U256 },
}

pub struct TreeGenService {
    consensus: Arc<dyn ConsensusClient>,
    execution: Arc<dyn ExecutionClient>,
    sink: Arc<dyn ArtifactSink>,
    config: TreeGenServiceConfig,
}

impl TreeGenService {
    /// Connect to the beacon node and the execution client.
    pub async fn new(
        rpc_url: Url,
        beacon_url: Url,
        rewards_pool_address: Address,
        network_settings_address: Address,
        events_from_block: u64,
        state_dir: PathBuf,
        config: TreeGenServiceConfig,
    ) -> Result<Self> {
        let consensus = BeaconHttpClient::connect(beacon_url).await?;
        let execution = RpcExecutionClient::new(
            rpc_url,
            rewards_pool_address,
            network_settings_address,
            events_from_block,
            state_dir,
        );
        let sink = LocalArtifactSink::new(config.output_dir.clone());
        Ok(Self::with_clients(Arc::new(consensus), Arc::new(execution), Arc::new(sink), config))
    }

    pub fn with_clients(
        consensus: Arc<dyn ConsensusClient>,
        execution: Arc<dyn ExecutionClient>,
        sink: Arc<dyn ArtifactSink>,
        config: TreeGenServiceConfig,
    ) -> Self {
        Self { consensus, execution, sink, config }
    }

    async fn snapshot_end(&self) -> Result<SnapshotEnd> {
        let target = self.config.target;
        let consensus_block = target.consensus_block.unwrap_or(target.slot);
        let execution_block = match target.execution_block {
            Some(block) => block,
            None => {
                self.consensus
                    .beacon_block(consensus_block)
                    .await?
                    .with_context(|| format!("Consensus block {consensus_block} not found"))?
                    .execution_block_number
            }
        };
        Ok(SnapshotEnd { slot: target.slot, consensus_block, execution_block })
    }

    pub async fn run(&self) -> Result<TreeGenOutcome> {
        let start_time = std::time::Instant::now();
        let snapshot_end = self.snapshot_end().await?;
        tracing::info!(
            "Snapshot ends at slot {} (consensus block {}, execution block {})",
            snapshot_end.slot,
            snapshot_end.consensus_block,
            snapshot_end.execution_block
        );

        let state = self.execution.network_state(snapshot_end.execution_block).await?;
        let chain = self.consensus.beacon_config().await?;
        if state.beacon_config != chain {
            return Err(TreeGenError::BeaconConfigMismatch {
                block: snapshot_end.execution_block,
                state: state.beacon_config,
                chain,
            }
            .into());
        }
        let snapshot_header = self.execution.header_by_number(snapshot_end.execution_block).await?;
        let index = self.config.interval.unwrap_or(state.network_details.reward_index);

        let generator = TreeGenerator::new(
            self.consensus.clone(),
            self.execution.clone(),
            self.config.network.clone(),
        );

        if self.config.approximate {
            let pool_staker_eth = generator
                .approximate_staker_share(index, snapshot_header, &state, None, snapshot_end)
                .await?;
            tracing::info!(
                "Approximate pool staker share of the Smoothing Pool for interval {index}: {pool_staker_eth}"
            );
            return Ok(TreeGenOutcome::Approximated { index, pool_staker_eth });
        }

        let result = generator
            .generate_tree(
                index,
                snapshot_header,
                self.config.intervals_passed,
                &state,
                None,
                snapshot_end,
            )
            .await?;

        for (node, network) in &result.invalid_network_nodes {
            tracing::warn!("Node {node} requested invalid reward network {network}");
        }

        let artifacts = self
            .sink
            .persist(&result.rewards_file, &result.performance_file, self.config.trusted)
            .await
            .context("Failed to save rewards artifacts")?;
        for (name, id) in &artifacts.artifact_ids {
            tracing::info!("{name}: {id}");
        }
        tracing::info!(
            "Generated interval {index} in {:.2}s (content ID {})",
            start_time.elapsed().as_secs_f64(),
            artifacts.content_id
        );

        Ok(TreeGenOutcome::Generated { index, artifacts })
    }
}

/// Whether an error from [TreeGenService::run] will recur no matter how often the run is retried.
pub fn is_fatal(err: &anyhow::Error) -> bool {
    err.downcast_ref::<TreeGenError>().is_some()
        || err.downcast_ref::<GeneratorError>().is_some_and(|err| !err.is_retryable())
}
