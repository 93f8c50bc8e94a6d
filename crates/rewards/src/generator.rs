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

//! Rewards tree generation for one interval.

use std::{collections::BTreeMap, sync::Arc};

use alloy_primitives::{Address, U256};

use crate::{
    accumulators::{resolve_enabled_networks, RewardAccumulators},
    clients::{BlockHeader, ConsensusClient, ExecutionClient, RewardsEvent, SnapshotEnd},
    duties::{smoothing_pool_node_details, DutyTracker, NodeSmoothingDetails},
    error::GeneratorError,
    files::{PerformanceFile, RewardsFile, RULESET_VERSION},
    interval::{resolve_interval, IntervalBounds},
    merkle::apply_merkle_tree,
    rpl::allocate_rpl,
    smoothing::{apply_synthetic_attestations, calculate_node_rewards, credit_smoothing_rewards},
    state::NetworkState,
};

/// Output of a generation run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerateTreeResult {
    pub rewards_file: RewardsFile,
    pub performance_file: PerformanceFile,
    /// Nodes whose requested reward network was not enabled, with the network they requested.
    pub invalid_network_nodes: BTreeMap<Address, u64>,
}

/// How minipool performance is measured for the smoothing pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PerformanceCheck {
    /// Walk every epoch and score the observed attestations.
    Attestations,
    /// One synthetic attestation per opted-in minipool.
    Synthetic,
}

/// Everything a single generation run accumulates. Owned by the task driving the run.
struct GenerationContext<'s> {
    state: &'s NetworkState,
    index: u64,
    snapshot_header: BlockHeader,
    bounds: IntervalBounds,
    accumulators: RewardAccumulators,
    rewards_file: RewardsFile,
    performance_file: PerformanceFile,
}

impl<'s> GenerationContext<'s> {
    fn new(
        network: &str,
        index: u64,
        intervals_passed: u64,
        snapshot_header: BlockHeader,
        state: &'s NetworkState,
        accumulators: RewardAccumulators,
    ) -> Self {
        Self {
            state,
            index,
            snapshot_header,
            bounds: IntervalBounds::default(),
            accumulators,
            rewards_file: RewardsFile::new(network, index, intervals_passed),
            performance_file: PerformanceFile::new(network, index),
        }
    }

    fn set_bounds(&mut self, bounds: IntervalBounds) {
        self.bounds = bounds;
        self.rewards_file.interval = bounds;
        self.performance_file.interval = bounds;
    }

    fn calculate_rpl_rewards(&mut self) -> Result<(), GeneratorError> {
        let allocation =
            allocate_rpl(self.state, self.snapshot_header.timestamp, &mut self.accumulators)?;
        let totals = &mut self.rewards_file.total_rewards;
        totals.protocol_dao_rpl = allocation.protocol_dao_rpl;
        totals.total_collateral_rpl = allocation.total_collateral_rpl;
        totals.total_oracle_dao_rpl = allocation.total_oracle_dao_rpl;
        totals.total_node_weight = allocation.total_node_weight;
        Ok(())
    }

    /// Whether this interval distributes any smoothing pool ETH.
    fn has_smoothing_rewards(&self) -> bool {
        let balance = self.state.network_details.smoothing_pool_balance;
        tracing::info!("Smoothing Pool balance: {balance}");
        // The first interval has no defined start, so it never pays out the smoothing pool
        !balance.is_zero() && self.index != 0
    }

    fn smoothing_node_details(&self) -> Vec<NodeSmoothingDetails> {
        let nodes = smoothing_pool_node_details(self.state, &self.state.index());
        let eligible = nodes.iter().filter(|node| node.eligible).count();
        tracing::info!("{eligible} / {} nodes were eligible for Smoothing Pool rewards", nodes.len());
        nodes
    }

    async fn calculate_eth_rewards<C>(
        &mut self,
        consensus: &C,
        check: PerformanceCheck,
    ) -> Result<(), GeneratorError>
    where
        C: ConsensusClient + ?Sized,
    {
        if !self.has_smoothing_rewards() {
            return Ok(());
        }
        let balance = self.state.network_details.smoothing_pool_balance;

        let mut nodes = self.smoothing_node_details();
        let totals = match check {
            PerformanceCheck::Attestations => {
                DutyTracker::new(self.state, self.bounds, &mut nodes)
                    .process_interval(consensus)
                    .await?
            }
            PerformanceCheck::Synthetic => {
                apply_synthetic_attestations(&mut nodes, self.snapshot_header.timestamp)
            }
        };

        let allocation = calculate_node_rewards(&mut nodes, balance, totals, self.state.epsilon())?;
        self.performance_file.minipool_performance =
            credit_smoothing_rewards(&nodes, &mut self.accumulators);

        let totals = &mut self.rewards_file.total_rewards;
        totals.pool_staker_smoothing_pool_eth = allocation.pool_staker_eth;
        totals.node_operator_smoothing_pool_eth = allocation.node_operator_eth;
        totals.total_smoothing_pool_eth = balance;
        Ok(())
    }

    /// Move the accumulated rewards into the files and build the Merkle tree.
    fn finish(self) -> Result<GenerateTreeResult, GeneratorError> {
        let Self { accumulators, mut rewards_file, performance_file, .. } = self;

        // Both maps are keyed in the order the files require
        rewards_file.node_rewards = accumulators.nodes.into_values().collect();
        rewards_file.network_rewards = accumulators.networks.into_values().collect();
        apply_merkle_tree(&mut rewards_file)?;

        Ok(GenerateTreeResult {
            rewards_file,
            performance_file,
            invalid_network_nodes: accumulators.invalid_network_nodes,
        })
    }
}

/// Generates rewards trees from a network state snapshot and the beacon chain history.
#[derive(Clone)]
pub struct TreeGenerator {
    consensus: Arc<dyn ConsensusClient>,
    execution: Arc<dyn ExecutionClient>,
    network: String,
}

impl TreeGenerator {
    pub fn new(
        consensus: Arc<dyn ConsensusClient>,
        execution: Arc<dyn ExecutionClient>,
        network: impl Into<String>,
    ) -> Self {
        Self { consensus, execution, network: network.into() }
    }

    pub fn ruleset_version(&self) -> u64 {
        RULESET_VERSION
    }

    /// Generate the rewards and performance files for interval `index`.
    ///
    /// `previous` is the event of interval `index - 1`; it is looked up when not provided. It is
    /// not used for the first interval.
    pub async fn generate_tree(
        &self,
        index: u64,
        snapshot_header: BlockHeader,
        intervals_passed: u64,
        state: &NetworkState,
        previous: Option<RewardsEvent>,
        snapshot_end: SnapshotEnd,
    ) -> Result<GenerateTreeResult, GeneratorError> {
        tracing::info!("Generating tree for interval {index} using ruleset v{RULESET_VERSION}");
        tracing::info!("Creating tree for {} nodes", state.node_details.len());

        let mut ctx = self.context(index, intervals_passed, snapshot_header, state).await?;
        if index > 0 {
            let bounds = self.interval_bounds(index, state, previous, &snapshot_end).await?;
            ctx.set_bounds(bounds);
        }

        ctx.calculate_rpl_rewards()?;
        ctx.calculate_eth_rewards(self.consensus.as_ref(), PerformanceCheck::Attestations).await?;
        ctx.finish()
    }

    /// Estimate the pool stakers' share of the smoothing pool without checking attestations.
    ///
    /// Every opted-in minipool is scored as if it made exactly one attestation. The result is an
    /// estimate and must never be used for a rewards submission.
    pub async fn approximate_staker_share(
        &self,
        index: u64,
        snapshot_header: BlockHeader,
        state: &NetworkState,
        previous: Option<RewardsEvent>,
        snapshot_end: SnapshotEnd,
    ) -> Result<U256, GeneratorError> {
        tracing::info!("Approximating tree for interval {index} using ruleset v{RULESET_VERSION}");

        let mut ctx = self.context(index, 0, snapshot_header, state).await?;
        if !ctx.has_smoothing_rewards() {
            return Ok(U256::ZERO);
        }
        let bounds = self.interval_bounds(index, state, previous, &snapshot_end).await?;
        ctx.set_bounds(bounds);

        ctx.calculate_eth_rewards(self.consensus.as_ref(), PerformanceCheck::Synthetic).await?;
        Ok(ctx.rewards_file.total_rewards.pool_staker_smoothing_pool_eth)
    }

    async fn context<'s>(
        &self,
        index: u64,
        intervals_passed: u64,
        snapshot_header: BlockHeader,
        state: &'s NetworkState,
    ) -> Result<GenerationContext<'s>, GeneratorError> {
        let enabled =
            resolve_enabled_networks(self.execution.as_ref(), state, snapshot_header.number)
                .await?;
        Ok(GenerationContext::new(
            &self.network,
            index,
            intervals_passed,
            snapshot_header,
            state,
            RewardAccumulators::new(enabled),
        ))
    }

    async fn interval_bounds(
        &self,
        index: u64,
        state: &NetworkState,
        previous: Option<RewardsEvent>,
        snapshot_end: &SnapshotEnd,
    ) -> Result<IntervalBounds, GeneratorError> {
        let expected = index - 1;
        let previous = match previous {
            Some(event) => event,
            // Finalized events are immutable, so querying at the head is fine
            None => self.execution.rewards_event(expected).await.map_err(|e| {
                GeneratorError::client(format!("error getting event for interval {expected}"), e)
            })?,
        };
        if previous.index != expected {
            return Err(GeneratorError::MissingPreviousInterval { index: expected });
        }

        let resolved = resolve_interval(
            self.consensus.as_ref(),
            self.execution.as_ref(),
            &state.beacon_config,
            &previous,
            snapshot_end,
        )
        .await?;
        Ok(resolved.bounds)
    }
}
