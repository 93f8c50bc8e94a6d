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

//! Per-node and per-network reward accumulators.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use alloy_primitives::{Address, U256};
use futures_util::future::try_join_all;

use crate::{
    clients::ExecutionClient,
    error::GeneratorError,
    files::{NetworkReward, NodeReward},
    state::{MinipoolStatus, NetworkState},
};

/// The reward network every node can claim on.
pub const DEFAULT_NETWORK: u64 = 0;

/// Kind of reward being credited to a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RewardBucket {
    CollateralRpl,
    OracleDaoRpl,
    SmoothingPoolEth,
}

impl RewardBucket {
    fn of_node(self, reward: &mut NodeReward) -> &mut U256 {
        match self {
            RewardBucket::CollateralRpl => &mut reward.collateral_rpl,
            RewardBucket::OracleDaoRpl => &mut reward.oracle_dao_rpl,
            RewardBucket::SmoothingPoolEth => &mut reward.smoothing_pool_eth,
        }
    }

    fn of_network(self, reward: &mut NetworkReward) -> &mut U256 {
        match self {
            RewardBucket::CollateralRpl => &mut reward.collateral_rpl,
            RewardBucket::OracleDaoRpl => &mut reward.oracle_dao_rpl,
            RewardBucket::SmoothingPoolEth => &mut reward.smoothing_pool_eth,
        }
    }

    fn read_network(self, reward: &NetworkReward) -> U256 {
        match self {
            RewardBucket::CollateralRpl => reward.collateral_rpl,
            RewardBucket::OracleDaoRpl => reward.oracle_dao_rpl,
            RewardBucket::SmoothingPoolEth => reward.smoothing_pool_eth,
        }
    }
}

/// Rewards owed to each node and each reward network during a generation run.
///
/// A node's reward network is fixed the first time the node is credited. Networks that are not
/// enabled are replaced by [DEFAULT_NETWORK] and the node is recorded in
/// [RewardAccumulators::invalid_network_nodes].
#[derive(Debug, Clone)]
pub struct RewardAccumulators {
    pub nodes: BTreeMap<Address, NodeReward>,
    pub networks: BTreeMap<u64, NetworkReward>,
    /// Nodes whose requested network was not enabled, with the network they requested.
    pub invalid_network_nodes: BTreeMap<Address, u64>,
    enabled_networks: BTreeSet<u64>,
}

impl RewardAccumulators {
    pub fn new(enabled_networks: BTreeSet<u64>) -> Self {
        let mut enabled_networks = enabled_networks;
        enabled_networks.insert(DEFAULT_NETWORK);
        Self {
            nodes: BTreeMap::new(),
            networks: BTreeMap::new(),
            invalid_network_nodes: BTreeMap::new(),
            enabled_networks,
        }
    }

    pub fn is_enabled(&self, network: u64) -> bool {
        self.enabled_networks.contains(&network)
    }

    /// Add `amount` to the node's `bucket` and to the same bucket of the node's network.
    pub fn credit(&mut self, node: Address, network: u64, bucket: RewardBucket, amount: U256) {
        let network = match self.nodes.get(&node) {
            Some(existing) => existing.network,
            None if self.is_enabled(network) => network,
            None => {
                tracing::warn!(
                    "Node {node} requested reward network {network} which is not enabled; using network {DEFAULT_NETWORK}"
                );
                self.invalid_network_nodes.insert(node, network);
                DEFAULT_NETWORK
            }
        };

        let node_reward = self.nodes.entry(node).or_insert_with(|| NodeReward::new(node, network));
        *bucket.of_node(node_reward) += amount;

        let network_reward = self
            .networks
            .entry(network)
            .or_insert_with(|| NetworkReward { network, ..Default::default() });
        *bucket.of_network(network_reward) += amount;
    }

    /// Sum of `bucket` over all networks.
    pub fn network_total(&self, bucket: RewardBucket) -> U256 {
        self.networks.values().map(|reward| bucket.read_network(reward)).sum()
    }
}

/// Check that a calculated bucket total is within `epsilon` of the expected total.
///
/// Returns the absolute difference.
pub fn reconcile(
    bucket: &'static str,
    calculated: U256,
    expected: U256,
    epsilon: U256,
) -> Result<U256, GeneratorError> {
    let delta = calculated.abs_diff(expected);
    if delta > epsilon {
        return Err(GeneratorError::ReconciliationOverrun {
            bucket,
            calculated,
            expected,
            delta,
            epsilon,
        });
    }
    Ok(delta)
}

/// Reward networks of the nodes in `state` that can be credited at all: nodes with RPL collateral
/// rewards, oDAO members and nodes with a staking minipool.
pub fn creditable_networks(state: &NetworkState) -> BTreeSet<u64> {
    let odao: HashSet<Address> =
        state.oracle_dao_member_details.iter().map(|member| member.address).collect();
    let staking: HashSet<Address> = state
        .minipool_details
        .iter()
        .filter(|mpd| mpd.exists && mpd.status == MinipoolStatus::Staking)
        .map(|mpd| mpd.node_address)
        .collect();

    state
        .node_details
        .iter()
        .filter(|node| {
            (!node.effective_rpl_stake.is_zero() && !node.node_weight.is_zero())
                || odao.contains(&node.node_address)
                || staking.contains(&node.node_address)
        })
        .map(|node| node.reward_network)
        .filter(|network| *network != DEFAULT_NETWORK)
        .collect()
}

/// Determine which of the creditable reward networks in `state` are enabled at `block`.
pub async fn resolve_enabled_networks<E>(
    execution: &E,
    state: &NetworkState,
    block: u64,
) -> Result<BTreeSet<u64>, GeneratorError>
where
    E: ExecutionClient + ?Sized,
{
    let requested = creditable_networks(state);

    let checks = requested.into_iter().map(|network| async move {
        execution
            .is_network_enabled(network, block)
            .await
            .map(|enabled| (network, enabled))
            .map_err(|e| GeneratorError::client(format!("error checking reward network {network}"), e))
    });
    let results = try_join_all(checks).await?;

    let mut enabled: BTreeSet<u64> =
        results.into_iter().filter_map(|(network, enabled)| enabled.then_some(network)).collect();
    enabled.insert(DEFAULT_NETWORK);
    Ok(enabled)
}
