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

//! RPL rewards allocation between the protocol treasury, the oracle DAO and node operators.

use alloy_primitives::{Address, U256};

use crate::{
    accumulators::{reconcile, RewardAccumulators, RewardBucket, DEFAULT_NETWORK},
    error::GeneratorError,
    state::{NetworkState, WEI_PER_ETH},
};

const SIX: U256 = U256::from_limbs([6, 0, 0, 0]);

/// Result of the RPL allocation for an interval.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RplAllocation {
    /// Residual of the pending rewards after the node and oracle shares.
    pub protocol_dao_rpl: U256,
    pub total_collateral_rpl: U256,
    pub total_oracle_dao_rpl: U256,
    pub total_node_weight: U256,
}

/// Weight of the stake-weight term in the collateral formula, in sixths.
///
/// Phases out with the interval index: 6 up to interval 17, then one less per interval, never
/// below 1.
pub fn weight_factor(reward_index: u64) -> u64 {
    let elapsed = reward_index.saturating_sub(17);
    6u64.saturating_sub(elapsed).max(1)
}

/// Collateral RPL owed to a single node.
///
/// `pool * C * weight / (total_weight * 6) + pool * (6 - C) * stake / (total_stake * 6)`
pub fn calculate_node_rpl_rewards(
    collateral_rewards: U256,
    node_effective_stake: U256,
    total_effective_stake: U256,
    node_weight: U256,
    total_node_weight: U256,
    reward_index: u64,
) -> U256 {
    if node_effective_stake.is_zero() || node_weight.is_zero() {
        return U256::ZERO;
    }

    let c = U256::from(weight_factor(reward_index));
    let weight_rewards = collateral_rewards * node_weight * c / (total_node_weight * SIX);
    if c == SIX {
        return weight_rewards;
    }

    let stake_rewards =
        collateral_rewards * (SIX - c) * node_effective_stake / (total_effective_stake * SIX);
    weight_rewards + stake_rewards
}

/// Allocate the interval's pending RPL rewards and credit every node's share.
///
/// The protocol treasury share is computed as the residual, so the three shares always sum to
/// the pending rewards exactly.
pub fn allocate_rpl(
    state: &NetworkState,
    snapshot_time: u64,
    accumulators: &mut RewardAccumulators,
) -> Result<RplAllocation, GeneratorError> {
    let details = &state.network_details;
    let pending_rewards = details.pending_rpl_rewards;
    tracing::info!("Pending RPL rewards: {pending_rewards}");
    if pending_rewards.is_zero() {
        return Err(GeneratorError::NoPendingRewards);
    }
    let epsilon = state.epsilon();

    let expected_pdao_rewards = pending_rewards * details.protocol_dao_rewards_percent / WEI_PER_ETH;
    tracing::info!("Expected Protocol DAO rewards: {expected_pdao_rewards}");

    let total_node_rewards = pending_rewards * details.node_operator_rewards_percent / WEI_PER_ETH;
    tracing::info!("Approx. total collateral RPL rewards: {total_node_rewards}");

    let total_effective_stake: U256 =
        state.node_details.iter().map(|node| node.effective_rpl_stake).sum();
    let total_node_weight: U256 = state.node_details.iter().map(|node| node.node_weight).sum();

    let mut allocation = RplAllocation::default();
    if !total_effective_stake.is_zero() && !total_node_weight.is_zero() {
        allocation.total_node_weight = total_node_weight;

        tracing::info!("Calculating individual collateral rewards...");
        for node in &state.node_details {
            let node_rewards = calculate_node_rpl_rewards(
                total_node_rewards,
                node.effective_rpl_stake,
                total_effective_stake,
                node.node_weight,
                total_node_weight,
                details.reward_index,
            );
            if !node_rewards.is_zero() {
                accumulators.credit(
                    node.node_address,
                    node.reward_network,
                    RewardBucket::CollateralRpl,
                    node_rewards,
                );
            }
        }

        let calculated = accumulators.network_total(RewardBucket::CollateralRpl);
        let delta = reconcile("collateral RPL", calculated, total_node_rewards, epsilon)?;
        tracing::info!("Calculated collateral rewards: {calculated} (error = {delta} wei)");
        allocation.total_collateral_rpl = calculated;
    } else {
        tracing::warn!(
            "None of the nodes were eligible for collateral rewards, sending everything to the pDAO"
        );
    }

    allocation.total_oracle_dao_rpl = allocate_oracle_dao_rpl(state, snapshot_time, accumulators)?;

    allocation.protocol_dao_rpl =
        pending_rewards - allocation.total_collateral_rpl - allocation.total_oracle_dao_rpl;
    tracing::info!(
        "Actual Protocol DAO rewards: {} to account for truncation",
        allocation.protocol_dao_rpl
    );
    tracing::info!("Total node weight: {total_node_weight}");

    Ok(allocation)
}

/// Split the oracle DAO share by each member's participation time in the interval.
fn allocate_oracle_dao_rpl(
    state: &NetworkState,
    snapshot_time: u64,
    accumulators: &mut RewardAccumulators,
) -> Result<U256, GeneratorError> {
    let details = &state.network_details;
    let total_odao_rewards =
        details.pending_rpl_rewards * details.trusted_node_operator_rewards_percent / WEI_PER_ETH;
    tracing::info!("Total Oracle DAO RPL rewards: {total_odao_rewards}");

    let participation: Vec<(Address, U256)> = state
        .oracle_dao_member_details
        .iter()
        .map(|member| {
            let eligible = snapshot_time.saturating_sub(member.joined_time);
            (member.address, U256::from(eligible.min(details.interval_duration)))
        })
        .collect();
    let total_participation: U256 = participation.iter().map(|(_, time)| *time).sum();
    if total_participation.is_zero() {
        tracing::warn!(
            "No Oracle DAO participation during the interval ({} members), sending its share to the pDAO",
            participation.len()
        );
        return Ok(U256::ZERO);
    }

    let nodes = state.index().nodes_by_address;
    for (address, time) in participation {
        let member_rewards = time * total_odao_rewards / total_participation;
        let network = match nodes.get(&address) {
            Some(node) => node.reward_network,
            None => {
                tracing::warn!("Oracle DAO member {address} is not a registered node");
                DEFAULT_NETWORK
            }
        };
        accumulators.credit(address, network, RewardBucket::OracleDaoRpl, member_rewards);
    }

    let calculated = accumulators.network_total(RewardBucket::OracleDaoRpl);
    let delta = reconcile("Oracle DAO RPL", calculated, total_odao_rewards, state.epsilon())?;
    tracing::info!("Calculated Oracle DAO rewards: {calculated} (error = {delta} wei)");
    Ok(calculated)
}
