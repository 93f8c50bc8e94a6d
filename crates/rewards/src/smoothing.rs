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

//! Smoothing pool ETH allocation between pool stakers and node operators.

use std::collections::BTreeMap;

use alloy_primitives::{Address, U256};

use crate::{
    accumulators::{reconcile, RewardAccumulators, RewardBucket},
    duties::{attestation_score, AttestationTotals, NodeSmoothingDetails},
    error::GeneratorError,
    files::MinipoolPerformance,
    state::WEI_PER_ETH,
};

/// Split of the smoothing pool balance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EthAllocation {
    /// Residual of the balance after every minipool share.
    pub pool_staker_eth: U256,
    /// Sum of every minipool share.
    pub node_operator_eth: U256,
}

/// Give every minipool of eligible, currently opted-in nodes one synthetic attestation scored
/// with its bond and fee at `el_end_time`.
///
/// This skips the attestation walk entirely and is only good for estimates.
pub fn apply_synthetic_attestations(
    nodes: &mut [NodeSmoothingDetails],
    el_end_time: u64,
) -> AttestationTotals {
    let mut totals = AttestationTotals::default();
    for node in nodes.iter_mut() {
        if !(node.eligible && node.opted_in && el_end_time > node.opt_in_time) {
            continue;
        }
        for minipool in node.minipools.iter_mut() {
            minipool.completed.insert(0);
            let (bond, fee) = minipool.bond.at(el_end_time);
            let score = attestation_score(bond, fee);
            minipool.attestation_score += score;
            totals.total_score += score;
            totals.successful_attestations += 1;
        }
    }
    totals
}

/// Distribute `balance` across minipools in proportion to their attestation score.
///
/// Minipools that had no duties or were inactive for the interval earn nothing. Pool stakers
/// receive whatever the minipools don't, so the two shares always sum to `balance`.
pub fn calculate_node_rewards(
    nodes: &mut [NodeSmoothingDetails],
    balance: U256,
    totals: AttestationTotals,
    epsilon: U256,
) -> Result<EthAllocation, GeneratorError> {
    if totals.total_score.is_zero() || totals.successful_attestations == 0 {
        tracing::warn!(
            "Total attestation score = {}, successful attestations = {}... sending the whole smoothing pool balance to the pool stakers",
            totals.total_score,
            totals.successful_attestations
        );
        return Ok(EthAllocation { pool_staker_eth: balance, node_operator_eth: U256::ZERO });
    }

    let total_node_op_share = balance * totals.total_score
        / U256::from(totals.successful_attestations)
        / WEI_PER_ETH;

    let mut total_eth_for_minipools = U256::ZERO;
    for node in nodes.iter_mut() {
        node.smoothing_pool_eth = U256::ZERO;
        if !node.eligible {
            continue;
        }
        for minipool in node.minipools.iter_mut() {
            if !minipool.had_duties() || !minipool.was_active {
                minipool.was_active = false;
                minipool.minipool_share = U256::ZERO;
                continue;
            }
            minipool.minipool_share =
                total_node_op_share * minipool.attestation_score / totals.total_score;
            node.smoothing_pool_eth += minipool.minipool_share;
        }
        total_eth_for_minipools += node.smoothing_pool_eth;
    }

    let delta =
        reconcile("smoothing pool ETH", total_eth_for_minipools, total_node_op_share, epsilon)?;
    let pool_staker_eth = balance - total_eth_for_minipools;

    tracing::info!("Pool staker ETH: {}", balance - total_node_op_share);
    tracing::info!("Node Op ETH: {total_node_op_share}");
    tracing::info!("Calculated NO ETH: {total_eth_for_minipools} (error = {delta} wei)");
    tracing::info!("Adjusting pool staker ETH to {pool_staker_eth} to account for truncation");

    Ok(EthAllocation { pool_staker_eth, node_operator_eth: total_eth_for_minipools })
}

/// Credit every node's smoothing pool ETH and collect the performance of its minipools.
///
/// Only nodes that earned something are credited and reported. Minipools without any duty
/// during the interval are left out of the report.
pub fn credit_smoothing_rewards(
    nodes: &[NodeSmoothingDetails],
    accumulators: &mut RewardAccumulators,
) -> BTreeMap<Address, MinipoolPerformance> {
    let mut performance = BTreeMap::new();
    for node in nodes {
        if !node.eligible || node.smoothing_pool_eth.is_zero() {
            continue;
        }
        accumulators.credit(
            node.address,
            node.reward_network,
            RewardBucket::SmoothingPoolEth,
            node.smoothing_pool_eth,
        );

        for minipool in &node.minipools {
            if !minipool.had_duties() {
                continue;
            }
            performance.insert(
                minipool.address,
                MinipoolPerformance {
                    pubkey: minipool.pubkey,
                    successful_attestations: minipool.completed.len() as u64,
                    missed_attestations: minipool.missed_attestations(),
                    attestation_score: minipool.attestation_score,
                    eth_earned: minipool.minipool_share,
                    missing_attestation_slots: minipool.missing_slots().collect(),
                },
            );
        }
    }
    performance
}
