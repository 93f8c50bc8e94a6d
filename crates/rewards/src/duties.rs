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

//! Attestation duty tracking for smoothing pool minipools.
//!
//! Every slot in the interval where an eligible minipool owed an attestation is recorded as an
//! owed duty. Attestations observed on chain mark duties as fulfilled, and fulfilled duties that
//! happened while the node was opted into the smoothing pool are scored. Missed duties are
//! whatever was owed but never fulfilled.

use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    time::Instant,
};

use alloy_primitives::{Address, U256};
use futures_util::future::{try_join, try_join_all};

use crate::{
    clients::{AttestationInfo, Committee, ConsensusClient},
    error::GeneratorError,
    interval::IntervalBounds,
    state::{
        BeaconConfig, MinipoolDetails, MinipoolStatus, NetworkState, StateIndex, FAR_EPOCH,
        VALIDATOR_DEPOSIT, WEI_PER_ETH,
    },
};

/// Minipool penalty count at which a node is excluded from the smoothing pool.
pub const PENALTY_THRESHOLD: u64 = 3;

/// Epochs processed between progress reports.
const PROGRESS_INTERVAL: u64 = 100;

/// Bond and commission history of a minipool, enough to know both at any point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BondHistory {
    pub node_deposit_balance: U256,
    pub node_fee: U256,
    /// Zero if the bond was never reduced.
    pub last_reduction_time: u64,
    pub previous_deposit_balance: U256,
    pub previous_node_fee: U256,
}

impl BondHistory {
    pub fn from_details(details: &MinipoolDetails) -> Self {
        Self {
            node_deposit_balance: details.node_deposit_balance,
            node_fee: details.node_fee,
            last_reduction_time: details.last_bond_reduction_time,
            previous_deposit_balance: details.last_bond_reduction_prev_value,
            previous_node_fee: details.last_bond_reduction_prev_node_fee,
        }
    }

    /// Bond and fee in effect at `time`.
    pub fn at(&self, time: u64) -> (U256, U256) {
        if self.last_reduction_time == 0 || self.last_reduction_time <= time {
            return (self.node_deposit_balance, self.node_fee);
        }
        if self.previous_node_fee.is_zero() {
            // Reductions recorded before the previous fee was tracked
            return (self.previous_deposit_balance, self.node_fee);
        }
        (self.previous_deposit_balance, self.previous_node_fee)
    }
}

/// Score of one successful attestation: `fee + (bond / 32) * (1 - fee)`, scaled by 1e18.
pub fn attestation_score(bond: U256, fee: U256) -> U256 {
    (WEI_PER_ETH - fee) * bond / VALIDATOR_DEPOSIT + fee
}

/// Attestation tracking of a single minipool over the interval.
#[derive(Debug, Clone)]
pub struct MinipoolInfo {
    pub address: Address,
    pub pubkey: crate::state::ValidatorPubkey,
    pub validator_index: Option<u64>,
    pub bond: BondHistory,
    /// Time the minipool entered the staking status.
    pub staking_since: u64,
    /// Slots where the minipool owed an attestation.
    pub owed: BTreeSet<u64>,
    /// Owed slots for which an attestation was observed.
    pub fulfilled: BTreeSet<u64>,
    /// Fulfilled slots that were scored.
    pub completed: BTreeSet<u64>,
    pub was_active: bool,
    pub attestation_score: U256,
    /// Smoothing pool ETH earned by this minipool.
    pub minipool_share: U256,
}

impl MinipoolInfo {
    fn new(details: &MinipoolDetails) -> Self {
        Self {
            address: details.minipool_address,
            pubkey: details.pubkey,
            validator_index: None,
            bond: BondHistory::from_details(details),
            staking_since: details.status_time,
            owed: BTreeSet::new(),
            fulfilled: BTreeSet::new(),
            completed: BTreeSet::new(),
            was_active: true,
            attestation_score: U256::ZERO,
            minipool_share: U256::ZERO,
        }
    }

    /// Owed slots without an observed attestation, ascending.
    pub fn missing_slots(&self) -> impl Iterator<Item = u64> + '_ {
        self.owed.difference(&self.fulfilled).copied()
    }

    pub fn missed_attestations(&self) -> u64 {
        self.missing_slots().count() as u64
    }

    /// Whether the minipool had any duty at all during the interval.
    pub fn had_duties(&self) -> bool {
        !self.completed.is_empty() || self.missing_slots().next().is_some()
    }
}

/// Smoothing pool view of a node for the interval.
#[derive(Debug, Clone)]
pub struct NodeSmoothingDetails {
    pub address: Address,
    pub reward_network: u64,
    pub opted_in: bool,
    pub opt_in_time: u64,
    pub opt_out_time: u64,
    /// Set when the node has at least one staking minipool and none of them is penalized.
    pub eligible: bool,
    pub minipools: Vec<MinipoolInfo>,
    pub smoothing_pool_eth: U256,
}

impl NodeSmoothingDetails {
    pub fn is_opted_in_at(&self, time: u64) -> bool {
        self.opt_in_time <= time && time <= self.opt_out_time
    }
}

/// Build the smoothing pool details of every node in `state`, in snapshot order.
pub fn smoothing_pool_node_details(
    state: &NetworkState,
    index: &StateIndex<'_>,
) -> Vec<NodeSmoothingDetails> {
    tracing::info!("Getting details of nodes for Smoothing Pool calculation...");
    let mut details = Vec::with_capacity(state.node_details.len());
    for node in &state.node_details {
        let (opt_in_time, opt_out_time) = if node.smoothing_pool_registration_state {
            (node.smoothing_pool_registration_changed, u64::MAX)
        } else {
            (0, node.smoothing_pool_registration_changed)
        };
        let mut node_details = NodeSmoothingDetails {
            address: node.node_address,
            reward_network: node.reward_network,
            opted_in: node.smoothing_pool_registration_state,
            opt_in_time,
            opt_out_time,
            eligible: false,
            minipools: Vec::new(),
            smoothing_pool_eth: U256::ZERO,
        };

        let staking = index
            .minipools_by_node
            .get(&node.node_address)
            .into_iter()
            .flatten()
            .filter(|mpd| mpd.exists && mpd.status == MinipoolStatus::Staking);
        let mut penalized = false;
        for mpd in staking {
            if mpd.penalty_count >= PENALTY_THRESHOLD {
                tracing::info!(
                    "Node {} has penalized minipool {}; excluding it from the Smoothing Pool",
                    node.node_address,
                    mpd.minipool_address
                );
                penalized = true;
                break;
            }
            node_details.minipools.push(MinipoolInfo::new(mpd));
        }
        if penalized {
            node_details.minipools.clear();
        }
        node_details.eligible = !node_details.minipools.is_empty();
        details.push(node_details);
    }
    details
}

/// Location of a minipool in the node details: (node position, minipool position).
type MinipoolKey = (usize, usize);

/// Interval-wide attestation totals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AttestationTotals {
    pub total_score: U256,
    pub successful_attestations: u64,
}

/// Walks every epoch of an interval and scores the attestations of eligible minipools.
pub struct DutyTracker<'a> {
    config: BeaconConfig,
    bounds: IntervalBounds,
    nodes: &'a mut [NodeSmoothingDetails],
    validators: HashMap<u64, MinipoolKey>,
    /// Unmatched duties by (slot, committee index), then committee position. Matched positions
    /// and committees past the inclusion window are removed.
    duties: HashMap<(u64, u64), BTreeMap<usize, MinipoolKey>>,
    totals: AttestationTotals,
}

impl<'a> DutyTracker<'a> {
    /// Link each eligible minipool to its validator index.
    ///
    /// Minipools whose validator is unknown, pending, never scheduled for activation, activated
    /// after the interval or exited before it are marked inactive and never tracked.
    pub fn new(
        state: &NetworkState,
        bounds: IntervalBounds,
        nodes: &'a mut [NodeSmoothingDetails],
    ) -> Self {
        let config = state.beacon_config;
        let mut validators = HashMap::new();
        for (node_pos, node) in nodes.iter_mut().enumerate() {
            if !node.eligible {
                continue;
            }
            for (minipool_pos, minipool) in node.minipools.iter_mut().enumerate() {
                let Some(status) = state.validator_details.get(&minipool.pubkey) else {
                    minipool.was_active = false;
                    continue;
                };
                if status.status.is_pending() || status.activation_epoch == FAR_EPOCH {
                    minipool.was_active = false;
                    continue;
                }
                let activation_slot = config.first_slot_of(status.activation_epoch);
                if activation_slot > bounds.consensus_end_block {
                    minipool.was_active = false;
                    continue;
                }
                if status.exit_epoch != FAR_EPOCH
                    && config.first_slot_of(status.exit_epoch) < bounds.consensus_start_block
                {
                    minipool.was_active = false;
                    continue;
                }
                minipool.validator_index = Some(status.index);
                validators.insert(status.index, (node_pos, minipool_pos));
            }
        }

        Self {
            config,
            bounds,
            nodes,
            validators,
            duties: HashMap::new(),
            totals: AttestationTotals::default(),
        }
    }

    /// Number of minipools being tracked.
    pub fn tracked_minipools(&self) -> usize {
        self.validators.len()
    }

    /// Process every epoch of the interval, plus the following epoch for late inclusions.
    pub async fn process_interval<C>(
        mut self,
        consensus: &C,
    ) -> Result<AttestationTotals, GeneratorError>
    where
        C: ConsensusClient + ?Sized,
    {
        let start_epoch = self.config.epoch_of(self.bounds.consensus_start_block);
        let end_epoch = self.config.epoch_of(self.bounds.consensus_end_block);

        tracing::info!(
            "Checking participation of {} minipools for epochs {start_epoch} to {end_epoch}",
            self.tracked_minipools()
        );
        tracing::info!("NOTE: this will take a long time, progress is reported every 100 epochs");

        let report_start = Instant::now();
        let mut epochs_done = 0;
        for epoch in start_epoch..=end_epoch {
            if epochs_done == PROGRESS_INTERVAL {
                let span = (end_epoch - start_epoch).max(1);
                tracing::info!(
                    "On epoch {epoch} of {end_epoch} ({:.2}%)... ({:?} so far)",
                    (epoch - start_epoch) as f64 / span as f64 * 100.0,
                    report_start.elapsed()
                );
                epochs_done = 0;
            }
            self.process_epoch(consensus, epoch, true).await?;
            epochs_done += 1;
        }

        // Attestations for the last epoch can be included in the next one
        self.process_epoch(consensus, end_epoch + 1, false).await?;

        tracing::info!(
            "Finished participation check (total time = {:?})",
            report_start.elapsed()
        );
        Ok(self.totals)
    }

    async fn process_epoch<C>(
        &mut self,
        consensus: &C,
        epoch: u64,
        get_duties: bool,
    ) -> Result<(), GeneratorError>
    where
        C: ConsensusClient + ?Sized,
    {
        let first_slot = self.config.first_slot_of(epoch);
        let committees = async {
            if get_duties {
                consensus.committees_for_epoch(epoch).await.map(Some)
            } else {
                Ok(None)
            }
        };
        let attestations = try_join_all((0..self.config.slots_per_epoch).map(|i| async move {
            consensus.attestations(first_slot + i).await.map(Option::unwrap_or_default)
        }));
        let (committees, attestations) = try_join(committees, attestations).await.map_err(|e| {
            GeneratorError::client(
                format!("error getting committee and attestation records for epoch {epoch}"),
                e,
            )
        })?;

        if let Some(committees) = committees {
            self.record_duties(&committees);
        }
        for slot_attestations in &attestations {
            self.check_duties_for_slot(slot_attestations);
        }
        self.prune_duties(epoch);
        Ok(())
    }

    /// Drop duties that can no longer be matched once `epoch` has been processed. Attestations
    /// are included at most one epoch after the slot they vote for.
    fn prune_duties(&mut self, epoch: u64) {
        let oldest_slot = self.config.first_slot_of(epoch.saturating_sub(1));
        self.duties.retain(|&(slot, _), _| slot >= oldest_slot);
    }

    /// Record the duties owed by tracked minipools in the given committees.
    fn record_duties(&mut self, committees: &[Committee]) {
        for committee in committees {
            let slot = committee.slot;
            if slot < self.bounds.consensus_start_block || slot > self.bounds.consensus_end_block {
                continue;
            }
            let block_time = self.config.slot_time(slot);

            let mut positions = BTreeMap::new();
            for (position, validator) in committee.validators.iter().enumerate() {
                let Some(&(node_pos, minipool_pos)) = self.validators.get(validator) else {
                    continue;
                };
                let node = &mut self.nodes[node_pos];
                if !node.is_opted_in_at(block_time) {
                    continue;
                }
                let minipool = &mut node.minipools[minipool_pos];
                if block_time < minipool.staking_since {
                    continue;
                }
                minipool.owed.insert(slot);
                positions.insert(position, (node_pos, minipool_pos));
            }

            if !positions.is_empty() {
                self.duties.insert((slot, committee.index), positions);
            }
        }
    }

    /// Match the attestations included in one block against the owed duties.
    fn check_duties_for_slot(&mut self, attestations: &[AttestationInfo]) {
        for attestation in attestations {
            let key = (attestation.slot, attestation.committee_index);
            let Some(positions) = self.duties.get_mut(&key) else {
                continue;
            };
            let block_time = self.config.slot_time(attestation.slot);

            let mut matched = Vec::new();
            positions.retain(|&position, &mut minipool| {
                let attested = attestation.aggregation_bits.bit_at(position);
                if attested {
                    matched.push(minipool);
                }
                !attested
            });
            if positions.is_empty() {
                self.duties.remove(&key);
            }

            for (node_pos, minipool_pos) in matched {
                let node = &mut self.nodes[node_pos];
                let opted_in = node.is_opted_in_at(block_time);
                let minipool = &mut node.minipools[minipool_pos];
                if !minipool.fulfilled.insert(attestation.slot) {
                    // Already fulfilled through another committee entry
                    continue;
                }
                if !opted_in {
                    continue;
                }
                minipool.completed.insert(attestation.slot);

                let (bond, fee) = minipool.bond.at(block_time);
                let score = attestation_score(bond, fee);
                minipool.attestation_score += score;
                self.totals.total_score += score;
                self.totals.successful_attestations += 1;
            }
        }
    }
}
