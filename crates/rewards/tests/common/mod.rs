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

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};

use alloy_primitives::{address, Address, FixedBytes, U256};
use anyhow::anyhow;
use async_trait::async_trait;
use smartnode_rewards::{
    state::{
        MinipoolDetails, MinipoolStatus, NetworkDetails, NodeDetails, OracleDaoMemberDetails,
        ValidatorState, ValidatorStatus, FAR_EPOCH, WEI_PER_ETH,
    },
    AggregationBits, AttestationInfo, BeaconBlock, BeaconConfig, BlockHeader, Committee,
    ConsensusClient, ExecutionClient, NetworkState, RewardsEvent, SnapshotEnd, TreeGenerator,
};

pub const CONFIG: BeaconConfig =
    BeaconConfig { genesis_time: 0, seconds_per_slot: 12, slots_per_epoch: 4 };

pub const NODE_A: Address = address!("0x00000000000000000000000000000000000000a1");
pub const NODE_B: Address = address!("0x00000000000000000000000000000000000000b2");
/// Owns a penalized minipool.
pub const NODE_C: Address = address!("0x00000000000000000000000000000000000000c3");

/// Reward network requested by node B, which is never enabled.
pub const DISABLED_NETWORK: u64 = 7;

/// Interval being generated.
pub const INDEX: u64 = 30;

/// Slot of the skipped block at the start of the interval.
pub const SKIPPED_SLOT: u64 = 8;

/// Bond reduction time of node B's minipool (start of slot 14).
pub const BOND_REDUCTION_TIME: u64 = 168;

pub fn eth(value: u64) -> U256 {
    U256::from(value) * WEI_PER_ETH
}

/// `value / 1000` ETH.
pub fn milli_eth(value: u64) -> U256 {
    U256::from(value) * WEI_PER_ETH / U256::from(1000)
}

pub fn percent(value: u64) -> U256 {
    U256::from(value) * WEI_PER_ETH / U256::from(100)
}

/// Beacon chain served from memory. Every slot with a block is recorded in `blocks`.
#[derive(Debug, Clone)]
pub struct MockConsensus {
    pub config: BeaconConfig,
    pub blocks: BTreeMap<u64, BeaconBlock>,
    pub committees: Vec<Committee>,
    /// Attestations by the slot of the block that included them.
    pub attestations: BTreeMap<u64, Vec<AttestationInfo>>,
}

#[async_trait]
impl ConsensusClient for MockConsensus {
    async fn beacon_config(&self) -> anyhow::Result<BeaconConfig> {
        Ok(self.config)
    }

    async fn beacon_block(&self, slot: u64) -> anyhow::Result<Option<BeaconBlock>> {
        Ok(self.blocks.get(&slot).copied())
    }

    async fn committees_for_epoch(&self, epoch: u64) -> anyhow::Result<Vec<Committee>> {
        Ok(self
            .committees
            .iter()
            .filter(|committee| self.config.epoch_of(committee.slot) == epoch)
            .cloned()
            .collect())
    }

    async fn attestations(&self, slot: u64) -> anyhow::Result<Option<Vec<AttestationInfo>>> {
        if !self.blocks.contains_key(&slot) {
            return Ok(None);
        }
        Ok(Some(self.attestations.get(&slot).cloned().unwrap_or_default()))
    }
}

#[derive(Debug, Clone, Default)]
pub struct MockExecution {
    pub enabled_networks: BTreeSet<u64>,
    pub events: BTreeMap<u64, RewardsEvent>,
    pub state: Option<NetworkState>,
}

#[async_trait]
impl ExecutionClient for MockExecution {
    async fn network_state(&self, block: u64) -> anyhow::Result<NetworkState> {
        self.state.clone().ok_or_else(|| anyhow!("no network state for block {block}"))
    }

    async fn header_by_number(&self, block: u64) -> anyhow::Result<BlockHeader> {
        Ok(BlockHeader { number: block, timestamp: block * CONFIG.seconds_per_slot })
    }

    async fn is_network_enabled(&self, network: u64, _block: u64) -> anyhow::Result<bool> {
        Ok(self.enabled_networks.contains(&network))
    }

    async fn rewards_event(&self, index: u64) -> anyhow::Result<RewardsEvent> {
        self.events.get(&index).copied().ok_or_else(|| anyhow!("no event for interval {index}"))
    }
}

/// Everything needed to generate interval [INDEX].
pub struct Scenario {
    pub consensus: MockConsensus,
    pub execution: MockExecution,
    pub state: NetworkState,
    pub previous: RewardsEvent,
    pub snapshot_end: SnapshotEnd,
    pub snapshot_header: BlockHeader,
}

impl Scenario {
    pub fn generator(&self) -> TreeGenerator {
        TreeGenerator::new(
            Arc::new(self.consensus.clone()),
            Arc::new(self.execution.clone()),
            "holesky",
        )
    }

    /// Drop every attestation from the beacon chain.
    pub fn without_attestations(mut self) -> Self {
        self.consensus.attestations.clear();
        self
    }
}

fn node(address: Address, network: u64, stake: u64, weight: u64) -> NodeDetails {
    NodeDetails {
        node_address: address,
        reward_network: network,
        smoothing_pool_registration_state: true,
        smoothing_pool_registration_changed: 0,
        effective_rpl_stake: U256::from(stake),
        node_weight: U256::from(weight),
    }
}

fn minipool(id: u8, node: Address, bond: U256, fee: U256, penalty_count: u64) -> MinipoolDetails {
    MinipoolDetails {
        minipool_address: Address::with_last_byte(id),
        node_address: node,
        pubkey: FixedBytes::with_last_byte(id),
        exists: true,
        status: MinipoolStatus::Staking,
        status_time: 0,
        penalty_count,
        node_fee: fee,
        node_deposit_balance: bond,
        last_bond_reduction_time: 0,
        last_bond_reduction_prev_value: U256::ZERO,
        last_bond_reduction_prev_node_fee: U256::ZERO,
    }
}

fn validator(index: u64) -> ValidatorStatus {
    ValidatorStatus {
        index,
        status: ValidatorState::ActiveOngoing,
        activation_epoch: 0,
        exit_epoch: FAR_EPOCH,
    }
}

fn attestation(slot: u64, committee_index: u64, bits: u8) -> AttestationInfo {
    AttestationInfo { slot, committee_index, aggregation_bits: AggregationBits(vec![bits]) }
}

/// Snapshot at slot 19 of an interval following one that ended at slot 7.
///
/// * Node A: 300 RPL effective stake, one 8 ETH minipool at 10% (validator 11), oracle DAO
///   member since genesis.
/// * Node B: 700 RPL effective stake, one minipool (validator 12) reduced from 16 ETH at 5% to
///   8 ETH at 14% at [BOND_REDUCTION_TIME]. Requests [DISABLED_NETWORK].
/// * Node C: no stake, a penalized minipool (validator 13) and a clean one (validator 14).
///
/// Duties: A owes slots 12, 16 and 18 and misses 16. B owes and fulfills slots 12 and 16.
pub fn scenario() -> Scenario {
    let mut reduced = minipool(2, NODE_B, eth(8), percent(14), 0);
    reduced.last_bond_reduction_time = BOND_REDUCTION_TIME;
    reduced.last_bond_reduction_prev_value = eth(16);
    reduced.last_bond_reduction_prev_node_fee = percent(5);

    let state = NetworkState {
        el_block_number: 119,
        beacon_slot_number: 19,
        beacon_config: CONFIG,
        network_details: NetworkDetails {
            reward_index: INDEX,
            interval_duration: 1_000,
            pending_rpl_rewards: U256::from(1_000),
            protocol_dao_rewards_percent: percent(10),
            node_operator_rewards_percent: percent(70),
            trusted_node_operator_rewards_percent: percent(20),
            smoothing_pool_balance: eth(10),
        },
        node_details: vec![
            node(NODE_A, 0, 300, 10),
            node(NODE_B, DISABLED_NETWORK, 700, 10),
            node(NODE_C, 0, 0, 0),
        ],
        minipool_details: vec![
            minipool(1, NODE_A, eth(8), percent(10), 0),
            reduced,
            minipool(3, NODE_C, eth(8), percent(10), 3),
            minipool(4, NODE_C, eth(8), percent(10), 0),
        ],
        oracle_dao_member_details: vec![OracleDaoMemberDetails { address: NODE_A, joined_time: 0 }],
        validator_details: (1..=4u8)
            .map(|id| (FixedBytes::with_last_byte(id), validator(10 + id as u64)))
            .collect(),
    };

    let blocks = (0..=23)
        .filter(|slot| *slot != SKIPPED_SLOT)
        .map(|slot| (slot, BeaconBlock { slot, execution_block_number: 100 + slot }))
        .collect();

    let committees = vec![
        // Before the interval starts
        Committee { slot: 8, index: 0, validators: vec![11] },
        Committee { slot: 12, index: 0, validators: vec![11, 12, 13] },
        Committee { slot: 16, index: 1, validators: vec![12, 11, 14] },
        Committee { slot: 18, index: 0, validators: vec![11] },
    ];

    let attestations = BTreeMap::from([
        (13, vec![attestation(12, 0, 0b0000_0111)]),
        (17, vec![attestation(16, 1, 0b0000_0101)]),
        // Same aggregate included again
        (18, vec![attestation(16, 1, 0b0000_0001)]),
        // Included in the epoch after the interval
        (20, vec![attestation(18, 0, 0b0000_0001)]),
    ]);

    let previous = RewardsEvent {
        index: INDEX - 1,
        consensus_block: 7,
        execution_block: 107,
        intervals_passed: 1,
    };

    Scenario {
        consensus: MockConsensus { config: CONFIG, blocks, committees, attestations },
        execution: MockExecution {
            enabled_networks: BTreeSet::new(),
            events: BTreeMap::from([(INDEX - 1, previous)]),
            state: Some(state.clone()),
        },
        state,
        previous,
        snapshot_end: SnapshotEnd { slot: 19, consensus_block: 19, execution_block: 119 },
        snapshot_header: BlockHeader { number: 119, timestamp: CONFIG.slot_time(19) },
    }
}
