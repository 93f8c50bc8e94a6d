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

//! Point-in-time snapshot of the on-chain network state consumed by the generator.

use std::collections::{BTreeMap, HashMap};

use alloy_primitives::{uint, Address, FixedBytes, U256};
use serde::{Deserialize, Serialize};

use crate::files::quoted;

/// BLS public key of a validator.
pub type ValidatorPubkey = FixedBytes<48>;

/// Sentinel epoch used by the beacon chain for "never".
pub const FAR_EPOCH: u64 = u64::MAX;

/// Fixed-point unit of percentages and scores (1 ETH in wei).
pub const WEI_PER_ETH: U256 = uint!(1_000_000_000_000_000_000_U256);

/// Total deposit backing one validator (32 ETH in wei).
pub const VALIDATOR_DEPOSIT: U256 = uint!(32_000_000_000_000_000_000_U256);

/// Beacon chain parameters needed to convert between slots, epochs and wall-clock time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BeaconConfig {
    pub genesis_time: u64,
    pub seconds_per_slot: u64,
    pub slots_per_epoch: u64,
}

impl BeaconConfig {
    /// Unix timestamp of the start of the given slot.
    pub fn slot_time(&self, slot: u64) -> u64 {
        self.genesis_time + slot * self.seconds_per_slot
    }

    pub fn epoch_of(&self, slot: u64) -> u64 {
        slot / self.slots_per_epoch
    }

    pub fn first_slot_of(&self, epoch: u64) -> u64 {
        epoch * self.slots_per_epoch
    }
}

/// Network-wide reward parameters at the snapshot block.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkDetails {
    pub reward_index: u64,
    /// Configured length of a rewards interval, in seconds.
    pub interval_duration: u64,
    #[serde(with = "quoted")]
    pub pending_rpl_rewards: U256,
    /// Fraction of the pending RPL owed to the protocol treasury, scaled by 1e18.
    #[serde(with = "quoted")]
    pub protocol_dao_rewards_percent: U256,
    /// Fraction of the pending RPL owed to node operators as collateral rewards, scaled by 1e18.
    #[serde(with = "quoted")]
    pub node_operator_rewards_percent: U256,
    /// Fraction of the pending RPL owed to the oracle committee, scaled by 1e18.
    #[serde(with = "quoted")]
    pub trusted_node_operator_rewards_percent: U256,
    #[serde(with = "quoted")]
    pub smoothing_pool_balance: U256,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeDetails {
    pub node_address: Address,
    pub reward_network: u64,
    pub smoothing_pool_registration_state: bool,
    /// Timestamp of the last smoothing pool opt-in or opt-out.
    pub smoothing_pool_registration_changed: u64,
    /// Collateral stake already scaled by participation time and the collateral cap.
    #[serde(with = "quoted")]
    pub effective_rpl_stake: U256,
    /// Stake weight already scaled by participation time.
    #[serde(with = "quoted")]
    pub node_weight: U256,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MinipoolStatus {
    Initialized,
    Prelaunch,
    Staking,
    Withdrawable,
    Dissolved,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MinipoolDetails {
    pub minipool_address: Address,
    pub node_address: Address,
    pub pubkey: ValidatorPubkey,
    pub exists: bool,
    pub status: MinipoolStatus,
    /// Timestamp of the last status transition.
    pub status_time: u64,
    pub penalty_count: u64,
    /// Commission of the node operator, scaled by 1e18.
    #[serde(with = "quoted")]
    pub node_fee: U256,
    /// Current node bond in wei.
    #[serde(with = "quoted")]
    pub node_deposit_balance: U256,
    /// Timestamp of the last bond reduction, zero if the bond was never reduced.
    pub last_bond_reduction_time: u64,
    #[serde(with = "quoted")]
    pub last_bond_reduction_prev_value: U256,
    #[serde(with = "quoted")]
    pub last_bond_reduction_prev_node_fee: U256,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OracleDaoMemberDetails {
    pub address: Address,
    pub joined_time: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidatorState {
    PendingInitialized,
    PendingQueued,
    ActiveOngoing,
    ActiveExiting,
    ActiveSlashed,
    ExitedUnslashed,
    ExitedSlashed,
    WithdrawalPossible,
    WithdrawalDone,
}

impl ValidatorState {
    /// Validators in these states do not have an index assigned yet.
    pub fn is_pending(&self) -> bool {
        matches!(self, ValidatorState::PendingInitialized | ValidatorState::PendingQueued)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidatorStatus {
    pub index: u64,
    pub status: ValidatorState,
    pub activation_epoch: u64,
    pub exit_epoch: u64,
}

/// Immutable view of every node, minipool and oracle member at a specific execution block.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkState {
    pub el_block_number: u64,
    pub beacon_slot_number: u64,
    pub beacon_config: BeaconConfig,
    pub network_details: NetworkDetails,
    pub node_details: Vec<NodeDetails>,
    pub minipool_details: Vec<MinipoolDetails>,
    pub oracle_dao_member_details: Vec<OracleDaoMemberDetails>,
    pub validator_details: BTreeMap<ValidatorPubkey, ValidatorStatus>,
}

impl NetworkState {
    /// Parse a snapshot from its JSON representation.
    pub fn from_json(bytes: &[u8]) -> anyhow::Result<Self> {
        serde_json::from_slice(bytes).map_err(Into::into)
    }

    /// Build the address lookups used throughout a generation run.
    pub fn index(&self) -> StateIndex<'_> {
        let mut index = StateIndex::default();
        for node in &self.node_details {
            index.nodes_by_address.insert(node.node_address, node);
        }
        for minipool in &self.minipool_details {
            index.minipools_by_address.insert(minipool.minipool_address, minipool);
            index.minipools_by_node.entry(minipool.node_address).or_default().push(minipool);
        }
        index
    }

    /// Error budget for truncating divisions: each node or minipool division can lose at most
    /// one unit.
    pub fn epsilon(&self) -> U256 {
        U256::from(self.node_details.len().max(self.minipool_details.len()))
    }
}

/// Address lookups over a [NetworkState].
#[derive(Debug, Default)]
pub struct StateIndex<'a> {
    pub nodes_by_address: HashMap<Address, &'a NodeDetails>,
    pub minipools_by_address: HashMap<Address, &'a MinipoolDetails>,
    /// Minipools of each node, in snapshot order.
    pub minipools_by_node: HashMap<Address, Vec<&'a MinipoolDetails>>,
}
