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

//! Rewards and performance artifacts produced by a generation run.

use std::collections::BTreeMap;

use alloy_primitives::{Address, B256, U256};
use serde::{Deserialize, Serialize};

use crate::{error::GeneratorError, interval::IntervalBounds, state::ValidatorPubkey};

/// Format version of the rewards file written by this crate.
pub const REWARDS_FILE_VERSION: u64 = 3;
/// Version of the rules used to compute the rewards.
pub const RULESET_VERSION: u64 = 9;

/// Serde helper that writes a [U256] as a decimal string and reads decimal or `0x` hex.
pub mod quoted {
    use std::str::FromStr;

    use alloy_primitives::U256;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &U256, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(value)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<U256, D::Error> {
        let s = String::deserialize(deserializer)?;
        U256::from_str(&s).map_err(serde::de::Error::custom)
    }
}

/// Interval-wide totals.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TotalRewards {
    #[serde(with = "quoted")]
    pub protocol_dao_rpl: U256,
    #[serde(with = "quoted")]
    pub total_collateral_rpl: U256,
    #[serde(with = "quoted")]
    pub total_oracle_dao_rpl: U256,
    #[serde(with = "quoted")]
    pub total_smoothing_pool_eth: U256,
    #[serde(with = "quoted")]
    pub pool_staker_smoothing_pool_eth: U256,
    #[serde(with = "quoted")]
    pub node_operator_smoothing_pool_eth: U256,
    #[serde(with = "quoted")]
    pub total_node_weight: U256,
}

/// Sum of all node rewards claimable on one reward network.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkReward {
    pub network: u64,
    #[serde(with = "quoted")]
    pub collateral_rpl: U256,
    #[serde(with = "quoted")]
    pub oracle_dao_rpl: U256,
    #[serde(with = "quoted")]
    pub smoothing_pool_eth: U256,
}

/// Rewards owed to a single node for the interval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeReward {
    pub address: Address,
    pub network: u64,
    #[serde(with = "quoted")]
    pub collateral_rpl: U256,
    #[serde(with = "quoted")]
    pub oracle_dao_rpl: U256,
    #[serde(with = "quoted")]
    pub smoothing_pool_eth: U256,
    /// Proof of this record against the file's Merkle root.
    #[serde(default)]
    pub merkle_proof: Vec<B256>,
}

impl NodeReward {
    pub fn new(address: Address, network: u64) -> Self {
        Self {
            address,
            network,
            collateral_rpl: U256::ZERO,
            oracle_dao_rpl: U256::ZERO,
            smoothing_pool_eth: U256::ZERO,
            merkle_proof: Vec::new(),
        }
    }

    /// Total RPL claimable by the node.
    pub fn total_rpl(&self) -> U256 {
        self.collateral_rpl + self.oracle_dao_rpl
    }
}

/// The canonical rewards artifact: aggregates only, no per-slot detail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RewardsFile {
    pub rewards_file_version: u64,
    pub ruleset_version: u64,
    pub network: String,
    pub index: u64,
    pub intervals_passed: u64,
    pub interval: IntervalBounds,
    pub merkle_root: B256,
    pub total_rewards: TotalRewards,
    /// Sorted by network id.
    pub network_rewards: Vec<NetworkReward>,
    /// Sorted by node address.
    pub node_rewards: Vec<NodeReward>,
}

impl RewardsFile {
    pub fn new(network: impl Into<String>, index: u64, intervals_passed: u64) -> Self {
        Self {
            rewards_file_version: REWARDS_FILE_VERSION,
            ruleset_version: RULESET_VERSION,
            network: network.into(),
            index,
            intervals_passed,
            interval: IntervalBounds::default(),
            merkle_root: B256::ZERO,
            total_rewards: TotalRewards::default(),
            network_rewards: Vec::new(),
            node_rewards: Vec::new(),
        }
    }

    /// Serialize the file to its compact binary form.
    pub fn encode(&self) -> Result<Vec<u8>, GeneratorError> {
        postcard::to_allocvec(self).map_err(|e| GeneratorError::Encoding(e.to_string()))
    }

    /// Serialize the file to JSON.
    pub fn to_json(&self) -> Result<Vec<u8>, GeneratorError> {
        serde_json::to_vec_pretty(self).map_err(|e| GeneratorError::Encoding(e.to_string()))
    }
}

/// Attestation performance of one minipool over the interval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MinipoolPerformance {
    pub pubkey: ValidatorPubkey,
    pub successful_attestations: u64,
    pub missed_attestations: u64,
    #[serde(with = "quoted")]
    pub attestation_score: U256,
    #[serde(with = "quoted")]
    pub eth_earned: U256,
    /// Sorted ascending.
    pub missing_attestation_slots: Vec<u64>,
}

/// Companion artifact with per-minipool attestation detail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceFile {
    pub rewards_file_version: u64,
    pub ruleset_version: u64,
    pub network: String,
    pub index: u64,
    pub interval: IntervalBounds,
    pub minipool_performance: BTreeMap<Address, MinipoolPerformance>,
}

impl PerformanceFile {
    pub fn new(network: impl Into<String>, index: u64) -> Self {
        Self {
            rewards_file_version: REWARDS_FILE_VERSION,
            ruleset_version: RULESET_VERSION,
            network: network.into(),
            index,
            interval: IntervalBounds::default(),
            minipool_performance: BTreeMap::new(),
        }
    }

    pub fn to_json(&self) -> Result<Vec<u8>, GeneratorError> {
        serde_json::to_vec_pretty(self).map_err(|e| GeneratorError::Encoding(e.to_string()))
    }
}

/// A stored rewards file, decoded according to its format version.
///
/// Files produced by older rulesets are only ever read back, never regenerated, so only the
/// current layout is represented.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum VersionedRewardsFile {
    V3(RewardsFile),
}

impl VersionedRewardsFile {
    /// Decode a JSON rewards file, dispatching on its `rewardsFileVersion` field.
    pub fn decode_json(bytes: &[u8]) -> Result<Self, GeneratorError> {
        let value: serde_json::Value =
            serde_json::from_slice(bytes).map_err(|e| GeneratorError::Encoding(e.to_string()))?;
        let version = value
            .get("rewardsFileVersion")
            .and_then(serde_json::Value::as_u64)
            .ok_or_else(|| GeneratorError::Encoding("missing rewardsFileVersion".to_string()))?;
        match version {
            REWARDS_FILE_VERSION => serde_json::from_value(value)
                .map(VersionedRewardsFile::V3)
                .map_err(|e| GeneratorError::Encoding(e.to_string())),
            other => Err(GeneratorError::UnsupportedVersion(other)),
        }
    }

    /// Decode a binary rewards file. The leading field of every layout is the format version.
    pub fn decode_binary(bytes: &[u8]) -> Result<Self, GeneratorError> {
        let (version, _) = postcard::take_from_bytes::<u64>(bytes)
            .map_err(|e| GeneratorError::Encoding(e.to_string()))?;
        match version {
            REWARDS_FILE_VERSION => postcard::from_bytes(bytes)
                .map(VersionedRewardsFile::V3)
                .map_err(|e| GeneratorError::Encoding(e.to_string())),
            other => Err(GeneratorError::UnsupportedVersion(other)),
        }
    }

    pub fn index(&self) -> u64 {
        match self {
            VersionedRewardsFile::V3(file) => file.index,
        }
    }

    pub fn ruleset_version(&self) -> u64 {
        match self {
            VersionedRewardsFile::V3(file) => file.ruleset_version,
        }
    }

    pub fn merkle_root(&self) -> B256 {
        match self {
            VersionedRewardsFile::V3(file) => file.merkle_root,
        }
    }

    pub fn total_rewards(&self) -> &TotalRewards {
        match self {
            VersionedRewardsFile::V3(file) => &file.total_rewards,
        }
    }
}
