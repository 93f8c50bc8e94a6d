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

//! Interfaces of the external collaborators the generator reads from and writes to.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{
    files::{PerformanceFile, RewardsFile},
    state::{BeaconConfig, NetworkState},
};

/// Execution layer block number and timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    pub number: u64,
    pub timestamp: u64,
}

/// The on-chain record of a finalized rewards interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RewardsEvent {
    pub index: u64,
    /// Last consensus slot covered by the interval.
    pub consensus_block: u64,
    /// Execution block bound to `consensus_block`.
    pub execution_block: u64,
    pub intervals_passed: u64,
}

/// The caller-chosen end of the interval being generated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotEnd {
    pub slot: u64,
    pub consensus_block: u64,
    pub execution_block: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BeaconBlock {
    pub slot: u64,
    /// Zero before the merge.
    pub execution_block_number: u64,
}

/// One beacon committee and the validator indices in it, by committee position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Committee {
    pub slot: u64,
    pub index: u64,
    pub validators: Vec<u64>,
}

/// SSZ bitlist of the committee positions that took part in an aggregate attestation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AggregationBits(pub Vec<u8>);

impl AggregationBits {
    /// Parse the `0x`-prefixed hex form used by the beacon API.
    pub fn from_hex(s: &str) -> anyhow::Result<Self> {
        Ok(Self(hex::decode(s.trim_start_matches("0x")).map_err(anyhow::Error::msg)?))
    }

    pub fn bit_at(&self, position: usize) -> bool {
        self.0.get(position / 8).map(|byte| (byte >> (position % 8)) & 1 == 1).unwrap_or(false)
    }
}

/// An aggregate attestation included in a beacon block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttestationInfo {
    /// Slot the attestation votes for, not the slot it was included in.
    pub slot: u64,
    pub committee_index: u64,
    pub aggregation_bits: AggregationBits,
}

/// Read access to the consensus layer (beacon API).
#[async_trait]
pub trait ConsensusClient: Send + Sync {
    async fn beacon_config(&self) -> anyhow::Result<BeaconConfig>;

    /// Returns `None` if the slot was skipped or the node does not have it.
    async fn beacon_block(&self, slot: u64) -> anyhow::Result<Option<BeaconBlock>>;

    async fn committees_for_epoch(&self, epoch: u64) -> anyhow::Result<Vec<Committee>>;

    /// Attestations included in the block at `slot`, or `None` if there is no block.
    async fn attestations(&self, slot: u64) -> anyhow::Result<Option<Vec<AttestationInfo>>>;
}

/// Read access to the execution layer and the protocol contracts.
#[async_trait]
pub trait ExecutionClient: Send + Sync {
    async fn network_state(&self, block: u64) -> anyhow::Result<NetworkState>;

    async fn header_by_number(&self, block: u64) -> anyhow::Result<BlockHeader>;

    /// Whether rewards may be claimed on `network`, as of execution block `block`.
    async fn is_network_enabled(&self, network: u64, block: u64) -> anyhow::Result<bool>;

    /// The recorded event of a finalized interval.
    async fn rewards_event(&self, index: u64) -> anyhow::Result<RewardsEvent>;
}

/// Content identifiers of persisted artifacts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistedArtifacts {
    /// Identifier of the whole artifact set.
    pub content_id: String,
    /// Identifier of each individual artifact, by file name.
    pub artifact_ids: BTreeMap<String, String>,
}

/// Destination for the generated artifacts.
#[async_trait]
pub trait ArtifactSink: Send + Sync {
    async fn persist(
        &self,
        rewards: &RewardsFile,
        performance: &PerformanceFile,
        trusted: bool,
    ) -> anyhow::Result<PersistedArtifacts>;
}
