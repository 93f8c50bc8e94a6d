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

//! Rewards tree generation for the Smartnode staking pool (ruleset v9).
//!
//! A generation run splits the interval's pending RPL between the protocol treasury, the oracle
//! DAO and node operators, scores the attestations of smoothing pool minipools to split the
//! smoothing pool ETH, and assembles the results into a rewards file with a Merkle tree and a
//! minipool performance file.

pub mod accumulators;
pub mod clients;
pub mod duties;
pub mod error;
pub mod files;
pub mod generator;
pub mod interval;
pub mod merkle;
pub mod rpl;
pub mod sink;
pub mod smoothing;
pub mod state;

// Re-export commonly used types
pub use clients::{
    AggregationBits, ArtifactSink, AttestationInfo, BeaconBlock, BlockHeader, Committee,
    ConsensusClient, ExecutionClient, PersistedArtifacts, RewardsEvent, SnapshotEnd,
};

pub use error::GeneratorError;

pub use files::{
    MinipoolPerformance, NetworkReward, NodeReward, PerformanceFile, RewardsFile, TotalRewards,
    VersionedRewardsFile, REWARDS_FILE_VERSION, RULESET_VERSION,
};

pub use generator::{GenerateTreeResult, TreeGenerator};

pub use interval::IntervalBounds;

pub use merkle::{verify_proof, RewardsMerkleTree};

pub use sink::LocalArtifactSink;

pub use state::{BeaconConfig, NetworkState};
