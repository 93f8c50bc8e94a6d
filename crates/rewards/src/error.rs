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

use alloy_primitives::U256;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GeneratorError {
    #[error(
        "couldn't retrieve CL block from previous interval (slot {slot}); this likely means the \
         beacon node was checkpoint synced and has not backfilled to the previous interval yet, so \
         it cannot be used for tree generation"
    )]
    BeaconBlockUnavailable { slot: u64 },

    #[error("there are no pending RPL rewards, so this interval cannot be used for rewards submission")]
    NoPendingRewards,

    #[error(
        "error calculating {bucket}: total was {calculated}, but expected {expected}; error was too \
         large ({delta} > {epsilon})"
    )]
    ReconciliationOverrun {
        bucket: &'static str,
        calculated: U256,
        expected: U256,
        delta: U256,
        epsilon: U256,
    },

    #[error("no rewards event provided for interval {index}, which is required for its start bounds")]
    MissingPreviousInterval { index: u64 },

    #[error("no non-empty consensus slot between interval start {start} and end {end}")]
    IntervalStartNotFound { start: u64, end: u64 },

    #[error("error generating Merkle tree: {0}")]
    MerkleTree(String),

    #[error("unsupported rewards file version {0}")]
    UnsupportedVersion(u64),

    #[error("error encoding rewards artifact: {0}")]
    Encoding(String),

    #[error("{context}: {cause:#}")]
    Client { context: String, cause: anyhow::Error },
}

impl GeneratorError {
    pub(crate) fn client(context: impl Into<String>, cause: anyhow::Error) -> Self {
        GeneratorError::Client { context: context.into(), cause }
    }

    /// Whether running the generator again with the same collaborators can succeed.
    ///
    /// Missing historical beacon data and computation defects will fail the same way every time.
    pub fn is_retryable(&self) -> bool {
        matches!(self, GeneratorError::Client { .. })
    }
}
