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

//! Resolution of an interval's consensus slot range and execution block range.

use serde::{Deserialize, Serialize};

use crate::{
    clients::{BlockHeader, ConsensusClient, ExecutionClient, RewardsEvent, SnapshotEnd},
    error::GeneratorError,
    state::BeaconConfig,
};

/// Time, slot and block bounds of a rewards interval. Times are unix seconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntervalBounds {
    pub start_time: u64,
    pub end_time: u64,
    pub consensus_start_block: u64,
    pub consensus_end_block: u64,
    pub execution_start_block: u64,
    pub execution_end_block: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedInterval {
    pub bounds: IntervalBounds,
    /// Header of the first execution block of the interval.
    pub start_header: BlockHeader,
}

/// Determine the bounds of the interval following `previous`, ending at `snapshot_end`.
///
/// The interval starts at the first slot of the epoch after the previous interval's last slot,
/// moved forward past any skipped slots so that it can be bound to an execution block.
pub async fn resolve_interval<C, E>(
    consensus: &C,
    execution: &E,
    config: &BeaconConfig,
    previous: &RewardsEvent,
    snapshot_end: &SnapshotEnd,
) -> Result<ResolvedInterval, GeneratorError>
where
    C: ConsensusClient + ?Sized,
    E: ExecutionClient + ?Sized,
{
    // The beacon node must be able to serve the previous interval's block. Checkpoint-synced
    // nodes that haven't backfilled can't.
    let previous_block = consensus.beacon_block(previous.consensus_block).await.map_err(|e| {
        GeneratorError::client("error verifying block from previous interval", e)
    })?;
    if previous_block.is_none() {
        return Err(GeneratorError::BeaconBlockUnavailable { slot: previous.consensus_block });
    }

    let next_epoch = config.epoch_of(previous.consensus_block) + 1;
    let consensus_start_slot = config.first_slot_of(next_epoch);

    let mut bounds = IntervalBounds {
        start_time: config.slot_time(consensus_start_slot),
        end_time: config.slot_time(snapshot_end.slot),
        consensus_start_block: consensus_start_slot,
        consensus_end_block: snapshot_end.consensus_block,
        execution_start_block: 0,
        execution_end_block: snapshot_end.execution_block,
    };

    // Get the first block that isn't missing
    let el_block_number = loop {
        if bounds.consensus_start_block > snapshot_end.consensus_block {
            return Err(GeneratorError::IntervalStartNotFound {
                start: consensus_start_slot,
                end: snapshot_end.consensus_block,
            });
        }
        let block = consensus.beacon_block(bounds.consensus_start_block).await.map_err(|e| {
            GeneratorError::client(
                format!("error getting EL data for BC slot {}", bounds.consensus_start_block),
                e,
            )
        })?;
        match block {
            Some(block) => break block.execution_block_number,
            None => bounds.consensus_start_block += 1,
        }
    };

    bounds.execution_start_block = if el_block_number == 0 {
        // Pre-merge there is no execution block bound to the slot
        previous.execution_block + 1
    } else {
        el_block_number
    };
    let start_header =
        execution.header_by_number(bounds.execution_start_block).await.map_err(|e| {
            GeneratorError::client(
                format!("error getting EL start block {}", bounds.execution_start_block),
                e,
            )
        })?;

    tracing::info!(
        "Interval bounds: slots {}..={}, EL blocks {}..={}",
        bounds.consensus_start_block,
        bounds.consensus_end_block,
        bounds.execution_start_block,
        bounds.execution_end_block
    );

    Ok(ResolvedInterval { bounds, start_header })
}
