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

mod common;

use std::collections::{BTreeMap, BTreeSet};

use alloy_primitives::{Address, U256};
use common::*;
use smartnode_rewards::{
    merkle::node_leaf, verify_proof, ArtifactSink, GeneratorError, LocalArtifactSink,
    VersionedRewardsFile,
};
use tracing_test::traced_test;

#[tokio::test]
#[traced_test]
async fn full_interval_matches_hand_computed_allocation() {
    let scenario = scenario();
    let result = scenario
        .generator()
        .generate_tree(
            INDEX,
            scenario.snapshot_header,
            1,
            &scenario.state,
            Some(scenario.previous),
            scenario.snapshot_end,
        )
        .await
        .unwrap();
    let file = &result.rewards_file;

    // The first slot of the interval was skipped
    assert_eq!(file.interval.start_time, CONFIG.slot_time(SKIPPED_SLOT));
    assert_eq!(file.interval.consensus_start_block, SKIPPED_SLOT + 1);
    assert_eq!(file.interval.execution_start_block, 109);
    assert_eq!(file.interval.consensus_end_block, 19);
    assert_eq!(file.interval.execution_end_block, 119);
    assert_eq!(file.interval.end_time, CONFIG.slot_time(19));

    // C clamps to 1 at interval 30, so each share blends 1/6 weight and 5/6 stake:
    // A = 700 * 10 / 120 + 700 * 5 * 300 / 6000 = 58 + 175
    // B = 700 * 10 / 120 + 700 * 5 * 700 / 6000 = 58 + 408
    let totals = &file.total_rewards;
    assert_eq!(totals.total_collateral_rpl, U256::from(699));
    assert_eq!(totals.total_oracle_dao_rpl, U256::from(200));
    assert_eq!(totals.protocol_dao_rpl, U256::from(101));
    assert_eq!(totals.total_node_weight, U256::from(20));
    assert_eq!(
        totals.protocol_dao_rpl + totals.total_oracle_dao_rpl + totals.total_collateral_rpl,
        scenario.state.network_details.pending_rpl_rewards
    );

    // A: two attestations at 0.325 each. B: 0.525 before its bond reduction and 0.355 after.
    // Node operators get 10 ETH * 1.53 / 4 = 3.825 ETH, split 0.65 : 0.88.
    assert_eq!(totals.total_smoothing_pool_eth, eth(10));
    assert_eq!(totals.node_operator_smoothing_pool_eth, milli_eth(3_825));
    assert_eq!(totals.pool_staker_smoothing_pool_eth, milli_eth(6_175));
    assert_eq!(
        totals.pool_staker_smoothing_pool_eth + totals.node_operator_smoothing_pool_eth,
        totals.total_smoothing_pool_eth
    );

    let nodes: BTreeMap<Address, _> =
        file.node_rewards.iter().map(|reward| (reward.address, reward)).collect();
    assert_eq!(nodes.len(), 2);
    assert!(!nodes.contains_key(&NODE_C));

    let a = nodes[&NODE_A];
    assert_eq!(a.network, 0);
    assert_eq!(a.collateral_rpl, U256::from(233));
    assert_eq!(a.oracle_dao_rpl, U256::from(200));
    assert_eq!(a.smoothing_pool_eth, milli_eth(1_625));

    let b = nodes[&NODE_B];
    assert_eq!(b.network, 0);
    assert_eq!(b.collateral_rpl, U256::from(466));
    assert!(b.oracle_dao_rpl.is_zero());
    assert_eq!(b.smoothing_pool_eth, milli_eth(2_200));
    assert_eq!(result.invalid_network_nodes, BTreeMap::from([(NODE_B, DISABLED_NETWORK)]));

    assert_eq!(file.network_rewards.len(), 1);
    assert_eq!(file.network_rewards[0].collateral_rpl, U256::from(699));
    assert_eq!(file.network_rewards[0].oracle_dao_rpl, U256::from(200));
    assert_eq!(file.network_rewards[0].smoothing_pool_eth, milli_eth(3_825));

    for reward in &file.node_rewards {
        assert!(verify_proof(node_leaf(reward), &reward.merkle_proof, file.merkle_root));
    }

    let performance = &result.performance_file.minipool_performance;
    assert_eq!(
        performance.keys().copied().collect::<Vec<_>>(),
        vec![Address::with_last_byte(1), Address::with_last_byte(2)]
    );
    let first = &performance[&Address::with_last_byte(1)];
    assert_eq!(first.successful_attestations, 2);
    assert_eq!(first.missed_attestations, 1);
    assert_eq!(first.missing_attestation_slots, vec![16]);
    assert_eq!(first.attestation_score, milli_eth(650));
    assert_eq!(first.eth_earned, milli_eth(1_625));

    let second = &performance[&Address::with_last_byte(2)];
    assert_eq!(second.successful_attestations, 2);
    assert_eq!(second.missed_attestations, 0);
    assert_eq!(second.attestation_score, milli_eth(525) + milli_eth(355));

    assert!(logs_contain("Generating tree for interval 30 using ruleset v9"));
    assert!(logs_contain("Checking participation of 2 minipools for epochs 2 to 4"));
    assert!(logs_contain("Finished participation check"));
}

#[tokio::test]
async fn collateral_stays_within_error_budget() {
    let scenario = scenario();
    let result = scenario
        .generator()
        .generate_tree(
            INDEX,
            scenario.snapshot_header,
            1,
            &scenario.state,
            Some(scenario.previous),
            scenario.snapshot_end,
        )
        .await
        .unwrap();

    let details = &scenario.state.network_details;
    let target = details.pending_rpl_rewards * details.node_operator_rewards_percent
        / smartnode_rewards::state::WEI_PER_ETH;
    let credited: U256 = result.rewards_file.node_rewards.iter().map(|r| r.collateral_rpl).sum();
    assert!(credited.abs_diff(target) <= scenario.state.epsilon());
}

#[tokio::test]
async fn generation_is_idempotent() {
    let scenario = scenario();
    let generator = scenario.generator();
    let mut runs = Vec::new();
    for _ in 0..2 {
        runs.push(
            generator
                .generate_tree(
                    INDEX,
                    scenario.snapshot_header,
                    1,
                    &scenario.state,
                    Some(scenario.previous),
                    scenario.snapshot_end,
                )
                .await
                .unwrap(),
        );
    }

    let (first, second) = (&runs[0], &runs[1]);
    assert_eq!(first.rewards_file.merkle_root, second.rewards_file.merkle_root);
    assert_eq!(first.rewards_file.encode().unwrap(), second.rewards_file.encode().unwrap());
    assert_eq!(first.rewards_file.to_json().unwrap(), second.rewards_file.to_json().unwrap());
    assert_eq!(
        first.performance_file.to_json().unwrap(),
        second.performance_file.to_json().unwrap()
    );
}

#[tokio::test]
async fn no_attestations_send_everything_to_pool_stakers() {
    let scenario = scenario().without_attestations();
    let result = scenario
        .generator()
        .generate_tree(
            INDEX,
            scenario.snapshot_header,
            1,
            &scenario.state,
            Some(scenario.previous),
            scenario.snapshot_end,
        )
        .await
        .unwrap();

    let totals = &result.rewards_file.total_rewards;
    assert_eq!(totals.pool_staker_smoothing_pool_eth, eth(10));
    assert!(totals.node_operator_smoothing_pool_eth.is_zero());
    assert!(result.rewards_file.node_rewards.iter().all(|r| r.smoothing_pool_eth.is_zero()));
    assert!(result.performance_file.minipool_performance.is_empty());
    // RPL is unaffected
    assert_eq!(totals.total_collateral_rpl, U256::from(699));
}

#[tokio::test]
async fn genesis_interval_pays_no_smoothing_pool_eth() {
    let mut scenario = scenario();
    scenario.state.network_details.reward_index = 0;
    let result = scenario
        .generator()
        .generate_tree(
            0,
            scenario.snapshot_header,
            1,
            &scenario.state,
            None,
            scenario.snapshot_end,
        )
        .await
        .unwrap();

    let totals = &result.rewards_file.total_rewards;
    assert!(totals.total_smoothing_pool_eth.is_zero());
    assert!(totals.pool_staker_smoothing_pool_eth.is_zero());
    assert!(totals.node_operator_smoothing_pool_eth.is_zero());
    assert_eq!(result.rewards_file.interval, Default::default());

    // Weight only before the phase-out: equal weights split the 700 evenly
    let nodes: BTreeMap<Address, _> =
        result.rewards_file.node_rewards.iter().map(|r| (r.address, r.collateral_rpl)).collect();
    assert_eq!(nodes[&NODE_A], U256::from(350));
    assert_eq!(nodes[&NODE_B], U256::from(350));
}

#[tokio::test]
async fn penalized_node_earns_no_eth() {
    let mut scenario = scenario();
    // Give C some stake so it still shows up with RPL
    scenario.state.node_details[2].effective_rpl_stake = U256::from(100);
    scenario.state.node_details[2].node_weight = U256::from(1);
    let result = scenario
        .generator()
        .generate_tree(
            INDEX,
            scenario.snapshot_header,
            1,
            &scenario.state,
            Some(scenario.previous),
            scenario.snapshot_end,
        )
        .await
        .unwrap();

    let c = result.rewards_file.node_rewards.iter().find(|r| r.address == NODE_C).unwrap();
    assert!(!c.collateral_rpl.is_zero());
    assert!(c.smoothing_pool_eth.is_zero());
    let performance = &result.performance_file.minipool_performance;
    assert!(!performance.contains_key(&Address::with_last_byte(3)));
    assert!(!performance.contains_key(&Address::with_last_byte(4)));
}

#[tokio::test]
async fn attestation_before_bond_reduction_uses_previous_bond() {
    let mut scenario = scenario();
    // Move the reduction after the whole interval: both duties use 16 ETH at 5%
    scenario.state.minipool_details[1].last_bond_reduction_time = CONFIG.slot_time(100);
    let result = scenario
        .generator()
        .generate_tree(
            INDEX,
            scenario.snapshot_header,
            1,
            &scenario.state,
            Some(scenario.previous),
            scenario.snapshot_end,
        )
        .await
        .unwrap();

    let performance = &result.performance_file.minipool_performance[&Address::with_last_byte(2)];
    assert_eq!(performance.attestation_score, milli_eth(525) * U256::from(2));
}

#[tokio::test]
async fn looks_up_previous_interval_when_not_provided() {
    let scenario = scenario();
    let generator = scenario.generator();
    let looked_up = generator
        .generate_tree(
            INDEX,
            scenario.snapshot_header,
            1,
            &scenario.state,
            None,
            scenario.snapshot_end,
        )
        .await
        .unwrap();
    let provided = generator
        .generate_tree(
            INDEX,
            scenario.snapshot_header,
            1,
            &scenario.state,
            Some(scenario.previous),
            scenario.snapshot_end,
        )
        .await
        .unwrap();
    assert_eq!(looked_up, provided);

    let wrong = smartnode_rewards::RewardsEvent { index: INDEX - 2, ..scenario.previous };
    let err = generator
        .generate_tree(
            INDEX,
            scenario.snapshot_header,
            1,
            &scenario.state,
            Some(wrong),
            scenario.snapshot_end,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, GeneratorError::MissingPreviousInterval { index } if index == INDEX - 1));
}

#[tokio::test]
async fn missing_previous_block_is_fatal() {
    let mut scenario = scenario();
    scenario.consensus.blocks.remove(&scenario.previous.consensus_block);
    let err = scenario
        .generator()
        .generate_tree(
            INDEX,
            scenario.snapshot_header,
            1,
            &scenario.state,
            Some(scenario.previous),
            scenario.snapshot_end,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, GeneratorError::BeaconBlockUnavailable { slot: 7 }));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn unavailable_event_is_retryable() {
    let mut scenario = scenario();
    scenario.execution.events.clear();
    let err = scenario
        .generator()
        .generate_tree(
            INDEX,
            scenario.snapshot_header,
            1,
            &scenario.state,
            None,
            scenario.snapshot_end,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, GeneratorError::Client { .. }));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn no_pending_rpl_is_rejected() {
    let mut scenario = scenario();
    scenario.state.network_details.pending_rpl_rewards = U256::ZERO;
    let err = scenario
        .generator()
        .generate_tree(
            INDEX,
            scenario.snapshot_header,
            1,
            &scenario.state,
            Some(scenario.previous),
            scenario.snapshot_end,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, GeneratorError::NoPendingRewards));
}

#[tokio::test]
async fn enabled_networks_are_kept() {
    let mut scenario = scenario();
    scenario.execution.enabled_networks = BTreeSet::from([DISABLED_NETWORK]);
    let result = scenario
        .generator()
        .generate_tree(
            INDEX,
            scenario.snapshot_header,
            1,
            &scenario.state,
            Some(scenario.previous),
            scenario.snapshot_end,
        )
        .await
        .unwrap();

    assert!(result.invalid_network_nodes.is_empty());
    let networks: Vec<u64> =
        result.rewards_file.network_rewards.iter().map(|reward| reward.network).collect();
    assert_eq!(networks, vec![0, DISABLED_NETWORK]);
    let b = result.rewards_file.network_rewards.iter().find(|r| r.network == DISABLED_NETWORK);
    assert_eq!(b.unwrap().collateral_rpl, U256::from(466));
}

#[tokio::test]
async fn approximation_scores_one_attestation_per_minipool() {
    let scenario = scenario();
    let share = scenario
        .generator()
        .approximate_staker_share(
            INDEX,
            scenario.snapshot_header,
            &scenario.state,
            Some(scenario.previous),
            scenario.snapshot_end,
        )
        .await
        .unwrap();
    // Scores at the snapshot time are 0.325 and 0.355, so node operators get
    // 10 ETH * 0.68 / 2 = 3.4 ETH
    assert_eq!(share, milli_eth(6_600));

    let genesis = scenario
        .generator()
        .approximate_staker_share(
            0,
            scenario.snapshot_header,
            &scenario.state,
            None,
            scenario.snapshot_end,
        )
        .await
        .unwrap();
    assert!(genesis.is_zero());
}

#[tokio::test]
async fn persisted_artifacts_decode_back() {
    let scenario = scenario();
    let result = scenario
        .generator()
        .generate_tree(
            INDEX,
            scenario.snapshot_header,
            1,
            &scenario.state,
            Some(scenario.previous),
            scenario.snapshot_end,
        )
        .await
        .unwrap();

    let dir = tempfile::tempdir().unwrap();
    let sink = LocalArtifactSink::new(dir.path());
    let persisted =
        sink.persist(&result.rewards_file, &result.performance_file, true).await.unwrap();
    assert_eq!(persisted.artifact_ids.len(), 3);

    let json = tokio::fs::read(dir.path().join("rp-rewards-holesky-30.json")).await.unwrap();
    let binary = tokio::fs::read(dir.path().join("rp-rewards-holesky-30.bin")).await.unwrap();
    let from_json = VersionedRewardsFile::decode_json(&json).unwrap();
    let from_binary = VersionedRewardsFile::decode_binary(&binary).unwrap();
    assert_eq!(from_json.merkle_root(), result.rewards_file.merkle_root);
    assert_eq!(from_binary.merkle_root(), result.rewards_file.merkle_root);
    assert_eq!(from_json.total_rewards(), &result.rewards_file.total_rewards);
}
