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

//! Merkle tree over the node reward records of a rewards file.
//!
//! Leaves are `keccak256(address ‖ network ‖ rpl ‖ eth)` with the three amounts as 32 byte
//! big-endian words, where `rpl` is the collateral plus oracle DAO RPL. Leaves are sorted and
//! each parent is the hash of its two children in ascending order. A node without a sibling is
//! carried up to the next layer unchanged.

use std::collections::BTreeSet;

use alloy_primitives::{keccak256, B256, U256};

use crate::{
    error::GeneratorError,
    files::{NodeReward, RewardsFile},
};

/// Leaf hash of a node reward record.
pub fn node_leaf(reward: &NodeReward) -> B256 {
    let mut buf = Vec::with_capacity(20 + 32 * 3);
    buf.extend_from_slice(reward.address.as_slice());
    buf.extend_from_slice(&U256::from(reward.network).to_be_bytes::<32>());
    buf.extend_from_slice(&reward.total_rpl().to_be_bytes::<32>());
    buf.extend_from_slice(&reward.smoothing_pool_eth.to_be_bytes::<32>());
    keccak256(&buf)
}

fn hash_pair(a: &B256, b: &B256) -> B256 {
    let (left, right) = if a <= b { (a, b) } else { (b, a) };
    let mut buf = [0u8; 64];
    buf[..32].copy_from_slice(left.as_slice());
    buf[32..].copy_from_slice(right.as_slice());
    keccak256(buf)
}

#[derive(Debug, Clone)]
pub struct RewardsMerkleTree {
    /// Layers from the sorted leaves up to the root.
    layers: Vec<Vec<B256>>,
}

impl RewardsMerkleTree {
    pub fn build(rewards: &[NodeReward]) -> Result<Self, GeneratorError> {
        if rewards.is_empty() {
            return Err(GeneratorError::MerkleTree("no node rewards to build a tree from".into()));
        }
        let mut seen = BTreeSet::new();
        for reward in rewards {
            if !seen.insert(reward.address) {
                return Err(GeneratorError::MerkleTree(format!(
                    "duplicate node reward record for {}",
                    reward.address
                )));
            }
        }

        let mut leaves: Vec<B256> = rewards.iter().map(node_leaf).collect();
        leaves.sort();

        let mut layers = vec![leaves];
        while let Some(layer) = layers.last().filter(|layer| layer.len() > 1) {
            let next = layer
                .chunks(2)
                .map(|pair| match pair {
                    [a, b] => hash_pair(a, b),
                    _ => pair[0],
                })
                .collect();
            layers.push(next);
        }
        Ok(Self { layers })
    }

    pub fn root(&self) -> B256 {
        self.layers.last().and_then(|layer| layer.first()).copied().unwrap_or_default()
    }

    /// Sibling hashes from `leaf` up to the root, or `None` if the leaf is not in the tree.
    pub fn proof(&self, leaf: &B256) -> Option<Vec<B256>> {
        let mut position = self.layers.first()?.binary_search(leaf).ok()?;
        let mut proof = Vec::new();
        for layer in &self.layers[..self.layers.len() - 1] {
            if let Some(sibling) = layer.get(position ^ 1) {
                proof.push(*sibling);
            }
            position /= 2;
        }
        Some(proof)
    }
}

/// Check a proof produced by [RewardsMerkleTree::proof].
pub fn verify_proof(leaf: B256, proof: &[B256], root: B256) -> bool {
    proof.iter().fold(leaf, |acc, sibling| hash_pair(&acc, sibling)) == root
}

/// Build the tree over the file's node rewards, then record the root and every node's proof.
pub fn apply_merkle_tree(file: &mut RewardsFile) -> Result<(), GeneratorError> {
    let tree = RewardsMerkleTree::build(&file.node_rewards)?;
    for reward in file.node_rewards.iter_mut() {
        let leaf = node_leaf(reward);
        reward.merkle_proof = tree.proof(&leaf).ok_or_else(|| {
            GeneratorError::MerkleTree(format!("missing leaf for {}", reward.address))
        })?;
    }
    file.merkle_root = tree.root();
    tracing::info!("Merkle root: {}", file.merkle_root);
    Ok(())
}
