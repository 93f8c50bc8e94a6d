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
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use anyhow::Context;
use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::{
    clients::{ArtifactSink, PersistedArtifacts},
    files::{PerformanceFile, RewardsFile},
};

pub fn rewards_file_name(network: &str, index: u64) -> String {
    format!("rp-rewards-{network}-{index}.json")
}

/// Name of the postcard-encoded copy of the rewards file.
pub fn rewards_binary_name(network: &str, index: u64) -> String {
    format!("rp-rewards-{network}-{index}.bin")
}

pub fn performance_file_name(network: &str, index: u64) -> String {
    format!("rp-minipool-performance-{network}-{index}.json")
}

/// Hex SHA-256 of the given bytes.
pub fn content_id(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Writes artifacts to a local directory.
#[derive(Debug, Clone)]
pub struct LocalArtifactSink {
    dir: PathBuf,
}

impl LocalArtifactSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    async fn write(&self, name: &str, data: &[u8]) -> anyhow::Result<String> {
        let path = self.dir.join(name);
        tokio::fs::write(&path, data)
            .await
            .with_context(|| format!("Failed to write artifact {}", path.display()))?;
        tracing::debug!("Saved {}", path.display());
        Ok(content_id(data))
    }
}

#[async_trait]
impl ArtifactSink for LocalArtifactSink {
    /// Write the rewards and performance files. Trusted nodes also write the binary rewards file.
    ///
    /// The combined content ID is the hash of every artifact name and ID, in name order.
    async fn persist(
        &self,
        rewards: &RewardsFile,
        performance: &PerformanceFile,
        trusted: bool,
    ) -> anyhow::Result<PersistedArtifacts> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("Failed to create output directory {}", self.dir.display()))?;

        let mut artifact_ids = BTreeMap::new();

        let name = rewards_file_name(&rewards.network, rewards.index);
        let id = self.write(&name, &rewards.to_json()?).await?;
        artifact_ids.insert(name, id);

        let name = performance_file_name(&performance.network, performance.index);
        let id = self.write(&name, &performance.to_json()?).await?;
        artifact_ids.insert(name, id);

        if trusted {
            let name = rewards_binary_name(&rewards.network, rewards.index);
            let id = self.write(&name, &rewards.encode()?).await?;
            artifact_ids.insert(name, id);
        }

        let mut hasher = Sha256::new();
        for (name, id) in &artifact_ids {
            hasher.update(name.as_bytes());
            hasher.update(id.as_bytes());
        }
        let content_id = hex::encode(hasher.finalize());
        tracing::info!("Saved {} artifacts to {} ({content_id})", artifact_ids.len(), self.dir.display());

        Ok(PersistedArtifacts { content_id, artifact_ids })
    }
}
