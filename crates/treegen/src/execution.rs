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

use std::path::PathBuf;

use alloy::{
    primitives::{Address, B256, U256},
    providers::{
        fillers::{ChainIdFiller, FillProvider, JoinFill},
        Identity, Provider, ProviderBuilder, RootProvider,
    },
    rpc::{
        client::RpcClient,
        types::{BlockId, BlockNumberOrTag, Filter, Log},
    },
    sol_types::SolEvent,
    transports::layers::RetryBackoffLayer,
};
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use smartnode_rewards::{BlockHeader, ExecutionClient, NetworkState, RewardsEvent};
use url::Url;

alloy::sol!(
    #[sol(rpc)]
    interface IRocketRewardsPool {
        struct RewardSubmission {
            uint256 rewardIndex;
            uint256 executionBlock;
            uint256 consensusBlock;
            bytes32 merkleRoot;
            string merkleTreeCID;
            uint256 intervalsPassed;
            uint256 treasuryRPL;
            uint256[] trustedNodeRPL;
            uint256[] nodeRPL;
            uint256[] nodeETH;
            uint256 userETH;
        }

        event RewardSnapshot(
            uint256 indexed rewardIndex,
            RewardSubmission submission,
            uint256 intervalStartTime,
            uint256 intervalEndTime,
            uint256 time
        );
    }
);

alloy::sol!(
    #[sol(rpc)]
    interface IRocketNetworkSettings {
        function getNetworkEnabled(uint256 network) external view returns (bool);
    }
);

/// Blocks per `eth_getLogs` request.
const LOG_QUERY_CHUNK_SIZE: u64 = 20_000;

type ProviderType = FillProvider<JoinFill<Identity, ChainIdFiller>, RootProvider>;

/// Query logs in chunks to avoid hitting provider limits
async fn query_logs_chunked<P: Provider>(
    provider: &P,
    filter: Filter,
    from_block: u64,
    to_block: u64,
) -> Result<Vec<Log>> {
    let mut all_logs = Vec::new();

    let mut current_from = from_block;
    while current_from <= to_block {
        let current_to = (current_from + LOG_QUERY_CHUNK_SIZE - 1).min(to_block);

        let chunk_filter = filter
            .clone()
            .from_block(BlockNumberOrTag::Number(current_from))
            .to_block(BlockNumberOrTag::Number(current_to));

        let logs = provider.get_logs(&chunk_filter).await?;
        all_logs.extend(logs);

        current_from = current_to + 1;
    }

    Ok(all_logs)
}

fn to_u64(value: U256, what: &str) -> Result<u64> {
    u64::try_from(value).map_err(|_| anyhow!("{what} {value} does not fit in 64 bits"))
}

impl TryFrom<&IRocketRewardsPool::RewardSnapshot> for RewardsEvent {
    type Error = anyhow::Error;

    fn try_from(event: &IRocketRewardsPool::RewardSnapshot) -> Result<Self> {
        let submission = &event.submission;
        Ok(RewardsEvent {
            index: to_u64(event.rewardIndex, "reward index")?,
            consensus_block: to_u64(submission.consensusBlock, "consensus block")?,
            execution_block: to_u64(submission.executionBlock, "execution block")?,
            intervals_passed: to_u64(submission.intervalsPassed, "intervals passed")?,
        })
    }
}

/// Path of the network state snapshot taken at `block`.
pub fn state_file_path(state_dir: &std::path::Path, block: u64) -> PathBuf {
    state_dir.join(format!("state-{block}.json"))
}

/// [ExecutionClient] backed by a JSON-RPC endpoint and a directory of state snapshots.
pub struct RpcExecutionClient {
    provider: ProviderType,
    rewards_pool_address: Address,
    network_settings_address: Address,
    /// First block searched for rewards events.
    events_from_block: u64,
    state_dir: PathBuf,
}

impl RpcExecutionClient {
    pub fn new(
        rpc_url: Url,
        rewards_pool_address: Address,
        network_settings_address: Address,
        events_from_block: u64,
        state_dir: PathBuf,
    ) -> Self {
        let provider = ProviderBuilder::new()
            .disable_recommended_fillers()
            .filler(ChainIdFiller::default())
            .connect_client(
                RpcClient::builder().layer(RetryBackoffLayer::new(3, 1000, 200)).http(rpc_url),
            );
        Self {
            provider,
            rewards_pool_address,
            network_settings_address,
            events_from_block,
            state_dir,
        }
    }
}

#[async_trait]
impl ExecutionClient for RpcExecutionClient {
    async fn network_state(&self, block: u64) -> Result<NetworkState> {
        let path = state_file_path(&self.state_dir, block);
        let bytes = tokio::fs::read(&path)
            .await
            .with_context(|| format!("Failed to read network state from {}", path.display()))?;
        let state = NetworkState::from_json(&bytes)
            .with_context(|| format!("Failed to parse network state from {}", path.display()))?;
        if state.el_block_number != block {
            bail!(
                "Network state in {} was taken at block {}, expected {block}",
                path.display(),
                state.el_block_number
            );
        }
        Ok(state)
    }

    async fn header_by_number(&self, block: u64) -> Result<BlockHeader> {
        let block = self
            .provider
            .get_block_by_number(BlockNumberOrTag::Number(block))
            .await
            .with_context(|| format!("Failed to get block {block}"))?
            .with_context(|| format!("Block {block} not found"))?;
        Ok(BlockHeader { number: block.header.number, timestamp: block.header.timestamp })
    }

    async fn is_network_enabled(&self, network: u64, block: u64) -> Result<bool> {
        let settings = IRocketNetworkSettings::new(self.network_settings_address, &self.provider);
        let enabled = settings
            .getNetworkEnabled(U256::from(network))
            .block(BlockId::number(block))
            .call()
            .await
            .with_context(|| format!("Failed to check whether network {network} is enabled"))?;
        Ok(enabled)
    }

    async fn rewards_event(&self, index: u64) -> Result<RewardsEvent> {
        let head = self.provider.get_block_number().await.context("Failed to get block number")?;
        let filter = Filter::new()
            .address(self.rewards_pool_address)
            .event_signature(IRocketRewardsPool::RewardSnapshot::SIGNATURE_HASH)
            .topic1(B256::from(U256::from(index).to_be_bytes::<32>()));

        tracing::debug!(
            "Searching blocks {}..={head} for the rewards event of interval {index}",
            self.events_from_block
        );
        let logs = query_logs_chunked(&self.provider, filter, self.events_from_block, head).await?;

        // A re-submitted interval keeps its latest event
        let log =
            logs.last().with_context(|| format!("No rewards event found for interval {index}"))?;
        let decoded = log
            .log_decode::<IRocketRewardsPool::RewardSnapshot>()
            .context("Failed to decode rewards event")?;
        RewardsEvent::try_from(&decoded.inner.data)
    }
}
