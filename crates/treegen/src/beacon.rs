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

//! Beacon node client over the standard beacon HTTP API.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{de::DeserializeOwned, Deserialize, Deserializer};
use smartnode_rewards::{
    AggregationBits, AttestationInfo, BeaconBlock, BeaconConfig, Committee, ConsensusClient,
};
use url::Url;

/// The beacon API encodes every integer as a decimal string.
fn quoted<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    let value = String::deserialize(deserializer)?;
    value.parse().map_err(serde::de::Error::custom)
}

fn quoted_list<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u64>, D::Error> {
    let values = Vec::<String>::deserialize(deserializer)?;
    values.iter().map(|value| value.parse().map_err(serde::de::Error::custom)).collect()
}

#[derive(Debug, Deserialize)]
struct Response<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
struct SignedBlock {
    message: BlockMessage,
}

#[derive(Debug, Deserialize)]
struct BlockMessage {
    #[serde(deserialize_with = "quoted")]
    slot: u64,
    body: BlockBody,
}

#[derive(Debug, Deserialize)]
struct BlockBody {
    /// Absent before the merge.
    #[serde(default)]
    execution_payload: Option<ExecutionPayload>,
    #[serde(default)]
    attestations: Vec<Attestation>,
}

#[derive(Debug, Deserialize)]
struct ExecutionPayload {
    #[serde(deserialize_with = "quoted")]
    block_number: u64,
}

#[derive(Debug, Deserialize)]
struct Attestation {
    aggregation_bits: String,
    data: AttestationData,
}

#[derive(Debug, Deserialize)]
struct AttestationData {
    #[serde(deserialize_with = "quoted")]
    slot: u64,
    #[serde(deserialize_with = "quoted")]
    index: u64,
}

#[derive(Debug, Deserialize)]
struct CommitteeData {
    #[serde(deserialize_with = "quoted")]
    index: u64,
    #[serde(deserialize_with = "quoted")]
    slot: u64,
    #[serde(deserialize_with = "quoted_list")]
    validators: Vec<u64>,
}

#[derive(Debug, Deserialize)]
struct SpecData {
    #[serde(rename = "SECONDS_PER_SLOT", deserialize_with = "quoted")]
    seconds_per_slot: u64,
    #[serde(rename = "SLOTS_PER_EPOCH", deserialize_with = "quoted")]
    slots_per_epoch: u64,
}

#[derive(Debug, Deserialize)]
struct GenesisData {
    #[serde(deserialize_with = "quoted")]
    genesis_time: u64,
}

impl BlockMessage {
    fn beacon_block(&self) -> BeaconBlock {
        BeaconBlock {
            slot: self.slot,
            execution_block_number: self
                .body
                .execution_payload
                .as_ref()
                .map(|payload| payload.block_number)
                .unwrap_or_default(),
        }
    }

    fn attestations(&self) -> Result<Vec<AttestationInfo>> {
        self.body
            .attestations
            .iter()
            .map(|attestation| {
                let aggregation_bits = AggregationBits::from_hex(&attestation.aggregation_bits)
                    .with_context(|| {
                        format!("Invalid aggregation bits in block at slot {}", self.slot)
                    })?;
                Ok(AttestationInfo {
                    slot: attestation.data.slot,
                    committee_index: attestation.data.index,
                    aggregation_bits,
                })
            })
            .collect()
    }
}

impl From<CommitteeData> for Committee {
    fn from(data: CommitteeData) -> Self {
        Committee { slot: data.slot, index: data.index, validators: data.validators }
    }
}

/// [ConsensusClient] backed by a beacon node's HTTP API.
#[derive(Debug, Clone)]
pub struct BeaconHttpClient {
    client: reqwest::Client,
    base_url: Url,
    config: BeaconConfig,
}

impl BeaconHttpClient {
    /// Connect to the beacon node and load the chain configuration.
    pub async fn connect(base_url: Url) -> Result<Self> {
        let client = reqwest::Client::new();
        let spec: SpecData = get_json(&client, &base_url, "eth/v1/config/spec")
            .await?
            .context("Beacon node did not return its chain spec")?;
        let genesis: GenesisData = get_json(&client, &base_url, "eth/v1/beacon/genesis")
            .await?
            .context("Beacon node did not return the genesis")?;

        let config = BeaconConfig {
            genesis_time: genesis.genesis_time,
            seconds_per_slot: spec.seconds_per_slot,
            slots_per_epoch: spec.slots_per_epoch,
        };
        tracing::info!(
            "Connected to beacon node at {base_url} (genesis {}, {}s slots, {} slots per epoch)",
            config.genesis_time,
            config.seconds_per_slot,
            config.slots_per_epoch
        );
        Ok(Self { client, base_url, config })
    }

    async fn block(&self, slot: u64) -> Result<Option<BlockMessage>> {
        let block: Option<SignedBlock> =
            get_json(&self.client, &self.base_url, &format!("eth/v2/beacon/blocks/{slot}")).await?;
        Ok(block.map(|block| block.message))
    }
}

/// GET a beacon API path and unwrap its `data` field. A 404 means the object does not exist.
async fn get_json<T: DeserializeOwned>(
    client: &reqwest::Client,
    base_url: &Url,
    path: &str,
) -> Result<Option<T>> {
    let url = base_url.join(path)?;
    let response =
        client.get(url.clone()).send().await.with_context(|| format!("Failed to query {url}"))?;
    if response.status() == StatusCode::NOT_FOUND {
        return Ok(None);
    }
    let response: Response<T> = response
        .error_for_status()
        .with_context(|| format!("Request to {url} failed"))?
        .json()
        .await
        .with_context(|| format!("Failed to parse response from {url}"))?;
    Ok(Some(response.data))
}

#[async_trait]
impl ConsensusClient for BeaconHttpClient {
    async fn beacon_config(&self) -> Result<BeaconConfig> {
        Ok(self.config)
    }

    async fn beacon_block(&self, slot: u64) -> Result<Option<BeaconBlock>> {
        Ok(self.block(slot).await?.map(|block| block.beacon_block()))
    }

    async fn committees_for_epoch(&self, epoch: u64) -> Result<Vec<Committee>> {
        let slot = self.config.first_slot_of(epoch);
        let path = format!("eth/v1/beacon/states/{slot}/committees?epoch={epoch}");
        let committees: Vec<CommitteeData> = get_json(&self.client, &self.base_url, &path)
            .await?
            .with_context(|| format!("No committees available for epoch {epoch}"))?;
        Ok(committees.into_iter().map(Committee::from).collect())
    }

    async fn attestations(&self, slot: u64) -> Result<Option<Vec<AttestationInfo>>> {
        match self.block(slot).await? {
            Some(block) => block.attestations().map(Some),
            None => Ok(None),
        }
    }
}
