use std::future::Future;

use alloy::{
    eips::{BlockId, BlockNumberOrTag},
    primitives::{Address, B256, Bytes, U256},
    providers::{Provider, ProviderBuilder, RootProvider},
    transports::http::reqwest::Url,
};
use serde::{Deserialize, Serialize};

use crate::{
    error::{AlloyRpcErrorToChainError, ChainError},
    transaction::NetworkId,
};

/// Transaction count for an address read at one specific block height
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChainSnapshot {
    pub block_number: u64,
    pub transaction_count_at_block: u64,
}

/// A transaction as seen by the chain. `block_number` is `None` while it is unmined.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MinedTransaction {
    pub hash: B256,
    pub block_number: Option<u64>,
}

impl MinedTransaction {
    pub fn is_mined(&self) -> bool {
        self.block_number.is_some()
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ObservedBlock {
    pub number: u64,
    pub transactions: Vec<MinedTransaction>,
}

impl ObservedBlock {
    pub fn contains(&self, hash: &B256) -> bool {
        self.transactions.iter().any(|tx| &tx.hash == hash)
    }
}

/// Read and broadcast access to the remote chain.
///
/// Every call is a network round trip; failures surface as [`ChainError`] and are never
/// retried here.
pub trait ChainQuery: Send + Sync {
    fn get_block_number(&self) -> impl Future<Output = Result<u64, ChainError>> + Send;

    fn get_transaction_count(
        &self,
        address: Address,
        block: BlockNumberOrTag,
    ) -> impl Future<Output = Result<u64, ChainError>> + Send;

    fn get_block_by_number(
        &self,
        block: BlockNumberOrTag,
    ) -> impl Future<Output = Result<Option<ObservedBlock>, ChainError>> + Send;

    fn get_transaction_by_hash(
        &self,
        hash: B256,
    ) -> impl Future<Output = Result<Option<MinedTransaction>, ChainError>> + Send;

    fn broadcast_raw_transaction(
        &self,
        raw: &Bytes,
    ) -> impl Future<Output = Result<B256, ChainError>> + Send;

    fn get_balance(&self, address: Address)
    -> impl Future<Output = Result<U256, ChainError>> + Send;

    /// Block height and the transaction count of `address` at exactly that height,
    /// so both values describe the same chain state.
    fn get_chain_snapshot(
        &self,
        address: Address,
    ) -> impl Future<Output = Result<ChainSnapshot, ChainError>> + Send {
        async move {
            let block_number = self.get_block_number().await?;
            let transaction_count_at_block = self
                .get_transaction_count(address, BlockNumberOrTag::Number(block_number))
                .await?;

            Ok(ChainSnapshot {
                block_number,
                transaction_count_at_block,
            })
        }
    }
}

/// [`ChainQuery`] over an alloy JSON-RPC provider
#[derive(Clone, Debug)]
pub struct RpcChain<P> {
    provider: P,
    network_id: NetworkId,
}

impl<P> RpcChain<P> {
    pub fn new(provider: P, network_id: impl Into<NetworkId>) -> Self {
        Self {
            provider,
            network_id: network_id.into(),
        }
    }
}

impl RpcChain<RootProvider> {
    /// HTTP provider for `rpc_url` without fillers; payloads are already signed
    pub fn connect_http(rpc_url: Url, network_id: impl Into<NetworkId>) -> Self {
        Self::new(
            ProviderBuilder::new()
                .disable_recommended_fillers()
                .connect_http(rpc_url),
            network_id,
        )
    }
}

impl<P> ChainQuery for RpcChain<P>
where
    P: Provider + Send + Sync,
{
    async fn get_block_number(&self) -> Result<u64, ChainError> {
        self.provider
            .get_block_number()
            .await
            .map_err(|e| e.to_chain_error(&self.network_id.0))
    }

    async fn get_transaction_count(
        &self,
        address: Address,
        block: BlockNumberOrTag,
    ) -> Result<u64, ChainError> {
        self.provider
            .get_transaction_count(address)
            .block_id(BlockId::Number(block))
            .await
            .map_err(|e| e.to_chain_error(&self.network_id.0))
    }

    async fn get_block_by_number(
        &self,
        block: BlockNumberOrTag,
    ) -> Result<Option<ObservedBlock>, ChainError> {
        let block = self
            .provider
            .get_block_by_number(block)
            .await
            .map_err(|e| e.to_chain_error(&self.network_id.0))?;

        Ok(block.map(|block| {
            let number = block.header.number;
            ObservedBlock {
                number,
                transactions: block
                    .transactions
                    .hashes()
                    .map(|hash| MinedTransaction {
                        hash,
                        block_number: Some(number),
                    })
                    .collect(),
            }
        }))
    }

    async fn get_transaction_by_hash(
        &self,
        hash: B256,
    ) -> Result<Option<MinedTransaction>, ChainError> {
        let tx = self
            .provider
            .get_transaction_by_hash(hash)
            .await
            .map_err(|e| e.to_chain_error(&self.network_id.0))?;

        Ok(tx.map(|tx| MinedTransaction {
            hash,
            block_number: tx.block_number,
        }))
    }

    async fn broadcast_raw_transaction(&self, raw: &Bytes) -> Result<B256, ChainError> {
        let pending = self
            .provider
            .send_raw_transaction(raw)
            .await
            .map_err(|e| e.to_chain_error(&self.network_id.0))?;

        Ok(*pending.tx_hash())
    }

    async fn get_balance(&self, address: Address) -> Result<U256, ChainError> {
        self.provider
            .get_balance(address)
            .await
            .map_err(|e| e.to_chain_error(&self.network_id.0))
    }
}
