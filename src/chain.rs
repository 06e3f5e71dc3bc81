//! Chain-node capability consumed by the block scanner and the address-list path.

use alloy::primitives::{Address, Bytes, B256, U256};
use async_trait::async_trait;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockTx {
    pub hash: B256,
    /// `None` marks a contract-creation transaction.
    pub to: Option<Address>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainBlock {
    pub number: u64,
    /// Unix seconds.
    pub timestamp: u64,
    pub transactions: Vec<BlockTx>,
}

impl ChainBlock {
    pub fn creation_transactions(&self) -> impl Iterator<Item = &BlockTx> {
        self.transactions.iter().filter(|tx| tx.to.is_none())
    }
}

/// Read-only view of a chain node.
///
/// Implementations own their own timeout and retry policy; callers treat every
/// error as a per-item failure.
#[async_trait]
pub trait ChainNode: Send + Sync {
    async fn current_block_number(&self) -> anyhow::Result<u64>;

    /// Full block with transactions, or `None` when the node does not know it.
    async fn block_by_number(&self, number: u64) -> anyhow::Result<Option<ChainBlock>>;

    /// Contract address created by `tx_hash`, taken from its receipt.
    async fn created_contract(&self, tx_hash: B256) -> anyhow::Result<Option<Address>>;

    async fn code_at(&self, address: Address) -> anyhow::Result<Bytes>;

    /// Balance in wei.
    async fn balance_at(&self, address: Address) -> anyhow::Result<U256>;
}
