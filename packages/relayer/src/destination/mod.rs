//! Destination (EVM) ledger interface

pub mod evm;

use alloy::primitives::{Address, Bytes, B256};
use async_trait::async_trait;
use eyre::Result;
use thiserror::Error;

use crate::types::BridgeContract;

pub use evm::EvmDestination;

/// A fully specified claim transaction, ready to sign
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimTransaction {
    pub to: Address,
    pub input: Bytes,
    pub nonce: u64,
    pub gas_price: u128,
    pub gas_limit: u64,
}

/// A transaction observed in a destination block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservedTransaction {
    pub hash: B256,
    /// Sender recovered from the signature; `None` if recovery failed
    pub sender: Option<Address>,
    pub to: Option<Address>,
    pub input: Bytes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClaimReceipt {
    pub tx_hash: B256,
    pub block_number: Option<u64>,
    /// `true` on success, `false` if the transaction reverted
    pub status: bool,
}

/// Node-side broadcast failure
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BroadcastError {
    /// The node lost track of the transaction; safe to resend
    #[error("transaction not found: {0}")]
    NotFound(String),

    #[error("transaction rejected: {0}")]
    Rejected(String),
}

impl BroadcastError {
    /// Classify a node error message
    pub fn classify(message: impl Into<String>) -> Self {
        let message = message.into();
        if message.to_lowercase().contains("not found") {
            BroadcastError::NotFound(message)
        } else {
            BroadcastError::Rejected(message)
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, BroadcastError::NotFound(_))
    }
}

#[async_trait]
pub trait DestinationLedger: Send + Sync {
    /// Address of the relayer's signing key
    fn relayer_address(&self) -> Address;

    /// Look up a bridge contract through the on-chain registry
    async fn resolve_contract(&self, contract: BridgeContract) -> Result<Address>;

    /// Pending transaction count of `address`
    async fn pending_nonce(&self, address: Address) -> Result<u64>;

    /// Node's suggested gas price in wei
    async fn suggested_gas_price(&self) -> Result<u128>;

    /// Sign and broadcast a claim transaction, returning its hash
    async fn send_claim(&self, tx: &ClaimTransaction) -> Result<B256, BroadcastError>;

    /// Receipt of `hash`, `None` while it is not yet available
    async fn transaction_receipt(&self, hash: B256) -> Result<Option<ClaimReceipt>>;

    /// Every transaction in the block at `height`
    async fn block_transactions(&self, height: u64) -> Result<Vec<ObservedTransaction>>;
}
