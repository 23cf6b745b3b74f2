//! EVM destination ledger over JSON-RPC
//!
//! Signs claim transactions locally with the relayer key (legacy, EIP-155)
//! and reads blocks/receipts through alloy providers.

use alloy::consensus::Transaction as _;
use alloy::eips::BlockNumberOrTag;
use alloy::network::{EthereumWallet, TransactionBuilder};
use alloy::primitives::{Address, B256};
use alloy::providers::{Provider, ProviderBuilder};
use alloy::rpc::types::{BlockTransactionsKind, TransactionRequest};
use alloy::signers::local::PrivateKeySigner;
use alloy::transports::http::reqwest::Url;
use async_trait::async_trait;
use eyre::{eyre, Result, WrapErr};
use tracing::{debug, info};

use super::{BroadcastError, ClaimReceipt, ClaimTransaction, DestinationLedger, ObservedTransaction};
use crate::contracts::BridgeRegistry;
use crate::types::BridgeContract;

pub struct EvmDestination {
    rpc_url: Url,
    chain_id: u64,
    registry_address: Address,
    signer: PrivateKeySigner,
}

impl EvmDestination {
    pub fn new(
        rpc_url: &str,
        chain_id: u64,
        registry_address: Address,
        private_key: &str,
    ) -> Result<Self> {
        let rpc_url: Url = rpc_url.parse().wrap_err("Invalid EVM RPC URL")?;
        let signer: PrivateKeySigner = private_key
            .trim_start_matches("0x")
            .parse()
            .wrap_err("Invalid private key")?;

        info!(
            relayer_address = %signer.address(),
            chain_id,
            registry = %registry_address,
            "EVM destination initialized"
        );

        Ok(Self {
            rpc_url,
            chain_id,
            registry_address,
            signer,
        })
    }
}

#[async_trait]
impl DestinationLedger for EvmDestination {
    fn relayer_address(&self) -> Address {
        self.signer.address()
    }

    async fn resolve_contract(&self, contract: BridgeContract) -> Result<Address> {
        let provider = ProviderBuilder::new().on_http(self.rpc_url.clone());
        let registry = BridgeRegistry::new(self.registry_address, provider);

        let address = match contract {
            BridgeContract::CosmosBridge => registry.cosmosBridge().call().await?._0,
            BridgeContract::Oracle => registry.oracle().call().await?._0,
        };

        if address == Address::ZERO {
            return Err(eyre!("Registry has no address for {}", contract));
        }

        debug!(contract = %contract, address = %address, "Resolved bridge contract");
        Ok(address)
    }

    async fn pending_nonce(&self, address: Address) -> Result<u64> {
        let provider = ProviderBuilder::new().on_http(self.rpc_url.clone());
        provider
            .get_transaction_count(address)
            .pending()
            .await
            .wrap_err("Failed to get pending nonce")
    }

    async fn suggested_gas_price(&self) -> Result<u128> {
        let provider = ProviderBuilder::new().on_http(self.rpc_url.clone());
        provider
            .get_gas_price()
            .await
            .wrap_err("Failed to get gas price")
    }

    async fn send_claim(&self, tx: &ClaimTransaction) -> Result<B256, BroadcastError> {
        let wallet = EthereumWallet::from(self.signer.clone());
        let provider = ProviderBuilder::new()
            .wallet(wallet)
            .on_http(self.rpc_url.clone());

        let request = TransactionRequest::default()
            .with_from(self.signer.address())
            .with_to(tx.to)
            .with_input(tx.input.clone())
            .with_nonce(tx.nonce)
            .with_gas_price(tx.gas_price)
            .with_gas_limit(tx.gas_limit)
            .with_chain_id(self.chain_id);

        let pending = provider
            .send_transaction(request)
            .await
            .map_err(|e| BroadcastError::classify(e.to_string()))?;

        Ok(*pending.tx_hash())
    }

    async fn transaction_receipt(&self, hash: B256) -> Result<Option<ClaimReceipt>> {
        let provider = ProviderBuilder::new().on_http(self.rpc_url.clone());
        let receipt = provider
            .get_transaction_receipt(hash)
            .await
            .wrap_err("Failed to get transaction receipt")?;

        Ok(receipt.map(|receipt| ClaimReceipt {
            tx_hash: receipt.transaction_hash,
            block_number: receipt.block_number,
            status: receipt.status(),
        }))
    }

    async fn block_transactions(&self, height: u64) -> Result<Vec<ObservedTransaction>> {
        let provider = ProviderBuilder::new().on_http(self.rpc_url.clone());
        let block = provider
            .get_block_by_number(BlockNumberOrTag::Number(height), BlockTransactionsKind::Full)
            .await
            .wrap_err("Failed to get block")?
            .ok_or_else(|| eyre!("Block {} not found", height))?;

        let transactions = block
            .transactions
            .into_transactions()
            .map(|tx| {
                let hash = *tx.inner.tx_hash();
                let sender = match tx.inner.recover_signer() {
                    Ok(sender) => Some(sender),
                    Err(e) => {
                        debug!(tx_hash = %hash, error = %e, "Failed to recover sender");
                        None
                    }
                };
                ObservedTransaction {
                    hash,
                    sender,
                    to: tx.to(),
                    input: tx.input().clone(),
                }
            })
            .collect();

        Ok(transactions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Well-known anvil/hardhat development key #0
    const DEV_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

    #[test]
    fn test_relayer_address_from_key() {
        let destination =
            EvmDestination::new("http://localhost:8545", 31337, Address::ZERO, DEV_KEY).unwrap();
        assert_eq!(
            destination.relayer_address(),
            "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266".parse::<Address>().unwrap()
        );
    }

    #[test]
    fn test_rejects_bad_inputs() {
        assert!(EvmDestination::new("not a url", 1, Address::ZERO, DEV_KEY).is_err());
        assert!(EvmDestination::new("http://localhost:8545", 1, Address::ZERO, "0x1234").is_err());
    }

    #[tokio::test]
    #[ignore = "requires a running EVM node (EVM_RPC_URL)"]
    async fn test_live_block_and_gas_price() {
        let rpc_url =
            std::env::var("EVM_RPC_URL").unwrap_or_else(|_| "http://localhost:8545".to_string());
        let destination = EvmDestination::new(&rpc_url, 31337, Address::ZERO, DEV_KEY).unwrap();

        assert!(destination.suggested_gas_price().await.unwrap() > 0);
        destination.block_transactions(0).await.unwrap();
    }
}
