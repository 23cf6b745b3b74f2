//! Prophecy claim submitter
//!
//! Turns a [`CanonicalEvent`] into a signed `newProphecyClaim` transaction on
//! the EVM side and waits for its receipt. The submitter owns the relayer's
//! nonce counter; `submit` takes `&mut self`, so only one submission per
//! signing key can be in flight.

pub mod retry;

use alloy::primitives::{Address, B256};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::codec::encode_prophecy_claim;
use crate::destination::{BroadcastError, ClaimReceipt, ClaimTransaction, DestinationLedger};
use crate::metrics;
use crate::types::{BridgeContract, CanonicalEvent};

pub use retry::{PollOutcome, RetryOutcome, RetryPolicy};

/// Default gas price floor: 120 gwei
pub const DEFAULT_MIN_GAS_PRICE: u128 = 120_000_000_000;

/// Default gas limit of a claim transaction
pub const DEFAULT_GAS_LIMIT: u64 = 500_000;

/// Gas price and limit policy for claim transactions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GasPolicy {
    pub min_gas_price: u128,
    pub gas_limit: u64,
}

impl Default for GasPolicy {
    fn default() -> Self {
        Self {
            min_gas_price: DEFAULT_MIN_GAS_PRICE,
            gas_limit: DEFAULT_GAS_LIMIT,
        }
    }
}

impl GasPolicy {
    /// Suggested price doubled, less a quarter of the doubled value
    /// (net 1.5x), never below the floor
    pub fn gas_price(&self, suggested: u128) -> u128 {
        let doubled = suggested.saturating_mul(2);
        let price = doubled - doubled / 4;
        price.max(self.min_gas_price)
    }
}

/// Per-attempt submission record, logged but never persisted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmissionState {
    pub target_contract: Address,
    pub nonce: u64,
    pub gas_price: u128,
    pub attempt: u32,
}

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("failed to resolve {contract} contract: {error:#}")]
    Resolve {
        contract: BridgeContract,
        error: eyre::Report,
    },

    #[error("failed to get pending nonce: {0:#}")]
    Nonce(eyre::Report),

    #[error("failed to get gas price: {0:#}")]
    GasPrice(eyre::Report),

    #[error("broadcast failed: {0}")]
    Broadcast(BroadcastError),

    #[error("transaction still not found after {attempts} broadcast attempts")]
    BroadcastExhausted {
        attempts: u32,
        last_error: Option<BroadcastError>,
    },

    #[error("no receipt for {tx_hash} after {attempts} attempts")]
    ReceiptTimeout { tx_hash: B256, attempts: u32 },
}

impl SubmitError {
    /// Short label for metrics
    pub fn kind(&self) -> &'static str {
        match self {
            SubmitError::Resolve { .. } => "resolve",
            SubmitError::Nonce(_) => "nonce",
            SubmitError::GasPrice(_) => "gas_price",
            SubmitError::Broadcast(_) => "broadcast",
            SubmitError::BroadcastExhausted { .. } => "broadcast_exhausted",
            SubmitError::ReceiptTimeout { .. } => "receipt_timeout",
        }
    }
}

pub struct Submitter {
    destination: Arc<dyn DestinationLedger>,
    gas: GasPolicy,
    retry: RetryPolicy,
    nonce: Option<u64>,
}

impl Submitter {
    pub fn new(
        destination: Arc<dyn DestinationLedger>,
        gas: GasPolicy,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            destination,
            gas,
            retry,
            nonce: None,
        }
    }

    /// Next nonce to be used, `None` until seeded from the node
    pub fn nonce(&self) -> Option<u64> {
        self.nonce
    }

    /// Submit a prophecy claim for `event` and wait for its receipt
    ///
    /// The nonce counter only advances once a receipt is seen. A reverted
    /// receipt still consumes the nonce and is returned as `Ok`.
    pub async fn submit(&mut self, event: &CanonicalEvent) -> Result<ClaimReceipt, SubmitError> {
        let started = Instant::now();
        let result = self.submit_inner(event).await;

        let elapsed = started.elapsed().as_secs_f64();
        match &result {
            Ok(receipt) if receipt.status => metrics::record_submission("success", elapsed),
            Ok(_) => metrics::record_submission("reverted", elapsed),
            Err(e) => {
                metrics::record_submission("failed", elapsed);
                metrics::record_error("submitter", e.kind());
            }
        }

        result
    }

    async fn submit_inner(&mut self, event: &CanonicalEvent) -> Result<ClaimReceipt, SubmitError> {
        let contract = BridgeContract::from(event.relay_kind());
        let target = self
            .destination
            .resolve_contract(contract)
            .await
            .map_err(|error| SubmitError::Resolve { contract, error })?;

        let nonce = match self.nonce {
            Some(nonce) => nonce,
            None => {
                let relayer = self.destination.relayer_address();
                let nonce = self
                    .destination
                    .pending_nonce(relayer)
                    .await
                    .map_err(SubmitError::Nonce)?;
                debug!(relayer = %relayer, nonce, "Adopted pending nonce");
                self.nonce = Some(nonce);
                nonce
            }
        };

        let suggested = self
            .destination
            .suggested_gas_price()
            .await
            .map_err(SubmitError::GasPrice)?;
        let gas_price = self.gas.gas_price(suggested);

        let tx = ClaimTransaction {
            to: target,
            input: encode_prophecy_claim(event),
            nonce,
            gas_price,
            gas_limit: self.gas.gas_limit,
        };

        let destination = &*self.destination;
        let tx_ref = &tx;
        let outcome = self
            .retry
            .run(
                "broadcast",
                move |attempt| {
                    let state = SubmissionState {
                        target_contract: target,
                        nonce,
                        gas_price,
                        attempt,
                    };
                    debug!(?state, "Broadcasting prophecy claim");
                    destination.send_claim(tx_ref)
                },
                BroadcastError::is_retryable,
            )
            .await;

        let tx_hash = match outcome {
            RetryOutcome::Done(Ok(hash)) => hash,
            RetryOutcome::Done(Err(e)) => return Err(SubmitError::Broadcast(e)),
            RetryOutcome::Exhausted {
                attempts,
                last_error,
            } => {
                return Err(SubmitError::BroadcastExhausted {
                    attempts,
                    last_error,
                })
            }
        };

        info!(
            tx_hash = %tx_hash,
            nonce,
            gas_price,
            contract = %contract,
            "Prophecy claim broadcast, waiting for receipt"
        );

        let outcome = self
            .retry
            .poll("receipt", move |_| destination.transaction_receipt(tx_hash))
            .await;

        let receipt = match outcome {
            PollOutcome::Ready(receipt) => receipt,
            PollOutcome::Exhausted {
                attempts,
                last_error,
            } => {
                if let Some(e) = last_error {
                    warn!(tx_hash = %tx_hash, error = %e, "Last receipt query failed");
                }
                return Err(SubmitError::ReceiptTimeout { tx_hash, attempts });
            }
        };

        self.nonce = Some(nonce + 1);
        metrics::set_nonce(nonce + 1);

        if receipt.status {
            info!(
                tx_hash = %tx_hash,
                block = ?receipt.block_number,
                sender = %String::from_utf8_lossy(&event.cosmos_sender),
                sequence = event.cosmos_sender_sequence,
                "Prophecy claim confirmed"
            );
        } else {
            warn!(
                tx_hash = %tx_hash,
                block = ?receipt.block_number,
                sender = %String::from_utf8_lossy(&event.cosmos_sender),
                sequence = event.cosmos_sender_sequence,
                "Prophecy claim reverted"
            );
        }

        Ok(receipt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::decode_claim_identity;
    use crate::testing::{lock_event, MockDestination};
    use std::time::Duration;

    const GWEI: u128 = 1_000_000_000;

    fn submitter(destination: Arc<MockDestination>) -> Submitter {
        Submitter::new(
            destination,
            GasPolicy::default(),
            RetryPolicy::new(30, Duration::ZERO),
        )
    }

    #[test]
    fn test_gas_price_policy() {
        let policy = GasPolicy::default();
        assert_eq!(policy.gas_price(100 * GWEI), 150 * GWEI);
        assert_eq!(policy.gas_price(200 * GWEI), 300 * GWEI);
        // Below the floor
        assert_eq!(policy.gas_price(GWEI), 120 * GWEI);
        assert_eq!(policy.gas_price(0), 120 * GWEI);
        // Exactly at the floor
        assert_eq!(policy.gas_price(80 * GWEI), 120 * GWEI);
    }

    #[test]
    fn test_gas_price_custom_floor() {
        let policy = GasPolicy {
            min_gas_price: 0,
            gas_limit: 21_000,
        };
        assert_eq!(policy.gas_price(3), 5); // doubled 6, minus 6/4 = 1
        assert_eq!(policy.gas_price(u128::MAX), u128::MAX - u128::MAX / 4);
    }

    #[tokio::test]
    async fn test_submit_lock_claim() {
        let destination = Arc::new(MockDestination::new().with_pending_nonce(7));
        let mut submitter = submitter(destination.clone());

        let event = lock_event(5);
        let receipt = submitter.submit(&event).await.unwrap();
        assert!(receipt.status);

        let sent = destination.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, MockDestination::COSMOS_BRIDGE);
        assert_eq!(sent[0].nonce, 7);
        assert_eq!(sent[0].gas_limit, DEFAULT_GAS_LIMIT);
        assert_eq!(sent[0].gas_price, DEFAULT_MIN_GAS_PRICE);
        assert_eq!(decode_claim_identity(&sent[0].input).unwrap(), event.identity());

        assert_eq!(submitter.nonce(), Some(8));
    }

    #[tokio::test]
    async fn test_nonce_reused_after_seeding() {
        let destination = Arc::new(MockDestination::new().with_pending_nonce(3));
        let mut submitter = submitter(destination.clone());

        submitter.submit(&lock_event(1)).await.unwrap();
        destination.set_pending_nonce(100);
        submitter.submit(&lock_event(2)).await.unwrap();

        let nonces: Vec<u64> = destination.sent().iter().map(|tx| tx.nonce).collect();
        assert_eq!(nonces, vec![3, 4]);
        assert_eq!(destination.pending_nonce_queries(), 1);
    }

    #[tokio::test]
    async fn test_not_found_broadcast_is_retried() {
        let destination = Arc::new(MockDestination::new().with_pending_nonce(0));
        destination.fail_broadcasts(BroadcastError::NotFound("not found".into()), 3);
        let mut submitter = submitter(destination.clone());

        submitter.submit(&lock_event(1)).await.unwrap();

        assert_eq!(destination.broadcast_attempts(), 4);
        assert_eq!(destination.sent().len(), 1);
        assert_eq!(submitter.nonce(), Some(1));
    }

    #[tokio::test]
    async fn test_rejected_broadcast_is_not_retried() {
        let destination = Arc::new(MockDestination::new().with_pending_nonce(9));
        destination.fail_broadcasts(BroadcastError::Rejected("nonce too low".into()), 1);
        let mut submitter = submitter(destination.clone());

        let err = submitter.submit(&lock_event(1)).await.unwrap_err();
        assert!(matches!(err, SubmitError::Broadcast(BroadcastError::Rejected(_))));
        assert_eq!(destination.broadcast_attempts(), 1);
        assert_eq!(submitter.nonce(), Some(9));
    }

    #[tokio::test]
    async fn test_broadcast_exhaustion_leaves_nonce() {
        let destination = Arc::new(MockDestination::new().with_pending_nonce(4));
        destination.fail_broadcasts(BroadcastError::NotFound("not found".into()), 100);
        let mut submitter = submitter(destination.clone());

        let err = submitter.submit(&lock_event(1)).await.unwrap_err();
        assert!(matches!(err, SubmitError::BroadcastExhausted { attempts: 30, .. }));
        assert_eq!(destination.broadcast_attempts(), 30);
        assert_eq!(submitter.nonce(), Some(4));
    }

    #[tokio::test]
    async fn test_receipt_exhaustion_leaves_nonce() {
        let destination = Arc::new(MockDestination::new().with_pending_nonce(4));
        destination.withhold_receipts();
        let mut submitter = submitter(destination.clone());

        let err = submitter.submit(&lock_event(1)).await.unwrap_err();
        assert!(matches!(err, SubmitError::ReceiptTimeout { attempts: 30, .. }));
        assert_eq!(submitter.nonce(), Some(4));
    }

    #[tokio::test]
    async fn test_reverted_receipt_consumes_nonce() {
        let destination = Arc::new(MockDestination::new().with_pending_nonce(4));
        destination.revert_receipts();
        let mut submitter = submitter(destination.clone());

        let receipt = submitter.submit(&lock_event(1)).await.unwrap();
        assert!(!receipt.status);
        assert_eq!(submitter.nonce(), Some(5));
    }

    #[tokio::test]
    async fn test_registry_failure_is_not_retried() {
        let destination = Arc::new(MockDestination::new().with_pending_nonce(0));
        destination.fail_registry();
        let mut submitter = submitter(destination.clone());

        let err = submitter.submit(&lock_event(1)).await.unwrap_err();
        assert!(matches!(
            err,
            SubmitError::Resolve {
                contract: BridgeContract::CosmosBridge,
                ..
            }
        ));
        assert_eq!(destination.broadcast_attempts(), 0);
        assert_eq!(submitter.nonce(), None);
    }

    #[tokio::test]
    async fn test_gas_price_follows_suggestion() {
        let destination = Arc::new(
            MockDestination::new()
                .with_pending_nonce(0)
                .with_gas_price(200 * GWEI),
        );
        let mut submitter = submitter(destination.clone());

        submitter.submit(&lock_event(1)).await.unwrap();
        assert_eq!(destination.sent()[0].gas_price, 300 * GWEI);
    }
}
