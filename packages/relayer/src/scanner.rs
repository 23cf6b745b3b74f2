//! Destination scanner
//!
//! Walks EVM blocks looking for `newProphecyClaim` transactions this relayer
//! signed, and recovers their claim identities for de-duplication.

use alloy::primitives::Address;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::codec::{decode_claim_identity, is_prophecy_claim};
use crate::destination::{DestinationLedger, ObservedTransaction};
use crate::metrics;
use crate::types::ClaimIdentity;

pub struct Scanner {
    destination: Arc<dyn DestinationLedger>,
    relayer: Address,
}

impl Scanner {
    pub fn new(destination: Arc<dyn DestinationLedger>) -> Self {
        let relayer = destination.relayer_address();
        Self {
            destination,
            relayer,
        }
    }

    /// Identities of claims submitted by the relayer in blocks
    /// `[from_height, to_height]`
    ///
    /// Blocks that cannot be fetched and transactions that cannot be decoded
    /// are logged and skipped.
    pub async fn scan_claims(&self, from_height: u64, to_height: u64) -> HashSet<ClaimIdentity> {
        let mut claims = HashSet::new();

        for height in from_height..=to_height {
            let transactions = match self.destination.block_transactions(height).await {
                Ok(transactions) => transactions,
                Err(e) => {
                    warn!(height, error = %e, "Failed to fetch destination block, skipping");
                    metrics::record_error("scanner", "block_fetch");
                    continue;
                }
            };

            for tx in transactions.iter().filter(|tx| self.is_relayer_claim(tx)) {
                match decode_claim_identity(&tx.input) {
                    Ok(identity) => {
                        debug!(
                            height,
                            tx_hash = %tx.hash,
                            claim = %identity,
                            "Found relayed claim"
                        );
                        claims.insert(identity);
                    }
                    Err(e) => {
                        warn!(
                            height,
                            tx_hash = %tx.hash,
                            error = %e,
                            "Failed to decode claim, skipping"
                        );
                        metrics::record_error("scanner", "decode");
                    }
                }
            }
        }

        info!(
            from_height,
            to_height,
            claims = claims.len(),
            "Scanned destination chain for relayed claims"
        );

        claims
    }

    fn is_relayer_claim(&self, tx: &ObservedTransaction) -> bool {
        match tx.sender {
            Some(sender) => sender == self.relayer && is_prophecy_claim(&tx.input),
            None => {
                debug!(tx_hash = %tx.hash, "Skipping transaction with unrecoverable sender");
                false
            }
        }
    }
}
