//! Replay of a historical Cosmos height range
//!
//! Recovers events the listener failed to relay. Claims already present on
//! the EVM side (per the destination scanner) are skipped.

use eyre::{eyre, Result};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::listener::witnessed_events;
use crate::metrics;
use crate::scanner::Scanner;
use crate::source::SourceLedger;
use crate::submitter::Submitter;
use crate::types::ClaimIdentity;

/// Source heights `[source_from, source_to)` and destination heights
/// `[dest_from, dest_to]`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplayRange {
    pub source_from: u64,
    pub source_to: u64,
    pub dest_from: u64,
    pub dest_to: u64,
}

impl ReplayRange {
    pub fn validate(&self) -> Result<()> {
        if self.source_from > self.source_to {
            return Err(eyre!(
                "source range is inverted: {} > {}",
                self.source_from,
                self.source_to
            ));
        }
        if self.dest_from > self.dest_to {
            return Err(eyre!(
                "destination range is inverted: {} > {}",
                self.dest_from,
                self.dest_to
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplaySummary {
    /// Claims found on the destination chain
    pub already_relayed: usize,
    pub blocks_processed: u64,
    pub blocks_failed: u64,
    pub submitted: usize,
    pub skipped: usize,
    pub failed: usize,
}

pub struct Replayer {
    source: Arc<dyn SourceLedger>,
    scanner: Scanner,
    submitter: Submitter,
}

impl Replayer {
    pub fn new(source: Arc<dyn SourceLedger>, scanner: Scanner, submitter: Submitter) -> Self {
        Self {
            source,
            scanner,
            submitter,
        }
    }

    pub fn submitter(&self) -> &Submitter {
        &self.submitter
    }

    /// Re-process `range.source_from..range.source_to`, skipping events whose
    /// claims appear in the scanned destination range
    pub async fn replay(&mut self, range: ReplayRange) -> Result<ReplaySummary> {
        range.validate()?;

        let mut relayed: HashSet<ClaimIdentity> =
            self.scanner.scan_claims(range.dest_from, range.dest_to).await;
        let mut summary = ReplaySummary {
            already_relayed: relayed.len(),
            ..Default::default()
        };

        info!(
            source_from = range.source_from,
            source_to = range.source_to,
            already_relayed = summary.already_relayed,
            "Replaying Cosmos blocks"
        );

        for height in range.source_from..range.source_to {
            let results = match self.source.block_results(height).await {
                Ok(results) => results,
                Err(e) => {
                    warn!(height, error = %e, "Failed to fetch block results, skipping");
                    metrics::record_error("replay", "block_fetch");
                    summary.blocks_failed += 1;
                    continue;
                }
            };

            for event in witnessed_events(height, &results) {
                let identity = event.identity();
                if relayed.contains(&identity) {
                    info!(height, claim = %identity, "Already relayed, skipping");
                    metrics::record_event(event.kind.as_str(), "skipped");
                    summary.skipped += 1;
                    continue;
                }

                match self.submitter.submit(&event).await {
                    Ok(receipt) => {
                        info!(
                            height,
                            claim = %identity,
                            tx_hash = %receipt.tx_hash,
                            "Replayed event"
                        );
                        metrics::record_event(event.kind.as_str(), "relayed");
                        summary.submitted += 1;
                        relayed.insert(identity);
                    }
                    Err(e) => {
                        error!(height, claim = %identity, error = %e, "Failed to replay event");
                        metrics::record_event(event.kind.as_str(), "failed");
                        summary.failed += 1;
                    }
                }
            }

            summary.blocks_processed += 1;
        }

        info!(
            blocks = summary.blocks_processed,
            failed_blocks = summary.blocks_failed,
            submitted = summary.submitted,
            skipped = summary.skipped,
            failed = summary.failed,
            "Replay finished"
        );

        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::decode_claim_identity;
    use crate::submitter::{GasPolicy, RetryPolicy};
    use crate::testing::{
        lock_event, raw_lock_event, raw_transfer_event, tx_result, MockDestination, MockSource,
    };
    use std::time::Duration;

    fn replayer(source: Arc<MockSource>, destination: Arc<MockDestination>) -> Replayer {
        let submitter = Submitter::new(
            destination.clone(),
            GasPolicy::default(),
            RetryPolicy::new(3, Duration::ZERO),
        );
        Replayer::new(source, Scanner::new(destination), submitter)
    }

    fn range(source_from: u64, source_to: u64, dest_to: u64) -> ReplayRange {
        ReplayRange {
            source_from,
            source_to,
            dest_from: 0,
            dest_to,
        }
    }

    #[test]
    fn test_validate_range() {
        assert!(range(1, 1, 0).validate().is_ok());
        assert!(range(2, 1, 0).validate().is_err());
        let inverted = ReplayRange {
            source_from: 0,
            source_to: 1,
            dest_from: 5,
            dest_to: 4,
        };
        assert!(inverted.validate().is_err());
    }

    #[tokio::test]
    async fn test_source_range_is_half_open() {
        let source = Arc::new(
            MockSource::new()
                .with_block(1, vec![tx_result(vec![raw_lock_event(1)])])
                .with_block(3, vec![tx_result(vec![raw_lock_event(3)])]),
        );
        let destination = Arc::new(MockDestination::new().with_pending_nonce(0));
        let mut replayer = replayer(source.clone(), destination.clone());

        let summary = replayer.replay(range(1, 3, 0)).await.unwrap();

        assert_eq!(source.fetched(), vec![1, 2]);
        assert_eq!(summary.submitted, 1);
        assert_eq!(summary.blocks_processed, 2);
    }

    #[tokio::test]
    async fn test_skips_already_relayed() {
        let source = Arc::new(
            MockSource::new().with_block(
                5,
                vec![tx_result(vec![raw_lock_event(1), raw_lock_event(2), raw_transfer_event()])],
            ),
        );
        let destination = Arc::new(MockDestination::new().with_pending_nonce(0));

        // Claim for sequence 1 already landed in destination block 1
        let mut first = replayer(Arc::new(MockSource::new()), destination.clone());
        first.submitter.submit(&lock_event(1)).await.unwrap();

        let mut replayer = replayer(source, destination.clone());
        let summary = replayer.replay(range(5, 6, destination.head())).await.unwrap();

        assert_eq!(summary.already_relayed, 1);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.submitted, 1);
        let sent = destination.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(decode_claim_identity(&sent[1].input).unwrap(), lock_event(2).identity());
    }

    #[tokio::test]
    async fn test_second_replay_submits_nothing() {
        let source = Arc::new(
            MockSource::new()
                .with_block(1, vec![tx_result(vec![raw_lock_event(1)])])
                .with_block(2, vec![tx_result(vec![raw_lock_event(2), raw_lock_event(3)])]),
        );
        let destination = Arc::new(MockDestination::new().with_pending_nonce(0));

        let mut replayer = replayer(source, destination.clone());
        let first = replayer.replay(range(1, 3, 0)).await.unwrap();
        assert_eq!(first.submitted, 3);

        let second = replayer.replay(range(1, 3, destination.head())).await.unwrap();
        assert_eq!(second.already_relayed, 3);
        assert_eq!(second.submitted, 0);
        assert_eq!(second.skipped, 3);
        assert_eq!(destination.sent().len(), 3);
    }

    #[tokio::test]
    async fn test_failed_blocks_are_skipped() {
        let source = Arc::new(
            MockSource::new()
                .with_block(1, vec![tx_result(vec![raw_lock_event(1)])])
                .with_block(2, vec![tx_result(vec![raw_lock_event(2)])]),
        );
        source.fail_block(1);
        let destination = Arc::new(MockDestination::new().with_pending_nonce(0));
        let mut replayer = replayer(source, destination.clone());

        let summary = replayer.replay(range(1, 3, 0)).await.unwrap();

        assert_eq!(summary.blocks_failed, 1);
        assert_eq!(summary.blocks_processed, 1);
        assert_eq!(summary.submitted, 1);
    }

    #[tokio::test]
    async fn test_submission_failures_are_counted() {
        let source =
            Arc::new(MockSource::new().with_block(1, vec![tx_result(vec![raw_lock_event(1)])]));
        let destination = Arc::new(MockDestination::new().with_pending_nonce(0));
        destination.fail_registry();
        let mut replayer = replayer(source, destination.clone());

        let summary = replayer.replay(range(1, 2, 0)).await.unwrap();

        assert_eq!(summary.failed, 1);
        assert_eq!(summary.submitted, 0);
        assert!(destination.sent().is_empty());
    }
}
