//! Cosmos listener
//!
//! Follows new blocks on the Cosmos chain, relays every lock/burn event to
//! the submitter and checkpoints each height once it is fully processed.

use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{oneshot, watch};
use tracing::{debug, error, info, warn};

use crate::checkpoint::{CheckpointError, CheckpointStore};
use crate::codec::{classify_event, decode_claim_event, EventClass};
use crate::metrics;
use crate::source::{SourceLedger, TxResult};
use crate::submitter::Submitter;
use crate::types::CanonicalEvent;

#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("failed to subscribe to new blocks: {0:#}")]
    Subscribe(eyre::Report),

    #[error("new block subscription failed: {0:#}")]
    Subscription(eyre::Report),

    #[error("new block subscription closed by the node")]
    SubscriptionClosed,

    #[error("failed to fetch block results at height {height}: {error:#}")]
    BlockResults { height: u64, error: eyre::Report },

    #[error("checkpoint write failed: {0}")]
    Checkpoint(#[from] CheckpointError),

    #[error("listener task failed: {0}")]
    Task(String),
}

impl ListenerError {
    /// Fatal errors stop the process instead of restarting the listener
    pub fn is_fatal(&self) -> bool {
        matches!(self, ListenerError::Checkpoint(_) | ListenerError::Task(_))
    }
}

pub struct Listener {
    source: Arc<dyn SourceLedger>,
    submitter: Submitter,
    checkpoint: CheckpointStore,
    shutdown: watch::Receiver<bool>,
    /// Last processed height; may be ahead of the store on first run
    cursor: Option<u64>,
}

impl std::fmt::Debug for Listener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listener")
            .field("cursor", &self.cursor)
            .finish_non_exhaustive()
    }
}

impl Listener {
    pub fn new(
        source: Arc<dyn SourceLedger>,
        submitter: Submitter,
        checkpoint: CheckpointStore,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let cursor = checkpoint.load();
        Self {
            source,
            submitter,
            checkpoint,
            shutdown,
            cursor,
        }
    }

    /// Last processed height, `None` until the first block is seen
    pub fn last_processed(&self) -> Option<u64> {
        self.cursor
    }

    /// Persisted checkpoint
    pub fn checkpoint(&self) -> Option<u64> {
        self.checkpoint.load()
    }

    pub fn submitter(&self) -> &Submitter {
        &self.submitter
    }

    fn shutdown_requested(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Stream new blocks until shutdown or failure
    ///
    /// `subscribed` fires once the subscription is established. Returns
    /// `Ok(())` only when shutdown was requested.
    pub async fn run(&mut self, subscribed: oneshot::Sender<()>) -> Result<(), ListenerError> {
        if self.shutdown_requested() {
            return Ok(());
        }

        self.cursor = self.checkpoint.load().max(self.cursor);
        let mut shutdown = self.shutdown.clone();

        // A node can accept the socket and never answer the subscribe call
        let mut subscription = {
            let mut subscribe = self.source.subscribe_new_blocks();
            loop {
                tokio::select! {
                    biased;
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            info!("Shutdown requested while subscribing, stopping listener");
                            return Ok(());
                        }
                    }
                    result = &mut subscribe => break result.map_err(ListenerError::Subscribe)?,
                }
            }
        };

        info!(last_processed = ?self.cursor, "Listening for new Cosmos blocks");
        let _ = subscribed.send(());
        metrics::set_up(true);

        let result = loop {
            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Shutdown requested, stopping listener");
                        break Ok(());
                    }
                }
                item = subscription.next() => match item {
                    Some(Ok(height)) => {
                        if let Err(e) = self.on_new_block(height).await {
                            break Err(e);
                        }
                    }
                    Some(Err(e)) => break Err(ListenerError::Subscription(e)),
                    None => break Err(ListenerError::SubscriptionClosed),
                },
            }
        };

        metrics::set_up(false);
        subscription.unsubscribe().await;
        debug!("Unsubscribed from new blocks");

        result
    }

    /// Handle a new-block notification for `height`
    ///
    /// On first run the cursor jumps to `height` without processing any
    /// backlog. Otherwise every height after the cursor up to `height` is
    /// processed in order, stopping early between heights on shutdown.
    pub async fn on_new_block(&mut self, height: u64) -> Result<(), ListenerError> {
        let Some(last) = self.cursor else {
            info!(height, "No checkpoint found, starting from current head");
            self.cursor = Some(height);
            return Ok(());
        };

        if height <= last {
            debug!(height, last_processed = last, "Block already processed");
            return Ok(());
        }

        for next in last + 1..=height {
            if next > last + 1 && self.shutdown_requested() {
                info!(height = next, "Shutdown requested, leaving remaining blocks");
                break;
            }
            self.process_height(next).await?;
        }

        Ok(())
    }

    async fn process_height(&mut self, height: u64) -> Result<(), ListenerError> {
        debug!(height, "Processing Cosmos block");

        let results = self
            .source
            .block_results(height)
            .await
            .map_err(|error| ListenerError::BlockResults { height, error })?;

        for event in witnessed_events(height, &results) {
            match self.submitter.submit(&event).await {
                Ok(receipt) => {
                    metrics::record_event(event.kind.as_str(), "relayed");
                    debug!(
                        height,
                        tx_hash = %receipt.tx_hash,
                        claim = %event.identity(),
                        "Relayed event"
                    );
                }
                Err(e) => {
                    metrics::record_event(event.kind.as_str(), "failed");
                    error!(height, claim = %event.identity(), error = %e, "Failed to relay event");
                }
            }
        }

        self.checkpoint.save(height)?;
        self.cursor = Some(height);
        metrics::record_block_processed(height);

        Ok(())
    }
}

/// Decode every lock/burn event committed in a block
///
/// Failed transactions and unsupported events are ignored; malformed events
/// are logged and dropped.
pub(crate) fn witnessed_events(height: u64, results: &[TxResult]) -> Vec<CanonicalEvent> {
    let mut events = Vec::new();

    for (index, result) in results.iter().enumerate() {
        if !result.is_ok() {
            debug!(height, index, code = result.code, "Skipping failed transaction");
            continue;
        }

        for raw in &result.events {
            let EventClass::Claim(kind) = classify_event(&raw.kind) else {
                continue;
            };

            match decode_claim_event(kind, &raw.attributes) {
                Ok(event) => {
                    info!(height, event = %event, "Witnessed {} event", kind);
                    events.push(event);
                }
                Err(e) => {
                    metrics::record_event(kind.as_str(), "malformed");
                    warn!(height, index, kind = %kind, error = %e, "Skipping malformed event");
                }
            }
        }
    }

    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::destination::BroadcastError;
    use crate::submitter::{GasPolicy, RetryPolicy};
    use crate::testing::{
        raw_burn_event, raw_lock_event, raw_transfer_event, tx_result, MockDestination, MockSource,
    };
    use std::time::Duration;
    use tempfile::TempDir;

    struct Harness {
        _dir: TempDir,
        destination: Arc<MockDestination>,
        source: Arc<MockSource>,
        shutdown: watch::Sender<bool>,
        listener: Listener,
    }

    fn harness(source: MockSource, checkpoint: Option<u64>) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let mut store = CheckpointStore::open(dir.path()).unwrap();
        if let Some(height) = checkpoint {
            store.save(height).unwrap();
        }

        let destination = Arc::new(MockDestination::new().with_pending_nonce(0));
        let source = Arc::new(source);
        let submitter = Submitter::new(
            destination.clone(),
            GasPolicy::default(),
            RetryPolicy::new(3, Duration::ZERO),
        );
        let (shutdown, shutdown_rx) = watch::channel(false);
        let listener = Listener::new(source.clone(), submitter, store, shutdown_rx);

        Harness {
            _dir: dir,
            destination,
            source,
            shutdown,
            listener,
        }
    }

    #[test]
    fn test_witnessed_events_filters() {
        let results = vec![
            tx_result(vec![raw_transfer_event(), raw_lock_event(1)]),
            TxResult {
                code: 11,
                events: vec![raw_lock_event(2)],
            },
            tx_result(vec![raw_burn_event(3, "ceth"), raw_burn_event(4, "eth")]),
        ];

        let events = witnessed_events(1, &results);
        let sequences: Vec<u64> = events.iter().map(|e| e.cosmos_sender_sequence).collect();
        assert_eq!(sequences, vec![1, 3]);
        assert_eq!(events[1].symbol, "eth");
    }

    #[tokio::test]
    async fn test_first_notification_sets_cursor_only() {
        let mut h = harness(MockSource::new(), None);

        h.listener.on_new_block(100).await.unwrap();

        assert_eq!(h.listener.last_processed(), Some(100));
        assert_eq!(h.listener.checkpoint(), None);
        assert!(h.source.fetched().is_empty());
    }

    #[tokio::test]
    async fn test_processes_range_in_order() {
        let source = MockSource::new().with_block(12, vec![tx_result(vec![raw_lock_event(5)])]);
        let mut h = harness(source, Some(10));

        h.listener.on_new_block(13).await.unwrap();

        assert_eq!(h.source.fetched(), vec![11, 12, 13]);
        assert_eq!(h.listener.checkpoint(), Some(13));
        assert_eq!(h.destination.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_unsupported_events_advance_checkpoint() {
        let source =
            MockSource::new().with_block(11, vec![tx_result(vec![raw_transfer_event()])]);
        let mut h = harness(source, Some(10));

        h.listener.on_new_block(11).await.unwrap();

        assert_eq!(h.listener.checkpoint(), Some(11));
        assert!(h.destination.sent().is_empty());
    }

    #[tokio::test]
    async fn test_submission_failure_still_advances() {
        let source = MockSource::new().with_block(11, vec![tx_result(vec![raw_lock_event(5)])]);
        let mut h = harness(source, Some(10));
        h.destination
            .fail_broadcasts(BroadcastError::Rejected("insufficient funds".into()), 1);

        h.listener.on_new_block(11).await.unwrap();

        assert_eq!(h.listener.checkpoint(), Some(11));
        assert!(h.destination.sent().is_empty());
    }

    #[tokio::test]
    async fn test_block_fetch_failure_holds_checkpoint() {
        let mut h = harness(MockSource::new(), Some(10));
        h.source.fail_block(12);

        let err = h.listener.on_new_block(13).await.unwrap_err();
        assert!(matches!(err, ListenerError::BlockResults { height: 12, .. }));
        assert!(!err.is_fatal());
        assert_eq!(h.listener.checkpoint(), Some(11));

        h.source.heal_block(12);
        h.listener.on_new_block(13).await.unwrap();
        assert_eq!(h.listener.checkpoint(), Some(13));
        assert_eq!(h.source.fetched(), vec![11, 12, 12, 13]);
    }

    #[tokio::test]
    async fn test_stale_notification_ignored() {
        let mut h = harness(MockSource::new(), Some(10));

        h.listener.on_new_block(9).await.unwrap();
        h.listener.on_new_block(10).await.unwrap();

        assert!(h.source.fetched().is_empty());
        assert_eq!(h.listener.checkpoint(), Some(10));
    }

    #[tokio::test]
    async fn test_shutdown_stops_between_heights() {
        let mut h = harness(MockSource::new(), Some(10));
        h.shutdown.send(true).unwrap();

        h.listener.on_new_block(20).await.unwrap();

        // The first pending height always completes
        assert_eq!(h.source.fetched(), vec![11]);
        assert_eq!(h.listener.checkpoint(), Some(11));
    }

    #[tokio::test]
    async fn test_run_until_subscription_closes() {
        let source = MockSource::new().with_block(11, vec![tx_result(vec![raw_lock_event(5)])]);
        source.push_subscription(vec![Ok(10), Ok(11)], false);
        let mut h = harness(source, None);

        let (subscribed, subscribed_rx) = oneshot::channel();
        let err = h.listener.run(subscribed).await.unwrap_err();

        assert!(matches!(err, ListenerError::SubscriptionClosed));
        assert!(subscribed_rx.await.is_ok());
        assert_eq!(h.listener.checkpoint(), Some(11));
        assert_eq!(h.destination.sent().len(), 1);
        assert_eq!(h.source.unsubscribed(), 1);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let source = MockSource::new();
        source.push_subscription(vec![Ok(10)], true);
        let mut h = harness(source, None);

        let shutdown = h.shutdown;
        let stopper = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            shutdown.send(true).unwrap();
        });

        let (subscribed, _) = oneshot::channel();
        h.listener.run(subscribed).await.unwrap();
        stopper.await.unwrap();

        assert_eq!(h.listener.last_processed(), Some(10));
        assert_eq!(h.source.unsubscribed(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_while_subscribe_hangs() {
        let h = harness(MockSource::new(), Some(10));
        h.source.stall_subscriptions();
        let Harness {
            _dir,
            source,
            shutdown,
            mut listener,
            ..
        } = h;

        let (subscribed, subscribed_rx) = oneshot::channel();
        let run = tokio::spawn(async move { listener.run(subscribed).await });
        while source.subscribe_attempts() == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        shutdown.send(true).unwrap();

        tokio::time::timeout(Duration::from_secs(3), run)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(subscribed_rx.await.is_err());
        assert_eq!(source.unsubscribed(), 0);
    }

    #[tokio::test]
    async fn test_subscribe_failure() {
        let mut h = harness(MockSource::new(), None);

        let (subscribed, subscribed_rx) = oneshot::channel();
        let err = h.listener.run(subscribed).await.unwrap_err();

        assert!(matches!(err, ListenerError::Subscribe(_)));
        assert!(subscribed_rx.await.is_err());
    }
}
