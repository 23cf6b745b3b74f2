//! Source (Cosmos) ledger interface

pub mod tendermint;

use async_trait::async_trait;
use eyre::Result;
use tokio::sync::{mpsc, oneshot};

use crate::codec::RawEvent;

pub use self::tendermint::TendermintSource;

/// Result of one transaction in a block, as reported by `block_results`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TxResult {
    pub code: u32,
    pub events: Vec<RawEvent>,
}

impl TxResult {
    /// Events are only committed for transactions with code 0
    pub fn is_ok(&self) -> bool {
        self.code == 0
    }
}

/// Live stream of new block heights
///
/// Dropping the subscription without calling [`BlockSubscription::unsubscribe`]
/// also tears it down, just without waiting for the node to acknowledge.
pub struct BlockSubscription {
    heights: mpsc::Receiver<Result<u64>>,
    cancel: Option<oneshot::Sender<()>>,
    done: Option<oneshot::Receiver<()>>,
}

impl BlockSubscription {
    /// Wrap a height channel. `cancel` is signalled on unsubscribe and the
    /// producer signals `done` once it has released the subscription.
    pub fn new(
        heights: mpsc::Receiver<Result<u64>>,
        cancel: oneshot::Sender<()>,
        done: oneshot::Receiver<()>,
    ) -> Self {
        Self {
            heights,
            cancel: Some(cancel),
            done: Some(done),
        }
    }

    /// Next notified height; `None` once the stream has closed
    pub async fn next(&mut self) -> Option<Result<u64>> {
        self.heights.recv().await
    }

    /// Cancel the subscription and wait for the producer to release it
    pub async fn unsubscribe(mut self) {
        if let Some(cancel) = self.cancel.take() {
            let _ = cancel.send(());
        }
        if let Some(done) = self.done.take() {
            let _ = done.await;
        }
    }
}

#[async_trait]
pub trait SourceLedger: Send + Sync {
    /// Subscribe to new-block notifications
    async fn subscribe_new_blocks(&self) -> Result<BlockSubscription>;

    /// Transaction results of the block at `height`
    async fn block_results(&self, height: u64) -> Result<Vec<TxResult>>;
}
