//! Tendermint/CometBFT source ledger
//!
//! New blocks arrive over the websocket subscription; per-block transaction
//! results come from the node's `block_results` endpoint. Both clients speak
//! the RPC dialect selected by [`CompatMode`], so v0.34 nodes (base64 event
//! attributes) and v0.37+ nodes (plain strings) decode the same way.

use async_trait::async_trait;
use eyre::{eyre, Result, WrapErr};
use futures::StreamExt;
use tendermint::abci;
use tendermint::block::Height;
use tendermint_rpc::client::CompatMode;
use tendermint_rpc::endpoint::block_results;
use tendermint_rpc::event::EventData;
use tendermint_rpc::query::EventType;
use tendermint_rpc::{
    Client, HttpClient, HttpClientUrl, SubscriptionClient, WebSocketClient, WebSocketClientUrl,
};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use super::{BlockSubscription, SourceLedger, TxResult};
use crate::codec::{Attribute, RawEvent};

/// Buffered notifications before the websocket reader applies back-pressure
const SUBSCRIPTION_BUFFER: usize = 64;

pub struct TendermintSource {
    ws_url: WebSocketClientUrl,
    compat: CompatMode,
    rpc: HttpClient,
}

impl TendermintSource {
    pub fn new(rpc_url: &str, ws_url: &str, compat: CompatMode) -> Result<Self> {
        let http_url: HttpClientUrl = rpc_url
            .parse()
            .wrap_err_with(|| format!("Invalid Tendermint RPC URL {}", rpc_url))?;
        let ws_url: WebSocketClientUrl = ws_url
            .parse()
            .wrap_err_with(|| format!("Invalid Tendermint websocket URL {}", ws_url))?;
        let rpc = HttpClient::builder(http_url)
            .compat_mode(compat)
            .build()
            .wrap_err("Failed to build Tendermint RPC client")?;

        Ok(Self {
            ws_url,
            compat,
            rpc,
        })
    }

    /// Build a source using the dialect matching the version the node
    /// reports on `/status`
    pub async fn detect(rpc_url: &str, ws_url: &str) -> Result<Self> {
        let client = HttpClient::new(rpc_url)
            .wrap_err_with(|| format!("Invalid Tendermint RPC URL {}", rpc_url))?;
        let status = client
            .status()
            .await
            .wrap_err("Failed to query Tendermint node status")?;
        let version = status.node_info.version;
        let compat = CompatMode::from_version(version.clone())
            .wrap_err_with(|| format!("Unsupported Tendermint version {}", version))?;

        info!(node_version = %version, compat_mode = %compat, "Detected Tendermint RPC dialect");
        Self::new(rpc_url, ws_url, compat)
    }

    pub fn compat_mode(&self) -> CompatMode {
        self.compat
    }
}

#[async_trait]
impl SourceLedger for TendermintSource {
    async fn subscribe_new_blocks(&self) -> Result<BlockSubscription> {
        let (client, driver) = WebSocketClient::builder(self.ws_url.clone())
            .compat_mode(self.compat)
            .build()
            .await
            .wrap_err_with(|| format!("Failed to connect to {}", self.ws_url))?;
        let driver_handle = tokio::spawn(async move { driver.run().await });

        let mut subscription = match client.subscribe(EventType::NewBlock.into()).await {
            Ok(subscription) => subscription,
            Err(e) => {
                let _ = client.close();
                let _ = driver_handle.await;
                return Err(e).wrap_err("Failed to subscribe to new blocks");
            }
        };

        info!(ws_url = %self.ws_url, "Subscribed to new blocks");

        let (heights_tx, heights_rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let (cancel_tx, mut cancel_rx) = oneshot::channel();
        let (done_tx, done_rx) = oneshot::channel();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = &mut cancel_rx => break,
                    item = subscription.next() => match item {
                        Some(Ok(event)) => {
                            let Some(height) = new_block_height(&event.data) else {
                                debug!(query = %event.query, "Ignoring event without block");
                                continue;
                            };
                            if heights_tx.send(Ok(height)).await.is_err() {
                                break;
                            }
                        }
                        Some(Err(e)) => {
                            let _ = heights_tx
                                .send(Err(eyre!(e).wrap_err("New block subscription failed")))
                                .await;
                            break;
                        }
                        None => break,
                    },
                }
            }

            if let Err(e) = client.unsubscribe(EventType::NewBlock.into()).await {
                debug!(error = %e, "Unsubscribe failed");
            }
            if let Err(e) = client.close() {
                debug!(error = %e, "Closing websocket client failed");
            }
            match driver_handle.await {
                Ok(Err(e)) => warn!(error = %e, "Websocket driver terminated with error"),
                Err(e) => warn!(error = %e, "Websocket driver task panicked"),
                Ok(Ok(())) => {}
            }
            let _ = done_tx.send(());
        });

        Ok(BlockSubscription::new(heights_rx, cancel_tx, done_rx))
    }

    async fn block_results(&self, height: u64) -> Result<Vec<TxResult>> {
        let at = Height::try_from(height).map_err(|e| eyre!("Invalid height {}: {}", height, e))?;
        let response = self
            .rpc
            .block_results(at)
            .await
            .wrap_err_with(|| format!("Failed to get block results at height {}", height))?;

        into_tx_results(response, height)
    }
}

fn new_block_height(data: &EventData) -> Option<u64> {
    match data {
        EventData::NewBlock {
            block: Some(block), ..
        }
        | EventData::LegacyNewBlock {
            block: Some(block), ..
        } => Some(block.header.height.value()),
        _ => None,
    }
}

fn into_tx_results(response: block_results::Response, height: u64) -> Result<Vec<TxResult>> {
    if response.height.value() != height {
        return Err(eyre!(
            "Node returned block results for height {} instead of {}",
            response.height,
            height
        ));
    }

    Ok(response
        .txs_results
        .unwrap_or_default()
        .iter()
        .map(|result| TxResult {
            code: result.code.value(),
            events: result.events.iter().map(raw_event).collect(),
        })
        .collect())
}

/// Attribute bytes are read lossily so a stray non-UTF-8 attribute cannot
/// hide the rest of the event
fn raw_event(event: &abci::Event) -> RawEvent {
    RawEvent {
        kind: event.kind.clone(),
        attributes: event
            .attributes
            .iter()
            .map(|attribute| Attribute {
                key: String::from_utf8_lossy(attribute.key_bytes()).into_owned(),
                value: String::from_utf8_lossy(attribute.value_bytes()).into_owned(),
            })
            .collect(),
    }
}
