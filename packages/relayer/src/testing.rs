//! In-memory ledgers for tests
//!
//! `MockDestination` mines every accepted claim into its own block so the
//! scanner can find it again; `MockSource` serves scripted block results and
//! new-block subscriptions.

use alloy::primitives::{Address, Bytes, B256, U256};
use async_trait::async_trait;
use eyre::{eyre, Result};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot};

use crate::codec::Attribute;
use crate::codec::RawEvent;
use crate::destination::{
    BroadcastError, ClaimReceipt, ClaimTransaction, DestinationLedger, ObservedTransaction,
};
use crate::source::{BlockSubscription, SourceLedger, TxResult};
use crate::types::{BridgeContract, CanonicalEvent, ClaimKind};

pub const TEST_SENDER: &str = "sif1syavy2npfyt9tcncdtsdzf7kny9lh777yqc2nd";
pub const TEST_RECEIVER: Address = Address::repeat_byte(0xab);

/// `{Lock, TEST_SENDER, sequence, TEST_RECEIVER, "X", 1000}`
pub fn lock_event(sequence: u64) -> CanonicalEvent {
    CanonicalEvent {
        kind: ClaimKind::Lock,
        cosmos_sender: TEST_SENDER.as_bytes().to_vec(),
        cosmos_sender_sequence: sequence,
        ethereum_receiver: TEST_RECEIVER,
        symbol: "X".to_string(),
        amount: U256::from(1000u64),
    }
}

/// Raw `lock` event matching [`lock_event`]
pub fn raw_lock_event(sequence: u64) -> RawEvent {
    RawEvent {
        kind: "lock".to_string(),
        attributes: vec![
            Attribute::new("cosmos_sender", TEST_SENDER),
            Attribute::new("cosmos_sender_sequence", &sequence.to_string()),
            Attribute::new("ethereum_receiver", &TEST_RECEIVER.to_string()),
            Attribute::new("symbol", "X"),
            Attribute::new("amount", "1000"),
        ],
    }
}

/// Raw `burn` event of the pegged `c<symbol>` denom
pub fn raw_burn_event(sequence: u64, symbol: &str) -> RawEvent {
    RawEvent {
        kind: "burn".to_string(),
        attributes: vec![
            Attribute::new("cosmos_sender", TEST_SENDER),
            Attribute::new("cosmos_sender_sequence", &sequence.to_string()),
            Attribute::new("ethereum_receiver", &TEST_RECEIVER.to_string()),
            Attribute::new("symbol", symbol),
            Attribute::new("amount", "1000"),
        ],
    }
}

/// An event the relayer does not care about
pub fn raw_transfer_event() -> RawEvent {
    RawEvent {
        kind: "transfer".to_string(),
        attributes: vec![
            Attribute::new("recipient", TEST_SENDER),
            Attribute::new("amount", "5rowan"),
        ],
    }
}

pub fn tx_result(events: Vec<RawEvent>) -> TxResult {
    TxResult { code: 0, events }
}

#[derive(Default)]
struct DestinationState {
    pending_nonce: u64,
    pending_nonce_queries: usize,
    gas_price: u128,
    registry_down: bool,
    broadcast_failures: VecDeque<BroadcastError>,
    broadcast_attempts: usize,
    withhold_receipts: bool,
    revert_receipts: bool,
    sent: Vec<ClaimTransaction>,
    receipts: HashMap<B256, ClaimReceipt>,
    blocks: BTreeMap<u64, Vec<ObservedTransaction>>,
    failing_blocks: HashSet<u64>,
    head: u64,
}

/// In-memory EVM ledger
pub struct MockDestination {
    relayer: Address,
    state: Mutex<DestinationState>,
}

impl Default for MockDestination {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDestination {
    pub const COSMOS_BRIDGE: Address = Address::repeat_byte(0xcb);
    pub const ORACLE: Address = Address::repeat_byte(0x0c);
    pub const RELAYER: Address = Address::repeat_byte(0x11);

    pub fn new() -> Self {
        Self {
            relayer: Self::RELAYER,
            state: Mutex::new(DestinationState {
                gas_price: 1_000_000_000,
                ..Default::default()
            }),
        }
    }

    pub fn with_pending_nonce(self, nonce: u64) -> Self {
        self.set_pending_nonce(nonce);
        self
    }

    pub fn with_gas_price(self, gas_price: u128) -> Self {
        self.lock().gas_price = gas_price;
        self
    }

    pub fn set_pending_nonce(&self, nonce: u64) {
        self.lock().pending_nonce = nonce;
    }

    /// Fail the next `count` broadcasts with `error`
    pub fn fail_broadcasts(&self, error: BroadcastError, count: usize) {
        let mut state = self.lock();
        for _ in 0..count {
            state.broadcast_failures.push_back(error.clone());
        }
    }

    pub fn fail_registry(&self) {
        self.lock().registry_down = true;
    }

    pub fn withhold_receipts(&self) {
        self.lock().withhold_receipts = true;
    }

    pub fn revert_receipts(&self) {
        self.lock().revert_receipts = true;
    }

    pub fn fail_block(&self, height: u64) {
        self.lock().failing_blocks.insert(height);
    }

    /// Add a transaction from someone else to block `height`
    pub fn push_transaction(&self, height: u64, tx: ObservedTransaction) {
        let mut state = self.lock();
        state.blocks.entry(height).or_default().push(tx);
        state.head = state.head.max(height);
    }

    /// Claim transactions accepted so far
    pub fn sent(&self) -> Vec<ClaimTransaction> {
        self.lock().sent.clone()
    }

    pub fn broadcast_attempts(&self) -> usize {
        self.lock().broadcast_attempts
    }

    pub fn pending_nonce_queries(&self) -> usize {
        self.lock().pending_nonce_queries
    }

    /// Highest block containing a transaction
    pub fn head(&self) -> u64 {
        self.lock().head
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, DestinationState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl DestinationLedger for MockDestination {
    fn relayer_address(&self) -> Address {
        self.relayer
    }

    async fn resolve_contract(&self, contract: BridgeContract) -> Result<Address> {
        if self.lock().registry_down {
            return Err(eyre!("registry unreachable"));
        }
        Ok(match contract {
            BridgeContract::CosmosBridge => Self::COSMOS_BRIDGE,
            BridgeContract::Oracle => Self::ORACLE,
        })
    }

    async fn pending_nonce(&self, _address: Address) -> Result<u64> {
        let mut state = self.lock();
        state.pending_nonce_queries += 1;
        Ok(state.pending_nonce)
    }

    async fn suggested_gas_price(&self) -> Result<u128> {
        Ok(self.lock().gas_price)
    }

    async fn send_claim(&self, tx: &ClaimTransaction) -> Result<B256, BroadcastError> {
        let mut state = self.lock();
        state.broadcast_attempts += 1;
        if let Some(error) = state.broadcast_failures.pop_front() {
            return Err(error);
        }

        state.sent.push(tx.clone());
        state.head += 1;
        let height = state.head;
        let hash = B256::from(U256::from(state.sent.len()));

        state.blocks.entry(height).or_default().push(ObservedTransaction {
            hash,
            sender: Some(self.relayer),
            to: Some(tx.to),
            input: tx.input.clone(),
        });
        let status = !state.revert_receipts;
        state.receipts.insert(
            hash,
            ClaimReceipt {
                tx_hash: hash,
                block_number: Some(height),
                status,
            },
        );

        Ok(hash)
    }

    async fn transaction_receipt(&self, hash: B256) -> Result<Option<ClaimReceipt>> {
        let state = self.lock();
        if state.withhold_receipts {
            return Ok(None);
        }
        Ok(state.receipts.get(&hash).copied())
    }

    async fn block_transactions(&self, height: u64) -> Result<Vec<ObservedTransaction>> {
        let state = self.lock();
        if state.failing_blocks.contains(&height) {
            return Err(eyre!("block {} unavailable", height));
        }
        Ok(state.blocks.get(&height).cloned().unwrap_or_default())
    }
}

/// A transaction sent by someone other than the relayer
pub fn foreign_transaction(sender: Address, input: Bytes) -> ObservedTransaction {
    ObservedTransaction {
        hash: B256::repeat_byte(0xee),
        sender: Some(sender),
        to: Some(MockDestination::COSMOS_BRIDGE),
        input,
    }
}

struct ScriptedSubscription {
    items: Vec<std::result::Result<u64, String>>,
    keep_open: bool,
}

#[derive(Default)]
struct SourceState {
    blocks: HashMap<u64, Vec<TxResult>>,
    failing_blocks: HashSet<u64>,
    panic_blocks: HashSet<u64>,
    fetched: Vec<u64>,
    subscriptions: VecDeque<ScriptedSubscription>,
    open: Vec<mpsc::Sender<Result<u64>>>,
    subscribe_attempts: usize,
    stall_subscriptions: bool,
}

/// In-memory Cosmos ledger with scripted subscriptions
#[derive(Default)]
pub struct MockSource {
    state: Mutex<SourceState>,
    unsubscribed: Arc<AtomicUsize>,
}

impl MockSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_block(self, height: u64, results: Vec<TxResult>) -> Self {
        self.lock().blocks.insert(height, results);
        self
    }

    pub fn fail_block(&self, height: u64) {
        self.lock().failing_blocks.insert(height);
    }

    /// Panic when block `height` is requested
    pub fn panic_on_block(&self, height: u64) {
        self.lock().panic_blocks.insert(height);
    }

    pub fn heal_block(&self, height: u64) {
        self.lock().failing_blocks.remove(&height);
    }

    /// Make every subscribe call hang, like a node that accepts the socket but never answers
    pub fn stall_subscriptions(&self) {
        self.lock().stall_subscriptions = true;
    }

    /// Queue a subscription that yields `items`, then stays open or closes
    pub fn push_subscription(
        &self,
        items: Vec<std::result::Result<u64, String>>,
        keep_open: bool,
    ) {
        self.lock()
            .subscriptions
            .push_back(ScriptedSubscription { items, keep_open });
    }

    /// Heights whose block results were requested, in order
    pub fn fetched(&self) -> Vec<u64> {
        self.lock().fetched.clone()
    }

    pub fn subscribe_attempts(&self) -> usize {
        self.lock().subscribe_attempts
    }

    pub fn unsubscribed(&self) -> usize {
        self.unsubscribed.load(Ordering::SeqCst)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SourceState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl SourceLedger for MockSource {
    async fn subscribe_new_blocks(&self) -> Result<BlockSubscription> {
        let stalled = {
            let mut state = self.lock();
            state.subscribe_attempts += 1;
            state.stall_subscriptions
        };
        if stalled {
            return std::future::pending().await;
        }

        let mut state = self.lock();
        let script = state
            .subscriptions
            .pop_front()
            .ok_or_else(|| eyre!("connection refused"))?;

        let (tx, rx) = mpsc::channel(script.items.len().max(1));
        for item in script.items {
            let item = item.map_err(|e| eyre!(e));
            tx.try_send(item)
                .map_err(|_| eyre!("subscription buffer full"))?;
        }
        if script.keep_open {
            state.open.push(tx);
        }

        let (cancel_tx, cancel_rx) = oneshot::channel::<()>();
        let (done_tx, done_rx) = oneshot::channel();
        let unsubscribed = self.unsubscribed.clone();
        tokio::spawn(async move {
            let _ = cancel_rx.await;
            unsubscribed.fetch_add(1, Ordering::SeqCst);
            let _ = done_tx.send(());
        });

        Ok(BlockSubscription::new(rx, cancel_tx, done_rx))
    }

    async fn block_results(&self, height: u64) -> Result<Vec<TxResult>> {
        let mut state = self.lock();
        state.fetched.push(height);
        if state.panic_blocks.contains(&height) {
            drop(state);
            panic!("block results for {} exploded", height);
        }
        if state.failing_blocks.contains(&height) {
            return Err(eyre!("block results for {} unavailable", height));
        }
        Ok(state.blocks.get(&height).cloned().unwrap_or_default())
    }
}
