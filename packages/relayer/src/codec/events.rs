//! Cosmos lock/burn event decoding
//!
//! The ethbridge module emits one `lock` or `burn` event per message with
//! string attributes:
//!
//! | key                      | value                              |
//! |--------------------------|------------------------------------|
//! | `cosmos_sender`          | bech32 account of the sender       |
//! | `cosmos_sender_sequence` | account sequence (decimal)         |
//! | `ethereum_receiver`      | 0x-prefixed EVM address            |
//! | `symbol`                 | denom; burns carry the `c` prefix  |
//! | `amount`                 | decimal integer amount             |

use alloy::primitives::{Address, U256};
use std::str::FromStr;
use thiserror::Error;

use crate::types::{CanonicalEvent, ClaimKind};

pub const ATTR_COSMOS_SENDER: &str = "cosmos_sender";
pub const ATTR_COSMOS_SENDER_SEQUENCE: &str = "cosmos_sender_sequence";
pub const ATTR_ETHEREUM_RECEIVER: &str = "ethereum_receiver";
pub const ATTR_SYMBOL: &str = "symbol";
pub const ATTR_AMOUNT: &str = "amount";

/// Prefix of pegged (bridged-in) denoms on the Cosmos side
pub const PEGGED_DENOM_PREFIX: &str = "c";

/// A single event attribute as returned by `block_results`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub key: String,
    pub value: String,
}

impl Attribute {
    pub fn new(key: &str, value: &str) -> Self {
        Self {
            key: key.to_string(),
            value: value.to_string(),
        }
    }
}

/// A typed ABCI event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEvent {
    pub kind: String,
    pub attributes: Vec<Attribute>,
}

/// Result of classifying an event by its type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventClass {
    Claim(ClaimKind),
    Unsupported,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EventDecodeError {
    #[error("missing attribute: {0}")]
    MissingAttribute(&'static str),

    #[error("invalid cosmos_sender_sequence: {0}")]
    InvalidSequence(String),

    #[error("invalid ethereum_receiver: {0}")]
    InvalidReceiver(String),

    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    #[error("can only relay burns of '{PEGGED_DENOM_PREFIX}' prefixed tokens, got {0}")]
    UnpeggedBurn(String),

    #[error("empty attribute: {0}")]
    Empty(&'static str),
}

/// Map an event type onto the claim it produces, if any
pub fn classify_event(event_type: &str) -> EventClass {
    match event_type {
        "lock" => EventClass::Claim(ClaimKind::Lock),
        "burn" => EventClass::Claim(ClaimKind::Burn),
        _ => EventClass::Unsupported,
    }
}

/// Decode the attributes of a lock/burn event
pub fn decode_claim_event(
    kind: ClaimKind,
    attributes: &[Attribute],
) -> Result<CanonicalEvent, EventDecodeError> {
    let cosmos_sender = extract_string(attributes, ATTR_COSMOS_SENDER)?;
    if cosmos_sender.is_empty() {
        return Err(EventDecodeError::Empty(ATTR_COSMOS_SENDER));
    }

    let sequence = extract_string(attributes, ATTR_COSMOS_SENDER_SEQUENCE)?;
    let cosmos_sender_sequence = sequence
        .parse::<u64>()
        .map_err(|_| EventDecodeError::InvalidSequence(sequence.to_string()))?;

    let receiver = extract_string(attributes, ATTR_ETHEREUM_RECEIVER)?;
    let ethereum_receiver = parse_receiver(receiver)?;

    let symbol = extract_string(attributes, ATTR_SYMBOL)?;
    let symbol = match kind {
        ClaimKind::Lock => symbol.to_string(),
        ClaimKind::Burn => symbol
            .strip_prefix(PEGGED_DENOM_PREFIX)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| EventDecodeError::UnpeggedBurn(symbol.to_string()))?
            .to_string(),
    };
    if symbol.is_empty() {
        return Err(EventDecodeError::Empty(ATTR_SYMBOL));
    }

    let amount = extract_string(attributes, ATTR_AMOUNT)?;
    if amount.is_empty() || !amount.bytes().all(|b| b.is_ascii_digit()) {
        return Err(EventDecodeError::InvalidAmount(amount.to_string()));
    }
    let amount = U256::from_str_radix(amount, 10)
        .map_err(|_| EventDecodeError::InvalidAmount(amount.to_string()))?;

    Ok(CanonicalEvent {
        kind,
        cosmos_sender: cosmos_sender.as_bytes().to_vec(),
        cosmos_sender_sequence,
        ethereum_receiver,
        symbol,
        amount,
    })
}

fn parse_receiver(value: &str) -> Result<Address, EventDecodeError> {
    let hex_part = value.strip_prefix("0x").unwrap_or(value);
    if hex_part.len() != 40 {
        return Err(EventDecodeError::InvalidReceiver(value.to_string()));
    }
    Address::from_str(value).map_err(|_| EventDecodeError::InvalidReceiver(value.to_string()))
}

/// Helper function to extract string attribute
fn extract_string<'a>(
    attrs: &'a [Attribute],
    key: &'static str,
) -> Result<&'a str, EventDecodeError> {
    attrs
        .iter()
        .find(|a| a.key == key)
        .map(|a| a.value.as_str())
        .ok_or(EventDecodeError::MissingAttribute(key))
}
