//! Prophecy claim calldata
//!
//! Encoding goes through the typed `newProphecyClaim` binding. Decoding reads
//! the claim identity back out of calldata at fixed offsets, which is all the
//! scanner needs and avoids a full ABI decode of every relayer transaction.
//!
//! Payload layout after the 4-byte selector (32-byte words):
//!
//! ```text
//! [  0.. 32]  uint8   claimType
//! [ 32.. 64]  offset  cosmosSender (always 0xc0)
//! [ 64.. 96]  uint256 cosmosSenderSequence
//! [ 96..128]  address ethereumReceiver
//! [128..160]  offset  symbol
//! [160..192]  uint256 amount
//! [192..224]  length  cosmosSender
//! [224..   ]  bytes   cosmosSender
//! ```

use alloy::primitives::{Bytes, U256};
use alloy::sol_types::SolCall;
use thiserror::Error;

use crate::contracts::CosmosBridge;
use crate::types::{CanonicalEvent, ClaimIdentity};

pub const SELECTOR_LEN: usize = 4;
pub const SEQUENCE_OFFSET: usize = 64;
pub const SENDER_LENGTH_OFFSET: usize = 192;
pub const SENDER_DATA_OFFSET: usize = 224;
const WORD: usize = 32;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ClaimDecodeError {
    #[error("calldata too short: {0} bytes")]
    TooShort(usize),

    #[error("not a newProphecyClaim call (selector 0x{0})")]
    WrongSelector(String),

    #[error("cosmos sender sequence does not fit in u64")]
    SequenceOverflow,

    #[error("cosmos sender length {length} exceeds payload of {available} bytes")]
    SenderOutOfBounds { length: U256, available: usize },
}

/// Selector of `newProphecyClaim`
pub fn prophecy_claim_selector() -> [u8; 4] {
    CosmosBridge::newProphecyClaimCall::SELECTOR
}

/// Build the calldata for a prophecy claim on the CosmosBridge
pub fn encode_prophecy_claim(event: &CanonicalEvent) -> Bytes {
    let call = CosmosBridge::newProphecyClaimCall {
        _claimType: event.kind.contract_value(),
        _cosmosSender: Bytes::copy_from_slice(&event.cosmos_sender),
        _cosmosSenderSequence: U256::from(event.cosmos_sender_sequence),
        _ethereumReceiver: event.ethereum_receiver,
        _symbol: event.symbol.clone(),
        _amount: event.amount,
    };
    Bytes::from(call.abi_encode())
}

/// True when the calldata starts with the `newProphecyClaim` selector
pub fn is_prophecy_claim(input: &[u8]) -> bool {
    input.len() >= SELECTOR_LEN && input[..SELECTOR_LEN] == prophecy_claim_selector()
}

/// Recover the claim identity from `newProphecyClaim` calldata
pub fn decode_claim_identity(input: &[u8]) -> Result<ClaimIdentity, ClaimDecodeError> {
    if input.len() < SELECTOR_LEN {
        return Err(ClaimDecodeError::TooShort(input.len()));
    }
    if !is_prophecy_claim(input) {
        return Err(ClaimDecodeError::WrongSelector(hex::encode(&input[..SELECTOR_LEN])));
    }

    let payload = &input[SELECTOR_LEN..];
    if payload.len() < SENDER_DATA_OFFSET {
        return Err(ClaimDecodeError::TooShort(input.len()));
    }

    let sequence = U256::from_be_slice(&payload[SEQUENCE_OFFSET..SEQUENCE_OFFSET + WORD]);
    let cosmos_sender_sequence =
        u64::try_from(sequence).map_err(|_| ClaimDecodeError::SequenceOverflow)?;

    let length = U256::from_be_slice(&payload[SENDER_LENGTH_OFFSET..SENDER_LENGTH_OFFSET + WORD]);
    let available = payload.len() - SENDER_DATA_OFFSET;
    let sender_len = usize::try_from(length)
        .ok()
        .filter(|len| *len <= available)
        .ok_or(ClaimDecodeError::SenderOutOfBounds { length, available })?;

    let cosmos_sender = payload[SENDER_DATA_OFFSET..SENDER_DATA_OFFSET + sender_len].to_vec();

    Ok(ClaimIdentity::new(cosmos_sender, cosmos_sender_sequence))
}
