//! Core relay types
//!
//! A witnessed Cosmos lock/burn event becomes a [`CanonicalEvent`]; its
//! [`ClaimIdentity`] is the natural de-duplication key for claims on the
//! EVM side.

use alloy::primitives::{Address, U256};
use std::fmt;

/// Cosmos event types that produce a prophecy claim
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClaimKind {
    Burn,
    Lock,
}

impl ClaimKind {
    /// Value of the `ClaimType` enum in the CosmosBridge contract
    pub fn contract_value(&self) -> u8 {
        match self {
            ClaimKind::Burn => 1,
            ClaimKind::Lock => 2,
        }
    }

    /// Inverse of [`ClaimKind::contract_value`]; `0` is the contract's unsupported type
    pub fn from_contract_value(value: u8) -> Option<Self> {
        match value {
            1 => Some(ClaimKind::Burn),
            2 => Some(ClaimKind::Lock),
            _ => None,
        }
    }

    /// Cosmos event type string
    pub fn as_str(&self) -> &'static str {
        match self {
            ClaimKind::Burn => "burn",
            ClaimKind::Lock => "lock",
        }
    }
}

impl fmt::Display for ClaimKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Kinds of message the relayer can send to the EVM side
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayKind {
    /// A new prophecy claim for a witnessed lock or burn
    ProphecyClaim(ClaimKind),
    /// A validator's oracle claim on an existing prophecy
    OracleClaim,
}

/// Logical contract names held by the on-chain BridgeRegistry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BridgeContract {
    CosmosBridge,
    Oracle,
}

impl BridgeContract {
    pub fn as_str(&self) -> &'static str {
        match self {
            BridgeContract::CosmosBridge => "cosmos_bridge",
            BridgeContract::Oracle => "oracle",
        }
    }
}

impl fmt::Display for BridgeContract {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl From<RelayKind> for BridgeContract {
    fn from(kind: RelayKind) -> Self {
        match kind {
            // Prophecy claims are sent to the CosmosBridge contract
            RelayKind::ProphecyClaim(_) => BridgeContract::CosmosBridge,
            // Oracle claims are sent to the Oracle contract
            RelayKind::OracleClaim => BridgeContract::Oracle,
        }
    }
}

/// A decoded lock/burn event witnessed on the Cosmos chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalEvent {
    pub kind: ClaimKind,
    /// Bech32 account of the Cosmos sender, as raw bytes
    pub cosmos_sender: Vec<u8>,
    /// Account sequence of the sender when the message was signed
    pub cosmos_sender_sequence: u64,
    pub ethereum_receiver: Address,
    pub symbol: String,
    pub amount: U256,
}

impl CanonicalEvent {
    pub fn identity(&self) -> ClaimIdentity {
        ClaimIdentity::new(self.cosmos_sender.clone(), self.cosmos_sender_sequence)
    }

    pub fn relay_kind(&self) -> RelayKind {
        RelayKind::ProphecyClaim(self.kind)
    }
}

impl fmt::Display for CanonicalEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} from {} (seq {}) to {}",
            self.kind,
            self.amount,
            self.symbol,
            String::from_utf8_lossy(&self.cosmos_sender),
            self.cosmos_sender_sequence,
            self.ethereum_receiver
        )
    }
}

/// De-duplication key of a prophecy claim
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClaimIdentity {
    pub cosmos_sender: Vec<u8>,
    pub cosmos_sender_sequence: u64,
}

impl ClaimIdentity {
    pub fn new(cosmos_sender: impl Into<Vec<u8>>, cosmos_sender_sequence: u64) -> Self {
        Self {
            cosmos_sender: cosmos_sender.into(),
            cosmos_sender_sequence,
        }
    }
}

impl fmt::Display for ClaimIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}#{}",
            String::from_utf8_lossy(&self.cosmos_sender),
            self.cosmos_sender_sequence
        )
    }
}
