//! Pure decoding of Cosmos events and EVM claim payloads
//!
//! - [`events`] classifies Tendermint events and decodes lock/burn attributes
//! - [`claim`] encodes `newProphecyClaim` calldata and recovers claim identities
//!   from previously sent payloads

pub mod claim;
pub mod events;

pub use claim::{decode_claim_identity, encode_prophecy_claim, is_prophecy_claim, ClaimDecodeError};
pub use events::{
    classify_event, decode_claim_event, Attribute, EventClass, EventDecodeError, RawEvent,
};
