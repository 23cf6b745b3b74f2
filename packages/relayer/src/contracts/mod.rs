//! Contract ABI definitions for the EVM side of the bridge

pub mod bridge_registry;
pub mod cosmos_bridge;

pub use bridge_registry::BridgeRegistry;
pub use cosmos_bridge::CosmosBridge;
