//! BridgeRegistry contract ABI definition
//!
//! The registry is the single configured address; every other bridge
//! contract is looked up through it.

use alloy::sol;

sol! {
    #[sol(rpc)]
    contract BridgeRegistry {
        function cosmosBridge() external view returns (address);
        function bridgeBank() external view returns (address);
        function oracle() external view returns (address);
        function valset() external view returns (address);
    }
}
