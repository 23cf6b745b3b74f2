//! CosmosBridge contract ABI definition
//!
//! Uses alloy's sol! macro to generate type-safe bindings for the bridge entry point.

use alloy::sol;

sol! {
    /// CosmosBridge contract interface for prophecy claims
    #[sol(rpc)]
    contract CosmosBridge {
        /// Create a new prophecy claim for a lock or burn witnessed on Cosmos
        ///
        /// # Arguments
        /// * `_claimType` - 1 for burn, 2 for lock
        /// * `_cosmosSender` - Bech32 account of the Cosmos sender
        /// * `_cosmosSenderSequence` - Account sequence of the sender
        /// * `_ethereumReceiver` - Recipient address on this chain
        /// * `_symbol` - Token symbol as known to the BridgeBank
        /// * `_amount` - Amount in the token's base units
        function newProphecyClaim(
            uint8 _claimType,
            bytes _cosmosSender,
            uint256 _cosmosSenderSequence,
            address _ethereumReceiver,
            string _symbol,
            uint256 _amount
        ) external;

        event LogNewProphecyClaim(
            uint256 _prophecyID,
            uint8 _claimType,
            bytes _cosmosSender,
            address _ethereumReceiver,
            address _validatorAddress,
            address _tokenAddress,
            string _symbol,
            uint256 _amount
        );
    }
}
