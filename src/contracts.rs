//! Interchain wallet contract ABI definition
//!
//! Uses alloy's sol! macro to generate type-safe bindings. The same ABI is
//! deployed on both chains; which calls are used depends on the direction.

#![allow(clippy::too_many_arguments)]

use alloy::sol;

sol! {
    /// Multisig wallet holding bridged funds on either chain
    contract InterchainWallet {
        /// Funds locked into the wallet, to be released on the other chain
        event Deposit(address indexed sender, address indexed receiver, uint256 value);

        /// A sealer attested a withdrawal for `txHash`
        event SignatureAdded(bytes32 txHash, address signer);

        /// Number of sealer confirmations needed to execute a transfer
        function requiredThreshold() external view returns (uint8);

        /// Mirror a deposit observed on the other chain (one vote per sealer)
        function recordTransfer(
            bytes32 txHash,
            address receiver,
            uint256 value,
            bytes data
        ) external;

        /// Store a sealer signature authorizing a release on the other chain
        function recordSignature(
            bytes32 txHash,
            address receiver,
            uint256 value,
            bytes data,
            uint8 v,
            bytes32 r,
            bytes32 s
        ) external;

        /// Read back the withdrawal and every signature collected for it
        function getAggregatedSignatures(bytes32 txHash) external view returns (
            address destination,
            uint256 value,
            bytes data,
            uint8[] v,
            bytes32[] r,
            bytes32[] s
        );

        /// Release funds once enough sealer signatures are presented
        function finalizeWithdrawal(
            bytes32 txHash,
            address destination,
            uint256 value,
            bytes data,
            uint8[] v,
            bytes32[] r,
            bytes32[] s
        ) external;
    }
}
