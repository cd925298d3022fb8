//! Solidity bindings for the contracts redemption talks to.

use alloy_primitives::{Address, address};
use alloy_sol_types::sol;

/// EntryPoint v0.7 address, identical on every supported chain.
pub const ENTRYPOINT_V07_ADDRESS: Address = address!("0000000071727De22E5E9d8BAf0edAc6f37da032");

sol! {
    /// A restriction attached to a delegation.
    #[derive(Debug, PartialEq, Eq)]
    struct Caveat {
        address enforcer;
        bytes terms;
        bytes args;
    }

    /// A signed delegation as the DelegationManager consumes it.
    #[derive(Debug, PartialEq, Eq)]
    struct Delegation {
        address delegate;
        address delegator;
        bytes32 authority;
        Caveat[] caveats;
        uint256 salt;
        bytes signature;
    }

    interface IERC20 {
        function transfer(address to, uint256 amount) external returns (bool);
    }

    interface IDelegationManager {
        function redeemDelegations(
            bytes[] calldata permissionContexts,
            bytes32[] calldata modes,
            bytes[] calldata executionCallDatas
        ) external;

        error AlreadyDisabled();
        error AlreadyEnabled();
        error BatchDataLengthMismatch();
        error CannotUseADisabledDelegation();
        error EmptySignature();
        error InvalidAuthority();
        error InvalidDelegate();
        error InvalidDelegator();
        error InvalidEOASignature();
        error InvalidERC1271Signature();
        error InvalidShortSignature();
    }

    /// ERC-7579 execution entry of the delegate smart account.
    interface IERC7579Account {
        function execute(bytes32 mode, bytes calldata executionCalldata) external payable;
    }

    interface IEntryPoint {
        function getNonce(address sender, uint192 key) external view returns (uint256 nonce);

        event UserOperationEvent(
            bytes32 indexed userOpHash,
            address indexed sender,
            address indexed paymaster,
            uint256 nonce,
            bool success,
            uint256 actualGasCost,
            uint256 actualGasUsed
        );

        event UserOperationRevertReason(
            bytes32 indexed userOpHash,
            address indexed sender,
            uint256 nonce,
            bytes revertReason
        );
    }
}
