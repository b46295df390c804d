//! Custody contract ABI.

use alloy_sol_types::sol;

sol! {
    /// Emitted when a user deposits into custody. Only `user` is indexed;
    /// token and amount travel in the log data.
    #[derive(Debug, PartialEq, Eq)]
    event Deposited(address indexed user, address token, uint256 amount);

    /// Custody contract withdrawal entry point
    interface ICustody {
        function withdrawTokensWithSignature(
            address user,
            address token,
            uint256 amount,
            bytes signature
        ) external returns (bool);
    }
}

/// Deployments that also index the token. Same signature hash as
/// [`Deposited`], one more topic.
pub mod indexed {
    use alloy_sol_types::sol;

    sol! {
        #[derive(Debug, PartialEq, Eq)]
        event Deposited(address indexed user, address indexed token, uint256 amount);
    }
}
