//! Contract interfaces consumed by the client
//!
//! Only the external read/write surface is declared; the contracts themselves
//! are deployed and owned elsewhere.

use alloy_sol_types::{sol, Panic, Revert, SolError};

sol! {
    /// Binary-outcome prediction market with an oracle-backed resolution
    interface IPredictionMarket {
        function getMarketInfo() external view returns (
            string memory _question,
            uint256 _endTime,
            uint256 _totalCollateral,
            uint8 _result,
            bool _resolved,
            address _yesToken,
            address _noToken
        );
        function getUserBalances(address user) external view returns (uint256 yesBalance, uint256 noBalance);
        function getCurrentPrice() external view returns (uint256);
        function collateral() external view returns (address);

        function buy(bool yes, uint256 amount) external;
        function redeem(uint256 amount) external;
        function resolve() external;
        function resolveManually(uint256 result) external;
    }

    /// ERC20 subset used on the collateral and outcome tokens
    interface IERC20 {
        function balanceOf(address owner) external view returns (uint256);
        function totalSupply() external view returns (uint256);
        function decimals() external view returns (uint8);
        function allowance(address owner, address spender) external view returns (uint256);
        function approve(address spender, uint256 amount) external returns (bool);
    }
}

/// Decode `Error(string)` / `Panic(uint256)` revert data into a readable reason
pub fn decode_revert(data: &[u8]) -> Option<String> {
    if data.is_empty() {
        return None;
    }
    if let Ok(revert) = Revert::abi_decode(data) {
        return Some(revert.reason);
    }
    if let Ok(panic) = Panic::abi_decode(data) {
        return Some(format!("panic code {}", panic.code));
    }
    alloy_sol_types::decode_revert_reason(data)
}
