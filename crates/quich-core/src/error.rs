use thiserror::Error;

use crate::{AccountId, Amount, AssetId};

/// Canonical error type exposed by the accounting core.
///
/// Every variant is terminal for the call that produced it: the operation
/// that returns an error has left no trace in the ledgers, pools or
/// staking positions.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExchangeError {
    /// Caller is not in the admin set of the asset.
    #[error("{caller} is not an admin of {asset}")]
    Unauthorized { asset: AssetId, caller: AccountId },

    /// Zero or otherwise malformed quantity.
    #[error("invalid amount: {0}")]
    InvalidAmount(&'static str),

    #[error("insufficient {asset} balance for {account}: have {available}, need {required}")]
    InsufficientBalance {
        asset: AssetId,
        account: AccountId,
        available: Amount,
        required: Amount,
    },

    #[error("insufficient {asset} allowance from {owner} to {spender}: have {available}, need {required}")]
    InsufficientAllowance {
        asset: AssetId,
        owner: AccountId,
        spender: AccountId,
        available: Amount,
        required: Amount,
    },

    /// Deposit does not match the pool's current reserve ratio.
    #[error("wrong ratio: {amount_a}:{amount_b} against reserves {reserve_a}:{reserve_b}")]
    WrongRatio {
        amount_a: Amount,
        amount_b: Amount,
        reserve_a: Amount,
        reserve_b: Amount,
    },

    /// Operation requires non-zero reserves or LP supply.
    #[error("pool {0} is empty")]
    EmptyPool(String),

    #[error("integer overflow in {0}")]
    Overflow(&'static str),

    #[error("unknown asset {0}")]
    UnknownAsset(AssetId),

    #[error("asset {0} already exists")]
    DuplicateAsset(AssetId),

    #[error("unknown pool {0}")]
    UnknownPool(String),

    #[error("pool {0} already exists")]
    DuplicatePool(String),

    #[error("unknown staking engine {0}")]
    UnknownStakingEngine(String),

    #[error("staking engine {0} already exists")]
    DuplicateStakingEngine(String),

    /// Pool assets must be three distinct ledgers (token A, token B, LP).
    #[error("invalid pool assets: {0}")]
    InvalidPoolAssets(String),
}
