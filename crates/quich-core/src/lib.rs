//! Accounting core for the Quichswap exchange.
//!
//! The crate is a set of pure state machines; triggering and persisting
//! transitions is left to the host:
//!
//! * [`ledger`]: one fungible asset with balances, allowances, admin-gated
//!   minting and a SHA-256 state root.
//! * [`bank`]: every ledger of an exchange, with all-or-nothing batches of
//!   balance mutations across assets.
//! * [`pool`]: a two-asset liquidity pool minting and burning LP tokens in
//!   proportion to the reserves.
//! * [`staking`]: time-weighted reward accrual with one record per staker.
//! * [`exchange`] / [`command`]: the owned state of one exchange and the
//!   serializable operations a transport layer feeds into it.
//!
//! Amounts are `u128` smallest units; time is host-supplied `u64` seconds.

pub mod bank;
pub mod command;
pub mod exchange;
pub mod ledger;
pub mod math;
pub mod pool;
pub mod staking;

mod error;

pub use command::{Command, Outcome};
pub use error::ExchangeError;
pub use exchange::{Exchange, ExchangeSnapshot, SharedExchange};

/// Opaque owner identity (address-equivalent).
pub type AccountId = String;
/// Asset symbol, unique within a [`bank::Bank`].
pub type AssetId = String;
pub type Amount = u128;
pub type Timestamp = u64;
