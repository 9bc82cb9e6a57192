//! Time-weighted staking rewards.
//!
//! Each owner has a single [`StakePosition`]. Instead of keeping one record
//! per deposit, the position carries a weighted timestamp: after a deposit of
//! `added` on top of `staked` at time `now`,
//!
//! ```text
//! weighted' = now - (now - weighted) * staked / (staked + added)
//! ```
//!
//! so `(staked + added) * (t - weighted')` equals
//! `staked * (t - weighted) + added * (t - now)` for every later `t`, which is
//! the sum of the linear accruals of both deposits. The subtracted term is
//! floored, which can only move the timestamp forward and never pays out
//! more than the per-deposit sum.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{
    bank::Bank,
    error::ExchangeError,
    math::{checked_add, narrow, wide, U256},
    AccountId, Amount, AssetId, Timestamp,
};

/// Fixed-point scale of `rewards_per_hour`: `10^18` means one reward unit per
/// principal unit per hour.
pub const RATE_SCALE: Amount = 1_000_000_000_000_000_000;

/// 0.0005 reward per staked unit per hour.
pub const DEFAULT_REWARDS_PER_HOUR: Amount = 500_000_000_000_000;

pub const SECONDS_PER_HOUR: u64 = 3_600;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct StakingConfig {
    pub principal: AssetId,
    pub reward: AssetId,
    #[serde(default = "default_rewards_per_hour")]
    pub rewards_per_hour: Amount,
}

fn default_rewards_per_hour() -> Amount {
    DEFAULT_REWARDS_PER_HOUR
}

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StakePosition {
    pub amount: Amount,
    pub weighted_timestamp: Timestamp,
    pub unclaimed_reward: Amount,
}

/// `amount * rate * elapsed / (3600 * RATE_SCALE)`, truncated.
pub fn accrued_reward(
    amount: Amount,
    rewards_per_hour: Amount,
    elapsed: u64,
) -> Result<Amount, ExchangeError> {
    if amount == 0 || elapsed == 0 {
        return Ok(0);
    }
    let numerator = wide(amount)
        .checked_mul(wide(rewards_per_hour))
        .and_then(|product| product.checked_mul(elapsed.into()))
        .ok_or(ExchangeError::Overflow("reward accrual"))?;
    let denominator = wide(RATE_SCALE) * U256::from(SECONDS_PER_HOUR);
    narrow(numerator / denominator, "reward accrual")
}

impl StakePosition {
    fn elapsed(&self, now: Timestamp) -> u64 {
        now.saturating_sub(self.weighted_timestamp)
    }

    /// Reward accrued since the weighted timestamp, not yet settled.
    pub fn pending_reward(
        &self,
        rewards_per_hour: Amount,
        now: Timestamp,
    ) -> Result<Amount, ExchangeError> {
        accrued_reward(self.amount, rewards_per_hour, self.elapsed(now))
    }

    fn with_deposit(&self, added: Amount, now: Timestamp) -> Result<Self, ExchangeError> {
        let amount = checked_add(self.amount, added, "staked amount")?;
        let carried = U256::from(self.elapsed(now)) * wide(self.amount) / wide(amount);
        // carried <= elapsed, so it fits and never underflows. A clock that
        // runs behind the position never moves the vintage backwards.
        let weighted_timestamp = now.max(self.weighted_timestamp) - carried.low_u64();
        Ok(Self {
            amount,
            weighted_timestamp,
            unclaimed_reward: self.unclaimed_reward,
        })
    }

    fn with_withdrawal(
        &self,
        removed: Amount,
        rewards_per_hour: Amount,
        now: Timestamp,
    ) -> Result<Self, ExchangeError> {
        let settled = accrued_reward(removed, rewards_per_hour, self.elapsed(now))?;
        Ok(Self {
            amount: self.amount - removed,
            weighted_timestamp: self.weighted_timestamp,
            unclaimed_reward: checked_add(self.unclaimed_reward, settled, "unclaimed reward")?,
        })
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct StakingSnapshot {
    pub id: String,
    pub address: AccountId,
    pub config: StakingConfig,
    pub total_staked: Amount,
    pub positions: BTreeMap<AccountId, StakePosition>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct StakingEngine {
    id: String,
    address: AccountId,
    config: StakingConfig,
    total_staked: Amount,
    positions: BTreeMap<AccountId, StakePosition>,
}

impl StakingEngine {
    pub fn new(id: impl Into<String>, config: StakingConfig) -> Self {
        let id = id.into();
        Self {
            address: format!("staking:{id}"),
            id,
            config,
            total_staked: 0,
            positions: BTreeMap::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Custody account for staked principal; must be an admin of the reward
    /// asset for `claim` to mint.
    pub fn address(&self) -> &AccountId {
        &self.address
    }

    pub fn config(&self) -> &StakingConfig {
        &self.config
    }

    pub fn rewards_per_hour(&self) -> Amount {
        self.config.rewards_per_hour
    }

    pub fn total_staked(&self) -> Amount {
        self.total_staked
    }

    pub fn position(&self, owner: &str) -> StakePosition {
        self.positions.get(owner).copied().unwrap_or_default()
    }

    pub fn total_stacked_by_owner(&self, owner: &str) -> Amount {
        self.position(owner).amount
    }

    /// What `claim` would mint if called at `now`.
    pub fn total_reward_amount(&self, owner: &str, now: Timestamp) -> Result<Amount, ExchangeError> {
        let position = self.position(owner);
        let pending = position.pending_reward(self.config.rewards_per_hour, now)?;
        checked_add(position.unclaimed_reward, pending, "reward amount")
    }

    /// Deposit `amount` of principal; the engine must hold an allowance from
    /// `caller`.
    pub fn stack(
        &mut self,
        bank: &mut Bank,
        caller: &str,
        amount: Amount,
        now: Timestamp,
    ) -> Result<(), ExchangeError> {
        if amount == 0 {
            return Err(ExchangeError::InvalidAmount("stack amount must be positive"));
        }
        let current = self.positions.get(caller).copied();
        let next = match current {
            Some(position) => position.with_deposit(amount, now)?,
            None => StakePosition {
                amount,
                weighted_timestamp: now,
                unclaimed_reward: 0,
            },
        };
        let total_staked = checked_add(self.total_staked, amount, "total staked")?;
        bank.transfer_from(
            &self.config.principal,
            &self.address,
            caller,
            &self.address,
            amount,
        )?;
        self.positions.insert(caller.to_string(), next);
        self.total_staked = total_staked;
        info!(
            engine = %self.id,
            caller,
            amount,
            weighted_timestamp = next.weighted_timestamp,
            "stake increased"
        );
        Ok(())
    }

    /// Withdraw `amount` of principal. Reward accrued by the withdrawn slice
    /// moves into `unclaimed_reward`; the rest keeps its vintage.
    pub fn unstack(
        &mut self,
        bank: &mut Bank,
        caller: &str,
        amount: Amount,
        now: Timestamp,
    ) -> Result<(), ExchangeError> {
        if amount == 0 {
            return Err(ExchangeError::InvalidAmount("unstack amount must be positive"));
        }
        let position = self.position(caller);
        if amount > position.amount {
            return Err(ExchangeError::InsufficientBalance {
                asset: self.config.principal.clone(),
                account: caller.to_string(),
                available: position.amount,
                required: amount,
            });
        }
        let next = position.with_withdrawal(amount, self.config.rewards_per_hour, now)?;
        bank.transfer(&self.config.principal, &self.address, caller, amount)?;
        self.positions.insert(caller.to_string(), next);
        self.total_staked -= amount;
        info!(
            engine = %self.id,
            caller,
            amount,
            unclaimed = next.unclaimed_reward,
            "stake decreased"
        );
        Ok(())
    }

    /// Mint everything owed to `caller` and restart accrual from `now`, or
    /// from the current vintage when `now` runs behind it. Returns the amount
    /// minted.
    pub fn claim(
        &mut self,
        bank: &mut Bank,
        caller: &str,
        now: Timestamp,
    ) -> Result<Amount, ExchangeError> {
        let Some(position) = self.positions.get(caller).copied() else {
            return Ok(0);
        };
        let reward = self.total_reward_amount(caller, now)?;
        if reward > 0 {
            bank.mint(&self.config.reward, &self.address, caller, reward)?;
        }
        self.positions.insert(
            caller.to_string(),
            StakePosition {
                amount: position.amount,
                weighted_timestamp: now.max(position.weighted_timestamp),
                unclaimed_reward: 0,
            },
        );
        info!(engine = %self.id, caller, reward, "rewards claimed");
        Ok(reward)
    }

    pub fn snapshot(&self) -> StakingSnapshot {
        StakingSnapshot {
            id: self.id.clone(),
            address: self.address.clone(),
            config: self.config.clone(),
            total_staked: self.total_staked,
            positions: self.positions.clone(),
        }
    }
}
