//! Two-asset liquidity pool issuing LP tokens.
//!
//! Reserves are not stored: they are the pool address's balances in the two
//! underlying ledgers. LP supply is the total supply of the LP ledger.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{
    bank::Bank,
    error::ExchangeError,
    ledger::LedgerMutation,
    math::{mul_div, narrow, sqrt_product, wide},
    AccountId, Amount, AssetId,
};

/// Fixed-point scale of ratio queries: `10^18` means 1.0.
pub const RATIO_SCALE: Amount = 1_000_000_000_000_000_000;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct PoolConfig {
    pub token_a: AssetId,
    pub token_b: AssetId,
    pub lp_token: AssetId,
}

impl PoolConfig {
    pub fn validate(&self) -> Result<(), ExchangeError> {
        if self.token_a == self.token_b
            || self.token_a == self.lp_token
            || self.token_b == self.lp_token
        {
            return Err(ExchangeError::InvalidPoolAssets(format!(
                "{}/{} with LP {} must be distinct",
                self.token_a, self.token_b, self.lp_token
            )));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct PoolSnapshot {
    pub id: String,
    pub address: AccountId,
    pub config: PoolConfig,
    pub reserve_a: Amount,
    pub reserve_b: Amount,
    pub lp_supply: Amount,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct LiquidityPool {
    id: String,
    address: AccountId,
    config: PoolConfig,
}

impl LiquidityPool {
    pub fn new(id: impl Into<String>, config: PoolConfig) -> Result<Self, ExchangeError> {
        config.validate()?;
        let id = id.into();
        Ok(Self {
            address: format!("pool:{id}"),
            id,
            config,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Account holding the reserves; must be an admin of the LP asset.
    pub fn address(&self) -> &AccountId {
        &self.address
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn reserves(&self, bank: &Bank) -> Result<(Amount, Amount), ExchangeError> {
        Ok((
            bank.balance_of(&self.config.token_a, &self.address)?,
            bank.balance_of(&self.config.token_b, &self.address)?,
        ))
    }

    pub fn lp_supply(&self, bank: &Bank) -> Result<Amount, ExchangeError> {
        bank.total_supply(&self.config.lp_token)
    }

    fn empty(&self) -> ExchangeError {
        ExchangeError::EmptyPool(self.id.clone())
    }

    fn share_of_reserves(
        &self,
        reserve: Amount,
        reserve_a: Amount,
        reserve_b: Amount,
    ) -> Result<Amount, ExchangeError> {
        if reserve_a == 0 && reserve_b == 0 {
            return Err(self.empty());
        }
        let total = wide(reserve_a) + wide(reserve_b);
        narrow(wide(reserve) * wide(RATIO_SCALE) / total, "pool ratio")
    }

    /// Share of token A in the reserves, scaled by [`RATIO_SCALE`].
    pub fn token1_ratio(&self, bank: &Bank) -> Result<Amount, ExchangeError> {
        let (reserve_a, reserve_b) = self.reserves(bank)?;
        self.share_of_reserves(reserve_a, reserve_a, reserve_b)
    }

    /// Share of token B in the reserves, scaled by [`RATIO_SCALE`].
    pub fn token2_ratio(&self, bank: &Bank) -> Result<Amount, ExchangeError> {
        let (reserve_a, reserve_b) = self.reserves(bank)?;
        self.share_of_reserves(reserve_b, reserve_a, reserve_b)
    }

    /// Amount of token B matching `amount_a` at the current ratio.
    pub fn amount_of_token2(&self, bank: &Bank, amount_a: Amount) -> Result<Amount, ExchangeError> {
        let (reserve_a, reserve_b) = self.reserves(bank)?;
        if reserve_a == 0 {
            return Err(self.empty());
        }
        mul_div(amount_a, reserve_b, reserve_a, "token amount conversion")
    }

    /// Amount of token A matching `amount_b` at the current ratio.
    pub fn amount_of_token1(&self, bank: &Bank, amount_b: Amount) -> Result<Amount, ExchangeError> {
        let (reserve_a, reserve_b) = self.reserves(bank)?;
        if reserve_b == 0 {
            return Err(self.empty());
        }
        mul_div(amount_b, reserve_a, reserve_b, "token amount conversion")
    }

    /// Reserves redeemable for `lp_amount` LP tokens.
    pub fn lp_token_composition(
        &self,
        bank: &Bank,
        lp_amount: Amount,
    ) -> Result<(Amount, Amount), ExchangeError> {
        let supply = self.lp_supply(bank)?;
        if supply == 0 {
            return Err(self.empty());
        }
        let (reserve_a, reserve_b) = self.reserves(bank)?;
        Ok((
            mul_div(reserve_a, lp_amount, supply, "lp composition")?,
            mul_div(reserve_b, lp_amount, supply, "lp composition")?,
        ))
    }

    /// LP tokens a deposit of `(amount_a, amount_b)` would mint right now.
    ///
    /// * empty pool: `isqrt(amount_a * amount_b)`;
    /// * reserves without LP supply: value-weighted
    ///   `(amount_a * reserve_a + amount_b * reserve_b) / (reserve_a + reserve_b)`;
    /// * otherwise: `lp_supply * amount_a / reserve_a`.
    pub fn quote_add_liquidity(
        &self,
        bank: &Bank,
        amount_a: Amount,
        amount_b: Amount,
    ) -> Result<Amount, ExchangeError> {
        if amount_a == 0 || amount_b == 0 {
            return Err(ExchangeError::InvalidAmount(
                "liquidity deposit needs both assets",
            ));
        }
        let (reserve_a, reserve_b) = self.reserves(bank)?;
        let supply = self.lp_supply(bank)?;

        let minted = if reserve_a == 0 && reserve_b == 0 {
            if supply != 0 {
                return Err(self.empty());
            }
            sqrt_product(amount_a, amount_b)
        } else {
            if wide(amount_a) * wide(reserve_b) != wide(amount_b) * wide(reserve_a) {
                return Err(ExchangeError::WrongRatio {
                    amount_a,
                    amount_b,
                    reserve_a,
                    reserve_b,
                });
            }
            if supply == 0 {
                let value = wide(amount_a) * wide(reserve_a) + wide(amount_b) * wide(reserve_b);
                narrow(value / (wide(reserve_a) + wide(reserve_b)), "lp issuance")?
            } else {
                mul_div(supply, amount_a, reserve_a, "lp issuance")?
            }
        };
        if minted == 0 {
            return Err(ExchangeError::InvalidAmount("deposit too small to mint LP"));
        }
        Ok(minted)
    }

    /// Pull both assets from `caller` (the pool must hold allowances on both)
    /// and mint LP tokens to them. Returns the LP amount minted.
    pub fn add_liquidity(
        &self,
        bank: &mut Bank,
        caller: &str,
        amount_a: Amount,
        amount_b: Amount,
    ) -> Result<Amount, ExchangeError> {
        let minted = self.quote_add_liquidity(bank, amount_a, amount_b)?;
        bank.apply(&[
            LedgerMutation::TransferFrom {
                asset: self.config.token_a.clone(),
                spender: self.address.clone(),
                from: caller.to_string(),
                to: self.address.clone(),
                amount: amount_a,
            },
            LedgerMutation::TransferFrom {
                asset: self.config.token_b.clone(),
                spender: self.address.clone(),
                from: caller.to_string(),
                to: self.address.clone(),
                amount: amount_b,
            },
            LedgerMutation::Mint {
                asset: self.config.lp_token.clone(),
                minter: self.address.clone(),
                to: caller.to_string(),
                amount: minted,
            },
        ])?;
        info!(pool = %self.id, caller, amount_a, amount_b, minted, "liquidity added");
        Ok(minted)
    }

    /// Burn `lp_amount` LP tokens from `caller` and pay out the proportional
    /// reserves. Truncation dust stays in the pool.
    pub fn remove_liquidity(
        &self,
        bank: &mut Bank,
        caller: &str,
        lp_amount: Amount,
    ) -> Result<(Amount, Amount), ExchangeError> {
        if lp_amount == 0 {
            return Err(ExchangeError::InvalidAmount("lp amount must be positive"));
        }
        let (return_a, return_b) = self.lp_token_composition(bank, lp_amount)?;
        bank.apply(&[
            LedgerMutation::Burn {
                asset: self.config.lp_token.clone(),
                burner: self.address.clone(),
                from: caller.to_string(),
                amount: lp_amount,
            },
            LedgerMutation::Transfer {
                asset: self.config.token_a.clone(),
                from: self.address.clone(),
                to: caller.to_string(),
                amount: return_a,
            },
            LedgerMutation::Transfer {
                asset: self.config.token_b.clone(),
                from: self.address.clone(),
                to: caller.to_string(),
                amount: return_b,
            },
        ])?;
        info!(pool = %self.id, caller, lp_amount, return_a, return_b, "liquidity removed");
        Ok((return_a, return_b))
    }

    pub fn snapshot(&self, bank: &Bank) -> Result<PoolSnapshot, ExchangeError> {
        let (reserve_a, reserve_b) = self.reserves(bank)?;
        Ok(PoolSnapshot {
            id: self.id.clone(),
            address: self.address.clone(),
            config: self.config.clone(),
            reserve_a,
            reserve_b,
            lp_supply: self.lp_supply(bank)?,
        })
    }
}
