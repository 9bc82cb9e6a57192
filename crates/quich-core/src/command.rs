//! Serializable operations accepted from an outer transport, and their
//! results.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{
    error::ExchangeError,
    exchange::Exchange,
    pool::{PoolConfig, RATIO_SCALE},
    staking::{StakingConfig, DEFAULT_REWARDS_PER_HOUR},
    AccountId, Amount, AssetId, Timestamp,
};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    CreateAsset {
        asset: AssetId,
        deployer: AccountId,
    },
    Mint {
        asset: AssetId,
        caller: AccountId,
        to: AccountId,
        amount: Amount,
    },
    Burn {
        asset: AssetId,
        caller: AccountId,
        from: AccountId,
        amount: Amount,
    },
    Transfer {
        asset: AssetId,
        from: AccountId,
        to: AccountId,
        amount: Amount,
    },
    Approve {
        asset: AssetId,
        owner: AccountId,
        spender: AccountId,
        amount: Amount,
    },
    TransferFrom {
        asset: AssetId,
        spender: AccountId,
        from: AccountId,
        to: AccountId,
        amount: Amount,
    },
    AddAdmin {
        asset: AssetId,
        caller: AccountId,
        who: AccountId,
    },
    RemoveAdmin {
        asset: AssetId,
        caller: AccountId,
        who: AccountId,
    },
    BalanceOf {
        asset: AssetId,
        owner: AccountId,
    },
    AllowanceOf {
        asset: AssetId,
        owner: AccountId,
        spender: AccountId,
    },
    TotalSupply {
        asset: AssetId,
    },
    CreatePool {
        pool: String,
        token_a: AssetId,
        token_b: AssetId,
        lp_token: AssetId,
        deployer: AccountId,
    },
    AddLiquidity {
        pool: String,
        caller: AccountId,
        amount_a: Amount,
        amount_b: Amount,
    },
    RemoveLiquidity {
        pool: String,
        caller: AccountId,
        lp_amount: Amount,
    },
    GetToken1Ratio {
        pool: String,
    },
    GetToken2Ratio {
        pool: String,
    },
    GetAmountOfToken1 {
        pool: String,
        amount_b: Amount,
    },
    GetAmountOfToken2 {
        pool: String,
        amount_a: Amount,
    },
    GetLpTokenComposition {
        pool: String,
        lp_amount: Amount,
    },
    CreateStakingEngine {
        engine: String,
        principal: AssetId,
        reward: AssetId,
        #[serde(default)]
        rewards_per_hour: Option<Amount>,
    },
    Stack {
        engine: String,
        caller: AccountId,
        amount: Amount,
    },
    Unstack {
        engine: String,
        caller: AccountId,
        amount: Amount,
    },
    Claim {
        engine: String,
        caller: AccountId,
    },
    GetTotalStackedByOwner {
        engine: String,
        owner: AccountId,
    },
    GetTotalRewardAmount {
        engine: String,
        owner: AccountId,
    },
    RewardsPerHour {
        engine: String,
    },
    TotalStacked {
        engine: String,
    },
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Done,
    Amount(Amount),
    Pair(Amount, Amount),
    /// Fixed point, scaled by [`RATIO_SCALE`].
    Ratio(Amount),
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Done => write!(f, "ok"),
            Outcome::Amount(amount) => write!(f, "{amount}"),
            Outcome::Pair(a, b) => write!(f, "({a}, {b})"),
            Outcome::Ratio(ratio) => {
                let whole = ratio / RATIO_SCALE;
                let frac = ratio % RATIO_SCALE;
                write!(f, "{whole}.{frac:018}")
            }
        }
    }
}

impl Exchange {
    /// Run one command at host time `now`. Failed commands leave the
    /// exchange unchanged.
    pub fn execute(&mut self, command: Command, now: Timestamp) -> Result<Outcome, ExchangeError> {
        match command {
            Command::CreateAsset { asset, deployer } => {
                self.create_asset(&asset, &deployer)?;
                Ok(Outcome::Done)
            }
            Command::Mint {
                asset,
                caller,
                to,
                amount,
            } => {
                self.bank_mut().mint(&asset, &caller, &to, amount)?;
                Ok(Outcome::Done)
            }
            Command::Burn {
                asset,
                caller,
                from,
                amount,
            } => {
                self.bank_mut().burn(&asset, &caller, &from, amount)?;
                Ok(Outcome::Done)
            }
            Command::Transfer {
                asset,
                from,
                to,
                amount,
            } => {
                self.bank_mut().transfer(&asset, &from, &to, amount)?;
                Ok(Outcome::Done)
            }
            Command::Approve {
                asset,
                owner,
                spender,
                amount,
            } => {
                self.bank_mut().approve(&asset, &owner, &spender, amount)?;
                Ok(Outcome::Done)
            }
            Command::TransferFrom {
                asset,
                spender,
                from,
                to,
                amount,
            } => {
                self.bank_mut()
                    .transfer_from(&asset, &spender, &from, &to, amount)?;
                Ok(Outcome::Done)
            }
            Command::AddAdmin { asset, caller, who } => {
                self.bank_mut().add_admin(&asset, &caller, &who)?;
                Ok(Outcome::Done)
            }
            Command::RemoveAdmin { asset, caller, who } => {
                self.bank_mut().remove_admin(&asset, &caller, &who)?;
                Ok(Outcome::Done)
            }
            Command::BalanceOf { asset, owner } => {
                Ok(Outcome::Amount(self.bank().balance_of(&asset, &owner)?))
            }
            Command::AllowanceOf {
                asset,
                owner,
                spender,
            } => Ok(Outcome::Amount(
                self.bank().allowance_of(&asset, &owner, &spender)?,
            )),
            Command::TotalSupply { asset } => Ok(Outcome::Amount(self.bank().total_supply(&asset)?)),
            Command::CreatePool {
                pool,
                token_a,
                token_b,
                lp_token,
                deployer,
            } => {
                self.create_pool(
                    &pool,
                    PoolConfig {
                        token_a,
                        token_b,
                        lp_token,
                    },
                    &deployer,
                )?;
                Ok(Outcome::Done)
            }
            Command::AddLiquidity {
                pool,
                caller,
                amount_a,
                amount_b,
            } => {
                let (pool, bank) = self.pool_with_bank(&pool)?;
                let minted = pool.add_liquidity(bank, &caller, amount_a, amount_b)?;
                Ok(Outcome::Amount(minted))
            }
            Command::RemoveLiquidity {
                pool,
                caller,
                lp_amount,
            } => {
                let (pool, bank) = self.pool_with_bank(&pool)?;
                let (a, b) = pool.remove_liquidity(bank, &caller, lp_amount)?;
                Ok(Outcome::Pair(a, b))
            }
            Command::GetToken1Ratio { pool } => {
                Ok(Outcome::Ratio(self.pool(&pool)?.token1_ratio(self.bank())?))
            }
            Command::GetToken2Ratio { pool } => {
                Ok(Outcome::Ratio(self.pool(&pool)?.token2_ratio(self.bank())?))
            }
            Command::GetAmountOfToken1 { pool, amount_b } => Ok(Outcome::Amount(
                self.pool(&pool)?.amount_of_token1(self.bank(), amount_b)?,
            )),
            Command::GetAmountOfToken2 { pool, amount_a } => Ok(Outcome::Amount(
                self.pool(&pool)?.amount_of_token2(self.bank(), amount_a)?,
            )),
            Command::GetLpTokenComposition { pool, lp_amount } => {
                let (a, b) = self
                    .pool(&pool)?
                    .lp_token_composition(self.bank(), lp_amount)?;
                Ok(Outcome::Pair(a, b))
            }
            Command::CreateStakingEngine {
                engine,
                principal,
                reward,
                rewards_per_hour,
            } => {
                self.create_staking_engine(
                    &engine,
                    StakingConfig {
                        principal,
                        reward,
                        rewards_per_hour: rewards_per_hour.unwrap_or(DEFAULT_REWARDS_PER_HOUR),
                    },
                )?;
                Ok(Outcome::Done)
            }
            Command::Stack {
                engine,
                caller,
                amount,
            } => {
                let (engine, bank) = self.engine_with_bank(&engine)?;
                engine.stack(bank, &caller, amount, now)?;
                Ok(Outcome::Done)
            }
            Command::Unstack {
                engine,
                caller,
                amount,
            } => {
                let (engine, bank) = self.engine_with_bank(&engine)?;
                engine.unstack(bank, &caller, amount, now)?;
                Ok(Outcome::Done)
            }
            Command::Claim { engine, caller } => {
                let (engine, bank) = self.engine_with_bank(&engine)?;
                Ok(Outcome::Amount(engine.claim(bank, &caller, now)?))
            }
            Command::GetTotalStackedByOwner { engine, owner } => Ok(Outcome::Amount(
                self.engine(&engine)?.total_stacked_by_owner(&owner),
            )),
            Command::GetTotalRewardAmount { engine, owner } => Ok(Outcome::Amount(
                self.engine(&engine)?.total_reward_amount(&owner, now)?,
            )),
            Command::RewardsPerHour { engine } => {
                Ok(Outcome::Amount(self.engine(&engine)?.rewards_per_hour()))
            }
            Command::TotalStacked { engine } => {
                Ok(Outcome::Amount(self.engine(&engine)?.total_staked()))
            }
        }
    }
}
