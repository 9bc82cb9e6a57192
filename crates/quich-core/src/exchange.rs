//! Owned state of one exchange: the asset bank, its pools and its staking
//! engines. Independent `Exchange` values never share state.

use std::{collections::BTreeMap, sync::Arc};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{
    bank::Bank,
    command::{Command, Outcome},
    error::ExchangeError,
    ledger::{LedgerEvent, LedgerSnapshot},
    pool::{LiquidityPool, PoolConfig, PoolSnapshot},
    staking::{StakingConfig, StakingEngine, StakingSnapshot},
    AssetId, Timestamp,
};

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Exchange {
    bank: Bank,
    pools: BTreeMap<String, LiquidityPool>,
    engines: BTreeMap<String, StakingEngine>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExchangeSnapshot {
    pub ledgers: BTreeMap<AssetId, LedgerSnapshot>,
    pub pools: BTreeMap<String, PoolSnapshot>,
    pub staking: BTreeMap<String, StakingSnapshot>,
    /// Journaled events not yet drained.
    pub events: usize,
}

impl Exchange {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bank(&self) -> &Bank {
        &self.bank
    }

    pub fn bank_mut(&mut self) -> &mut Bank {
        &mut self.bank
    }

    pub fn create_asset(&mut self, asset: &str, deployer: &str) -> Result<(), ExchangeError> {
        self.bank.create_asset(asset, deployer)?;
        info!(asset, deployer, "asset created");
        Ok(())
    }

    /// Register a pool and grant it mint rights on its LP asset. `deployer`
    /// must already be an admin of the LP asset.
    pub fn create_pool(
        &mut self,
        id: &str,
        config: PoolConfig,
        deployer: &str,
    ) -> Result<&LiquidityPool, ExchangeError> {
        if self.pools.contains_key(id) {
            return Err(ExchangeError::DuplicatePool(id.to_string()));
        }
        for asset in [&config.token_a, &config.token_b, &config.lp_token] {
            self.bank.ledger(asset)?;
        }
        let pool = LiquidityPool::new(id, config)?;
        self.bank
            .add_admin(&pool.config().lp_token, deployer, pool.address())?;
        info!(pool = id, address = %pool.address(), "pool created");
        Ok(self.pools.entry(id.to_string()).or_insert(pool))
    }

    /// Register a staking engine. Granting the engine mint rights on the
    /// reward asset is left to the reward asset's admins.
    pub fn create_staking_engine(
        &mut self,
        id: &str,
        config: StakingConfig,
    ) -> Result<&StakingEngine, ExchangeError> {
        if self.engines.contains_key(id) {
            return Err(ExchangeError::DuplicateStakingEngine(id.to_string()));
        }
        self.bank.ledger(&config.principal)?;
        self.bank.ledger(&config.reward)?;
        let engine = StakingEngine::new(id, config);
        info!(engine = id, address = %engine.address(), "staking engine created");
        Ok(self.engines.entry(id.to_string()).or_insert(engine))
    }

    pub fn pool(&self, id: &str) -> Result<&LiquidityPool, ExchangeError> {
        self.pools
            .get(id)
            .ok_or_else(|| ExchangeError::UnknownPool(id.to_string()))
    }

    pub fn engine(&self, id: &str) -> Result<&StakingEngine, ExchangeError> {
        self.engines
            .get(id)
            .ok_or_else(|| ExchangeError::UnknownStakingEngine(id.to_string()))
    }

    /// Split borrow so a staking engine can move balances in the bank.
    pub fn engine_with_bank(
        &mut self,
        id: &str,
    ) -> Result<(&mut StakingEngine, &mut Bank), ExchangeError> {
        let engine = self
            .engines
            .get_mut(id)
            .ok_or_else(|| ExchangeError::UnknownStakingEngine(id.to_string()))?;
        Ok((engine, &mut self.bank))
    }

    /// Split borrow so a pool can move balances in the bank.
    pub fn pool_with_bank(&mut self, id: &str) -> Result<(&LiquidityPool, &mut Bank), ExchangeError> {
        let pool = self
            .pools
            .get(id)
            .ok_or_else(|| ExchangeError::UnknownPool(id.to_string()))?;
        Ok((pool, &mut self.bank))
    }

    /// Take every ledger event committed since the previous drain.
    pub fn drain_events(&mut self) -> Vec<LedgerEvent> {
        self.bank.drain_events()
    }

    pub fn snapshot(&self) -> Result<ExchangeSnapshot, ExchangeError> {
        let mut pools = BTreeMap::new();
        for pool in self.pools.values() {
            pools.insert(pool.id().to_string(), pool.snapshot(&self.bank)?);
        }
        Ok(ExchangeSnapshot {
            ledgers: self.bank.snapshot(),
            pools,
            staking: self
                .engines
                .values()
                .map(|engine| (engine.id().to_string(), engine.snapshot()))
                .collect(),
            events: self.bank.events().len(),
        })
    }
}

/// Thread-safe handle. Each call holds the lock for the whole operation, so
/// concurrent callers observe one operation at a time.
#[derive(Clone, Default)]
pub struct SharedExchange {
    inner: Arc<Mutex<Exchange>>,
}

impl SharedExchange {
    pub fn new(exchange: Exchange) -> Self {
        Self {
            inner: Arc::new(Mutex::new(exchange)),
        }
    }

    pub fn execute(&self, command: Command, now: Timestamp) -> Result<Outcome, ExchangeError> {
        self.inner.lock().execute(command, now)
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut Exchange) -> R) -> R {
        f(&mut *self.inner.lock())
    }

    pub fn snapshot(&self) -> Result<ExchangeSnapshot, ExchangeError> {
        self.inner.lock().snapshot()
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use rand::{rngs::StdRng, Rng, SeedableRng};

    use super::*;
    use crate::{staking::DEFAULT_REWARDS_PER_HOUR, Amount};

    fn deployed() -> Exchange {
        let mut exchange = Exchange::new();
        let owner = "owner".to_string();
        for asset in ["ST", "QCH", "STQCHLP"] {
            exchange.create_asset(asset, &owner).unwrap();
        }
        exchange
            .create_pool(
                "st-qch",
                PoolConfig {
                    token_a: "ST".into(),
                    token_b: "QCH".into(),
                    lp_token: "STQCHLP".into(),
                },
                &owner,
            )
            .unwrap();
        for (id, principal) in [("st", "ST"), ("lp", "STQCHLP")] {
            let address = exchange
                .create_staking_engine(
                    id,
                    StakingConfig {
                        principal: principal.into(),
                        reward: "QCH".into(),
                        rewards_per_hour: DEFAULT_REWARDS_PER_HOUR,
                    },
                )
                .unwrap()
                .address()
                .clone();
            exchange
                .bank_mut()
                .add_admin("QCH", &owner, &address)
                .unwrap();
        }
        exchange
    }

    #[test]
    fn pool_creation_grants_lp_mint_rights() {
        let exchange = deployed();
        let lp = exchange.bank().ledger("STQCHLP").unwrap();
        assert!(lp.is_admin("pool:st-qch"));
        assert!(lp.is_admin("owner"));
    }

    #[test]
    fn duplicate_and_dangling_registrations_fail() {
        let mut exchange = deployed();
        let config = exchange.pool("st-qch").unwrap().config().clone();
        let err = exchange
            .create_pool("st-qch", config, "owner")
            .unwrap_err();
        assert_eq!(err, ExchangeError::DuplicatePool("st-qch".into()));

        let err = exchange
            .create_staking_engine(
                "ghost",
                StakingConfig {
                    principal: "NOPE".into(),
                    reward: "QCH".into(),
                    rewards_per_hour: 1,
                },
            )
            .unwrap_err();
        assert_eq!(err, ExchangeError::UnknownAsset("NOPE".into()));
        assert!(exchange.engine("ghost").is_err());
    }

    #[test]
    fn pool_requires_deployer_to_administer_lp() {
        let mut exchange = deployed();
        exchange.create_asset("ALT", "owner").unwrap();
        exchange.create_asset("ALTLP", "owner").unwrap();
        let err = exchange
            .create_pool(
                "st-alt",
                PoolConfig {
                    token_a: "ST".into(),
                    token_b: "ALT".into(),
                    lp_token: "ALTLP".into(),
                },
                "mallory",
            )
            .unwrap_err();
        assert!(matches!(err, ExchangeError::Unauthorized { .. }));
        assert!(exchange.pool("st-alt").is_err());
    }

    #[test]
    fn draining_events_resets_snapshot_count() {
        let mut exchange = deployed();
        exchange.bank_mut().mint("ST", "owner", "alice", 10).unwrap();
        let pending = exchange.snapshot().unwrap().events;
        assert!(pending > 0);
        let drained = exchange.drain_events();
        assert_eq!(drained.len(), pending);
        assert!(matches!(
            drained.last(),
            Some(LedgerEvent::Minted { amount: 10, .. })
        ));
        assert_eq!(exchange.snapshot().unwrap().events, 0);
        assert!(exchange.snapshot().unwrap().pools.contains_key("st-qch"));
    }

    #[test]
    fn independent_exchanges_do_not_share_state() {
        let mut left = deployed();
        let right = deployed();
        left.bank_mut().mint("ST", "owner", "alice", 10).unwrap();
        assert_eq!(left.bank().balance_of("ST", "alice").unwrap(), 10);
        assert_eq!(right.bank().balance_of("ST", "alice").unwrap(), 0);
    }

    #[test]
    fn concurrent_callers_preserve_supply() {
        let shared = SharedExchange::new(deployed());
        let workers: Vec<_> = (0..8)
            .map(|idx| {
                let shared = shared.clone();
                thread::spawn(move || {
                    let me = format!("user-{idx}");
                    let next = format!("user-{}", (idx + 1) % 8);
                    shared
                        .execute(
                            Command::Mint {
                                asset: "ST".into(),
                                caller: "owner".into(),
                                to: me.clone(),
                                amount: 1_000,
                            },
                            0,
                        )
                        .unwrap();
                    for round in 0..50u64 {
                        let _ = shared.execute(
                            Command::Transfer {
                                asset: "ST".into(),
                                from: me.clone(),
                                to: next.clone(),
                                amount: 7,
                            },
                            round,
                        );
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }
        let snapshot = shared.snapshot().unwrap();
        let ledger = &snapshot.ledgers["ST"];
        let sum: Amount = ledger.balances.values().sum();
        assert_eq!(sum, 8_000);
        assert_eq!(ledger.total_supply, 8_000);
    }

    #[test]
    fn snapshot_reports_pool_and_engine_state() {
        let shared = SharedExchange::new(deployed());
        shared.with(|exchange| {
            exchange.bank_mut().mint("ST", "owner", "alice", 100).unwrap();
            exchange.bank_mut().mint("QCH", "owner", "alice", 100).unwrap();
        });
        for command in [
            Command::Approve {
                asset: "ST".into(),
                owner: "alice".into(),
                spender: "pool:st-qch".into(),
                amount: 100,
            },
            Command::Approve {
                asset: "QCH".into(),
                owner: "alice".into(),
                spender: "pool:st-qch".into(),
                amount: 50,
            },
            Command::AddLiquidity {
                pool: "st-qch".into(),
                caller: "alice".into(),
                amount_a: 100,
                amount_b: 50,
            },
        ] {
            shared.execute(command, 0).unwrap();
        }
        let snapshot = shared.snapshot().unwrap();
        let pool = &snapshot.pools["st-qch"];
        assert_eq!((pool.reserve_a, pool.reserve_b), (100, 50));
        assert_eq!(pool.lp_supply, 70);
        assert!(snapshot.staking["st"].positions.is_empty());
    }

    fn random_command(rng: &mut StdRng, actors: &[&str]) -> Command {
        let actor = actors[rng.gen_range(0..actors.len())].to_string();
        let other = actors[rng.gen_range(0..actors.len())].to_string();
        let amount = rng.gen_range(0..2_000u128);
        match rng.gen_range(0..8) {
            0 => Command::Transfer {
                asset: ["ST", "QCH"][rng.gen_range(0..2)].into(),
                from: actor,
                to: other,
                amount,
            },
            1 => Command::AddLiquidity {
                pool: "st-qch".into(),
                caller: actor,
                amount_a: amount,
                amount_b: amount / 2,
            },
            2 => Command::RemoveLiquidity {
                pool: "st-qch".into(),
                caller: actor,
                lp_amount: amount / 4,
            },
            3 => Command::Stack {
                engine: "st".into(),
                caller: actor,
                amount,
            },
            4 => Command::Unstack {
                engine: "st".into(),
                caller: actor,
                amount: amount / 3,
            },
            5 => Command::Claim {
                engine: "st".into(),
                caller: actor,
            },
            6 => Command::Stack {
                engine: "lp".into(),
                caller: actor,
                amount: amount / 8,
            },
            _ => Command::Unstack {
                engine: "lp".into(),
                caller: actor,
                amount: amount / 8,
            },
        }
    }

    #[test]
    fn randomized_replay_keeps_books_consistent() {
        let actors = ["alice", "bob", "carol", "dave"];
        let mut rng = StdRng::seed_from_u64(0x5eed);
        let mut exchange = deployed();
        for actor in actors {
            exchange.bank_mut().mint("ST", "owner", actor, 50_000).unwrap();
            exchange.bank_mut().mint("QCH", "owner", actor, 25_000).unwrap();
            for (asset, spender) in [
                ("ST", "pool:st-qch"),
                ("QCH", "pool:st-qch"),
                ("ST", "staking:st"),
                ("STQCHLP", "staking:lp"),
            ] {
                exchange
                    .bank_mut()
                    .approve(asset, actor, spender, Amount::MAX)
                    .unwrap();
            }
        }

        let mut now = 0;
        for _ in 0..500 {
            now += rng.gen_range(0..900u64);
            let command = random_command(&mut rng, &actors);
            let before = exchange.snapshot().unwrap();
            if exchange.execute(command, now).is_err() {
                assert_eq!(exchange.snapshot().unwrap(), before);
            }

            for ledger in exchange.bank().snapshot().values() {
                let sum: Amount = ledger.balances.values().sum();
                assert_eq!(sum, ledger.total_supply);
            }
            for id in ["st", "lp"] {
                let engine = exchange.engine(id).unwrap();
                let custody = exchange
                    .bank()
                    .balance_of(&engine.config().principal, engine.address())
                    .unwrap();
                assert_eq!(custody, engine.total_staked());
            }
            let pool = exchange.pool("st-qch").unwrap();
            let (reserve_a, reserve_b) = pool.reserves(exchange.bank()).unwrap();
            let supply = pool.lp_supply(exchange.bank()).unwrap();
            assert_eq!(supply == 0, reserve_a == 0 && reserve_b == 0);
        }
    }
}
