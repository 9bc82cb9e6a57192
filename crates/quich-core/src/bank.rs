//! Multi-asset registry with all-or-nothing batches.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{
    error::ExchangeError,
    ledger::{Ledger, LedgerEvent, LedgerMutation, LedgerSnapshot},
    AccountId, Amount, AssetId,
};

/// Owns every asset ledger of one exchange plus the journal of committed
/// events.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Bank {
    ledgers: BTreeMap<AssetId, Ledger>,
    events: Vec<LedgerEvent>,
}

impl Bank {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_asset(
        &mut self,
        asset: impl Into<AssetId>,
        deployer: impl Into<AccountId>,
    ) -> Result<(), ExchangeError> {
        let asset = asset.into();
        if self.ledgers.contains_key(&asset) {
            return Err(ExchangeError::DuplicateAsset(asset));
        }
        let ledger = Ledger::new(asset.clone(), deployer);
        self.ledgers.insert(asset, ledger);
        Ok(())
    }

    pub fn ledger(&self, asset: &str) -> Result<&Ledger, ExchangeError> {
        self.ledgers
            .get(asset)
            .ok_or_else(|| ExchangeError::UnknownAsset(asset.to_string()))
    }

    fn ledger_mut(&mut self, asset: &str) -> Result<&mut Ledger, ExchangeError> {
        self.ledgers
            .get_mut(asset)
            .ok_or_else(|| ExchangeError::UnknownAsset(asset.to_string()))
    }

    pub fn assets(&self) -> impl Iterator<Item = &AssetId> {
        self.ledgers.keys()
    }

    /// Events committed since the last [`Bank::drain_events`].
    pub fn events(&self) -> &[LedgerEvent] {
        &self.events
    }

    /// Hand the journal to the caller and start a fresh one.
    pub fn drain_events(&mut self) -> Vec<LedgerEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn balance_of(&self, asset: &str, owner: &str) -> Result<Amount, ExchangeError> {
        Ok(self.ledger(asset)?.balance_of(owner))
    }

    pub fn allowance_of(
        &self,
        asset: &str,
        owner: &str,
        spender: &str,
    ) -> Result<Amount, ExchangeError> {
        Ok(self.ledger(asset)?.allowance_of(owner, spender))
    }

    pub fn total_supply(&self, asset: &str) -> Result<Amount, ExchangeError> {
        Ok(self.ledger(asset)?.total_supply())
    }

    pub fn mint(
        &mut self,
        asset: &str,
        caller: &str,
        to: &str,
        amount: Amount,
    ) -> Result<(), ExchangeError> {
        self.apply(&[LedgerMutation::Mint {
            asset: asset.to_string(),
            minter: caller.to_string(),
            to: to.to_string(),
            amount,
        }])
    }

    pub fn burn(
        &mut self,
        asset: &str,
        caller: &str,
        from: &str,
        amount: Amount,
    ) -> Result<(), ExchangeError> {
        self.apply(&[LedgerMutation::Burn {
            asset: asset.to_string(),
            burner: caller.to_string(),
            from: from.to_string(),
            amount,
        }])
    }

    pub fn transfer(
        &mut self,
        asset: &str,
        from: &str,
        to: &str,
        amount: Amount,
    ) -> Result<(), ExchangeError> {
        self.apply(&[LedgerMutation::Transfer {
            asset: asset.to_string(),
            from: from.to_string(),
            to: to.to_string(),
            amount,
        }])
    }

    pub fn transfer_from(
        &mut self,
        asset: &str,
        spender: &str,
        from: &str,
        to: &str,
        amount: Amount,
    ) -> Result<(), ExchangeError> {
        self.apply(&[LedgerMutation::TransferFrom {
            asset: asset.to_string(),
            spender: spender.to_string(),
            from: from.to_string(),
            to: to.to_string(),
            amount,
        }])
    }

    pub fn approve(
        &mut self,
        asset: &str,
        owner: &str,
        spender: &str,
        amount: Amount,
    ) -> Result<(), ExchangeError> {
        self.ledger_mut(asset)?.approve(owner, spender, amount);
        self.events.push(LedgerEvent::Approved {
            asset: asset.to_string(),
            owner: owner.to_string(),
            spender: spender.to_string(),
            amount,
        });
        Ok(())
    }

    pub fn add_admin(&mut self, asset: &str, caller: &str, who: &str) -> Result<(), ExchangeError> {
        if self.ledger_mut(asset)?.add_admin(caller, who)? {
            self.events.push(LedgerEvent::AdminAdded {
                asset: asset.to_string(),
                admin: who.to_string(),
                by: caller.to_string(),
            });
        }
        Ok(())
    }

    pub fn remove_admin(
        &mut self,
        asset: &str,
        caller: &str,
        who: &str,
    ) -> Result<(), ExchangeError> {
        if self.ledger_mut(asset)?.remove_admin(caller, who)? {
            self.events.push(LedgerEvent::AdminRemoved {
                asset: asset.to_string(),
                admin: who.to_string(),
                by: caller.to_string(),
            });
        }
        Ok(())
    }

    /// Apply `mutations` in order as one unit. On the first failure every
    /// mutation already applied is unwound in reverse order and the error is
    /// returned; on success one event per mutation is journaled.
    pub fn apply(&mut self, mutations: &[LedgerMutation]) -> Result<(), ExchangeError> {
        for mutation in mutations {
            self.ledger(mutation.asset())?;
        }
        let mut applied = 0;
        let mut failure = None;
        for mutation in mutations {
            let ledger = self.ledger_mut(mutation.asset())?;
            if let Err(err) = ledger.apply(mutation) {
                failure = Some(err);
                break;
            }
            applied += 1;
        }
        if let Some(err) = failure {
            for mutation in mutations[..applied].iter().rev() {
                self.ledger_mut(mutation.asset())?.unwind(mutation);
            }
            if applied > 0 {
                warn!(applied, error = %err, "ledger batch rolled back");
            }
            return Err(err);
        }
        self.events.extend(mutations.iter().map(LedgerMutation::event));
        debug!(count = mutations.len(), "ledger batch committed");
        Ok(())
    }

    pub fn snapshot(&self) -> BTreeMap<AssetId, LedgerSnapshot> {
        self.ledgers
            .iter()
            .map(|(asset, ledger)| (asset.clone(), ledger.snapshot()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn funded_bank() -> Bank {
        let mut bank = Bank::new();
        bank.create_asset("ST", "owner").unwrap();
        bank.create_asset("QCH", "owner").unwrap();
        bank.create_asset("LP", "owner").unwrap();
        bank.mint("ST", "owner", "alice", 1_000).unwrap();
        bank.mint("QCH", "owner", "alice", 500).unwrap();
        bank
    }

    #[test]
    fn duplicate_and_unknown_assets_are_rejected() {
        let mut bank = funded_bank();
        assert_eq!(
            bank.create_asset("ST", "someone").unwrap_err(),
            ExchangeError::DuplicateAsset("ST".into())
        );
        assert_eq!(
            bank.balance_of("NOPE", "alice").unwrap_err(),
            ExchangeError::UnknownAsset("NOPE".into())
        );
    }

    #[test]
    fn failed_batch_rolls_back_every_asset() {
        let mut bank = funded_bank();
        bank.approve("ST", "alice", "pool", 600).unwrap();
        bank.approve("QCH", "alice", "pool", 100).unwrap();
        let before = bank.snapshot();
        let events_before = bank.events().len();

        let err = bank
            .apply(&[
                LedgerMutation::TransferFrom {
                    asset: "ST".into(),
                    spender: "pool".into(),
                    from: "alice".into(),
                    to: "pool".into(),
                    amount: 600,
                },
                LedgerMutation::TransferFrom {
                    asset: "QCH".into(),
                    spender: "pool".into(),
                    from: "alice".into(),
                    to: "pool".into(),
                    amount: 300,
                },
            ])
            .unwrap_err();
        assert!(matches!(err, ExchangeError::InsufficientAllowance { .. }));
        assert_eq!(bank.snapshot(), before);
        assert_eq!(bank.events().len(), events_before);
    }

    #[test]
    fn batch_with_unknown_asset_touches_nothing() {
        let mut bank = funded_bank();
        let before = bank.snapshot();
        let err = bank
            .apply(&[
                LedgerMutation::Transfer {
                    asset: "ST".into(),
                    from: "alice".into(),
                    to: "bob".into(),
                    amount: 1,
                },
                LedgerMutation::Transfer {
                    asset: "GHOST".into(),
                    from: "alice".into(),
                    to: "bob".into(),
                    amount: 1,
                },
            ])
            .unwrap_err();
        assert_eq!(err, ExchangeError::UnknownAsset("GHOST".into()));
        assert_eq!(bank.snapshot(), before);
    }

    #[test]
    fn committed_batch_journals_events() {
        let mut bank = funded_bank();
        bank.add_admin("LP", "owner", "pool").unwrap();
        bank.add_admin("LP", "owner", "pool").unwrap();
        let events_before = bank.events().len();
        bank.apply(&[
            LedgerMutation::Transfer {
                asset: "ST".into(),
                from: "alice".into(),
                to: "pool".into(),
                amount: 10,
            },
            LedgerMutation::Mint {
                asset: "LP".into(),
                minter: "pool".into(),
                to: "alice".into(),
                amount: 10,
            },
        ])
        .unwrap();
        assert_eq!(bank.events().len(), events_before + 2);
        assert_eq!(bank.balance_of("LP", "alice").unwrap(), 10);
        let admin_events = bank
            .events()
            .iter()
            .filter(|event| matches!(event, LedgerEvent::AdminAdded { .. }))
            .count();
        assert_eq!(admin_events, 1);
    }

    #[test]
    fn drained_journal_restarts_empty() {
        let mut bank = funded_bank();
        bank.transfer("ST", "alice", "bob", 5).unwrap();
        let drained = bank.drain_events();
        assert_eq!(drained.len(), 3);
        assert!(matches!(
            drained.last(),
            Some(LedgerEvent::Transferred { amount: 5, spender: None, .. })
        ));
        assert!(bank.events().is_empty());
        bank.approve("QCH", "alice", "bob", 1).unwrap();
        assert_eq!(bank.events().len(), 1);
        assert!(bank.drain_events().len() == 1 && bank.events().is_empty());
    }

    const ACCOUNTS: [&str; 4] = ["owner", "alice", "bob", "carol"];

    #[derive(Clone, Debug)]
    enum Op {
        Mint(usize, usize, Amount),
        Burn(usize, usize, Amount),
        Transfer(usize, usize, Amount),
        Approve(usize, usize, Amount),
        TransferFrom(usize, usize, usize, Amount),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        let who = 0..ACCOUNTS.len();
        prop_oneof![
            (who.clone(), who.clone(), 0..10_000u128).prop_map(|(c, t, a)| Op::Mint(c, t, a)),
            (who.clone(), who.clone(), 0..10_000u128).prop_map(|(c, f, a)| Op::Burn(c, f, a)),
            (who.clone(), who.clone(), 0..10_000u128).prop_map(|(f, t, a)| Op::Transfer(f, t, a)),
            (who.clone(), who.clone(), 0..10_000u128).prop_map(|(o, s, a)| Op::Approve(o, s, a)),
            (who.clone(), who.clone(), who, 0..10_000u128)
                .prop_map(|(s, f, t, a)| Op::TransferFrom(s, f, t, a)),
        ]
    }

    proptest! {
        #[test]
        fn balances_always_sum_to_supply(ops in prop::collection::vec(op_strategy(), 1..64)) {
            let mut bank = Bank::new();
            bank.create_asset("ST", "owner").unwrap();
            for op in ops {
                let before = bank.snapshot();
                let result = match op {
                    Op::Mint(c, t, a) => bank.mint("ST", ACCOUNTS[c], ACCOUNTS[t], a),
                    Op::Burn(c, f, a) => bank.burn("ST", ACCOUNTS[c], ACCOUNTS[f], a),
                    Op::Transfer(f, t, a) => bank.transfer("ST", ACCOUNTS[f], ACCOUNTS[t], a),
                    Op::Approve(o, s, a) => bank.approve("ST", ACCOUNTS[o], ACCOUNTS[s], a),
                    Op::TransferFrom(s, f, t, a) => {
                        bank.transfer_from("ST", ACCOUNTS[s], ACCOUNTS[f], ACCOUNTS[t], a)
                    }
                };
                if result.is_err() {
                    prop_assert_eq!(&bank.snapshot(), &before);
                }
                let ledger = bank.ledger("ST").unwrap();
                let sum: Amount = ledger.snapshot().balances.values().sum();
                prop_assert_eq!(sum, ledger.total_supply());
            }
        }
    }
}
