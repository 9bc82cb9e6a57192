use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::{error::ExchangeError, math::checked_add, AccountId, Amount, AssetId};

pub const DEFAULT_DECIMALS: u8 = 18;

/// Balance, allowance and admin bookkeeping for one fungible asset.
///
/// Invariant: the sum of `balances` equals `total_supply`. Zero balances and
/// zero allowances are not stored.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Ledger {
    asset: AssetId,
    decimals: u8,
    total_supply: Amount,
    balances: BTreeMap<AccountId, Amount>,
    allowances: BTreeMap<AccountId, BTreeMap<AccountId, Amount>>,
    admins: BTreeSet<AccountId>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct LedgerSnapshot {
    pub asset: AssetId,
    pub decimals: u8,
    pub total_supply: Amount,
    pub balances: BTreeMap<AccountId, Amount>,
    pub allowances: BTreeMap<AccountId, BTreeMap<AccountId, Amount>>,
    pub admins: BTreeSet<AccountId>,
    #[serde(with = "crate::ledger::hex_root")]
    pub state_root: [u8; 32],
}

/// Journal entry describing a committed change.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LedgerEvent {
    Minted {
        asset: AssetId,
        to: AccountId,
        amount: Amount,
    },
    Burned {
        asset: AssetId,
        from: AccountId,
        amount: Amount,
    },
    Transferred {
        asset: AssetId,
        from: AccountId,
        to: AccountId,
        amount: Amount,
        spender: Option<AccountId>,
    },
    Approved {
        asset: AssetId,
        owner: AccountId,
        spender: AccountId,
        amount: Amount,
    },
    AdminAdded {
        asset: AssetId,
        admin: AccountId,
        by: AccountId,
    },
    AdminRemoved {
        asset: AssetId,
        admin: AccountId,
        by: AccountId,
    },
}

/// A balance-moving operation that can take part in an atomic batch.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LedgerMutation {
    Mint {
        asset: AssetId,
        minter: AccountId,
        to: AccountId,
        amount: Amount,
    },
    Burn {
        asset: AssetId,
        burner: AccountId,
        from: AccountId,
        amount: Amount,
    },
    Transfer {
        asset: AssetId,
        from: AccountId,
        to: AccountId,
        amount: Amount,
    },
    TransferFrom {
        asset: AssetId,
        spender: AccountId,
        from: AccountId,
        to: AccountId,
        amount: Amount,
    },
}

impl LedgerMutation {
    pub fn asset(&self) -> &AssetId {
        match self {
            LedgerMutation::Mint { asset, .. }
            | LedgerMutation::Burn { asset, .. }
            | LedgerMutation::Transfer { asset, .. }
            | LedgerMutation::TransferFrom { asset, .. } => asset,
        }
    }

    pub fn event(&self) -> LedgerEvent {
        match self.clone() {
            LedgerMutation::Mint {
                asset, to, amount, ..
            } => LedgerEvent::Minted { asset, to, amount },
            LedgerMutation::Burn {
                asset, from, amount, ..
            } => LedgerEvent::Burned {
                asset,
                from,
                amount,
            },
            LedgerMutation::Transfer {
                asset,
                from,
                to,
                amount,
            } => LedgerEvent::Transferred {
                asset,
                from,
                to,
                amount,
                spender: None,
            },
            LedgerMutation::TransferFrom {
                asset,
                spender,
                from,
                to,
                amount,
            } => LedgerEvent::Transferred {
                asset,
                from,
                to,
                amount,
                spender: Some(spender),
            },
        }
    }
}

impl Ledger {
    /// Create an empty ledger whose only admin is `deployer`.
    pub fn new(asset: impl Into<AssetId>, deployer: impl Into<AccountId>) -> Self {
        Self::with_decimals(asset, deployer, DEFAULT_DECIMALS)
    }

    pub fn with_decimals(
        asset: impl Into<AssetId>,
        deployer: impl Into<AccountId>,
        decimals: u8,
    ) -> Self {
        let mut admins = BTreeSet::new();
        admins.insert(deployer.into());
        Self {
            asset: asset.into(),
            decimals,
            total_supply: 0,
            balances: BTreeMap::new(),
            allowances: BTreeMap::new(),
            admins,
        }
    }

    pub fn asset(&self) -> &AssetId {
        &self.asset
    }

    pub fn decimals(&self) -> u8 {
        self.decimals
    }

    pub fn total_supply(&self) -> Amount {
        self.total_supply
    }

    pub fn balance_of(&self, owner: &str) -> Amount {
        self.balances.get(owner).copied().unwrap_or(0)
    }

    pub fn allowance_of(&self, owner: &str, spender: &str) -> Amount {
        self.allowances
            .get(owner)
            .and_then(|spenders| spenders.get(spender))
            .copied()
            .unwrap_or(0)
    }

    pub fn is_admin(&self, who: &str) -> bool {
        self.admins.contains(who)
    }

    pub fn admins(&self) -> &BTreeSet<AccountId> {
        &self.admins
    }

    fn ensure_admin(&self, caller: &str) -> Result<(), ExchangeError> {
        if !self.is_admin(caller) {
            return Err(ExchangeError::Unauthorized {
                asset: self.asset.clone(),
                caller: caller.to_string(),
            });
        }
        Ok(())
    }

    fn ensure_balance(&self, owner: &str, amount: Amount) -> Result<(), ExchangeError> {
        let available = self.balance_of(owner);
        if available < amount {
            return Err(ExchangeError::InsufficientBalance {
                asset: self.asset.clone(),
                account: owner.to_string(),
                available,
                required: amount,
            });
        }
        Ok(())
    }

    // Callers have checked the balance.
    fn debit(&mut self, owner: &str, amount: Amount) {
        let remaining = self.balance_of(owner) - amount;
        if remaining == 0 {
            self.balances.remove(owner);
        } else {
            self.balances.insert(owner.to_string(), remaining);
        }
    }

    // Never overflows: every balance is bounded by total_supply.
    fn credit(&mut self, owner: &str, amount: Amount) {
        if amount == 0 {
            return;
        }
        *self.balances.entry(owner.to_string()).or_insert(0) += amount;
    }

    fn set_allowance(&mut self, owner: &str, spender: &str, amount: Amount) {
        if amount == 0 {
            if let Some(spenders) = self.allowances.get_mut(owner) {
                spenders.remove(spender);
                if spenders.is_empty() {
                    self.allowances.remove(owner);
                }
            }
            return;
        }
        self.allowances
            .entry(owner.to_string())
            .or_default()
            .insert(spender.to_string(), amount);
    }

    pub fn mint(&mut self, caller: &str, to: &str, amount: Amount) -> Result<(), ExchangeError> {
        self.ensure_admin(caller)?;
        if amount == 0 {
            return Err(ExchangeError::InvalidAmount("mint amount must be positive"));
        }
        let supply = checked_add(self.total_supply, amount, "total supply")?;
        self.total_supply = supply;
        self.credit(to, amount);
        Ok(())
    }

    pub fn burn(&mut self, caller: &str, from: &str, amount: Amount) -> Result<(), ExchangeError> {
        self.ensure_admin(caller)?;
        if amount == 0 {
            return Err(ExchangeError::InvalidAmount("burn amount must be positive"));
        }
        self.ensure_balance(from, amount)?;
        self.debit(from, amount);
        self.total_supply -= amount;
        Ok(())
    }

    pub fn transfer(&mut self, from: &str, to: &str, amount: Amount) -> Result<(), ExchangeError> {
        self.ensure_balance(from, amount)?;
        if from == to {
            return Ok(());
        }
        self.debit(from, amount);
        self.credit(to, amount);
        Ok(())
    }

    /// Overwrites any previous allowance.
    pub fn approve(&mut self, owner: &str, spender: &str, amount: Amount) {
        self.set_allowance(owner, spender, amount);
    }

    pub fn transfer_from(
        &mut self,
        spender: &str,
        from: &str,
        to: &str,
        amount: Amount,
    ) -> Result<(), ExchangeError> {
        let allowance = self.allowance_of(from, spender);
        if allowance < amount {
            return Err(ExchangeError::InsufficientAllowance {
                asset: self.asset.clone(),
                owner: from.to_string(),
                spender: spender.to_string(),
                available: allowance,
                required: amount,
            });
        }
        self.ensure_balance(from, amount)?;
        self.set_allowance(from, spender, allowance - amount);
        self.transfer(from, to, amount)
    }

    /// Returns whether the admin set changed.
    pub fn add_admin(&mut self, caller: &str, who: &str) -> Result<bool, ExchangeError> {
        self.ensure_admin(caller)?;
        Ok(self.admins.insert(who.to_string()))
    }

    /// Returns whether the admin set changed.
    pub fn remove_admin(&mut self, caller: &str, who: &str) -> Result<bool, ExchangeError> {
        self.ensure_admin(caller)?;
        Ok(self.admins.remove(who))
    }

    /// Apply one batchable mutation addressed to this ledger.
    pub fn apply(&mut self, mutation: &LedgerMutation) -> Result<(), ExchangeError> {
        debug_assert_eq!(mutation.asset(), &self.asset);
        match mutation {
            LedgerMutation::Mint {
                minter, to, amount, ..
            } => self.mint(minter, to, *amount)?,
            LedgerMutation::Burn {
                burner,
                from,
                amount,
                ..
            } => self.burn(burner, from, *amount)?,
            LedgerMutation::Transfer {
                from, to, amount, ..
            } => self.transfer(from, to, *amount)?,
            LedgerMutation::TransferFrom {
                spender,
                from,
                to,
                amount,
                ..
            } => self.transfer_from(spender, from, to, *amount)?,
        }
        debug!(asset = %self.asset, ?mutation, "ledger mutation applied");
        Ok(())
    }

    /// Exact inverse of a mutation that `apply` accepted and that has not been
    /// followed by any other change to this ledger.
    pub(crate) fn unwind(&mut self, mutation: &LedgerMutation) {
        match mutation {
            LedgerMutation::Mint { to, amount, .. } => {
                self.debit(to, *amount);
                self.total_supply -= amount;
            }
            LedgerMutation::Burn { from, amount, .. } => {
                self.credit(from, *amount);
                self.total_supply += amount;
            }
            LedgerMutation::Transfer {
                from, to, amount, ..
            } => {
                if from != to {
                    self.debit(to, *amount);
                    self.credit(from, *amount);
                }
            }
            LedgerMutation::TransferFrom {
                spender,
                from,
                to,
                amount,
                ..
            } => {
                if from != to {
                    self.debit(to, *amount);
                    self.credit(from, *amount);
                }
                let restored = self.allowance_of(from, spender) + amount;
                self.set_allowance(from, spender, restored);
            }
        }
        debug!(asset = %self.asset, ?mutation, "ledger mutation unwound");
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            asset: self.asset.clone(),
            decimals: self.decimals,
            total_supply: self.total_supply,
            balances: self.balances.clone(),
            allowances: self.allowances.clone(),
            admins: self.admins.clone(),
            state_root: self.state_root(),
        }
    }

    /// SHA-256 Merkle root over supply, balances, allowances and admins.
    ///
    /// Leaves are `H(0x00 || tag || fields..)` with every variable-length
    /// field length-prefixed; inner nodes are `H(0x01 || left || right)`. An
    /// unpaired node is carried up a level unchanged.
    pub fn state_root(&self) -> [u8; 32] {
        let supply = self.total_supply.to_be_bytes();
        let mut leaves = vec![leaf_hash(b"supply", &[self.asset.as_bytes(), &supply])];
        leaves.extend(self.balances.iter().map(|(owner, balance)| {
            leaf_hash(b"balance", &[owner.as_bytes(), &balance.to_be_bytes()])
        }));
        for (owner, spenders) in &self.allowances {
            leaves.extend(spenders.iter().map(|(spender, amount)| {
                leaf_hash(
                    b"allowance",
                    &[owner.as_bytes(), spender.as_bytes(), &amount.to_be_bytes()],
                )
            }));
        }
        leaves.extend(
            self.admins
                .iter()
                .map(|admin| leaf_hash(b"admin", &[admin.as_bytes()])),
        );
        fold_levels(leaves)
    }
}

fn leaf_hash(tag: &[u8], fields: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update([0x00]);
    hasher.update(tag);
    for field in fields {
        hasher.update((field.len() as u64).to_be_bytes());
        hasher.update(field);
    }
    hasher.finalize().into()
}

// `level` is never empty: the supply leaf is always present.
fn fold_levels(mut level: Vec<[u8; 32]>) -> [u8; 32] {
    while level.len() > 1 {
        level = level
            .chunks(2)
            .map(|pair| {
                if let [left, right] = pair {
                    let mut hasher = Sha256::new();
                    hasher.update([0x01]);
                    hasher.update(left);
                    hasher.update(right);
                    hasher.finalize().into()
                } else {
                    pair[0]
                }
            })
            .collect();
    }
    level.first().copied().unwrap_or_default()
}

pub(crate) mod hex_root {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(value))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<[u8; 32], D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        let bytes = hex::decode(&encoded).map_err(D::Error::custom)?;
        bytes
            .try_into()
            .map_err(|_| D::Error::custom("state root must be 32 bytes"))
    }
}
