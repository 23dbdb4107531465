//! Minimal pre-state construction.
//!
//! Given the accesses a transaction made, [`PreStateBuilder`] fetches exactly
//! the accounts and slots it touched from a [`StateProvider`], each one once,
//! and nothing else except the transaction's own participants.

use std::collections::BTreeMap;

use anyhow::anyhow;
use ethereum_types::{Address, H256, U256};
use evm_replay_common::EMPTY_CODE_HASH;
use keccak_hash::keccak;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::access::{Access, AccountAccess};
use crate::error::StateError;

/// Account values at the pre-transaction block.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AccountInfo {
    pub balance: U256,
    pub nonce: U256,
    pub code: Vec<u8>,
}

/// The authoritative source of chain state, at the block before the
/// transaction.
///
/// Implementations are expected to do their own fetching (and retrying)
/// before answering. A missing slot is zero, a missing account is an error.
pub trait StateProvider {
    fn account(&self, address: Address) -> anyhow::Result<AccountInfo>;
    fn storage(&self, address: Address, key: H256) -> anyhow::Result<H256>;
}

impl<T: StateProvider + ?Sized> StateProvider for &T {
    fn account(&self, address: Address) -> anyhow::Result<AccountInfo> {
        (**self).account(address)
    }
    fn storage(&self, address: Address, key: H256) -> anyhow::Result<H256> {
        (**self).storage(address, key)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct AccountState {
    pub balance: U256,
    pub nonce: U256,
    #[serde(with = "evm_replay_common::hex")]
    pub code: Vec<u8>,
    #[serde(default)]
    pub storage: BTreeMap<H256, H256>,
}

impl AccountState {
    pub fn code_hash(&self) -> H256 {
        if self.code.is_empty() {
            EMPTY_CODE_HASH
        } else {
            keccak(&self.code)
        }
    }
}

/// Address to account, serialized in sorted address and slot order.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(transparent)]
pub struct PreState(pub BTreeMap<Address, AccountState>);

impl PreState {
    pub fn get(&self, address: &Address) -> Option<&AccountState> {
        self.0.get(address)
    }

    pub fn contains(&self, address: &Address) -> bool {
        self.0.contains_key(address)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Address, &AccountState)> {
        self.0.iter()
    }

    /// Number of storage slots over all accounts.
    pub fn slot_count(&self) -> usize {
        self.0.values().map(|it| it.storage.len()).sum()
    }
}

/// A state dump in pre-state layout can answer for the block it was taken at.
impl StateProvider for PreState {
    fn account(&self, address: Address) -> anyhow::Result<AccountInfo> {
        let account = self
            .get(&address)
            .ok_or_else(|| anyhow!("no account {address:?} in state dump"))?;
        Ok(AccountInfo {
            balance: account.balance,
            nonce: account.nonce,
            code: account.code.clone(),
        })
    }

    fn storage(&self, address: Address, key: H256) -> anyhow::Result<H256> {
        let account = self
            .get(&address)
            .ok_or_else(|| anyhow!("no account {address:?} in state dump"))?;
        Ok(account.storage.get(&key).copied().unwrap_or_default())
    }
}

/// The receiving side of a transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Target {
    Call(Address),
    /// The address the transaction deploys to.
    Create(Address),
}

impl Target {
    pub fn address(&self) -> Address {
        match self {
            Target::Call(it) | Target::Create(it) => *it,
        }
    }
}

/// Accounts the execution environment needs regardless of what the
/// transaction touches.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Participants {
    pub sender: Address,
    pub target: Target,
    /// Only when the coinbase was touched.
    pub coinbase: Option<Address>,
}

/// Accumulates a [`PreState`] for one transaction.
///
/// Every address is seeded from the provider exactly once, on its first
/// access, and every slot likewise. Nothing is shared between builders.
#[derive(Debug)]
pub struct PreStateBuilder<'a, P: ?Sized> {
    provider: &'a P,
    accounts: BTreeMap<Address, AccountState>,
}

impl<'a, P: StateProvider + ?Sized> PreStateBuilder<'a, P> {
    pub fn new(provider: &'a P) -> Self {
        Self {
            provider,
            accounts: BTreeMap::new(),
        }
    }

    /// Seed the environment-mandated accounts.
    pub fn participants(&mut self, participants: &Participants) -> Result<(), StateError> {
        self.account(participants.sender)?;
        match participants.target {
            Target::Call(it) => {
                self.account(it)?;
            }
            Target::Create(it) => self.created(it)?,
        }
        if let Some(it) = participants.coinbase {
            self.account(it)?;
        }
        Ok(())
    }

    /// An account deployed by the transaction exists with empty code and a
    /// zero nonce, keeping only a balance sent to it beforehand.
    pub fn created(&mut self, address: Address) -> Result<(), StateError> {
        let account = self.account(address)?;
        if !account.code.is_empty() || !account.nonce.is_zero() {
            debug!(?address, "clearing code and nonce of a created account");
        }
        account.code.clear();
        account.nonce = U256::zero();
        Ok(())
    }

    pub fn observe(&mut self, access: &AccountAccess) -> Result<(), StateError> {
        let AccountAccess { address, kind } = *access;
        match kind {
            Access::BalanceRead | Access::CodeRead | Access::NonceRead => {
                self.account(address)?;
            }
            Access::StorageRead { key } | Access::StorageWrite { key, .. } => {
                self.slot(address, key)?;
            }
        }
        Ok(())
    }

    pub fn observe_all<'b>(
        &mut self,
        accesses: impl IntoIterator<Item = &'b AccountAccess>,
    ) -> Result<(), StateError> {
        accesses.into_iter().try_for_each(|it| self.observe(it))
    }

    pub fn finish(self) -> PreState {
        let it = PreState(self.accounts);
        debug!(accounts = it.len(), slots = it.slot_count(), "built pre-state");
        it
    }

    fn account(&mut self, address: Address) -> Result<&mut AccountState, StateError> {
        use std::collections::btree_map::Entry;

        match self.accounts.entry(address) {
            Entry::Occupied(it) => Ok(it.into_mut()),
            Entry::Vacant(it) => {
                let AccountInfo {
                    balance,
                    nonce,
                    code,
                } = self.provider.account(address).map_err(|e| {
                    StateError::IncompleteAccount {
                        address,
                        source: e.into(),
                    }
                })?;
                let account = it.insert(AccountState {
                    balance,
                    nonce,
                    code,
                    storage: BTreeMap::new(),
                });
                trace!(?address, code_hash = ?account.code_hash(), "seeded account");
                Ok(account)
            }
        }
    }

    fn slot(&mut self, address: Address, key: H256) -> Result<(), StateError> {
        let provider = self.provider;
        let account = self.account(address)?;
        if account.storage.contains_key(&key) {
            return Ok(());
        }
        let value = provider
            .storage(address, key)
            .map_err(|e| StateError::IncompleteStorage {
                address,
                key,
                source: e.into(),
            })?;
        trace!(?address, ?key, "seeded slot");
        account.storage.insert(key, value);
        Ok(())
    }
}

/// Build the pre-state for one transaction in one go.
pub fn build<'a, P: StateProvider + ?Sized>(
    provider: &P,
    participants: &Participants,
    accesses: impl IntoIterator<Item = &'a AccountAccess>,
) -> Result<PreState, StateError> {
    let mut builder = PreStateBuilder::new(provider);
    builder.participants(participants)?;
    builder.observe_all(accesses)?;
    Ok(builder.finish())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(n: u64) -> Address {
        Address::from_low_u64_be(n)
    }

    fn dump() -> PreState {
        let mut state = BTreeMap::new();
        for n in [1, 2, 3] {
            state.insert(
                addr(n),
                AccountState {
                    balance: U256::from(n * 100),
                    nonce: U256::from(n),
                    code: vec![0x60; n as usize - 1],
                    storage: BTreeMap::from([(H256::from_low_u64_be(1), H256::from_low_u64_be(n))]),
                },
            );
        }
        PreState(state)
    }

    #[test]
    fn serialized_layout() {
        let mut pre = PreState::default();
        pre.0.insert(
            addr(1),
            AccountState {
                balance: U256::from(0x10),
                nonce: U256::zero(),
                code: vec![0x60, 0x80],
                storage: BTreeMap::from([(H256::zero(), H256::from_low_u64_be(1))]),
            },
        );
        let json = serde_json::to_value(&pre).unwrap();
        let account = &json["0x0000000000000000000000000000000000000001"];
        assert_eq!(account["balance"], "0x10");
        assert_eq!(account["nonce"], "0x0");
        assert_eq!(account["code"], "0x6080");
        assert_eq!(
            account["storage"]["0x0000000000000000000000000000000000000000000000000000000000000000"],
            "0x0000000000000000000000000000000000000000000000000000000000000001"
        );
    }

    #[test]
    fn created_account_keeps_only_balance() {
        let state = dump();
        let pre = build(
            &state,
            &Participants {
                sender: addr(1),
                target: Target::Create(addr(3)),
                coinbase: None,
            },
            [],
        )
        .unwrap();
        let created = pre.get(&addr(3)).unwrap();
        assert_eq!(created.balance, U256::from(300));
        assert!(created.nonce.is_zero());
        assert!(created.code.is_empty());
        assert!(created.storage.is_empty());
    }

    #[test]
    fn balance_access_has_no_storage() {
        let state = dump();
        let pre = build(
            &state,
            &Participants {
                sender: addr(1),
                target: Target::Call(addr(2)),
                coinbase: None,
            },
            &[AccountAccess::new(addr(3), Access::BalanceRead)],
        )
        .unwrap();
        assert_eq!(pre.len(), 3);
        assert_eq!(pre.slot_count(), 0);
    }

    #[test]
    fn missing_account_is_incomplete_state() {
        let state = dump();
        let err = build(
            &state,
            &Participants {
                sender: addr(1),
                target: Target::Call(addr(2)),
                coinbase: None,
            },
            &[AccountAccess::new(
                addr(9),
                Access::StorageRead {
                    key: H256::zero(),
                },
            )],
        )
        .unwrap_err();
        assert!(err.is_incomplete_state());
        assert!(matches!(err, StateError::IncompleteAccount { address, .. } if address == addr(9)));
    }

    #[test]
    fn code_hash() {
        assert_eq!(AccountState::default().code_hash(), EMPTY_CODE_HASH);
        let account = AccountState {
            code: vec![0x60, 0x00],
            ..Default::default()
        };
        assert_eq!(account.code_hash(), keccak([0x60_u8, 0x00]));
    }
}
