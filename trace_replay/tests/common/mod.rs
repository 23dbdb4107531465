#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};

use ethereum_types::{Address, H256, U256};
use trace_replay::prestate::{AccountInfo, AccountState, PreState, StateProvider};
use trace_replay::StepRecord;

/// A depth-1 step with everything but the opcode and stack zeroed.
pub fn step(op: u8, stack: &[u64]) -> StepRecord {
    StepRecord {
        pc: 0,
        op,
        gas: 0,
        gas_cost: 0,
        mem_size: 0,
        stack: stack.iter().copied().map(U256::from).collect(),
        depth: 1,
        refund: 0,
    }
}

pub trait StepExt: Sized {
    fn pc(self, pc: u64) -> Self;
    fn depth(self, depth: u64) -> Self;
    fn gas(self, gas: u64, gas_cost: u64) -> Self;
}

impl StepExt for StepRecord {
    fn pc(mut self, pc: u64) -> Self {
        self.pc = pc;
        self
    }
    fn depth(mut self, depth: u64) -> Self {
        self.depth = depth;
        self
    }
    fn gas(mut self, gas: u64, gas_cost: u64) -> Self {
        self.gas = gas;
        self.gas_cost = gas_cost;
        self
    }
}

pub fn slot(n: u64) -> H256 {
    H256::from_low_u64_be(n)
}

pub fn account(balance: u64, nonce: u64, storage: impl IntoIterator<Item = (u64, u64)>) -> AccountState {
    AccountState {
        balance: U256::from(balance),
        nonce: U256::from(nonce),
        code: vec![],
        storage: storage.into_iter().map(|(k, v)| (slot(k), slot(v))).collect(),
    }
}

/// Answers from a [`PreState`], counting every lookup and refusing the
/// addresses in `broken`.
#[derive(Debug, Default)]
pub struct CountingProvider {
    pub state: PreState,
    pub broken: BTreeSet<Address>,
    pub account_lookups: RefCell<BTreeMap<Address, usize>>,
    pub slot_lookups: RefCell<BTreeMap<(Address, H256), usize>>,
}

impl CountingProvider {
    pub fn new(state: impl IntoIterator<Item = (Address, AccountState)>) -> Self {
        Self {
            state: PreState(state.into_iter().collect()),
            ..Default::default()
        }
    }

    pub fn breaking(mut self, address: Address) -> Self {
        self.broken.insert(address);
        self
    }
}

impl StateProvider for CountingProvider {
    fn account(&self, address: Address) -> anyhow::Result<AccountInfo> {
        *self.account_lookups.borrow_mut().entry(address).or_default() += 1;
        anyhow::ensure!(!self.broken.contains(&address), "connection reset");
        self.state.account(address)
    }

    fn storage(&self, address: Address, key: H256) -> anyhow::Result<H256> {
        *self.slot_lookups.borrow_mut().entry((address, key)).or_default() += 1;
        anyhow::ensure!(!self.broken.contains(&address), "connection reset");
        self.state.storage(address, key)
    }
}

/// Store the address next to its hash for reference when debugging
macro_rules! characters {
    ($($name:ident = $addr:literal ($hash:literal);)*) => {
        $(
            pub const $name: ethereum_types::Address = ethereum_types::H160(hex_literal::hex!($addr));
        )*

        mod test_character_hashes {
            $(
                #[test]
                #[allow(non_snake_case)]
                fn $name() {
                    assert_eq!(
                        keccak_hash::keccak(super::$name),
                        ethereum_types::H256(hex_literal::hex!($hash))
                    )
                }
            )*
        }
    };
}

// Well known addresses for use in tests
characters! {
    ALICE   = "00000000000000000000000000000000000a11ce" ("98934450b0a9aefe4c16aba331967de160f1b92f655dbf45675997ac0ef2bcf3");
    BOB     = "0000000000000000000000000000000000000b0b" ("3034df95d8f0ea7db7ab950e22fc977fa82ae80174df73ee1c75c24246b96df3");
    CHARLIE = "000000000000000000000000000000000c44271e" ("82c4b3e30ae93f236e06c03afe07f4c69f1aa9d4bac5bb3f4731810828003f97");
}
