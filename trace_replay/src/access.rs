//! Account and storage touches observed during execution.

use ethereum_types::{Address, BigEndianHash as _, H256, U256};
use evm_replay_common::opcode;
use serde::{Deserialize, Serialize};

use crate::StepRecord;

/// One observed touch of an account.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct AccountAccess {
    pub address: Address,
    #[serde(flatten)]
    pub kind: Access,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Access {
    BalanceRead,
    CodeRead,
    NonceRead,
    StorageRead { key: H256 },
    StorageWrite { key: H256, value: H256 },
}

impl Access {
    /// The slot, for the storage kinds.
    pub fn storage_key(&self) -> Option<H256> {
        match self {
            Access::StorageRead { key } | Access::StorageWrite { key, .. } => Some(*key),
            Access::BalanceRead | Access::CodeRead | Access::NonceRead => None,
        }
    }
}

impl AccountAccess {
    pub fn new(address: Address, kind: Access) -> Self {
        Self { address, kind }
    }
}

/// Derive the access log from steps paired with the contract executing them.
///
/// Every executing contract is code-read, once per stretch of consecutive
/// steps it executes. Call targets are taken from the stack, so targets that
/// do not fit in an address are ignored.
pub fn from_steps<'a>(
    steps: impl IntoIterator<Item = (Address, &'a StepRecord)>,
) -> Vec<AccountAccess> {
    let mut out = vec![];
    let mut executing = None;
    for (contract, step) in steps {
        if executing != Some(contract) {
            out.push(AccountAccess::new(contract, Access::CodeRead));
            executing = Some(contract);
        }
        let (top, second) = (step.stack_top(), step.stack_peek(1));
        let access = match (step.op, top) {
            (opcode::SLOAD, Some(key)) => Some(AccountAccess::new(
                contract,
                Access::StorageRead {
                    key: H256::from_uint(&key),
                },
            )),
            (opcode::SSTORE, Some(key)) => second.map(|value| {
                AccountAccess::new(
                    contract,
                    Access::StorageWrite {
                        key: H256::from_uint(&key),
                        value: H256::from_uint(&value),
                    },
                )
            }),
            (opcode::BALANCE, Some(target)) => {
                as_address(target).map(|it| AccountAccess::new(it, Access::BalanceRead))
            }
            (opcode::SELFBALANCE, _) => Some(AccountAccess::new(contract, Access::BalanceRead)),
            (opcode::EXTCODESIZE | opcode::EXTCODECOPY | opcode::EXTCODEHASH, Some(target)) => {
                as_address(target).map(|it| AccountAccess::new(it, Access::CodeRead))
            }
            (op, _) if opcode::is_call(op) => second
                .and_then(as_address)
                .map(|it| AccountAccess::new(it, Access::CodeRead)),
            _ => None,
        };
        out.extend(access);
    }
    out
}

/// The lower 20 bytes of a stack word, if nothing is set above them.
fn as_address(word: U256) -> Option<Address> {
    if word.bits() > 160 {
        return None;
    }
    Some(Address::from(H256::from_uint(&word)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(op: u8, stack: &[u64]) -> StepRecord {
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

    #[test]
    fn serialized_shape() {
        let it = AccountAccess::new(
            Address::from_low_u64_be(1),
            Access::StorageRead {
                key: H256::from_low_u64_be(2),
            },
        );
        let json = serde_json::to_value(it).unwrap();
        assert_eq!(json["kind"], "storage-read");
        assert_eq!(
            json["key"],
            "0x0000000000000000000000000000000000000000000000000000000000000002"
        );
        assert_eq!(serde_json::from_value::<AccountAccess>(json).unwrap(), it);
    }

    #[test]
    fn derived_from_stack() {
        let me = Address::from_low_u64_be(0xaa);
        let steps = [
            step(opcode::SLOAD, &[7]),
            step(opcode::SSTORE, &[9, 8]),
            step(opcode::BALANCE, &[0xcc]),
            step(opcode::SELFBALANCE, &[]),
            step(opcode::EXTCODEHASH, &[0xdd]),
            step(opcode::STATICCALL, &[0, 0, 0, 0, 0xee, 0x64]),
            step(opcode::ADD, &[1, 2]),
        ];
        let accesses = from_steps(steps.iter().map(|it| (me, it)));
        let addr = Address::from_low_u64_be;
        assert_eq!(
            accesses,
            vec![
                AccountAccess::new(me, Access::CodeRead),
                AccountAccess::new(
                    me,
                    Access::StorageRead {
                        key: H256::from_low_u64_be(7)
                    }
                ),
                AccountAccess::new(
                    me,
                    Access::StorageWrite {
                        key: H256::from_low_u64_be(8),
                        value: H256::from_low_u64_be(9)
                    }
                ),
                AccountAccess::new(addr(0xcc), Access::BalanceRead),
                AccountAccess::new(me, Access::BalanceRead),
                AccountAccess::new(addr(0xdd), Access::CodeRead),
                AccountAccess::new(addr(0xee), Access::CodeRead),
            ]
        );
    }

    #[test]
    fn oversized_call_target_is_ignored() {
        let mut call = step(opcode::CALL, &[]);
        call.stack = vec![U256::MAX, U256::from(0x64)];
        let me = Address::from_low_u64_be(0xaa);
        assert_eq!(from_steps([(me, &call)]).len(), 1);
    }
}
