//! Foundry's call-trace arena, as printed by `cast run --json`.
//!
//! The arena is a flattened call tree: every node holds the steps executed
//! in its own frame, and `children` lists the frames it opened, in order.
//! Unlike the other producers, every step knows the contract it executes in.

use std::collections::HashMap;

use ethereum_types::{Address, U256};
use evm_replay_common::opcode;
use serde::Deserialize;
use tracing::debug;

use crate::error::{MalformedTrace, StepError};
use crate::normalize::{check_depth_transitions, opcode_from_int, parse_stack, required, Radix, RawStep, RawWord};
use crate::StepRecord;

#[derive(Clone, Debug, Default, Deserialize)]
pub struct ArenaNode {
    #[serde(default)]
    pub idx: usize,
    #[serde(default)]
    pub children: Vec<usize>,
    pub trace: Option<CallTrace>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct CallTrace {
    #[serde(default)]
    pub address: Address,
    #[serde(default)]
    pub caller: Address,
    #[serde(default, with = "evm_replay_common::hex")]
    pub data: Vec<u8>,
    #[serde(default, with = "evm_replay_common::hex")]
    pub output: Vec<u8>,
    #[serde(default)]
    pub steps: Vec<ArenaStep>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct ArenaStep {
    pub pc: Option<u64>,
    pub op: Option<u64>,
    #[serde(default)]
    pub gas_remaining: Option<u64>,
    #[serde(default)]
    pub gas_cost: Option<u64>,
    #[serde(default)]
    pub depth: Option<u64>,
    #[serde(default)]
    pub stack: Option<Vec<RawWord>>,
    /// `0x`-prefixed hex blob of the whole memory.
    #[serde(default)]
    pub memory: Option<String>,
    #[serde(default)]
    pub refund: Option<u64>,
    #[serde(default)]
    pub contract: Option<Address>,
}

impl RawStep for ArenaStep {
    fn normalize(&self) -> Result<StepRecord, StepError> {
        let mem_size = match self.memory.as_deref().map(str::trim) {
            Some(blob) => {
                let digits = blob.strip_prefix("0x").unwrap_or(blob);
                if digits.len() % 2 != 0 {
                    return Err(StepError::invalid("memory", blob));
                }
                digits.len() as u64 / 2
            }
            None => 0,
        };
        Ok(StepRecord {
            pc: required("pc", self.pc)?,
            op: opcode_from_int(required("op", self.op)?)?,
            gas: self.gas_remaining.unwrap_or_default(),
            gas_cost: self.gas_cost.unwrap_or_default(),
            mem_size,
            stack: parse_stack(self.stack.as_deref(), Radix::Hex)?,
            depth: self.depth.unwrap_or(1),
            refund: self.refund.unwrap_or_default(),
        })
    }
}

/// Accepts the whole `cast run --json` document or just its `arena` array.
pub fn parse(input: &str) -> Result<Vec<ArenaNode>, MalformedTrace> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Doc {
        Run { arena: Vec<ArenaNode> },
        Arena(Vec<ArenaNode>),
    }
    match serde_json::from_str(input) {
        Ok(Doc::Run { arena } | Doc::Arena(arena)) => Ok(arena),
        Err(e) => Err(MalformedTrace::Unparseable {
            line: e.line(),
            reason: e.to_string(),
        }),
    }
}

/// Walk the arena in execution order, pairing every step with the contract
/// executing it.
///
/// A frame's children are entered one at a time, each right after the next
/// `CALL`/`CREATE`-family step of the parent.
pub fn linearize(nodes: &[ArenaNode]) -> Vec<(Address, &ArenaStep)> {
    fn walk<'a>(nodes: &'a [ArenaNode], ix: usize, out: &mut Vec<(Address, &'a ArenaStep)>) {
        let Some(node) = nodes.get(ix) else {
            debug!(ix, "arena refers to a missing node");
            return;
        };
        let Some(trace) = &node.trace else { return };
        let mut children = node.children.iter();
        for step in &trace.steps {
            out.push((step.contract.unwrap_or(trace.address), step));
            if step.op.is_some_and(|op| op <= 0xff && opcode::opens_frame(op as u8)) {
                if let Some(&child) = children.next() {
                    walk(nodes, child, out)
                }
            }
        }
        let left = children.count();
        if left != 0 {
            debug!(ix, left, "frames not entered from any step");
        }
    }

    let mut out = vec![];
    if !nodes.is_empty() {
        walk(nodes, 0, &mut out);
    }
    out
}

/// Normalize the arena in execution order. See [`linearize`].
pub fn normalize_arena(nodes: &[ArenaNode]) -> Result<Vec<(Address, StepRecord)>, MalformedTrace> {
    let steps = linearize(nodes)
        .into_iter()
        .enumerate()
        .map(|(index, (contract, step))| match step.normalize() {
            Ok(it) => Ok((contract, it)),
            Err(source) => Err(MalformedTrace::Step { index, source }),
        })
        .collect::<Result<Vec<_>, _>>()?;
    check_depth_transitions(&steps.iter().map(|(_, it)| it).collect::<Vec<_>>())?;
    Ok(steps)
}

/// `(call data, return data)` sizes in bytes, one pair per frame.
pub fn call_sizes(nodes: &[ArenaNode]) -> impl Iterator<Item = (usize, usize)> + '_ {
    nodes
        .iter()
        .filter_map(|it| it.trace.as_ref())
        .map(|it| (it.data.len(), it.output.len()))
}

/// Remaining gas and gas cost as recorded in the arena, looked up by
/// `(depth, pc, opcode, stack)`.
#[derive(Clone, Debug, Default)]
pub struct GasOracle {
    entries: HashMap<(u64, u64, u8, Vec<U256>), (u64, u64)>,
}

impl GasOracle {
    /// Steps that cannot be normalized are left out.
    pub fn from_arena(nodes: &[ArenaNode]) -> Self {
        let mut entries = HashMap::new();
        for step in nodes
            .iter()
            .filter_map(|it| it.trace.as_ref())
            .flat_map(|it| &it.steps)
        {
            match step.normalize() {
                Ok(it) => {
                    entries.insert((it.depth, it.pc, it.op, it.stack), (it.gas, it.gas_cost));
                }
                Err(e) => debug!(%e, "skipping arena step"),
            }
        }
        Self { entries }
    }

    fn lookup(&self, step: &StepRecord) -> Option<(u64, u64)> {
        self.entries
            .get(&(step.depth, step.pc, step.op, step.stack.clone()))
            .copied()
    }

    pub fn gas(&self, step: &StepRecord) -> Option<u64> {
        self.lookup(step).map(|(gas, _)| gas)
    }

    pub fn gas_cost(&self, step: &StepRecord) -> Option<u64> {
        self.lookup(step).map(|(_, cost)| cost)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RUN: &str = r#"{
      "arena": [
        {
          "idx": 0,
          "children": [1],
          "trace": {
            "address": "0x00000000000000000000000000000000000000aa",
            "caller": "0x00000000000000000000000000000000000000cc",
            "data": "0x12345678",
            "output": "0x",
            "steps": [
              {"pc": 0, "op": 241, "gas_remaining": 1000, "gas_cost": 100, "depth": 1,
               "stack": ["0x0", "0x0", "0x0", "0x0", "0x0", "0xbb", "0x64"], "memory": "0x"},
              {"pc": 1, "op": 0, "gas_remaining": 880, "gas_cost": 0, "depth": 1,
               "stack": ["0x1"], "memory": "0x0000000000000000000000000000000000000000000000000000000000000000"}
            ]
          }
        },
        {
          "idx": 1,
          "trace": {
            "address": "0x00000000000000000000000000000000000000bb",
            "caller": "0x00000000000000000000000000000000000000aa",
            "data": "0x",
            "output": "0xabcd",
            "steps": [
              {"pc": 0, "op": 0, "gas_remaining": 50, "gas_cost": 0, "depth": 2, "stack": []}
            ]
          }
        }
      ]
    }"#;

    #[test]
    fn execution_order_and_attribution() {
        let nodes = parse(RUN).unwrap();
        let steps = normalize_arena(&nodes).unwrap();
        let shape = steps
            .iter()
            .map(|(addr, it)| (addr.to_low_u64_be(), it.pc, it.depth))
            .collect::<Vec<_>>();
        assert_eq!(shape, vec![(0xaa, 0, 1), (0xbb, 0, 2), (0xaa, 1, 1)]);
        assert_eq!(steps[2].1.mem_size, 32);
    }

    #[test]
    fn frame_sizes() {
        let nodes = parse(RUN).unwrap();
        assert_eq!(call_sizes(&nodes).collect::<Vec<_>>(), vec![(4, 0), (0, 2)]);
    }

    #[test]
    fn oracle() {
        let nodes = parse(RUN).unwrap();
        let oracle = GasOracle::from_arena(&nodes);
        assert_eq!(oracle.len(), 3);
        let (_, after_return) = &normalize_arena(&nodes).unwrap()[2];
        assert_eq!(oracle.gas(after_return), Some(880));
        let mut other = after_return.clone();
        other.stack.clear();
        assert_eq!(oracle.gas(&other), None);
    }
}
