//! The canonical per-instruction record every producer format is normalized
//! into.

use std::fmt;
use std::io;
use std::str::FromStr;

use ethereum_types::U256;
use evm_replay_common::{opcode, quantity};
use itertools::Itertools as _;
use serde::{Deserialize, Serialize};

/// One EVM execution step, as observed *before* the instruction executes.
///
/// The stack is ordered bottom first, so the top of the stack is the last
/// element.
///
/// Serialization is canonical: the fields are always emitted in the order
/// below, `gas` and `gasCost` as `0x` hex quantities and every stack word as
/// a minimal `0x` hex string, so equal records serialize to identical bytes.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StepRecord {
    /// Program counter.
    pub pc: u64,
    /// Numeric opcode.
    pub op: u8,
    /// Gas remaining before this step.
    #[serde(with = "quantity")]
    pub gas: u64,
    /// Gas charged for this step.
    #[serde(with = "quantity")]
    pub gas_cost: u64,
    /// Memory size in bytes.
    pub mem_size: u64,
    pub stack: Vec<U256>,
    /// Call depth, `1` for the outermost frame.
    pub depth: u64,
    /// Accumulated refund counter.
    pub refund: u64,
}

impl StepRecord {
    /// The word on top of the stack.
    pub fn stack_top(&self) -> Option<U256> {
        self.stack.last().copied()
    }

    /// The `n`th word from the top of the stack, `0` being the top.
    pub fn stack_peek(&self, n: usize) -> Option<U256> {
        self.stack.iter().rev().nth(n).copied()
    }

    /// See [`opcode::name`].
    pub fn op_name(&self) -> String {
        opcode::name(self.op)
    }

    pub fn get(&self, field: Field) -> FieldValue {
        match field {
            Field::Pc => FieldValue::Int(self.pc),
            Field::Op => FieldValue::Int(self.op.into()),
            Field::Gas => FieldValue::Quantity(self.gas),
            Field::GasCost => FieldValue::Quantity(self.gas_cost),
            Field::MemSize => FieldValue::Int(self.mem_size),
            Field::Stack => FieldValue::Stack(self.stack.clone()),
            Field::Depth => FieldValue::Int(self.depth),
            Field::Refund => FieldValue::Int(self.refund),
        }
    }
}

/// Writes one canonical record per line.
pub fn write_jsonl<'a, W: io::Write>(
    mut out: W,
    steps: impl IntoIterator<Item = &'a StepRecord>,
) -> io::Result<()> {
    for step in steps {
        serde_json::to_writer(&mut out, step)?;
        out.write_all(b"\n")?;
    }
    Ok(())
}

/// Reads records written by [`write_jsonl`]. Blank lines are ignored.
pub fn read_jsonl(input: &str) -> anyhow::Result<Vec<StepRecord>> {
    use anyhow::Context as _;

    input
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(ix, line)| {
            serde_json::from_str(line)
                .with_context(|| format!("invalid canonical step on line {}", ix + 1))
        })
        .collect()
}

/// The fields of a [`StepRecord`], named as they are serialized.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Field {
    Pc,
    Op,
    Gas,
    GasCost,
    MemSize,
    Stack,
    Depth,
    Refund,
}

impl Field {
    pub const ALL: [Field; 8] = [
        Field::Pc,
        Field::Op,
        Field::Gas,
        Field::GasCost,
        Field::MemSize,
        Field::Stack,
        Field::Depth,
        Field::Refund,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Field::Pc => "pc",
            Field::Op => "op",
            Field::Gas => "gas",
            Field::GasCost => "gasCost",
            Field::MemSize => "memSize",
            Field::Stack => "stack",
            Field::Depth => "depth",
            Field::Refund => "refund",
        }
    }

    /// `gas` or `gasCost`.
    pub fn is_gas(self) -> bool {
        matches!(self, Field::Gas | Field::GasCost)
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Field {
    type Err = String;

    /// Accepts the serialized names, case-insensitively, and their
    /// `snake_case` spellings.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().replace('_', "").to_ascii_lowercase();
        Field::ALL
            .into_iter()
            .find(|it| it.as_str().to_ascii_lowercase() == wanted)
            .ok_or_else(|| {
                format!(
                    "unknown field {s:?}, expected one of {}",
                    Field::ALL.iter().join(", ")
                )
            })
    }
}

/// The value of a single [`Field`], as reported in a mismatch.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Int(u64),
    Quantity(#[serde(with = "quantity")] u64),
    Stack(Vec<U256>),
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Int(it) => write!(f, "{it}"),
            FieldValue::Quantity(it) => write!(f, "{it:#x}"),
            FieldValue::Stack(words) => {
                write!(f, "[{}]", words.iter().map(|w| format!("{w:#x}")).join(", "))
            }
        }
    }
}
