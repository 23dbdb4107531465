//! The normalization boundary between producer-specific trace entries and
//! [`StepRecord`].
//!
//! Every producer format gets its own raw entry type implementing
//! [`RawStep`] (see [`crate::eip3155`], [`crate::geth`], [`crate::foundry`]
//! and [`crate::cast`]). Consumers only ever see [`StepRecord`]s.

use std::borrow::Borrow;

use ethereum_types::U256;
use evm_replay_common::opcode;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::error::{MalformedTrace, StepError};
use crate::StepRecord;

/// A producer-specific trace entry.
pub trait RawStep {
    /// Map this entry onto the canonical record.
    ///
    /// Only `pc` and the opcode are mandatory, everything else defaults to
    /// zero (or an empty stack, or depth `1`) when the producer omits it.
    fn normalize(&self) -> Result<StepRecord, StepError>;
}

impl<T: RawStep + ?Sized> RawStep for &T {
    fn normalize(&self) -> Result<StepRecord, StepError> {
        (**self).normalize()
    }
}

/// Normalize every entry of a trace, then check the depth transitions of the
/// result.
///
/// Stops at the first malformed entry.
pub fn normalize_trace<I>(entries: I) -> Result<Vec<StepRecord>, MalformedTrace>
where
    I: IntoIterator,
    I::Item: RawStep,
{
    let steps = entries
        .into_iter()
        .enumerate()
        .map(|(index, entry)| {
            entry
                .normalize()
                .map_err(|source| MalformedTrace::Step { index, source })
        })
        .collect::<Result<Vec<_>, _>>()?;
    check_depth_transitions(&steps)?;
    trace!(steps = steps.len(), "normalized trace");
    Ok(steps)
}

/// Depth starts at `1`, only increases by exactly one right after an
/// instruction that opens a frame, and may drop by any amount.
pub fn check_depth_transitions<S: Borrow<StepRecord>>(steps: &[S]) -> Result<(), MalformedTrace> {
    let mut prev: Option<&StepRecord> = None;
    for (index, step) in steps.iter().map(Borrow::borrow).enumerate() {
        if step.depth == 0 {
            return Err(MalformedTrace::ZeroDepth { index });
        }
        match prev {
            None if step.depth != 1 => {
                return Err(MalformedTrace::InitialDepth {
                    index,
                    depth: step.depth,
                })
            }
            Some(prev) if step.depth > prev.depth => {
                if step.depth != prev.depth + 1 {
                    return Err(MalformedTrace::DepthJump {
                        index,
                        from: prev.depth,
                        to: step.depth,
                    });
                }
                if !opcode::opens_frame(prev.op) {
                    return Err(MalformedTrace::UnexpectedFrame {
                        index,
                        op: prev.op_name(),
                    });
                }
            }
            _ => {}
        }
        prev = Some(step);
    }
    Ok(())
}

/// A stack word as producers emit it: a JSON integer, or a string in some
/// radix, with or without leading zeros.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum RawWord {
    Int(u64),
    Str(String),
}

impl RawWord {
    /// `radix` applies to strings without a `0x` prefix.
    pub(crate) fn parse(&self, radix: Radix) -> Result<U256, StepError> {
        match self {
            RawWord::Int(it) => Ok(U256::from(*it)),
            RawWord::Str(s) => parse_word(s, radix).ok_or_else(|| StepError::invalid("stack", s)),
        }
    }
}

/// How to read digits that carry no `0x` prefix.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Radix {
    Hex,
    Decimal,
}

/// Parse a 256-bit word, ignoring leading zeros.
pub(crate) fn parse_word(s: &str, radix: Radix) -> Option<U256> {
    let s = s.trim();
    let (digits, radix) = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(rest) => (rest, Radix::Hex),
        None => (s, radix),
    };
    let digits = digits.trim_start_matches('0');
    if digits.is_empty() {
        return Some(U256::zero());
    }
    match radix {
        Radix::Hex => U256::from_str_radix(digits, 16).ok(),
        Radix::Decimal => U256::from_dec_str(digits).ok(),
    }
}

pub(crate) fn parse_stack(
    words: Option<&[RawWord]>,
    radix: Radix,
) -> Result<Vec<U256>, StepError> {
    words
        .unwrap_or_default()
        .iter()
        .map(|it| it.parse(radix))
        .collect()
}

pub(crate) fn required<T>(field: &'static str, value: Option<T>) -> Result<T, StepError> {
    value.ok_or(StepError::MissingField(field))
}

pub(crate) fn opcode_from_int(value: u64) -> Result<u8, StepError> {
    u8::try_from(value).map_err(|_| StepError::invalid("op", value))
}
