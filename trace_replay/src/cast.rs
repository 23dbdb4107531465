//! Text traces printed by `cast run -t`:
//!
//! ```text
//! depth:1, PC:0, gas:0x89f5(35317), OPCODE: "PUSH1"(96)  refund:0x0(0) Stack:[], Data size:0
//! ```
//!
//! These lines carry no gas cost, and the remaining gas they report for the
//! first instruction after a nested frame returns is wrong. [`convert`]
//! reconstructs both, optionally from a [`GasOracle`].

use ethereum_types::U256;
use tracing::debug;
use winnow::{
    ascii::{dec_uint, digit1, hex_digit1, hex_uint, space0},
    combinator::{alt, delimited, opt, preceded, separated, terminated},
    error::{ContextError, ErrMode, StrContext},
    token::take_till,
    Parser as _,
};

use crate::error::{MalformedTrace, StepError};
use crate::foundry::GasOracle;
use crate::normalize::{check_depth_transitions, opcode_from_int, parse_word, Radix, RawStep};
use crate::StepRecord;

type PResult<T> = Result<T, ErrMode<ContextError>>;

/// One parsed trace line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CastLine {
    pub depth: u64,
    pub pc: u64,
    pub gas: u64,
    pub name: String,
    pub op: u64,
    pub refund: u64,
    /// Bottom first.
    pub stack: Vec<U256>,
    pub data_size: u64,
}

impl RawStep for CastLine {
    /// The gas cost is left at zero, see [`convert`].
    fn normalize(&self) -> Result<StepRecord, StepError> {
        Ok(StepRecord {
            pc: self.pc,
            op: opcode_from_int(self.op)?,
            gas: self.gas,
            gas_cost: 0,
            mem_size: self.data_size,
            stack: self.stack.clone(),
            depth: self.depth,
            refund: self.refund,
        })
    }
}

/// Parse every trace line of `input`.
///
/// Lines that do not start with `depth:` (banners, call traces, logs) are
/// skipped. A line that does but fails to parse is an error.
pub fn parse_text(input: &str) -> Result<Vec<CastLine>, MalformedTrace> {
    input
        .lines()
        .enumerate()
        .filter(|(_, line)| line.trim_start().starts_with("depth:"))
        .map(|(ix, line)| {
            let mut rest = line.trim();
            cast_line(&mut rest).map_err(|e| MalformedTrace::Unparseable {
                line: ix + 1,
                reason: e.to_string(),
            })
        })
        .collect()
}

/// Turn parsed lines into canonical steps.
///
/// `gasCost` is the drop in remaining gas to the following step, `0` for the
/// last one. With an `oracle`, the remaining gas of every step that follows a
/// return, and the gas cost of the returning step itself, come from the
/// oracle wherever it knows the step.
pub fn convert(
    lines: &[CastLine],
    oracle: Option<&GasOracle>,
) -> Result<Vec<StepRecord>, MalformedTrace> {
    let mut steps = lines
        .iter()
        .enumerate()
        .map(|(index, it)| {
            it.normalize()
                .map_err(|source| MalformedTrace::Step { index, source })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let mut corrected = 0usize;
    if let Some(oracle) = oracle {
        for ix in 1..steps.len() {
            if steps[ix].depth < steps[ix - 1].depth {
                if let Some(gas) = oracle.gas(&steps[ix]) {
                    steps[ix].gas = gas;
                    corrected += 1;
                }
            }
        }
    }

    for ix in 0..steps.len() {
        let cost = match steps.get(ix + 1) {
            None => 0,
            Some(next) => {
                let returning = next.depth < steps[ix].depth;
                match oracle.filter(|_| returning).and_then(|it| it.gas_cost(&steps[ix])) {
                    Some(cost) => {
                        corrected += 1;
                        cost
                    }
                    None => steps[ix].gas.saturating_sub(next.gas),
                }
            }
        };
        steps[ix].gas_cost = cost;
    }
    if corrected != 0 {
        debug!(corrected, "took gas from the arena for steps around returns");
    }

    check_depth_transitions(&steps)?;
    Ok(steps)
}

fn cast_line(input: &mut &str) -> PResult<CastLine> {
    let depth = preceded("depth:", dec_uint)
        .context(StrContext::Label("depth"))
        .parse_next(input)?;
    sep(input)?;
    let pc = preceded("PC:", dec_uint)
        .context(StrContext::Label("PC"))
        .parse_next(input)?;
    sep(input)?;
    let gas = preceded("gas:", quantity)
        .context(StrContext::Label("gas"))
        .parse_next(input)?;
    sep(input)?;
    let (name, op) = preceded(
        ("OPCODE:", space0),
        (
            delimited('"', take_till(0.., '"'), '"'),
            delimited('(', dec_uint, ')'),
        ),
    )
    .context(StrContext::Label("OPCODE"))
    .parse_next(input)?;
    sep(input)?;
    let refund = opt(preceded("refund:", quantity)).parse_next(input)?;
    sep(input)?;
    let stack = opt(preceded(
        "Stack:",
        delimited('[', separated(0.., word, (space0, ',', space0)), ']'),
    ))
    .context(StrContext::Label("Stack"))
    .parse_next(input)?;
    sep(input)?;
    let data_size = opt(preceded(("Data size:", space0), dec_uint)).parse_next(input)?;
    Ok(CastLine {
        depth,
        pc,
        gas,
        name: String::from(name),
        op,
        refund: refund.unwrap_or_default(),
        stack: stack.unwrap_or_default(),
        data_size: data_size.unwrap_or_default(),
    })
}

fn sep(input: &mut &str) -> PResult<()> {
    (space0, opt(','), space0).void().parse_next(input)
}

/// `0x89f5(35317)`, the decimal echo being optional.
fn quantity(input: &mut &str) -> PResult<u64> {
    terminated(
        preceded(alt(("0x", "0X")), hex_uint),
        opt(delimited('(', digit1, ')')),
    )
    .parse_next(input)
}

/// Decimal, or `0x` hex.
fn word(input: &mut &str) -> PResult<U256> {
    alt((
        preceded("0x", hex_digit1).verify_map(|it| parse_word(it, Radix::Hex)),
        digit1.verify_map(|it| parse_word(it, Radix::Decimal)),
    ))
    .parse_next(input)
}
