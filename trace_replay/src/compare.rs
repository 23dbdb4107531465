//! Differential comparison of two canonical traces.
//!
//! Traces are compared step by step over their common prefix. Nothing here
//! fails: every difference ends up in the [`MatchReport`].

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::step::{Field, FieldValue};
use crate::StepRecord;

/// Where an excluded field's mismatches are tolerated.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExclusionScope {
    #[default]
    Everywhere,
    /// Only on an instruction that returns from a frame, and on the first
    /// instruction after it, in either trace.
    AfterCallReturn,
}

impl FromStr for ExclusionScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "everywhere" => Ok(Self::Everywhere),
            "after-call-return" => Ok(Self::AfterCallReturn),
            other => Err(format!(
                "unknown exclusion scope {other:?}, expected `everywhere` or `after-call-return`"
            )),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct CompareConfig {
    pub fields: BTreeSet<Field>,
    /// Excluded fields are still compared, but their mismatches are only
    /// counted, see [`MatchReport::excluded_mismatches`]. Excluding a field
    /// outside [`Self::fields`] has no effect.
    pub excluded: BTreeMap<Field, ExclusionScope>,
    /// List at most this many mismatches. All of them are always counted.
    pub report_limit: Option<usize>,
}

impl Default for CompareConfig {
    fn default() -> Self {
        Self {
            fields: BTreeSet::from([
                Field::Pc,
                Field::Op,
                Field::Gas,
                Field::GasCost,
                Field::Stack,
                Field::Depth,
            ]),
            excluded: BTreeMap::new(),
            report_limit: None,
        }
    }
}

impl CompareConfig {
    pub fn with_fields(mut self, fields: impl IntoIterator<Item = Field>) -> Self {
        self.fields = fields.into_iter().collect();
        self
    }

    pub fn exclude(mut self, field: Field, scope: ExclusionScope) -> Self {
        self.excluded.insert(field, scope);
        self
    }

    /// Tolerate `gas` and `gasCost` mismatches in `scope`.
    pub fn exclude_gas(self, scope: ExclusionScope) -> Self {
        self.exclude(Field::Gas, scope)
            .exclude(Field::GasCost, scope)
    }

    pub fn with_report_limit(mut self, limit: usize) -> Self {
        self.report_limit = Some(limit);
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct FieldMismatch {
    pub index: usize,
    pub field: Field,
    pub expected: FieldValue,
    pub actual: FieldValue,
}

impl fmt::Display for FieldMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "step {}: {} expected {} but got {}",
            self.index, self.field, self.expected, self.actual
        )
    }
}

/// The traces have different step counts.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct LengthMismatch {
    pub reference: usize,
    pub candidate: usize,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct MatchReport {
    /// Steps compared, the length of the common prefix.
    pub total_steps: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length_mismatch: Option<LengthMismatch>,
    /// Every non-excluded mismatch, listed or not.
    pub mismatch_count: usize,
    /// In step order, truncated to [`CompareConfig::report_limit`].
    pub mismatches: Vec<FieldMismatch>,
    pub excluded_mismatches: usize,
    /// No non-excluded mismatch, and equal lengths.
    pub success: bool,
}

impl fmt::Display for MatchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{}: {} steps compared, {} mismatches, {} excluded",
            if self.success { "MATCH" } else { "MISMATCH" },
            self.total_steps,
            self.mismatch_count,
            self.excluded_mismatches
        )?;
        if let Some(LengthMismatch {
            reference,
            candidate,
        }) = self.length_mismatch
        {
            writeln!(
                f,
                "length differs: reference has {reference} steps, candidate has {candidate}"
            )?;
        }
        for it in &self.mismatches {
            writeln!(f, "  {it}")?;
        }
        if self.mismatches.len() < self.mismatch_count {
            writeln!(
                f,
                "  ... and {} more",
                self.mismatch_count - self.mismatches.len()
            )?;
        }
        Ok(())
    }
}

/// Compare `candidate` against `reference`.
pub fn compare(
    reference: &[StepRecord],
    candidate: &[StepRecord],
    config: &CompareConfig,
) -> MatchReport {
    let total_steps = reference.len().min(candidate.len());
    let length_mismatch = (reference.len() != candidate.len()).then_some(LengthMismatch {
        reference: reference.len(),
        candidate: candidate.len(),
    });

    let mut mismatch_count = 0;
    let mut excluded_mismatches = 0;
    let mut mismatches = vec![];
    for (index, (expected, actual)) in reference.iter().zip(candidate).enumerate() {
        for &field in &config.fields {
            let (left, right) = (expected.get(field), actual.get(field));
            if left == right {
                continue;
            }
            let tolerated = match config.excluded.get(&field) {
                Some(ExclusionScope::Everywhere) => true,
                Some(ExclusionScope::AfterCallReturn) => {
                    at_return(reference, index) || at_return(candidate, index)
                }
                None => false,
            };
            if tolerated {
                excluded_mismatches += 1;
                continue;
            }
            if mismatch_count == 0 {
                warn!(index, %field, expected = %left, actual = %right, "first mismatch");
            }
            mismatch_count += 1;
            if config.report_limit.map_or(true, |limit| mismatches.len() < limit) {
                mismatches.push(FieldMismatch {
                    index,
                    field,
                    expected: left,
                    actual: right,
                });
            }
        }
    }

    let success = mismatch_count == 0 && length_mismatch.is_none();
    info!(
        total_steps,
        mismatch_count, excluded_mismatches, success, "compared traces"
    );
    MatchReport {
        total_steps,
        length_mismatch,
        mismatch_count,
        mismatches,
        excluded_mismatches,
        success,
    }
}

/// Whether step `ix` returns from a frame, or is the first step after one
/// returned.
fn at_return(steps: &[StepRecord], ix: usize) -> bool {
    let depth = |ix: usize| steps.get(ix).map(|it| it.depth);
    let (Some(here), prev, next) = (depth(ix), ix.checked_sub(1).and_then(depth), depth(ix + 1))
    else {
        return false;
    };
    prev.is_some_and(|prev| here < prev) || next.is_some_and(|next| next < here)
}

#[cfg(test)]
mod tests {
    use ethereum_types::U256;
    use evm_replay_common::opcode;

    use super::*;

    fn step(pc: u64, op: u8, stack: &[u64]) -> StepRecord {
        StepRecord {
            pc,
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
    fn two_pushes() {
        let trace = [step(0, opcode::PUSH1, &[]), step(2, opcode::PUSH1, &[0x80])];
        let report = compare(&trace, &trace.clone(), &CompareConfig::default());
        assert_eq!(report.total_steps, 2);
        assert!(report.mismatches.is_empty());
        assert!(report.success);
    }

    #[test]
    fn stack_depth_is_a_mismatch() {
        let reference = [step(0, opcode::ADD, &[1, 2])];
        let candidate = [step(0, opcode::ADD, &[1, 2, 3])];
        let report = compare(&reference, &candidate, &CompareConfig::default());
        assert_eq!(report.mismatch_count, 1);
        assert_eq!(report.mismatches[0].field, Field::Stack);
        assert!(!report.success);
    }

    #[test]
    fn records_everything_but_lists_up_to_limit() {
        let reference = (0..10).map(|pc| step(pc, opcode::ADD, &[])).collect::<Vec<_>>();
        let candidate = (0..10)
            .map(|pc| step(pc + 1, opcode::ADD, &[]))
            .collect::<Vec<_>>();
        let report = compare(
            &reference,
            &candidate,
            &CompareConfig::default().with_report_limit(3),
        );
        assert_eq!(report.mismatch_count, 10);
        assert_eq!(
            report.mismatches.iter().map(|it| it.index).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
        assert!(report.to_string().contains("and 7 more"));
    }

    #[test]
    fn scope_parsing() {
        assert_eq!(
            "after-call-return".parse::<ExclusionScope>(),
            Ok(ExclusionScope::AfterCallReturn)
        );
        assert!("sometimes".parse::<ExclusionScope>().is_err());
        let config = serde_json::from_str::<CompareConfig>(
            r#"{"excluded": {"gas": "after-call-return"}, "report-limit": 5}"#,
        )
        .unwrap();
        assert_eq!(config.fields, CompareConfig::default().fields);
        assert_eq!(
            config.excluded.get(&Field::Gas),
            Some(&ExclusionScope::AfterCallReturn)
        );
        assert_eq!(config.report_limit, Some(5));
    }

    #[test]
    fn excluding_an_unchecked_field_changes_nothing() {
        let reference = [step(0, opcode::PUSH1, &[]), step(2, opcode::ADD, &[1, 2])];
        let mut candidate = reference.clone();
        candidate[0].refund = 4800;
        let fields = [Field::Pc, Field::Op, Field::Stack, Field::Depth];
        let plain = CompareConfig::default().with_fields(fields);
        for scope in [ExclusionScope::Everywhere, ExclusionScope::AfterCallReturn] {
            let report = compare(
                &reference,
                &candidate,
                &plain.clone().exclude(Field::Refund, scope),
            );
            assert_eq!(report, compare(&reference, &candidate, &plain));
            assert!(report.success);
            assert_eq!((report.mismatch_count, report.excluded_mismatches), (0, 0));
        }
    }

    #[test]
    fn return_boundaries() {
        let mut trace = vec![
            step(0, opcode::CALL, &[]),
            step(0, opcode::RETURN, &[]),
            step(1, opcode::ADD, &[]),
            step(2, opcode::ADD, &[]),
        ];
        trace[1].depth = 2;
        let at = |ix| at_return(&trace, ix);
        assert_eq!((at(0), at(1), at(2), at(3)), (false, true, true, false));
    }
}
