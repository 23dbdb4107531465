mod common;

use assert2::check;
use common::{step, StepExt as _};
use evm_replay_common::opcode;
use trace_replay::{compare, CompareConfig, ExclusionScope, Field, FieldValue, StepRecord};

/// A call into a nested frame and back, with the steps around the return
/// carrying gas values.
fn nested_call() -> Vec<StepRecord> {
    vec![
        step(opcode::PUSH1, &[]).pc(0).gas(1000, 3),
        step(opcode::CALL, &[0, 0, 0, 0, 0, 0xb0b, 0x64]).pc(2).gas(997, 100),
        step(opcode::PUSH1, &[]).depth(2).gas(90, 3),
        step(opcode::RETURN, &[0, 0]).pc(2).depth(2).gas(87, 0),
        step(opcode::ADD, &[1, 1]).pc(3).gas(984, 3),
        step(opcode::PUSH1, &[2]).pc(4).gas(981, 3),
    ]
}

#[test]
fn self_comparison() {
    for trace in [nested_call(), nested_call()[..1].to_vec(), vec![step(0xfe, &[])]] {
        let report = compare(&trace, &trace, &CompareConfig::default());
        check!(report.success);
        check!(report.mismatches.is_empty());
        check!(report.mismatch_count == 0);
        check!(report.excluded_mismatches == 0);
        check!(report.total_steps == trace.len());
    }
}

#[test]
fn exclusion_tolerance() {
    let reference = nested_call();
    let mut candidate = nested_call();
    // the step after the return, and the returning step
    candidate[4].gas = 87;
    candidate[3].gas_cost = 897;

    let strict = compare(&reference, &candidate, &CompareConfig::default());
    check!(!strict.success);
    check!(
        strict
            .mismatches
            .iter()
            .map(|it| (it.index, it.field))
            .collect::<Vec<_>>()
            == [(3, Field::GasCost), (4, Field::Gas)]
    );

    for scope in [ExclusionScope::Everywhere, ExclusionScope::AfterCallReturn] {
        let tolerant = compare(
            &reference,
            &candidate,
            &CompareConfig::default().exclude_gas(scope),
        );
        check!(tolerant.success);
        check!(tolerant.excluded_mismatches == 2);
        check!(tolerant.mismatches.is_empty());
    }
}

#[test]
fn scoped_exclusion_still_catches_other_gas_divergence() {
    let reference = nested_call();
    let mut candidate = nested_call();
    candidate[0].gas_cost = 4;
    let report = compare(
        &reference,
        &candidate,
        &CompareConfig::default().exclude_gas(ExclusionScope::AfterCallReturn),
    );
    check!(!report.success);
    check!(report.mismatch_count == 1);
    check!(report.mismatches[0].expected == FieldValue::Quantity(3));
    check!(report.mismatches[0].actual == FieldValue::Quantity(4));
}

#[test]
fn length_mismatch_is_reported_once() {
    let reference = nested_call();
    let candidate = &reference[..4];
    let report = compare(&reference, candidate, &CompareConfig::default());
    check!(report.total_steps == 4);
    check!(report.mismatch_count == 0);
    check!(!report.success);
    let length = report.length_mismatch.unwrap();
    check!((length.reference, length.candidate) == (6, 4));
}

#[test]
fn does_not_stop_at_first_divergence() {
    let reference = nested_call();
    let mut candidate = nested_call();
    candidate[1].pc = 9;
    candidate[5].stack.clear();
    candidate[5].op = opcode::ADD;
    let report = compare(&reference, &candidate, &CompareConfig::default());
    check!(
        report
            .mismatches
            .iter()
            .map(|it| (it.index, it.field))
            .collect::<Vec<_>>()
            == [(1, Field::Pc), (5, Field::Op), (5, Field::Stack)]
    );
}

#[test]
fn only_configured_fields() {
    let reference = nested_call();
    let mut candidate = nested_call();
    candidate[0].refund = 10;
    candidate[2].gas = 0;
    check!(compare(&reference, &candidate, &CompareConfig::default()).mismatch_count == 1);
    let no_gas = CompareConfig::default().with_fields([Field::Pc, Field::Op, Field::Stack, Field::Depth]);
    check!(compare(&reference, &candidate, &no_gas).success);
    let with_refund = no_gas.with_fields(Field::ALL);
    check!(compare(&reference, &candidate, &with_refund).mismatch_count == 2);
}
