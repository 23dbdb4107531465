//! EIP-3155 JSON lines, as emitted by `evm t8n --trace` and friends.
//!
//! ```json
//! {"pc":0,"op":96,"gas":"0x89f5","gasCost":"0x3","memSize":0,"stack":[],"depth":1,"refund":0,"opName":"PUSH1"}
//! ```

use evm_replay_common::quantity;
use serde::Deserialize;

use crate::error::{MalformedTrace, StepError};
use crate::normalize::{self, opcode_from_int, parse_stack, required, Radix, RawStep, RawWord};
use crate::StepRecord;

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Eip3155Step {
    #[serde(default, with = "quantity::option")]
    pub pc: Option<u64>,
    #[serde(default, with = "quantity::option")]
    pub op: Option<u64>,
    #[serde(default, with = "quantity::option")]
    pub gas: Option<u64>,
    #[serde(default, with = "quantity::option")]
    pub gas_cost: Option<u64>,
    #[serde(default, with = "quantity::option")]
    pub mem_size: Option<u64>,
    #[serde(default)]
    pub stack: Option<Vec<RawWord>>,
    #[serde(default, with = "quantity::option")]
    pub depth: Option<u64>,
    #[serde(default, with = "quantity::option")]
    pub refund: Option<u64>,
}

impl Eip3155Step {
    /// Tracers append a summary object (`output`, `gasUsed`, ...) after the
    /// last step. It has neither a program counter nor an opcode.
    fn is_summary(&self) -> bool {
        self.pc.is_none() && self.op.is_none()
    }
}

impl RawStep for Eip3155Step {
    fn normalize(&self) -> Result<StepRecord, StepError> {
        Ok(StepRecord {
            pc: required("pc", self.pc)?,
            op: opcode_from_int(required("op", self.op)?)?,
            gas: self.gas.unwrap_or_default(),
            gas_cost: self.gas_cost.unwrap_or_default(),
            mem_size: self.mem_size.unwrap_or_default(),
            stack: parse_stack(self.stack.as_deref(), Radix::Hex)?,
            depth: self.depth.unwrap_or(1),
            refund: self.refund.unwrap_or_default(),
        })
    }
}

/// Parse a JSON-lines trace, dropping blank lines and the trailing summary
/// object.
pub fn parse_jsonl(input: &str) -> Result<Vec<Eip3155Step>, MalformedTrace> {
    let mut steps = vec![];
    for (ix, line) in input.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let step = serde_json::from_str::<Eip3155Step>(line).map_err(|e| {
            MalformedTrace::Unparseable {
                line: ix + 1,
                reason: e.to_string(),
            }
        })?;
        if !step.is_summary() {
            steps.push(step)
        }
    }
    Ok(steps)
}

/// [`parse_jsonl`] followed by [`normalize::normalize_trace`].
pub fn normalize_jsonl(input: &str) -> Result<Vec<StepRecord>, MalformedTrace> {
    normalize::normalize_trace(parse_jsonl(input)?)
}

#[cfg(test)]
mod tests {
    use ethereum_types::U256;

    use super::*;

    const TRACE: &str = r#"
{"pc":0,"op":96,"gas":"0x89f5","gasCost":"0x3","memSize":0,"stack":[],"depth":1,"refund":0,"opName":"PUSH1"}
{"pc":2,"op":96,"gas":"0x89f2","gasCost":"0x3","memSize":0,"stack":["0x80"],"depth":1,"refund":0,"opName":"PUSH1"}
{"pc":4,"op":1,"gas":35311,"gasCost":3,"memSize":0,"stack":["0x80","0x0000000000000040"],"depth":1,"refund":0,"opName":"ADD"}
{"output":"","gasUsed":"0x9","time":1000}
"#;

    #[test]
    fn normalizes_and_drops_summary() {
        let steps = normalize_jsonl(TRACE).unwrap();
        assert_eq!(steps.len(), 3);
        assert_eq!(steps[0].gas, 0x89f5);
        assert_eq!(steps[2].gas, 35311);
        assert_eq!(steps[2].gas_cost, 3);
        assert_eq!(steps[2].stack, vec![U256::from(0x80), U256::from(0x40)]);
    }

    #[test]
    fn normalization_is_byte_identical() {
        let once = normalize_jsonl(TRACE).unwrap();
        let twice = normalize_jsonl(TRACE).unwrap();
        assert_eq!(
            serde_json::to_vec(&once).unwrap(),
            serde_json::to_vec(&twice).unwrap()
        );
    }

    #[test]
    fn encodings_converge() {
        let native = r#"{"pc":2,"op":96,"gas":35314,"stack":["0x80"]}"#;
        let hex = r#"{"pc":"0x2","op":"0x60","gas":"0x89f2","stack":["0x0000000000000000000000000000000000000000000000000000000000000080"]}"#;
        let native = serde_json::from_str::<Eip3155Step>(native).unwrap();
        let hex = serde_json::from_str::<Eip3155Step>(hex).unwrap();
        assert_eq!(native.normalize(), hex.normalize());
    }

    #[test]
    fn missing_opcode_is_an_error() {
        let err = normalize_jsonl(r#"{"pc":0,"gas":"0x10"}"#).unwrap_err();
        assert_eq!(
            err,
            MalformedTrace::Step {
                index: 0,
                source: StepError::MissingField("op")
            }
        );
    }

    #[test]
    fn opcode_out_of_range() {
        let step = Eip3155Step {
            pc: Some(0),
            op: Some(256),
            ..Default::default()
        };
        assert!(matches!(
            step.normalize(),
            Err(StepError::InvalidValue { field: "op", .. })
        ));
    }
}
