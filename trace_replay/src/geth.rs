//! Geth (and Erigon) `debug_traceTransaction` struct logs.

use evm_replay_common::opcode;
use serde::{Deserialize, Deserializer};

use crate::error::{MalformedTrace, StepError};
use crate::normalize::{self, parse_stack, required, Radix, RawStep, RawWord};
use crate::StepRecord;

/// The default tracer's result frame.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GethFrame {
    #[serde(default)]
    pub failed: bool,
    #[serde(default)]
    pub gas: u64,
    #[serde(default)]
    pub struct_logs: Vec<StructLogStep>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StructLogStep {
    pub pc: Option<u64>,
    /// A mnemonic such as `"PUSH1"`.
    pub op: Option<String>,
    #[serde(default)]
    pub gas: Option<u64>,
    #[serde(default)]
    pub gas_cost: Option<u64>,
    #[serde(default)]
    pub depth: Option<u64>,
    #[serde(default, deserialize_with = "error")]
    pub error: Option<String>,
    #[serde(default)]
    pub stack: Option<Vec<RawWord>>,
    /// 32-byte words.
    #[serde(default)]
    pub memory: Option<Vec<String>>,
    #[serde(default)]
    pub mem_size: Option<u64>,
    #[serde(default)]
    pub refund: Option<u64>,
}

/// The `error` field is a `string` in `geth` but an `object` in `erigon`.
fn error<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Error {
        String(String),
        #[allow(dead_code)]
        Object(serde_json::Map<String, serde_json::Value>),
    }
    Ok(match Option::<Error>::deserialize(d)? {
        Some(Error::String(it)) => Some(it),
        Some(Error::Object(_)) | None => None,
    })
}

impl RawStep for StructLogStep {
    fn normalize(&self) -> Result<StepRecord, StepError> {
        let pc = required("pc", self.pc)?;
        let name = required("op", self.op.as_deref())?;
        let op = opcode::from_mnemonic(name)
            .ok_or_else(|| StepError::UnknownOpcode(name.to_owned()))?;
        let mem_size = match (self.mem_size, &self.memory) {
            (Some(size), _) => size,
            (None, Some(words)) => words.len() as u64 * 32,
            (None, None) => 0,
        };
        Ok(StepRecord {
            pc,
            op,
            gas: self.gas.unwrap_or_default(),
            gas_cost: self.gas_cost.unwrap_or_default(),
            mem_size,
            // older clients pad every word to 64 hex digits without a prefix
            stack: parse_stack(self.stack.as_deref(), Radix::Hex)?,
            depth: self.depth.unwrap_or(1),
            refund: self.refund.unwrap_or_default(),
        })
    }
}

/// Accepts either a bare `structLogs` array or the whole [`GethFrame`].
pub fn parse(input: &str) -> Result<Vec<StructLogStep>, MalformedTrace> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Doc {
        Frame(GethFrame),
        Logs(Vec<StructLogStep>),
    }
    match serde_json::from_str(input) {
        Ok(Doc::Frame(frame)) => Ok(frame.struct_logs),
        Ok(Doc::Logs(logs)) => Ok(logs),
        Err(e) => Err(MalformedTrace::Unparseable {
            line: e.line(),
            reason: e.to_string(),
        }),
    }
}

/// [`parse`] followed by [`normalize::normalize_trace`].
pub fn normalize_document(input: &str) -> Result<Vec<StepRecord>, MalformedTrace> {
    normalize::normalize_trace(parse(input)?)
}
