//! Failures that abort a single transaction's pipeline.
//!
//! Comparator findings are not errors: see [`crate::compare::MatchReport`].

use ethereum_types::{Address, H256};
use thiserror::Error;

/// Boxed cause reported by a [`crate::prestate::StateProvider`].
pub type ProviderError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// A single raw entry could not be turned into a [`crate::StepRecord`].
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum StepError {
    #[error("missing mandatory field `{0}`")]
    MissingField(&'static str),
    #[error("invalid value {value:?} for field `{field}`")]
    InvalidValue { field: &'static str, value: String },
    #[error("unknown opcode mnemonic {0:?}")]
    UnknownOpcode(String),
}

impl StepError {
    pub(crate) fn invalid(field: &'static str, value: impl ToString) -> Self {
        Self::InvalidValue {
            field,
            value: value.to_string(),
        }
    }
}

/// A raw trace could not be normalized.
///
/// Fatal for the transaction it belongs to, never for a batch.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum MalformedTrace {
    #[error("malformed step {index}: {source}")]
    Step {
        index: usize,
        #[source]
        source: StepError,
    },
    #[error("line {line} looks like a trace step but could not be parsed: {reason}")]
    Unparseable { line: usize, reason: String },
    #[error("step {index} is at depth {depth}, but a trace starts at depth 1")]
    InitialDepth { index: usize, depth: u64 },
    #[error("step {index} is at depth 0")]
    ZeroDepth { index: usize },
    #[error("depth jumps from {from} to {to} at step {index}")]
    DepthJump { index: usize, from: u64, to: u64 },
    #[error("depth increases at step {index}, but the previous instruction {op} does not open a frame")]
    UnexpectedFrame { index: usize, op: String },
}

/// The pre-state for a transaction could not be soundly built.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("incomplete state: could not fetch account {address:?}")]
    IncompleteAccount {
        address: Address,
        #[source]
        source: ProviderError,
    },
    #[error("incomplete state: could not fetch slot {key:?} of account {address:?}")]
    IncompleteStorage {
        address: Address,
        key: H256,
        #[source]
        source: ProviderError,
    },
    #[error("unsupported feature: {0}")]
    UnsupportedFeature(String),
}

impl StateError {
    /// Whether this is one of the **IncompleteState** variants.
    pub fn is_incomplete_state(&self) -> bool {
        matches!(
            self,
            Self::IncompleteAccount { .. } | Self::IncompleteStorage { .. }
        )
    }
}

/// Everything that can abort [`crate::pipeline::run`].
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    MalformedTrace(#[from] MalformedTrace),
    #[error(transparent)]
    State(#[from] StateError),
    #[error("no account access log was supplied, and the trace format carries no contract attribution to derive one")]
    MissingAccessLog,
}
