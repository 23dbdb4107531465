//! Everything for one transaction: normalize, derive accesses, build the
//! pre-state, aggregate statistics and assemble the fixture.
//!
//! Runs share nothing, so transactions may be processed in parallel.

use std::fmt;
use std::str::FromStr;

use ethereum_types::Address;
use itertools::Itertools as _;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, info_span, warn};

use crate::access::{self, AccountAccess};
use crate::cast::{self, CastLine};
use crate::eip3155::{self, Eip3155Step};
use crate::error::{MalformedTrace, PipelineError};
use crate::fixture::{BlockEnv, ReplayFixture, TxMeta};
use crate::foundry::{self, ArenaNode, GasOracle};
use crate::geth::{self, StructLogStep};
use crate::normalize::normalize_trace;
use crate::prestate::{self, StateProvider};
use crate::stats::{StatisticsAggregator, StatisticsReport};
use crate::StepRecord;

/// The producers a raw trace may come from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TraceFormat {
    /// JSON lines.
    Eip3155,
    /// A `debug_traceTransaction` result, or its `structLogs`.
    Geth,
    /// A `cast run --json` document, or its `arena`.
    Foundry,
    /// `cast run -t` output.
    Cast,
}

impl TraceFormat {
    pub const ALL: [TraceFormat; 4] = [Self::Eip3155, Self::Geth, Self::Foundry, Self::Cast];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Eip3155 => "eip3155",
            Self::Geth => "geth",
            Self::Foundry => "foundry",
            Self::Cast => "cast",
        }
    }
}

impl fmt::Display for TraceFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TraceFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|it| it.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| {
                format!(
                    "unknown trace format {s:?}, expected one of {}",
                    Self::ALL.iter().join(", ")
                )
            })
    }
}

/// A trace as its producer wrote it.
#[derive(Clone, Debug)]
pub enum RawTrace {
    Eip3155(Vec<Eip3155Step>),
    Geth(Vec<StructLogStep>),
    Foundry(Vec<ArenaNode>),
    /// With the arena of the same run, if available, for gas correction and
    /// attribution.
    Cast {
        lines: Vec<CastLine>,
        arena: Option<Vec<ArenaNode>>,
    },
}

impl RawTrace {
    pub fn parse(format: TraceFormat, input: &str) -> Result<Self, MalformedTrace> {
        Ok(match format {
            TraceFormat::Eip3155 => Self::Eip3155(eip3155::parse_jsonl(input)?),
            TraceFormat::Geth => Self::Geth(geth::parse(input)?),
            TraceFormat::Foundry => Self::Foundry(foundry::parse(input)?),
            TraceFormat::Cast => Self::Cast {
                lines: cast::parse_text(input)?,
                arena: None,
            },
        })
    }
}

/// The canonical trace, and the executing contract of every step where the
/// producer knows it.
#[derive(Clone, Debug, Default)]
pub struct Normalized {
    pub steps: Vec<StepRecord>,
    pub attributed: Option<Vec<(Address, StepRecord)>>,
    /// `(call data, return data)` sizes per frame.
    pub frames: Vec<(usize, usize)>,
}

/// Normalize a raw trace of any format.
pub fn normalize(trace: &RawTrace) -> Result<Normalized, MalformedTrace> {
    Ok(match trace {
        RawTrace::Eip3155(steps) => Normalized {
            steps: normalize_trace(steps)?,
            ..Default::default()
        },
        RawTrace::Geth(steps) => Normalized {
            steps: normalize_trace(steps)?,
            ..Default::default()
        },
        RawTrace::Foundry(nodes) => {
            let attributed = foundry::normalize_arena(nodes)?;
            Normalized {
                steps: attributed.iter().map(|(_, it)| it.clone()).collect(),
                attributed: Some(attributed),
                frames: foundry::call_sizes(nodes).collect(),
            }
        }
        RawTrace::Cast { lines, arena } => {
            let oracle = arena.as_deref().map(GasOracle::from_arena);
            let steps = cast::convert(lines, oracle.as_ref())?;
            match arena {
                Some(nodes) => Normalized {
                    steps,
                    attributed: Some(foundry::normalize_arena(nodes)?),
                    frames: foundry::call_sizes(nodes).collect(),
                },
                None => Normalized {
                    steps,
                    ..Default::default()
                },
            }
        }
    })
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct PipelineConfig {
    /// Fail with an unsupported-feature error on access lists and blobs,
    /// rather than warn and leave them out of the fixture.
    pub reject_unsupported: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            reject_unsupported: true,
        }
    }
}

#[derive(Clone, Debug)]
pub struct TxnInput {
    pub trace: RawTrace,
    /// Derived from the trace when absent, if the format allows.
    pub accesses: Option<Vec<AccountAccess>>,
    pub meta: TxMeta,
    pub env: BlockEnv,
    /// Whether the coinbase must be part of the pre-state.
    pub coinbase_touched: bool,
}

#[derive(Clone, Debug)]
pub struct TxnArtifacts {
    pub trace: Vec<StepRecord>,
    pub accesses: Vec<AccountAccess>,
    pub fixture: ReplayFixture,
    pub statistics: StatisticsReport,
}

/// Process one transaction. See the module documentation.
pub fn run<P: StateProvider + ?Sized>(
    input: TxnInput,
    provider: &P,
    config: &PipelineConfig,
) -> Result<TxnArtifacts, PipelineError> {
    let TxnInput {
        trace,
        accesses,
        meta,
        env,
        coinbase_touched,
    } = input;
    let _span = info_span!("txn", sender = ?meta.sender, nonce = %meta.nonce).entered();

    if config.reject_unsupported {
        meta.check_supported()?;
    } else if let Err(e) = meta.check_supported() {
        warn!(%e, "leaving unsupported features out of the fixture");
    }

    let Normalized {
        steps,
        attributed,
        frames,
    } = normalize(&trace)?;
    debug!(steps = steps.len(), "normalized");

    let accesses = match (accesses, &attributed) {
        (Some(it), _) => it,
        (None, Some(attributed)) => access::from_steps(attributed.iter().map(|(a, s)| (*a, s))),
        (None, None) => return Err(PipelineError::MissingAccessLog),
    };

    let coinbase = coinbase_touched.then_some(env.current_coinbase);
    let pre = prestate::build(provider, &meta.participants(coinbase), &accesses)?;

    let statistics = {
        let mut aggregator = StatisticsAggregator::default();
        match (&trace, &attributed) {
            (RawTrace::Foundry(_), Some(attributed)) => attributed
                .iter()
                .for_each(|(contract, step)| aggregator.observe_in(*contract, step)),
            (_, attributed) => {
                steps.iter().for_each(|it| aggregator.observe(it));
                attributed
                    .iter()
                    .flatten()
                    .for_each(|(contract, _)| aggregator.observe_contract(*contract));
            }
        }
        accesses.iter().for_each(|it| aggregator.observe_access(it));
        frames
            .iter()
            .for_each(|(data, ret)| aggregator.observe_call(*data, *ret));
        aggregator.finish()
    };

    let fixture = ReplayFixture {
        env,
        pre,
        transaction: (&meta).into(),
    };
    info!(
        steps = steps.len(),
        accounts = fixture.pre.len(),
        slots = fixture.pre.slot_count(),
        "processed transaction"
    );
    Ok(TxnArtifacts {
        trace: steps,
        accesses,
        fixture,
        statistics,
    })
}
