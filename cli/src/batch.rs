//! A transaction directory holds everything needed to process one traced
//! transaction:
//!
//! | file                 | contents                                          |
//! |----------------------|---------------------------------------------------|
//! | `trace.jsonl`        | EIP-3155 trace                                    |
//! | `trace.json`         | geth struct logs, or a foundry arena              |
//! | `trace.txt`          | `cast run -t` output, with the run's arena in `arena.json` if available |
//! | `tx.json`            | transaction metadata                              |
//! | `env.json`           | block environment, all zero if absent             |
//! | `state.json`         | account state at the start of the transaction     |
//! | `accesses.jsonl`     | account accesses, derived from the trace if absent |
//! | `coinbase`           | present if the coinbase was touched               |
//!
//! Outputs are written next to the inputs.

use std::path::{Path, PathBuf};

use anyhow::bail;
use trace_replay::fixture::{BlockEnv, TxMeta};
use trace_replay::foundry;
use trace_replay::pipeline::{self, PipelineConfig, RawTrace, TraceFormat, TxnArtifacts, TxnInput};
use trace_replay::prestate::PreState;
use tracing::{error, info, info_span};

use crate::fs;

pub const FIXTURE: &str = "txTest.json";
pub const STATISTICS: &str = "txStats.json";
pub const CANONICAL_TRACE: &str = "txTraceEIP3155.json";
pub const ACCESSES: &str = "accesses.jsonl";

/// The inputs of one transaction directory, read into memory.
#[derive(Debug)]
pub struct TxnDir {
    pub path: PathBuf,
    pub input: TxnInput,
    pub state: PreState,
}

impl TxnDir {
    pub fn load(path: &Path, format: TraceFormat) -> anyhow::Result<Self> {
        let raw = fs::read_to_string(&path.join(trace_file(format)))?;
        let trace = match RawTrace::parse(format, &raw)? {
            RawTrace::Cast { lines, .. } => {
                let arena = path.join("arena.json");
                RawTrace::Cast {
                    lines,
                    arena: if arena.exists() {
                        Some(foundry::parse(&fs::read_to_string(&arena)?)?)
                    } else {
                        None
                    },
                }
            }
            other => other,
        };
        let accesses = path.join(ACCESSES);
        let env = path.join("env.json");
        Ok(Self {
            path: path.to_owned(),
            input: TxnInput {
                trace,
                accesses: if accesses.exists() {
                    Some(fs::read_json_lines(&accesses)?)
                } else {
                    None
                },
                meta: fs::read_json::<TxMeta>(&path.join("tx.json"))?,
                env: if env.exists() {
                    fs::read_json::<BlockEnv>(&env)?
                } else {
                    BlockEnv::default()
                },
                coinbase_touched: path.join("coinbase").exists(),
            },
            state: fs::read_json(&path.join("state.json"))?,
        })
    }

    pub fn run(self, config: &PipelineConfig) -> anyhow::Result<TxnArtifacts> {
        let Self { path, input, state } = self;
        let derived = input.accesses.is_none();
        let artifacts = pipeline::run(input, &state, config)?;
        fs::write_json(Some(path.join(FIXTURE).as_path()), &artifacts.fixture)?;
        fs::write_json(Some(path.join(STATISTICS).as_path()), &artifacts.statistics)?;
        fs::write_trace(Some(path.join(CANONICAL_TRACE).as_path()), &artifacts.trace)?;
        if derived {
            fs::write_json_lines(Some(path.join(ACCESSES).as_path()), &artifacts.accesses)?;
        }
        Ok(artifacts)
    }
}

pub fn trace_file(format: TraceFormat) -> &'static str {
    match format {
        TraceFormat::Eip3155 => "trace.jsonl",
        TraceFormat::Geth | TraceFormat::Foundry => "trace.json",
        TraceFormat::Cast => "trace.txt",
    }
}

/// Process every directory, logging failures instead of stopping at them.
///
/// Fails at the end if any transaction did.
pub fn run(dirs: &[PathBuf], format: TraceFormat, config: &PipelineConfig) -> anyhow::Result<()> {
    let mut failed = 0;
    for dir in dirs {
        let _span = info_span!("batch", dir = %dir.display()).entered();
        match TxnDir::load(dir, format).and_then(|it| it.run(config)) {
            Ok(artifacts) => info!(
                steps = artifacts.trace.len(),
                accounts = artifacts.fixture.pre.len(),
                "wrote artifacts"
            ),
            Err(e) => {
                failed += 1;
                error!("{e:?}")
            }
        }
    }
    info!(total = dirs.len(), failed, "batch complete");
    if failed != 0 {
        bail!("{failed} of {} transactions failed", dirs.len())
    }
    Ok(())
}
