use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueHint};
use trace_replay::pipeline::TraceFormat;
use trace_replay::{CompareConfig, ExclusionScope, Field};

/// Minimal pre-states, canonical traces and trace diffs for traced Ethereum
/// transactions.
#[derive(Parser)]
#[command(version, propagate_version = true)]
pub(crate) struct Cli {
    #[command(subcommand)]
    pub(crate) command: Command,
}

#[derive(Subcommand)]
pub(crate) enum Command {
    /// Normalizes a producer's trace into canonical JSON lines.
    Normalize {
        /// The producer of the trace.
        #[arg(short, long, env = "EVM_REPLAY_FORMAT", value_parser = parse_format)]
        format: TraceFormat,
        /// The `cast run --json` arena of the same run, to correct the gas of
        /// a `cast` text trace.
        #[arg(long, value_hint = ValueHint::FilePath)]
        arena: Option<PathBuf>,
        #[arg(value_hint = ValueHint::FilePath)]
        input: PathBuf,
        /// Defaults to stdout.
        #[arg(short, long, value_hint = ValueHint::FilePath)]
        output: Option<PathBuf>,
    },
    /// Computes execution statistics over a canonical or EIP-3155 trace.
    Stats {
        #[arg(value_hint = ValueHint::FilePath)]
        input: PathBuf,
        /// Defaults to stdout.
        #[arg(short, long, value_hint = ValueHint::FilePath)]
        output: Option<PathBuf>,
    },
    /// Compares a candidate trace against a reference one. Both are canonical
    /// or raw EIP-3155 traces, other formats go through `normalize` first.
    /// Exits with a non-zero status if they do not match.
    Compare {
        #[arg(value_hint = ValueHint::FilePath)]
        reference: PathBuf,
        #[arg(value_hint = ValueHint::FilePath)]
        candidate: PathBuf,
        #[clap(flatten)]
        config: CliCompareConfig,
        /// Also write the report as JSON.
        #[arg(long, value_hint = ValueHint::FilePath)]
        json: Option<PathBuf>,
    },
    /// Builds the replay fixture of one transaction from its account accesses.
    Prestate {
        /// Account accesses, one per line.
        #[arg(short, long, value_hint = ValueHint::FilePath)]
        accesses: PathBuf,
        /// Account state at the start of the transaction.
        #[arg(short, long, value_hint = ValueHint::FilePath)]
        state: PathBuf,
        /// Transaction metadata.
        #[arg(short, long, value_hint = ValueHint::FilePath)]
        tx: PathBuf,
        /// Block environment, all zero if absent.
        #[arg(short, long, value_hint = ValueHint::FilePath)]
        env: Option<PathBuf>,
        /// Include the coinbase in the pre-state.
        #[arg(long)]
        coinbase_touched: bool,
        /// Defaults to stdout.
        #[arg(short, long, value_hint = ValueHint::FilePath)]
        output: Option<PathBuf>,
    },
    /// Runs the whole pipeline over transaction directories, writing the
    /// artifacts next to the inputs.
    Batch {
        #[arg(short, long, env = "EVM_REPLAY_FORMAT", value_parser = parse_format)]
        format: TraceFormat,
        /// Warn about access lists and blob hashes rather than fail.
        #[arg(long, env = "EVM_REPLAY_ALLOW_UNSUPPORTED")]
        allow_unsupported: bool,
        #[arg(required = true, value_hint = ValueHint::DirPath)]
        dirs: Vec<PathBuf>,
    },
}

#[derive(Args, Clone, Debug)]
pub(crate) struct CliCompareConfig {
    /// Fields to compare. Defaults to all but `memSize` and `refund`.
    #[arg(long, env = "EVM_REPLAY_FIELDS", value_delimiter = ',', value_parser = parse_field)]
    fields: Vec<Field>,
    /// Fields whose mismatches are tolerated.
    #[arg(long, env = "EVM_REPLAY_EXCLUDE", value_delimiter = ',', value_parser = parse_field)]
    exclude: Vec<Field>,
    /// Where excluded fields are tolerated.
    #[arg(
        long,
        env = "EVM_REPLAY_EXCLUDE_SCOPE",
        value_parser = parse_scope,
        default_value = "everywhere"
    )]
    exclude_scope: ExclusionScope,
    /// List at most this many mismatches.
    #[arg(long, env = "EVM_REPLAY_LIMIT")]
    limit: Option<usize>,
}

impl From<CliCompareConfig> for CompareConfig {
    fn from(cli: CliCompareConfig) -> Self {
        let mut config = CompareConfig::default();
        if !cli.fields.is_empty() {
            config = config.with_fields(cli.fields);
        }
        for field in cli.exclude {
            config = config.exclude(field, cli.exclude_scope);
        }
        match cli.limit {
            Some(limit) => config.with_report_limit(limit),
            None => config,
        }
    }
}

fn parse_format(s: &str) -> Result<TraceFormat, String> {
    s.parse()
}

fn parse_field(s: &str) -> Result<Field, String> {
    s.parse()
}

fn parse_scope(s: &str) -> Result<ExclusionScope, String> {
    s.parse()
}
