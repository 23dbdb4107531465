use std::process::ExitCode;

use anyhow::Result;
use clap::Parser as _;
use evm_replay::{batch, env::load_dotenvy_vars_if_present, fs};
use replay::cli::{Cli, Command};
use trace_replay::access::AccountAccess;
use trace_replay::fixture::{BlockEnv, ReplayFixture, TxMeta};
use trace_replay::pipeline::{self, PipelineConfig, RawTrace};
use trace_replay::prestate::{self, PreState};
use trace_replay::stats::StatisticsReport;
use trace_replay::{compare, foundry};
use tracing::{info, warn};

mod replay {
    pub mod cli;
}

fn main() -> Result<ExitCode> {
    load_dotenvy_vars_if_present();
    evm_replay::tracing::init();

    match Cli::parse().command {
        Command::Normalize {
            format,
            arena,
            input,
            output,
        } => {
            let mut trace = RawTrace::parse(format, &fs::read_to_string(&input)?)?;
            if let (RawTrace::Cast { arena: slot, .. }, Some(path)) = (&mut trace, arena) {
                *slot = Some(foundry::parse(&fs::read_to_string(&path)?)?);
            }
            let normalized = pipeline::normalize(&trace)?;
            info!(steps = normalized.steps.len(), %format, "normalized");
            fs::write_trace(output.as_deref(), &normalized.steps)?;
        }
        Command::Stats { input, output } => {
            let steps = fs::read_trace(&input)?;
            fs::write_json(output.as_deref(), &StatisticsReport::from_steps(&steps))?;
        }
        Command::Compare {
            reference,
            candidate,
            config,
            json,
        } => {
            let report = compare(
                &fs::read_trace(&reference)?,
                &fs::read_trace(&candidate)?,
                &config.into(),
            );
            println!("{report}");
            if let Some(path) = json {
                fs::write_json(Some(path.as_path()), &report)?;
            }
            if !report.success {
                return Ok(ExitCode::FAILURE);
            }
        }
        Command::Prestate {
            accesses,
            state,
            tx,
            env,
            coinbase_touched,
            output,
        } => {
            let accesses = fs::read_json_lines::<AccountAccess>(&accesses)?;
            let state = fs::read_json::<PreState>(&state)?;
            let meta = fs::read_json::<TxMeta>(&tx)?;
            let env = match env {
                Some(path) => fs::read_json::<BlockEnv>(&path)?,
                None => BlockEnv::default(),
            };
            let coinbase = coinbase_touched.then_some(env.current_coinbase);
            let pre = prestate::build(&state, &meta.participants(coinbase), &accesses)?;
            let fixture = ReplayFixture::assemble(env, pre, &meta)?;
            fs::write_json(output.as_deref(), &fixture)?;
        }
        Command::Batch {
            format,
            allow_unsupported,
            dirs,
        } => {
            if allow_unsupported {
                warn!("unsupported transaction features will be left out of fixtures");
            }
            batch::run(
                &dirs,
                format,
                &PipelineConfig {
                    reject_unsupported: !allow_unsupported,
                },
            )?;
        }
    }
    Ok(ExitCode::SUCCESS)
}
