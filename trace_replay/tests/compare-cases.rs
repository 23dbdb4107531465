//! Every directory under `tests/data/compare` holds a `reference.jsonl` and a
//! `candidate.jsonl` trace, and a `case.json` with the comparator config and
//! the expected outcome.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context as _;
use assert2::check;
use libtest_mimic::{Arguments, Trial};
use serde::Deserialize;
use trace_replay::{compare, read_jsonl, CompareConfig, StepRecord};

#[derive(Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct Expected {
    #[serde(default)]
    config: CompareConfig,
    success: bool,
    mismatch_count: usize,
    #[serde(default)]
    excluded_mismatches: usize,
    #[serde(default)]
    length_mismatch: bool,
}

struct Case {
    name: String,
    reference: Vec<StepRecord>,
    candidate: Vec<StepRecord>,
    expected: Expected,
}

impl Case {
    fn load(dir: &Path) -> anyhow::Result<Self> {
        let name = dir
            .file_name()
            .and_then(|it| it.to_str())
            .context("non-UTF-8 case name")?
            .to_owned();
        let trace = |file: &str| -> anyhow::Result<Vec<StepRecord>> {
            read_jsonl(&fs::read_to_string(dir.join(file))?)
                .with_context(|| format!("couldn't load {file} of case {name}"))
        };
        let expected = serde_path_to_error::deserialize(&mut serde_json::Deserializer::from_str(
            &fs::read_to_string(dir.join("case.json"))?,
        ))
        .with_context(|| format!("couldn't load case.json of case {name}"))?;
        Ok(Self {
            reference: trace("reference.jsonl")?,
            candidate: trace("candidate.jsonl")?,
            expected,
            name,
        })
    }
}

fn cases() -> anyhow::Result<Vec<Case>> {
    glob::glob(concat!(env!("CARGO_MANIFEST_DIR"), "/tests/data/compare/*/"))
        .context("invalid glob pattern")?
        .map(|res| {
            let dir: PathBuf = res.context("filesystem error discovering test cases")?;
            Case::load(&dir)
        })
        .collect()
}

fn main() -> anyhow::Result<()> {
    let mut trials = vec![];
    for Case {
        name,
        reference,
        candidate,
        expected,
    } in cases()?
    {
        trials.push(Trial::test(name, move || {
            let report = compare(&reference, &candidate, &expected.config);
            check!(report.success == expected.success, "{report}");
            check!(report.mismatch_count == expected.mismatch_count, "{report}");
            check!(report.excluded_mismatches == expected.excluded_mismatches);
            check!(report.length_mismatch.is_some() == expected.length_mismatch);

            // comparing either trace against itself always matches
            for trace in [&reference, &candidate] {
                check!(compare(trace, trace, &expected.config).success);
            }
            Ok(())
        }));
    }
    libtest_mimic::run(&Arguments::from_args(), trials).exit()
}
