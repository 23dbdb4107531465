use std::fs::{self, File};
use std::io::{BufWriter, Write as _};
use std::path::Path;

use anyhow::Context as _;
use serde::{de::DeserializeOwned, Serialize};
use trace_replay::{eip3155, StepRecord};

pub fn read_to_string(path: &Path) -> anyhow::Result<String> {
    fs::read_to_string(path).with_context(|| format!("couldn't read {}", path.display()))
}

/// Deserialize a JSON document, reporting the path of the offending field on
/// failure.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    fn _imp<T: DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
        let file = File::open(path)?;
        Ok(serde_path_to_error::deserialize(
            &mut serde_json::Deserializer::from_reader(std::io::BufReader::new(file)),
        )?)
    }
    _imp(path).with_context(|| format!("couldn't load {}", path.display()))
}

/// One JSON document per non-blank line.
pub fn read_json_lines<T: DeserializeOwned>(path: &Path) -> anyhow::Result<Vec<T>> {
    read_to_string(path)?
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(ix, line)| {
            serde_path_to_error::deserialize(&mut serde_json::Deserializer::from_str(line))
                .with_context(|| format!("{}:{}", path.display(), ix + 1))
        })
        .collect()
}

/// A canonical trace, or a raw EIP-3155 one. Summary lines are skipped.
pub fn read_trace(path: &Path) -> anyhow::Result<Vec<StepRecord>> {
    eip3155::normalize_jsonl(&read_to_string(path)?)
        .with_context(|| format!("couldn't load trace {}", path.display()))
}

/// Pretty JSON to `path`, creating its parent directories, or to stdout.
pub fn write_json<T: Serialize>(path: Option<&Path>, value: &T) -> anyhow::Result<()> {
    let mut out = writer(path)?;
    serde_json::to_writer_pretty(&mut out, value)?;
    writeln!(out)?;
    out.flush()?;
    Ok(())
}

pub fn write_trace(path: Option<&Path>, steps: &[StepRecord]) -> anyhow::Result<()> {
    let mut out = writer(path)?;
    trace_replay::write_jsonl(&mut out, steps)?;
    out.flush()?;
    Ok(())
}

pub fn write_json_lines<T: Serialize>(path: Option<&Path>, values: &[T]) -> anyhow::Result<()> {
    let mut out = writer(path)?;
    for value in values {
        serde_json::to_writer(&mut out, value)?;
        writeln!(out)?;
    }
    out.flush()?;
    Ok(())
}

fn writer(path: Option<&Path>) -> anyhow::Result<Box<dyn std::io::Write>> {
    let Some(path) = path else {
        return Ok(Box::new(BufWriter::new(std::io::stdout().lock())));
    };
    if let Some(parent) = path.parent().filter(|it| !it.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("couldn't create directory {}", parent.display()))?;
    }
    let file =
        File::create(path).with_context(|| format!("couldn't create {}", path.display()))?;
    Ok(Box::new(BufWriter::new(file)))
}

#[cfg(test)]
mod tests {
    use assert2::{check, let_assert};

    use super::*;

    #[test]
    fn traces_may_end_with_a_summary() {
        let path = std::env::temp_dir().join(format!("evm-replay-{}-raw.jsonl", std::process::id()));
        std::fs::write(
            &path,
            r#"{"pc":0,"op":96,"gas":"0x89f5","gasCost":"0x3","memSize":0,"stack":[],"depth":1,"refund":0,"opName":"PUSH1"}
{"pc":2,"op":0,"gas":"0x89f2","gasCost":"0x0","memSize":0,"stack":["0x80"],"depth":1,"refund":0,"opName":"STOP"}
{"output":"","gasUsed":"0x3","time":1000}
"#,
        )
        .unwrap();
        let_assert!(Ok(steps) = read_trace(&path));
        check!(steps.len() == 2);
        check!(steps[1].gas == 0x89f2);

        let rewritten = path.with_extension("canonical.jsonl");
        write_trace(Some(rewritten.as_path()), &steps).unwrap();
        check!(read_trace(&rewritten).unwrap() == steps);
    }
}
