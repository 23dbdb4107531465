//! Single-pass execution statistics.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use ethereum_types::{Address, BigEndianHash as _, H256};
use evm_replay_common::opcode;
use serde::{Deserialize, Serialize};

use crate::access::AccountAccess;
use crate::StepRecord;

/// Summary of a sample of sizes.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Distribution {
    pub mean: f64,
    pub median: f64,
    pub maximum: u64,
    pub minimum: u64,
    /// The most common value, if any value occurs more than once. Ties go to
    /// the value seen first.
    pub mode: Option<u64>,
    #[serde(rename = "Standard Deviation")]
    pub standard_deviation: f64,
    pub variance: f64,
    pub range: u64,
    #[serde(rename = "Q1")]
    pub q1: f64,
    #[serde(rename = "Q3")]
    pub q3: f64,
    pub count: usize,
    pub sum: u128,
}

impl Distribution {
    /// [`None`] for an empty sample.
    pub fn from_samples(samples: Vec<u64>) -> Option<Self> {
        let first = *samples.first()?;
        let count = samples.len();
        let sum = samples.iter().map(|&it| u128::from(it)).sum::<u128>();
        let mean = sum as f64 / count as f64;
        let variance = match count {
            1 => 0.0,
            _ => {
                samples
                    .iter()
                    .map(|&it| (it as f64 - mean).powi(2))
                    .sum::<f64>()
                    / (count - 1) as f64
            }
        };
        let mode = mode(&samples);

        let mut sorted = samples;
        sorted.sort_unstable();
        let (minimum, maximum) = (sorted[0], sorted[count - 1]);
        let (q1, q3) = match count {
            1 => (first as f64, first as f64),
            _ => (
                median(&sorted[..count / 2]),
                median(&sorted[(count + 1) / 2..]),
            ),
        };

        Some(Self {
            mean,
            median: median(&sorted),
            maximum,
            minimum,
            mode,
            standard_deviation: variance.sqrt(),
            variance,
            range: maximum - minimum,
            q1,
            q3,
            count,
            sum,
        })
    }
}

/// Of a sorted, non-empty slice. Even lengths average the middle pair.
fn median(sorted: &[u64]) -> f64 {
    let mid = sorted.len() / 2;
    match sorted.len() % 2 {
        0 => (sorted[mid - 1] as f64 + sorted[mid] as f64) / 2.0,
        _ => sorted[mid] as f64,
    }
}

fn mode(samples: &[u64]) -> Option<u64> {
    let mut counts = HashMap::<u64, usize>::new();
    for &it in samples {
        *counts.entry(it).or_default() += 1;
    }
    let best = counts.values().copied().max()?;
    if best < 2 {
        return None;
    }
    samples.iter().copied().find(|it| counts[it] == best)
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct StatisticsReport {
    /// Keyed by mnemonic.
    pub opcodes_count: BTreeMap<String, u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack_size_statistics: Option<Distribution>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_size_statistics: Option<Distribution>,
    /// Call data sizes in bytes, one sample per frame.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_size_statistics: Option<Distribution>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_size_statistics: Option<Distribution>,
    /// Contracts that executed code.
    pub addresses: BTreeSet<Address>,
    pub count_address: usize,
    pub max_depth: u64,
    pub storage_accessed: BTreeMap<Address, BTreeSet<H256>>,
    pub storage_accessed_count: BTreeMap<Address, usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_accessed_statistics: Option<Distribution>,
}

impl StatisticsReport {
    /// Statistics over unattributed steps. Storage is only tracked through
    /// [`StatisticsAggregator::observe_in`] or
    /// [`StatisticsAggregator::observe_access`].
    pub fn from_steps<'a>(steps: impl IntoIterator<Item = &'a StepRecord>) -> Self {
        let mut aggregator = StatisticsAggregator::default();
        steps.into_iter().for_each(|it| aggregator.observe(it));
        aggregator.finish()
    }

    /// Total over [`Self::opcodes_count`], which is the number of steps.
    pub fn step_count(&self) -> u64 {
        self.opcodes_count.values().sum()
    }
}

/// Feed steps in any order, then call [`StatisticsAggregator::finish`].
///
/// Sizes are buffered until the end for the medians, everything else is a
/// running tally.
#[derive(Clone, Debug, Default)]
pub struct StatisticsAggregator {
    opcodes: BTreeMap<u8, u64>,
    stack_sizes: Vec<u64>,
    memory_sizes: Vec<u64>,
    call_sizes: Vec<u64>,
    return_sizes: Vec<u64>,
    max_depth: u64,
    addresses: BTreeSet<Address>,
    storage: BTreeMap<Address, BTreeSet<H256>>,
}

impl StatisticsAggregator {
    pub fn observe(&mut self, step: &StepRecord) {
        *self.opcodes.entry(step.op).or_default() += 1;
        self.stack_sizes.push(step.stack.len() as u64);
        self.memory_sizes.push(step.mem_size);
        self.max_depth = self.max_depth.max(step.depth);
    }

    /// Like [`Self::observe`], for a step executed by `contract`.
    pub fn observe_in(&mut self, contract: Address, step: &StepRecord) {
        self.observe(step);
        self.addresses.insert(contract);
        if let (opcode::SLOAD | opcode::SSTORE, Some(key)) = (step.op, step.stack_top()) {
            self.storage
                .entry(contract)
                .or_default()
                .insert(H256::from_uint(&key));
        }
    }

    /// A contract that executed code, when steps arrive unattributed.
    pub fn observe_contract(&mut self, contract: Address) {
        self.addresses.insert(contract);
    }

    /// Record the slot of a storage access. Other kinds are ignored.
    pub fn observe_access(&mut self, access: &AccountAccess) {
        if let Some(key) = access.kind.storage_key() {
            self.storage.entry(access.address).or_default().insert(key);
        }
    }

    /// Sizes, in bytes, of one frame's call data and return data.
    pub fn observe_call(&mut self, data_len: usize, return_len: usize) {
        self.call_sizes.push(data_len as u64);
        self.return_sizes.push(return_len as u64);
    }

    pub fn finish(self) -> StatisticsReport {
        let storage_accessed_count = self
            .storage
            .iter()
            .map(|(address, keys)| (*address, keys.len()))
            .collect::<BTreeMap<_, _>>();
        StatisticsReport {
            opcodes_count: self
                .opcodes
                .into_iter()
                .map(|(op, count)| (opcode::name(op), count))
                .collect(),
            stack_size_statistics: Distribution::from_samples(self.stack_sizes),
            memory_size_statistics: Distribution::from_samples(self.memory_sizes),
            call_size_statistics: Distribution::from_samples(self.call_sizes),
            return_size_statistics: Distribution::from_samples(self.return_sizes),
            count_address: self.addresses.len(),
            addresses: self.addresses,
            max_depth: self.max_depth,
            storage_accessed_statistics: Distribution::from_samples(
                storage_accessed_count.values().map(|&it| it as u64).collect(),
            ),
            storage_accessed: self.storage,
            storage_accessed_count,
        }
    }
}
