//! Turns a traced Ethereum transaction into something another EVM can replay
//! and be checked against.
//!
//! A tracer gives you a per-instruction trace of a transaction. From it, this
//! library derives:
//! - a canonical trace of [`StepRecord`]s, whatever the producer
//!   ([`eip3155`], [`geth`], [`foundry`] or [`cast`]),
//! - the smallest [`prestate::PreState`] that reproduces the execution,
//!   wrapped in a state-test style [`fixture::ReplayFixture`],
//! - a [`stats::StatisticsReport`] over the execution.
//!
//! A second EVM's trace of the same fixture can then be checked against the
//! canonical one with [`compare::compare`].
//!
//! # Non-Goals
//! - Executing bytecode. Traces and state come from elsewhere.
//! - Post-state roots.
//! - Access-list aware gas accounting. Such transactions are rejected.

#![deny(rustdoc::broken_intra_doc_links)]
#![warn(missing_debug_implementations)]

/// The broad overview is as follows:
///
/// 1. A producer's raw entries implement [`normalize::RawStep`], and
///    [`normalize::normalize_trace`] turns them into [`StepRecord`]s, checking
///    depth transitions on the way.
/// 2. [`access::from_steps`] derives the [`access::AccountAccess`] log where
///    steps are attributed to contracts, otherwise the log is supplied.
/// 3. [`prestate::PreStateBuilder`] seeds every accessed account and slot
///    once from a [`prestate::StateProvider`].
/// 4. [`stats::StatisticsAggregator`] and the builder consume the same
///    steps and accesses independently.
///
/// [`pipeline::run`] does all of the above for one transaction.
const _DEVELOPER_DOCS: () = ();

pub mod access;
pub mod cast;
pub mod compare;
pub mod eip3155;
pub mod error;
pub mod fixture;
pub mod foundry;
pub mod geth;
pub mod normalize;
pub mod pipeline;
pub mod prestate;
pub mod stats;
mod step;

pub use compare::{compare, CompareConfig, ExclusionScope, MatchReport};
pub use error::{MalformedTrace, PipelineError, StateError, StepError};
pub use step::{read_jsonl, write_jsonl, Field, FieldValue, StepRecord};
