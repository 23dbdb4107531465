//! Reading and writing the documents [`trace_replay`] consumes and produces,
//! for the `replay` binary.

pub mod batch;
pub mod env;
pub mod fs;
pub mod tracing;
