//! The AI investigation orchestrator of `postmortem`.
//!
//! Consumes a finalized crash report and a [`ChatTransport`] capable of
//! tool use, and drives a bounded conversational loop: the model reads
//! the report, issues tool calls (execute a debugger command, inspect a
//! managed object, fetch a thread stack), and terminates by calling
//! `analysis_complete` with a structured conclusion.
//!
//! The loop enforces three budgets: iterations, total tool calls, and
//! per-message character counts (head-and-tail truncation). Everything
//! except cancellation is converted into a result object, so callers
//! always receive structured output.
//!
//! This module is part of the `postmortem` crate.

#![warn(missing_docs)]

mod orchestrator;
mod tools;
mod transport;

pub use crate::orchestrator::{
    investigate, Cancelled, ExecutedCommand, InvestigationOptions, InvestigationResult,
};
pub use crate::tools::ToolBackends;
pub use crate::transport::*;
