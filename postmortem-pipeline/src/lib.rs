//! The crash analysis pipeline of `postmortem`.
//!
//! [`run_analysis`] drives the debugger facade through a fixed command
//! program per dialect, feeds the outputs through the parsers, enriches
//! the report with managed-runtime data, and finally runs the
//! [`finalize`] pass exactly once.
//!
//! Finalization enforces the report invariants (frame numbering, the
//! single faulting thread) and derives the secondary artifacts: the
//! deduplication signature, symbol health, the snapshot timeline with
//! wait classification and blocked-chain detection, deterministic
//! findings, and root-cause hypotheses. After finalization the report
//! is treated as immutable.
//!
//! This module is part of the `postmortem` crate.

#![warn(missing_docs)]

mod finalize;
mod findings;
mod heuristics;
mod pipeline;
mod signature;
mod timeline;

pub use crate::finalize::finalize;
pub use crate::pipeline::{run_analysis, PipelineOptions};
pub use crate::signature::signature_payload;
