//! The structured crash analysis report produced by `postmortem`.
//!
//! The root type is [`CrashReport`], the single durable artifact of an
//! analysis run. It is created empty when a dump is opened, populated by
//! the output parsers and the managed-runtime reader, finalized exactly
//! once by the pipeline, and treated as immutable afterwards.
//!
//! Serialization conventions: keys are camelCase, `None` fields are
//! omitted, hex addresses are lowercase `0x`-prefixed strings, and
//! timestamps are UTC ISO-8601 with millisecond precision. Evidence
//! references into the report tree use RFC 6901 JSON pointers with the
//! `/analysis` prefix, see [`pointer`].
//!
//! This module is part of the `postmortem` crate.

#![warn(missing_docs)]

mod analysis;
mod heap;
pub mod pointer;
pub mod redaction;
mod report;

pub use crate::analysis::*;
pub use crate::heap::*;
pub use crate::report::*;
